//! Spell-list pages and per-class list resolution.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::context::Core;
use crate::error::{CoreResult, Reason};
use crate::ids::{ClassId, ListUuid, SpellUuid};
use crate::model::{Actor, ClassEntry, Document, JournalPage, PackKind, SpellSet};
use crate::rules::ClassRules;

pub const LIST_PAGE_TYPE: &str = "spells";
pub const MERGED_FOLDER: &str = "Merged";
pub const CUSTOM_FOLDER: &str = "Custom";
pub const MODIFIED_FOLDER: &str = "Modified";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListType {
    Class,
    Subclass,
    Other,
}

/// Validated view of a `spells` journal page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellListPage {
    pub uuid: ListUuid,
    pub name: String,
    pub identifier: ClassId,
    pub list_type: ListType,
    pub spells: SpellSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default)]
    pub is_custom: bool,
    #[serde(default)]
    pub is_new_list: bool,
    #[serde(default)]
    pub is_merged: bool,
}

#[derive(Deserialize)]
struct ListSystem {
    identifier: Option<String>,
    #[serde(rename = "type")]
    list_type: Option<ListType>,
    spells: Option<Vec<SpellUuid>>,
}

fn flag(page: &JournalPage, scope: &str, key: &str) -> bool {
    page.scoped_flags(scope)
        .and_then(|f| f.get(key))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// `package.pack` of a compendium document UUID.
fn pack_of(uuid: &str) -> Option<String> {
    SpellUuid::new(uuid).pack_id()
}

impl SpellListPage {
    /// Pages lacking `system.identifier` or `system.spells` are an invalid shape.
    pub fn from_page(page: &JournalPage, scope: &str) -> Result<Self, Reason> {
        if page.page_type != LIST_PAGE_TYPE {
            return Err(Reason::InvalidShape);
        }
        let system: ListSystem = serde_json::from_value(page.system.clone()).map_err(|_| Reason::InvalidShape)?;
        let (Some(identifier), Some(spells)) = (system.identifier, system.spells) else {
            return Err(Reason::InvalidShape);
        };
        if identifier.trim().is_empty() {
            return Err(Reason::InvalidShape);
        }
        Ok(Self {
            uuid: ListUuid::new(page.uuid.clone()),
            name: page.name.clone(),
            identifier: ClassId::new(identifier),
            list_type: system.list_type.unwrap_or(ListType::Class),
            spells: spells.into_iter().collect(),
            pack: pack_of(&page.uuid),
            folder: page.folder.clone(),
            is_custom: flag(page, scope, "isCustom"),
            is_new_list: flag(page, scope, "isNewList"),
            is_merged: flag(page, scope, "isMerged"),
        })
    }

    pub fn package(&self) -> Option<&str> {
        self.pack.as_deref().and_then(|p| p.split('.').next())
    }
}

/// Union of `sources` in order; logs new vs duplicate per source.
pub fn merge_spell_sets<'s>(sources: impl IntoIterator<Item = (&'s str, &'s SpellSet)>) -> SpellSet {
    let mut merged = SpellSet::new();
    for (label, set) in sources {
        let before = merged.len();
        merged.extend(set.iter().cloned());
        let added = merged.len() - before;
        debug!(source = label, added, duplicate = set.len() - added, "merged spell list");
    }
    merged
}

fn slug(name: &str) -> String {
    let mut out = String::new();
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

pub struct SpellListResolver<'a> {
    core: &'a Core,
}

impl<'a> SpellListResolver<'a> {
    pub(crate) fn new(core: &'a Core) -> Self {
        Self { core }
    }

    /// Journal packs enabled for indexing, in store order.
    pub async fn enabled_packs(&self) -> CoreResult<Vec<String>> {
        let enabled = self.core.settings().indexed_compendiums().await?;
        let custom = self.core.config().custom_list_pack();
        Ok(self
            .core
            .store()
            .packs()
            .await?
            .into_iter()
            .filter(|p| p.kind == PackKind::JournalEntry)
            .filter(|p| p.id == custom || enabled.get(&p.id) != Some(&false))
            .map(|p| p.id)
            .collect())
    }

    async fn pack_lists(&self, pack: &str) -> CoreResult<Vec<SpellListPage>> {
        let scope = self.core.scope();
        let mut lists = Vec::new();
        for page in self.core.store().pack_pages(pack).await? {
            if page.page_type != LIST_PAGE_TYPE {
                continue;
            }
            match SpellListPage::from_page(&page, scope) {
                Ok(list) => lists.push(list),
                Err(_) => debug!(pack, page = %page.uuid, "skipping malformed spell list"),
            }
        }
        Ok(lists)
    }

    /// Every valid list page across enabled packs; reads packs directly.
    pub async fn scan_lists(&self) -> CoreResult<Vec<SpellListPage>> {
        let mut all = Vec::new();
        for pack in self.enabled_packs().await? {
            all.extend(self.pack_lists(&pack).await?);
        }
        Ok(all)
    }

    pub async fn load_list(&self, uuid: &ListUuid) -> CoreResult<Option<SpellListPage>> {
        match self.core.store().from_uuid(uuid.as_str()).await? {
            Some(Document::Page(page)) => match SpellListPage::from_page(&page, self.core.scope()) {
                Ok(list) => Ok(Some(list)),
                Err(_) => {
                    info!(list = %uuid, "spell list page has no identifier or spells");
                    Ok(None)
                }
            },
            Some(Document::Item(_)) => {
                info!(list = %uuid, "uuid is not a journal page");
                Ok(None)
            }
            None => {
                info!(list = %uuid, "spell list not found");
                Ok(None)
            }
        }
    }

    /// Swaps in the mapped replacement when one is configured and loadable.
    async fn mapped(&self, list: SpellListPage, mappings: &IndexMap<ListUuid, ListUuid>) -> CoreResult<SpellListPage> {
        let Some(replacement) = mappings.get(&list.uuid) else {
            return Ok(list);
        };
        match self.load_list(replacement).await? {
            Some(custom) => {
                debug!(original = %list.uuid, replacement = %custom.uuid, "custom mapping applied");
                Ok(custom)
            }
            None => Ok(list),
        }
    }

    /// Resolves with the actor's stored rules for `class`.
    pub async fn resolve(&self, actor: &Actor, class: &ClassId) -> CoreResult<SpellSet> {
        let rules = self.core.rules().get_class_rules(&actor.id, class).await?;
        self.resolve_with_rules(actor, class, &rules).await
    }

    /// Class list for `class` under `rules`. Empty means no list.
    pub async fn resolve_with_rules(&self, actor: &Actor, class: &ClassId, rules: &ClassRules) -> CoreResult<SpellSet> {
        let Some(entry) = actor.class(class) else {
            debug!(actor = %actor.id, %class, "class not on actor");
            return Ok(SpellSet::new());
        };
        let mappings = self.core.settings().custom_mappings().await?;
        let mut result = self.base_list(&entry, rules, &mappings).await?;

        if let Some(sub) = entry.subclass {
            if sub.identifier != *class {
                if let Some(list) = self.find_typed(&sub.identifier, ListType::Subclass, &mappings).await? {
                    let base = std::mem::take(&mut result);
                    result = merge_spell_sets([("class", &base), (list.name.as_str(), &list.spells)]);
                }
            }
        }
        debug!(actor = %actor.id, %class, spells = result.len(), "class list resolved");
        Ok(result)
    }

    async fn base_list(
        &self,
        entry: &ClassEntry<'_>,
        rules: &ClassRules,
        mappings: &IndexMap<ListUuid, ListUuid>,
    ) -> CoreResult<SpellSet> {
        let class = entry.id();

        if !rules.custom_spell_list.is_empty() {
            let mut loaded = Vec::new();
            for uuid in &rules.custom_spell_list {
                if let Some(list) = self.load_list(uuid).await? {
                    loaded.push(self.mapped(list, mappings).await?);
                }
            }
            let merged = merge_spell_sets(loaded.iter().map(|l| (l.name.as_str(), &l.spells)));
            if !merged.is_empty() {
                return Ok(merged);
            }
        }

        let source_package = entry.data.source_package();
        let preload = self.core.spell_index().preloaded().await?;
        let matches: Vec<&SpellListPage> = preload
            .lists
            .iter()
            .filter(|l| &l.identifier == class && l.list_type == ListType::Class && !l.is_merged)
            .collect();
        let chosen = match matches.iter().find(|l| source_package.is_some() && l.package() == source_package) {
            Some(same) => Some(*same),
            None => {
                if let Some(first) = matches.first() {
                    info!(%class, list = %first.uuid, "no list in the class's source folder, using first match");
                }
                matches.first().copied()
            }
        };
        if let Some(list) = chosen {
            let list = self.mapped(list.clone(), mappings).await?;
            if !list.spells.is_empty() {
                return Ok(list.spells);
            }
        }

        let custom_pack = self.core.config().custom_list_pack();
        if let Some(list) = self
            .pack_lists(&custom_pack)
            .await?
            .into_iter()
            .find(|l| (l.is_custom || l.is_new_list) && &l.identifier == class && !l.spells.is_empty())
        {
            return Ok(list.spells);
        }

        let packs = self.enabled_packs().await?;
        if let Some(package) = source_package {
            for pack in packs.iter().filter(|p| p.split('.').next() == Some(package)) {
                if let Some(list) = self.first_match(pack, class, ListType::Class).await? {
                    return Ok(self.mapped(list, mappings).await?.spells);
                }
            }
        }
        for pack in &packs {
            if let Some(list) = self.first_match(pack, class, ListType::Class).await? {
                return Ok(self.mapped(list, mappings).await?.spells);
            }
        }

        info!(%class, "no spell list found");
        Ok(SpellSet::new())
    }

    async fn first_match(&self, pack: &str, identifier: &ClassId, list_type: ListType) -> CoreResult<Option<SpellListPage>> {
        Ok(self
            .pack_lists(pack)
            .await?
            .into_iter()
            .find(|l| &l.identifier == identifier && l.list_type == list_type && !l.is_merged))
    }

    async fn find_typed(
        &self,
        identifier: &ClassId,
        list_type: ListType,
        mappings: &IndexMap<ListUuid, ListUuid>,
    ) -> CoreResult<Option<SpellListPage>> {
        let preload = self.core.spell_index().preloaded().await?;
        let found = preload
            .lists
            .iter()
            .find(|l| &l.identifier == identifier && l.list_type == list_type)
            .cloned();
        match found {
            Some(list) => Ok(Some(self.mapped(list, mappings).await?)),
            None => Ok(None),
        }
    }

    /// Lists a host may publish to its own registry.
    pub async fn registered_lists(&self) -> CoreResult<Vec<SpellListPage>> {
        let mut out = Vec::new();
        for uuid in self.core.settings().registry_enabled_lists().await? {
            if let Some(list) = self.load_list(&uuid).await? {
                out.push(list);
            }
        }
        Ok(out)
    }

    /// Writes the union of `sources` as a new page in the custom pack's merged folder.
    pub async fn create_merged_list(
        &self,
        name: &str,
        identifier: &ClassId,
        sources: &[ListUuid],
    ) -> CoreResult<SpellListPage> {
        let mut loaded = Vec::new();
        for uuid in sources {
            if let Some(list) = self.load_list(uuid).await? {
                loaded.push(list);
            }
        }
        let spells = merge_spell_sets(loaded.iter().map(|l| (l.name.as_str(), &l.spells)));

        let pack = self.core.config().custom_list_pack();
        let id = format!("merged-{}", slug(name));
        let scope = self.core.scope();
        let mut page = JournalPage {
            id: id.clone(),
            uuid: format!("Compendium.{pack}.JournalEntry.merged.JournalEntryPage.{id}"),
            name: name.to_string(),
            page_type: LIST_PAGE_TYPE.to_string(),
            system: json!({
                "identifier": identifier,
                "type": ListType::Class,
                "spells": spells,
            }),
            flags: Default::default(),
            content: String::new(),
            folder: Some(MERGED_FOLDER.to_string()),
            journal: Some("merged".to_string()),
        };
        page.set_scoped_flag(scope, "isMerged", Value::Bool(true));
        page.set_scoped_flag(scope, "isCustom", Value::Bool(true));
        page.set_scoped_flag(scope, "sourceLists", json!(sources));

        let list = SpellListPage::from_page(&page, scope).map_err(|_| {
            crate::error::StoreError::Rejected(format!("merged list {name:?} has no identifier"))
        })?;
        self.core.store().upsert_page(&pack, page).await?;
        self.core.invalidate_preload().await;
        info!(list = %list.uuid, spells = list.spells.len(), sources = sources.len(), "merged list created");
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(system: Value) -> JournalPage {
        JournalPage {
            id: "p1".into(),
            uuid: "Compendium.dnd5e.lists.JournalEntry.j1.JournalEntryPage.p1".into(),
            name: "Wizard Spells".into(),
            page_type: LIST_PAGE_TYPE.into(),
            system,
            flags: Default::default(),
            content: String::new(),
            folder: None,
            journal: None,
        }
    }

    #[test]
    fn page_without_spells_is_invalid() {
        let err = SpellListPage::from_page(&page(json!({"identifier": "wizard"})), "spellprep");
        assert_eq!(err, Err(Reason::InvalidShape));
    }

    #[test]
    fn page_parses_identifier_and_pack() {
        let list = SpellListPage::from_page(
            &page(json!({"identifier": "Wizard", "type": "class", "spells": ["a", "b", "a"]})),
            "spellprep",
        )
        .unwrap();
        assert_eq!(list.identifier.as_str(), "wizard");
        assert_eq!(list.spells.len(), 2);
        assert_eq!(list.package(), Some("dnd5e"));
    }

    #[test]
    fn merge_keeps_first_seen_order() {
        let a: SpellSet = ["x", "y"].into_iter().map(SpellUuid::new).collect();
        let b: SpellSet = ["y", "z"].into_iter().map(SpellUuid::new).collect();
        let merged: Vec<_> = merge_spell_sets([("a", &a), ("b", &b)])
            .into_iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(merged, ["x", "y", "z"]);
    }

    #[test]
    fn slugs_are_kebab_case() {
        assert_eq!(slug("Arcane + Divine!"), "arcane-divine");
    }
}
