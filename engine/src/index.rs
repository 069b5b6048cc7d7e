//! Bulk spell fetches grouped by pack, backed by a preloaded snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::context::Core;
use crate::error::{CoreResult, StoreError};
use crate::ids::SpellUuid;
use crate::lists::SpellListPage;
use crate::model::{Components, Document, IndexEntry, Item, JournalPage, SpellData};

/// Projection requested from every pack index read.
pub const INDEX_FIELDS: &[&str] = &[
    "name",
    "img",
    "type",
    "system.level",
    "system.school",
    "system.preparation",
    "system.method",
    "system.prepared",
    "system.activation",
    "system.range",
    "system.duration",
    "system.properties",
    "system.materials",
    "system.activities",
    "system.description",
    "system.components",
    "system.tags",
    "system.source",
];

/// Display and rule fields of one spell document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellRecord {
    pub uuid: SpellUuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    pub level: u8,
    pub school: String,
    pub components: Components,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack: Option<String>,
}

impl SpellRecord {
    fn from_data(uuid: SpellUuid, name: String, img: Option<String>, data: SpellData, pack: Option<String>) -> Self {
        Self {
            uuid,
            name,
            img,
            level: data.level,
            school: data.school,
            components: data.components,
            description: data.description,
            tags: data.tags,
            pack,
        }
    }

    fn from_index(entry: &IndexEntry, pack: &str) -> Result<Self, FetchFailureKind> {
        if entry.doc_type != "spell" {
            return Err(FetchFailureKind::NotASpell);
        }
        let data: SpellData = serde_json::from_value(entry.system.clone()).map_err(|e| {
            debug!(uuid = %entry.uuid, error = %e, "index entry has no usable spell data");
            FetchFailureKind::NotASpell
        })?;
        Ok(Self::from_data(
            entry.uuid.clone(),
            entry.name.clone(),
            entry.img.clone(),
            data,
            Some(pack.to_string()),
        ))
    }

    pub fn from_item(uuid: SpellUuid, item: &Item) -> Option<Self> {
        let data = item.spell()?.clone();
        let pack = uuid.pack_id();
        Some(Self::from_data(uuid, item.name.clone(), item.img.clone(), data, pack))
    }

    pub fn is_ritual(&self) -> bool {
        self.components.ritual
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchFailureKind {
    PackNotFound,
    NotInCompendium,
    NotASpell,
    DocumentNotFound,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub uuid: SpellUuid,
    pub kind: FetchFailureKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub spells: Vec<SpellRecord>,
    pub failures: Vec<FetchFailure>,
    pub from_cache: bool,
}

/// Process-wide snapshot of list pages and the spells they reference.
#[derive(Debug, Clone, Default)]
pub struct PreloadedIndex {
    pub version: String,
    pub lists: Vec<SpellListPage>,
    pub spells: IndexMap<SpellUuid, SpellRecord>,
}

impl PreloadedIndex {
    pub fn covers(&self, uuids: &IndexSet<SpellUuid>) -> bool {
        uuids.iter().all(|uuid| self.spells.contains_key(uuid))
    }
}

pub struct SpellIndex<'a> {
    core: &'a Core,
}

impl<'a> SpellIndex<'a> {
    pub(crate) fn new(core: &'a Core) -> Self {
        Self { core }
    }

    /// Fetched spells at or below `max_level`, in request order. Failures are logged.
    pub async fn fetch(&self, uuids: &IndexSet<SpellUuid>, max_level: u8) -> Vec<SpellRecord> {
        self.fetch_detailed(uuids, max_level).await.spells
    }

    pub async fn fetch_detailed(&self, uuids: &IndexSet<SpellUuid>, max_level: u8) -> FetchReport {
        if let Some(preload) = self.core.preload_snapshot().await {
            if !uuids.is_empty() && preload.covers(uuids) {
                let spells = uuids
                    .iter()
                    .filter_map(|uuid| preload.spells.get(uuid))
                    .filter(|spell| spell.level <= max_level)
                    .cloned()
                    .collect();
                return FetchReport {
                    spells,
                    failures: Vec::new(),
                    from_cache: true,
                };
            }
        }
        let mut report = self.fetch_uncached(uuids).await;
        report.spells.retain(|spell| spell.level <= max_level);
        report
    }

    async fn fetch_uncached(&self, uuids: &IndexSet<SpellUuid>) -> FetchReport {
        let mut by_pack: IndexMap<String, Vec<&SpellUuid>> = IndexMap::new();
        let mut loose: Vec<&SpellUuid> = Vec::new();
        for uuid in uuids {
            match uuid.pack_id() {
                Some(pack) => by_pack.entry(pack).or_default().push(uuid),
                None => loose.push(uuid),
            }
        }

        let mut found: HashMap<&SpellUuid, SpellRecord> = HashMap::new();
        let mut failures: Vec<FetchFailure> = Vec::new();
        let mut fail = |uuid: &SpellUuid, kind: FetchFailureKind| {
            failures.push(FetchFailure {
                uuid: uuid.clone(),
                kind,
            })
        };

        for (pack, wanted) in &by_pack {
            let index = match self.core.store().pack_index(pack, INDEX_FIELDS).await {
                Ok(Some(index)) => index,
                Ok(None) => {
                    info!(pack = %pack, count = wanted.len(), "spell pack not found");
                    wanted.iter().for_each(|uuid| fail(*uuid, FetchFailureKind::PackNotFound));
                    continue;
                }
                Err(e) => {
                    error!(pack = %pack, error = %e, "pack index read failed");
                    wanted.iter().for_each(|uuid| fail(*uuid, FetchFailureKind::Unavailable));
                    continue;
                }
            };
            let by_id: HashMap<&str, &IndexEntry> = index.iter().map(|e| (e.id.as_str(), e)).collect();
            for uuid in wanted {
                match by_id.get(uuid.document_id()) {
                    None => fail(*uuid, FetchFailureKind::NotInCompendium),
                    Some(entry) => match SpellRecord::from_index(entry, pack) {
                        Ok(record) => {
                            found.insert(*uuid, record);
                        }
                        Err(kind) => fail(*uuid, kind),
                    },
                }
            }
        }

        if !loose.is_empty() {
            let raw: Vec<String> = loose.iter().map(|u| u.to_string()).collect();
            let docs = self.core.lookup_documents(&raw).await;
            for (uuid, doc) in loose.iter().zip(docs) {
                match doc {
                    Ok(Some(Document::Item(item))) => match SpellRecord::from_item((*uuid).clone(), &item) {
                        Some(record) => {
                            found.insert(*uuid, record);
                        }
                        None => fail(*uuid, FetchFailureKind::NotASpell),
                    },
                    Ok(Some(Document::Page(_))) => fail(*uuid, FetchFailureKind::NotASpell),
                    Ok(None) => fail(*uuid, FetchFailureKind::DocumentNotFound),
                    Err(e) => {
                        error!(uuid = %uuid, error = %e, "document lookup failed");
                        fail(*uuid, FetchFailureKind::Unavailable);
                    }
                }
            }
        }

        for failure in &failures {
            info!(uuid = %failure.uuid, kind = ?failure.kind, "spell fetch failed");
        }
        let spells = uuids.iter().filter_map(|uuid| found.remove(uuid)).collect();
        FetchReport {
            spells,
            failures,
            from_cache: false,
        }
    }

    /// Current snapshot, built on first use or after a version change.
    pub async fn preloaded(&self) -> CoreResult<Arc<PreloadedIndex>> {
        if let Some(preload) = self.core.preload_snapshot().await {
            return Ok(preload);
        }
        self.rebuild().await
    }

    pub async fn rebuild(&self) -> CoreResult<Arc<PreloadedIndex>> {
        let lists = self.core.lists().scan_lists().await?;
        let all: IndexSet<SpellUuid> = lists.iter().flat_map(|l| l.spells.iter().cloned()).collect();
        let report = self.fetch_uncached(&all).await;
        let preload = Arc::new(PreloadedIndex {
            version: self.core.config().module_version.clone(),
            spells: report.spells.into_iter().map(|s| (s.uuid.clone(), s)).collect(),
            lists,
        });
        info!(
            lists = preload.lists.len(),
            spells = preload.spells.len(),
            failures = report.failures.len(),
            "spell index preloaded"
        );
        self.core.store_preload(preload.clone()).await;
        Ok(preload)
    }

    /// Host hook: a journal page changed in `pack`.
    pub async fn on_page_changed(&self, pack: &str, page: &JournalPage) -> Result<bool, StoreError> {
        if page.page_type != "spells" {
            return Ok(false);
        }
        let enabled = self.core.settings().indexed_compendiums().await?;
        let owned = pack == self.core.config().custom_list_pack();
        if !owned && enabled.get(pack) == Some(&false) {
            return Ok(false);
        }
        self.core.invalidate_preload().await;
        debug!(pack, page = %page.uuid, "spell index invalidated");
        Ok(true)
    }
}
