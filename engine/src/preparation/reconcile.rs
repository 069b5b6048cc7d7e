//! Turning a desired per-class state into item mutations.

use std::collections::{BTreeSet, HashMap, HashSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::context::Core;
use crate::error::{ChangeWarning, CoreResult, DenyReason};
use crate::ids::{ActorId, ClassId, ClassSpellKey, ItemId, SpellUuid};
use crate::model::{Actor, Document, Item, PreparationMethod, Prepared, SpellData};
use crate::rules::RitualCasting;
use crate::store::{ItemUpdate, SpellPatch};

/// One entry of the submitted state for a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredSpell {
    pub is_prepared: bool,
    pub was_prepared: bool,
    pub level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preparation_mode: Option<PreparationMethod>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_ritual: bool,
}

pub type DesiredState = IndexMap<ClassSpellKey, DesiredSpell>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellChange {
    pub uuid: SpellUuid,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<SpellChange>,
    pub removed: Vec<SpellChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitStatus {
    pub current: u32,
    pub max: u32,
    pub is_over: bool,
}

impl LimitStatus {
    pub fn new(current: u32, max: u32) -> Self {
        Self {
            current,
            max,
            is_over: current > max,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverLimits {
    pub cantrips: LimitStatus,
    pub spells: LimitStatus,
}

impl OverLimits {
    pub fn any(&self) -> bool {
        self.cantrips.is_over || self.spells.is_over
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedChange {
    pub key: ClassSpellKey,
    pub reason: DenyReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedWarning {
    pub key: ClassSpellKey,
    pub warning: ChangeWarning,
}

/// What a save did, for the caller to notify with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSummary {
    pub class: ClassId,
    pub cantrip_changes: ChangeSet,
    pub spell_changes: ChangeSet,
    pub over_limits: OverLimits,
    pub rejected: Vec<RejectedChange>,
    pub warnings: Vec<KeyedWarning>,
}

impl SaveSummary {
    pub fn has_changes(&self) -> bool {
        !self.cantrip_changes.is_empty() || !self.spell_changes.is_empty()
    }
}

/// Batched host mutations for one save.
#[derive(Debug, Default)]
pub(crate) struct ItemPlan {
    creates: Vec<Item>,
    updates: IndexMap<ItemId, SpellPatch>,
    deletes: Vec<ItemId>,
    /// Items already claimed by an update or delete.
    touched: HashSet<ItemId>,
    /// UUIDs that have, or will have, a ritual copy for the class.
    ritual_present: HashSet<SpellUuid>,
    sources: HashMap<SpellUuid, Item>,
}

impl ItemPlan {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    fn update(&mut self, id: &ItemId, patch: SpellPatch) {
        self.touched.insert(id.clone());
        let entry = self.updates.entry(id.clone()).or_default();
        if patch.source_class.is_some() {
            entry.source_class = patch.source_class;
        }
        if patch.method.is_some() {
            entry.method = patch.method;
        }
        if patch.prepared.is_some() {
            entry.prepared = patch.prepared;
        }
    }

    fn delete(&mut self, id: &ItemId) {
        if self.touched.insert(id.clone()) || self.updates.shift_remove(id).is_some() {
            self.deletes.push(id.clone());
        }
    }
}

/// Inputs shared by every step of one reconcile.
pub(crate) struct ReconcileCtx<'a> {
    pub actor: &'a Actor,
    pub class: &'a ClassId,
    pub ritual: RitualCasting,
    pub default_method: PreparationMethod,
}

impl ReconcileCtx<'_> {
    fn own_copies<'s>(&'s self, uuid: &'s SpellUuid) -> impl Iterator<Item = (&'s Item, &'s SpellData)> + 's {
        self.actor
            .copies_of(uuid)
            .filter(move |(_, spell)| spell.source_class.as_ref() == Some(self.class))
    }

    /// Method for a prepared entry: cantrips always `spell`.
    pub fn method_for(&self, level: u8, submitted: Option<PreparationMethod>) -> PreparationMethod {
        if level == 0 {
            return PreparationMethod::Spell;
        }
        match submitted {
            Some(m @ (PreparationMethod::Spell | PreparationMethod::Pact)) => m,
            _ => self.default_method,
        }
    }
}

fn prepared_patch(class: Option<&ClassId>, method: PreparationMethod) -> SpellPatch {
    SpellPatch {
        source_class: class.cloned(),
        method: Some(method),
        prepared: Some(Prepared::Prepared),
    }
}

/// Copy of `source` owned by `class` in the given mode.
fn stamped_copy(source: &Item, uuid: &SpellUuid, class: &ClassId, method: PreparationMethod, prepared: Prepared) -> Item {
    let mut item = source.clone();
    item.id = ItemId::new("");
    if let Some(spell) = item.spell_mut() {
        spell.source_class = Some(class.clone());
        spell.method = method;
        spell.prepared = prepared;
        spell.cached_for = None;
        spell.compendium_source = Some(uuid.clone());
    }
    item
}

pub(crate) struct Reconciler<'a> {
    core: &'a Core,
}

impl<'a> Reconciler<'a> {
    pub fn new(core: &'a Core) -> Self {
        Self { core }
    }

    /// Existing copy of the spell, else the compendium document.
    async fn source_item(&self, ctx: &ReconcileCtx<'_>, plan: &mut ItemPlan, uuid: &SpellUuid) -> CoreResult<Option<Item>> {
        if let Some(item) = plan.sources.get(uuid) {
            return Ok(Some(item.clone()));
        }
        let found = match ctx.actor.copies_of(uuid).next() {
            Some((item, _)) => Some(item.clone()),
            None => match self.core.store().from_uuid(uuid.as_str()).await? {
                Some(Document::Item(item)) if item.spell().is_some() => Some(item),
                _ => None,
            },
        };
        if let Some(item) = &found {
            plan.sources.insert(uuid.clone(), item.clone());
        }
        Ok(found)
    }

    /// Guarantees a prepared copy for the class. `Err` when nothing can be created.
    pub async fn ensure_spell_on_actor(
        &self,
        ctx: &ReconcileCtx<'_>,
        plan: &mut ItemPlan,
        uuid: &SpellUuid,
        method: PreparationMethod,
    ) -> CoreResult<Result<(), DenyReason>> {
        let own: Vec<(&Item, &SpellData)> = ctx.own_copies(uuid).collect();

        if own.iter().any(|(_, s)| s.is_immutable()) {
            return Ok(Ok(()));
        }
        if let Some((item, spell)) = own.iter().find(|(_, s)| s.is_prepared_copy()) {
            if spell.method != method {
                plan.update(&item.id, prepared_patch(None, method));
            }
            return Ok(Ok(()));
        }
        if let Some((ritual_item, _)) = own.iter().find(|(_, s)| s.is_ritual_copy()) {
            if ctx.ritual == RitualCasting::Always && method == PreparationMethod::Spell {
                plan.creates
                    .push(stamped_copy(ritual_item, uuid, ctx.class, method, Prepared::Prepared));
                plan.ritual_present.insert(uuid.clone());
            } else {
                plan.update(&ritual_item.id, prepared_patch(None, method));
            }
            return Ok(Ok(()));
        }
        if let Some((item, _)) = own.iter().find(|(_, s)| s.prepared == Prepared::Unprepared) {
            plan.update(&item.id, prepared_patch(None, method));
            return Ok(Ok(()));
        }
        let unassigned = ctx
            .actor
            .copies_of(uuid)
            .find(|(item, s)| s.source_class.is_none() && !s.is_immutable() && !plan.touched.contains(&item.id));
        if let Some((item, _)) = unassigned {
            plan.update(&item.id, prepared_patch(Some(ctx.class), method));
            return Ok(Ok(()));
        }

        match self.source_item(ctx, plan, uuid).await? {
            Some(source) => {
                plan.creates
                    .push(stamped_copy(&source, uuid, ctx.class, method, Prepared::Prepared));
                Ok(Ok(()))
            }
            None => {
                info!(uuid = %uuid, "no source document to create spell from");
                Ok(Err(DenyReason::SourceUnavailable))
            }
        }
    }

    /// Deletes or demotes the class's prepared copies of `uuid`.
    pub fn remove_spell_from_actor(&self, ctx: &ReconcileCtx<'_>, plan: &mut ItemPlan, uuid: &SpellUuid, level: u8, is_ritual: bool) {
        let own: Vec<(&Item, &SpellData)> = ctx.own_copies(uuid).collect();
        if own.iter().any(|(_, s)| s.is_immutable()) {
            debug!(uuid = %uuid, "immutable copy left in place");
            return;
        }
        let keeps_ritual = is_ritual && level > 0 && ctx.ritual == RitualCasting::Always;
        if keeps_ritual && own.iter().any(|(_, s)| s.is_ritual_copy()) {
            plan.ritual_present.insert(uuid.clone());
        }
        for (item, _) in own.iter().filter(|(_, s)| s.is_prepared_copy()) {
            if keeps_ritual && !plan.ritual_present.contains(uuid) {
                plan.update(
                    &item.id,
                    SpellPatch {
                        source_class: None,
                        method: Some(PreparationMethod::Ritual),
                        prepared: Some(Prepared::Unprepared),
                    },
                );
                plan.ritual_present.insert(uuid.clone());
            } else {
                plan.delete(&item.id);
            }
        }
    }

    /// A ritual-only copy for a ritual spell of a class that casts any ritual.
    pub async fn ensure_ritual_copy(&self, ctx: &ReconcileCtx<'_>, plan: &mut ItemPlan, uuid: &SpellUuid) -> CoreResult<()> {
        if plan.ritual_present.contains(uuid) {
            return Ok(());
        }
        let existing = ctx
            .own_copies(uuid)
            .any(|(item, s)| s.is_ritual_copy() && !plan.deletes.contains(&item.id));
        if existing {
            plan.ritual_present.insert(uuid.clone());
            return Ok(());
        }
        if let Some(source) = self.source_item(ctx, plan, uuid).await? {
            plan.creates.push(stamped_copy(
                &source,
                uuid,
                ctx.class,
                PreparationMethod::Ritual,
                Prepared::Unprepared,
            ));
            plan.ritual_present.insert(uuid.clone());
        }
        Ok(())
    }

    /// Removes the class's ritual-only copies when rituals are not castable unprepared.
    pub fn sweep_ritual_copies(&self, ctx: &ReconcileCtx<'_>, plan: &mut ItemPlan) {
        if ctx.ritual == RitualCasting::Always {
            return;
        }
        let stale: Vec<ItemId> = ctx
            .actor
            .spell_items()
            .filter(|(item, s)| {
                s.source_class.as_ref() == Some(ctx.class)
                    && s.is_ritual_copy()
                    && s.cached_for.is_none()
                    && !plan.touched.contains(&item.id)
            })
            .map(|(item, _)| item.id.clone())
            .collect();
        for id in &stale {
            plan.delete(id);
        }
    }

    /// Creates, then updates, then deletes; one host call each.
    pub async fn apply(&self, actor: &ActorId, plan: ItemPlan) -> CoreResult<()> {
        let store = self.core.store();
        let (creates, updates, deletes) = (plan.creates.len(), plan.updates.len(), plan.deletes.len());
        if !plan.creates.is_empty() {
            store.create_items(actor, plan.creates).await.inspect_err(|e| {
                error!(actor = %actor, error = %e, "creating spell items failed");
            })?;
        }
        if !plan.updates.is_empty() {
            let updates = plan
                .updates
                .into_iter()
                .map(|(id, patch)| ItemUpdate { id, patch })
                .collect();
            store.update_items(actor, updates).await.inspect_err(|e| {
                error!(actor = %actor, error = %e, "updating spell items failed");
            })?;
        }
        if !plan.deletes.is_empty() {
            store.delete_items(actor, plan.deletes).await.inspect_err(|e| {
                error!(actor = %actor, error = %e, "deleting spell items failed");
            })?;
        }
        debug!(actor = %actor, creates, updates, deletes, "spell items reconciled");
        Ok(())
    }

    /// Housekeeping: unprepared `spell`-method copies nothing references.
    pub async fn auto_delete_unprepared(&self, actor_id: &ActorId, keep: &BTreeSet<SpellUuid>) -> CoreResult<usize> {
        if !self.core.settings().auto_delete_unprepared().await? {
            return Ok(0);
        }
        let actor = self.core.actor(actor_id).await?;
        let doomed: Vec<ItemId> = actor
            .spell_items()
            .filter(|(item, s)| {
                s.method == PreparationMethod::Spell
                    && s.prepared == Prepared::Unprepared
                    && s.cached_for.is_none()
                    && !keep.contains(&item.canonical_uuid(&actor.id))
            })
            .map(|(item, _)| item.id.clone())
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        let count = doomed.len();
        self.core.store().delete_items(actor_id, doomed).await?;
        info!(actor = %actor_id, count, "deleted unprepared spell items");
        Ok(count)
    }
}

/// Level of `key`'s spell from the submitted state or an owned copy.
pub(crate) fn key_level(actor: &Actor, desired: &DesiredState, key: &ClassSpellKey) -> Option<u8> {
    desired
        .get(key)
        .map(|d| d.level)
        .or_else(|| actor.copies_of(&key.spell).next().map(|(_, s)| s.level))
}

/// Cantrip and leveled counts of a key set.
pub(crate) fn count_keys(actor: &Actor, desired: &DesiredState, keys: &BTreeSet<ClassSpellKey>) -> (u32, u32) {
    keys.iter().fold((0, 0), |(cantrips, spells), key| match key_level(actor, desired, key) {
        Some(0) => (cantrips + 1, spells),
        Some(_) => (cantrips, spells + 1),
        None => {
            warn!(key = %key, "prepared key without a known level");
            (cantrips, spells + 1)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_delete_overrides_update() {
        let mut plan = ItemPlan::default();
        let id = ItemId::new("i1");
        plan.update(&id, prepared_patch(None, PreparationMethod::Spell));
        plan.delete(&id);
        assert!(plan.updates.is_empty());
        assert_eq!(plan.deletes, vec![id.clone()]);

        plan.delete(&id);
        assert_eq!(plan.deletes.len(), 1);
    }

    #[test]
    fn cantrips_always_use_spell_method() {
        let actor = Actor {
            id: ActorId::new("a"),
            name: "A".into(),
            img: None,
            token: None,
            abilities: Default::default(),
            ownership: Default::default(),
            default_ownership: Default::default(),
            items: vec![],
        };
        let class = ClassId::new("warlock");
        let ctx = ReconcileCtx {
            actor: &actor,
            class: &class,
            ritual: RitualCasting::None,
            default_method: PreparationMethod::Pact,
        };
        assert_eq!(ctx.method_for(0, Some(PreparationMethod::Pact)), PreparationMethod::Spell);
        assert_eq!(ctx.method_for(1, None), PreparationMethod::Pact);
        assert_eq!(ctx.method_for(1, Some(PreparationMethod::Innate)), PreparationMethod::Pact);
    }

    #[test]
    fn limit_status_flags_overage() {
        assert!(LimitStatus::new(5, 4).is_over);
        assert!(!LimitStatus::new(4, 4).is_over);
    }
}
