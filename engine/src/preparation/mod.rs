//! Per-class preparation: classification, validation and the save pass.

mod reconcile;
mod status;
mod validate;

use std::collections::{BTreeMap, BTreeSet};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use reconcile::{
    ChangeSet, DesiredSpell, DesiredState, KeyedWarning, LimitStatus, OverLimits, RejectedChange,
    SaveSummary, SpellChange,
};
pub use status::{classify, CantripCap, Classified, PreparationStatus};
pub use validate::{validate_spell, ChangeCheck, ChangeRequest, SpellRuleContext};

use crate::cantrips::{prepared_cantrips, validate_cantrip, SwapContext};
use crate::context::Core;
use crate::error::{ChangeWarning, CoreError, CoreResult};
use crate::ids::{ActorId, ClassId, ClassSpellKey, SpellUuid};
use crate::index::SpellRecord;
use crate::model::{Actor, PreparationMethod, SpellSet};
use crate::rules::{is_pact_class, is_wizard_like, spell_name, ClassRules, EnforcementBehavior, RitualCasting};
use crate::store::{ItemUpdate, SpellPatch};
use reconcile::{count_keys, ItemPlan, ReconcileCtx, Reconciler};

/// One row of a class view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellEntry {
    pub uuid: SpellUuid,
    pub name: String,
    pub level: u8,
    pub school: String,
    pub is_ritual: bool,
    pub status: PreparationStatus,
    pub in_spellbook: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassLimits {
    pub max_spell_level: u8,
    pub cantrips: LimitStatus,
    pub spells: LimitStatus,
}

/// Everything a spell-book tab for one class needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparationView {
    pub class: ClassId,
    pub rules: ClassRules,
    pub enforcement: EnforcementBehavior,
    pub context: SwapContext,
    pub limits: ClassLimits,
    pub read_only: bool,
    pub spells: Vec<SpellEntry>,
}

/// States the engine never rewrites.
fn immutable(status: &PreparationStatus) -> bool {
    match status {
        PreparationStatus::Always { .. } | PreparationStatus::Granted { .. } => true,
        PreparationStatus::Special { mode } => mode.is_immutable(),
        _ => false,
    }
}

pub struct PreparationEngine<'a> {
    core: &'a Core,
}

impl<'a> PreparationEngine<'a> {
    pub(crate) fn new(core: &'a Core) -> Self {
        Self { core }
    }

    fn require_class(actor: &Actor, class: &ClassId) -> CoreResult<()> {
        match actor.class(class) {
            Some(_) => Ok(()),
            None => Err(CoreError::UnknownClass {
                actor: actor.id.clone(),
                class: class.clone(),
            }),
        }
    }

    fn default_method(actor: &Actor, class: &ClassId) -> PreparationMethod {
        match actor.class(class) {
            Some(entry) if is_pact_class(&entry.progression()) => PreparationMethod::Pact,
            _ => PreparationMethod::Spell,
        }
    }

    async fn spellbook(&self, actor: &Actor, class: &ClassId, rules: &ClassRules) -> CoreResult<Option<SpellSet>> {
        if !is_wizard_like(class, rules) {
            return Ok(None);
        }
        Ok(Some(self.core.wizard().personal_spellbook(actor, class).await?))
    }

    async fn cantrip_cap(&self, actor: &Actor, class: &ClassId, enforcement: EnforcementBehavior) -> CoreResult<Option<CantripCap>> {
        if enforcement != EnforcementBehavior::Strict {
            return Ok(None);
        }
        let prepared = self.core.prepared().get_prepared_by_class(&actor.id).await?;
        Ok(Some(CantripCap {
            current: prepared_cantrips(actor, class, &prepared).len() as u32,
            max: self.core.progression().max_cantrips(actor, class).await?,
        }))
    }

    pub async fn status(&self, actor_id: &ActorId, class: &ClassId, uuid: &SpellUuid) -> CoreResult<PreparationStatus> {
        let actor = self.core.actor(actor_id).await?;
        let level = match actor.copies_of(uuid).next() {
            Some((_, spell)) => spell.level,
            None => self.spell_record(uuid).await.map(|r| r.level).unwrap_or(1),
        };
        let prepared = self.core.prepared().get_prepared_by_class(actor_id).await?;
        let enforcement = self.core.rules().enforcement(actor_id).await?;
        let cap = self.cantrip_cap(&actor, class, enforcement).await?;
        Ok(classify(&actor, class, uuid, level, &prepared, cap).status)
    }

    async fn spell_record(&self, uuid: &SpellUuid) -> Option<SpellRecord> {
        let wanted: IndexSet<SpellUuid> = [uuid.clone()].into();
        self.core.spell_index().fetch(&wanted, u8::MAX).await.into_iter().next()
    }

    /// Read-only check of one toggle.
    pub async fn can_change(&self, actor_id: &ActorId, class: &ClassId, req: &ChangeRequest) -> CoreResult<ChangeCheck> {
        let actor = self.core.actor(actor_id).await?;
        Self::require_class(&actor, class)?;
        if req.level == 0 {
            return self
                .core
                .cantrips()
                .can_change(&actor, class, &req.uuid, req.is_checked, req.was_prepared)
                .await;
        }
        let prepared = self.core.prepared().get_prepared_by_class(actor_id).await?;
        let status = classify(&actor, class, &req.uuid, req.level, &prepared, None).status;
        if immutable(&status) {
            return Ok(ChangeCheck::allow_with(ChangeWarning::NoChange));
        }

        let rules = self.core.rules().get_class_rules(actor_id, class).await?;
        let spellbook = self.spellbook(&actor, class, &rules).await?;
        let class_list = self.core.lists().resolve_with_rules(&actor, class, &rules).await?;
        let ctx = SpellRuleContext {
            class,
            rules: &rules,
            enforcement: self.core.rules().enforcement(actor_id).await?,
            context: self.core.cantrips().swap_context(&actor, class).await?,
            max_level: self.core.progression().max_spell_level(&actor, class).await?,
            max_prepared: self.core.progression().max_prepared(&actor, class).await?,
            class_list: &class_list,
            spellbook: spellbook.as_ref(),
            prepared: &prepared,
        };
        let (_, current) = count_keys(&actor, &DesiredState::new(), prepared.get(class).unwrap_or(&BTreeSet::new()));
        Ok(validate_spell(&ctx, req, current))
    }

    /// Validates `desired`, reconciles the actor's items and persists the class's set.
    ///
    /// Keys of the class absent from `desired` are left as they are. The stored set,
    /// not the submitted `was_prepared`, decides whether an entry is an addition.
    pub async fn save(&self, actor_id: &ActorId, class: &ClassId, desired: &DesiredState) -> CoreResult<SaveSummary> {
        let actor = self.core.actor(actor_id).await?;
        self.core.require_write(&actor)?;
        Self::require_class(&actor, class)?;

        let registry = self.core.rules();
        let rules = registry.get_class_rules(actor_id, class).await?;
        let enforcement = registry.enforcement(actor_id).await?;
        let cantrips = self.core.cantrips();
        let context = cantrips.swap_context(&actor, class).await?;
        let progression = self.core.progression();
        let max_level = progression.max_spell_level(&actor, class).await?;
        let max_prepared = progression.max_prepared(&actor, class).await?;
        let class_list = self.core.lists().resolve_with_rules(&actor, class, &rules).await?;
        let spellbook = self.spellbook(&actor, class, &rules).await?;
        let prepared = self.core.prepared().get_prepared_by_class(actor_id).await?;

        let mut cantrip_state = cantrips.state(&actor, class, context).await?;
        let original_cantrips = prepared_cantrips(&actor, class, &prepared);
        let mut tracking = cantrips.window(actor_id, class, context).await?;
        let tracking_before = tracking.clone();

        let current_keys = prepared.get(class).cloned().unwrap_or_default();
        let mut next_keys = current_keys.clone();

        let mut summary = SaveSummary {
            class: class.clone(),
            cantrip_changes: ChangeSet::default(),
            spell_changes: ChangeSet::default(),
            over_limits: OverLimits::default(),
            rejected: Vec::new(),
            warnings: Vec::new(),
        };

        let spell_ctx = SpellRuleContext {
            class,
            rules: &rules,
            enforcement,
            context,
            max_level,
            max_prepared,
            class_list: &class_list,
            spellbook: spellbook.as_ref(),
            prepared: &prepared,
        };

        let mut removals = Vec::new();
        let mut additions = Vec::new();
        let mut kept = Vec::new();
        for (key, entry) in desired {
            if &key.class != class {
                warn!(actor = %actor_id, %class, key = %key, "ignoring key of another class");
                continue;
            }
            let status = classify(&actor, class, &key.spell, entry.level, &prepared, None).status;
            if immutable(&status) {
                debug!(actor = %actor_id, key = %key, ?status, "immutable spell left alone");
                continue;
            }
            match (entry.is_prepared, current_keys.contains(key)) {
                (false, true) => removals.push((key, entry)),
                (true, false) => additions.push((key, entry)),
                (true, true) => kept.push((key, entry)),
                (false, false) => {}
            }
        }

        let (mut cantrip_count, mut spell_count) = count_keys(&actor, desired, &next_keys);
        let mut accept = |key: &ClassSpellKey, entry: &DesiredSpell, is_checked: bool, summary: &mut SaveSummary| {
            let check = if entry.level == 0 {
                cantrip_state.current = cantrip_count;
                validate_cantrip(
                    &cantrip_state,
                    &mut tracking,
                    &original_cantrips,
                    &key.spell,
                    is_checked,
                    !is_checked,
                )
            } else {
                let req = ChangeRequest {
                    uuid: key.spell.clone(),
                    level: entry.level,
                    is_checked,
                    was_prepared: !is_checked,
                };
                validate_spell(&spell_ctx, &req, spell_count)
            };
            if let Some(warning) = check.warning.clone() {
                summary.warnings.push(KeyedWarning {
                    key: key.clone(),
                    warning,
                });
            }
            match (check.allowed, check.reason) {
                (true, _) => {
                    let delta: i64 = if is_checked { 1 } else { -1 };
                    let counter = if entry.level == 0 { &mut cantrip_count } else { &mut spell_count };
                    *counter = (i64::from(*counter) + delta).max(0) as u32;
                    true
                }
                (false, reason) => {
                    if let Some(reason) = reason {
                        debug!(key = %key, ?reason, "change rejected");
                        summary.rejected.push(RejectedChange {
                            key: key.clone(),
                            reason,
                        });
                    }
                    false
                }
            }
        };

        let mut accepted_removals = Vec::new();
        for (key, entry) in removals {
            if accept(key, entry, false, &mut summary) {
                accepted_removals.push((key, entry));
            }
        }
        let mut accepted_additions = Vec::new();
        for (key, entry) in additions {
            if accept(key, entry, true, &mut summary) {
                accepted_additions.push((key, entry));
            }
        }

        let reconciler = Reconciler::new(self.core);
        let ctx = ReconcileCtx {
            actor: &actor,
            class,
            ritual: rules.ritual_casting,
            default_method: Self::default_method(&actor, class),
        };
        let mut plan = ItemPlan::default();

        for (key, entry) in &accepted_removals {
            reconciler.remove_spell_from_actor(&ctx, &mut plan, &key.spell, entry.level, entry.is_ritual);
            next_keys.remove(*key);
            let change = SpellChange {
                uuid: key.spell.clone(),
                name: display_name(&actor, &key.spell, entry),
            };
            if entry.level == 0 {
                summary.cantrip_changes.removed.push(change);
            } else {
                summary.spell_changes.removed.push(change);
            }
        }
        for (key, entry) in kept.iter().chain(accepted_additions.iter()) {
            let method = ctx.method_for(entry.level, entry.preparation_mode);
            if let Err(reason) = reconciler.ensure_spell_on_actor(&ctx, &mut plan, &key.spell, method).await? {
                summary.rejected.push(RejectedChange {
                    key: (*key).clone(),
                    reason,
                });
                continue;
            }
            if current_keys.contains(*key) {
                continue;
            }
            next_keys.insert((*key).clone());
            let change = SpellChange {
                uuid: key.spell.clone(),
                name: display_name(&actor, &key.spell, entry),
            };
            if entry.level == 0 {
                summary.cantrip_changes.added.push(change);
            } else {
                summary.spell_changes.added.push(change);
            }
        }

        if rules.ritual_casting == RitualCasting::Always {
            for (key, entry) in desired {
                if &key.class == class && entry.is_ritual && entry.level > 0 {
                    reconciler.ensure_ritual_copy(&ctx, &mut plan, &key.spell).await?;
                }
            }
        } else {
            reconciler.sweep_ritual_copies(&ctx, &mut plan);
        }

        if !plan.is_empty() {
            reconciler.apply(actor_id, plan).await?;
        }
        self.core
            .prepared()
            .set_class_prepared(actor_id, class, next_keys.clone())
            .await?;
        if tracking != tracking_before {
            if let Some(window) = &tracking {
                cantrips.store_window(actor_id, class, context, Some(window)).await?;
            }
        }

        let mut all_prepared = prepared;
        all_prepared.insert(class.clone(), next_keys.clone());
        let keep: BTreeSet<SpellUuid> = all_prepared.values().flatten().map(|k| k.spell.clone()).collect();
        reconciler.auto_delete_unprepared(actor_id, &keep).await?;
        self.core.invalidate_actor(actor_id).await;

        let (cantrips_now, spells_now) = count_keys(&actor, desired, &next_keys);
        summary.over_limits = OverLimits {
            cantrips: LimitStatus::new(cantrips_now, cantrip_state.max),
            spells: LimitStatus::new(spells_now, max_prepared),
        };
        info!(
            actor = %actor_id,
            %class,
            added = summary.spell_changes.added.len() + summary.cantrip_changes.added.len(),
            removed = summary.spell_changes.removed.len() + summary.cantrip_changes.removed.len(),
            rejected = summary.rejected.len(),
            "preparation saved"
        );

        if let Err(e) = crate::notify::ChangeNotifier::new(self.core)
            .notify(&actor, enforcement, std::slice::from_ref(&summary))
            .await
        {
            warn!(actor = %actor_id, %class, error = %e, "change notification failed");
        }
        Ok(summary)
    }

    /// Convenience over [`Self::save`] with plain UUID lists.
    pub async fn prepare(
        &self,
        actor_id: &ActorId,
        class: &ClassId,
        prepare: &[SpellUuid],
        unprepare: &[SpellUuid],
    ) -> CoreResult<SaveSummary> {
        let actor = self.core.actor(actor_id).await?;
        let prepared = self.core.prepared().get_prepared_by_class(actor_id).await?;
        let current = prepared.get(class).cloned().unwrap_or_default();

        let wanted: IndexSet<SpellUuid> = prepare.iter().chain(unprepare).cloned().collect();
        let missing: IndexSet<SpellUuid> = wanted
            .iter()
            .filter(|uuid| actor.copies_of(uuid).next().is_none())
            .cloned()
            .collect();
        let records: BTreeMap<SpellUuid, SpellRecord> = if missing.is_empty() {
            BTreeMap::new()
        } else {
            self.core
                .spell_index()
                .fetch(&missing, u8::MAX)
                .await
                .into_iter()
                .map(|r| (r.uuid.clone(), r))
                .collect()
        };

        let mut desired = DesiredState::new();
        for (uuid, is_prepared) in prepare.iter().map(|u| (u, true)).chain(unprepare.iter().map(|u| (u, false))) {
            let key = ClassSpellKey::new(class.clone(), uuid.clone());
            let (level, name, is_ritual) = match actor.copies_of(uuid).next() {
                Some((item, spell)) => (spell.level, item.name.clone(), spell.is_ritual()),
                None => match records.get(uuid) {
                    Some(record) => (record.level, record.name.clone(), record.is_ritual()),
                    None => {
                        info!(uuid = %uuid, "spell not found, skipped");
                        continue;
                    }
                },
            };
            let was_prepared = current.contains(&key);
            desired.insert(
                key,
                DesiredSpell {
                    is_prepared,
                    was_prepared,
                    level,
                    preparation_mode: None,
                    name,
                    is_ritual,
                },
            );
        }
        self.save(actor_id, class, &desired).await
    }

    /// Unprepares without validation; used when a list change strands spells.
    pub async fn unprepare_spells(&self, actor_id: &ActorId, class: &ClassId, uuids: &[SpellUuid]) -> CoreResult<usize> {
        let actor = self.core.actor(actor_id).await?;
        self.core.require_write(&actor)?;
        let rules = self.core.rules().get_class_rules(actor_id, class).await?;
        let prepared = self.core.prepared().get_prepared_by_class(actor_id).await?;
        let mut keys = prepared.get(class).cloned().unwrap_or_default();

        let reconciler = Reconciler::new(self.core);
        let ctx = ReconcileCtx {
            actor: &actor,
            class,
            ritual: rules.ritual_casting,
            default_method: Self::default_method(&actor, class),
        };
        let mut plan = ItemPlan::default();
        let mut removed = 0;
        for uuid in uuids {
            let key = ClassSpellKey::new(class.clone(), uuid.clone());
            if !keys.remove(&key) {
                continue;
            }
            let (level, is_ritual) = actor
                .copies_of(uuid)
                .next()
                .map(|(_, s)| (s.level, s.is_ritual()))
                .unwrap_or((1, false));
            reconciler.remove_spell_from_actor(&ctx, &mut plan, uuid, level, is_ritual);
            removed += 1;
        }
        if removed == 0 {
            return Ok(0);
        }
        if !plan.is_empty() {
            reconciler.apply(actor_id, plan).await?;
        }
        self.core.prepared().set_class_prepared(actor_id, class, keys).await?;
        self.core.invalidate_actor(actor_id).await;
        info!(actor = %actor_id, %class, removed, "spells unprepared");
        Ok(removed)
    }

    /// Limits, rules and the status of every spell the class can see.
    pub async fn view(&self, actor_id: &ActorId, class: &ClassId) -> CoreResult<PreparationView> {
        let actor = self.core.actor(actor_id).await?;
        Self::require_class(&actor, class)?;
        let rules = self.core.rules().get_class_rules(actor_id, class).await?;
        let enforcement = self.core.rules().enforcement(actor_id).await?;
        let context = self.core.cantrips().swap_context(&actor, class).await?;
        let progression = self.core.progression();
        let max_level = progression.max_spell_level(&actor, class).await?;
        let max_prepared = progression.max_prepared(&actor, class).await?;
        let max_cantrips = progression.max_cantrips(&actor, class).await?;
        let prepared = self.core.prepared().get_prepared_by_class(actor_id).await?;
        let list = self.core.lists().resolve_with_rules(&actor, class, &rules).await?;
        let spellbook = self.spellbook(&actor, class, &rules).await?;

        let mut wanted: IndexSet<SpellUuid> = list.clone();
        if let Some(book) = &spellbook {
            wanted.extend(book.iter().cloned());
        }
        let owned: IndexMap<SpellUuid, SpellRecord> = actor
            .spell_items()
            .filter(|(_, s)| s.source_class.as_ref().is_none_or(|c| c == class))
            .filter_map(|(item, _)| {
                let uuid = item.canonical_uuid(&actor.id);
                SpellRecord::from_item(uuid.clone(), item).map(|r| (uuid, r))
            })
            .collect();
        let fetch: IndexSet<SpellUuid> = wanted.iter().filter(|u| !owned.contains_key(*u)).cloned().collect();
        let mut records: IndexMap<SpellUuid, SpellRecord> = self
            .core
            .spell_index()
            .fetch(&fetch, max_level)
            .await
            .into_iter()
            .map(|r| (r.uuid.clone(), r))
            .collect();
        records.extend(owned);
        records.sort_by(|_, a, _, b| a.level.cmp(&b.level).then_with(|| a.name.cmp(&b.name)));

        let empty = BTreeSet::new();
        let (cantrips_now, spells_now) = count_keys(&actor, &DesiredState::new(), prepared.get(class).unwrap_or(&empty));
        let cap = (enforcement == EnforcementBehavior::Strict).then_some(CantripCap {
            current: cantrips_now,
            max: max_cantrips,
        });

        let mut claims = Vec::new();
        let mut spells = Vec::with_capacity(records.len());
        for (uuid, record) in records {
            if record.level == 0 && !rules.show_cantrips {
                continue;
            }
            let classified = classify(&actor, class, &uuid, record.level, &prepared, cap);
            if let Some(id) = classified.claim {
                claims.push(id);
            }
            spells.push(SpellEntry {
                in_spellbook: spellbook.as_ref().is_some_and(|b| b.contains(&uuid)),
                is_ritual: record.is_ritual(),
                uuid,
                name: record.name,
                level: record.level,
                school: record.school,
                status: classified.status,
            });
        }

        let read_only = !self.core.can_modify(&actor);
        if !claims.is_empty() && !read_only {
            claims.dedup();
            let updates = claims
                .into_iter()
                .map(|id| ItemUpdate {
                    id,
                    patch: SpellPatch {
                        source_class: Some(class.clone()),
                        ..SpellPatch::default()
                    },
                })
                .collect::<Vec<_>>();
            debug!(actor = %actor_id, %class, claims = updates.len(), "claiming unassigned spells");
            self.core.store().update_items(actor_id, updates).await?;
        }

        Ok(PreparationView {
            class: class.clone(),
            enforcement,
            context,
            limits: ClassLimits {
                max_spell_level: max_level,
                cantrips: LimitStatus::new(cantrips_now, max_cantrips),
                spells: LimitStatus::new(spells_now, max_prepared),
            },
            read_only,
            spells,
            rules,
        })
    }
}

fn display_name(actor: &Actor, uuid: &SpellUuid, entry: &DesiredSpell) -> String {
    if entry.name.is_empty() {
        spell_name(actor, uuid)
    } else {
        entry.name.clone()
    }
}
