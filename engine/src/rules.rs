//! Rule sets and per-class preparation rules.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::context::Core;
use crate::error::{CoreError, CoreResult};
use crate::ids::{ActorId, ClassId, ListUuid, SpellUuid};
use crate::model::Actor;
use crate::store::ConfirmDialog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSet {
    #[default]
    Legacy,
    Modern,
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSet::Legacy => f.write_str("legacy"),
            RuleSet::Modern => f.write_str("modern"),
        }
    }
}

impl std::str::FromStr for RuleSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" | "2014" => Ok(RuleSet::Legacy),
            "modern" | "2024" => Ok(RuleSet::Modern),
            other => Err(format!("unknown rule set {other:?}")),
        }
    }
}

/// When a class may replace spells or cantrips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SwapMode {
    None,
    LevelUp,
    LongRest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RitualCasting {
    None,
    /// Only prepared ritual spells may be cast as rituals.
    Prepared,
    /// Any ritual on the class list may be cast as a ritual.
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnforcementBehavior {
    Strict,
    #[default]
    NotifyGm,
    Unenforced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRules {
    pub cantrip_swapping: SwapMode,
    pub spell_swapping: SwapMode,
    pub ritual_casting: RitualCasting,
    pub show_cantrips: bool,
    pub custom_spell_list: Vec<ListUuid>,
    pub spell_preparation_bonus: i32,
    pub cantrip_preparation_bonus: i32,
    pub force_wizard_mode: bool,
    /// Gold per spell level to copy a spell into a spellbook.
    pub spell_learning_cost_multiplier: u32,
    /// Hours per spell level to copy a spell into a spellbook.
    pub spell_learning_time_multiplier: u32,
}

/// Persisted form: only the fields that have been set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRulesPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cantrip_swapping: Option<SwapMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spell_swapping: Option<SwapMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ritual_casting: Option<RitualCasting>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_cantrips: Option<bool>,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_spell_list: Option<Vec<ListUuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spell_preparation_bonus: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cantrip_preparation_bonus: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_wizard_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spell_learning_cost_multiplier: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spell_learning_time_multiplier: Option<u32>,
}

/// `customSpellList` was historically a single UUID; accept both shapes.
fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<ListUuid>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(ListUuid),
        Many(Vec<ListUuid>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => None,
        Some(OneOrMany::One(uuid)) if uuid.as_str().is_empty() => Some(Vec::new()),
        Some(OneOrMany::One(uuid)) => Some(vec![uuid]),
        Some(OneOrMany::Many(list)) => Some(list),
    })
}

impl ClassRulesPatch {
    /// Persisted values over `defaults`.
    pub fn apply_over(&self, defaults: &ClassRules) -> ClassRules {
        ClassRules {
            cantrip_swapping: self.cantrip_swapping.unwrap_or(defaults.cantrip_swapping),
            spell_swapping: self.spell_swapping.unwrap_or(defaults.spell_swapping),
            ritual_casting: self.ritual_casting.unwrap_or(defaults.ritual_casting),
            show_cantrips: self.show_cantrips.unwrap_or(defaults.show_cantrips),
            custom_spell_list: self
                .custom_spell_list
                .clone()
                .unwrap_or_else(|| defaults.custom_spell_list.clone()),
            spell_preparation_bonus: self
                .spell_preparation_bonus
                .unwrap_or(defaults.spell_preparation_bonus),
            cantrip_preparation_bonus: self
                .cantrip_preparation_bonus
                .unwrap_or(defaults.cantrip_preparation_bonus),
            force_wizard_mode: self.force_wizard_mode.unwrap_or(defaults.force_wizard_mode),
            spell_learning_cost_multiplier: self
                .spell_learning_cost_multiplier
                .unwrap_or(defaults.spell_learning_cost_multiplier),
            spell_learning_time_multiplier: self
                .spell_learning_time_multiplier
                .unwrap_or(defaults.spell_learning_time_multiplier),
        }
    }

    /// Later patch wins field by field.
    pub fn merged_with(&self, later: &ClassRulesPatch) -> ClassRulesPatch {
        ClassRulesPatch {
            cantrip_swapping: later.cantrip_swapping.or(self.cantrip_swapping),
            spell_swapping: later.spell_swapping.or(self.spell_swapping),
            ritual_casting: later.ritual_casting.or(self.ritual_casting),
            show_cantrips: later.show_cantrips.or(self.show_cantrips),
            custom_spell_list: later
                .custom_spell_list
                .clone()
                .or_else(|| self.custom_spell_list.clone()),
            spell_preparation_bonus: later.spell_preparation_bonus.or(self.spell_preparation_bonus),
            cantrip_preparation_bonus: later
                .cantrip_preparation_bonus
                .or(self.cantrip_preparation_bonus),
            force_wizard_mode: later.force_wizard_mode.or(self.force_wizard_mode),
            spell_learning_cost_multiplier: later
                .spell_learning_cost_multiplier
                .or(self.spell_learning_cost_multiplier),
            spell_learning_time_multiplier: later
                .spell_learning_time_multiplier
                .or(self.spell_learning_time_multiplier),
        }
    }
}

impl From<&ClassRules> for ClassRulesPatch {
    fn from(rules: &ClassRules) -> Self {
        ClassRulesPatch {
            cantrip_swapping: Some(rules.cantrip_swapping),
            spell_swapping: Some(rules.spell_swapping),
            ritual_casting: Some(rules.ritual_casting),
            show_cantrips: Some(rules.show_cantrips),
            custom_spell_list: Some(rules.custom_spell_list.clone()),
            spell_preparation_bonus: Some(rules.spell_preparation_bonus),
            cantrip_preparation_bonus: Some(rules.cantrip_preparation_bonus),
            force_wizard_mode: Some(rules.force_wizard_mode),
            spell_learning_cost_multiplier: Some(rules.spell_learning_cost_multiplier),
            spell_learning_time_multiplier: Some(rules.spell_learning_time_multiplier),
        }
    }
}

/// Static defaults per class identifier and rule set.
pub fn defaults(class: &ClassId, rule_set: RuleSet) -> ClassRules {
    use RitualCasting as R;
    use RuleSet::{Legacy, Modern};
    use SwapMode as S;

    let (cantrip, spell, ritual, show) = match (class.as_str(), rule_set) {
        ("wizard", Legacy) => (S::None, S::LongRest, R::Always, true),
        ("wizard", Modern) => (S::LongRest, S::LongRest, R::Always, true),
        ("cleric" | "druid", Legacy) => (S::None, S::LongRest, R::Prepared, true),
        ("cleric" | "druid", Modern) => (S::None, S::LongRest, R::None, true),
        ("paladin", _) => (S::None, S::LongRest, R::None, false),
        ("ranger", Legacy) => (S::None, S::LevelUp, R::None, false),
        ("ranger", Modern) => (S::None, S::LongRest, R::None, false),
        ("bard", Legacy) => (S::None, S::LevelUp, R::Prepared, true),
        ("bard", Modern) => (S::LevelUp, S::LevelUp, R::None, true),
        ("sorcerer" | "warlock", Legacy) => (S::None, S::LevelUp, R::None, true),
        ("sorcerer" | "warlock", Modern) => (S::LevelUp, S::LevelUp, R::None, true),
        ("artificer", Legacy) => (S::None, S::LongRest, R::None, true),
        ("artificer", Modern) => (S::LevelUp, S::LongRest, R::None, true),
        (_, Legacy) => (S::None, S::LevelUp, R::None, true),
        (_, Modern) => (S::LevelUp, S::LevelUp, R::None, true),
    };

    ClassRules {
        cantrip_swapping: cantrip,
        spell_swapping: spell,
        ritual_casting: ritual,
        show_cantrips: show,
        custom_spell_list: Vec::new(),
        spell_preparation_bonus: 0,
        cantrip_preparation_bonus: 0,
        force_wizard_mode: false,
        spell_learning_cost_multiplier: 50,
        spell_learning_time_multiplier: 2,
    }
}

/// Wizard-like classes keep a personal spellbook.
pub fn is_wizard_like(class: &ClassId, rules: &ClassRules) -> bool {
    class.as_str() == "wizard" || rules.force_wizard_mode
}

/// Classes whose leveled spells are cast from pact slots.
pub fn is_pact_class(progression: &crate::model::Progression) -> bool {
    matches!(progression, crate::model::Progression::Pact)
}

fn same_list_selection(a: &[ListUuid], b: &[ListUuid]) -> bool {
    let a: IndexSet<&ListUuid> = a.iter().collect();
    let b: IndexSet<&ListUuid> = b.iter().collect();
    a.len() == b.len() && a.iter().all(|x| b.contains(x))
}

pub struct RuleSetRegistry<'a> {
    core: &'a Core,
}

impl<'a> RuleSetRegistry<'a> {
    pub(crate) fn new(core: &'a Core) -> Self {
        Self { core }
    }

    /// Actor override beats the world setting.
    pub async fn effective_rule_set(&self, actor: &ActorId) -> CoreResult<RuleSet> {
        if let Some(rule_set) = self.core.flags(actor).rule_set_override().await? {
            return Ok(rule_set);
        }
        Ok(self.core.settings().rule_set().await?)
    }

    pub async fn enforcement(&self, actor: &ActorId) -> CoreResult<EnforcementBehavior> {
        if let Some(behavior) = self.core.flags(actor).enforcement_behavior().await? {
            return Ok(behavior);
        }
        Ok(self.core.settings().default_enforcement().await?)
    }

    pub async fn set_enforcement(
        &self,
        actor: &ActorId,
        behavior: Option<EnforcementBehavior>,
    ) -> CoreResult<()> {
        self.core.flags(actor).set_enforcement_behavior(behavior).await?;
        Ok(())
    }

    pub async fn get_class_rules(&self, actor: &ActorId, class: &ClassId) -> CoreResult<ClassRules> {
        if let Some(rules) = self.core.cached_rules(actor, class).await {
            return Ok(rules);
        }
        let rule_set = self.effective_rule_set(actor).await?;
        let stored = self.core.flags(actor).class_rules().await?;
        let base = defaults(class, rule_set);
        let rules = match stored.get(class) {
            Some(patch) => patch.apply_over(&base),
            None => base,
        };
        self.core.cache_rules(actor, class, rules.clone()).await;
        Ok(rules)
    }

    /// Fills missing fields for every spellcasting class and records the actor override.
    pub async fn apply_rule_set_to_actor(&self, actor_id: &ActorId, rule_set: RuleSet) -> CoreResult<()> {
        let actor = self.core.actor(actor_id).await?;
        self.core.require_write(&actor)?;
        let flags = self.core.flags(actor_id);
        flags.set_rule_set_override(Some(rule_set)).await?;

        let mut stored = flags.class_rules().await?;
        for class in actor.spellcasting_classes() {
            let fresh = ClassRulesPatch::from(&defaults(class.id(), rule_set));
            let next = match stored.get(class.id()) {
                // Rule-set driven fields follow the new rule set; customizations stay.
                Some(existing) => {
                    let customizations = ClassRulesPatch {
                        custom_spell_list: existing.custom_spell_list.clone(),
                        spell_preparation_bonus: existing.spell_preparation_bonus,
                        cantrip_preparation_bonus: existing.cantrip_preparation_bonus,
                        force_wizard_mode: existing.force_wizard_mode,
                        spell_learning_cost_multiplier: existing.spell_learning_cost_multiplier,
                        spell_learning_time_multiplier: existing.spell_learning_time_multiplier,
                        ..ClassRulesPatch::default()
                    };
                    fresh.merged_with(&customizations)
                }
                None => fresh,
            };
            stored.insert(class.id().clone(), next);
        }
        flags.set_class_rules(&stored).await?;
        self.core.invalidate_actor(actor_id).await;
        info!(actor = %actor_id, %rule_set, "applied rule set");
        Ok(())
    }

    /// Adds default rules for spellcasting classes that have none yet.
    pub async fn initialize_new_classes(&self, actor_id: &ActorId) -> CoreResult<Vec<ClassId>> {
        let actor = self.core.actor(actor_id).await?;
        let flags = self.core.flags(actor_id);
        let mut stored = flags.class_rules().await?;
        let rule_set = self.effective_rule_set(actor_id).await?;

        let added: Vec<ClassId> = actor
            .spellcasting_classes()
            .map(|c| c.id().clone())
            .filter(|id| !stored.contains_key(id))
            .collect();
        if added.is_empty() {
            return Ok(added);
        }
        if !self.core.can_modify(&actor) {
            debug!(actor = %actor_id, "read-only actor, class rules not initialized");
            return Ok(Vec::new());
        }
        for class in &added {
            stored.insert(class.clone(), ClassRulesPatch::from(&defaults(class, rule_set)));
        }
        flags.set_class_rules(&stored).await?;
        self.core.invalidate_actor(actor_id).await;
        info!(actor = %actor_id, classes = ?added, "initialized class rules");
        Ok(added)
    }

    /// Persists `patch`; a spell-list change that strands prepared spells asks first.
    ///
    /// Returns `false` when the user declined the confirmation.
    pub async fn update_class_rules(
        &self,
        actor_id: &ActorId,
        class: &ClassId,
        patch: ClassRulesPatch,
    ) -> CoreResult<bool> {
        let actor = self.core.actor(actor_id).await?;
        self.core.require_write(&actor)?;
        if actor.class(class).is_none() {
            return Err(CoreError::UnknownClass {
                actor: actor_id.clone(),
                class: class.clone(),
            });
        }
        let current = self.get_class_rules(actor_id, class).await?;

        let mut affected = Vec::new();
        if let Some(new_list) = &patch.custom_spell_list {
            if !same_list_selection(new_list, &current.custom_spell_list) {
                let mut proposed = current.clone();
                proposed.custom_spell_list = new_list.clone();
                affected = self.stranded_spells(&actor, class, &proposed).await?;
            }
        }

        if !affected.is_empty() {
            let names = affected
                .iter()
                .map(|uuid| spell_name(&actor, uuid))
                .collect::<Vec<_>>();
            let dialog = ConfirmDialog {
                title: "Spell list change".to_string(),
                content: format!(
                    "The new spell list no longer contains {} prepared spell(s) for {}: {}. Unprepare them?",
                    names.len(),
                    class,
                    names.join(", ")
                ),
                confirm_label: "Unprepare".to_string(),
                cancel_label: "Cancel".to_string(),
            };
            if !self.core.host().confirm(dialog).await? {
                info!(actor = %actor_id, %class, "spell list change cancelled");
                return Ok(false);
            }
        }

        let flags = self.core.flags(actor_id);
        let mut stored = flags.class_rules().await?;
        let next = stored.get(class).cloned().unwrap_or_default().merged_with(&patch);
        stored.insert(class.clone(), next);
        flags.set_class_rules(&stored).await?;
        self.core.invalidate_actor(actor_id).await;

        if !affected.is_empty() {
            self.core
                .preparation()
                .unprepare_spells(actor_id, class, &affected)
                .await?;
        }
        Ok(true)
    }

    /// Prepared spells of `class` that the list selected by `rules` would not contain.
    async fn stranded_spells(
        &self,
        actor: &Actor,
        class: &ClassId,
        rules: &ClassRules,
    ) -> CoreResult<Vec<SpellUuid>> {
        let list = self.core.lists().resolve_with_rules(actor, class, rules).await?;
        if list.is_empty() {
            return Ok(Vec::new());
        }
        let prepared = self.core.prepared().get_prepared_by_class(&actor.id).await?;
        Ok(prepared
            .get(class)
            .into_iter()
            .flatten()
            .map(|key| key.spell.clone())
            .filter(|uuid| !list.contains(uuid))
            .collect())
    }

    /// Effective rules for every spellcasting class on the actor.
    pub async fn all_class_rules(&self, actor: &Actor) -> CoreResult<IndexMap<ClassId, ClassRules>> {
        let mut out = IndexMap::new();
        for class in actor.spellcasting_classes() {
            let rules = self.get_class_rules(&actor.id, class.id()).await?;
            out.insert(class.id().clone(), rules);
        }
        Ok(out)
    }
}

pub(crate) fn spell_name(actor: &Actor, uuid: &SpellUuid) -> String {
    actor
        .copies_of(uuid)
        .next()
        .map(|(item, _)| item.name.clone())
        .unwrap_or_else(|| uuid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_table_rows() {
        let wizard = defaults(&ClassId::new("wizard"), RuleSet::Modern);
        assert_eq!(wizard.cantrip_swapping, SwapMode::LongRest);
        assert_eq!(wizard.ritual_casting, RitualCasting::Always);

        let paladin = defaults(&ClassId::new("paladin"), RuleSet::Legacy);
        assert!(!paladin.show_cantrips);

        let unknown = defaults(&ClassId::new("psion"), RuleSet::Modern);
        assert_eq!(unknown.cantrip_swapping, SwapMode::LevelUp);
        assert_eq!(unknown.spell_swapping, SwapMode::LevelUp);
    }

    #[test]
    fn custom_list_accepts_single_uuid() {
        let patch: ClassRulesPatch =
            serde_json::from_value(json!({"customSpellList": "Compendium.x.lists.JournalEntry.j.JournalEntryPage.p"}))
                .unwrap();
        assert_eq!(patch.custom_spell_list.map(|l| l.len()), Some(1));

        let patch: ClassRulesPatch = serde_json::from_value(json!({"customSpellList": ""})).unwrap();
        assert_eq!(patch.custom_spell_list, Some(vec![]));
    }

    #[test]
    fn patch_merge_prefers_later_values() {
        let a = ClassRulesPatch {
            spell_preparation_bonus: Some(1),
            show_cantrips: Some(false),
            ..Default::default()
        };
        let b = ClassRulesPatch {
            spell_preparation_bonus: Some(3),
            ..Default::default()
        };
        let merged = a.merged_with(&b);
        assert_eq!(merged.spell_preparation_bonus, Some(3));
        assert_eq!(merged.show_cantrips, Some(false));
    }

    #[test]
    fn list_selection_comparison_ignores_order() {
        let a = vec![ListUuid::new("x"), ListUuid::new("y")];
        let b = vec![ListUuid::new("y"), ListUuid::new("x")];
        assert!(same_list_selection(&a, &b));
        assert!(!same_list_selection(&a, &b[..1]));
    }
}
