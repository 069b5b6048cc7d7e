//! Spellcasting models and the limits derived from them.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::Core;
use crate::error::{CoreError, CoreResult};
use crate::ids::ClassId;
use crate::model::{Ability, Actor, ClassEntry, Progression};
use crate::rules::RuleSet;

/// One row of a single-bucket (pact-style) table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PactRow {
    pub slots: u32,
    pub level: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SlotTable {
    /// Row per caster level, column per spell level.
    Leveled { rows: Vec<Vec<u32>> },
    /// All slots share one level that rises with caster level.
    Single { rows: Vec<PactRow> },
}

/// A spellcasting model: how class levels become caster levels, and the slot table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDef {
    #[serde(default = "one")]
    pub divisor: u32,
    #[serde(default)]
    pub round_up: bool,
    pub slots: SlotTable,
}

fn one() -> u32 {
    1
}

const FULL_CASTER_ROWS: [&[u32]; 20] = [
    &[2],
    &[3],
    &[4, 2],
    &[4, 3],
    &[4, 3, 2],
    &[4, 3, 3],
    &[4, 3, 3, 1],
    &[4, 3, 3, 2],
    &[4, 3, 3, 3, 1],
    &[4, 3, 3, 3, 2],
    &[4, 3, 3, 3, 2, 1],
    &[4, 3, 3, 3, 2, 1],
    &[4, 3, 3, 3, 2, 1, 1],
    &[4, 3, 3, 3, 2, 1, 1],
    &[4, 3, 3, 3, 2, 1, 1, 1],
    &[4, 3, 3, 3, 2, 1, 1, 1],
    &[4, 3, 3, 3, 2, 1, 1, 1, 1],
    &[4, 3, 3, 3, 3, 1, 1, 1, 1],
    &[4, 3, 3, 3, 3, 2, 1, 1, 1],
    &[4, 3, 3, 3, 3, 2, 2, 1, 1],
];

const PACT_ROWS: [(u32, u8); 20] = [
    (1, 1),
    (2, 1),
    (2, 2),
    (2, 2),
    (2, 3),
    (2, 3),
    (2, 4),
    (2, 4),
    (2, 5),
    (2, 5),
    (3, 5),
    (3, 5),
    (3, 5),
    (3, 5),
    (3, 5),
    (3, 5),
    (4, 5),
    (4, 5),
    (4, 5),
    (4, 5),
];

impl ModelDef {
    fn leveled(divisor: u32, round_up: bool) -> Self {
        Self {
            divisor,
            round_up,
            slots: SlotTable::Leveled {
                rows: FULL_CASTER_ROWS.iter().map(|r| r.to_vec()).collect(),
            },
        }
    }

    fn pact() -> Self {
        Self {
            divisor: 1,
            round_up: false,
            slots: SlotTable::Single {
                rows: PACT_ROWS
                    .iter()
                    .map(|&(slots, level)| PactRow { slots, level })
                    .collect(),
            },
        }
    }

    /// Builtin model for a progression, `None` for `none` and unknown custom names.
    pub fn builtin(progression: &Progression, rule_set: RuleSet) -> Option<Self> {
        match progression {
            Progression::None | Progression::Custom(_) => None,
            Progression::Full => Some(Self::leveled(1, false)),
            Progression::Half => Some(Self::leveled(2, rule_set == RuleSet::Modern)),
            Progression::Artificer => Some(Self::leveled(2, true)),
            Progression::Third => Some(Self::leveled(3, false)),
            Progression::Pact => Some(Self::pact()),
        }
    }

    pub fn caster_level(&self, class_levels: u32) -> u32 {
        let divisor = self.divisor.max(1);
        if self.round_up {
            class_levels.div_ceil(divisor)
        } else {
            class_levels / divisor
        }
    }

    /// Highest spell level with a positive slot count at `class_levels`.
    pub fn max_spell_level(&self, class_levels: u32) -> u8 {
        let caster_level = self.caster_level(class_levels) as usize;
        if caster_level == 0 {
            return 0;
        }
        match &self.slots {
            SlotTable::Single { rows } => {
                let Some(row) = rows.get(caster_level.min(rows.len()).saturating_sub(1)) else {
                    return 0;
                };
                if row.slots > 0 { row.level } else { 0 }
            }
            SlotTable::Leveled { rows } => {
                let Some(row) = rows.get(caster_level.min(rows.len()).saturating_sub(1)) else {
                    return 0;
                };
                let width = rows.iter().map(Vec::len).max().unwrap_or(0);
                (1..=width)
                    .rev()
                    .find(|&lvl| row.get(lvl - 1).copied().unwrap_or(0) > 0)
                    .map_or(0, |lvl| lvl as u8)
            }
        }
    }
}

/// Default spellcasting ability when the class item does not name one.
fn default_ability(class: &ClassId) -> Ability {
    match class.as_str() {
        "wizard" | "artificer" => Ability::Int,
        "cleric" | "druid" | "ranger" => Ability::Wis,
        _ => Ability::Cha,
    }
}

pub struct ProgressionCalculator<'a> {
    core: &'a Core,
}

impl<'a> ProgressionCalculator<'a> {
    pub(crate) fn new(core: &'a Core) -> Self {
        Self { core }
    }

    fn model_for(&self, entry: &ClassEntry<'_>, rule_set: RuleSet) -> Option<ModelDef> {
        match entry.progression() {
            Progression::Custom(name) => self.core.config().custom_progressions.get(&name).cloned(),
            other => ModelDef::builtin(&other, rule_set),
        }
    }

    /// 0 for classes without a spellcasting model. Pact classes report the pact-slot level.
    pub async fn max_spell_level(&self, actor: &Actor, class: &ClassId) -> CoreResult<u8> {
        let Some(entry) = actor.class(class) else {
            return Ok(0);
        };
        let rule_set = self.core.rules().effective_rule_set(&actor.id).await?;
        Ok(self
            .model_for(&entry, rule_set)
            .map_or(0, |model| model.max_spell_level(entry.data.levels)))
    }

    /// Cantrips known: first defined configured scale value plus bonus.
    pub async fn max_cantrips(&self, actor: &Actor, class: &ClassId) -> CoreResult<u32> {
        if let Some(max) = self.core.cached_cantrip_max(&actor.id, class).await {
            return Ok(max);
        }
        let Some(entry) = actor.class(class) else {
            return Ok(0);
        };
        let rules = self.core.rules().get_class_rules(&actor.id, class).await?;
        let keys = self.core.settings().cantrip_scale_keys().await?;

        let base = keys
            .iter()
            .find_map(|key| entry.data.scale.get(key))
            .and_then(|table| table.value_at(entry.data.levels))
            .unwrap_or(0);

        let max = if base <= 0 || !rules.show_cantrips {
            0
        } else {
            (base + rules.cantrip_preparation_bonus).max(0) as u32
        };
        debug!(actor = %actor.id, %class, base, max, "cantrip maximum");
        self.core.cache_cantrip_max(&actor.id, class, max).await;
        Ok(max)
    }

    /// Leveled spells the class may keep prepared.
    pub async fn max_prepared(&self, actor: &Actor, class: &ClassId) -> CoreResult<u32> {
        let entry = actor.class(class).ok_or_else(|| CoreError::UnknownClass {
            actor: actor.id.clone(),
            class: class.clone(),
        })?;
        let rules = self.core.rules().get_class_rules(&actor.id, class).await?;
        let base = match entry.data.preparation_max {
            Some(max) => max as i32,
            None => {
                let ability = entry.data.ability.unwrap_or_else(|| default_ability(class));
                let levels = entry.data.levels;
                let caster_levels = match entry.progression() {
                    Progression::None => return Ok(0),
                    Progression::Full | Progression::Pact | Progression::Custom(_) => levels,
                    Progression::Half => levels / 2,
                    Progression::Artificer => levels.div_ceil(2),
                    Progression::Third => levels / 3,
                };
                let computed = actor.abilities.mod_of(ability) + caster_levels as i32;
                if levels >= 1 { computed.max(1) } else { computed }
            }
        };
        Ok((base + rules.spell_preparation_bonus).max(0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_caster_levels() {
        let full = ModelDef::builtin(&Progression::Full, RuleSet::Legacy).unwrap();
        assert_eq!(full.max_spell_level(1), 1);
        assert_eq!(full.max_spell_level(3), 2);
        assert_eq!(full.max_spell_level(17), 9);
        assert_eq!(full.max_spell_level(25), 9);
    }

    #[test]
    fn half_casters_round_by_rule_set() {
        let legacy = ModelDef::builtin(&Progression::Half, RuleSet::Legacy).unwrap();
        let modern = ModelDef::builtin(&Progression::Half, RuleSet::Modern).unwrap();
        assert_eq!(legacy.max_spell_level(1), 0);
        assert_eq!(modern.max_spell_level(1), 1);
        assert_eq!(legacy.max_spell_level(5), 2);

        let artificer = ModelDef::builtin(&Progression::Artificer, RuleSet::Legacy).unwrap();
        assert_eq!(artificer.max_spell_level(1), 1);
    }

    #[test]
    fn third_casters_start_at_three() {
        let third = ModelDef::builtin(&Progression::Third, RuleSet::Legacy).unwrap();
        assert_eq!(third.max_spell_level(2), 0);
        assert_eq!(third.max_spell_level(3), 1);
        assert_eq!(third.max_spell_level(7), 2);
    }

    #[test]
    fn pact_uses_slot_level() {
        let pact = ModelDef::builtin(&Progression::Pact, RuleSet::Modern).unwrap();
        assert_eq!(pact.max_spell_level(1), 1);
        assert_eq!(pact.max_spell_level(5), 3);
        assert_eq!(pact.max_spell_level(20), 5);
    }

    #[test]
    fn progression_none_has_no_model() {
        assert!(ModelDef::builtin(&Progression::None, RuleSet::Legacy).is_none());
    }

    #[test]
    fn custom_model_parses_from_yaml() {
        let yaml = "divisor: 4\nslots:\n  kind: leveled\n  rows: [[1], [2], [2, 1]]\n";
        let model: ModelDef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(model.max_spell_level(4), 1);
        assert_eq!(model.max_spell_level(12), 2);
    }
}
