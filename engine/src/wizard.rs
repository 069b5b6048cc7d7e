//! Personal spellbooks of wizard-like classes.

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::Core;
use crate::error::{CoreError, CoreResult};
use crate::ids::{ActorId, ClassId, SpellUuid};
use crate::model::{Actor, SpellSet};
use crate::rules::{is_wizard_like, ClassRules};

/// Spells learned at first level.
pub const FREE_SPELLS_AT_FIRST_LEVEL: u32 = 6;
/// Spells learned on every later level.
pub const FREE_SPELLS_PER_LEVEL: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CopySource {
    /// Learned on level-up at no cost.
    Free,
    #[default]
    Copied,
    Scroll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopiedSpell {
    pub spell_uuid: SpellUuid,
    pub date_copied: DateTime<Utc>,
    /// Gold.
    pub cost: u32,
    /// Hours.
    pub time_spent: u32,
    #[serde(default)]
    pub source: CopySource,
}

/// Result of copying from a scroll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LearnOutcome {
    Learned(CopiedSpell),
    AlreadyKnown,
    AboveMaxLevel { level: u8, max: u8 },
    Unavailable,
}

/// Spells a wizard of `levels` learns without copying.
pub fn free_spell_allowance(levels: u32) -> u32 {
    match levels {
        0 => 0,
        n => FREE_SPELLS_AT_FIRST_LEVEL + FREE_SPELLS_PER_LEVEL * (n - 1),
    }
}

/// Cost and time of copying a spell of `level`.
pub fn copy_cost(level: u8, rules: &ClassRules) -> (u32, u32) {
    let level = u32::from(level);
    (
        level * rules.spell_learning_cost_multiplier,
        level * rules.spell_learning_time_multiplier,
    )
}

pub struct WizardSpellbook<'a> {
    core: &'a Core,
}

impl<'a> WizardSpellbook<'a> {
    pub(crate) fn new(core: &'a Core) -> Self {
        Self { core }
    }

    pub async fn is_wizard_like(&self, actor: &ActorId, class: &ClassId) -> CoreResult<bool> {
        let rules = self.core.rules().get_class_rules(actor, class).await?;
        Ok(is_wizard_like(class, &rules))
    }

    pub async fn copied(&self, actor: &ActorId, class: &ClassId) -> CoreResult<Vec<CopiedSpell>> {
        Ok(self.core.flags(actor).wizard_copied_spells(class).await?)
    }

    /// Copied spells plus the class's leveled spells already on the sheet.
    pub async fn personal_spellbook(&self, actor: &Actor, class: &ClassId) -> CoreResult<SpellSet> {
        let mut book: SpellSet = self
            .copied(&actor.id, class)
            .await?
            .into_iter()
            .map(|c| c.spell_uuid)
            .collect();
        for (item, spell) in actor.spell_items() {
            if !spell.is_cantrip() && spell.source_class.as_ref() == Some(class) && !spell.is_immutable() {
                book.insert(item.canonical_uuid(&actor.id));
            }
        }
        Ok(book)
    }

    async fn record(&self, actor: &Actor, class: &ClassId, entry: CopiedSpell) -> CoreResult<CopiedSpell> {
        self.core.require_write(actor)?;
        let flags = self.core.flags(&actor.id);
        let mut copied = flags.wizard_copied_spells(class).await?;
        copied.retain(|c| c.spell_uuid != entry.spell_uuid);
        copied.push(entry.clone());
        flags.set_wizard_copied_spells(class, &copied).await?;
        info!(actor = %actor.id, %class, uuid = %entry.spell_uuid, source = ?entry.source, "spell added to spellbook");
        Ok(entry)
    }

    async fn spell_level(&self, uuid: &SpellUuid) -> Option<u8> {
        let wanted = IndexSet::from([uuid.clone()]);
        self.core
            .spell_index()
            .fetch(&wanted, u8::MAX)
            .await
            .into_iter()
            .next()
            .map(|spell| spell.level)
    }

    /// Copies `uuid` into the book; `Free` copies cost nothing.
    pub async fn add_spell(
        &self,
        actor_id: &ActorId,
        class: &ClassId,
        uuid: &SpellUuid,
        source: CopySource,
    ) -> CoreResult<Option<CopiedSpell>> {
        let actor = self.core.actor(actor_id).await?;
        if actor.class(class).is_none() {
            return Err(CoreError::UnknownClass {
                actor: actor_id.clone(),
                class: class.clone(),
            });
        }
        let Some(level) = self.spell_level(uuid).await else {
            return Ok(None);
        };
        let rules = self.core.rules().get_class_rules(actor_id, class).await?;
        let (cost, time_spent) = match source {
            CopySource::Free => (0, 0),
            CopySource::Copied | CopySource::Scroll => copy_cost(level, &rules),
        };
        let entry = CopiedSpell {
            spell_uuid: uuid.clone(),
            date_copied: Utc::now(),
            cost,
            time_spent,
            source,
        };
        self.record(&actor, class, entry).await.map(Some)
    }

    pub async fn remove_spell(&self, actor_id: &ActorId, class: &ClassId, uuid: &SpellUuid) -> CoreResult<bool> {
        let actor = self.core.actor(actor_id).await?;
        self.core.require_write(&actor)?;
        let flags = self.core.flags(actor_id);
        let mut copied = flags.wizard_copied_spells(class).await?;
        let before = copied.len();
        copied.retain(|c| &c.spell_uuid != uuid);
        if copied.len() == before {
            return Ok(false);
        }
        flags.set_wizard_copied_spells(class, &copied).await?;
        Ok(true)
    }

    /// Spellbook entries that are not on the class list.
    pub async fn scroll_learned(&self, actor: &Actor, class: &ClassId) -> CoreResult<Vec<SpellUuid>> {
        let book = self.personal_spellbook(actor, class).await?;
        let list = self.core.lists().resolve(actor, class).await?;
        Ok(book.into_iter().filter(|uuid| !list.contains(uuid)).collect())
    }

    pub async fn learn_from_scroll(
        &self,
        actor_id: &ActorId,
        class: &ClassId,
        uuid: &SpellUuid,
    ) -> CoreResult<LearnOutcome> {
        let actor = self.core.actor(actor_id).await?;
        if self.personal_spellbook(&actor, class).await?.contains(uuid) {
            return Ok(LearnOutcome::AlreadyKnown);
        }
        let Some(level) = self.spell_level(uuid).await else {
            return Ok(LearnOutcome::Unavailable);
        };
        let max = self.core.progression().max_spell_level(&actor, class).await?;
        if level > max {
            return Ok(LearnOutcome::AboveMaxLevel { level, max });
        }
        let rules = self.core.rules().get_class_rules(actor_id, class).await?;
        let (cost, time_spent) = copy_cost(level, &rules);
        let entry = CopiedSpell {
            spell_uuid: uuid.clone(),
            date_copied: Utc::now(),
            cost,
            time_spent,
            source: CopySource::Scroll,
        };
        self.record(&actor, class, entry).await.map(LearnOutcome::Learned)
    }

    pub async fn free_spells_remaining(&self, actor: &Actor, class: &ClassId) -> CoreResult<u32> {
        let Some(entry) = actor.class(class) else {
            return Ok(0);
        };
        let used = self
            .copied(&actor.id, class)
            .await?
            .iter()
            .filter(|c| c.source == CopySource::Free)
            .count() as u32;
        Ok(free_spell_allowance(entry.data.levels).saturating_sub(used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{defaults, RuleSet};

    #[test]
    fn allowance_grows_two_per_level() {
        assert_eq!(free_spell_allowance(0), 0);
        assert_eq!(free_spell_allowance(1), 6);
        assert_eq!(free_spell_allowance(5), 14);
    }

    #[test]
    fn copy_cost_scales_with_level() {
        let rules = defaults(&ClassId::new("wizard"), RuleSet::Legacy);
        assert_eq!(copy_cost(3, &rules), (150, 6));
        assert_eq!(copy_cost(0, &rules), (0, 0));
    }
}
