//! Persistent per-class preparation sets and the flat mirror derived from them.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::context::Core;
use crate::error::CoreResult;
use crate::ids::{ActorId, ClassId, ClassSpellKey, SpellUuid};
use crate::model::{Actor, Prepared};

pub type PreparedByClass = BTreeMap<ClassId, BTreeSet<ClassSpellKey>>;

/// Union of every class's prepared UUIDs, deduplicated.
pub fn flat_mirror(prepared: &PreparedByClass) -> Vec<SpellUuid> {
    prepared
        .values()
        .flatten()
        .map(|key| key.spell.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Class that has `uuid` prepared, other than `except`.
pub fn prepared_elsewhere<'p>(
    prepared: &'p PreparedByClass,
    uuid: &SpellUuid,
    except: &ClassId,
) -> Option<&'p ClassId> {
    prepared
        .iter()
        .filter(|(class, _)| *class != except)
        .find(|(class, keys)| keys.contains(&ClassSpellKey::new((*class).clone(), uuid.clone())))
        .map(|(class, _)| class)
}

/// Whether an owned item backs `key`.
fn key_has_item(actor: &Actor, key: &ClassSpellKey) -> bool {
    actor.copies_of(&key.spell).any(|(_, spell)| {
        let class_ok = spell.source_class.as_ref().is_none_or(|c| c == &key.class);
        class_ok && matches!(spell.prepared, Prepared::Prepared | Prepared::Always)
    })
}

pub struct PreparationStore<'a> {
    core: &'a Core,
}

impl<'a> PreparationStore<'a> {
    pub(crate) fn new(core: &'a Core) -> Self {
        Self { core }
    }

    pub async fn get_prepared_by_class(&self, actor: &ActorId) -> CoreResult<PreparedByClass> {
        Ok(self.core.flags(actor).prepared_by_class().await?)
    }

    pub async fn flat(&self, actor: &ActorId) -> CoreResult<Vec<SpellUuid>> {
        Ok(self.core.flags(actor).prepared_spells().await?)
    }

    /// Replaces one class's set, then re-derives the mirror.
    pub async fn set_class_prepared(
        &self,
        actor: &ActorId,
        class: &ClassId,
        keys: BTreeSet<ClassSpellKey>,
    ) -> CoreResult<()> {
        let (own, foreign): (BTreeSet<_>, BTreeSet<_>) =
            keys.into_iter().partition(|key| &key.class == class);
        if !foreign.is_empty() {
            warn!(actor = %actor, %class, dropped = foreign.len(), "ignoring keys of another class");
        }

        let flags = self.core.flags(actor);
        let mut prepared = flags.prepared_by_class().await?;
        prepared.insert(class.clone(), own);
        flags.set_prepared_by_class(&prepared).await?;
        flags.set_prepared_spells(&flat_mirror(&prepared)).await?;
        Ok(())
    }

    /// Prunes keys whose item is gone and rewrites the mirror. Returns the number pruned.
    pub async fn cleanup_stale_preparation_flags(&self, actor_id: &ActorId) -> CoreResult<usize> {
        let actor = self.core.actor(actor_id).await?;
        if !self.core.can_modify(&actor) {
            return Ok(0);
        }
        let flags = self.core.flags(actor_id);
        let stored = flags.prepared_by_class().await?;
        let mut prepared = stored.clone();

        let mut pruned = 0;
        for keys in prepared.values_mut() {
            let before = keys.len();
            keys.retain(|key| key_has_item(&actor, key));
            pruned += before - keys.len();
        }
        prepared.retain(|_, keys| !keys.is_empty());

        if pruned > 0 {
            info!(actor = %actor_id, pruned, "pruned stale preparation keys");
        }
        if prepared != stored {
            flags.set_prepared_by_class(&prepared).await?;
        }
        let mirror = flat_mirror(&prepared);
        if flags.prepared_spells().await? != mirror {
            flags.set_prepared_spells(&mirror).await?;
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(class: &str, uuid: &str) -> ClassSpellKey {
        ClassSpellKey::new(ClassId::new(class), SpellUuid::new(uuid))
    }

    #[test]
    fn mirror_dedups_across_classes() {
        let mut prepared = PreparedByClass::new();
        prepared.insert(ClassId::new("wizard"), [key("wizard", "a"), key("wizard", "b")].into());
        prepared.insert(ClassId::new("cleric"), [key("cleric", "a"), key("cleric", "c")].into());
        let mirror: Vec<_> = flat_mirror(&prepared).iter().map(|u| u.to_string()).collect();
        assert_eq!(mirror, ["a", "b", "c"]);
    }

    #[test]
    fn elsewhere_skips_the_asking_class() {
        let mut prepared = PreparedByClass::new();
        prepared.insert(ClassId::new("cleric"), [key("cleric", "cure")].into());
        let uuid = SpellUuid::new("cure");
        assert_eq!(
            prepared_elsewhere(&prepared, &uuid, &ClassId::new("wizard")).map(ClassId::as_str),
            Some("cleric")
        );
        assert_eq!(prepared_elsewhere(&prepared, &uuid, &ClassId::new("cleric")), None);
    }
}
