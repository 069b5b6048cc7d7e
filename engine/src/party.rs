//! Read-only party overview: who prepared what, and which roles are covered.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::Core;
use crate::error::CoreResult;
use crate::ids::{ActorId, ClassId, SpellUuid};
use crate::model::{Actor, OwnershipLevel, Prepared, SpellData};

/// A role a party member can declare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Focus {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Focus {
    fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
        }
    }

    pub fn builtin() -> Vec<Focus> {
        vec![
            Focus::new("damage", "Damage Dealer", "Offensive spells and direct damage"),
            Focus::new("healer", "Healer", "Healing and restoration"),
            Focus::new("control", "Controller", "Battlefield control and conditions"),
            Focus::new("utility", "Utility", "Exploration, detection and problem solving"),
            Focus::new("support", "Support", "Buffs and protection for allies"),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Offense,
    Control,
    Support,
}

const ROLES: [Role; 3] = [Role::Offense, Role::Control, Role::Support];

/// Roles a spell fills, from its activity tags and description.
pub fn spell_roles(spell: &SpellData) -> BTreeSet<Role> {
    let mut roles = BTreeSet::new();
    for tag in &spell.tags {
        match tag.as_str() {
            "damage" | "attack" => roles.insert(Role::Offense),
            "save" | "condition" | "control" => roles.insert(Role::Control),
            "healing" | "heal" | "buff" | "utility" => roles.insert(Role::Support),
            _ => false,
        };
    }
    let text = spell.description.to_lowercase();
    let keywords: [(&str, Role); 7] = [
        ("damage", Role::Offense),
        ("restrained", Role::Control),
        ("frightened", Role::Control),
        ("paralyzed", Role::Control),
        ("regains", Role::Support),
        ("hit points", Role::Support),
        ("bonus to", Role::Support),
    ];
    for (word, role) in keywords {
        if text.contains(word) {
            roles.insert(role);
        }
    }
    roles
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassPrepared {
    pub class: ClassId,
    pub prepared: Vec<SpellUuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyMember {
    pub id: ActorId,
    pub name: String,
    pub has_permission: bool,
    pub is_viewer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_focus: Option<String>,
    pub spellcasters: Vec<ClassPrepared>,
    pub total_known: usize,
    pub total_prepared: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartySpell {
    pub name: String,
    pub level: u8,
    pub prepared_by_actor_ids: Vec<ActorId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlap {
    pub uuid: SpellUuid,
    pub name: String,
    pub actors: Vec<ActorId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Synergy {
    pub overlap: Vec<Overlap>,
    pub role_coverage: BTreeMap<Role, usize>,
    pub missing_roles: Vec<Role>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyView {
    pub actors: Vec<PartyMember>,
    pub spells_by_level: BTreeMap<u8, IndexMap<SpellUuid, PartySpell>>,
    pub available_focuses: Vec<Focus>,
    pub synergy: Synergy,
}

pub struct PartyAggregator<'a> {
    core: &'a Core,
}

impl<'a> PartyAggregator<'a> {
    pub(crate) fn new(core: &'a Core) -> Self {
        Self { core }
    }

    fn can_view(&self, actor: &Actor) -> bool {
        let user = self.core.host().current_user();
        user.is_gm || actor.permission(&user.id) >= OwnershipLevel::Observer
    }

    /// Prepared UUIDs per spellcasting class, plus always-prepared copies.
    async fn class_prepared(&self, actor: &Actor) -> CoreResult<Vec<ClassPrepared>> {
        let prepared = self.core.prepared().get_prepared_by_class(&actor.id).await?;
        let mut out = Vec::new();
        for entry in actor.spellcasting_classes() {
            let class = entry.id();
            let mut uuids: BTreeSet<SpellUuid> = prepared
                .get(class)
                .into_iter()
                .flatten()
                .map(|key| key.spell.clone())
                .collect();
            uuids.extend(
                actor
                    .spell_items()
                    .filter(|(_, s)| s.prepared == Prepared::Always && s.source_class.as_ref() == Some(class))
                    .map(|(item, _)| item.canonical_uuid(&actor.id)),
            );
            out.push(ClassPrepared {
                class: class.clone(),
                prepared: uuids.into_iter().collect(),
            });
        }
        Ok(out)
    }

    pub async fn aggregate(&self, actor_ids: &[ActorId], viewer: Option<&ActorId>) -> CoreResult<PartyView> {
        let mut actors = Vec::new();
        let mut spells_by_level: BTreeMap<u8, IndexMap<SpellUuid, PartySpell>> = BTreeMap::new();
        let mut roles: BTreeMap<Role, usize> = ROLES.iter().map(|r| (*r, 0)).collect();

        for id in actor_ids {
            let Some(actor) = self.core.store().get_actor(id).await? else {
                info!(actor = %id, "party member not found");
                continue;
            };
            let has_permission = self.can_view(&actor);
            let selected_focus = self.core.flags(id).selected_focus().await?;
            let mut member = PartyMember {
                id: actor.id.clone(),
                name: actor.name.clone(),
                has_permission,
                is_viewer: viewer == Some(id),
                token: actor.token.clone(),
                selected_focus,
                spellcasters: Vec::new(),
                total_known: 0,
                total_prepared: 0,
            };
            if has_permission {
                member.spellcasters = self.class_prepared(&actor).await?;
                let known: BTreeSet<SpellUuid> =
                    actor.spell_items().map(|(item, _)| item.canonical_uuid(&actor.id)).collect();
                let prepared: BTreeSet<&SpellUuid> =
                    member.spellcasters.iter().flat_map(|c| c.prepared.iter()).collect();
                member.total_known = known.len();
                member.total_prepared = prepared.len();

                for uuid in prepared {
                    let Some((item, spell)) = actor.copies_of(uuid).next() else {
                        continue;
                    };
                    let entry = spells_by_level
                        .entry(spell.level)
                        .or_default()
                        .entry(uuid.clone())
                        .or_insert_with(|| PartySpell {
                            name: item.name.clone(),
                            level: spell.level,
                            prepared_by_actor_ids: Vec::new(),
                        });
                    if entry.prepared_by_actor_ids.is_empty() {
                        for role in spell_roles(spell) {
                            *roles.entry(role).or_default() += 1;
                        }
                    }
                    entry.prepared_by_actor_ids.push(actor.id.clone());
                }
            }
            actors.push(member);
        }

        let overlap = spells_by_level
            .values()
            .flatten()
            .filter(|(_, s)| s.prepared_by_actor_ids.len() > 1)
            .map(|(uuid, s)| Overlap {
                uuid: uuid.clone(),
                name: s.name.clone(),
                actors: s.prepared_by_actor_ids.clone(),
            })
            .collect();
        let missing_roles = roles.iter().filter(|(_, n)| **n == 0).map(|(r, _)| *r).collect();
        debug!(members = actors.len(), "party aggregated");

        Ok(PartyView {
            actors,
            spells_by_level,
            available_focuses: self.core.settings().available_focuses().await?,
            synergy: Synergy {
                overlap,
                role_coverage: roles,
                missing_roles,
            },
        })
    }

    /// Sets or clears the actor's focus. `false` when the focus is not offered.
    pub async fn set_focus(&self, actor_id: &ActorId, focus: Option<&str>) -> CoreResult<bool> {
        let actor = self.core.actor(actor_id).await?;
        self.core.require_write(&actor)?;
        if let Some(id) = focus {
            let offered = self.core.settings().available_focuses().await?;
            if !offered.iter().any(|f| f.id == id) {
                info!(actor = %actor_id, focus = id, "unknown focus");
                return Ok(false);
            }
        }
        self.core.flags(actor_id).set_selected_focus(focus).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_come_from_tags_and_text() {
        let spell = SpellData {
            level: 1,
            tags: vec!["damage".into()],
            description: "The target is restrained.".into(),
            ..SpellData::default()
        };
        let roles = spell_roles(&spell);
        assert!(roles.contains(&Role::Offense));
        assert!(roles.contains(&Role::Control));
        assert!(!roles.contains(&Role::Support));
    }

    #[test]
    fn builtin_focuses() {
        let ids: Vec<String> = Focus::builtin().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, ["damage", "healer", "control", "utility", "support"]);
    }
}
