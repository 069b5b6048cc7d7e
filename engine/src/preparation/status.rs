use serde::{Deserialize, Serialize};

use crate::error::DenyReason;
use crate::ids::{ClassId, ClassSpellKey, ItemId, SpellUuid};
use crate::model::{Actor, Item, PreparationMethod, Prepared, SpellData};
use crate::prepared::{prepared_elsewhere, PreparedByClass};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum PreparationStatus {
    None,
    Prepared,
    #[serde(rename_all = "camelCase")]
    PreparedByOther { by_class: ClassId },
    Always { source: ItemId },
    #[serde(rename_all = "camelCase")]
    Granted { source_item: String },
    Special { mode: PreparationMethod },
    CantripLocked { reason: DenyReason },
}

impl PreparationStatus {
    pub fn is_prepared(&self) -> bool {
        matches!(self, Self::Prepared | Self::Always { .. } | Self::Granted { .. })
    }

    /// The engine may toggle spells in these states.
    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::None | Self::Prepared | Self::CantripLocked { .. })
            || matches!(self, Self::Special { mode } if matches!(mode, PreparationMethod::Ritual | PreparationMethod::Pact))
    }
}

/// Classification plus an unassigned item this class should adopt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub status: PreparationStatus,
    pub claim: Option<ItemId>,
}

/// Cantrip cap used to lock unchecked cantrips under strict enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CantripCap {
    pub current: u32,
    pub max: u32,
}

fn immutable_status(item: &Item, spell: &SpellData) -> Option<PreparationStatus> {
    if let Some(source) = &spell.cached_for {
        return Some(PreparationStatus::Granted {
            source_item: source.clone(),
        });
    }
    if spell.prepared == Prepared::Always || spell.method == PreparationMethod::Always {
        return Some(PreparationStatus::Always { source: item.id.clone() });
    }
    match spell.method {
        PreparationMethod::Innate | PreparationMethod::AtWill | PreparationMethod::Granted => {
            Some(PreparationStatus::Special { mode: spell.method })
        }
        _ => None,
    }
}

/// Status from the copies this class owns, if they decide it.
fn from_own_copies<'a>(copies: impl Iterator<Item = (&'a Item, &'a SpellData)> + Clone) -> Option<PreparationStatus> {
    if let Some(status) = copies.clone().find_map(|(item, spell)| immutable_status(item, spell)) {
        return Some(status);
    }
    if copies.clone().any(|(_, spell)| spell.is_prepared_copy()) {
        return Some(PreparationStatus::Prepared);
    }
    copies
        .clone()
        .find(|(_, spell)| spell.is_ritual_copy())
        .map(|_| PreparationStatus::Special {
            mode: PreparationMethod::Ritual,
        })
}

/// Status of `uuid` for `class` on `actor`.
pub fn classify(
    actor: &Actor,
    class: &ClassId,
    uuid: &SpellUuid,
    level: u8,
    prepared: &PreparedByClass,
    cantrip_cap: Option<CantripCap>,
) -> Classified {
    let copies: Vec<(&Item, &SpellData)> = actor.copies_of(uuid).collect();
    let own = copies
        .iter()
        .copied()
        .filter(|(_, spell)| spell.source_class.as_ref() == Some(class));

    if let Some(status) = from_own_copies(own) {
        return Classified { status, claim: None };
    }

    let elsewhere = if level > 0 {
        prepared_elsewhere(prepared, uuid, class)
    } else {
        None
    };

    if elsewhere.is_none() {
        let unassigned = copies
            .iter()
            .find(|(_, spell)| spell.source_class.is_none() && !spell.is_immutable());
        if let Some((item, spell)) = unassigned {
            let status = if spell.is_prepared_copy() {
                PreparationStatus::Prepared
            } else if spell.is_ritual_copy() {
                PreparationStatus::Special {
                    mode: PreparationMethod::Ritual,
                }
            } else {
                PreparationStatus::None
            };
            return Classified {
                status: lock_cantrip(status, level, cantrip_cap),
                claim: Some(item.id.clone()),
            };
        }
    }

    if let Some(other) = elsewhere {
        return Classified {
            status: PreparationStatus::PreparedByOther { by_class: other.clone() },
            claim: None,
        };
    }

    if let Some(status) = copies.iter().find_map(|(item, spell)| immutable_status(item, spell)) {
        return Classified { status, claim: None };
    }

    let key = ClassSpellKey::new(class.clone(), uuid.clone());
    let status = if prepared.get(class).is_some_and(|keys| keys.contains(&key)) {
        PreparationStatus::Prepared
    } else {
        PreparationStatus::None
    };
    Classified {
        status: lock_cantrip(status, level, cantrip_cap),
        claim: None,
    }
}

fn lock_cantrip(status: PreparationStatus, level: u8, cap: Option<CantripCap>) -> PreparationStatus {
    match (status, cap) {
        (PreparationStatus::None, Some(cap)) if level == 0 && cap.current >= cap.max => PreparationStatus::CantripLocked {
            reason: DenyReason::CantripAtMaximum {
                current: cap.current,
                max: cap.max,
            },
        },
        (status, _) => status,
    }
}
