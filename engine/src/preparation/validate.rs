use serde::{Deserialize, Serialize};

use crate::cantrips::SwapContext;
use crate::error::{ChangeWarning, DenyReason};
use crate::ids::{ClassId, SpellUuid};
use crate::model::SpellSet;
use crate::prepared::{prepared_elsewhere, PreparedByClass};
use crate::rules::{ClassRules, EnforcementBehavior, SwapMode};

/// Outcome of validating one toggle. Never an `Err`: refusals carry a reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCheck {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<ChangeWarning>,
}

impl ChangeCheck {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            warning: None,
        }
    }

    pub fn allow_with(warning: ChangeWarning) -> Self {
        Self {
            allowed: true,
            reason: None,
            warning: Some(warning),
        }
    }

    pub fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            warning: None,
        }
    }

    /// A swap or visibility rule, subject to enforcement.
    pub fn rule(enforcement: EnforcementBehavior, reason: DenyReason) -> Self {
        match enforcement {
            EnforcementBehavior::Strict => Self::deny(reason),
            EnforcementBehavior::NotifyGm => Self::allow_with(ChangeWarning::RuleBypassed { rule: reason }),
            EnforcementBehavior::Unenforced => Self::allow(),
        }
    }

    /// A count limit, subject to enforcement; `current` is the count after the change.
    pub fn limit(enforcement: EnforcementBehavior, reason: DenyReason, current: u32, max: u32) -> Self {
        match enforcement {
            EnforcementBehavior::Strict => Self::deny(reason),
            EnforcementBehavior::NotifyGm => Self::allow_with(ChangeWarning::OverLimit { current, max }),
            EnforcementBehavior::Unenforced => Self::allow(),
        }
    }
}

/// A single requested toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    pub uuid: SpellUuid,
    pub level: u8,
    pub is_checked: bool,
    pub was_prepared: bool,
}

/// Everything a leveled-spell decision depends on.
pub struct SpellRuleContext<'a> {
    pub class: &'a ClassId,
    pub rules: &'a ClassRules,
    pub enforcement: EnforcementBehavior,
    pub context: SwapContext,
    pub max_level: u8,
    pub max_prepared: u32,
    pub class_list: &'a SpellSet,
    /// Present for wizard-like classes.
    pub spellbook: Option<&'a SpellSet>,
    pub prepared: &'a PreparedByClass,
}

/// Validates a leveled spell toggle given `current` prepared leveled spells.
pub fn validate_spell(ctx: &SpellRuleContext<'_>, req: &ChangeRequest, current: u32) -> ChangeCheck {
    match (req.is_checked, req.was_prepared) {
        (true, false) => {
            if let Some(other) = prepared_elsewhere(ctx.prepared, &req.uuid, ctx.class) {
                return ChangeCheck::deny(DenyReason::PreparedByOther { class: other.clone() });
            }
            if req.level > ctx.max_level {
                return ChangeCheck::deny(DenyReason::AboveMaxLevel {
                    level: req.level,
                    max: ctx.max_level,
                });
            }
            let in_book = ctx.spellbook.is_some_and(|book| book.contains(&req.uuid));
            let on_list = ctx.class_list.contains(&req.uuid);
            if !on_list && !in_book && !ctx.class_list.is_empty() {
                return ChangeCheck::deny(DenyReason::NotOnClassList);
            }
            if ctx.spellbook.is_some() && !in_book {
                return ChangeCheck::deny(DenyReason::NotInSpellbook);
            }
            if current >= ctx.max_prepared {
                return ChangeCheck::limit(
                    ctx.enforcement,
                    DenyReason::ClassAtMaximum {
                        current,
                        max: ctx.max_prepared,
                    },
                    current + 1,
                    ctx.max_prepared,
                );
            }
            ChangeCheck::allow()
        }
        (false, true) => {
            let blocked = match ctx.rules.spell_swapping {
                SwapMode::None => Some(DenyReason::SwapNotAllowed),
                SwapMode::LevelUp if ctx.context != SwapContext::LevelUp => Some(DenyReason::LevelUpOnly),
                SwapMode::LongRest if ctx.context != SwapContext::LongRest => Some(DenyReason::LongRestOnly),
                _ => None,
            };
            match blocked {
                Some(reason) => ChangeCheck::rule(ctx.enforcement, reason),
                None => ChangeCheck::allow(),
            }
        }
        _ => ChangeCheck::allow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ClassSpellKey;
    use crate::rules::{defaults, RuleSet};

    struct Fixture {
        class: ClassId,
        rules: ClassRules,
        list: SpellSet,
        book: SpellSet,
        prepared: PreparedByClass,
    }

    fn fixture() -> Fixture {
        let class = ClassId::new("wizard");
        Fixture {
            rules: defaults(&class, RuleSet::Legacy),
            class,
            list: ["shield", "magic-missile", "fireball"].into_iter().map(SpellUuid::new).collect(),
            book: ["shield", "magic-missile"].into_iter().map(SpellUuid::new).collect(),
            prepared: PreparedByClass::new(),
        }
    }

    fn ctx(f: &Fixture, enforcement: EnforcementBehavior) -> SpellRuleContext<'_> {
        SpellRuleContext {
            class: &f.class,
            rules: &f.rules,
            enforcement,
            context: SwapContext::Normal,
            max_level: 2,
            max_prepared: 1,
            class_list: &f.list,
            spellbook: Some(&f.book),
            prepared: &f.prepared,
        }
    }

    fn add(uuid: &str, level: u8) -> ChangeRequest {
        ChangeRequest {
            uuid: SpellUuid::new(uuid),
            level,
            is_checked: true,
            was_prepared: false,
        }
    }

    #[test]
    fn above_max_level_is_never_relaxed() {
        let f = fixture();
        let check = validate_spell(&ctx(&f, EnforcementBehavior::Unenforced), &add("fireball", 3), 0);
        assert_eq!(check.reason, Some(DenyReason::AboveMaxLevel { level: 3, max: 2 }));
    }

    #[test]
    fn spellbook_gates_wizard_preparation() {
        let mut f = fixture();
        f.list.insert(SpellUuid::new("sleep"));
        let check = validate_spell(&ctx(&f, EnforcementBehavior::Strict), &add("sleep", 1), 0);
        assert_eq!(check.reason, Some(DenyReason::NotInSpellbook));
    }

    #[test]
    fn limit_follows_enforcement() {
        let f = fixture();
        let strict = validate_spell(&ctx(&f, EnforcementBehavior::Strict), &add("shield", 1), 1);
        assert_eq!(strict.reason, Some(DenyReason::ClassAtMaximum { current: 1, max: 1 }));

        let notify = validate_spell(&ctx(&f, EnforcementBehavior::NotifyGm), &add("shield", 1), 1);
        assert!(notify.allowed);
        assert_eq!(notify.warning, Some(ChangeWarning::OverLimit { current: 2, max: 1 }));
    }

    #[test]
    fn other_class_blocks_leveled_spell() {
        let mut f = fixture();
        let cleric = ClassId::new("cleric");
        f.prepared.insert(
            cleric.clone(),
            [ClassSpellKey::new(cleric.clone(), SpellUuid::new("shield"))].into(),
        );
        let check = validate_spell(&ctx(&f, EnforcementBehavior::Unenforced), &add("shield", 1), 0);
        assert_eq!(check.reason, Some(DenyReason::PreparedByOther { class: cleric }));
    }

    #[test]
    fn unpreparing_outside_long_rest() {
        let f = fixture();
        let req = ChangeRequest {
            is_checked: false,
            was_prepared: true,
            ..add("shield", 1)
        };
        let check = validate_spell(&ctx(&f, EnforcementBehavior::Strict), &req, 1);
        assert_eq!(check.reason, Some(DenyReason::LongRestOnly));

        let mut long_rest = ctx(&f, EnforcementBehavior::Strict);
        long_rest.context = SwapContext::LongRest;
        assert!(validate_spell(&long_rest, &req, 1).allowed);
    }
}
