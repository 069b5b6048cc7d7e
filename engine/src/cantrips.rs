//! Cantrip caps and the level-up / long-rest swap windows.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::context::Core;
use crate::error::{CoreResult, DenyReason};
use crate::ids::{ActorId, ClassId, SpellUuid};
use crate::model::Actor;
use crate::preparation::ChangeCheck;
use crate::prepared::PreparedByClass;
use crate::rules::{is_wizard_like, ClassRules, EnforcementBehavior, SwapMode};

/// Situation a change is made in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SwapContext {
    Normal,
    LevelUp,
    LongRest,
}

/// One open swap window: at most one cantrip out and one in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTracking {
    pub original_checked: BTreeSet<SpellUuid>,
    #[serde(default)]
    pub unlearned: Option<SpellUuid>,
    #[serde(default)]
    pub learned: Option<SpellUuid>,
}

impl SwapTracking {
    pub fn open(original_checked: BTreeSet<SpellUuid>) -> Self {
        Self {
            original_checked,
            unlearned: None,
            learned: None,
        }
    }

    /// Records a toggle. On `Err` the record is unchanged.
    pub fn toggle(&mut self, uuid: &SpellUuid, is_checked: bool) -> Result<(), DenyReason> {
        let original = self.original_checked.contains(uuid);
        match (is_checked, original) {
            (true, true) => {
                if self.unlearned.as_ref() == Some(uuid) {
                    self.unlearned = None;
                }
            }
            (true, false) => {
                let is_this = self.learned.as_ref() == Some(uuid);
                if !(self.unlearned.is_some() || is_this) || (self.learned.is_some() && !is_this) {
                    return Err(DenyReason::OnlyOneSwap);
                }
                self.learned = Some(uuid.clone());
            }
            (false, true) => {
                if self.unlearned.as_ref().is_some_and(|u| u != uuid) {
                    return Err(DenyReason::OnlyOneSwap);
                }
                self.unlearned = Some(uuid.clone());
            }
            (false, false) => {
                if self.learned.as_ref() == Some(uuid) {
                    self.learned = None;
                }
            }
        }
        Ok(())
    }

    pub fn is_baseline(&self) -> bool {
        self.unlearned.is_none() && self.learned.is_none()
    }
}

/// Inputs to a cantrip decision for one class.
#[derive(Debug, Clone)]
pub struct CantripState {
    pub rules: ClassRules,
    pub wizard_like: bool,
    pub enforcement: EnforcementBehavior,
    pub max: u32,
    pub current: u32,
    pub context: SwapContext,
}

impl CantripState {
    /// Whether changes are tracked against a swap window.
    pub fn in_window(&self) -> bool {
        match (self.context, self.rules.cantrip_swapping) {
            (SwapContext::LevelUp, SwapMode::LevelUp) => true,
            (SwapContext::LongRest, SwapMode::LongRest) => self.wizard_like,
            _ => false,
        }
    }
}

/// Validates one cantrip toggle and, inside a window, records it in `tracking`.
///
/// The window opens lazily with `original` as its baseline.
pub fn validate_cantrip(
    state: &CantripState,
    tracking: &mut Option<SwapTracking>,
    original: &BTreeSet<SpellUuid>,
    uuid: &SpellUuid,
    is_checked: bool,
    was_prepared: bool,
) -> ChangeCheck {
    if is_checked == was_prepared {
        return ChangeCheck::allow();
    }
    let enforcement = state.enforcement;

    if is_checked {
        if !state.rules.show_cantrips {
            return ChangeCheck::rule(enforcement, DenyReason::CantripsHidden);
        }
        let baseline = tracking.as_ref().map_or(original.len(), |t| t.original_checked.len());
        if state.in_window() && baseline as u32 >= state.max {
            let window = tracking.get_or_insert_with(|| SwapTracking::open(original.clone()));
            return match window.toggle(uuid, true) {
                Ok(()) => ChangeCheck::allow(),
                Err(reason) => ChangeCheck::rule(enforcement, reason),
            };
        }
        if state.current >= state.max {
            return ChangeCheck::limit(
                enforcement,
                DenyReason::CantripAtMaximum {
                    current: state.current,
                    max: state.max,
                },
                state.current + 1,
                state.max,
            );
        }
        return ChangeCheck::allow();
    }

    let blocked = match (state.rules.cantrip_swapping, state.context) {
        (SwapMode::None, _) => Some(DenyReason::SwapNotAllowed),
        (SwapMode::LongRest, _) if !state.wizard_like => Some(DenyReason::WizardRuleOnly),
        (SwapMode::LevelUp, ctx) if ctx != SwapContext::LevelUp => Some(DenyReason::LevelUpOnly),
        (SwapMode::LongRest, ctx) if ctx != SwapContext::LongRest => Some(DenyReason::LongRestOnly),
        _ => None,
    };
    if let Some(reason) = blocked {
        return ChangeCheck::rule(enforcement, reason);
    }
    let window = tracking.get_or_insert_with(|| SwapTracking::open(original.clone()));
    match window.toggle(uuid, false) {
        Ok(()) => ChangeCheck::allow(),
        Err(reason) => ChangeCheck::rule(enforcement, reason),
    }
}

/// Prepared keys of `class` whose owned copy is a cantrip.
pub fn prepared_cantrips(actor: &Actor, class: &ClassId, prepared: &PreparedByClass) -> BTreeSet<SpellUuid> {
    prepared
        .get(class)
        .into_iter()
        .flatten()
        .filter(|key| actor.copies_of(&key.spell).any(|(_, s)| s.is_cantrip()))
        .map(|key| key.spell.clone())
        .collect()
}

pub struct CantripEngine<'a> {
    core: &'a Core,
}

impl<'a> CantripEngine<'a> {
    pub(crate) fn new(core: &'a Core) -> Self {
        Self { core }
    }

    pub async fn total_max_cantrips(&self, actor: &Actor) -> CoreResult<u32> {
        let mut total = 0;
        for class in actor.spellcasting_classes() {
            total += self.core.progression().max_cantrips(actor, class.id()).await?;
        }
        Ok(total)
    }

    /// Level or cantrip maximum went up since the last completed level-up window.
    pub async fn detect_level_up(&self, actor: &Actor) -> CoreResult<bool> {
        let flags = self.core.flags(&actor.id);
        let previous_level = flags.previous_level().await?.unwrap_or(0);
        let previous_max = flags.previous_cantrip_max().await?.unwrap_or(0);
        let level = actor.level();
        let max = self.total_max_cantrips(actor).await?;
        let leveled = (previous_level == 0 && level > 0) || level > previous_level || max > previous_max;
        debug!(actor = %actor.id, previous_level, level, previous_max, max, leveled, "level-up check");
        Ok(leveled)
    }

    pub async fn swap_context(&self, actor: &Actor, class: &ClassId) -> CoreResult<SwapContext> {
        if self.detect_level_up(actor).await? {
            return Ok(SwapContext::LevelUp);
        }
        if self.core.flags(&actor.id).long_rest_pending().await? {
            let rules = self.core.rules().get_class_rules(&actor.id, class).await?;
            if rules.cantrip_swapping == SwapMode::LongRest || rules.spell_swapping == SwapMode::LongRest {
                return Ok(SwapContext::LongRest);
            }
        }
        Ok(SwapContext::Normal)
    }

    /// Records that the actor finished a long rest.
    pub async fn on_long_rest(&self, actor_id: &ActorId) -> CoreResult<()> {
        let actor = self.core.actor(actor_id).await?;
        self.core.require_write(&actor)?;
        self.core.flags(actor_id).set_long_rest_pending(true).await?;
        info!(actor = %actor_id, "long rest recorded");
        Ok(())
    }

    pub async fn state(&self, actor: &Actor, class: &ClassId, context: SwapContext) -> CoreResult<CantripState> {
        let rules = self.core.rules().get_class_rules(&actor.id, class).await?;
        let prepared = self.core.prepared().get_prepared_by_class(&actor.id).await?;
        Ok(CantripState {
            wizard_like: is_wizard_like(class, &rules),
            enforcement: self.core.rules().enforcement(&actor.id).await?,
            max: self.core.progression().max_cantrips(actor, class).await?,
            current: prepared_cantrips(actor, class, &prepared).len() as u32,
            context,
            rules,
        })
    }

    pub async fn window(
        &self,
        actor: &ActorId,
        class: &ClassId,
        context: SwapContext,
    ) -> CoreResult<Option<SwapTracking>> {
        if context == SwapContext::Normal {
            return Ok(None);
        }
        Ok(self.core.flags(actor).swap_tracking(class, context).await?)
    }

    pub(crate) async fn store_window(
        &self,
        actor: &ActorId,
        class: &ClassId,
        context: SwapContext,
        tracking: Option<&SwapTracking>,
    ) -> CoreResult<()> {
        if context == SwapContext::Normal {
            return Ok(());
        }
        let flags = self.core.flags(actor);
        match tracking {
            Some(tracking) => flags.set_swap_tracking(class, context, tracking).await?,
            None => flags.clear_swap_tracking(class, context).await?,
        }
        Ok(())
    }

    /// Read-only check of one cantrip toggle against the stored window.
    pub async fn can_change(
        &self,
        actor: &Actor,
        class: &ClassId,
        uuid: &SpellUuid,
        is_checked: bool,
        was_prepared: bool,
    ) -> CoreResult<ChangeCheck> {
        let context = self.swap_context(actor, class).await?;
        let state = self.state(actor, class, context).await?;
        let prepared = self.core.prepared().get_prepared_by_class(&actor.id).await?;
        let original = prepared_cantrips(actor, class, &prepared);
        let mut tracking = self.window(&actor.id, class, context).await?;
        Ok(validate_cantrip(&state, &mut tracking, &original, uuid, is_checked, was_prepared))
    }

    /// Closes a window: clears tracking and writes the level snapshot forward.
    pub async fn complete_window(&self, actor_id: &ActorId, class: &ClassId, context: SwapContext) -> CoreResult<()> {
        let actor = self.core.actor(actor_id).await?;
        self.core.require_write(&actor)?;
        let flags = self.core.flags(actor_id);
        match context {
            SwapContext::Normal => return Ok(()),
            SwapContext::LevelUp => {
                flags.clear_swap_tracking(class, context).await?;
                let max = self.total_max_cantrips(&actor).await?;
                flags.set_level_snapshot(actor.level(), max).await?;
            }
            SwapContext::LongRest => {
                flags.clear_swap_tracking(class, context).await?;
                flags.set_long_rest_pending(false).await?;
            }
        }
        info!(actor = %actor_id, %class, ?context, "swap window completed");
        Ok(())
    }
}
