//! Typed facade over the actor's namespaced flags: one method per named flag.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::cantrips::{SwapContext, SwapTracking};
use crate::error::StoreError;
use crate::ids::{ActorId, ClassId, SpellUuid};
use crate::prepared::PreparedByClass;
use crate::rules::{ClassRulesPatch, EnforcementBehavior, RuleSet};
use crate::store::DocumentStore;
use crate::wizard::CopiedSpell;

pub const PREPARED_BY_CLASS: &str = "preparedSpellsByClass";
pub const PREPARED_SPELLS: &str = "preparedSpells";
pub const CLASS_RULES: &str = "classRules";
pub const RULE_SET_OVERRIDE: &str = "ruleSetOverride";
pub const CANTRIP_SWAP_TRACKING: &str = "cantripSwapTracking";
pub const PREVIOUS_LEVEL: &str = "previousLevel";
pub const PREVIOUS_CANTRIP_MAX: &str = "previousCantripMax";
pub const ENFORCEMENT_BEHAVIOR: &str = "enforcementBehavior";
pub const LONG_REST_PENDING: &str = "longRestPending";
pub const SELECTED_FOCUS: &str = "selectedFocus";

pub fn wizard_copied_key(class: &ClassId) -> String {
    format!("wizardCopiedSpells_{class}")
}

type SwapTrackingMap = IndexMap<ClassId, IndexMap<SwapContext, SwapTracking>>;

pub struct ActorFlags<'a> {
    store: &'a dyn DocumentStore,
    scope: &'a str,
    actor: &'a ActorId,
}

impl<'a> ActorFlags<'a> {
    pub fn new(store: &'a dyn DocumentStore, scope: &'a str, actor: &'a ActorId) -> Self {
        Self { store, scope, actor }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.store.get_flag(self.actor, self.scope, key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // Rebuilt by the next write.
                warn!(actor = %self.actor, flag = key, error = %e, "malformed flag ignored");
                Ok(None)
            }
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        self.store.set_flag(self.actor, self.scope, key, value).await
    }

    async fn unset(&self, key: &str) -> Result<(), StoreError> {
        self.store.unset_flag(self.actor, self.scope, key).await
    }

    pub async fn prepared_by_class(&self) -> Result<PreparedByClass, StoreError> {
        Ok(self.read(PREPARED_BY_CLASS).await?.unwrap_or_default())
    }

    pub async fn set_prepared_by_class(&self, value: &PreparedByClass) -> Result<(), StoreError> {
        self.write(PREPARED_BY_CLASS, value).await
    }

    pub async fn prepared_spells(&self) -> Result<Vec<SpellUuid>, StoreError> {
        Ok(self.read(PREPARED_SPELLS).await?.unwrap_or_default())
    }

    pub async fn set_prepared_spells(&self, value: &[SpellUuid]) -> Result<(), StoreError> {
        self.write(PREPARED_SPELLS, value).await
    }

    pub async fn class_rules(&self) -> Result<IndexMap<ClassId, ClassRulesPatch>, StoreError> {
        Ok(self.read(CLASS_RULES).await?.unwrap_or_default())
    }

    pub async fn set_class_rules(
        &self,
        value: &IndexMap<ClassId, ClassRulesPatch>,
    ) -> Result<(), StoreError> {
        self.write(CLASS_RULES, value).await
    }

    pub async fn rule_set_override(&self) -> Result<Option<RuleSet>, StoreError> {
        self.read(RULE_SET_OVERRIDE).await
    }

    pub async fn set_rule_set_override(&self, value: Option<RuleSet>) -> Result<(), StoreError> {
        match value {
            Some(rule_set) => self.write(RULE_SET_OVERRIDE, &rule_set).await,
            None => self.unset(RULE_SET_OVERRIDE).await,
        }
    }

    async fn swap_tracking_map(&self) -> Result<SwapTrackingMap, StoreError> {
        Ok(self.read(CANTRIP_SWAP_TRACKING).await?.unwrap_or_default())
    }

    pub async fn swap_tracking(
        &self,
        class: &ClassId,
        context: SwapContext,
    ) -> Result<Option<SwapTracking>, StoreError> {
        let mut map = self.swap_tracking_map().await?;
        Ok(map
            .get_mut(class)
            .and_then(|per_class| per_class.shift_remove(&context)))
    }

    pub async fn set_swap_tracking(
        &self,
        class: &ClassId,
        context: SwapContext,
        tracking: &SwapTracking,
    ) -> Result<(), StoreError> {
        let mut map = self.swap_tracking_map().await?;
        map.entry(class.clone())
            .or_default()
            .insert(context, tracking.clone());
        self.write(CANTRIP_SWAP_TRACKING, &map).await
    }

    pub async fn clear_swap_tracking(&self, class: &ClassId, context: SwapContext) -> Result<(), StoreError> {
        let mut map = self.swap_tracking_map().await?;
        let Some(per_class) = map.get_mut(class) else {
            return Ok(());
        };
        per_class.shift_remove(&context);
        if per_class.is_empty() {
            map.shift_remove(class);
        }
        self.write(CANTRIP_SWAP_TRACKING, &map).await
    }

    pub async fn previous_level(&self) -> Result<Option<u32>, StoreError> {
        self.read(PREVIOUS_LEVEL).await
    }

    pub async fn previous_cantrip_max(&self) -> Result<Option<u32>, StoreError> {
        self.read(PREVIOUS_CANTRIP_MAX).await
    }

    pub async fn set_level_snapshot(&self, level: u32, cantrip_max: u32) -> Result<(), StoreError> {
        self.write(PREVIOUS_LEVEL, &level).await?;
        self.write(PREVIOUS_CANTRIP_MAX, &cantrip_max).await
    }

    pub async fn wizard_copied_spells(&self, class: &ClassId) -> Result<Vec<CopiedSpell>, StoreError> {
        Ok(self.read(&wizard_copied_key(class)).await?.unwrap_or_default())
    }

    pub async fn set_wizard_copied_spells(
        &self,
        class: &ClassId,
        spells: &[CopiedSpell],
    ) -> Result<(), StoreError> {
        self.write(&wizard_copied_key(class), spells).await
    }

    pub async fn enforcement_behavior(&self) -> Result<Option<EnforcementBehavior>, StoreError> {
        self.read(ENFORCEMENT_BEHAVIOR).await
    }

    pub async fn set_enforcement_behavior(
        &self,
        value: Option<EnforcementBehavior>,
    ) -> Result<(), StoreError> {
        match value {
            Some(behavior) => self.write(ENFORCEMENT_BEHAVIOR, &behavior).await,
            None => self.unset(ENFORCEMENT_BEHAVIOR).await,
        }
    }

    pub async fn long_rest_pending(&self) -> Result<bool, StoreError> {
        Ok(self.read(LONG_REST_PENDING).await?.unwrap_or(false))
    }

    pub async fn set_long_rest_pending(&self, pending: bool) -> Result<(), StoreError> {
        if pending {
            self.write(LONG_REST_PENDING, &true).await
        } else {
            self.unset(LONG_REST_PENDING).await
        }
    }

    pub async fn selected_focus(&self) -> Result<Option<String>, StoreError> {
        self.read(SELECTED_FOCUS).await
    }

    pub async fn set_selected_focus(&self, focus: Option<&str>) -> Result<(), StoreError> {
        match focus {
            Some(id) => self.write(SELECTED_FOCUS, id).await,
            None => self.unset(SELECTED_FOCUS).await,
        }
    }
}
