//! Engine configuration and the typed world-settings facade.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::StoreError;
use crate::ids::ListUuid;
use crate::party::Focus;
use crate::progression::ModelDef;
use crate::rules::{EnforcementBehavior, RuleSet};
use crate::store::DocumentStore;

pub const DEFAULT_NOTES_LENGTH: usize = 240;

/// Process-level configuration of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CoreConfig {
    /// Namespace for actor flags, world settings and owned packs.
    pub module_id: String,
    /// Keys the preloaded spell index; a version change discards it.
    pub module_version: String,
    pub custom_list_pack: Option<String>,
    pub user_data_pack: Option<String>,
    pub user_data_ttl_ms: u64,
    /// Upper bound on concurrent `from_uuid` lookups.
    pub lookup_concurrency: usize,
    pub custom_progressions: IndexMap<String, ModelDef>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            module_id: "spellprep".to_string(),
            module_version: env!("CARGO_PKG_VERSION").to_string(),
            custom_list_pack: None,
            user_data_pack: None,
            user_data_ttl_ms: 5_000,
            lookup_concurrency: 5,
            custom_progressions: IndexMap::new(),
        }
    }
}

impl CoreConfig {
    pub fn custom_list_pack(&self) -> String {
        self.custom_list_pack
            .clone()
            .unwrap_or_else(|| format!("{}.custom-spell-lists", self.module_id))
    }

    pub fn user_data_pack(&self) -> String {
        self.user_data_pack
            .clone()
            .unwrap_or_else(|| format!("{}.user-spell-data", self.module_id))
    }

    /// Reads a JSON or YAML config file (chosen by extension).
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let cfg = if is_yaml {
            serde_yaml::from_str(&text)
                .with_context(|| format!("failed to parse config YAML: {}", path.display()))?
        } else {
            serde_json::from_str(&text)
                .with_context(|| format!("failed to parse config JSON: {}", path.display()))?
        };
        Ok(cfg)
    }
}

pub mod keys {
    pub const RULE_SET: &str = "ruleSet";
    pub const INDEXED_COMPENDIUMS: &str = "indexedCompendiums";
    pub const CUSTOM_SPELL_MAPPINGS: &str = "customSpellMappings";
    pub const REGISTRY_ENABLED_LISTS: &str = "registryEnabledLists";
    pub const DEFAULT_ENFORCEMENT: &str = "defaultEnforcementBehavior";
    pub const CANTRIP_SCALE_VALUES: &str = "cantripScaleValues";
    pub const SPELL_NOTES_LENGTH: &str = "spellNotesLength";
    pub const AUTO_DELETE_UNPREPARED: &str = "autoDeleteUnpreparedSpells";
    pub const AVAILABLE_FOCUSES: &str = "availableFocuses";
}

/// Typed access to world-level settings; one getter per key.
pub struct WorldSettings<'a> {
    store: &'a dyn DocumentStore,
    scope: &'a str,
}

impl<'a> WorldSettings<'a> {
    pub fn new(store: &'a dyn DocumentStore, scope: &'a str) -> Self {
        Self { store, scope }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.store.get_setting(self.scope, key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(setting = key, error = %e, "malformed setting, using default");
                Ok(None)
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value: Value = serde_json::to_value(value)?;
        self.store.set_setting(self.scope, key, value).await
    }

    pub async fn rule_set(&self) -> Result<RuleSet, StoreError> {
        Ok(self.read(keys::RULE_SET).await?.unwrap_or_default())
    }

    pub async fn set_rule_set(&self, rule_set: RuleSet) -> Result<(), StoreError> {
        self.write(keys::RULE_SET, &rule_set).await
    }

    /// Pack id -> enabled. Packs absent from the map are enabled.
    pub async fn indexed_compendiums(&self) -> Result<IndexMap<String, bool>, StoreError> {
        Ok(self.read(keys::INDEXED_COMPENDIUMS).await?.unwrap_or_default())
    }

    pub async fn set_indexed_compendiums(&self, map: &IndexMap<String, bool>) -> Result<(), StoreError> {
        self.write(keys::INDEXED_COMPENDIUMS, map).await
    }

    /// Original list UUID -> replacement list UUID.
    pub async fn custom_mappings(&self) -> Result<IndexMap<ListUuid, ListUuid>, StoreError> {
        Ok(self.read(keys::CUSTOM_SPELL_MAPPINGS).await?.unwrap_or_default())
    }

    pub async fn set_custom_mappings(&self, map: &IndexMap<ListUuid, ListUuid>) -> Result<(), StoreError> {
        self.write(keys::CUSTOM_SPELL_MAPPINGS, map).await
    }

    pub async fn registry_enabled_lists(&self) -> Result<Vec<ListUuid>, StoreError> {
        Ok(self.read(keys::REGISTRY_ENABLED_LISTS).await?.unwrap_or_default())
    }

    pub async fn default_enforcement(&self) -> Result<EnforcementBehavior, StoreError> {
        Ok(self.read(keys::DEFAULT_ENFORCEMENT).await?.unwrap_or_default())
    }

    pub async fn set_default_enforcement(&self, behavior: EnforcementBehavior) -> Result<(), StoreError> {
        self.write(keys::DEFAULT_ENFORCEMENT, &behavior).await
    }

    /// Scale-value identifiers consulted for cantrips known, in priority order.
    pub async fn cantrip_scale_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .read(keys::CANTRIP_SCALE_VALUES)
            .await?
            .unwrap_or_else(|| vec!["cantrips-known".to_string(), "cantrips".to_string()]))
    }

    pub async fn notes_length(&self) -> Result<usize, StoreError> {
        Ok(self
            .read(keys::SPELL_NOTES_LENGTH)
            .await?
            .unwrap_or(DEFAULT_NOTES_LENGTH))
    }

    pub async fn auto_delete_unprepared(&self) -> Result<bool, StoreError> {
        Ok(self.read(keys::AUTO_DELETE_UNPREPARED).await?.unwrap_or(false))
    }

    pub async fn available_focuses(&self) -> Result<Vec<Focus>, StoreError> {
        Ok(self
            .read(keys::AVAILABLE_FOCUSES)
            .await?
            .unwrap_or_else(Focus::builtin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_names_follow_module_id() {
        let cfg = CoreConfig {
            module_id: "spells".into(),
            ..CoreConfig::default()
        };
        assert_eq!(cfg.custom_list_pack(), "spells.custom-spell-lists");
        assert_eq!(cfg.user_data_pack(), "spells.user-spell-data");
    }

    #[test]
    fn yaml_config_fills_defaults() {
        let cfg: CoreConfig = serde_yaml::from_str("module_version: \"9.9\"\nlookup_concurrency: 2\n").unwrap();
        assert_eq!(cfg.module_version, "9.9");
        assert_eq!(cfg.lookup_concurrency, 2);
        assert_eq!(cfg.user_data_ttl_ms, 5_000);
        assert_eq!(cfg.module_id, "spellprep");
    }
}
