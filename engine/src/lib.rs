//! Spell preparation and rules engine for a tabletop character sheet host.
//!
//! The host is reached only through [`store::DocumentStore`] and [`store::HostUi`];
//! [`memory`] provides an in-process implementation of both.

pub mod cache;
pub mod cantrips;
pub mod content;
pub mod context;
pub mod error;
pub mod flags;
pub mod ids;
pub mod index;
pub mod lists;
pub mod memory;
pub mod model;
pub mod notify;
pub mod party;
pub mod preparation;
pub mod prepared;
pub mod progression;
pub mod rules;
pub mod settings;
pub mod store;
pub mod userdata;
pub mod wizard;

pub use context::Core;
pub use error::{ChangeWarning, CoreError, CoreResult, DenyReason, Reason, StoreError};
pub use ids::{ActorId, ClassId, ClassSpellKey, ItemId, ListUuid, SpellUuid, UserId};
pub use memory::{MemoryHost, MemoryStore, MemoryWorld, WorldBuilder, WorldSnapshot};
pub use preparation::{ChangeCheck, ChangeRequest, DesiredSpell, DesiredState, PreparationStatus, SaveSummary};
pub use rules::{ClassRules, ClassRulesPatch, EnforcementBehavior, RitualCasting, RuleSet, SwapMode};
pub use settings::CoreConfig;
