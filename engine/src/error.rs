use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ActorId, ClassId};

/// Failures reported by the document store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("host rejected mutation: {0}")]
    Rejected(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Failures of the interactive host surface (dialogs, chat, templates).
#[derive(Debug, Error)]
pub enum HostError {
    #[error("dialog failed: {0}")]
    Dialog(String),
    #[error("chat message failed: {0}")]
    Chat(String),
    #[error("template {name} failed: {message}")]
    Template { name: String, message: String },
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("user may not modify actor {actor}")]
    PermissionDenied { actor: ActorId },
    #[error("unknown actor {0}")]
    UnknownActor(ActorId),
    #[error("actor {actor} has no class {class}")]
    UnknownClass { actor: ActorId, class: ClassId },
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Error kinds surfaced in structured results instead of `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Reason {
    NotFound,
    InvalidShape,
    Permission,
    RuleViolation,
    OverLimit,
    HostMutation,
    CacheCorruption,
}

/// Why a preparation change was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "camelCase")]
pub enum DenyReason {
    ClassAtMaximum { current: u32, max: u32 },
    CantripAtMaximum { current: u32, max: u32 },
    CantripsHidden,
    SwapNotAllowed,
    LevelUpOnly,
    LongRestOnly,
    WizardRuleOnly,
    OnlyOneSwap,
    PreparedByOther { class: ClassId },
    AboveMaxLevel { level: u8, max: u8 },
    NotOnClassList,
    NotInSpellbook,
    Immutable,
    SourceUnavailable,
}

impl DenyReason {
    pub fn kind(&self) -> Reason {
        match self {
            Self::SourceUnavailable => Reason::NotFound,
            _ => Reason::RuleViolation,
        }
    }
}

/// Non-blocking notes attached to an allowed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "camelCase")]
pub enum ChangeWarning {
    OverLimit { current: u32, max: u32 },
    RuleBypassed { rule: DenyReason },
    NoChange,
}
