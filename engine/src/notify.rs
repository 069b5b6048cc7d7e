//! GM whispers summarizing preparation changes.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::Core;
use crate::error::CoreResult;
use crate::ids::ClassId;
use crate::model::Actor;
use crate::preparation::{ChangeSet, OverLimits, SaveSummary};
use crate::rules::EnforcementBehavior;
use crate::store::NoticeLevel;

/// Host template rendered for the whisper.
pub const TEMPLATE: &str = "spell-changes";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl From<&ChangeSet> for NameChanges {
    fn from(changes: &ChangeSet) -> Self {
        Self {
            added: changes.added.iter().map(|c| c.name.clone()).collect(),
            removed: changes.removed.iter().map(|c| c.name.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassChangeNotice {
    pub class_identifier: ClassId,
    pub cantrip_changes: NameChanges,
    pub spell_changes: NameChanges,
    pub over_limits: OverLimits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub actor_name: String,
    pub class_changes: Vec<ClassChangeNotice>,
}

impl ChangeNotification {
    pub fn new(actor: &Actor, summaries: &[SaveSummary]) -> Self {
        Self {
            actor_name: actor.name.clone(),
            class_changes: summaries
                .iter()
                .map(|s| ClassChangeNotice {
                    class_identifier: s.class.clone(),
                    cantrip_changes: (&s.cantrip_changes).into(),
                    spell_changes: (&s.spell_changes).into(),
                    over_limits: s.over_limits,
                })
                .collect(),
        }
    }

    pub fn any_over_limit(&self) -> bool {
        self.class_changes.iter().any(|c| c.over_limits.any())
    }
}

pub struct ChangeNotifier<'a> {
    core: &'a Core,
}

impl<'a> ChangeNotifier<'a> {
    pub fn new(core: &'a Core) -> Self {
        Self { core }
    }

    /// Whispers GMs when a class ended over its limit under `notifyGm`.
    ///
    /// Returns whether a whisper was sent.
    pub async fn notify(&self, actor: &Actor, enforcement: EnforcementBehavior, summaries: &[SaveSummary]) -> CoreResult<bool> {
        let payload = ChangeNotification::new(actor, summaries);
        if !payload.any_over_limit() || enforcement == EnforcementBehavior::Strict {
            return Ok(false);
        }
        let host = self.core.host();
        host.notify(
            NoticeLevel::Info,
            &format!("{} is over a spell preparation limit", actor.name),
        );
        if enforcement != EnforcementBehavior::NotifyGm {
            return Ok(false);
        }

        let gms: Vec<_> = host.users().await?.into_iter().filter(|u| u.is_gm).map(|u| u.id).collect();
        if gms.is_empty() {
            warn!(actor = %actor.id, "no GM to notify");
            return Ok(false);
        }
        let context = serde_json::to_value(&payload).map_err(crate::error::StoreError::from)?;
        let content = host.render_template(TEMPLATE, &context).await?;
        host.whisper(content, gms).await?;
        debug!(actor = %actor.id, classes = payload.class_changes.len(), "GM notified of changes");
        Ok(true)
    }
}
