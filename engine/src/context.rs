//! The long-lived engine context: host handles, configuration and caches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::cantrips::CantripEngine;
use crate::error::{CoreError, CoreResult, StoreError};
use crate::flags::ActorFlags;
use crate::ids::{ActorId, ClassId, SpellUuid, UserId};
use crate::index::{PreloadedIndex, SpellIndex};
use crate::lists::SpellListResolver;
use crate::model::{Actor, Document, OwnershipLevel};
use crate::party::PartyAggregator;
use crate::preparation::PreparationEngine;
use crate::prepared::PreparationStore;
use crate::progression::ProgressionCalculator;
use crate::rules::{ClassRules, RuleSetRegistry};
use crate::settings::{CoreConfig, WorldSettings};
use crate::store::{DocumentStore, HostUi, NoticeLevel};
use crate::userdata::{SpellUserData, UserRecord, UserSpellData};
use crate::wizard::WizardSpellbook;

type ClassKey = (ActorId, ClassId);

/// Created at module start, dropped at teardown. Every service borrows it.
pub struct Core {
    store: Arc<dyn DocumentStore>,
    host: Arc<dyn HostUi>,
    config: CoreConfig,
    preload: RwLock<Option<Arc<PreloadedIndex>>>,
    cantrip_max: RwLock<HashMap<ClassKey, u32>>,
    class_rules: RwLock<HashMap<ClassKey, ClassRules>>,
    user_records: TtlCache<UserId, UserRecord>,
    spell_views: TtlCache<(UserId, SpellUuid), SpellUserData>,
    lookups: Semaphore,
}

impl Core {
    pub fn new(store: Arc<dyn DocumentStore>, host: Arc<dyn HostUi>, config: CoreConfig) -> Self {
        let ttl = Duration::from_millis(config.user_data_ttl_ms);
        let permits = config.lookup_concurrency.max(1);
        Self {
            store,
            host,
            preload: RwLock::new(None),
            cantrip_max: RwLock::new(HashMap::new()),
            class_rules: RwLock::new(HashMap::new()),
            user_records: TtlCache::new(ttl),
            spell_views: TtlCache::new(ttl),
            lookups: Semaphore::new(permits),
            config,
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn host(&self) -> &dyn HostUi {
        self.host.as_ref()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Namespace of flags, settings and page flags.
    pub fn scope(&self) -> &str {
        &self.config.module_id
    }

    pub fn settings(&self) -> WorldSettings<'_> {
        WorldSettings::new(self.store.as_ref(), &self.config.module_id)
    }

    pub fn flags<'s>(&'s self, actor: &'s ActorId) -> ActorFlags<'s> {
        ActorFlags::new(self.store.as_ref(), &self.config.module_id, actor)
    }

    pub fn spell_index(&self) -> SpellIndex<'_> {
        SpellIndex::new(self)
    }

    pub fn lists(&self) -> SpellListResolver<'_> {
        SpellListResolver::new(self)
    }

    pub fn progression(&self) -> ProgressionCalculator<'_> {
        ProgressionCalculator::new(self)
    }

    pub fn rules(&self) -> RuleSetRegistry<'_> {
        RuleSetRegistry::new(self)
    }

    pub fn prepared(&self) -> PreparationStore<'_> {
        PreparationStore::new(self)
    }

    pub fn preparation(&self) -> PreparationEngine<'_> {
        PreparationEngine::new(self)
    }

    pub fn cantrips(&self) -> CantripEngine<'_> {
        CantripEngine::new(self)
    }

    pub fn wizard(&self) -> WizardSpellbook<'_> {
        WizardSpellbook::new(self)
    }

    pub fn party(&self) -> PartyAggregator<'_> {
        PartyAggregator::new(self)
    }

    pub fn user_data(&self) -> UserSpellData<'_> {
        UserSpellData::new(self)
    }

    pub async fn actor(&self, id: &ActorId) -> CoreResult<Actor> {
        self.store
            .get_actor(id)
            .await?
            .ok_or_else(|| CoreError::UnknownActor(id.clone()))
    }

    /// GMs and owners may write.
    pub fn can_modify(&self, actor: &Actor) -> bool {
        let user = self.host.current_user();
        user.is_gm || actor.permission(&user.id) == OwnershipLevel::Owner
    }

    /// Short-circuits a write the current user may not make, with a warning.
    pub fn require_write(&self, actor: &Actor) -> CoreResult<()> {
        if self.can_modify(actor) {
            return Ok(());
        }
        warn!(actor = %actor.id, user = %self.host.current_user().id, "write refused");
        self.host.notify(
            NoticeLevel::Warn,
            &format!("You do not have permission to change {}", actor.name),
        );
        Err(CoreError::PermissionDenied {
            actor: actor.id.clone(),
        })
    }

    pub(crate) async fn cached_rules(&self, actor: &ActorId, class: &ClassId) -> Option<ClassRules> {
        self.class_rules
            .read()
            .await
            .get(&(actor.clone(), class.clone()))
            .cloned()
    }

    pub(crate) async fn cache_rules(&self, actor: &ActorId, class: &ClassId, rules: ClassRules) {
        self.class_rules
            .write()
            .await
            .insert((actor.clone(), class.clone()), rules);
    }

    pub(crate) async fn cached_cantrip_max(&self, actor: &ActorId, class: &ClassId) -> Option<u32> {
        self.cantrip_max
            .read()
            .await
            .get(&(actor.clone(), class.clone()))
            .copied()
    }

    pub(crate) async fn cache_cantrip_max(&self, actor: &ActorId, class: &ClassId, max: u32) {
        self.cantrip_max
            .write()
            .await
            .insert((actor.clone(), class.clone()), max);
    }

    /// Drops the rule and cantrip caches of one actor.
    pub async fn invalidate_actor(&self, actor: &ActorId) {
        self.cantrip_max.write().await.retain(|(a, _), _| a != actor);
        self.class_rules.write().await.retain(|(a, _), _| a != actor);
        debug!(actor = %actor, "actor caches cleared");
    }

    /// The preloaded index, unless absent or built by another version.
    pub(crate) async fn preload_snapshot(&self) -> Option<Arc<PreloadedIndex>> {
        let guard = self.preload.read().await;
        match guard.as_ref() {
            Some(preload) if preload.version == self.config.module_version => Some(preload.clone()),
            Some(preload) => {
                debug!(cached = %preload.version, current = %self.config.module_version, "stale spell index");
                None
            }
            None => None,
        }
    }

    pub(crate) async fn store_preload(&self, preload: Arc<PreloadedIndex>) {
        *self.preload.write().await = Some(preload);
    }

    pub async fn invalidate_preload(&self) {
        *self.preload.write().await = None;
    }

    /// Resolves documents with at most `lookup_concurrency` in flight; results in input order.
    pub(crate) async fn lookup_documents(&self, uuids: &[String]) -> Vec<Result<Option<Document>, StoreError>> {
        let lookups = uuids.iter().map(|uuid| async move {
            let _permit = self
                .lookups
                .acquire()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            self.store.from_uuid(uuid).await
        });
        join_all(lookups).await
    }

    pub(crate) fn user_records(&self) -> &TtlCache<UserId, UserRecord> {
        &self.user_records
    }

    pub(crate) fn spell_views(&self) -> &TtlCache<(UserId, SpellUuid), SpellUserData> {
        &self.spell_views
    }
}
