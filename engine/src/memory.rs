//! In-memory host: a `DocumentStore` and `HostUi` over a world snapshot.
//!
//! Backs the integration tests and the CLI harness. Every mutation is logged
//! in order so callers can check what the engine asked the host to do.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::context::Core;
use crate::error::{HostError, StoreError};
use crate::ids::{ActorId, ClassId, ItemId, SpellUuid, UserId};
use crate::lists::ListType;
use crate::model::{
    Ability, Actor, ClassData, Document, IndexEntry, Item, ItemKind, JournalPage, OwnershipLevel,
    PackInfo, PackKind, Progression, ScaleTable, SpellData, SubclassData,
};
use crate::settings::CoreConfig;
use crate::store::{ConfirmDialog, DocumentStore, HostUi, ItemUpdate, NoticeLevel, UserInfo};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackSnapshot {
    pub id: String,
    pub label: String,
    pub kind: PackKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Item>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<JournalPage>,
}

type ScopedValues = IndexMap<String, IndexMap<String, Value>>;

/// Serializable state of a world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorldSnapshot {
    pub users: Vec<UserInfo>,
    pub current_user: Option<UserId>,
    pub actors: Vec<Actor>,
    /// actor -> scope -> key -> value
    pub flags: IndexMap<ActorId, ScopedValues>,
    /// scope -> key -> value
    pub settings: ScopedValues,
    pub packs: Vec<PackSnapshot>,
}

impl WorldSnapshot {
    fn is_yaml(path: &Path) -> bool {
        matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"))
    }

    /// Reads a JSON or YAML snapshot (chosen by extension).
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read world snapshot: {}", path.display()))?;
        if Self::is_yaml(path) {
            serde_yaml::from_str(&text)
                .with_context(|| format!("failed to parse world YAML: {}", path.display()))
        } else {
            Self::from_json(&text).with_context(|| format!("failed to parse world JSON: {}", path.display()))
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = if Self::is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        fs::write(path, text).with_context(|| format!("failed to write world snapshot: {}", path.display()))
    }
}

/// One host call the engine made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateItems { actor: ActorId, ids: Vec<ItemId> },
    UpdateItems { actor: ActorId, ids: Vec<ItemId> },
    DeleteItems { actor: ActorId, ids: Vec<ItemId> },
    SetFlag { actor: ActorId, key: String },
    UnsetFlag { actor: ActorId, key: String },
    SetSetting { key: String },
    UpsertPage { pack: String, id: String },
}

impl Mutation {
    pub fn is_item_call(&self) -> bool {
        matches!(self, Self::CreateItems { .. } | Self::UpdateItems { .. } | Self::DeleteItems { .. })
    }
}

#[derive(Default)]
struct World {
    snapshot: WorldSnapshot,
    mutations: Vec<Mutation>,
    next_id: u64,
    reject_next: Option<String>,
}

impl World {
    fn actor_mut(&mut self, id: &ActorId) -> Result<&mut Actor, StoreError> {
        self.snapshot
            .actors
            .iter_mut()
            .find(|a| &a.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("Actor.{id}")))
    }

    fn pack(&self, id: &str) -> Option<&PackSnapshot> {
        self.snapshot.packs.iter().find(|p| p.id == id)
    }

    fn take_rejection(&mut self) -> Result<(), StoreError> {
        match self.reject_next.take() {
            Some(reason) => Err(StoreError::Rejected(reason)),
            None => Ok(()),
        }
    }
}

/// Keeps only the `system.*` fields named in `fields`.
fn project(system: &Value, fields: &[&str]) -> Value {
    let Value::Object(map) = system else {
        return Value::Null;
    };
    let wanted: Vec<&str> = fields.iter().filter_map(|f| f.strip_prefix("system.")).collect();
    Value::Object(
        map.iter()
            .filter(|(k, _)| wanted.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

pub struct MemoryStore {
    world: RwLock<World>,
}

impl MemoryStore {
    pub fn new(snapshot: WorldSnapshot) -> Self {
        Self {
            world: RwLock::new(World {
                snapshot,
                ..World::default()
            }),
        }
    }

    pub async fn snapshot(&self) -> WorldSnapshot {
        self.world.read().await.snapshot.clone()
    }

    pub async fn mutations(&self) -> Vec<Mutation> {
        self.world.read().await.mutations.clone()
    }

    pub async fn clear_mutations(&self) {
        self.world.write().await.mutations.clear();
    }

    /// The next item create, update or delete fails with `reason`.
    pub async fn reject_next_item_call(&self, reason: &str) {
        self.world.write().await.reject_next = Some(reason.to_string());
    }

    /// Direct edit of an actor, bypassing the mutation log.
    pub async fn edit_actor(&self, id: &ActorId, edit: impl FnOnce(&mut Actor)) -> Result<(), StoreError> {
        let mut world = self.world.write().await;
        edit(world.actor_mut(id)?);
        Ok(())
    }

    pub async fn flag(&self, actor: &ActorId, scope: &str, key: &str) -> Option<Value> {
        let world = self.world.read().await;
        world.snapshot.flags.get(actor)?.get(scope)?.get(key).cloned()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_actor(&self, id: &ActorId) -> Result<Option<Actor>, StoreError> {
        let world = self.world.read().await;
        Ok(world.snapshot.actors.iter().find(|a| &a.id == id).cloned())
    }

    async fn create_items(&self, actor: &ActorId, items: Vec<Item>) -> Result<Vec<ItemId>, StoreError> {
        let mut world = self.world.write().await;
        world.take_rejection()?;
        let mut ids = Vec::with_capacity(items.len());
        let mut created = Vec::with_capacity(items.len());
        for mut item in items {
            world.next_id += 1;
            item.id = ItemId::new(format!("gen{:04}", world.next_id));
            ids.push(item.id.clone());
            created.push(item);
        }
        world.actor_mut(actor)?.items.extend(created);
        world.mutations.push(Mutation::CreateItems {
            actor: actor.clone(),
            ids: ids.clone(),
        });
        debug!(actor = %actor, count = ids.len(), "items created");
        Ok(ids)
    }

    async fn update_items(&self, actor: &ActorId, updates: Vec<ItemUpdate>) -> Result<(), StoreError> {
        let mut world = self.world.write().await;
        world.take_rejection()?;
        let target = world.actor_mut(actor)?;
        let mut ids = Vec::with_capacity(updates.len());
        for update in updates {
            let item = target
                .items
                .iter_mut()
                .find(|i| i.id == update.id)
                .ok_or_else(|| StoreError::NotFound(format!("Actor.{actor}.Item.{}", update.id)))?;
            let Some(spell) = item.spell_mut() else {
                return Err(StoreError::Rejected(format!("item {} is not a spell", update.id)));
            };
            if let Some(class) = update.patch.source_class {
                spell.source_class = Some(class);
            }
            if let Some(method) = update.patch.method {
                spell.method = method;
            }
            if let Some(prepared) = update.patch.prepared {
                spell.prepared = prepared;
            }
            ids.push(update.id);
        }
        world.mutations.push(Mutation::UpdateItems {
            actor: actor.clone(),
            ids,
        });
        Ok(())
    }

    async fn delete_items(&self, actor: &ActorId, ids: Vec<ItemId>) -> Result<(), StoreError> {
        let mut world = self.world.write().await;
        world.take_rejection()?;
        world.actor_mut(actor)?.items.retain(|i| !ids.contains(&i.id));
        world.mutations.push(Mutation::DeleteItems {
            actor: actor.clone(),
            ids,
        });
        Ok(())
    }

    async fn get_flag(&self, actor: &ActorId, scope: &str, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.flag(actor, scope, key).await)
    }

    async fn set_flag(&self, actor: &ActorId, scope: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let mut world = self.world.write().await;
        world
            .snapshot
            .flags
            .entry(actor.clone())
            .or_default()
            .entry(scope.to_string())
            .or_default()
            .insert(key.to_string(), value);
        world.mutations.push(Mutation::SetFlag {
            actor: actor.clone(),
            key: key.to_string(),
        });
        Ok(())
    }

    async fn unset_flag(&self, actor: &ActorId, scope: &str, key: &str) -> Result<(), StoreError> {
        let mut world = self.world.write().await;
        if let Some(values) = world.snapshot.flags.get_mut(actor).and_then(|f| f.get_mut(scope)) {
            values.shift_remove(key);
        }
        world.mutations.push(Mutation::UnsetFlag {
            actor: actor.clone(),
            key: key.to_string(),
        });
        Ok(())
    }

    async fn get_setting(&self, scope: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let world = self.world.read().await;
        Ok(world.snapshot.settings.get(scope).and_then(|s| s.get(key)).cloned())
    }

    async fn set_setting(&self, scope: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let mut world = self.world.write().await;
        world
            .snapshot
            .settings
            .entry(scope.to_string())
            .or_default()
            .insert(key.to_string(), value);
        world.mutations.push(Mutation::SetSetting { key: key.to_string() });
        Ok(())
    }

    async fn packs(&self) -> Result<Vec<PackInfo>, StoreError> {
        let world = self.world.read().await;
        Ok(world
            .snapshot
            .packs
            .iter()
            .map(|p| PackInfo {
                id: p.id.clone(),
                label: p.label.clone(),
                kind: p.kind,
            })
            .collect())
    }

    async fn pack_index(&self, pack: &str, fields: &[&str]) -> Result<Option<Vec<IndexEntry>>, StoreError> {
        let world = self.world.read().await;
        let Some(pack) = world.pack(pack) else {
            return Ok(None);
        };
        let mut entries = Vec::with_capacity(pack.items.len());
        for item in &pack.items {
            let raw = serde_json::to_value(item)?;
            entries.push(IndexEntry {
                id: item.id.to_string(),
                uuid: SpellUuid::new(format!("Compendium.{}.Item.{}", pack.id, item.id)),
                name: item.name.clone(),
                doc_type: item.item_type().to_string(),
                img: item.img.clone(),
                system: project(&raw["system"], fields),
            });
        }
        Ok(Some(entries))
    }

    async fn pack_pages(&self, pack: &str) -> Result<Vec<JournalPage>, StoreError> {
        let world = self.world.read().await;
        Ok(world.pack(pack).map(|p| p.pages.clone()).unwrap_or_default())
    }

    async fn pack_document(&self, pack: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let world = self.world.read().await;
        let Some(pack) = world.pack(pack) else {
            return Ok(None);
        };
        if let Some(item) = pack.items.iter().find(|i| i.id.as_str() == id) {
            return Ok(Some(Document::Item(item.clone())));
        }
        Ok(pack.pages.iter().find(|p| p.id == id).cloned().map(Document::Page))
    }

    async fn upsert_page(&self, pack: &str, page: JournalPage) -> Result<(), StoreError> {
        let mut world = self.world.write().await;
        let id = page.id.clone();
        let packs = &mut world.snapshot.packs;
        let index = match packs.iter().position(|p| p.id == pack) {
            Some(index) => index,
            None => {
                packs.push(PackSnapshot {
                    id: pack.to_string(),
                    label: pack.to_string(),
                    kind: PackKind::JournalEntry,
                    ..PackSnapshot::default()
                });
                packs.len() - 1
            }
        };
        let pages = &mut packs[index].pages;
        match pages.iter_mut().find(|p| p.id == id) {
            Some(existing) => *existing = page,
            None => pages.push(page),
        }
        world.mutations.push(Mutation::UpsertPage {
            pack: pack.to_string(),
            id,
        });
        Ok(())
    }

    async fn from_uuid(&self, uuid: &str) -> Result<Option<Document>, StoreError> {
        let parts: Vec<&str> = uuid.split('.').collect();
        if let ["Actor", actor, "Item", item] = parts.as_slice() {
            let world = self.world.read().await;
            return Ok(world
                .snapshot
                .actors
                .iter()
                .find(|a| a.id.as_str() == *actor)
                .and_then(|a| a.item(&ItemId::new(*item)))
                .cloned()
                .map(Document::Item));
        }
        let parsed = SpellUuid::new(uuid);
        let Some(pack) = parsed.pack_id() else {
            return Ok(None);
        };
        {
            let world = self.world.read().await;
            if let Some(page) = world.pack(&pack).and_then(|p| p.pages.iter().find(|p| p.uuid == uuid)) {
                return Ok(Some(Document::Page(page.clone())));
            }
        }
        self.pack_document(&pack, parsed.document_id()).await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scripted interactive surface; records what the engine showed.
pub struct MemoryHost {
    users: Vec<UserInfo>,
    current: Mutex<UserId>,
    answers: Mutex<VecDeque<bool>>,
    dialogs: Mutex<Vec<ConfirmDialog>>,
    notices: Mutex<Vec<(NoticeLevel, String)>>,
    whispers: Mutex<Vec<(String, Vec<UserId>)>>,
    fail_whisper: Mutex<bool>,
}

impl MemoryHost {
    pub fn new(users: Vec<UserInfo>, current: UserId) -> Self {
        Self {
            users,
            current: Mutex::new(current),
            answers: Mutex::new(VecDeque::new()),
            dialogs: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
            whispers: Mutex::new(Vec::new()),
            fail_whisper: Mutex::new(false),
        }
    }

    /// Makes the next whisper fail with a chat error.
    pub fn fail_next_whisper(&self) {
        *lock(&self.fail_whisper) = true;
    }

    pub fn set_current_user(&self, user: &UserId) {
        *lock(&self.current) = user.clone();
    }

    /// Queues the answer to the next dialog. Unqueued dialogs are confirmed.
    pub fn answer_next(&self, confirm: bool) {
        lock(&self.answers).push_back(confirm);
    }

    pub fn dialogs(&self) -> Vec<ConfirmDialog> {
        lock(&self.dialogs).clone()
    }

    pub fn notices(&self) -> Vec<(NoticeLevel, String)> {
        lock(&self.notices).clone()
    }

    pub fn whispers(&self) -> Vec<(String, Vec<UserId>)> {
        lock(&self.whispers).clone()
    }
}

#[async_trait]
impl HostUi for MemoryHost {
    fn current_user(&self) -> UserInfo {
        let id = lock(&self.current).clone();
        self.users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .unwrap_or(UserInfo {
                name: id.to_string(),
                id,
                is_gm: false,
            })
    }

    async fn users(&self) -> Result<Vec<UserInfo>, HostError> {
        Ok(self.users.clone())
    }

    async fn confirm(&self, dialog: ConfirmDialog) -> Result<bool, HostError> {
        lock(&self.dialogs).push(dialog);
        Ok(lock(&self.answers).pop_front().unwrap_or(true))
    }

    async fn whisper(&self, content: String, recipients: Vec<UserId>) -> Result<(), HostError> {
        if std::mem::take(&mut *lock(&self.fail_whisper)) {
            return Err(HostError::Chat("whisper rejected".to_string()));
        }
        lock(&self.whispers).push((content, recipients));
        Ok(())
    }

    fn notify(&self, level: NoticeLevel, message: &str) {
        lock(&self.notices).push((level, message.to_string()));
    }

    async fn render_template(&self, name: &str, context: &Value) -> Result<String, HostError> {
        serde_json::to_string(&json!({ "template": name, "context": context })).map_err(|e| HostError::Template {
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}

/// Fluent construction of a world for tests and demos.
pub struct WorldBuilder {
    snapshot: WorldSnapshot,
    config: CoreConfig,
}

impl Default for WorldBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldBuilder {
    /// A world with one GM (`gm`) who is the current user.
    pub fn new() -> Self {
        let gm = UserInfo {
            id: UserId::new("gm"),
            name: "Game Master".to_string(),
            is_gm: true,
        };
        Self {
            snapshot: WorldSnapshot {
                current_user: Some(gm.id.clone()),
                users: vec![gm],
                ..WorldSnapshot::default()
            },
            config: CoreConfig::default(),
        }
    }

    pub fn from_snapshot(snapshot: WorldSnapshot) -> Self {
        Self {
            snapshot,
            config: CoreConfig::default(),
        }
    }

    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn user(mut self, id: &str, is_gm: bool) -> Self {
        self.snapshot.users.push(UserInfo {
            id: UserId::new(id),
            name: id.to_string(),
            is_gm,
        });
        self
    }

    pub fn current_user(mut self, id: &str) -> Self {
        self.snapshot.current_user = Some(UserId::new(id));
        self
    }

    pub fn actor(mut self, actor: Actor) -> Self {
        self.snapshot.actors.push(actor);
        self
    }

    pub fn item_pack(mut self, id: &str, items: Vec<Item>) -> Self {
        self.snapshot.packs.push(PackSnapshot {
            id: id.to_string(),
            label: id.to_string(),
            kind: PackKind::Item,
            items,
            pages: Vec::new(),
        });
        self
    }

    pub fn journal_pack(mut self, id: &str, pages: Vec<JournalPage>) -> Self {
        self.snapshot.packs.push(PackSnapshot {
            id: id.to_string(),
            label: id.to_string(),
            kind: PackKind::JournalEntry,
            items: Vec::new(),
            pages,
        });
        self
    }

    /// World setting in the engine's namespace.
    pub fn setting(mut self, key: &str, value: Value) -> Self {
        self.snapshot
            .settings
            .entry(self.config.module_id.clone())
            .or_default()
            .insert(key.to_string(), value);
        self
    }

    /// Actor flag in the engine's namespace.
    pub fn flag(mut self, actor: &str, key: &str, value: Value) -> Self {
        self.snapshot
            .flags
            .entry(ActorId::new(actor))
            .or_default()
            .entry(self.config.module_id.clone())
            .or_default()
            .insert(key.to_string(), value);
        self
    }

    pub fn snapshot(self) -> WorldSnapshot {
        self.snapshot
    }

    pub fn build(self) -> MemoryWorld {
        let current = self
            .snapshot
            .current_user
            .clone()
            .or_else(|| self.snapshot.users.first().map(|u| u.id.clone()))
            .unwrap_or_else(|| UserId::new("gm"));
        let host = Arc::new(MemoryHost::new(self.snapshot.users.clone(), current));
        let store = Arc::new(MemoryStore::new(self.snapshot));
        let core = Core::new(store.clone(), host.clone(), self.config);
        MemoryWorld { core, store, host }
    }
}

/// A built world: the engine plus handles on its host.
pub struct MemoryWorld {
    pub core: Core,
    pub store: Arc<MemoryStore>,
    pub host: Arc<MemoryHost>,
}

pub mod fixtures {
    //! Constructors for host documents.

    use super::*;

    pub fn spell(id: &str, name: &str, level: u8) -> Item {
        spell_with(id, name, level, |_| {})
    }

    pub fn spell_with(id: &str, name: &str, level: u8, edit: impl FnOnce(&mut SpellData)) -> Item {
        let mut data = SpellData {
            level,
            school: "evo".to_string(),
            ..SpellData::default()
        };
        edit(&mut data);
        Item {
            id: ItemId::new(id),
            name: name.to_string(),
            img: None,
            kind: ItemKind::Spell(data),
        }
    }

    /// A copy of a compendium spell as owned by an actor.
    pub fn owned(id: &str, source: &Item, pack: &str, edit: impl FnOnce(&mut SpellData)) -> Item {
        let mut item = source.clone();
        item.id = ItemId::new(id);
        if let Some(spell) = item.spell_mut() {
            spell.compendium_source = Some(compendium_uuid(pack, source));
            edit(spell);
        }
        item
    }

    pub fn compendium_uuid(pack: &str, item: &Item) -> SpellUuid {
        SpellUuid::new(format!("Compendium.{pack}.Item.{}", item.id))
    }

    pub fn class(identifier: &str, levels: u32, progression: Progression, ability: Option<Ability>) -> Item {
        Item {
            id: ItemId::new(format!("class-{identifier}")),
            name: identifier.to_string(),
            img: None,
            kind: ItemKind::Class(ClassData {
                identifier: ClassId::new(identifier),
                levels,
                progression,
                ability,
                preparation_max: None,
                compendium_source: None,
                scale: IndexMap::new(),
            }),
        }
    }

    /// Adds a `cantrips-known` scale to a class item.
    pub fn with_cantrips(mut class: Item, table: &[(u32, i32)]) -> Item {
        if let ItemKind::Class(data) = &mut class.kind {
            data.scale.insert(
                "cantrips-known".to_string(),
                ScaleTable(table.iter().copied().collect()),
            );
        }
        class
    }

    pub fn subclass(identifier: &str, class: &str, progression: Option<Progression>) -> Item {
        Item {
            id: ItemId::new(format!("subclass-{identifier}")),
            name: identifier.to_string(),
            img: None,
            kind: ItemKind::Subclass(SubclassData {
                identifier: ClassId::new(identifier),
                class_identifier: ClassId::new(class),
                progression,
            }),
        }
    }

    /// An actor owned by `owner` (if any).
    pub fn actor(id: &str, name: &str, owner: Option<&str>, items: Vec<Item>) -> Actor {
        Actor {
            id: ActorId::new(id),
            name: name.to_string(),
            img: None,
            token: None,
            abilities: Default::default(),
            ownership: owner
                .map(|u| IndexMap::from([(UserId::new(u), OwnershipLevel::Owner)]))
                .unwrap_or_default(),
            default_ownership: OwnershipLevel::None,
            items,
        }
    }

    pub fn list_page(pack: &str, id: &str, name: &str, identifier: &str, list_type: ListType, spells: &[SpellUuid]) -> JournalPage {
        JournalPage {
            id: id.to_string(),
            uuid: format!("Compendium.{pack}.JournalEntry.lists.JournalEntryPage.{id}"),
            name: name.to_string(),
            page_type: "spells".to_string(),
            system: json!({
                "identifier": identifier,
                "type": list_type,
                "spells": spells,
            }),
            flags: Default::default(),
            content: String::new(),
            folder: None,
            journal: Some("lists".to_string()),
        }
    }
}
