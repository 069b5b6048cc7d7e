//! Host boundary traits.
//!
//! These are the only abstractions the engine couples to:
//! - `DocumentStore`: actors, items, flags, settings, compendium packs
//! - `HostUi`: users, dialogs, chat, notifications, templates

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HostError, StoreError};
use crate::ids::{ActorId, ClassId, ItemId, UserId};
use crate::model::{
    Actor, Document, IndexEntry, Item, JournalPage, PackInfo, PreparationMethod, Prepared,
};

/// Fields the engine may change on an owned spell item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_class: Option<ClassId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<PreparationMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepared: Option<Prepared>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub id: ItemId,
    pub patch: SpellPatch,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_actor(&self, id: &ActorId) -> Result<Option<Actor>, StoreError>;

    /// Creates items in one host call; returns the new ids in input order.
    async fn create_items(&self, actor: &ActorId, items: Vec<Item>) -> Result<Vec<ItemId>, StoreError>;
    async fn update_items(&self, actor: &ActorId, updates: Vec<ItemUpdate>) -> Result<(), StoreError>;
    async fn delete_items(&self, actor: &ActorId, ids: Vec<ItemId>) -> Result<(), StoreError>;

    async fn get_flag(&self, actor: &ActorId, scope: &str, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set_flag(&self, actor: &ActorId, scope: &str, key: &str, value: Value) -> Result<(), StoreError>;
    async fn unset_flag(&self, actor: &ActorId, scope: &str, key: &str) -> Result<(), StoreError>;

    async fn get_setting(&self, scope: &str, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set_setting(&self, scope: &str, key: &str, value: Value) -> Result<(), StoreError>;

    async fn packs(&self) -> Result<Vec<PackInfo>, StoreError>;
    /// Index read with a field projection; `None` when the pack does not exist.
    async fn pack_index(&self, pack: &str, fields: &[&str]) -> Result<Option<Vec<IndexEntry>>, StoreError>;
    /// Every journal page in a journal pack.
    async fn pack_pages(&self, pack: &str) -> Result<Vec<JournalPage>, StoreError>;
    async fn pack_document(&self, pack: &str, id: &str) -> Result<Option<Document>, StoreError>;
    /// Creates or replaces a page (matched by `_id`) in a journal pack.
    async fn upsert_page(&self, pack: &str, page: JournalPage) -> Result<(), StoreError>;

    async fn from_uuid(&self, uuid: &str) -> Result<Option<Document>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmDialog {
    pub title: String,
    pub content: String,
    pub confirm_label: String,
    pub cancel_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub is_gm: bool,
}

#[async_trait]
pub trait HostUi: Send + Sync {
    fn current_user(&self) -> UserInfo;
    async fn users(&self) -> Result<Vec<UserInfo>, HostError>;
    /// Blocks until the user answers; `true` means confirmed.
    async fn confirm(&self, dialog: ConfirmDialog) -> Result<bool, HostError>;
    async fn whisper(&self, content: String, recipients: Vec<UserId>) -> Result<(), HostError>;
    fn notify(&self, level: NoticeLevel, message: &str);
    async fn render_template(&self, name: &str, context: &Value) -> Result<String, HostError>;
}
