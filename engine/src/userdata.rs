//! Per-user spell notes, favorites and usage counters.
//!
//! Each user owns one journal page. The structured record lives in the page
//! flags with encoded UUID keys; the page content is an HTML rendering of the
//! same record, parsed back only when a page predates the current version.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::Core;
use crate::error::{CoreResult, StoreError};
use crate::ids::{decode_key, encode_key, ActorId, ItemId, SpellUuid, UserId};
use crate::model::{Document, JournalPage};

pub const DATA_VERSION: u32 = 2;
pub const JOURNAL_NAME: &str = "User Spell Data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageContext {
    Combat,
    Exploration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Usage {
    pub count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    pub combat: u32,
    pub exploration: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorSpellData {
    pub favorited: bool,
    pub usage: Usage,
}

impl ActorSpellData {
    fn is_empty(&self) -> bool {
        !self.favorited && self.usage == Usage::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpellUserData {
    pub notes: String,
    pub by_actor: BTreeMap<ActorId, ActorSpellData>,
}

impl SpellUserData {
    fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.by_actor.values().all(ActorSpellData::is_empty)
    }
}

/// One user's data, keyed by canonical UUID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    pub spells: BTreeMap<SpellUuid, SpellUserData>,
}

impl UserRecord {
    fn entry(&mut self, uuid: &SpellUuid) -> &mut SpellUserData {
        self.spells.entry(uuid.clone()).or_default()
    }

    fn prune(&mut self) {
        for data in self.spells.values_mut() {
            data.by_actor.retain(|_, d| !d.is_empty());
        }
        self.spells.retain(|_, d| !d.is_empty());
    }
}

/// Flag shape: keys are encoded at this boundary only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    user_id: UserId,
    #[serde(default)]
    data_version: Option<u32>,
    #[serde(default)]
    spells: BTreeMap<String, SpellUserData>,
}

impl StoredRecord {
    fn encode(user: &UserId, record: &UserRecord) -> Self {
        Self {
            user_id: user.clone(),
            data_version: Some(DATA_VERSION),
            spells: record.spells.iter().map(|(k, v)| (encode_key(k), v.clone())).collect(),
        }
    }

    fn decode(self) -> UserRecord {
        UserRecord {
            spells: self.spells.into_iter().map(|(k, v)| (decode_key(&k), v)).collect(),
        }
    }
}

/// A spell's data as one actor sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellView {
    pub notes: String,
    pub favorited: bool,
    pub usage: Usage,
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));

static ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<tr data-uuid="([^"]*)"(?: data-actor="([^"]*)")?>(.*?)</tr>"#).expect("row pattern")
});

static CELL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<td>(.*?)</td>").expect("cell pattern"));

/// Strips markup, including entity-escaped markup, and truncates to `max_chars`.
pub fn sanitize_notes(raw: &str, max_chars: usize) -> String {
    let plain = unescape(raw);
    let stripped = TAG_RE.replace_all(&plain, "");
    let text: String = stripped.chars().filter(|c| !matches!(c, '<' | '>')).collect();
    text.trim().chars().take(max_chars).collect::<String>().trim_end().to_string()
}

/// Host-viewable HTML of a record.
pub fn render_html(record: &UserRecord) -> String {
    let mut html = String::new();
    html.push_str("<h2>Spell Notes</h2>\n<table class=\"spell-notes\">\n<thead><tr><th>Spell</th><th>Notes</th></tr></thead>\n<tbody>\n");
    for (uuid, data) in record.spells.iter().filter(|(_, d)| !d.notes.is_empty()) {
        let _ = writeln!(
            html,
            "<tr data-uuid=\"{}\"><td>{}</td><td>{}</td></tr>",
            escape(uuid.as_str()),
            escape(uuid.as_str()),
            escape(&data.notes)
        );
    }
    html.push_str("</tbody>\n</table>\n<h2>Favorites and Usage</h2>\n<table class=\"spell-usage\">\n<thead><tr><th>Spell</th><th>Actor</th><th>Favorite</th><th>Uses</th><th>Combat</th><th>Exploration</th><th>Last Used</th></tr></thead>\n<tbody>\n");
    for (uuid, data) in &record.spells {
        for (actor, d) in &data.by_actor {
            let last = d.usage.last_used.map(|t| t.to_rfc3339()).unwrap_or_default();
            let _ = writeln!(
                html,
                "<tr data-uuid=\"{}\" data-actor=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(uuid.as_str()),
                escape(actor.as_str()),
                escape(uuid.as_str()),
                escape(actor.as_str()),
                if d.favorited { "yes" } else { "no" },
                d.usage.count,
                d.usage.combat,
                d.usage.exploration,
                last
            );
        }
    }
    html.push_str("</tbody>\n</table>\n");
    html
}

/// Inverse of [`render_html`]; unreadable rows are skipped.
pub fn parse_html(html: &str) -> UserRecord {
    let mut record = UserRecord::default();
    for row in ROW_RE.captures_iter(html) {
        let uuid = SpellUuid::new(unescape(&row[1]));
        let cells: Vec<String> = CELL_RE
            .captures_iter(&row[3])
            .map(|c| unescape(&c[1]))
            .collect();
        match row.get(2) {
            None => {
                if let Some(notes) = cells.get(1) {
                    record.entry(&uuid).notes = notes.clone();
                }
            }
            Some(actor) => {
                if cells.len() < 7 {
                    debug!(uuid = %uuid, "short usage row skipped");
                    continue;
                }
                let number = |s: &str| s.trim().parse::<u32>().unwrap_or(0);
                let last_used = DateTime::parse_from_rfc3339(cells[6].trim())
                    .ok()
                    .map(|t| t.with_timezone(&Utc));
                let data = ActorSpellData {
                    favorited: cells[2].trim() == "yes",
                    usage: Usage {
                        count: number(&cells[3]),
                        combat: number(&cells[4]),
                        exploration: number(&cells[5]),
                        last_used,
                    },
                };
                record
                    .entry(&uuid)
                    .by_actor
                    .insert(ActorId::new(unescape(actor.as_str())), data);
            }
        }
    }
    record.prune();
    record
}

fn page_id(user: &UserId) -> String {
    format!("user-{user}")
}

pub struct UserSpellData<'a> {
    core: &'a Core,
}

impl<'a> UserSpellData<'a> {
    pub(crate) fn new(core: &'a Core) -> Self {
        Self { core }
    }

    fn user(&self) -> UserId {
        self.core.host().current_user().id
    }

    /// Compendium source for an actor-owned UUID; other UUIDs pass through.
    pub async fn canonicalize(&self, uuid: &SpellUuid) -> CoreResult<SpellUuid> {
        let parts: Vec<&str> = uuid.as_str().split('.').collect();
        let ["Actor", actor, "Item", item] = parts.as_slice() else {
            return Ok(uuid.clone());
        };
        let Some(actor) = self.core.store().get_actor(&ActorId::new(*actor)).await? else {
            return Ok(uuid.clone());
        };
        Ok(actor
            .item(&ItemId::new(*item))
            .map(|i| i.canonical_uuid(&actor.id))
            .unwrap_or_else(|| uuid.clone()))
    }

    async fn read_page(&self, user: &UserId) -> Result<Option<JournalPage>, StoreError> {
        let pack = self.core.config().user_data_pack();
        match self.core.store().pack_document(&pack, &page_id(user)).await? {
            Some(Document::Page(page)) => Ok(Some(page)),
            Some(Document::Item(_)) => {
                warn!(user = %user, "user data id resolves to an item");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// The user's record, migrating an old page on first read.
    pub async fn record(&self, user: &UserId) -> CoreResult<UserRecord> {
        if let Some(record) = self.core.user_records().get(user).await {
            return Ok(record);
        }
        let Some(page) = self.read_page(user).await? else {
            debug!(user = %user, "no user data page");
            return Ok(UserRecord::default());
        };
        let stored = page
            .scoped_flags(self.core.scope())
            .map(|flags| serde_json::from_value::<StoredRecord>(Value::Object(flags.clone())));
        let record = match stored {
            Some(Ok(stored)) if stored.data_version == Some(DATA_VERSION) => stored.decode(),
            Some(Err(e)) => {
                warn!(user = %user, error = %e, "user data flags unreadable, rebuilding from content");
                self.migrate(user, &page).await?
            }
            _ => self.migrate(user, &page).await?,
        };
        self.core.user_records().put(user.clone(), record.clone()).await;
        Ok(record)
    }

    async fn migrate(&self, user: &UserId, page: &JournalPage) -> CoreResult<UserRecord> {
        let record = parse_html(&page.content);
        info!(user = %user, spells = record.spells.len(), "user data migrated from page content");
        self.write(user, &record).await?;
        Ok(record)
    }

    async fn write(&self, user: &UserId, record: &UserRecord) -> CoreResult<()> {
        let pack = self.core.config().user_data_pack();
        let scope = self.core.scope();
        let mut page = match self.read_page(user).await? {
            Some(page) => page,
            None => JournalPage {
                id: page_id(user),
                uuid: format!("Compendium.{pack}.JournalEntryPage.{}", page_id(user)),
                name: user.to_string(),
                page_type: "text".to_string(),
                system: Value::Null,
                flags: Default::default(),
                content: String::new(),
                folder: None,
                journal: Some(JOURNAL_NAME.to_string()),
            },
        };
        let stored = serde_json::to_value(StoredRecord::encode(user, record)).map_err(StoreError::from)?;
        if let Value::Object(map) = stored {
            page.flags.insert(scope.to_string(), Value::Object(map));
        }
        page.content = render_html(record);
        self.core.store().upsert_page(&pack, page).await?;
        self.core.user_records().put(user.clone(), record.clone()).await;
        let owner = user.clone();
        self.core.spell_views().invalidate_where(|(u, _)| u == &owner).await;
        Ok(())
    }

    async fn update<T>(&self, edit: impl FnOnce(&mut UserRecord) -> T) -> CoreResult<T> {
        let user = self.user();
        let mut record = self.record(&user).await?;
        let out = edit(&mut record);
        record.prune();
        self.write(&user, &record).await?;
        Ok(out)
    }

    /// Stores sanitized notes; returns what was kept.
    pub async fn set_notes(&self, uuid: &SpellUuid, notes: &str) -> CoreResult<String> {
        let uuid = self.canonicalize(uuid).await?;
        let max = self.core.settings().notes_length().await?;
        let clean = sanitize_notes(notes, max);
        let kept = clean.clone();
        self.update(move |record| record.entry(&uuid).notes = clean).await?;
        Ok(kept)
    }

    pub async fn set_favorite(&self, uuid: &SpellUuid, actor: &ActorId, favorited: bool) -> CoreResult<()> {
        let uuid = self.canonicalize(uuid).await?;
        self.update(|record| {
            record
                .entry(&uuid)
                .by_actor
                .entry(actor.clone())
                .or_default()
                .favorited = favorited;
        })
        .await
    }

    /// Makes `favorites` the actor's exact favorite set with one read and one write.
    ///
    /// Returns the number of spells whose flag changed.
    pub async fn sync_actor_favorites(&self, actor: &ActorId, favorites: &[SpellUuid]) -> CoreResult<usize> {
        let mut wanted = Vec::with_capacity(favorites.len());
        for uuid in favorites {
            wanted.push(self.canonicalize(uuid).await?);
        }
        let user = self.user();
        let mut record = self.record(&user).await?;
        let mut changed = 0;
        for (uuid, data) in record.spells.iter_mut() {
            let should = wanted.contains(uuid);
            let entry = data.by_actor.entry(actor.clone()).or_default();
            if entry.favorited != should {
                entry.favorited = should;
                changed += 1;
            }
        }
        for uuid in &wanted {
            if !record.spells.contains_key(uuid) {
                record.entry(uuid).by_actor.entry(actor.clone()).or_default().favorited = true;
                changed += 1;
            }
        }
        if changed == 0 {
            return Ok(0);
        }
        record.prune();
        self.write(&user, &record).await?;
        debug!(actor = %actor, changed, "favorites synced");
        Ok(changed)
    }

    pub async fn record_usage(&self, uuid: &SpellUuid, actor: &ActorId, context: UsageContext) -> CoreResult<Usage> {
        let uuid = self.canonicalize(uuid).await?;
        let now = Utc::now();
        self.update(|record| {
            let usage = &mut record.entry(&uuid).by_actor.entry(actor.clone()).or_default().usage;
            usage.count += 1;
            usage.last_used = Some(now);
            match context {
                UsageContext::Combat => usage.combat += 1,
                UsageContext::Exploration => usage.exploration += 1,
            }
            usage.clone()
        })
        .await
    }

    pub async fn favorites(&self, actor: &ActorId) -> CoreResult<Vec<SpellUuid>> {
        let record = self.record(&self.user()).await?;
        Ok(record
            .spells
            .into_iter()
            .filter(|(_, d)| d.by_actor.get(actor).is_some_and(|a| a.favorited))
            .map(|(uuid, _)| uuid)
            .collect())
    }

    pub async fn spell_view(&self, uuid: &SpellUuid, actor: Option<&ActorId>) -> CoreResult<SpellView> {
        let uuid = self.canonicalize(uuid).await?;
        let user = self.user();
        let key = (user.clone(), uuid.clone());
        let data = match self.core.spell_views().get(&key).await {
            Some(data) => data,
            None => {
                let data = self.record(&user).await?.spells.remove(&uuid).unwrap_or_default();
                self.core.spell_views().put(key, data.clone()).await;
                data
            }
        };
        let per_actor = actor.and_then(|a| data.by_actor.get(a)).cloned().unwrap_or_default();
        Ok(SpellView {
            notes: data.notes,
            favorited: per_actor.favorited,
            usage: per_actor.usage,
        })
    }
}
