//! Validated shapes of the host documents the engine reads.
//!
//! Raw host JSON is converted once at the adapter boundary; everything above
//! works on these records with explicit optionality.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ActorId, ClassId, ItemId, SpellUuid, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ability {
    Str,
    Dex,
    Con,
    Int,
    Wis,
    Cha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScores {
    #[serde(rename = "str")]
    pub str_: i32,
    pub dex: i32,
    pub con: i32,
    #[serde(rename = "int")]
    pub int_: i32,
    pub wis: i32,
    pub cha: i32,
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self {
            str_: 10,
            dex: 10,
            con: 10,
            int_: 10,
            wis: 10,
            cha: 10,
        }
    }
}

impl AbilityScores {
    pub fn score(&self, ability: Ability) -> i32 {
        match ability {
            Ability::Str => self.str_,
            Ability::Dex => self.dex,
            Ability::Con => self.con,
            Ability::Int => self.int_,
            Ability::Wis => self.wis,
            Ability::Cha => self.cha,
        }
    }

    pub fn mod_of(&self, ability: Ability) -> i32 {
        ability_mod(self.score(ability))
    }
}

/// D&D ability modifier = floor((score - 10) / 2) for integer scores.
pub fn ability_mod(score: i32) -> i32 {
    // `div_euclid` with positive divisor matches mathematical floor division.
    (score - 10).div_euclid(2)
}

/// Runtime casting mode of an owned spell item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreparationMethod {
    #[default]
    Spell,
    Ritual,
    Pact,
    Innate,
    #[serde(rename = "atwill")]
    AtWill,
    Always,
    Granted,
}

impl PreparationMethod {
    /// Modes the engine never rewrites.
    pub fn is_immutable(self) -> bool {
        matches!(self, Self::Innate | Self::AtWill | Self::Always | Self::Granted)
    }
}

impl fmt::Display for PreparationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Spell => "spell",
            Self::Ritual => "ritual",
            Self::Pact => "pact",
            Self::Innate => "innate",
            Self::AtWill => "atwill",
            Self::Always => "always",
            Self::Granted => "granted",
        };
        f.write_str(s)
    }
}

/// The host's `prepared` field: 0, 1 or 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Prepared {
    #[default]
    Unprepared,
    Prepared,
    Always,
}

impl TryFrom<u8> for Prepared {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unprepared),
            1 => Ok(Self::Prepared),
            2 => Ok(Self::Always),
            other => Err(format!("invalid prepared value {other}")),
        }
    }
}

impl From<Prepared> for u8 {
    fn from(value: Prepared) -> Self {
        match value {
            Prepared::Unprepared => 0,
            Prepared::Prepared => 1,
            Prepared::Always => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Components {
    pub vocal: bool,
    pub somatic: bool,
    pub material: bool,
    pub concentration: bool,
    pub ritual: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpellData {
    pub level: u8,
    #[serde(default)]
    pub school: String,
    #[serde(default)]
    pub components: Components,
    #[serde(default)]
    pub method: PreparationMethod,
    #[serde(default)]
    pub prepared: Prepared,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_class: Option<ClassId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_for: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compendium_source: Option<SpellUuid>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Activity descriptors (`damage`, `healing`, `save`, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl SpellData {
    pub fn is_cantrip(&self) -> bool {
        self.level == 0
    }

    pub fn is_ritual(&self) -> bool {
        self.components.ritual
    }

    pub fn is_granted(&self) -> bool {
        self.cached_for.is_some() || self.method == PreparationMethod::Granted
    }

    /// Always-prepared, granted, innate or at-will: never touched by the engine.
    pub fn is_immutable(&self) -> bool {
        self.prepared == Prepared::Always || self.cached_for.is_some() || self.method.is_immutable()
    }

    pub fn is_prepared_copy(&self) -> bool {
        self.method != PreparationMethod::Ritual && self.prepared == Prepared::Prepared
    }

    pub fn is_ritual_copy(&self) -> bool {
        self.method == PreparationMethod::Ritual && self.prepared == Prepared::Unprepared
    }
}

/// Spellcasting progression of a class or subclass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Progression {
    #[default]
    None,
    Full,
    Half,
    Third,
    Pact,
    Artificer,
    Custom(String),
}

impl From<String> for Progression {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "" | "none" => Self::None,
            "full" => Self::Full,
            "half" => Self::Half,
            "third" => Self::Third,
            "pact" => Self::Pact,
            "artificer" => Self::Artificer,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<Progression> for String {
    fn from(value: Progression) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Progression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Full => f.write_str("full"),
            Self::Half => f.write_str("half"),
            Self::Third => f.write_str("third"),
            Self::Pact => f.write_str("pact"),
            Self::Artificer => f.write_str("artificer"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// Level-indexed scale value (the host's ScaleValue advancement).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScaleTable(pub BTreeMap<u32, i32>);

impl ScaleTable {
    /// Value of the highest threshold at or below `level`.
    pub fn value_at(&self, level: u32) -> Option<i32> {
        self.0.range(..=level).next_back().map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassData {
    pub identifier: ClassId,
    #[serde(default = "one")]
    pub levels: u32,
    #[serde(default)]
    pub progression: Progression,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ability: Option<Ability>,
    /// Host-computed preparation maximum, when the host provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preparation_max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compendium_source: Option<SpellUuid>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub scale: IndexMap<String, ScaleTable>,
}

fn one() -> u32 {
    1
}

impl ClassData {
    /// Top-level package the class item was imported from.
    pub fn source_package(&self) -> Option<&str> {
        self.compendium_source.as_ref().and_then(|uuid| uuid.package())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubclassData {
    pub identifier: ClassId,
    pub class_identifier: ClassId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progression: Option<Progression>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Spell(SpellData),
    Class(ClassData),
    Subclass(SubclassData),
    Other { item_type: String, system: Value },
}

/// An item owned by an actor (or living in a pack).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawItem", into = "RawItem")]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub img: Option<String>,
    pub kind: ItemKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawItem {
    #[serde(rename = "_id")]
    id: ItemId,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    img: Option<String>,
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    system: Value,
}

impl TryFrom<RawItem> for Item {
    type Error = serde_json::Error;

    fn try_from(raw: RawItem) -> Result<Self, Self::Error> {
        let kind = match raw.item_type.as_str() {
            "spell" => ItemKind::Spell(serde_json::from_value(raw.system)?),
            "class" => ItemKind::Class(serde_json::from_value(raw.system)?),
            "subclass" => ItemKind::Subclass(serde_json::from_value(raw.system)?),
            _ => ItemKind::Other {
                item_type: raw.item_type,
                system: raw.system,
            },
        };
        Ok(Item {
            id: raw.id,
            name: raw.name,
            img: raw.img,
            kind,
        })
    }
}

impl From<Item> for RawItem {
    fn from(item: Item) -> Self {
        let (item_type, system) = match item.kind {
            ItemKind::Spell(data) => ("spell".to_string(), serde_json::to_value(data)),
            ItemKind::Class(data) => ("class".to_string(), serde_json::to_value(data)),
            ItemKind::Subclass(data) => ("subclass".to_string(), serde_json::to_value(data)),
            ItemKind::Other { item_type, system } => (item_type, Ok(system)),
        };
        RawItem {
            id: item.id,
            name: item.name,
            img: item.img,
            item_type,
            system: system.unwrap_or(Value::Null),
        }
    }
}

impl Item {
    pub fn spell(&self) -> Option<&SpellData> {
        match &self.kind {
            ItemKind::Spell(data) => Some(data),
            _ => None,
        }
    }

    pub fn spell_mut(&mut self) -> Option<&mut SpellData> {
        match &mut self.kind {
            ItemKind::Spell(data) => Some(data),
            _ => None,
        }
    }

    pub fn class(&self) -> Option<&ClassData> {
        match &self.kind {
            ItemKind::Class(data) => Some(data),
            _ => None,
        }
    }

    pub fn subclass(&self) -> Option<&SubclassData> {
        match &self.kind {
            ItemKind::Subclass(data) => Some(data),
            _ => None,
        }
    }

    pub fn item_type(&self) -> &str {
        match &self.kind {
            ItemKind::Spell(_) => "spell",
            ItemKind::Class(_) => "class",
            ItemKind::Subclass(_) => "subclass",
            ItemKind::Other { item_type, .. } => item_type,
        }
    }

    /// Compendium source when present, else the item's own UUID on `owner`.
    pub fn canonical_uuid(&self, owner: &ActorId) -> SpellUuid {
        match self.spell().and_then(|s| s.compendium_source.clone()) {
            Some(source) => source,
            None => SpellUuid::new(format!("Actor.{}.Item.{}", owner, self.id)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnershipLevel {
    #[default]
    None,
    Limited,
    Observer,
    Owner,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[serde(rename = "_id")]
    pub id: ActorId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub abilities: AbilityScores,
    #[serde(default)]
    pub ownership: IndexMap<UserId, OwnershipLevel>,
    #[serde(default)]
    pub default_ownership: OwnershipLevel,
    #[serde(default)]
    pub items: Vec<Item>,
}

/// A class item together with the subclass that may supply its progression.
#[derive(Debug, Clone, Copy)]
pub struct ClassEntry<'a> {
    pub item: &'a Item,
    pub data: &'a ClassData,
    pub subclass: Option<&'a SubclassData>,
}

impl ClassEntry<'_> {
    pub fn id(&self) -> &ClassId {
        &self.data.identifier
    }

    /// Base class progression, or the subclass's when the base has none.
    pub fn progression(&self) -> Progression {
        match (&self.data.progression, self.subclass) {
            (Progression::None, Some(sub)) => sub.progression.clone().unwrap_or_default(),
            (p, _) => p.clone(),
        }
    }

    pub fn is_spellcaster(&self) -> bool {
        self.progression() != Progression::None
    }
}

impl Actor {
    /// Total character level across classes.
    pub fn level(&self) -> u32 {
        self.classes().map(|c| c.data.levels).sum()
    }

    pub fn classes(&self) -> impl Iterator<Item = ClassEntry<'_>> + '_ {
        self.items.iter().filter_map(move |item| {
            let data = item.class()?;
            Some(ClassEntry {
                item,
                data,
                subclass: self.subclass_for(&data.identifier),
            })
        })
    }

    pub fn spellcasting_classes(&self) -> impl Iterator<Item = ClassEntry<'_>> + '_ {
        self.classes().filter(|c| c.is_spellcaster())
    }

    pub fn class(&self, id: &ClassId) -> Option<ClassEntry<'_>> {
        self.classes().find(|c| c.id() == id)
    }

    pub fn subclass_for(&self, class: &ClassId) -> Option<&SubclassData> {
        self.items
            .iter()
            .filter_map(Item::subclass)
            .find(|s| &s.class_identifier == class)
    }

    pub fn item(&self, id: &ItemId) -> Option<&Item> {
        self.items.iter().find(|i| &i.id == id)
    }

    pub fn spell_items(&self) -> impl Iterator<Item = (&Item, &SpellData)> + '_ {
        self.items
            .iter()
            .filter_map(|item| item.spell().map(|s| (item, s)))
    }

    /// Every owned copy whose canonical UUID is `uuid`.
    pub fn copies_of<'a>(
        &'a self,
        uuid: &'a SpellUuid,
    ) -> impl Iterator<Item = (&'a Item, &'a SpellData)> + 'a {
        self.spell_items()
            .filter(move |(item, _)| &item.canonical_uuid(&self.id) == uuid)
    }

    pub fn permission(&self, user: &UserId) -> OwnershipLevel {
        self.ownership
            .get(user)
            .copied()
            .unwrap_or(self.default_ownership)
    }
}

/// A journal page as stored by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalPage {
    #[serde(rename = "_id")]
    pub id: String,
    pub uuid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub page_type: String,
    #[serde(default)]
    pub system: Value,
    #[serde(default)]
    pub flags: serde_json::Map<String, Value>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
}

impl JournalPage {
    /// Namespaced flag object for `scope`.
    pub fn scoped_flags(&self, scope: &str) -> Option<&serde_json::Map<String, Value>> {
        self.flags.get(scope).and_then(Value::as_object)
    }

    pub fn set_scoped_flag(&mut self, scope: &str, key: &str, value: Value) {
        let entry = self
            .flags
            .entry(scope.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if !entry.is_object() {
            *entry = Value::Object(Default::default());
        }
        if let Value::Object(map) = entry {
            map.insert(key.to_string(), value);
        }
    }
}

/// Anything `from_uuid` can return.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Item(Item),
    Page(JournalPage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PackKind {
    #[default]
    Item,
    JournalEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackInfo {
    pub id: String,
    pub label: String,
    pub kind: PackKind,
}

impl PackInfo {
    pub fn package(&self) -> &str {
        self.id.split('.').next().unwrap_or(&self.id)
    }
}

/// One row of a pack index read with a field projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(rename = "_id")]
    pub id: String,
    pub uuid: SpellUuid,
    pub name: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    #[serde(default)]
    pub system: Value,
}

/// Set of spell UUIDs in list order.
pub type SpellSet = IndexSet<SpellUuid>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ability_mod_floors() {
        assert_eq!(ability_mod(16), 3);
        assert_eq!(ability_mod(9), -1);
        assert_eq!(ability_mod(10), 0);
    }

    #[test]
    fn spell_item_parses_host_shape() {
        let item: Item = serde_json::from_value(json!({
            "_id": "i1",
            "name": "Shield",
            "type": "spell",
            "system": {
                "level": 1,
                "method": "spell",
                "prepared": 1,
                "sourceClass": "Wizard",
                "compendiumSource": "Compendium.dnd5e.spells.Item.shield"
            }
        }))
        .unwrap();
        let spell = item.spell().unwrap();
        assert_eq!(spell.prepared, Prepared::Prepared);
        assert_eq!(spell.source_class, Some(ClassId::new("wizard")));
        assert_eq!(
            item.canonical_uuid(&ActorId::new("a1")).as_str(),
            "Compendium.dnd5e.spells.Item.shield"
        );
    }

    #[test]
    fn unknown_item_types_survive_round_trip() {
        let raw = json!({"_id": "f1", "name": "Feat", "type": "feat", "system": {"x": 1}});
        let item: Item = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(item.item_type(), "feat");
        assert_eq!(serde_json::to_value(&item).unwrap(), raw);
    }

    #[test]
    fn invalid_prepared_value_is_rejected() {
        let err = serde_json::from_value::<SpellData>(json!({"level": 1, "prepared": 7}));
        assert!(err.is_err());
    }

    #[test]
    fn scale_table_steps() {
        let table = ScaleTable(BTreeMap::from([(1, 3), (4, 4), (10, 5)]));
        assert_eq!(table.value_at(0), None);
        assert_eq!(table.value_at(3), Some(3));
        assert_eq!(table.value_at(4), Some(4));
        assert_eq!(table.value_at(20), Some(5));
    }
}
