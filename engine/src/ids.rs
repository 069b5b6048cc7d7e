use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Substitute for `.` in keys handed to hierarchical flag storage.
pub const KEY_DOT_SUBSTITUTE: char = '~';

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Globally unique document reference, e.g. `Compendium.dnd5e.spells.Item.abc123`.
    SpellUuid
);
string_id!(
    /// UUID of a spell-list journal page.
    ListUuid
);
string_id!(ActorId);
string_id!(ItemId);
string_id!(UserId);

impl SpellUuid {
    /// Pack id (`package.name`) for compendium documents, `None` for world or actor-owned ones.
    pub fn pack_id(&self) -> Option<String> {
        let mut parts = self.0.split('.');
        if parts.next() != Some("Compendium") {
            return None;
        }
        let package = parts.next()?;
        let pack = parts.next()?;
        Some(format!("{package}.{pack}"))
    }

    /// Last path segment: the document id inside its container.
    pub fn document_id(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// Top-level package a compendium document ships in (`dnd5e` for `Compendium.dnd5e.spells...`).
    pub fn package(&self) -> Option<&str> {
        let rest = self.0.strip_prefix("Compendium.")?;
        rest.split('.').next()
    }

    /// A UUID usable as a persistence key: non-empty, no key separator, no reserved substitute.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && !self.0.contains(':') && !self.0.contains(KEY_DOT_SUBSTITUTE)
    }
}

/// Lowercase class identifier as it appears on the actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClassId(String);

impl ClassId {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ClassId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ClassId::new(raw))
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Element of a per-class preparation set: `<class>:<canonical uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassSpellKey {
    pub class: ClassId,
    pub spell: SpellUuid,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed class spell key: {0:?}")]
pub struct KeyParseError(pub String);

impl ClassSpellKey {
    pub fn new(class: ClassId, spell: SpellUuid) -> Self {
        Self { class, spell }
    }
}

impl fmt::Display for ClassSpellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.spell)
    }
}

impl FromStr for ClassSpellKey {
    type Err = KeyParseError;

    /// Splits on the first `:` only.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((class, spell)) if !class.is_empty() && !spell.is_empty() => Ok(Self {
                class: ClassId::new(class),
                spell: SpellUuid::new(spell),
            }),
            _ => Err(KeyParseError(s.to_string())),
        }
    }
}

impl Serialize for ClassSpellKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClassSpellKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Encode a UUID for use as a hierarchical storage key.
pub fn encode_key(uuid: &SpellUuid) -> String {
    uuid.as_str().replace('.', &KEY_DOT_SUBSTITUTE.to_string())
}

/// Inverse of [`encode_key`].
pub fn decode_key(key: &str) -> SpellUuid {
    SpellUuid::new(key.replace(KEY_DOT_SUBSTITUTE, "."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_splits_on_first_colon_only() {
        let key: ClassSpellKey = "wizard:Compendium.dnd5e.spells.Item.x:y".parse().unwrap();
        assert_eq!(key.class.as_str(), "wizard");
        assert_eq!(key.spell.as_str(), "Compendium.dnd5e.spells.Item.x:y");
    }

    #[test]
    fn key_rejects_missing_parts() {
        assert!("wizard".parse::<ClassSpellKey>().is_err());
        assert!(":abc".parse::<ClassSpellKey>().is_err());
        assert!("wizard:".parse::<ClassSpellKey>().is_err());
    }

    #[test]
    fn class_ids_are_lowercased() {
        assert_eq!(ClassId::new(" Wizard ").as_str(), "wizard");
    }

    #[test]
    fn pack_parts_of_compendium_uuid() {
        let uuid = SpellUuid::new("Compendium.dnd5e.spells.Item.abc123");
        assert_eq!(uuid.pack_id().as_deref(), Some("dnd5e.spells"));
        assert_eq!(uuid.document_id(), "abc123");
        assert_eq!(uuid.package(), Some("dnd5e"));

        let owned = SpellUuid::new("Actor.a1.Item.i1");
        assert_eq!(owned.pack_id(), None);
        assert_eq!(owned.document_id(), "i1");
    }
}
