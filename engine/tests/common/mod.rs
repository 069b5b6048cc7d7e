#![allow(dead_code)]

use spellprep::lists::ListType;
use spellprep::memory::fixtures;
use spellprep::model::{Actor, Item, JournalPage, PreparationMethod, Prepared, SpellData};
use spellprep::preparation::{DesiredSpell, DesiredState};
use spellprep::{ClassId, ClassSpellKey, SpellUuid, WorldBuilder};

pub const SPELLS: &str = "demo.spells";
pub const LISTS: &str = "demo.lists";

/// (id, name, level, ritual)
const CATALOG: &[(&str, &str, u8, bool)] = &[
    ("fire-bolt", "Fire Bolt", 0, false),
    ("light", "Light", 0, false),
    ("frostbite", "Frostbite", 0, false),
    ("minor-illusion", "Minor Illusion", 0, false),
    ("shield", "Shield", 1, false),
    ("magic-missile", "Magic Missile", 1, false),
    ("detect-magic", "Detect Magic", 1, true),
    ("sleep", "Sleep", 1, false),
    ("cure-wounds", "Cure Wounds", 1, false),
    ("bless", "Bless", 1, false),
    ("entangle", "Entangle", 1, false),
    ("thunderwave", "Thunderwave", 1, false),
    ("hold-person", "Hold Person", 2, false),
    ("fireball", "Fireball", 3, false),
];

pub fn uuid(id: &str) -> SpellUuid {
    SpellUuid::new(format!("Compendium.{SPELLS}.Item.{id}"))
}

pub fn key(class: &str, id: &str) -> ClassSpellKey {
    ClassSpellKey::new(ClassId::new(class), uuid(id))
}

pub fn compendium_spell(id: &str) -> Item {
    let (_, name, level, ritual) = CATALOG
        .iter()
        .copied()
        .find(|(i, ..)| *i == id)
        .unwrap_or_else(|| panic!("no catalog spell {id}"));
    fixtures::spell_with(id, name, level, |s| s.components.ritual = ritual)
}

pub fn catalog() -> Vec<Item> {
    CATALOG.iter().map(|(id, ..)| compendium_spell(id)).collect()
}

/// An owned copy of a catalog spell.
pub fn owned(id: &str, class: Option<&str>, prepared: Prepared) -> Item {
    owned_with(id, |s| {
        s.source_class = class.map(ClassId::new);
        s.prepared = prepared;
    })
}

pub fn owned_with(id: &str, edit: impl FnOnce(&mut SpellData)) -> Item {
    fixtures::owned(&format!("own-{id}"), &compendium_spell(id), SPELLS, edit)
}

pub fn list(id: &str, identifier: &str, list_type: ListType, spells: &[&str]) -> JournalPage {
    let uuids: Vec<SpellUuid> = spells.iter().map(|s| uuid(s)).collect();
    fixtures::list_page(LISTS, id, &format!("{identifier} list"), identifier, list_type, &uuids)
}

pub fn class_lists() -> Vec<JournalPage> {
    vec![
        list(
            "wizard",
            "wizard",
            ListType::Class,
            &["fire-bolt", "light", "minor-illusion", "shield", "magic-missile", "detect-magic", "sleep", "thunderwave", "fireball"],
        ),
        list("cleric", "cleric", ListType::Class, &["light", "cure-wounds", "bless", "detect-magic", "hold-person"]),
        list("druid", "druid", ListType::Class, &["frostbite", "cure-wounds", "detect-magic", "entangle", "thunderwave"]),
        list(
            "sorcerer",
            "sorcerer",
            ListType::Class,
            &["fire-bolt", "light", "frostbite", "minor-illusion", "shield", "magic-missile", "fireball"],
        ),
    ]
}

/// GM-run world with the catalog and class lists installed.
pub fn world() -> WorldBuilder {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    WorldBuilder::new()
        .user("alice", false)
        .user("bob", false)
        .item_pack(SPELLS, catalog())
        .journal_pack(LISTS, class_lists())
}

pub fn actor(id: &str, items: Vec<Item>) -> Actor {
    let mut actor = fixtures::actor(id, id, Some("alice"), items);
    actor.abilities.int_ = 12;
    actor.abilities.wis = 12;
    actor.abilities.cha = 12;
    actor
}

pub fn desire(class: &str, spells: &[(&str, bool)]) -> DesiredState {
    spells
        .iter()
        .map(|(id, prepared)| {
            let spell = compendium_spell(id);
            let data = spell.spell().cloned().unwrap_or_default();
            (
                key(class, id),
                DesiredSpell {
                    is_prepared: *prepared,
                    was_prepared: !*prepared,
                    level: data.level,
                    preparation_mode: None,
                    name: spell.name.clone(),
                    is_ritual: data.components.ritual,
                },
            )
        })
        .collect()
}

/// Owned spells of `actor` matching `id`, as (method, prepared, class).
pub fn copies(actor: &Actor, id: &str) -> Vec<(PreparationMethod, Prepared, Option<ClassId>)> {
    actor
        .copies_of(&uuid(id))
        .map(|(_, s)| (s.method, s.prepared, s.source_class.clone()))
        .collect()
}
