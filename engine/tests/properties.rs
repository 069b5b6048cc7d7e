mod common;

use std::collections::BTreeSet;

use common::*;
use proptest::prelude::*;
use spellprep::cantrips::SwapTracking;
use spellprep::ids::{decode_key, encode_key};
use spellprep::memory::fixtures;
use spellprep::model::{Ability, Prepared, Progression};
use spellprep::prepared::flat_mirror;
use spellprep::{ActorId, ClassId, SpellUuid};

const CLASSES: [&str; 2] = ["wizard", "cleric"];
const SPELLS: [&str; 7] = ["shield", "magic-missile", "detect-magic", "sleep", "cure-wounds", "bless", "light"];

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().build().unwrap()
}

fn multiclass_world() -> spellprep::MemoryWorld {
    world()
        .actor(actor(
            "mira",
            vec![
                fixtures::class("wizard", 3, Progression::Full, Some(Ability::Int)),
                fixtures::class("cleric", 3, Progression::Full, Some(Ability::Wis)),
                owned("shield", Some("wizard"), Prepared::Unprepared),
                owned("magic-missile", Some("wizard"), Prepared::Unprepared),
                owned("detect-magic", Some("wizard"), Prepared::Unprepared),
                owned("sleep", Some("wizard"), Prepared::Unprepared),
            ],
        ))
        .build()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn mirror_and_class_exclusivity_hold_across_saves(
        ops in prop::collection::vec((0..CLASSES.len(), 0..SPELLS.len(), any::<bool>()), 1..10)
    ) {
        let rt = runtime();
        let w = multiclass_world();
        let id = ActorId::new("mira");
        rt.block_on(async {
            for (c, s, prepared) in ops {
                let class = ClassId::new(CLASSES[c]);
                w.core
                    .preparation()
                    .save(&id, &class, &desire(CLASSES[c], &[(SPELLS[s], prepared)]))
                    .await
                    .unwrap();

                let by_class = w.core.prepared().get_prepared_by_class(&id).await.unwrap();
                let flat = w.core.prepared().flat(&id).await.unwrap();
                assert_eq!(flat, flat_mirror(&by_class));

                let actor = w.core.actor(&id).await.unwrap();
                for spell in SPELLS {
                    let holders = by_class
                        .values()
                        .filter(|keys| keys.iter().any(|k| k.spell == uuid(spell)))
                        .count();
                    let is_cantrip = compendium_spell(spell).spell().is_some_and(|d| d.level == 0);
                    assert!(is_cantrip || holders <= 1, "{spell} prepared by {holders} classes");
                }
                for (class, keys) in &by_class {
                    for key in keys {
                        let backed = actor.copies_of(&key.spell).any(|(_, s)| {
                            s.source_class.as_ref() == Some(class)
                                && matches!(s.prepared, Prepared::Prepared | Prepared::Always)
                        });
                        assert!(backed, "{key} has no prepared item");
                    }
                }
            }
        });
    }

    #[test]
    fn swap_window_tracks_at_most_one_of_each(
        original in prop::collection::btree_set(0..6usize, 0..4),
        ops in prop::collection::vec((0..6usize, any::<bool>()), 0..16)
    ) {
        let name = |i: usize| SpellUuid::new(format!("cantrip-{i}"));
        let mut window = SwapTracking::open(original.iter().map(|i| name(*i)).collect());
        for (i, checked) in ops {
            let _ = window.toggle(&name(i), checked);
            prop_assert!(window.learned.as_ref().is_none_or(|u| !window.original_checked.contains(u)));
            prop_assert!(window.unlearned.as_ref().is_none_or(|u| window.original_checked.contains(u)));
        }
    }

    #[test]
    fn toggling_twice_restores_the_baseline(
        original in prop::collection::btree_set(0..6usize, 0..4),
        pick in 0..6usize
    ) {
        let name = |i: usize| SpellUuid::new(format!("cantrip-{i}"));
        let baseline: BTreeSet<SpellUuid> = original.iter().map(|i| name(*i)).collect();
        let mut window = SwapTracking::open(baseline.clone());
        let uuid = name(pick);
        let was = baseline.contains(&uuid);
        let _ = window.toggle(&uuid, !was);
        let _ = window.toggle(&uuid, was);
        prop_assert!(window.is_baseline());
        prop_assert_eq!(window.original_checked, baseline);
    }

    #[test]
    fn storage_keys_round_trip(raw in "[A-Za-z0-9]{1,8}(\\.[A-Za-z0-9-]{1,8}){0,5}") {
        let uuid = SpellUuid::new(raw);
        let encoded = encode_key(&uuid);
        prop_assert!(!encoded.contains('.'));
        prop_assert_eq!(decode_key(&encoded), uuid);
    }
}
