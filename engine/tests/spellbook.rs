mod common;

use common::*;
use spellprep::memory::fixtures;
use spellprep::model::{Ability, PreparationMethod, Prepared, Progression};
use spellprep::wizard::{CopySource, LearnOutcome};
use spellprep::{ActorId, ClassId, CoreError, SpellUuid, UserId};

fn wizard_world() -> spellprep::MemoryWorld {
    world()
        .actor(actor(
            "elara",
            vec![
                fixtures::class("wizard", 3, Progression::Full, Some(Ability::Int)),
                owned("shield", Some("wizard"), Prepared::Unprepared),
            ],
        ))
        .build()
}

#[tokio::test]
async fn copying_costs_by_level_and_free_spells_do_not() {
    let w = wizard_world();
    let id = ActorId::new("elara");
    let class = ClassId::new("wizard");
    let book = w.core.wizard();

    let copied = book
        .add_spell(&id, &class, &uuid("hold-person"), CopySource::Copied)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((copied.cost, copied.time_spent), (100, 4));

    let free = book
        .add_spell(&id, &class, &uuid("sleep"), CopySource::Free)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((free.cost, free.time_spent), (0, 0));

    let actor = w.core.actor(&id).await.unwrap();
    let spells = book.personal_spellbook(&actor, &class).await.unwrap();
    assert!(spells.contains(&uuid("shield")));
    assert!(spells.contains(&uuid("hold-person")));
    assert!(spells.contains(&uuid("sleep")));
    assert_eq!(book.free_spells_remaining(&actor, &class).await.unwrap(), 9);

    let missing = book
        .add_spell(&id, &class, &SpellUuid::new("Compendium.demo.spells.Item.wish"), CopySource::Copied)
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn scrolls_respect_the_spell_level_cap() {
    let w = wizard_world();
    let id = ActorId::new("elara");
    let class = ClassId::new("wizard");
    let book = w.core.wizard();

    let learned = book.learn_from_scroll(&id, &class, &uuid("hold-person")).await.unwrap();
    assert!(matches!(learned, LearnOutcome::Learned(ref c) if c.source == CopySource::Scroll && c.cost == 100));
    assert_eq!(
        book.learn_from_scroll(&id, &class, &uuid("hold-person")).await.unwrap(),
        LearnOutcome::AlreadyKnown
    );
    assert_eq!(
        book.learn_from_scroll(&id, &class, &uuid("fireball")).await.unwrap(),
        LearnOutcome::AboveMaxLevel { level: 3, max: 2 }
    );
    assert_eq!(
        book.learn_from_scroll(&id, &class, &SpellUuid::new("Compendium.demo.spells.Item.wish"))
            .await
            .unwrap(),
        LearnOutcome::Unavailable
    );
}

#[tokio::test]
async fn off_list_scroll_spells_can_be_prepared() {
    let w = wizard_world();
    let id = ActorId::new("elara");
    let class = ClassId::new("wizard");

    let refused = w
        .core
        .preparation()
        .save(&id, &class, &desire("wizard", &[("cure-wounds", true)]))
        .await
        .unwrap();
    assert_eq!(refused.rejected.len(), 1);

    w.core.wizard().learn_from_scroll(&id, &class, &uuid("cure-wounds")).await.unwrap();
    let actor = w.core.actor(&id).await.unwrap();
    assert_eq!(w.core.wizard().scroll_learned(&actor, &class).await.unwrap(), [uuid("cure-wounds")]);

    let summary = w
        .core
        .preparation()
        .save(&id, &class, &desire("wizard", &[("cure-wounds", true)]))
        .await
        .unwrap();
    assert!(summary.rejected.is_empty());
    assert_eq!(
        copies(&w.core.actor(&id).await.unwrap(), "cure-wounds"),
        [(PreparationMethod::Spell, Prepared::Prepared, Some(class))]
    );
}

#[tokio::test]
async fn removing_a_copied_spell() {
    let w = wizard_world();
    let id = ActorId::new("elara");
    let class = ClassId::new("wizard");
    let book = w.core.wizard();
    book.add_spell(&id, &class, &uuid("sleep"), CopySource::Copied).await.unwrap();

    assert!(book.remove_spell(&id, &class, &uuid("sleep")).await.unwrap());
    assert!(!book.remove_spell(&id, &class, &uuid("sleep")).await.unwrap());
    assert!(book.copied(&id, &class).await.unwrap().is_empty());
}

#[tokio::test]
async fn only_owners_write_the_spellbook() {
    let w = wizard_world();
    w.host.set_current_user(&UserId::new("bob"));
    let err = w
        .core
        .wizard()
        .add_spell(&ActorId::new("elara"), &ClassId::new("wizard"), &uuid("sleep"), CopySource::Copied)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::PermissionDenied { .. }));
}

#[tokio::test]
async fn forced_wizard_mode_gives_any_class_a_spellbook() {
    let w = world()
        .actor(actor("kai", vec![fixtures::class("sorcerer", 3, Progression::Full, Some(Ability::Cha))]))
        .build();
    let id = ActorId::new("kai");
    let class = ClassId::new("sorcerer");
    assert!(!w.core.wizard().is_wizard_like(&id, &class).await.unwrap());

    let patch = spellprep::ClassRulesPatch {
        force_wizard_mode: Some(true),
        ..Default::default()
    };
    w.core.rules().update_class_rules(&id, &class, patch).await.unwrap();
    assert!(w.core.wizard().is_wizard_like(&id, &class).await.unwrap());

    let summary = w
        .core
        .preparation()
        .save(&id, &class, &desire("sorcerer", &[("shield", true)]))
        .await
        .unwrap();
    assert_eq!(summary.rejected[0].reason, spellprep::DenyReason::NotInSpellbook);
}
