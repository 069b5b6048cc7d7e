mod common;

use common::*;
use serde_json::json;
use spellprep::memory::{fixtures, Mutation};
use spellprep::model::{Ability, PreparationMethod, Prepared, Progression};
use spellprep::preparation::PreparationStatus;
use spellprep::{
    ActorId, ChangeRequest, ChangeWarning, ClassId, CoreError, DenyReason, MemoryWorld, StoreError, UserId,
};

fn wizard(levels: u32) -> spellprep::model::Item {
    fixtures::class("wizard", levels, Progression::Full, Some(Ability::Int))
}

fn first_level_wizard(enforcement: &str) -> MemoryWorld {
    world()
        .setting("defaultEnforcementBehavior", json!(enforcement))
        .actor(actor(
            "elara",
            vec![
                wizard(1),
                owned("shield", Some("wizard"), Prepared::Unprepared),
                owned("magic-missile", Some("wizard"), Prepared::Unprepared),
                owned("sleep", Some("wizard"), Prepared::Unprepared),
            ],
        ))
        .build()
}

fn three_spells() -> spellprep::preparation::DesiredState {
    desire("wizard", &[("shield", true), ("magic-missile", true), ("sleep", true)])
}

#[tokio::test]
async fn strict_enforcement_refuses_past_the_limit() {
    let w = first_level_wizard("strict");
    let id = ActorId::new("elara");
    let class = ClassId::new("wizard");

    let summary = w.core.preparation().save(&id, &class, &three_spells()).await.unwrap();
    assert_eq!(summary.spell_changes.added.len(), 2);
    assert_eq!(summary.rejected.len(), 1);
    assert_eq!(summary.rejected[0].reason, DenyReason::ClassAtMaximum { current: 2, max: 2 });
    assert!(!summary.over_limits.spells.is_over);
    assert!(w.host.whispers().is_empty());
}

#[tokio::test]
async fn notify_gm_accepts_and_whispers_the_gm() {
    let w = first_level_wizard("notifyGm");
    let id = ActorId::new("elara");
    let class = ClassId::new("wizard");

    let summary = w.core.preparation().save(&id, &class, &three_spells()).await.unwrap();
    assert!(summary.rejected.is_empty());
    assert_eq!(summary.spell_changes.added.len(), 3);
    assert!(summary.over_limits.spells.is_over);
    assert!(summary
        .warnings
        .iter()
        .any(|w| w.warning == ChangeWarning::OverLimit { current: 3, max: 2 }));

    let whispers = w.host.whispers();
    assert_eq!(whispers.len(), 1);
    assert_eq!(whispers[0].1, [UserId::new("gm")]);
    assert!(whispers[0].0.contains("spell-changes"));
    assert!(whispers[0].0.contains("Sleep"));
}

#[tokio::test]
async fn failed_gm_whisper_does_not_fail_the_save() {
    let w = first_level_wizard("notifyGm");
    let id = ActorId::new("elara");
    let class = ClassId::new("wizard");
    w.host.fail_next_whisper();

    let summary = w.core.preparation().save(&id, &class, &three_spells()).await.unwrap();
    assert_eq!(summary.spell_changes.added.len(), 3);
    assert!(summary.over_limits.spells.is_over);
    assert!(w.host.whispers().is_empty());

    let stored = w.core.prepared().get_prepared_by_class(&id).await.unwrap();
    assert_eq!(stored[&class].len(), 3);
    assert_eq!(w.core.prepared().flat(&id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn unenforced_saves_silently() {
    let w = first_level_wizard("unenforced");
    let id = ActorId::new("elara");
    let summary = w
        .core
        .preparation()
        .save(&id, &ClassId::new("wizard"), &three_spells())
        .await
        .unwrap();
    assert!(summary.rejected.is_empty());
    assert!(summary.warnings.is_empty());
    assert!(w.host.whispers().is_empty());
}

#[tokio::test]
async fn spells_above_the_class_maximum_are_refused_even_unenforced() {
    let w = world()
        .setting("defaultEnforcementBehavior", json!("unenforced"))
        .actor(actor("elara", vec![wizard(1), owned("fireball", Some("wizard"), Prepared::Unprepared)]))
        .build();
    let id = ActorId::new("elara");
    let summary = w
        .core
        .preparation()
        .save(&id, &ClassId::new("wizard"), &desire("wizard", &[("fireball", true)]))
        .await
        .unwrap();
    assert_eq!(summary.rejected[0].reason, DenyReason::AboveMaxLevel { level: 3, max: 1 });
    assert_eq!(
        copies(&w.core.actor(&id).await.unwrap(), "fireball"),
        [(PreparationMethod::Spell, Prepared::Unprepared, Some(ClassId::new("wizard")))]
    );
}

#[tokio::test]
async fn immutable_spells_are_never_rewritten() {
    let wizard_id = Some(ClassId::new("wizard"));
    let w = world()
        .actor(actor(
            "elara",
            vec![
                wizard(3),
                owned_with("shield", |s| {
                    s.source_class = wizard_id.clone();
                    s.prepared = Prepared::Always;
                }),
                owned_with("magic-missile", |s| {
                    s.source_class = wizard_id.clone();
                    s.prepared = Prepared::Prepared;
                    s.cached_for = Some("Item.arcane-feat".into());
                }),
                owned_with("sleep", |s| {
                    s.source_class = wizard_id.clone();
                    s.method = PreparationMethod::Innate;
                }),
                owned("detect-magic", Some("wizard"), Prepared::Unprepared),
            ],
        ))
        .build();
    let id = ActorId::new("elara");
    let class = ClassId::new("wizard");
    let protected = ["own-shield", "own-magic-missile", "own-sleep"];
    let before = w.core.actor(&id).await.unwrap();

    let summary = w
        .core
        .preparation()
        .save(
            &id,
            &class,
            &desire(
                "wizard",
                &[("shield", false), ("magic-missile", false), ("sleep", true), ("detect-magic", true)],
            ),
        )
        .await
        .unwrap();
    assert!(summary.rejected.is_empty());
    let added: Vec<_> = summary.spell_changes.added.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(added, ["Detect Magic"]);
    assert!(summary.spell_changes.removed.is_empty());

    let after = w.core.actor(&id).await.unwrap();
    for item in protected {
        let find = |a: &spellprep::model::Actor| a.items.iter().find(|i| i.id.as_str() == item).cloned();
        assert_eq!(find(&after), find(&before), "{item} changed");
    }
    for mutation in w.store.mutations().await {
        if let Mutation::CreateItems { ids, .. } | Mutation::UpdateItems { ids, .. } | Mutation::DeleteItems { ids, .. } =
            mutation
        {
            assert!(ids.iter().all(|i| !protected.contains(&i.as_str())), "touched {ids:?}");
        }
    }

    let check = w
        .core
        .preparation()
        .can_change(
            &id,
            &class,
            &ChangeRequest {
                uuid: uuid("shield"),
                level: 1,
                is_checked: false,
                was_prepared: true,
            },
        )
        .await
        .unwrap();
    assert!(check.allowed);
    assert_eq!(check.warning, Some(ChangeWarning::NoChange));
}

#[tokio::test]
async fn saving_the_same_state_twice_changes_nothing() {
    let w = world()
        .actor(actor(
            "elara",
            vec![
                wizard(3),
                owned("shield", Some("wizard"), Prepared::Unprepared),
                owned("magic-missile", Some("wizard"), Prepared::Unprepared),
                owned("detect-magic", Some("wizard"), Prepared::Unprepared),
            ],
        ))
        .build();
    let id = ActorId::new("elara");
    let class = ClassId::new("wizard");
    let desired = desire("wizard", &[("shield", true), ("detect-magic", true), ("magic-missile", false)]);

    w.core.preparation().save(&id, &class, &desired).await.unwrap();
    let first = w.store.snapshot().await;
    w.store.clear_mutations().await;

    let again = w.core.preparation().save(&id, &class, &desired).await.unwrap();
    assert!(again.spell_changes.added.is_empty());
    assert!(again.spell_changes.removed.is_empty());
    assert!(w.store.mutations().await.iter().all(|m| !m.is_item_call()));
    assert_eq!(w.store.snapshot().await, first);
}

#[tokio::test]
async fn non_owners_cannot_save() {
    let w = first_level_wizard("notifyGm");
    let id = ActorId::new("elara");
    let class = ClassId::new("wizard");
    w.host.set_current_user(&UserId::new("bob"));

    let err = w
        .core
        .preparation()
        .save(&id, &class, &desire("wizard", &[("shield", true)]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::PermissionDenied { .. }));
    assert!(w
        .host
        .notices()
        .iter()
        .any(|(level, _)| *level == spellprep::store::NoticeLevel::Warn));
    assert!(w.store.mutations().await.is_empty());

    w.host.set_current_user(&UserId::new("alice"));
    let ok = w.core.preparation().save(&id, &class, &desire("wizard", &[("shield", true)])).await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn host_rejection_leaves_the_stored_set_alone() {
    let w = world()
        .actor(actor("elara", vec![wizard(3), owned("shield", Some("wizard"), Prepared::Unprepared)]))
        .build();
    let id = ActorId::new("elara");
    w.store.reject_next_item_call("sheet locked").await;

    let err = w
        .core
        .preparation()
        .save(&id, &ClassId::new("wizard"), &desire("wizard", &[("shield", true)]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Store(StoreError::Rejected(ref r)) if r == "sheet locked"));
    assert_eq!(w.store.flag(&id, w.core.scope(), "preparedSpellsByClass").await, None);
}

#[tokio::test]
async fn unknown_class_is_an_error() {
    let w = first_level_wizard("notifyGm");
    let err = w
        .core
        .preparation()
        .save(&ActorId::new("elara"), &ClassId::new("bard"), &desire("bard", &[("shield", true)]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UnknownClass { .. }));
}

#[tokio::test]
async fn view_claims_unassigned_copies() {
    let w = world()
        .actor(actor("elara", vec![wizard(3), owned("shield", None, Prepared::Prepared)]))
        .build();
    let id = ActorId::new("elara");
    let class = ClassId::new("wizard");

    let view = w.core.preparation().view(&id, &class).await.unwrap();
    assert!(!view.read_only);
    assert_eq!(view.limits.max_spell_level, 2);
    let shield = view.spells.iter().find(|s| s.uuid == uuid("shield")).unwrap();
    assert_eq!(shield.status, PreparationStatus::Prepared);
    assert!(view.spells.iter().all(|s| s.level <= 2));
    assert!(view.spells.iter().any(|s| s.uuid == uuid("fire-bolt")));

    assert_eq!(
        copies(&w.core.actor(&id).await.unwrap(), "shield"),
        [(PreparationMethod::Spell, Prepared::Prepared, Some(class))]
    );
}

#[tokio::test]
async fn observers_get_a_read_only_view_without_claims() {
    let w = world()
        .actor(actor("elara", vec![wizard(3), owned("shield", None, Prepared::Prepared)]))
        .build();
    w.host.set_current_user(&UserId::new("bob"));
    let id = ActorId::new("elara");

    let view = w.core.preparation().view(&id, &ClassId::new("wizard")).await.unwrap();
    assert!(view.read_only);
    assert!(w.store.mutations().await.is_empty());
}

#[tokio::test]
async fn prepare_accepts_plain_uuid_lists() {
    let w = first_level_wizard("notifyGm");
    let id = ActorId::new("elara");
    let class = ClassId::new("wizard");
    let engine = w.core.preparation();

    let summary = engine.prepare(&id, &class, &[uuid("shield")], &[]).await.unwrap();
    assert_eq!(summary.spell_changes.added[0].name, "Shield");

    let summary = engine.prepare(&id, &class, &[], &[uuid("shield")]).await.unwrap();
    assert_eq!(summary.spell_changes.removed[0].name, "Shield");
    assert_eq!(
        engine.status(&id, &class, &uuid("shield")).await.unwrap(),
        PreparationStatus::None
    );
}

#[tokio::test]
async fn limits_follow_class_progression() {
    let w = world()
        .actor(actor(
            "tess",
            vec![
                fixtures::class("fighter", 5, Progression::None, None),
                fixtures::with_cantrips(
                    fixtures::class("paladin", 5, Progression::Half, Some(Ability::Cha)),
                    &[(1, 2)],
                ),
                fixtures::with_cantrips(wizard(4), &[(1, 3), (4, 4)]),
            ],
        ))
        .build();
    let actor = w.core.actor(&ActorId::new("tess")).await.unwrap();
    let progression = w.core.progression();
    let fighter = ClassId::new("fighter");
    let paladin = ClassId::new("paladin");
    let wizard = ClassId::new("wizard");

    assert_eq!(progression.max_spell_level(&actor, &fighter).await.unwrap(), 0);
    assert_eq!(progression.max_prepared(&actor, &fighter).await.unwrap(), 0);
    assert_eq!(progression.max_spell_level(&actor, &paladin).await.unwrap(), 2);
    assert_eq!(progression.max_cantrips(&actor, &paladin).await.unwrap(), 0);
    assert_eq!(progression.max_prepared(&actor, &paladin).await.unwrap(), 3);
    assert_eq!(progression.max_cantrips(&actor, &wizard).await.unwrap(), 4);
    assert_eq!(progression.max_prepared(&actor, &wizard).await.unwrap(), 5);
}

fn wizard_with_flags(keys: &[&str]) -> MemoryWorld {
    let stored: Vec<String> = keys.iter().map(|id| key("wizard", id).to_string()).collect();
    world()
        .actor(actor(
            "elara",
            vec![wizard(3), owned("shield", Some("wizard"), Prepared::Prepared)],
        ))
        .flag("elara", "preparedSpellsByClass", json!({ "wizard": stored }))
        .flag("elara", "preparedSpells", json!([uuid("shield").to_string()]))
        .build()
}

#[tokio::test]
async fn cleanup_prunes_keys_without_items() {
    let w = wizard_with_flags(&["shield", "sleep"]);
    let id = ActorId::new("elara");

    let pruned = w.core.prepared().cleanup_stale_preparation_flags(&id).await.unwrap();
    assert_eq!(pruned, 1);
    let stored = w.core.prepared().get_prepared_by_class(&id).await.unwrap();
    assert_eq!(stored[&ClassId::new("wizard")].len(), 1);
    assert_eq!(w.core.prepared().flat(&id).await.unwrap(), [uuid("shield")]);
}

#[tokio::test]
async fn cleanup_without_stale_keys_writes_nothing() {
    let w = wizard_with_flags(&["shield"]);
    let id = ActorId::new("elara");

    let pruned = w.core.prepared().cleanup_stale_preparation_flags(&id).await.unwrap();
    assert_eq!(pruned, 0);
    assert!(w.store.mutations().await.is_empty());
}
