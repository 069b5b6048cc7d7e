use spellprep::cantrips::SwapContext;
use spellprep::content::builtin_world;
use spellprep::memory::{WorldBuilder, WorldSnapshot};
use spellprep::preparation::LimitStatus;
use spellprep::{ActorId, ChangeWarning, ClassId, DenyReason, SpellUuid};

fn spell(id: &str) -> SpellUuid {
    SpellUuid::new(format!("Compendium.demo.spells.Item.{id}"))
}

#[test]
fn snapshot_round_trips_through_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("world.json");
    let world = builtin_world("demo").unwrap();

    world.save(&path).unwrap();
    let loaded = WorldSnapshot::load(&path).unwrap();
    assert_eq!(loaded, world);
}

#[test]
fn loading_a_missing_file_names_it() {
    let err = WorldSnapshot::load(std::path::Path::new("/nonexistent/world.json")).unwrap_err();
    assert!(format!("{err:#}").contains("/nonexistent/world.json"));
}

#[tokio::test]
async fn demo_wizard_limits() {
    let w = WorldBuilder::from_snapshot(builtin_world("demo").unwrap()).build();
    let view = w
        .core
        .preparation()
        .view(&ActorId::new("elara"), &ClassId::new("wizard"))
        .await
        .unwrap();
    assert_eq!(view.context, SwapContext::Normal);
    assert_eq!(view.limits.max_spell_level, 2);
    assert_eq!(view.limits.cantrips, LimitStatus::new(2, 3));
    assert_eq!(view.limits.spells, LimitStatus::new(1, 6));
    insta::assert_json_snapshot!(view.rules, @r###"
    {
      "cantripSwapping": "none",
      "spellSwapping": "longRest",
      "ritualCasting": "always",
      "showCantrips": true,
      "customSpellList": [],
      "spellPreparationBonus": 0,
      "cantripPreparationBonus": 0,
      "forceWizardMode": false,
      "spellLearningCostMultiplier": 50,
      "spellLearningTimeMultiplier": 2
    }
    "###);
}

#[tokio::test]
async fn long_rest_opens_and_closes_the_swap_window() {
    let w = WorldBuilder::from_snapshot(builtin_world("demo").unwrap()).build();
    let id = ActorId::new("elara");
    let class = ClassId::new("wizard");
    let engine = w.core.preparation();
    let cantrips = w.core.cantrips();

    w.core.rules().set_enforcement(&id, Some(spellprep::EnforcementBehavior::Strict)).await.unwrap();
    let refused = engine.prepare(&id, &class, &[], &[spell("shield")]).await.unwrap();
    assert_eq!(refused.rejected[0].reason, DenyReason::LongRestOnly);

    cantrips.on_long_rest(&id).await.unwrap();
    let actor = w.core.actor(&id).await.unwrap();
    assert_eq!(cantrips.swap_context(&actor, &class).await.unwrap(), SwapContext::LongRest);
    let swapped = engine
        .prepare(&id, &class, &[spell("magic-missile")], &[spell("shield")])
        .await
        .unwrap();
    assert!(swapped.rejected.is_empty());
    assert_eq!(swapped.spell_changes.removed[0].name, "Shield");
    assert_eq!(swapped.spell_changes.added[0].name, "Magic Missile");

    cantrips.complete_window(&id, &class, SwapContext::LongRest).await.unwrap();
    let actor = w.core.actor(&id).await.unwrap();
    assert_eq!(cantrips.swap_context(&actor, &class).await.unwrap(), SwapContext::Normal);

    w.core.rules().set_enforcement(&id, None).await.unwrap();
    let bypassed = engine.prepare(&id, &class, &[], &[spell("magic-missile")]).await.unwrap();
    assert!(bypassed.rejected.is_empty());
    assert_eq!(
        bypassed.warnings[0].warning,
        ChangeWarning::RuleBypassed {
            rule: DenyReason::LongRestOnly
        }
    );
}
