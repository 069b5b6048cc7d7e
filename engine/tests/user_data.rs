mod common;

use common::*;
use serde_json::json;
use spellprep::memory::fixtures;
use spellprep::model::{Ability, JournalPage, Prepared, Progression};
use spellprep::userdata::UsageContext;
use spellprep::{ActorId, SpellUuid, UserId};

const USER_PACK: &str = "spellprep.user-spell-data";

fn alice_world() -> spellprep::memory::WorldBuilder {
    world().current_user("alice").actor(actor(
        "elara",
        vec![
            fixtures::class("wizard", 3, Progression::Full, Some(Ability::Int)),
            owned("shield", Some("wizard"), Prepared::Prepared),
        ],
    ))
}

#[tokio::test]
async fn notes_are_keyed_by_the_compendium_spell() {
    let w = alice_world().setting("spellNotesLength", json!(10)).build();
    let data = w.core.user_data();

    let kept = data
        .set_notes(&SpellUuid::new("Actor.elara.Item.own-shield"), "<b>Counter</b> magic missiles")
        .await
        .unwrap();
    assert_eq!(kept, "Counter ma");

    let view = data.spell_view(&uuid("shield"), None).await.unwrap();
    assert_eq!(view.notes, "Counter ma");

    let snapshot = w.store.snapshot().await;
    let page = &snapshot.packs.iter().find(|p| p.id == USER_PACK).unwrap().pages[0];
    assert_eq!(page.id, "user-alice");
    assert!(page.content.contains("data-uuid=\"Compendium.demo.spells.Item.shield\""));
    let stored = &page.flags["spellprep"];
    assert_eq!(stored["dataVersion"], json!(2));
    assert!(stored["spells"].get("Compendium~demo~spells~Item~shield").is_some());
}

#[tokio::test]
async fn favorites_are_per_actor_and_sync_exactly() {
    let w = alice_world().build();
    let data = w.core.user_data();
    let elara = ActorId::new("elara");
    let bram = ActorId::new("bram");

    data.set_favorite(&uuid("shield"), &elara, true).await.unwrap();
    assert_eq!(data.favorites(&elara).await.unwrap(), [uuid("shield")]);
    assert!(data.favorites(&bram).await.unwrap().is_empty());

    let changed = data.sync_actor_favorites(&elara, &[uuid("sleep")]).await.unwrap();
    assert_eq!(changed, 2);
    assert_eq!(data.favorites(&elara).await.unwrap(), [uuid("sleep")]);
    assert_eq!(data.sync_actor_favorites(&elara, &[uuid("sleep")]).await.unwrap(), 0);
}

#[tokio::test]
async fn usage_counts_by_context() {
    let w = alice_world().build();
    let data = w.core.user_data();
    let elara = ActorId::new("elara");

    data.record_usage(&uuid("shield"), &elara, UsageContext::Combat).await.unwrap();
    let usage = data
        .record_usage(&uuid("shield"), &elara, UsageContext::Exploration)
        .await
        .unwrap();
    assert_eq!((usage.count, usage.combat, usage.exploration), (2, 1, 1));
    assert!(usage.last_used.is_some());

    let view = data.spell_view(&uuid("shield"), Some(&elara)).await.unwrap();
    assert_eq!(view.usage, usage);
    assert!(!view.favorited);
}

#[tokio::test]
async fn each_user_sees_only_their_own_notes() {
    let w = alice_world().build();
    w.core.user_data().set_notes(&uuid("shield"), "mine").await.unwrap();

    w.host.set_current_user(&UserId::new("bob"));
    let view = w.core.user_data().spell_view(&uuid("shield"), None).await.unwrap();
    assert!(view.notes.is_empty());
}

#[tokio::test]
async fn old_pages_are_migrated_from_their_content() {
    let content = concat!(
        "<table><tbody>",
        "<tr data-uuid=\"Compendium.demo.spells.Item.shield\"><td>Shield</td><td>Block the missiles</td></tr>",
        "<tr data-uuid=\"Compendium.demo.spells.Item.shield\" data-actor=\"elara\">",
        "<td>Shield</td><td>elara</td><td>yes</td><td>4</td><td>3</td><td>1</td><td></td></tr>",
        "</tbody></table>"
    );
    let page = JournalPage {
        id: "user-alice".into(),
        uuid: format!("Compendium.{USER_PACK}.JournalEntryPage.user-alice"),
        name: "alice".into(),
        page_type: "text".into(),
        system: serde_json::Value::Null,
        flags: Default::default(),
        content: content.into(),
        folder: None,
        journal: None,
    };
    let w = alice_world().journal_pack(USER_PACK, vec![page]).build();
    let alice = UserId::new("alice");

    let record = w.core.user_data().record(&alice).await.unwrap();
    let shield = &record.spells[&uuid("shield")];
    assert_eq!(shield.notes, "Block the missiles");
    let elara = &shield.by_actor[&ActorId::new("elara")];
    assert!(elara.favorited);
    assert_eq!(elara.usage.count, 4);

    let snapshot = w.store.snapshot().await;
    let page = &snapshot.packs.iter().find(|p| p.id == USER_PACK).unwrap().pages[0];
    assert_eq!(page.flags["spellprep"]["dataVersion"], json!(2));
}

#[tokio::test]
async fn escaped_markup_in_notes_is_stripped() {
    let w = alice_world().build();
    let kept = w
        .core
        .user_data()
        .set_notes(&uuid("shield"), "&lt;script&gt;alert(1)&lt;/script&gt; ok")
        .await
        .unwrap();
    assert_eq!(kept, "alert(1) ok");

    let view = w.core.user_data().spell_view(&uuid("shield"), None).await.unwrap();
    assert!(!view.notes.contains('<'));
}
