//! End-to-end: mark a page, drain the queue, check the rendered pages

mod common;

use common::{lang, title, World};
use pretty_assertions::assert_eq;
use transpage_orchestration::{Job, JobKind, JobQueue, StatsStore};
use transpage_storage::{
    DocumentStore, GroupId, RevisionId, TranslationUnit, UnitChange, UnitStore, UnitTitle,
};

const GUIDE: &str = "Read the <tvar name=guide>[[Guide]]</tvar> first";

async fn marked_welcome(world: &World) {
    let page = title("Welcome");
    world
        .docs
        .update_content(&page, "source text", "Admin", "")
        .await
        .unwrap();
    world
        .docs
        .update_content(&title("Welcome/fi"), "", "FuzzyBot", "")
        .await
        .unwrap();
    let en = lang("en");
    world
        .units
        .update_unit(&UnitTitle::new(page.clone(), "1", lang("fi")), "Hei", false, &en)
        .await
        .unwrap();
    world
        .units
        .update_unit(
            &UnitTitle::new(page.clone(), "2", lang("fi")),
            "Lue $guide ensin",
            false,
            &en,
        )
        .await
        .unwrap();

    let queued = world
        .services
        .page_store
        .mark_page(
            &page,
            &[
                TranslationUnit::new("1", "Hello", UnitChange::New),
                TranslationUnit::new("2", GUIDE, UnitChange::New),
            ],
            RevisionId(10),
        )
        .await
        .unwrap();
    assert!(queued);
}

#[tokio::test]
async fn test_mark_then_drain_renders_every_language() {
    let world = World::new();
    marked_welcome(&world).await;

    let runner = world.services.runner();
    let executed = runner.run_until_idle().await.unwrap();

    // update, two renders, one index rebuild
    assert_eq!(executed, 4);
    assert_eq!(runner.stats().failed, 0);
    assert_eq!(
        world.docs.get_content(&title("Welcome/fi")).await.unwrap().as_deref(),
        Some("Hei\n\nLue [[Guide]] ensin")
    );
    assert_eq!(
        world.docs.get_content(&title("Welcome/en")).await.unwrap().as_deref(),
        Some("Hello\n\nRead the [[Guide]] first")
    );
    let (editor, _) = world.docs.last_edit(&title("Welcome/fi")).unwrap();
    assert_eq!(editor, world.services.config.system_editor);

    assert_eq!(
        world.services.message_index.lookup("Welcome/2"),
        Some(GroupId::new("page-Welcome").unwrap())
    );
    assert!(world.queue.pending().is_empty());
}

#[tokio::test]
async fn test_second_pass_writes_nothing() {
    let world = World::new();
    marked_welcome(&world).await;
    let runner = world.services.runner();
    runner.run_until_idle().await.unwrap();
    let writes = world.docs.write_count();

    marked_welcome_again(&world).await;
    runner.run_until_idle().await.unwrap();

    assert_eq!(world.docs.write_count(), writes);
    assert_eq!(world.services.message_index.rebuild_count(), 2);
}

async fn marked_welcome_again(world: &World) {
    world
        .services
        .page_store
        .mark_page(
            &title("Welcome"),
            &[
                TranslationUnit::new("1", "Hello", UnitChange::Unchanged),
                TranslationUnit::new("2", GUIDE, UnitChange::Unchanged),
            ],
            RevisionId(11),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_changed_unit_renders_stale_translation_until_retranslated() {
    let world = World::new();
    marked_welcome(&world).await;
    let runner = world.services.runner();
    runner.run_until_idle().await.unwrap();

    world
        .services
        .page_store
        .mark_page(
            &title("Welcome"),
            &[TranslationUnit::new("1", "Hello there", UnitChange::Changed)],
            RevisionId(12),
        )
        .await
        .unwrap();
    runner.run_until_idle().await.unwrap();

    let fi = UnitTitle::new(title("Welcome"), "1", lang("fi"));
    assert!(world.units.get_unit(&fi).await.unwrap().unwrap().fuzzy);
    assert_eq!(
        world.docs.get_content(&title("Welcome/fi")).await.unwrap().as_deref(),
        Some("Hei")
    );
    assert_eq!(
        world.docs.get_content(&title("Welcome/en")).await.unwrap().as_deref(),
        Some("Hello there")
    );
}

#[tokio::test]
async fn test_update_job_for_unmarked_page_fails_permanently() {
    let world = World::new();
    world
        .queue
        .enqueue(Job::update_translatable_page(&title("Plain"), &[]))
        .await
        .unwrap();

    let runner = world.services.runner();
    runner.run_until_idle().await.unwrap();

    let stats = runner.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.retried, 0);
    assert!(world.queue.pending_of_kind(JobKind::RenderTranslationPage).is_empty());
}

#[tokio::test]
async fn test_translation_page_created_between_updates_gets_rendered() {
    let world = World::new();
    marked_welcome(&world).await;
    let runner = world.services.runner();
    runner.run_until_idle().await.unwrap();

    world
        .docs
        .update_content(&title("Welcome/de"), "", "FuzzyBot", "")
        .await
        .unwrap();
    world
        .queue
        .enqueue(Job::update_translatable_page(&title("Welcome"), &[]))
        .await
        .unwrap();
    runner.run_until_idle().await.unwrap();

    // no German translations yet, so the source text is shown
    assert_eq!(
        world.docs.get_content(&title("Welcome/de")).await.unwrap().as_deref(),
        Some("Hello\n\nRead the [[Guide]] first")
    );
}

#[tokio::test]
async fn test_runner_writes_deferred_stats_after_each_job() {
    let world = World::new();
    let page = world
        .translated_page("Guide", &[("1", "Read"), ("2", "Write")], &["fi"])
        .await;
    let runner = world.services.runner();

    let group = GroupId::for_page(&page);
    world.services.stats.percentages(&group).await.unwrap();
    assert_eq!(world.services.stats.deferred_count(), 1);
    assert!(world.services.ports.stats.load(&group).await.unwrap().is_none());

    world
        .queue
        .enqueue(Job::message_index_rebuild().unwrap())
        .await
        .unwrap();
    runner.run_until_idle().await.unwrap();

    assert_eq!(world.services.stats.deferred_count(), 0);
    assert!(world.services.ports.stats.load(&group).await.unwrap().is_some());
}
