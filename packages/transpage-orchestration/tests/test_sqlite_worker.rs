//! A producer and a worker sharing one database file
#![cfg(feature = "sqlite")]

use pretty_assertions::assert_eq;
use std::path::Path;
use tempfile::TempDir;
use transpage_orchestration::{queue_from_config, JobQueue, OrchestratorConfig, Ports, Services};
use transpage_storage::{DocumentStore, PageTitle, RevisionId, TranslationUnit, UnitChange};

fn services(path: &Path) -> Services {
    let config = OrchestratorConfig {
        db_path: Some(path.to_path_buf()),
        ..OrchestratorConfig::default()
    };
    let ports = Ports::from_config(&config).unwrap();
    let queue = queue_from_config(&config).unwrap();
    Services::new(config, ports, queue, Vec::new()).unwrap()
}

#[tokio::test]
async fn test_worker_runs_jobs_queued_elsewhere() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("transpage.db");
    let producer = services(&path);
    let page = PageTitle::new("Welcome").unwrap();
    let fi = PageTitle::new("Welcome/fi").unwrap();

    producer
        .ports
        .docs
        .update_content(&page, "source text", "Admin", "")
        .await
        .unwrap();
    producer
        .ports
        .docs
        .update_content(&fi, "", "FuzzyBot", "")
        .await
        .unwrap();
    let queued = producer
        .page_store
        .mark_page(
            &page,
            &[TranslationUnit::new("1", "Hello", UnitChange::New)],
            RevisionId(10),
        )
        .await
        .unwrap();
    assert!(queued);

    let worker = services(&path);
    assert_eq!(worker.queue.pending_count().await.unwrap(), 1);

    // update, two renders, one index rebuild
    assert_eq!(worker.runner().run_until_idle().await.unwrap(), 4);
    assert_eq!(producer.queue.pending_count().await.unwrap(), 0);
    assert_eq!(
        producer.ports.docs.get_content(&fi).await.unwrap().as_deref(),
        Some("Hello")
    );
}

#[tokio::test]
async fn test_without_db_path_everything_stays_in_process() {
    let config = OrchestratorConfig::default();
    let first = queue_from_config(&config).unwrap();
    let second = queue_from_config(&config).unwrap();

    first
        .enqueue(transpage_orchestration::Job::message_index_rebuild().unwrap())
        .await
        .unwrap();

    assert_eq!(first.pending_count().await.unwrap(), 1);
    assert_eq!(second.pending_count().await.unwrap(), 0);
}
