use std::sync::Arc;
use std::time::Duration;

use shelfscan_core::dispatch::CapabilityRegistry;
use shelfscan_core::job::{BatchRun, JobStatus, SubmitOptions};
use shelfscan_core::models::UpsertOutcome;
use shelfscan_core::progress::NullSink;
use shelfscan_core::rate_limiter::RateLimitConfig;
use shelfscan_core::testutil::{MockCapability, MockContextProvider};
use shelfscan_core::traits::{ProductStore, RunArchive};
use shelfscan_core::{OrchestratorConfig, Orchestrator};
use uuid::Uuid;

use crate::common::setup_test_db;

fn finished_run(label: &str) -> BatchRun {
    let mut run = BatchRun::new(
        vec![
            "https://shop.example.com/p/a".into(),
            "https://shop.example.com/p/b".into(),
            "https://shop.example.com/p/c".into(),
        ],
        Some(label.into()),
    );
    assert!(run.mark_running(0, "shopify"));
    assert!(run.mark_succeeded(0, &UpsertOutcome::created(Uuid::new_v4())));
    assert!(run.mark_running(1, "generic"));
    assert!(run.mark_failed(1, "Extraction failed: no product name found"));
    run.mark_cancelled();
    assert!(run.finish());
    run
}

#[tokio::test]
async fn archive_and_reload_run() {
    let (db, _container) = setup_test_db().await;
    let repo = db.run_repo();

    let run = finished_run("nightly");
    repo.archive(&run).await.unwrap();

    let loaded = repo.find(run.id).await.unwrap().expect("archived run");
    assert_eq!(loaded.label.as_deref(), Some("nightly"));
    assert!(loaded.cancelled);
    assert!(loaded.is_finished());
    assert_eq!(loaded.jobs.len(), 3);
    assert_eq!(loaded.jobs[0].status, JobStatus::Succeeded);
    assert_eq!(loaded.jobs[0].platform.as_deref(), Some("shopify"));
    assert_eq!(loaded.jobs[0].product_id, run.jobs[0].product_id);
    assert_eq!(loaded.jobs[1].status, JobStatus::Failed);
    assert!(loaded.jobs[1].error.as_deref().unwrap().contains("no product name"));
    assert_eq!(loaded.jobs[2].status, JobStatus::Pending);

    let summary = loaded.summary();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);

    assert!(repo.find(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn archiving_twice_replaces_jobs() {
    let (db, _container) = setup_test_db().await;
    let repo = db.run_repo();

    let run = finished_run("weekly");
    repo.archive(&run).await.unwrap();
    repo.archive(&run).await.unwrap();

    let loaded = repo.find(run.id).await.unwrap().unwrap();
    assert_eq!(loaded.jobs.len(), 3);
    assert_eq!(repo.recent(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn recent_lists_newest_first() {
    let (db, _container) = setup_test_db().await;
    let repo = db.run_repo();

    let first = finished_run("first");
    repo.archive(&first).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = finished_run("second");
    repo.archive(&second).await.unwrap();

    let recent = repo.recent(10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].run_id, second.id);
    assert_eq!(recent[1].run_id, first.id);
    assert_eq!(repo.recent(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn orchestrated_batch_persists_products_and_run() {
    let (db, _container) = setup_test_db().await;
    let config = OrchestratorConfig::default()
        .with_rate_limit(RateLimitConfig::new(Duration::ZERO))
        .with_settle_delay(Duration::ZERO);
    let registry = Arc::new(CapabilityRegistry::new(Arc::new(
        MockCapability::new().failing_on("https://shop.example.com/p/b"),
    )));
    let orch = Orchestrator::new(MockContextProvider::new(), registry, db.product_repo(), config)
        .with_archive(db.run_repo());

    let locators = vec![
        "https://shop.example.com/p/a".to_string(),
        "https://shop.example.com/p/b".to_string(),
        "https://shop.example.com/p/a?utm_source=x".to_string(),
    ];
    let summary = orch
        .run_batch(locators, SubmitOptions::default().with_label("e2e"), Arc::new(NullSink))
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.updated, 1);
    assert_eq!(db.product_repo().count().await.unwrap(), 1);

    let archived = db.run_repo().find(summary.run_id).await.unwrap().unwrap();
    assert_eq!(archived.label.as_deref(), Some("e2e"));
    assert_eq!(archived.summary().failed, 1);
}
