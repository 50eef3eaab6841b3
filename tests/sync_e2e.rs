mod support;

use std::time::Duration;

use support::ONE_PIXEL_GIF;

/// Scenario 6: reconciler drift. Files dropped into a user-managed area
/// while nothing was watching them get picked up by a plain reconcile pass,
/// and a second pass with no further filesystem change is a no-op.
#[tokio::test]
async fn reconciler_discovers_drifted_files_then_settles() {
    let harness = support::setup().await;
    let manual = harness.repo_dir.path().join("manual");
    tokio::fs::create_dir_all(&manual).await.unwrap();
    tokio::fs::write(manual.join("one.gif"), ONE_PIXEL_GIF).await.unwrap();
    tokio::fs::write(manual.join("two.gif"), b"second file contents").await.unwrap();
    tokio::fs::write(manual.join("three.gif"), b"third file contents").await.unwrap();

    let storage = harness.state.ctx.storage_for(&harness.repo_id).await.unwrap();
    let cancel = tokio_util::sync::CancellationToken::new();
    let first = lumilio::sync::reconciler::run_once(&storage, &harness.state.ctx.catalog, &harness.state.ctx.jobs, &harness.repo_id, &cancel)
        .await
        .unwrap();
    assert_eq!(first.new, 3);

    let second = lumilio::sync::reconciler::run_once(&storage, &harness.state.ctx.catalog, &harness.state.ctx.jobs, &harness.repo_id, &cancel)
        .await
        .unwrap();
    assert_eq!(second.new, 0);
    assert_eq!(second.changed, 0);

    let records = harness.state.ctx.catalog.list_file_records(&harness.repo_id).await.unwrap();
    assert_eq!(records.len(), 3);
}

/// Scenario 3 (upsert leg): a file dropped into a watched user-managed area
/// is picked up by the realtime watcher without a reconcile pass.
#[tokio::test]
async fn watcher_ingests_a_newly_created_file() {
    let harness = support::setup().await;
    let storage = harness.state.ctx.storage_for(&harness.repo_id).await.unwrap();

    let _watcher = lumilio::sync::watcher::spawn(storage, harness.state.ctx.jobs.clone(), harness.repo_id.clone()).unwrap();

    let manual = harness.repo_dir.path().join("manual");
    tokio::fs::create_dir_all(&manual).await.unwrap();
    tokio::fs::write(manual.join("a.gif"), ONE_PIXEL_GIF).await.unwrap();

    let mut found = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM assets WHERE repository_id = ? AND storage_path = ?")
            .bind(&harness.repo_id)
            .bind("manual/a.gif")
            .fetch_optional(harness.state.ctx.catalog.pool())
            .await
            .unwrap();
        if row.is_some() {
            found = true;
            break;
        }
    }
    assert!(found, "expected the watcher to ingest manual/a.gif within the polling window");
}
