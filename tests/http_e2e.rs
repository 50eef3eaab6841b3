mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use sha2::{Digest, Sha256};
use tower::util::ServiceExt;

use support::{multipart_body, ONE_PIXEL_GIF};

fn upload_request(repo_id: &str, file_name: &str, bytes: &[u8], client_hash: Option<&str>) -> Request<Body> {
    let boundary = "X-BOUNDARY-42";
    let body = multipart_body(boundary, repo_id, file_name, "image/gif", bytes);
    let mut builder = Request::builder()
        .method("POST")
        .uri("/assets")
        .header("content-type", format!("multipart/form-data; boundary={boundary}"));
    if let Some(hash) = client_hash {
        builder = builder.header("x-content-hash", hash);
    }
    builder.body(Body::from(body)).unwrap()
}

/// Scenario 1: CAS happy path.
#[tokio::test]
async fn cas_happy_path_commits_under_inbox() {
    let harness = support::setup().await;
    let hash = format!("{:x}", Sha256::digest(ONE_PIXEL_GIF));
    let router = lumilio::api::router(harness.state.clone());

    let response = router
        .oneshot(upload_request(&harness.repo_id, "a.gif", ONE_PIXEL_GIF, Some(&hash)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["status"], "created");
    let asset_id = parsed["asset_id"].as_str().unwrap().to_string();

    let expected_relative = format!("inbox/{}/{}/{}/{}.gif", &hash[0..2], &hash[2..4], &hash[4..6], hash);
    assert!(harness.repo_dir.path().join(&expected_relative).exists());

    let asset = harness.state.ctx.catalog.get(&asset_id).await.unwrap();
    assert_eq!(asset.storage_path, expected_relative);
    assert_eq!(asset.hash, hash);
}

/// Scenario 2: dedup.
#[tokio::test]
async fn duplicate_upload_dedupes_to_one_row() {
    let harness = support::setup().await;
    let hash = format!("{:x}", Sha256::digest(ONE_PIXEL_GIF));
    let router = lumilio::api::router(harness.state.clone());

    let first = router.clone().oneshot(upload_request(&harness.repo_id, "a.gif", ONE_PIXEL_GIF, None)).await.unwrap();
    let first_body = axum::body::to_bytes(first.into_body(), 1024 * 1024).await.unwrap();
    let first_json: serde_json::Value = serde_json::from_slice(&first_body).unwrap();
    let first_id = first_json["asset_id"].as_str().unwrap().to_string();

    let second = router.oneshot(upload_request(&harness.repo_id, "b.gif", ONE_PIXEL_GIF, None)).await.unwrap();
    let second_body = axum::body::to_bytes(second.into_body(), 1024 * 1024).await.unwrap();
    let second_json: serde_json::Value = serde_json::from_slice(&second_body).unwrap();

    assert_eq!(second_json["status"], "deduplicated");
    assert_eq!(second_json["asset_id"].as_str().unwrap(), first_id);

    let inbox = harness.repo_dir.path().join("inbox");
    let file_count = walkdir::WalkDir::new(&inbox).into_iter().filter(|e| e.as_ref().map(|e| e.file_type().is_file()).unwrap_or(false)).count();
    assert_eq!(file_count, 1);
}

/// Scenario 4: delete via API.
#[tokio::test]
async fn delete_via_api_moves_original_to_trash() {
    let harness = support::setup().await;
    let router = lumilio::api::router(harness.state.clone());

    let upload = router.clone().oneshot(upload_request(&harness.repo_id, "a.gif", ONE_PIXEL_GIF, None)).await.unwrap();
    let body = axum::body::to_bytes(upload.into_body(), 1024 * 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let asset_id = json["asset_id"].as_str().unwrap().to_string();

    let asset_before = harness.state.ctx.catalog.get(&asset_id).await.unwrap();
    let original_relative = asset_before.storage_path.clone();
    assert!(harness.repo_dir.path().join(&original_relative).exists());

    let delete_request = Request::builder().method("DELETE").uri(format!("/assets/{asset_id}")).body(Body::empty()).unwrap();
    let delete_response = router.clone().oneshot(delete_request).await.unwrap();
    assert_eq!(delete_response.status(), StatusCode::NO_CONTENT);

    assert!(!harness.repo_dir.path().join(&original_relative).exists());

    let get_request = Request::builder().method("DELETE").uri(format!("/assets/{asset_id}")).body(Body::empty()).unwrap();
    let second_delete = router.oneshot(get_request).await.unwrap();
    assert_eq!(second_delete.status(), StatusCode::NOT_FOUND);

    let trash_root = harness.repo_dir.path().join(".lumilio/trash");
    let sidecar = walkdir::WalkDir::new(&trash_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
        .expect("expected a trash sidecar");
    let sidecar_bytes = std::fs::read(sidecar.path()).unwrap();
    let entry: lumilio::db::models::TrashEntry = serde_json::from_slice(&sidecar_bytes).unwrap();
    assert_eq!(entry.original_path, original_relative);
}

/// Adapted scenario 5 (ingest failure): a duplicate-path collision under the
/// `reject` policy fails `commit`, and the staged bytes are relocated to
/// `staging/failed/` rather than silently disappearing.
#[tokio::test]
async fn commit_failure_relocates_staged_bytes_to_failed() {
    use lumilio::storage::layout::{DuplicatePolicy, RepoConfig, StorageStrategy};
    use lumilio::storage::StorageLayer;

    let tmp = tempfile::tempdir().unwrap();
    let cfg = RepoConfig {
        id: "r1".to_string(),
        storage_strategy: StorageStrategy::Date,
        preserve_filename: true,
        duplicate_policy: DuplicatePolicy::Reject,
        protected_prefixes: RepoConfig::default_protected_prefixes(),
        trash_days: 30,
    };
    let storage = StorageLayer::new(tmp.path().to_path_buf(), cfg);

    let staging1 = storage.stage_upload(ONE_PIXEL_GIF, "a.gif").await.unwrap();
    storage.commit(&staging1, "h1", "a.gif", "image/gif").await.unwrap();

    let staging2 = storage.stage_upload(ONE_PIXEL_GIF, "a.gif").await.unwrap();
    let result = storage.commit(&staging2, "h2", "a.gif", "image/gif").await;
    assert!(result.is_err());

    // The coordinator relocates on commit failure; exercise that path directly.
    let failed_path = storage.move_to_failed(&staging2, "a.gif", "duplicate-path-rejected").await.unwrap();
    assert!(failed_path.starts_with(tmp.path().join(".lumilio/staging/failed")));
    assert!(!staging2.exists());
}
