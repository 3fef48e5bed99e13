//! Cache maintenance scenario tests
//!
//! Debug listing, per-image metadata, and age-based cleanup

use illumd::provider::{ScriptStep, ScriptedProvider};
use serde_json::{json, Value};

use super::fake_png;
use crate::harness::TestServer;

async fn start_with_image(tag: &str) -> (TestServer, Vec<u8>, String) {
    let png = fake_png(tag);
    let server = TestServer::start_with_provider(ScriptedProvider::new(vec![ScriptStep::png(&png)]))
        .await
        .unwrap();
    let key = server.cache().put(&png, "image/png").await.unwrap();
    (server, png, key)
}

/// Test: the debug listing reflects the cache contents
#[tokio::test]
async fn test_debug_cache_listing() {
    let (server, png, key) = start_with_image("listing").await;

    let body: Value = server.get("/api/debug/cache").await.unwrap().json().await.unwrap();
    assert_eq!(body["fileCount"], 1);
    assert!(body["cacheDir"].is_string());
    assert!(body["imagesDir"].as_str().unwrap().ends_with("images"));

    let file = &body["files"][0];
    assert_eq!(file["file"], format!("{}.png", key));
    assert_eq!(file["size"], png.len() as u64);
    assert!(file["modified"].is_string());
}

/// Test: metadata for a cached image
#[tokio::test]
async fn test_image_info() {
    let (server, png, key) = start_with_image("info").await;

    let resp = server.get(&format!("/api/cache/info/{}", key)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["key"], key.as_str());
    assert_eq!(body["url"], format!("/api/cache/image/{}", key));
    assert_eq!(
        body["thumbnailUrl"],
        format!("/api/cache/image/{}?size=thumb", key)
    );
    assert_eq!(body["size"], png.len() as u64);
    assert_eq!(body["contentType"], "image/png");

    let resp = server.get("/api/cache/info/missing").await.unwrap();
    assert_eq!(resp.status(), 404);
}

/// Test: cleanup without a body keeps recent images
#[tokio::test]
async fn test_cleanup_default_keeps_recent() {
    let (server, _, key) = start_with_image("recent").await;

    let resp = server
        .client
        .post(format!("{}/api/cache/cleanup", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["deletedFiles"], 0);
    assert_eq!(body["freedSpace"], 0);

    let resp = server.get(&format!("/api/cache/image/{}", key)).await.unwrap();
    assert_eq!(resp.status(), 200);
}

/// Test: cleanup with a zero age removes everything
#[tokio::test]
async fn test_cleanup_removes_old_images() {
    let (server, png, key) = start_with_image("stale").await;

    let resp = server
        .post("/api/cache/cleanup", &json!({ "maxAgeHours": 0 }))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["deletedFiles"], 1);
    assert_eq!(body["freedSpace"], png.len() as u64);

    let resp = server.get(&format!("/api/cache/image/{}", key)).await.unwrap();
    assert_eq!(resp.status(), 404);
    assert!(server.image_files().is_empty());
}

/// Test: a negative age is rejected
#[tokio::test]
async fn test_cleanup_rejects_negative_age() {
    let (server, _, _) = start_with_image("negative").await;

    let resp = server
        .post("/api/cache/cleanup", &json!({ "maxAgeHours": -1 }))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(server.image_files().len(), 1);
}
