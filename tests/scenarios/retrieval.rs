//! Retrieval scenario tests
//!
//! Serving cached images and thumbnails by key, rejecting everything else

use illumd::generate::StreamEvent;
use illumd::provider::{ScriptStep, ScriptedProvider};
use serde_json::json;

use super::{fake_png, real_png};
use crate::harness::TestServer;

/// Generate one image and return its url
async fn generate_image(server: &TestServer, prompt: &str) -> String {
    let mut stream = server
        .generate_with(json!({ "paperText": prompt, "variants": 1 }))
        .await
        .unwrap();
    match stream.expect("image").await.unwrap() {
        StreamEvent::Image { url, .. } => {
            stream.collect().await.unwrap();
            url
        }
        other => panic!("expected image event, got {:?}", other),
    }
}

/// Test: an unknown key is a plain 404 without image headers
#[tokio::test]
async fn test_unknown_key_not_found() {
    let server = TestServer::start().await.unwrap();

    let resp = server.get("/api/cache/image/nonexistent-12345").await.unwrap();
    assert_eq!(resp.status(), 404);
    assert!(resp.headers().get("x-image-size").is_none());
    assert!(resp.headers().get("x-image-path").is_none());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Image not found");

    let resp = server.head("/api/cache/image/nonexistent-12345").await.unwrap();
    assert_eq!(resp.status(), 404);
    assert!(resp.headers().get("x-image-size").is_none());
}

/// Test: keys that could escape the cache directory are rejected
#[tokio::test]
async fn test_malformed_keys_rejected() {
    let server = TestServer::start().await.unwrap();
    // Something real to escape to
    generate_image(&server, "bait").await;

    for path in [
        "/api/cache/image/..%2F..%2Fetc%2Fpasswd",
        "/api/cache/image/..%2Fcache",
        "/api/cache/image/key%00.png",
        "/api/cache/image/has%20space",
        "/api/cache/image/",
    ] {
        let resp = server.get(path).await.unwrap();
        assert_eq!(resp.status(), 404, "{}", path);
        assert!(resp.headers().get("x-image-size").is_none(), "{}", path);
    }

    let too_long = format!("/api/cache/image/{}", "a".repeat(129));
    assert_eq!(server.get(&too_long).await.unwrap().status(), 404);
}

/// Test: HEAD answers with headers and no body
#[tokio::test]
async fn test_head_existing_image() {
    let png = fake_png("head");
    let server = TestServer::start_with_provider(ScriptedProvider::new(vec![ScriptStep::png(&png)]))
        .await
        .unwrap();
    let url = generate_image(&server, "head").await;

    let resp = server.head(&url).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-length").unwrap().to_str().unwrap(),
        png.len().to_string()
    );
    assert_eq!(
        resp.headers().get("x-image-size").unwrap().to_str().unwrap(),
        png.len().to_string()
    );
    assert!(resp
        .headers()
        .get("cache-control")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("immutable"));
    assert!(resp.bytes().await.unwrap().is_empty());
}

/// Test: an evicted image is a miss, not an error
#[tokio::test]
async fn test_evicted_image_not_found() {
    let provider = ScriptedProvider::new(vec![ScriptStep::png(&fake_png("old"))]);
    let server = TestServer::start_with(provider, |config| {
        config.cache.max_entries = 1;
    })
    .await
    .unwrap();
    let first = generate_image(&server, "first").await;

    // Different bytes push the first entry out
    server
        .cache()
        .put(&fake_png("new"), "image/png")
        .await
        .unwrap();

    let resp = server.get(&first).await.unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(server.image_files().len(), 1);
}

/// Test: images survive a cache reopen
#[tokio::test]
async fn test_images_survive_reopen() {
    let png = fake_png("persistent");
    let server = TestServer::start_with_provider(ScriptedProvider::new(vec![ScriptStep::png(&png)]))
        .await
        .unwrap();
    let url = generate_image(&server, "persist").await;
    let key = url.rsplit('/').next().unwrap().to_string();

    let root = server.cache().root().to_path_buf();
    let reopened = illumd::cache::ImageCache::open(root, illumd::cache::RetentionPolicy::default())
        .await
        .unwrap();
    let entry = reopened.get(&key).await.unwrap().expect("entry missing after reopen");
    assert_eq!(entry.data, png);
    assert_eq!(entry.content_type, "image/png");
}

/// Test: a file removed behind the cache's back is a miss for GET and HEAD
#[tokio::test]
async fn test_removed_file_not_found() {
    let png = fake_png("removed");
    let server = TestServer::start_with_provider(ScriptedProvider::new(vec![ScriptStep::png(&png)]))
        .await
        .unwrap();
    let url = generate_image(&server, "removed").await;
    let key = url.rsplit('/').next().unwrap().to_string();

    for file in server.image_files() {
        std::fs::remove_file(file).unwrap();
    }

    // HEAD notices on its own, without a GET first
    let resp = server.head(&url).await.unwrap();
    assert_eq!(resp.status(), 404);
    assert!(resp.headers().get("x-image-size").is_none());
    assert_eq!(server.get(&url).await.unwrap().status(), 404);
    assert!(!server.cache().exists(&key));

    // Storing the same bytes again brings it back
    assert_eq!(server.cache().put(&png, "image/png").await.unwrap(), key);
    assert_eq!(server.head(&url).await.unwrap().status(), 200);
    let resp = server.get(&url).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), png.as_slice());
}

/// Test: `?size=thumb` serves a PNG that fits in 200x200
#[tokio::test]
async fn test_thumbnail_served() {
    let png = real_png(800, 400);
    let server = TestServer::start_with_provider(ScriptedProvider::new(vec![ScriptStep::png(&png)]))
        .await
        .unwrap();
    let url = generate_image(&server, "thumb").await;

    let resp = server.get(&format!("{}?size=thumb", url)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap().to_str().unwrap(),
        "image/png"
    );
    let thumb = image::load_from_memory(&resp.bytes().await.unwrap()).unwrap();
    assert_eq!((thumb.width(), thumb.height()), (200, 100));

    // Any other size is the original
    let resp = server.get(&format!("{}?size=large", url)).await.unwrap();
    assert_eq!(resp.bytes().await.unwrap().as_ref(), png.as_slice());

    let resp = server
        .get("/api/cache/image/nonexistent-12345?size=thumb")
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

/// Test: an image that cannot be decoded falls back to the original
#[tokio::test]
async fn test_thumbnail_falls_back_to_original() {
    let png = fake_png("undecodable");
    let server = TestServer::start_with_provider(ScriptedProvider::new(vec![ScriptStep::png(&png)]))
        .await
        .unwrap();
    let url = generate_image(&server, "fallback").await;

    let resp = server.get(&format!("{}?size=thumb", url)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), png.as_slice());
}
