//! Signed URL issuing and verification over HTTP.

mod common;

use cf_core::config::Config;
use cf_server::signer::{HmacUrlSigner, UrlSigner};
use common::{segment_bytes, TestHarness};

const SECRET: &str = "integration-test-signing-secret";

async fn signing_harness() -> TestHarness {
    let mut config = Config::default();
    config.signing.secret = Some(SECRET.into());
    TestHarness::with_server_config(config).await
}

async fn issue(h: &TestHarness, file_path: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(h.url("/api/videos/signed-url"))
        .query(&[("filePath", file_path)])
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn signed_url_round_trip() {
    let h = signing_harness().await;
    let data = segment_bytes();
    let asset = h.publish_asset(&data);

    let resp = issue(&h, &format!("{asset}/segment_000.ts")).await;
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    let url = json["url"].as_str().unwrap();
    assert!(url.starts_with(&format!("/api/videos/signed/{asset}/segment_000.ts?expires=")));

    let expires_at = chrono::DateTime::parse_from_rfc3339(json["expiresAt"].as_str().unwrap())
        .unwrap();
    assert!(expires_at > chrono::Utc::now());

    let resp = reqwest::get(h.url(url)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "video/mp2t");
    assert_eq!(&resp.bytes().await.unwrap()[..], &data[..]);

    // Ranges work through signed URLs too.
    let resp = reqwest::Client::new()
        .get(h.url(url))
        .header("range", "bytes=10-19")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 206);
    assert_eq!(resp.headers()["content-range"], "bytes 10-19/1000");
}

#[tokio::test]
async fn tampered_and_missing_signatures_are_forbidden() {
    let h = signing_harness().await;
    let asset = h.publish_asset(b"segment");
    let file = format!("{asset}/index.m3u8");

    let json: serde_json::Value = issue(&h, &file).await.json().await.unwrap();
    let url = json["url"].as_str().unwrap();

    // Same signature, different file.
    let other = url.replace("index.m3u8", "segment_000.ts");
    let resp = reqwest::get(h.url(&other)).await.unwrap();
    assert_eq!(resp.status(), 403);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "forbidden");

    let resp = reqwest::get(h.url(&format!("{url}00"))).await.unwrap();
    assert_eq!(resp.status(), 403);

    let resp = reqwest::get(h.url(&format!("/api/videos/signed/{file}"))).await.unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn expired_signature_is_forbidden() {
    let h = signing_harness().await;
    let asset = h.publish_asset(b"segment");
    let file = format!("{asset}/index.m3u8");

    let expires = chrono::Utc::now().timestamp() - 60;
    let signature = HmacUrlSigner::new(SECRET).unwrap().sign(&file, expires);

    let resp = reqwest::get(h.url(&format!(
        "/api/videos/signed/{file}?expires={expires}&signature={signature}"
    )))
    .await
    .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn issuing_requires_existing_file_and_path() {
    let h = signing_harness().await;

    let resp = reqwest::get(h.url("/api/videos/signed-url")).await.unwrap();
    assert_eq!(resp.status(), 400);

    let resp = issue(&h, &format!("{}/index.m3u8", cf_core::AssetId::new())).await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn signing_without_secret_is_unavailable() {
    let h = TestHarness::with_server().await;
    let asset = h.publish_asset(b"segment");

    let resp = issue(&h, &format!("{asset}/index.m3u8")).await;
    assert_eq!(resp.status(), 503);

    let resp = reqwest::get(h.url(&format!(
        "/api/videos/signed/{asset}/index.m3u8?expires=9999999999&signature=00"
    )))
    .await
    .unwrap();
    assert_eq!(resp.status(), 503);
}
