//! Upload → packaging job → published asset, over HTTP.

#![cfg(unix)]

mod common;

use std::time::Duration;

use cf_core::config::Config;
use common::{segment_bytes, ShellTemplate, TestHarness};

/// Poll a job until it reaches a terminal state.
async fn wait_for_job(h: &TestHarness, status_url: &str) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job: serde_json::Value = reqwest::get(h.url(status_url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let state = job["state"].as_str().unwrap_or_default().to_string();
        if state == "succeeded" || state == "failed" || tokio::time::Instant::now() >= deadline {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn upload(h: &TestHarness, query: &str, body: Vec<u8>) -> reqwest::Response {
    reqwest::Client::new()
        .post(h.url(&format!("/api/videos/upload{query}")))
        .body(body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn three_rendition_upload_publishes_master_playlist() {
    let h = TestHarness::with_server().await;

    let resp = upload(
        &h,
        "?filename=talk.mp4&renditions=1920x1080:5000k:192k,1280x720:2800k:128k,640x360:800k:96k",
        segment_bytes(),
    )
    .await;
    assert_eq!(resp.status(), 202);
    let accepted: serde_json::Value = resp.json().await.unwrap();
    let status_url = accepted["statusUrl"].as_str().unwrap().to_string();
    assert_eq!(status_url, format!("/api/videos/jobs/{}", accepted["jobId"].as_str().unwrap()));

    let job = wait_for_job(&h, &status_url).await;
    assert_eq!(job["state"], "succeeded", "job: {job}");
    assert_eq!(job["sourceName"], "talk.mp4");
    assert_eq!(job["renditions"], 3);
    let playlist_url = job["playlistUrl"].as_str().unwrap().to_string();

    let master = reqwest::get(h.url(&playlist_url)).await.unwrap().text().await.unwrap();
    let variants: Vec<&str> = master
        .lines()
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();
    assert_eq!(variants, ["v0/index.m3u8", "v1/index.m3u8", "v2/index.m3u8"]);
    assert!(master.contains("BANDWIDTH=5192000,RESOLUTION=1920x1080"));
    assert!(master.contains("RESOLUTION=640x360"));

    let base = playlist_url.trim_end_matches("index.m3u8");
    for variant in variants {
        let resp = reqwest::get(h.url(&format!("{base}{variant}"))).await.unwrap();
        assert_eq!(resp.status(), 200, "variant {variant}");

        let segment = format!("{base}{}", variant.replace("index.m3u8", "segment_000.ts"));
        let resp = reqwest::Client::new()
            .get(h.url(&segment))
            .header("range", "bytes=0-99")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 206);
        assert_eq!(resp.headers()["content-range"], "bytes 0-99/1000");
    }

    // The upload itself is gone and the asset is listed.
    assert!(std::fs::read_dir(h.ctx.store.staging_root()).unwrap().next().is_none());
    let list: serde_json::Value = reqwest::get(h.url("/api/videos"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["videos"][0]["variants"], 3);
    assert_eq!(list["videos"][0]["assetId"], job["assetId"]);
}

#[tokio::test]
async fn failed_encode_marks_job_failed() {
    let template = ShellTemplate {
        vod: r#"echo 'moov atom not found' >&2; exit 1"#,
        ..ShellTemplate::default()
    };
    let h = TestHarness::with_options(Config::default(), template).await;

    let resp = upload(&h, "?filename=broken.mov", b"not a movie".to_vec()).await;
    assert_eq!(resp.status(), 202);
    let accepted: serde_json::Value = resp.json().await.unwrap();

    let job = wait_for_job(&h, accepted["statusUrl"].as_str().unwrap()).await;
    assert_eq!(job["state"], "failed");
    assert!(job["error"].as_str().unwrap().contains("moov atom not found"));
    assert!(job["assetId"].is_null());

    let list: serde_json::Value = reqwest::get(h.url("/api/videos"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(list["videos"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let mut config = Config::default();
    config.vod.max_upload_bytes = 100;
    let h = TestHarness::with_server_config(config).await;

    let resp = upload(&h, "", vec![0u8; 101]).await;
    assert_eq!(resp.status(), 413);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "payload_too_large");
    assert!(h.ctx.jobs.is_empty());
}

#[tokio::test]
async fn empty_upload_and_bad_ladder_are_rejected() {
    let h = TestHarness::with_server().await;

    let resp = upload(&h, "", Vec::new()).await;
    assert_eq!(resp.status(), 400);

    let resp = upload(&h, "?renditions=huge", vec![1u8; 10]).await;
    assert_eq!(resp.status(), 400);

    assert!(h.ctx.jobs.is_empty());
    assert!(std::fs::read_dir(h.ctx.store.staging_root()).unwrap().next().is_none());
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let h = TestHarness::with_server().await;

    let resp = reqwest::get(h.url(&format!("/api/videos/jobs/{}", cf_core::JobId::new())))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = reqwest::get(h.url("/api/videos/jobs/garbage")).await.unwrap();
    assert_eq!(resp.status(), 404);
}
