//! Axum router construction.
//!
//! Builds the full application router with all route groups and middleware
//! layers.

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {o:?}");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = cors_layer(&ctx.config.server.cors_origins);

    let live_routes = Router::new()
        .route("/live/active", get(routes::live::list_active))
        .route(
            "/live/stream/{stream_id}/{file}",
            get(routes::live::serve_live_file),
        )
        .route("/live/ingest", get(routes::live::ingest));

    let video_routes = Router::new()
        .route("/videos", get(routes::videos::list_videos))
        .route("/videos/signed-url", get(routes::videos::signed_url))
        .route(
            "/videos/signed/{*file_path}",
            get(routes::videos::signed_file),
        )
        // The upload handler enforces `vod.max_upload_bytes` itself.
        .route(
            "/videos/upload",
            post(routes::videos::upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/videos/jobs/{job_id}", get(routes::videos::get_job));

    let api = live_routes.merge(video_routes);

    Router::new()
        .route("/health", get(routes::health::health))
        .route(
            "/stream/{asset_id}/{*file}",
            get(routes::vod::serve_asset_file),
        )
        .nest("/api", api)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use cf_av::{FfmpegTemplate, ToolRegistry};
    use cf_core::config::Config;
    use tower::ServiceExt;

    fn test_router(config: Config) -> (Router, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let mut config = config;
        config.storage.root = root.path().to_path_buf();
        let template = Arc::new(FfmpegTemplate::new(
            "ffmpeg",
            config.live.clone(),
            config.vod.clone(),
        ));
        let ctx = AppContext::new(config, template, Arc::new(ToolRegistry::default())).unwrap();
        (build_router(ctx), root)
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (app, _root) = test_router(Config::default());
        let resp = app
            .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_missing_encoder() {
        let (app, _root) = test_router(Config::default());
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["encoderAvailable"], false);
    }

    #[tokio::test]
    async fn ingest_requires_websocket_upgrade() {
        let (app, _root) = test_router(Config::default());
        let resp = app
            .oneshot(Request::get("/api/live/ingest").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn cors_allows_configured_origin_only() {
        let mut config = Config::default();
        config.server.cors_origins = vec!["https://player.example".into()];
        let (app, _root) = test_router(config);

        let resp = app
            .clone()
            .oneshot(
                Request::get("/health")
                    .header(header::ORIGIN, "https://player.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://player.example"
        );

        let resp = app
            .oneshot(
                Request::get("/health")
                    .header(header::ORIGIN, "https://elsewhere.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(resp
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }
}
