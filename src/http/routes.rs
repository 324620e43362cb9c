//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::util::time::uptime_secs;
use crate::ws::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // No configured origins means any origin may connect
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origins
        .iter()
        .filter_map(|s| s.parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);
    let cors = if allowed_origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(allowed_origins)
    };

    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .fallback_service(static_files)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    connections: usize,
    rooms: usize,
}

async fn health_handler(State(state): State<AppState>) -> Response {
    match state.directory.stats().await {
        Some(stats) => Json(HealthResponse {
            status: "ok",
            uptime_secs: uptime_secs(),
            connections: stats.connections,
            rooms: stats.rooms,
        })
        .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Directory unavailable").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;

    fn router() -> Router {
        let config = Config {
            static_dir: "./does-not-exist".into(),
            ..Config::default()
        };
        build_router(AppState::new(config))
    }

    #[tokio::test]
    async fn health_reports_directory_stats() {
        let response = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["connections"], 0);
        assert_eq!(health["rooms"], 0);
    }

    #[tokio::test]
    async fn unknown_paths_fall_through_to_static_files() {
        let response = router()
            .oneshot(Request::get("/missing.html").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
