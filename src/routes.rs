use std::{collections::HashSet, path::Path, sync::Arc};

use axum::{
    Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderValue, Method, StatusCode, header::CONTENT_DISPOSITION},
    response::Response,
    routing::get,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::{
    config::normalize_origin,
    error::ApiError,
    extract::{Extractor, VideoMetadata},
    params::{self, RawParams, SourceScope},
    pipeline,
    transcode::Transcoder,
};

#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<dyn Extractor>,
    pub transcoder: Arc<dyn Transcoder>,
}

impl AppState {
    pub fn new(extractor: impl Extractor + 'static, transcoder: impl Transcoder + 'static) -> Self {
        Self {
            extractor: Arc::new(extractor),
            transcoder: Arc::new(transcoder),
        }
    }
}

/// Builds the HTTP surface. Anything that is not an API route is served from
/// `static_dir`, so `/` returns the bundled form page.
pub fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/download", get(download))
        .route("/playlist", get(playlist))
        .route("/info", get(info))
        .route("/health", get(health))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// CORS for cross-origin frontends. Only GET is exposed, together with
/// `Content-Disposition` so browsers can read the download filename.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allowed: Arc<HashSet<String>> = Arc::new(allowed_origins.iter().cloned().collect());
    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        allowed.len(),
        allowed_origins
    );

    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let normalized = origin.to_str().ok().and_then(normalize_origin);
        let permitted = normalized
            .as_ref()
            .is_some_and(|value| allowed.contains(value));
        debug!(
            "CORS origin check raw={:?} normalized={:?} allowed={}",
            origin, normalized, permitted
        );
        permitted
    });

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION])
}

async fn download(
    State(state): State<AppState>,
    query: Result<Query<RawParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    start_download(state, query, SourceScope::Video).await
}

async fn playlist(
    State(state): State<AppState>,
    query: Result<Query<RawParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    start_download(state, query, SourceScope::Playlist).await
}

async fn start_download(
    state: AppState,
    query: Result<Query<RawParams>, QueryRejection>,
    scope: SourceScope,
) -> Result<Response, ApiError> {
    let raw = query_params(query)?;
    let request =
        params::validate_download(&raw, scope, state.extractor.as_ref()).map_err(|error| {
            warn!(scope = scope.as_str(), url = ?raw.url, "rejected download request: {error}");
            ApiError::from(error)
        })?;

    pipeline::handle_download(
        state.extractor.as_ref(),
        state.transcoder.as_ref(),
        request,
    )
    .await
}

async fn info(
    State(state): State<AppState>,
    query: Result<Query<RawParams>, QueryRejection>,
) -> Result<Json<VideoMetadata>, ApiError> {
    let raw = query_params(query)?;
    let url = params::validate_info(&raw, state.extractor.as_ref()).map_err(|error| {
        warn!(url = ?raw.url, "rejected info request: {error}");
        ApiError::from(error)
    })?;

    pipeline::handle_info(state.extractor.as_ref(), url).await
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

fn query_params(query: Result<Query<RawParams>, QueryRejection>) -> Result<RawParams, ApiError> {
    query.map(|Query(raw)| raw).map_err(|rejection| {
        warn!("malformed query string: {rejection}");
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_QUERY",
            rejection.body_text(),
        )
    })
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, header::ORIGIN},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{extract::YtDlp, transcode::Ffmpeg};

    fn app() -> Router {
        let state = AppState::new(YtDlp::default(), Ffmpeg::default());
        router(state, Path::new("public"))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = get_json(app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn duplicate_query_keys_are_bad_requests() {
        let (status, body) = get_json(
            app(),
            "/download?url=https://youtu.be/dQw4w9WgXcQ&url=https://youtu.be/dQw4w9WgXcQ",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_QUERY");
    }

    #[tokio::test]
    async fn unrecognized_urls_are_rejected_before_extraction() {
        let (status, body) =
            get_json(app(), "/download?url=https%3A%2F%2Fexample.com%2Fclip").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_SOURCE_URL");

        let (status, body) = get_json(
            app(),
            "/playlist?url=https%3A%2F%2Fexample.com%2Fplaylist%3Flist%3DPL123",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "URL is not a supported playlist URL");
    }

    #[tokio::test]
    async fn cors_allows_only_configured_origins() {
        let app = app().layer(cors_layer(&["https://example.com".to_string()]));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(ORIGIN, "https://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "https://example.com"
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(ORIGIN, "https://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(
            response
                .headers()
                .get("access-control-allow-origin")
                .is_none()
        );
    }
}
