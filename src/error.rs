use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::{
    extract::ExtractError, media::StreamError, params::ValidationError,
    transcode::TranscodeError,
};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: &'static str,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
        }
    }

    pub fn video_unavailable() -> Self {
        Self::new(StatusCode::GONE, "VIDEO_UNAVAILABLE", "Video unavailable")
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "EXTRACTION_FAILED",
            message,
        )
    }

    pub fn transcoding(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "TRANSCODING_FAILED",
            message,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });

        (self.status, body).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(error: ValidationError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error.code(), error.to_string())
    }
}

impl From<ExtractError> for ApiError {
    fn from(error: ExtractError) -> Self {
        match error {
            ExtractError::NotFound(_) => Self::video_unavailable(),
            other => Self::extraction(format!("Error retrieving video: {other}")),
        }
    }
}

impl From<TranscodeError> for ApiError {
    fn from(error: TranscodeError) -> Self {
        Self::transcoding(format!("Error processing video: {error}"))
    }
}

impl From<StreamError> for ApiError {
    fn from(error: StreamError) -> Self {
        match error {
            StreamError::Extraction(message) => {
                Self::extraction(format!("Error downloading video: {message}"))
            }
            StreamError::Transcoding(message) => {
                Self::transcoding(format!("Error processing video: {message}"))
            }
        }
    }
}

/// Failures that stop the server before it accepts requests.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Invalid origin in ALLOWED_ORIGINS: {0}. Use values like https://example.com")]
    InvalidOrigin(String),

    #[error("Could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    use crate::params::SourceScope;

    async fn body_json(error: ApiError) -> (StatusCode, Value) {
        let response = error.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn validation_errors_are_bad_requests() {
        let (status, body) = body_json(ValidationError::MissingUrl.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "URL is required");
        assert_eq!(body["code"], "MISSING_URL");

        let (status, body) =
            body_json(ValidationError::InvalidSourceUrl(SourceScope::Playlist).into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "URL is not a supported playlist URL");
    }

    #[tokio::test]
    async fn not_found_maps_to_gone() {
        let (status, body) =
            body_json(ExtractError::NotFound("ERROR: Video unavailable".into()).into()).await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(body["code"], "VIDEO_UNAVAILABLE");
    }

    #[tokio::test]
    async fn other_failures_are_server_errors() {
        let (status, body) = body_json(ExtractError::Timeout(60).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "EXTRACTION_FAILED");

        let (status, body) =
            body_json(StreamError::Transcoding("ffmpeg exited with 1".into()).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "TRANSCODING_FAILED");
    }
}
