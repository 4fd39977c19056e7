//! Request pipeline: validated request → metadata → source stream →
//! optional transcoding → framed streaming response.
//!
//! Headers are committed only after the first body chunk has been produced.
//! Until then any failure still becomes a proper error status. After that the
//! status is fixed and a failure can only cut the body short, which makes the
//! server abort the connection instead of finishing the response cleanly.

use axum::{
    Json,
    body::Body,
    http::{
        HeaderMap, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS},
    },
    response::{IntoResponse, Response},
};
use futures::{StreamExt, TryStreamExt, future, stream};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    error::ApiError,
    extract::{ExtractError, Extractor, StreamKind, StreamSelection, VideoMetadata},
    media::{StageTag, StreamError},
    params::{DownloadRequest, Format, SourceScope},
    transcode::Transcoder,
};

/// Used when the platform reports an empty title.
const PLACEHOLDER_TITLE: &str = "video";

pub async fn handle_download(
    extractor: &dyn Extractor,
    transcoder: &dyn Transcoder,
    request: DownloadRequest,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4();
    let span = info_span!(
        "download",
        %request_id,
        scope = request.scope.as_str(),
        url = %request.source_url,
        format = %request.format,
        quality = %request.quality,
    );

    stream_download(extractor, transcoder, request)
        .instrument(span)
        .await
}

async fn stream_download(
    extractor: &dyn Extractor,
    transcoder: &dyn Transcoder,
    request: DownloadRequest,
) -> Result<Response, ApiError> {
    let metadata = extractor
        .metadata(&request.source_url, request.scope)
        .await
        .map_err(|error| {
            log_extract_failure("metadata lookup failed", &error);
            ApiError::from(error)
        })?;

    let filename = download_filename(&metadata.title, request.format);
    let headers = download_headers(&filename, request.format)?;

    let selection = StreamSelection {
        quality: request.quality,
        kind: StreamKind::for_format(request.format),
        container: (!request.format.needs_transcoding()).then_some(request.format),
        scope: request.scope,
    };

    let source = extractor
        .open_stream(&request.source_url, &selection)
        .await
        .map_err(|error| {
            log_extract_failure("could not open source stream", &error);
            ApiError::from(error)
        })?;

    let (mut body, untagged): (_, StageTag) =
        if request.format.needs_transcoding() {
            let output = transcoder
                .transcode(source, request.format)
                .map_err(|error| {
                    error!("could not start transcoder: {error}");
                    ApiError::from(error)
                })?;
            (output, StreamError::Transcoding)
        } else {
            (source, StreamError::Extraction)
        };

    let first = match body.next().await {
        Some(Ok(chunk)) => chunk,
        Some(Err(error)) => {
            let failure = StreamError::classify(error, untagged);
            error!("stream failed before the first byte: {failure}");
            return Err(ApiError::from(failure));
        }
        None => {
            error!("source produced no media data");
            return Err(ApiError::extraction(
                "Error downloading video: no media data received",
            ));
        }
    };

    info!(filename = %filename, "streaming download");

    let span = tracing::Span::current();
    let rest = body.inspect_err(move |error| {
        let _entered = span.enter();
        error!("stream failed after the response started, aborting: {error}");
    });
    let body = stream::once(future::ready(Ok(first))).chain(rest);

    Ok((headers, Body::from_stream(body)).into_response())
}

pub async fn handle_info(
    extractor: &dyn Extractor,
    url: String,
) -> Result<Json<VideoMetadata>, ApiError> {
    let span = info_span!("info", request_id = %Uuid::new_v4(), url = %url);

    async {
        let metadata = extractor
            .metadata(&url, SourceScope::Video)
            .await
            .map_err(|error| {
                log_extract_failure("metadata lookup failed", &error);
                ApiError::from(error)
            })?;
        Ok(Json(metadata))
    }
    .instrument(span)
    .await
}

fn log_extract_failure(context: &str, error: &ExtractError) {
    match error {
        ExtractError::NotFound(message) => warn!("{context}: {message}"),
        other => error!("{context}: {other}"),
    }
}

/// `<title>.<format>` with control characters removed. A title left empty
/// after that becomes the placeholder.
pub fn download_filename(title: &str, format: Format) -> String {
    let cleaned: String = title
        .chars()
        .filter(|character| !character.is_control())
        .collect();
    let cleaned = cleaned.trim();
    let title = if cleaned.is_empty() {
        PLACEHOLDER_TITLE
    } else {
        cleaned
    };
    format!("{title}.{format}")
}

fn download_headers(filename: &str, format: Format) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(filename))
            .map_err(|_| ApiError::internal("Could not build the download header"))?,
    );
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    Ok(headers)
}

/// `attachment` disposition with an ASCII-only quoted name plus the exact name
/// percent-encoded in `filename*`.
pub fn content_disposition(filename: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_filename(filename),
        urlencoding::encode(filename)
    )
}

fn ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .filter(|character| !character.is_control())
        .map(|character| {
            if character.is_ascii() && !matches!(character, '"' | '\\' | '/' | '%') {
                character
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = sanitized.trim();
    if trimmed.is_empty() {
        PLACEHOLDER_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}
