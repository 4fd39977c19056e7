//! Query parameter validation for the download, playlist and info endpoints.
//!
//! Validation is local and synchronous: nothing here touches the network, so a
//! rejected request never reaches the extractor.

use std::fmt;

use serde::Deserialize;

use crate::extract::Extractor;

/// Whether a request targets a single video or a playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceScope {
    Video,
    Playlist,
}

impl SourceScope {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceScope::Video => "video",
            SourceScope::Playlist => "playlist",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Mp4,
    Mp3,
    Webm,
    Flac,
    Avi,
}

impl Format {
    pub const ALL: [Format; 5] = [
        Format::Mp4,
        Format::Mp3,
        Format::Webm,
        Format::Flac,
        Format::Avi,
    ];

    pub const DEFAULT: Format = Format::Mp4;

    pub fn as_str(self) -> &'static str {
        match self {
            Format::Mp4 => "mp4",
            Format::Mp3 => "mp3",
            Format::Webm => "webm",
            Format::Flac => "flac",
            Format::Avi => "avi",
        }
    }

    pub fn parse(value: &str) -> Option<Format> {
        Format::ALL
            .into_iter()
            .find(|format| format.as_str() == value)
    }

    /// Containers the platform cannot hand over directly and that must go
    /// through the transcoder.
    pub fn needs_transcoding(self) -> bool {
        matches!(self, Format::Mp3 | Format::Flac | Format::Avi)
    }

    pub fn is_audio_only(self) -> bool {
        matches!(self, Format::Mp3 | Format::Flac)
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Format::Mp4 => "video/mp4",
            Format::Mp3 => "audio/mpeg",
            Format::Webm => "video/webm",
            Format::Flac => "audio/flac",
            Format::Avi => "video/x-msvideo",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Highest,
    HighestAudio,
    HighestVideo,
    Lowest,
    LowestAudio,
    LowestVideo,
    /// Fixed itag 140 (m4a audio, 128 kbps).
    Itag140,
}

impl Quality {
    pub const ALL: [Quality; 7] = [
        Quality::Highest,
        Quality::HighestAudio,
        Quality::HighestVideo,
        Quality::Lowest,
        Quality::LowestAudio,
        Quality::LowestVideo,
        Quality::Itag140,
    ];

    pub const DEFAULT: Quality = Quality::Highest;

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Highest => "highest",
            Quality::HighestAudio => "highestaudio",
            Quality::HighestVideo => "highestvideo",
            Quality::Lowest => "lowest",
            Quality::LowestAudio => "lowestaudio",
            Quality::LowestVideo => "lowestvideo",
            Quality::Itag140 => "140",
        }
    }

    pub fn parse(value: &str) -> Option<Quality> {
        Quality::ALL
            .into_iter()
            .find(|quality| quality.as_str() == value)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query string exactly as the client sent it.
#[derive(Debug, Default, Deserialize)]
pub struct RawParams {
    pub url: Option<String>,
    pub format: Option<String>,
    pub quality: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub source_url: String,
    pub format: Format,
    pub quality: Quality,
    pub scope: SourceScope,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("URL is required")]
    MissingUrl,

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Unsupported quality option: {0}")]
    UnsupportedQuality(String),

    #[error("URL is not a supported {} URL", .0.as_str())]
    InvalidSourceUrl(SourceScope),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingUrl => "MISSING_URL",
            ValidationError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            ValidationError::UnsupportedQuality(_) => "UNSUPPORTED_QUALITY",
            ValidationError::InvalidSourceUrl(_) => "INVALID_SOURCE_URL",
        }
    }
}

pub fn validate_download(
    raw: &RawParams,
    scope: SourceScope,
    extractor: &dyn Extractor,
) -> Result<DownloadRequest, ValidationError> {
    let url = required_url(raw)?;

    let format = match raw.format.as_deref().filter(|value| !value.is_empty()) {
        Some(value) => Format::parse(value)
            .ok_or_else(|| ValidationError::UnsupportedFormat(value.to_string()))?,
        None => Format::DEFAULT,
    };

    let quality = match raw.quality.as_deref().filter(|value| !value.is_empty()) {
        Some(value) => Quality::parse(value)
            .ok_or_else(|| ValidationError::UnsupportedQuality(value.to_string()))?,
        None => Quality::DEFAULT,
    };

    if !extractor.recognizes(url, scope) {
        return Err(ValidationError::InvalidSourceUrl(scope));
    }

    Ok(DownloadRequest {
        source_url: url.to_string(),
        format,
        quality,
        scope,
    })
}

/// Validates the info endpoint, which only takes a video URL.
pub fn validate_info(raw: &RawParams, extractor: &dyn Extractor) -> Result<String, ValidationError> {
    let url = required_url(raw)?;
    if !extractor.recognizes(url, SourceScope::Video) {
        return Err(ValidationError::InvalidSourceUrl(SourceScope::Video));
    }
    Ok(url.to_string())
}

fn required_url(raw: &RawParams) -> Result<&str, ValidationError> {
    raw.url
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ValidationError::MissingUrl)
}
