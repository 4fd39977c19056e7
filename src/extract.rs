//! Extraction client: resolves platform URLs into metadata and media streams.
//!
//! The production implementation shells out to `yt-dlp`. Metadata comes from
//! `yt-dlp -J`; media comes from `yt-dlp -o -`, whose stdout is streamed
//! without touching the disk.

use std::{io::ErrorKind, path::PathBuf, process::Output};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::{
    process::Command,
    time::{Duration, timeout},
};
use url::Url;

use crate::{
    media::{MediaStream, StreamError},
    params::{Format, Quality, SourceScope},
    process,
};

pub const DEFAULT_METADATA_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("video unavailable: {0}")]
    NotFound(String),

    #[error("{program} is not installed or could not be executed")]
    Unavailable { program: String },

    #[error("metadata lookup timed out after {0} seconds")]
    Timeout(u64),

    #[error("{0}")]
    Failed(String),
}

/// Metadata returned by the info endpoint and used to name downloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub title: String,
    pub video_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<NaiveDate>,
    pub is_live: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist_title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    AudioOnly,
    WithVideo,
}

impl StreamKind {
    pub fn for_format(format: Format) -> Self {
        if format.is_audio_only() {
            StreamKind::AudioOnly
        } else {
            StreamKind::WithVideo
        }
    }
}

/// Which stream the extractor should open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSelection {
    pub quality: Quality,
    pub kind: StreamKind,
    /// Preferred container when the bytes are served without transcoding.
    pub container: Option<Format>,
    pub scope: SourceScope,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Pure URL-shape check, no network access.
    fn recognizes(&self, url: &str, scope: SourceScope) -> bool;

    async fn metadata(&self, url: &str, scope: SourceScope)
    -> Result<VideoMetadata, ExtractError>;

    async fn open_stream(
        &self,
        url: &str,
        selection: &StreamSelection,
    ) -> Result<MediaStream, ExtractError>;
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    metadata_timeout: Duration,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new(
            "yt-dlp",
            Duration::from_secs(DEFAULT_METADATA_TIMEOUT_SECONDS),
        )
    }
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>, metadata_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            metadata_timeout,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.kill_on_drop(true);
        command
    }

    fn unavailable(&self) -> ExtractError {
        ExtractError::Unavailable {
            program: self.program.display().to_string(),
        }
    }

    async fn run_json(&self, args: Vec<String>) -> Result<Output, ExtractError> {
        let mut command = self.command();
        command.args(args);

        let output = timeout(self.metadata_timeout, command.output())
            .await
            .map_err(|_| ExtractError::Timeout(self.metadata_timeout.as_secs()))?
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    self.unavailable()
                } else {
                    ExtractError::Failed(format!("could not run yt-dlp: {error}"))
                }
            })?;

        if !output.status.success() {
            return Err(classify_failure(&output.stderr));
        }

        Ok(output)
    }
}

#[async_trait]
impl Extractor for YtDlp {
    fn recognizes(&self, url: &str, scope: SourceScope) -> bool {
        recognize_url(url, scope)
    }

    async fn metadata(
        &self,
        url: &str,
        scope: SourceScope,
    ) -> Result<VideoMetadata, ExtractError> {
        let mut args = vec!["-J".to_string(), "--no-warnings".to_string()];
        args.extend(scope_args(scope));
        args.push("--".to_string());
        args.push(url.to_string());

        let output = self.run_json(args).await?;
        let info: YtDlpInfo = serde_json::from_slice(&output.stdout)
            .map_err(|error| ExtractError::Failed(format!("unreadable yt-dlp metadata: {error}")))?;

        info.into_metadata()
    }

    async fn open_stream(
        &self,
        url: &str,
        selection: &StreamSelection,
    ) -> Result<MediaStream, ExtractError> {
        let mut command = self.command();
        command
            .arg("--quiet")
            .arg("--no-warnings")
            .arg("--no-part")
            .arg("-f")
            .arg(format_selector(selection))
            .arg("-o")
            .arg("-")
            .args(scope_args(selection.scope))
            .arg("--")
            .arg(url);

        process::spawn_stream(command, "yt-dlp", StreamError::Extraction, None).map_err(
            |error| {
                if error.kind() == ErrorKind::NotFound {
                    self.unavailable()
                } else {
                    ExtractError::Failed(format!("could not start yt-dlp: {error}"))
                }
            },
        )
    }
}

fn scope_args(scope: SourceScope) -> Vec<String> {
    match scope {
        SourceScope::Video => vec!["--no-playlist".to_string()],
        // Only the first entry is fetched for playlists.
        SourceScope::Playlist => vec!["--playlist-items".to_string(), "1".to_string()],
    }
}

/// Builds a yt-dlp `-f` expression: the preferred match first, then
/// progressively looser alternatives down to the bare quality token.
pub fn format_selector(selection: &StreamSelection) -> String {
    let audio_only = selection.kind == StreamKind::AudioOnly;
    let token = match selection.quality {
        Quality::Highest if audio_only => "bestaudio",
        Quality::Highest => "best",
        Quality::Lowest if audio_only => "worstaudio",
        Quality::Lowest => "worst",
        Quality::HighestAudio => "bestaudio",
        Quality::LowestAudio => "worstaudio",
        Quality::HighestVideo => "bestvideo",
        Quality::LowestVideo => "worstvideo",
        Quality::Itag140 => "140",
    };
    let kind_filter = if audio_only {
        "[vcodec=none]"
    } else {
        "[vcodec!=none]"
    };

    let mut alternatives = Vec::with_capacity(3);
    if let Some(container) = selection.container {
        alternatives.push(format!("{token}{kind_filter}[ext={container}]"));
    }
    alternatives.push(format!("{token}{kind_filter}"));
    alternatives.push(token.to_string());

    alternatives.join("/")
}

const SUPPORTED_HOSTS: [&str; 8] = [
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "gaming.youtube.com",
    "youtube-nocookie.com",
    "www.youtube-nocookie.com",
    "youtu.be",
];

const VIDEO_PATH_PREFIXES: [&str; 5] = ["embed", "shorts", "live", "v", "e"];

pub fn recognize_url(input: &str, scope: SourceScope) -> bool {
    let Ok(parsed) = Url::parse(input.trim()) else {
        return false;
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
        return false;
    };
    if !SUPPORTED_HOSTS.contains(&host.as_str()) {
        return false;
    }

    if video_id(&parsed, &host).is_some() {
        return true;
    }

    scope == SourceScope::Playlist && playlist_id(&parsed).is_some()
}

fn video_id(parsed: &Url, host: &str) -> Option<String> {
    let mut segments = parsed.path_segments()?;

    let candidate = if host == "youtu.be" {
        segments.next().map(ToString::to_string)
    } else {
        match segments.next() {
            Some("watch") => query_value(parsed, "v"),
            Some(prefix) if VIDEO_PATH_PREFIXES.contains(&prefix) => {
                segments.next().map(ToString::to_string)
            }
            _ => None,
        }
    };

    candidate.filter(|id| id.len() == 11 && is_id_text(id))
}

fn playlist_id(parsed: &Url) -> Option<String> {
    query_value(parsed, "list").filter(|id| !id.is_empty() && is_id_text(id))
}

fn query_value(parsed: &Url, key: &str) -> Option<String> {
    parsed
        .query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}

fn is_id_text(value: &str) -> bool {
    value
        .chars()
        .all(|character| character.is_ascii_alphanumeric() || matches!(character, '-' | '_'))
}

/// Maps yt-dlp's last stderr line to an extraction error.
pub fn classify_failure(stderr: &[u8]) -> ExtractError {
    let message = String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the lookup")
        .to_string();

    if is_not_found_message(&message) {
        ExtractError::NotFound(message)
    } else {
        ExtractError::Failed(message)
    }
}

fn is_not_found_message(message: &str) -> bool {
    const MARKERS: [&str; 9] = [
        "video unavailable",
        "video is unavailable",
        "video has been removed",
        "no longer available",
        "private video",
        "video is private",
        "does not exist",
        "http error 404",
        "account associated with this video has been terminated",
    ];

    let lower = message.to_ascii_lowercase();
    MARKERS.iter().any(|marker| lower.contains(marker))
}

#[derive(Debug, Default, Deserialize)]
struct YtDlpInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    id: Option<String>,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    channel_id: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    description: Option<String>,
    thumbnail: Option<String>,
    upload_date: Option<String>,
    is_live: Option<bool>,
    webpage_url: Option<String>,
    #[serde(default)]
    entries: Vec<YtDlpInfo>,
}

impl YtDlpInfo {
    fn into_metadata(self) -> Result<VideoMetadata, ExtractError> {
        if self.kind.as_deref() != Some("playlist") {
            return Ok(self.video_metadata());
        }

        let playlist_title = self.title.filter(|title| !title.trim().is_empty());
        let entry = self
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| ExtractError::NotFound("playlist has no entries".to_string()))?;

        let mut metadata = entry.video_metadata();
        metadata.playlist_title = playlist_title;
        Ok(metadata)
    }

    fn video_metadata(self) -> VideoMetadata {
        VideoMetadata {
            title: self.title.unwrap_or_default(),
            video_id: self.id.unwrap_or_default(),
            author: self.channel.or(self.uploader),
            channel_id: self.channel_id,
            length_seconds: self
                .duration
                .filter(|seconds| *seconds >= 0.0)
                .map(|seconds| seconds.round() as u64),
            view_count: self.view_count,
            description: self.description,
            thumbnail: self.thumbnail,
            publish_date: self.upload_date.as_deref().and_then(parse_upload_date),
            is_live: self.is_live.unwrap_or(false),
            video_url: self.webpage_url,
            playlist_title: None,
        }
    }
}

fn parse_upload_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y%m%d").ok()
}
