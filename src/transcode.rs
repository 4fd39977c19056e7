//! Transcoding stage backed by an `ffmpeg` child process.

use std::{io::ErrorKind, path::PathBuf};

use tokio::process::Command;

use crate::{
    media::{MediaStream, StreamError},
    params::Format,
    process,
};

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("{program} is not installed or could not be executed")]
    Unavailable { program: String },

    #[error("could not start transcoder: {0}")]
    Spawn(String),
}

pub trait Transcoder: Send + Sync {
    /// Starts converting `input` into `target`. Failures after startup arrive
    /// as errors on the returned stream.
    fn transcode(&self, input: MediaStream, target: Format) -> Result<MediaStream, TranscodeError>;
}

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Ffmpeg {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Transcoder for Ffmpeg {
    fn transcode(&self, input: MediaStream, target: Format) -> Result<MediaStream, TranscodeError> {
        let mut command = Command::new(&self.program);
        command.args(ffmpeg_args(target));

        process::spawn_stream(command, "ffmpeg", StreamError::Transcoding, Some(input)).map_err(
            |error| {
                if error.kind() == ErrorKind::NotFound {
                    TranscodeError::Unavailable {
                        program: self.program.display().to_string(),
                    }
                } else {
                    TranscodeError::Spawn(error.to_string())
                }
            },
        )
    }
}

/// Reads from stdin and writes `target` to stdout. Output must be muxable to a
/// non-seekable pipe.
pub fn ffmpeg_args(target: Format) -> Vec<String> {
    let mut args: Vec<&str> = vec!["-hide_banner", "-loglevel", "error", "-i", "pipe:0"];

    match target {
        Format::Mp3 => args.extend(["-vn", "-c:a", "libmp3lame", "-q:a", "2"]),
        Format::Flac => args.extend(["-vn", "-c:a", "flac"]),
        Format::Avi => args.extend(["-c:v", "mpeg4", "-q:v", "5", "-c:a", "libmp3lame"]),
        // Pass-through containers never reach ffmpeg from the download
        // pipeline; these arms remux for direct `Transcoder` callers.
        Format::Mp4 => args.extend([
            "-c",
            "copy",
            "-movflags",
            "frag_keyframe+empty_moov",
        ]),
        Format::Webm => args.extend(["-c", "copy"]),
    }

    args.extend(["-f", target.as_str(), "pipe:1"]);
    args.into_iter().map(ToString::to_string).collect()
}
