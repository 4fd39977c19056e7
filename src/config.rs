use std::{path::PathBuf, time::Duration};

use url::Url;

use crate::{error::StartupError, extract::DEFAULT_METADATA_TIMEOUT_SECONDS};

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: String,
    pub yt_dlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub metadata_timeout: Duration,
    pub static_dir: PathBuf,
    /// Normalized origins allowed by CORS. Empty disables the CORS layer.
    pub allowed_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, StartupError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StartupError> {
        let read = |name: &str| {
            lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string))
        };

        let bind_addr = match read("APP_ADDR") {
            Some(addr) => addr,
            None => {
                let port = read("PORT")
                    .and_then(|value| value.parse::<u16>().ok())
                    .unwrap_or(DEFAULT_PORT);
                format!("0.0.0.0:{port}")
            }
        };

        let metadata_timeout = read("METADATA_TIMEOUT_SECONDS")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|seconds| *seconds > 0)
            .unwrap_or(DEFAULT_METADATA_TIMEOUT_SECONDS);

        let allowed_origins = read("ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(|origin| {
                        normalize_origin(origin)
                            .ok_or_else(|| StartupError::InvalidOrigin(origin.to_string()))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            bind_addr,
            yt_dlp_path: read("YT_DLP_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("yt-dlp")),
            ffmpeg_path: read("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            metadata_timeout: Duration::from_secs(metadata_timeout),
            static_dir: read("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("public")),
            allowed_origins,
        })
    }
}

/// Reduces an origin to `scheme://host[:port]`, dropping default ports.
pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, StartupError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_listen_on_port_3000() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.yt_dlp_path, PathBuf::from("yt-dlp"));
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.metadata_timeout, Duration::from_secs(60));
        assert_eq!(config.static_dir, PathBuf::from("public"));
        assert!(config.allowed_origins.is_empty());
    }

    #[test]
    fn port_and_addr_overrides() {
        assert_eq!(config(&[("PORT", "8080")]).unwrap().bind_addr, "0.0.0.0:8080");
        assert_eq!(config(&[("PORT", "nope")]).unwrap().bind_addr, "0.0.0.0:3000");
        assert_eq!(
            config(&[("PORT", "8080"), ("APP_ADDR", "127.0.0.1:9000")])
                .unwrap()
                .bind_addr,
            "127.0.0.1:9000"
        );
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let config = config(&[("METADATA_TIMEOUT_SECONDS", "0")]).unwrap();
        assert_eq!(config.metadata_timeout, Duration::from_secs(60));
    }

    #[test]
    fn origins_are_normalized() {
        let config = config(&[(
            "ALLOWED_ORIGINS",
            "https://Example.com:443, http://localhost:5173 ,",
        )])
        .unwrap();
        assert_eq!(
            config.allowed_origins,
            vec!["https://example.com", "http://localhost:5173"]
        );
    }

    #[test]
    fn invalid_origin_is_rejected() {
        let error = config(&[("ALLOWED_ORIGINS", "https://example.com/path")]).unwrap_err();
        assert!(matches!(error, StartupError::InvalidOrigin(origin) if origin == "https://example.com/path"));
    }
}
