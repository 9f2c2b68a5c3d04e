//! Settings for the search-to-graph pipeline.
//!
//! Values arrive from three places, in order of precedence: CLI flags (which
//! also read environment variables through clap), an optional YAML settings
//! file, and built-in defaults. [`normalize_settings`] merges them and
//! enforces ranges.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

pub const DEFAULT_QUERY: &str = "corrupcao";
pub const DEFAULT_LOCATION: &str = "global";

pub const DEFAULT_PAGES: i64 = 1;
pub const MIN_PAGES: i64 = 1;
pub const MAX_PAGES: i64 = 10;

pub const DEFAULT_TOP: i64 = 30;
pub const MIN_TOP: i64 = 5;
pub const MAX_TOP: i64 = 200;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not found. Pass it as a flag or set the environment variable.")]
    Missing(&'static str),
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Which search backend produces the titles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Custom Search JSON API
    #[default]
    Custom,
    /// Vertex AI Search (Discovery Engine)
    Vertex,
}

/// How Vertex AI Search requests are authorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VertexCredentials {
    /// Path to a service-account JSON key.
    ServiceAccount(PathBuf),
    /// Pre-minted OAuth access token.
    AccessToken(String),
    /// Nothing configured; requests fail with an auth error.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSettings {
    Custom {
        api_key: String,
        cx: String,
    },
    Vertex {
        project_id: String,
        location: String,
        engine_id: String,
        credentials: VertexCredentials,
    },
}

/// Validated settings for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub provider: ProviderSettings,
    pub query: String,
    pub pages: u32,
    pub top: usize,
}

/// Unvalidated input, as collected from flags, env or a settings file.
///
/// Every field is optional; [`RawSettings::or`] fills gaps from a lower
/// precedence source.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawSettings {
    pub provider: Option<ProviderKind>,
    pub api_key: Option<String>,
    pub cx: Option<String>,
    pub project_id: Option<String>,
    pub location: Option<String>,
    pub engine_id: Option<String>,
    pub credentials_path: Option<PathBuf>,
    pub access_token: Option<String>,
    pub query: Option<String>,
    pub pages: Option<i64>,
    pub top: Option<i64>,
}

impl RawSettings {
    /// Fill every unset field from `fallback`.
    pub fn or(self, fallback: RawSettings) -> RawSettings {
        RawSettings {
            provider: self.provider.or(fallback.provider),
            api_key: non_blank(self.api_key).or(non_blank(fallback.api_key)),
            cx: non_blank(self.cx).or(non_blank(fallback.cx)),
            project_id: non_blank(self.project_id).or(non_blank(fallback.project_id)),
            location: non_blank(self.location).or(non_blank(fallback.location)),
            engine_id: non_blank(self.engine_id).or(non_blank(fallback.engine_id)),
            credentials_path: self.credentials_path.or(fallback.credentials_path),
            access_token: non_blank(self.access_token).or(non_blank(fallback.access_token)),
            query: non_blank(self.query).or(non_blank(fallback.query)),
            pages: self.pages.or(fallback.pages),
            top: self.top.or(fallback.top),
        }
    }
}

/// Load a YAML settings file. Field names match [`RawSettings`].
#[instrument(level = "info")]
pub fn load_settings_file(path: &Path) -> Result<RawSettings, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawSettings = serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(?raw.provider, "Loaded settings file");
    Ok(raw)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn clamp(value: Option<i64>, default: i64, min: i64, max: i64) -> i64 {
    value.unwrap_or(default).clamp(min, max)
}

/// Parse free-form text as an integer, falling back to `default` when the
/// text is blank or not a number, and clamping to `[min, max]` otherwise.
pub fn parse_int_lenient(text: &str, default: i64, min: i64, max: i64) -> i64 {
    let parsed = text.trim().parse::<i64>().ok();
    clamp(parsed, default, min, max)
}

/// Validate and normalize raw input into [`Settings`].
pub fn normalize_settings(raw: RawSettings) -> Result<Settings, ConfigError> {
    let provider = match raw.provider.unwrap_or_default() {
        ProviderKind::Custom => ProviderSettings::Custom {
            api_key: non_blank(raw.api_key).ok_or(ConfigError::Missing("GOOGLE_API_KEY"))?,
            cx: non_blank(raw.cx).ok_or(ConfigError::Missing("GOOGLE_CSE_ID"))?,
        },
        ProviderKind::Vertex => {
            let credentials = match (raw.credentials_path, non_blank(raw.access_token)) {
                (Some(path), _) if !path.as_os_str().is_empty() => {
                    VertexCredentials::ServiceAccount(path)
                }
                (_, Some(token)) => VertexCredentials::AccessToken(token),
                _ => VertexCredentials::None,
            };
            ProviderSettings::Vertex {
                project_id: non_blank(raw.project_id)
                    .ok_or(ConfigError::Missing("GOOGLE_CLOUD_PROJECT"))?,
                location: non_blank(raw.location).unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
                engine_id: non_blank(raw.engine_id)
                    .ok_or(ConfigError::Missing("VERTEX_ENGINE_ID"))?,
                credentials,
            }
        }
    };

    let query = non_blank(raw.query).unwrap_or_else(|| DEFAULT_QUERY.to_string());
    let pages = clamp(raw.pages, DEFAULT_PAGES, MIN_PAGES, MAX_PAGES) as u32;
    let top = clamp(raw.top, DEFAULT_TOP, MIN_TOP, MAX_TOP) as usize;

    Ok(Settings {
        provider,
        query,
        pages,
        top,
    })
}
