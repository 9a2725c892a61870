//! TOML configuration file loading
//!
//! Supports `~/.config/vista/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.
//! The credential is deliberately not read from here.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VistaConfigFile {
    /// Generation endpoint settings
    #[serde(default)]
    pub model: ModelFileConfig,

    /// Retry/backoff settings
    #[serde(default)]
    pub retry: RetryFileConfig,

    /// Progress display settings
    #[serde(default)]
    pub progress: ProgressFileConfig,

    /// Image URL fetch settings
    #[serde(default)]
    pub fetch: FetchFileConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Model/endpoint configuration
#[derive(Debug, Default, Deserialize)]
pub struct ModelFileConfig {
    /// Model identifier (e.g. "gemini-2.5-flash-image-preview")
    pub name: Option<String>,

    /// API base URL
    pub api_base: Option<String>,

    /// Instruction sent with every image
    pub prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryFileConfig {
    /// Total attempts including the first
    pub max_attempts: Option<u32>,

    /// Delay before the first retry, doubled after each retryable failure
    pub initial_backoff_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProgressFileConfig {
    pub tick_interval_ms: Option<u64>,
    pub reveal_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FetchFileConfig {
    pub timeout_secs: Option<u64>,
    pub max_bytes: Option<usize>,

    /// Allow fetching from loopback, private and link-local addresses
    pub allow_private: Option<bool>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Directory with a web front end to serve
    pub static_dir: Option<PathBuf>,

    /// Drop sessions untouched for this long
    pub session_ttl_secs: Option<u64>,

    /// Refuse new sessions beyond this many
    pub max_sessions: Option<usize>,
}

/// Default config file location (`<config_dir>/vista/config.toml`)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "vista", "vista")
        .map(|d| d.config_dir().join("config.toml"))
}

/// Load the config file at `path`
///
/// A missing file yields the empty overlay.
///
/// # Errors
///
/// Returns error if the file exists but cannot be read or parsed
pub fn load_config_file(path: &Path) -> Result<VistaConfigFile> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(VistaConfigFile::default());
    }

    let content = std::fs::read_to_string(path)?;
    let parsed: VistaConfigFile = toml::from_str(&content)?;
    tracing::debug!(path = %path.display(), "loaded config file");

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let toml = r#"
            [model]
            name = "gemini-test"

            [retry]
            initial_backoff_ms = 250

            [server]
            port = 9000
        "#;

        let cfg: VistaConfigFile = toml::from_str(toml).unwrap();
        assert_eq!(cfg.model.name.as_deref(), Some("gemini-test"));
        assert!(cfg.model.api_base.is_none());
        assert_eq!(cfg.retry.initial_backoff_ms, Some(250));
        assert!(cfg.retry.max_attempts.is_none());
        assert_eq!(cfg.server.port, Some(9000));
    }

    #[test]
    fn empty_file_is_default() {
        let cfg: VistaConfigFile = toml::from_str("").unwrap();
        assert!(cfg.model.name.is_none());
        assert!(cfg.progress.tick_interval_ms.is_none());
    }

    #[test]
    fn rejects_unknown_sections() {
        assert!(toml::from_str::<VistaConfigFile>("[api_keys]\ngemini = \"x\"").is_err());
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_file(&dir.path().join("absent.toml")).unwrap();
        assert!(cfg.server.port.is_none());
    }
}
