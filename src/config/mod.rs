//! Configuration management for Vista

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

pub use file::{VistaConfigFile, default_config_path, load_config_file};

use crate::describe::RetryPolicy;
use crate::session::SessionTiming;
use crate::{Error, Result};

/// Default generation model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";

/// Default generation API base
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Instruction sent alongside every image
pub const DEFAULT_PROMPT: &str = "You are an expert image analyst. Describe every single detail of this image with precision and clarity. Be thorough and comprehensive in your description.";

/// Default API server port
pub const DEFAULT_PORT: u16 = 18800;

/// Default idle lifetime of an API session
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Default cap on live API sessions
pub const DEFAULT_MAX_SESSIONS: usize = 256;

/// Environment variables checked for the credential, in order
pub const CREDENTIAL_ENV_VARS: [&str; 2] = ["API_KEY", "GEMINI_API_KEY"];

/// Vista configuration
#[derive(Debug)]
pub struct Config {
    /// Credential for the generation endpoint
    pub api_key: SecretString,

    /// Generation endpoint configuration
    pub model: ModelConfig,

    /// Retry policy for description requests
    pub retry: RetryPolicy,

    /// Progress ticker and reveal timing
    pub timing: SessionTiming,

    /// Image URL fetch configuration
    pub fetch: FetchConfig,

    /// HTTP API server configuration
    pub server: ServerConfig,
}

/// Generation endpoint configuration
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Model identifier
    pub name: String,

    /// API base URL, without trailing slash
    pub api_base: String,

    /// Instruction sent with each image
    pub prompt: String,
}

/// Image URL fetch configuration
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Whole-request timeout
    pub timeout: Duration,

    /// Largest accepted image body
    pub max_bytes: usize,

    /// Allow loopback, private and link-local destinations
    pub allow_private: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_bytes: 20 * 1024 * 1024,
            allow_private: false,
        }
    }
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (web UI)
    pub static_dir: Option<PathBuf>,

    /// Idle lifetime of a session before it is swept
    pub session_ttl: Duration,

    /// Most sessions held at once
    pub max_sessions: usize,
}

impl Config {
    /// Load configuration from the environment and an optional config file
    ///
    /// `config_path` overrides the default file location.
    ///
    /// # Errors
    ///
    /// Returns error if the credential is missing or the config file is invalid
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .or_else(default_config_path);

        let file = match path {
            Some(p) => load_config_file(&p)?,
            None => VistaConfigFile::default(),
        };

        let api_key = CREDENTIAL_ENV_VARS
            .iter()
            .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()));

        Self::from_parts(api_key, file)
    }

    /// Build configuration from an explicit credential and file overlay
    ///
    /// # Errors
    ///
    /// Returns error if the credential is absent or blank
    pub fn from_parts(api_key: Option<String>, file: VistaConfigFile) -> Result<Self> {
        let api_key = api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("API_KEY environment variable not set".to_string()))?;

        let model = ModelConfig {
            name: file.model.name.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base: file
                .model
                .api_base
                .map(|b| b.trim().trim_end_matches('/').to_string())
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            prompt: file.model.prompt.unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
        };

        let default_retry = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: file
                .retry
                .max_attempts
                .unwrap_or(default_retry.max_attempts)
                .max(1),
            initial_backoff: file
                .retry
                .initial_backoff_ms
                .map_or(default_retry.initial_backoff, Duration::from_millis),
        };

        let default_timing = SessionTiming::default();
        let timing = SessionTiming {
            tick_interval: file
                .progress
                .tick_interval_ms
                .filter(|ms| *ms > 0)
                .map_or(default_timing.tick_interval, Duration::from_millis),
            reveal_delay: file
                .progress
                .reveal_delay_ms
                .map_or(default_timing.reveal_delay, Duration::from_millis),
        };

        let default_fetch = FetchConfig::default();
        let fetch = FetchConfig {
            timeout: file
                .fetch
                .timeout_secs
                .map_or(default_fetch.timeout, Duration::from_secs),
            max_bytes: file.fetch.max_bytes.unwrap_or(default_fetch.max_bytes),
            allow_private: file.fetch.allow_private.unwrap_or(default_fetch.allow_private),
        };

        let server = ServerConfig {
            port: file.server.port.unwrap_or(DEFAULT_PORT),
            static_dir: file.server.static_dir,
            session_ttl: file
                .server
                .session_ttl_secs
                .filter(|secs| *secs > 0)
                .map_or(DEFAULT_SESSION_TTL, Duration::from_secs),
            max_sessions: file
                .server
                .max_sessions
                .unwrap_or(DEFAULT_MAX_SESSIONS)
                .max(1),
        };

        Ok(Self {
            api_key: SecretString::from(api_key),
            model,
            retry,
            timing,
            fetch,
            server,
        })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn missing_credential_is_fatal() {
        let err = Config::from_parts(None, VistaConfigFile::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn blank_credential_is_fatal() {
        let err = Config::from_parts(Some("   ".to_string()), VistaConfigFile::default())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_parts(Some("key".to_string()), VistaConfigFile::default())
            .unwrap();

        assert_eq!(config.api_key.expose_secret(), "key");
        assert_eq!(config.model.name, DEFAULT_MODEL);
        assert_eq!(config.model.api_base, DEFAULT_API_BASE);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(1000));
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert!(config.server.static_dir.is_none());
        assert!(!config.fetch.allow_private);
        assert_eq!(config.server.session_ttl, DEFAULT_SESSION_TTL);
        assert_eq!(config.server.max_sessions, DEFAULT_MAX_SESSIONS);
    }

    #[test]
    fn fetch_and_session_limits_from_file() {
        let file: VistaConfigFile = toml::from_str(
            r"
            [fetch]
            allow_private = true

            [server]
            session_ttl_secs = 60
            max_sessions = 0
        ",
        )
        .unwrap();

        let config = Config::from_parts(Some("key".to_string()), file).unwrap();
        assert!(config.fetch.allow_private);
        assert_eq!(config.server.session_ttl, Duration::from_secs(60));
        assert_eq!(config.server.max_sessions, 1);
    }

    #[test]
    fn file_overlays_defaults() {
        let file: VistaConfigFile = toml::from_str(
            r#"
            [model]
            api_base = "http://127.0.0.1:9999/v1beta/"

            [retry]
            max_attempts = 0
            initial_backoff_ms = 10

            [progress]
            tick_interval_ms = 50
        "#,
        )
        .unwrap();

        let config = Config::from_parts(Some("key".to_string()), file).unwrap();
        assert_eq!(config.model.api_base, "http://127.0.0.1:9999/v1beta");
        // At least one attempt is always made
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(10));
        assert_eq!(config.timing.tick_interval, Duration::from_millis(50));
        assert_eq!(config.timing.reveal_delay, SessionTiming::default().reveal_delay);
    }
}
