//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::{default_session_path, SignInOptions};
use crate::backend::SupabaseConfig;
use crate::sync::WakeDetectorConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub realtime: RealtimeSettings,

    #[serde(default)]
    pub visibility: VisibilityConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Managed backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub url: String,

    #[serde(default)]
    pub anon_key: String,

    #[serde(default = "default_schema")]
    pub schema: String,

    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:54321".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_table() -> String {
    "bookmarks".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            anon_key: String::new(),
            schema: default_schema(),
            table: default_table(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Sign-in configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,

    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_secs: u64,

    /// Defaults to the platform data directory
    pub session_file: Option<String>,
}

fn default_provider() -> String {
    "google".to_string()
}

fn default_redirect_url() -> String {
    "http://127.0.0.1:8765/auth/callback".to_string()
}

fn default_callback_timeout() -> u64 {
    300 // 5 minutes
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            redirect_url: default_redirect_url(),
            callback_timeout_secs: default_callback_timeout(),
            session_file: None,
        }
    }
}

/// Change feed configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_interval_secs: default_heartbeat_interval(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

/// Suspend detection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VisibilityConfig {
    #[serde(default = "default_true")]
    pub wake_detection: bool,

    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    #[serde(default = "default_gap_threshold")]
    pub gap_threshold_secs: u64,
}

fn default_check_interval() -> u64 {
    5
}

fn default_gap_threshold() -> u64 {
    10
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            wake_detection: true,
            check_interval_secs: default_check_interval(),
            gap_threshold_secs: default_gap_threshold(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("smart-bookmarks").join("config.toml")),
            Some(PathBuf::from("/etc/smart-bookmarks/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Backend overrides
        if let Some(url) = lookup("BOOKMARKS_SUPABASE_URL") {
            self.backend.url = url;
        }
        if let Some(key) = lookup("BOOKMARKS_SUPABASE_ANON_KEY") {
            self.backend.anon_key = key;
        }

        // Auth overrides
        if let Some(provider) = lookup("BOOKMARKS_AUTH_PROVIDER") {
            self.auth.provider = provider;
        }
        if let Some(redirect) = lookup("BOOKMARKS_REDIRECT_URL") {
            self.auth.redirect_url = redirect;
        }

        // Logging overrides
        if let Some(level) = lookup("BOOKMARKS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("BOOKMARKS_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Session file location
    pub fn session_path(&self) -> PathBuf {
        self.auth
            .session_file
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_session_path)
    }

    /// Settings for the Supabase client
    pub fn supabase(&self) -> SupabaseConfig {
        SupabaseConfig {
            url: self.backend.url.clone(),
            anon_key: self.backend.anon_key.clone(),
            schema: self.backend.schema.clone(),
            table: self.backend.table.clone(),
            request_timeout: Duration::from_secs(self.backend.request_timeout_secs),
            session_file: self.session_path(),
            realtime_enabled: self.realtime.enabled,
            heartbeat_interval: Duration::from_secs(self.realtime.heartbeat_interval_secs.max(1)),
            max_reconnect_attempts: self.realtime.max_reconnect_attempts,
        }
    }

    /// Settings for the sign-in flow
    pub fn sign_in(&self) -> SignInOptions {
        SignInOptions {
            provider: self.auth.provider.clone(),
            redirect_url: self.auth.redirect_url.clone(),
            callback_timeout: Duration::from_secs(self.auth.callback_timeout_secs),
        }
    }

    /// Settings for suspend detection, if enabled
    pub fn wake_detector(&self) -> Option<WakeDetectorConfig> {
        self.visibility.wake_detection.then(|| WakeDetectorConfig {
            check_interval: Duration::from_secs(self.visibility.check_interval_secs.max(1)),
            gap_threshold: Duration::from_secs(self.visibility.gap_threshold_secs),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Smart Bookmarks Configuration
#
# Environment variables override these settings:
# - BOOKMARKS_SUPABASE_URL
# - BOOKMARKS_SUPABASE_ANON_KEY
# - BOOKMARKS_AUTH_PROVIDER
# - BOOKMARKS_REDIRECT_URL
# - BOOKMARKS_LOG_LEVEL
# - BOOKMARKS_LOG_FORMAT

[backend]
# Supabase project URL
url = "http://localhost:54321"

# Public anon key (Project Settings > API)
anon_key = ""

# Schema and table holding the bookmarks
schema = "public"
table = "bookmarks"

# Request timeout in seconds
request_timeout_secs = 10

[auth]
# Identity provider enabled in the project
provider = "google"

# Local address the provider redirects back to (must be allowed in the project)
redirect_url = "http://127.0.0.1:8765/auth/callback"

# How long to wait for the redirect (seconds)
callback_timeout_secs = 300

# Optional session file path
# session_file = "~/.local/share/smart-bookmarks/session.json"

[realtime]
# Subscribe to live changes on the dashboard
enabled = true

# Heartbeat interval (seconds)
heartbeat_interval_secs = 30

# Reconnect attempts after the socket drops
max_reconnect_attempts = 5

[visibility]
# Resync after the machine wakes from suspend
wake_detection = true

# How often to compare clocks (seconds)
check_interval_secs = 5

# Clock gap that counts as a suspend (seconds)
gap_threshold_secs = 10

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/smart-bookmarks/bookmarks.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_template_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.backend.table, "bookmarks");
        assert_eq!(config.auth.provider, "google");
        assert_eq!(config.realtime.heartbeat_interval_secs, 30);
        assert!(config.visibility.wake_detection);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[backend]\nurl = \"https://abc.supabase.co\"\nanon_key = \"key\"\n\n[visibility]\nwake_detection = false\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.backend.url, "https://abc.supabase.co");
        assert_eq!(config.backend.schema, "public");
        assert_eq!(config.auth.callback_timeout_secs, 300);
        assert!(config.wake_detector().is_none());
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[backend\nurl = ").unwrap();
        assert!(matches!(Config::load(&bad), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BOOKMARKS_SUPABASE_URL", "https://env.supabase.co"),
            ("BOOKMARKS_SUPABASE_ANON_KEY", "env-key"),
            ("BOOKMARKS_AUTH_PROVIDER", "github"),
            ("BOOKMARKS_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.backend.url, "https://env.supabase.co");
        assert_eq!(config.backend.anon_key, "env-key");
        assert_eq!(config.auth.provider, "github");
        assert_eq!(config.auth.redirect_url, default_redirect_url());
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_derived_settings() {
        let mut config = Config::default();
        config.auth.session_file = Some("/tmp/bookmarks-session.json".to_string());
        config.realtime.enabled = false;

        let supabase = config.supabase();
        assert_eq!(supabase.session_file, PathBuf::from("/tmp/bookmarks-session.json"));
        assert!(!supabase.realtime_enabled);
        assert_eq!(supabase.request_timeout, Duration::from_secs(10));

        let sign_in = config.sign_in();
        assert_eq!(sign_in.callback_timeout, Duration::from_secs(300));
        assert_eq!(
            config.wake_detector().unwrap().gap_threshold,
            Duration::from_secs(10)
        );
    }
}
