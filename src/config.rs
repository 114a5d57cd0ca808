//! Engine configuration loading and validation.
//!
//! Reads `turnrelay.yaml` and resolves environment variables. Config is the
//! single source of truth for the metadata authority address, cache TTLs,
//! the static fallback address, and every timeout in the turn pipeline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::routing::types::is_well_formed_url;

/// Config file name searched for by [`find_config_path`].
pub const CONFIG_FILE_NAME: &str = "turnrelay.yaml";

/// Environment variable that points directly at a config file.
pub const CONFIG_ENV_VAR: &str = "TURNRELAY_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Configuration loading or validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {reason}")]
    NotFound { reason: String },

    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// What to do when the real backend cannot be reached for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Surface the failure in the transcript and move the session to `Error`.
    #[default]
    Disabled,
    /// Answer with a canned synthetic response instead (development only).
    Synthetic,
}

/// Routing directory, cache and fallback-table settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// Base URL of the metadata authority.
    pub directory_url: String,
    #[serde(default = "default_directory_timeout_secs")]
    pub directory_timeout_secs: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Platform default workflow id (rule 6 of the fallback table).
    #[serde(default)]
    pub default_workflow_id: Option<String>,
    /// Short TTL for the resolved default workflow target.
    #[serde(default = "default_default_workflow_ttl_secs")]
    pub default_workflow_ttl_secs: u64,
    /// Last-resort service address. Must be a usable URL.
    pub static_fallback_url: String,
}

/// Streaming transport settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Maximum wait for the first frame after the exchange opens.
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
    /// Maximum gap between frames while streaming.
    #[serde(default = "default_idle_frame_timeout_secs")]
    pub idle_frame_timeout_secs: u64,
    /// Unparseable frames tolerated before the stream is failed.
    #[serde(default = "default_max_parse_errors")]
    pub max_parse_errors: u32,
    #[serde(default = "default_output_modes")]
    pub accepted_output_modes: Vec<String>,
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Sessions with no activity for this long are archived.
    #[serde(default = "default_session_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// How long `cancel()` waits for the transport to wind down.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    #[serde(default)]
    pub fallback_policy: FallbackPolicy,
}

/// Top-level engine configuration (mirrors `turnrelay.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub routing: RoutingConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_directory_timeout_secs() -> u64 {
    5
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_default_workflow_ttl_secs() -> u64 {
    60
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_response_timeout_secs() -> u64 {
    120
}
fn default_idle_frame_timeout_secs() -> u64 {
    30
}
fn default_max_parse_errors() -> u32 {
    5
}
fn default_output_modes() -> Vec<String> {
    vec!["text".to_string(), "text/markdown".to_string()]
}
fn default_session_idle_timeout_secs() -> u64 {
    1800
}
fn default_cancel_grace_ms() -> u64 {
    500
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            response_timeout_secs: default_response_timeout_secs(),
            idle_frame_timeout_secs: default_idle_frame_timeout_secs(),
            max_parse_errors: default_max_parse_errors(),
            accepted_output_modes: default_output_modes(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_session_idle_timeout_secs(),
            cancel_grace_ms: default_cancel_grace_ms(),
            fallback_policy: FallbackPolicy::default(),
        }
    }
}

impl RoutingConfig {
    /// Minimal config pointing at a directory and a static fallback.
    pub fn new(directory_url: impl Into<String>, static_fallback_url: impl Into<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
            directory_timeout_secs: default_directory_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            default_workflow_id: None,
            default_workflow_ttl_secs: default_default_workflow_ttl_secs(),
            static_fallback_url: static_fallback_url.into(),
        }
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_secs(self.directory_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn default_workflow_ttl(&self) -> Duration {
        Duration::from_secs(self.default_workflow_ttl_secs)
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn idle_frame_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_frame_timeout_secs)
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

impl EngineConfig {
    /// Reject configurations that would make the fallback table partial.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_well_formed_url(&self.routing.static_fallback_url) {
            return Err(ConfigError::Invalid {
                field: "routing.static_fallback_url".into(),
                reason: format!("'{}' is not a usable URL", self.routing.static_fallback_url),
            });
        }
        if self.routing.directory_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "routing.directory_timeout_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.transport.response_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "transport.response_timeout_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }
        if self.transport.idle_frame_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "transport.idle_frame_timeout_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Checks `TURNRELAY_CONFIG` first, then searches upward from `start` for
/// `turnrelay.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ConfigError> {
    // 1. Check env var
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    // 2. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(ConfigError::NotFound {
        reason: format!("could not find {CONFIG_FILE_NAME}"),
    })
}

/// Load, interpolate, parse and validate the engine configuration.
pub fn load_engine_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_engine_config(&raw)
}

/// Parse a YAML document into a validated `EngineConfig`.
pub fn parse_engine_config(raw: &str) -> Result<EngineConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);

    let config: EngineConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;

    config.validate()?;
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some((var_name, default)) = expr.split_once(":-") {
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
