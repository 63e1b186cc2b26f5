//! Bridge configuration loading.
//!
//! Settings come from `MCP_*` environment variables or from an
//! `mcp-bridge.yaml` file with `${VAR}` / `${VAR:-default}` interpolation.
//! Either way the result is one [`McpConfig`] handed to the manager.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::mcp_client::McpError;

/// File name searched for by [`find_config_path`].
pub const CONFIG_FILE_NAME: &str = "mcp-bridge.yaml";

/// Env var that points directly at a config file.
pub const CONFIG_PATH_ENV: &str = "MCP_BRIDGE_CONFIG";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Tool-server bridge configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct McpConfig {
    /// When false, no domain servers are configured at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Working directory of the issue-tracker server. Absent means no issue-tracker client.
    #[serde(default)]
    pub jira_server_path: Option<PathBuf>,
    /// Working directory of the documentation server.
    #[serde(default)]
    pub confluence_server_path: Option<PathBuf>,
    /// Per-request timeout.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,
    /// Interpreter used to launch `-m <module>` servers.
    #[serde(default = "default_python_command")]
    pub python_command: String,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    /// Default level for this crate when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path, relative paths resolving under the data directory.
    /// When absent, logs go to stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_startup_grace_ms() -> u64 {
    1000
}
fn default_shutdown_timeout_seconds() -> u64 {
    5
}
fn default_python_command() -> String {
    let python = if cfg!(windows) { "python" } else { "python3" };
    python.to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            jira_server_path: None,
            confluence_server_path: None,
            timeout_seconds: default_timeout_seconds(),
            startup_grace_ms: default_startup_grace_ms(),
            shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
            python_command: default_python_command(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

// ─── Environment ─────────────────────────────────────────────────────────────

impl McpConfig {
    /// Build from `MCP_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, McpError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, McpError> {
        let mut config = Self::default();

        if let Some(raw) = lookup("MCP_ENABLED") {
            config.enabled = parse_bool("MCP_ENABLED", &raw)?;
        }
        config.jira_server_path = lookup("MCP_JIRA_SERVER_PATH").map(PathBuf::from);
        config.confluence_server_path = lookup("MCP_CONFLUENCE_SERVER_PATH").map(PathBuf::from);
        if let Some(raw) = lookup("MCP_TIMEOUT_SECONDS") {
            config.timeout_seconds = parse_number("MCP_TIMEOUT_SECONDS", &raw)?;
        }
        if let Some(raw) = lookup("MCP_STARTUP_GRACE_MS") {
            config.startup_grace_ms = parse_number("MCP_STARTUP_GRACE_MS", &raw)?;
        }
        if let Some(raw) = lookup("MCP_SHUTDOWN_TIMEOUT_SECONDS") {
            config.shutdown_timeout_seconds = parse_number("MCP_SHUTDOWN_TIMEOUT_SECONDS", &raw)?;
        }
        if let Some(python) = lookup("MCP_PYTHON_COMMAND").filter(|p| !p.trim().is_empty()) {
            config.python_command = python;
        }
        if let Some(level) = lookup("MCP_LOG_LEVEL").filter(|l| !l.trim().is_empty()) {
            config.logging.level = level;
        }
        config.logging.file = lookup("MCP_LOG_FILE").map(PathBuf::from);

        Ok(config.normalized())
    }

    /// Drop empty paths and expand a leading `~`.
    fn normalized(mut self) -> Self {
        self.jira_server_path = normalize_path(self.jira_server_path);
        self.confluence_server_path = normalize_path(self.confluence_server_path);
        self.logging.file = normalize_path(self.logging.file);
        self
    }
}

fn normalize_path(path: Option<PathBuf>) -> Option<PathBuf> {
    let path = path?;
    let raw = path.to_string_lossy();
    if raw.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(expand_tilde(&raw)))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, McpError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(McpError::ConfigError {
            reason: format!("{key}: expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T, McpError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| McpError::ConfigError {
        reason: format!("{key}: invalid value '{raw}': {e}"),
    })
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate `mcp-bridge.yaml`.
///
/// `MCP_BRIDGE_CONFIG` wins if it names an existing file; otherwise walks
/// upward from `start`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, McpError> {
    if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(McpError::ConfigError {
        reason: format!("could not find {CONFIG_FILE_NAME}"),
    })
}

/// Load and parse a config file, interpolating `${VAR}` and `${VAR:-default}` first.
pub fn load_config(path: &Path) -> Result<McpConfig, McpError> {
    let raw = std::fs::read_to_string(path).map_err(|e| McpError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let interpolated = interpolate_env_vars(&raw);

    let config: McpConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| McpError::ConfigError {
            reason: format!("failed to parse {}: {e}", path.display()),
        })?;

    Ok(config.normalized())
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
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

/// Resolve `VAR` or `VAR:-default`. Unset and empty both fall back to the default.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name)
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default.to_string()),
        None => std::env::var(expr).unwrap_or_default(),
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
