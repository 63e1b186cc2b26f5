//! MCP client error types.

use thiserror::Error;

use super::types::ServerState;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process could not be spawned, or exited during the startup grace period.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// An operation was attempted against a server that is not running.
    #[error("server '{name}' is not running (state: {state})")]
    NotRunning { name: String, state: ServerState },

    /// No response line arrived within the request deadline.
    #[error("request '{method}' to server '{name}' timed out after {timeout_ms}ms")]
    Timeout {
        name: String,
        method: String,
        timeout_ms: u64,
    },

    /// The response line was not valid JSON or carried neither `result` nor `error`.
    #[error("protocol error from server '{server}': {reason}")]
    ProtocolError { server: String, reason: String },

    /// The server answered with an `error` object.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Pipe I/O failed or the server closed its stdout.
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Configuration or logging setup error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// At least one domain failed during an all-or-nothing startup.
    #[error("startup failed for {}", failures.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>().join(", "))]
    StartupFailed { failures: Vec<(String, McpError)> },
}

/// Fieldless classification of an [`McpError`], for diagnostics and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Spawn,
    NotRunning,
    Timeout,
    Protocol,
    Application,
    Transport,
    Config,
    Startup,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Spawn => "spawn",
            ErrorKind::NotRunning => "not_running",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Application => "application",
            ErrorKind::Transport => "transport",
            ErrorKind::Config => "config",
            ErrorKind::Startup => "startup",
        };
        f.write_str(label)
    }
}

impl McpError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            McpError::SpawnFailed { .. } => ErrorKind::Spawn,
            McpError::NotRunning { .. } => ErrorKind::NotRunning,
            McpError::Timeout { .. } => ErrorKind::Timeout,
            McpError::ProtocolError { .. } => ErrorKind::Protocol,
            McpError::ServerError { .. } => ErrorKind::Application,
            McpError::TransportError { .. } => ErrorKind::Transport,
            McpError::ConfigError { .. } => ErrorKind::Config,
            McpError::StartupFailed { .. } => ErrorKind::Startup,
        }
    }

    /// Whether a caller could reasonably retry (possibly after a restart).
    ///
    /// The client itself never retries.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            McpError::Timeout { .. } | McpError::TransportError { .. }
        )
    }

    /// The message a server reported, if this is an application error.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            McpError::ServerError { message, .. } => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err = McpError::Timeout {
            name: "jira".into(),
            method: "tools/call".into(),
            timeout_ms: 30_000,
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retriable());

        let err = McpError::ServerError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert_eq!(err.kind(), ErrorKind::Application);
        assert!(!err.is_retriable());
        assert_eq!(err.server_message(), Some("Method not found"));
    }

    #[test]
    fn test_not_running_message_includes_state() {
        let err = McpError::NotRunning {
            name: "confluence".into(),
            state: ServerState::Stopped,
        };
        assert_eq!(
            err.to_string(),
            "server 'confluence' is not running (state: stopped)"
        );
    }

    #[test]
    fn test_startup_failed_lists_domains() {
        let err = McpError::StartupFailed {
            failures: vec![
                (
                    "jira".into(),
                    McpError::SpawnFailed {
                        name: "jira".into(),
                        reason: "No such file or directory".into(),
                    },
                ),
                (
                    "confluence".into(),
                    McpError::SpawnFailed {
                        name: "confluence".into(),
                        reason: "exited with status 1".into(),
                    },
                ),
            ],
        };
        assert_eq!(err.to_string(), "startup failed for jira, confluence");
        assert_eq!(err.kind().to_string(), "startup");
    }
}
