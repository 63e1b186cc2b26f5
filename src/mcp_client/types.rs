//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 envelope, the flattened response view handed to callers,
//! the server state tag, and the launch specification for a tool server.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use super::errors::{ErrorKind, McpError};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Protocol marker written into every request envelope. Never checked on responses.
pub const JSONRPC_VERSION: &str = "2.0";

/// Outer method used for every domain operation.
pub const TOOLS_CALL_METHOD: &str = "tools/call";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause between spawning and the early-exit check.
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(1);

/// Default wait for a graceful exit before force-killing.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: serde_json::Value,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC error object, read leniently from whatever the server put in `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    /// Build from the raw `error` field.
    ///
    /// Accepts `{"code", "message", "data"}` objects with any field missing,
    /// and bare strings. Anything else becomes "Unknown error".
    pub fn from_value(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(obj) => Self {
                code: obj
                    .get("code")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(error_codes::INTERNAL_ERROR),
                message: obj
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_string(),
                data: obj.get("data").cloned(),
            },
            serde_json::Value::String(message) => Self {
                code: error_codes::INTERNAL_ERROR,
                message: message.clone(),
                data: None,
            },
            _ => Self {
                code: error_codes::INTERNAL_ERROR,
                message: "Unknown error".to_string(),
                data: None,
            },
        }
    }
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

// ─── Response View ───────────────────────────────────────────────────────────

/// Tagged outcome of one domain operation, for callers that only need
/// "data or no data" plus a diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum McpResponse {
    Success(serde_json::Value),
    Failure { kind: ErrorKind, message: String },
}

impl McpResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, McpResponse::Success(_))
    }

    /// The payload, if the operation succeeded.
    pub fn data(&self) -> Option<&serde_json::Value> {
        match self {
            McpResponse::Success(data) => Some(data),
            McpResponse::Failure { .. } => None,
        }
    }

    /// The failure message, if the operation failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            McpResponse::Success(_) => None,
            McpResponse::Failure { message, .. } => Some(message),
        }
    }
}

impl From<Result<serde_json::Value, McpError>> for McpResponse {
    fn from(result: Result<serde_json::Value, McpError>) -> Self {
        match result {
            Ok(data) => McpResponse::Success(data),
            // Application errors surface the server's own message verbatim.
            Err(McpError::ServerError { message, .. }) => McpResponse::Failure {
                kind: ErrorKind::Application,
                message,
            },
            Err(e) => McpResponse::Failure {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }
}

// ─── Server State ────────────────────────────────────────────────────────────

/// Lifecycle state of one tool server process.
///
/// `Stopped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ServerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ServerState::Stopped | ServerState::Failed)
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ServerState::NotStarted => "not_started",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
            ServerState::Failed => "failed",
        };
        f.write_str(label)
    }
}

// ─── Launch Specification ────────────────────────────────────────────────────

/// How to launch and talk to one tool server.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    /// Human-readable server name used in logs and errors (e.g., "jira").
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    /// Working directory for the child (the configured server path).
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub request_timeout: Duration,
    pub startup_grace: Duration,
    pub shutdown_timeout: Duration,
}

impl ServerSpec {
    /// A spec with no arguments and default timings.
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            startup_grace: DEFAULT_STARTUP_GRACE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// `<python> -m <module>` run from `server_path`.
    pub fn python_module(name: &str, python: &str, module: &str, server_path: PathBuf) -> Self {
        Self::new(name, python)
            .with_args(["-m", module])
            .with_cwd(server_path)
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ─── Standard Error Codes ────────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Internal JSON-RPC error. Also used when the server omitted a code.
    pub const INTERNAL_ERROR: i64 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_serialization() {
        let params = serde_json::json!({"name": "jira_get_issue", "arguments": {"issue_key": "DEMO-1"}});
        let req = JsonRpcRequest::new(7, TOOLS_CALL_METHOD, params);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.starts_with(r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":"#));
        assert!(json.contains("DEMO-1"));
        assert!(!json.contains('\n'));
    }

    #[test]
    fn test_json_rpc_error_from_object() {
        let raw = serde_json::json!({"code": -32601, "message": "Method not found", "data": {"hint": "x"}});
        let err = JsonRpcError::from_value(&raw);
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "Method not found");
        assert_eq!(err.data, Some(serde_json::json!({"hint": "x"})));
    }

    #[test]
    fn test_json_rpc_error_lenient_shapes() {
        let err = JsonRpcError::from_value(&serde_json::json!({"message": "boom"}));
        assert_eq!(err.code, error_codes::INTERNAL_ERROR);
        assert_eq!(err.message, "boom");

        let err = JsonRpcError::from_value(&serde_json::json!("plain text"));
        assert_eq!(err.message, "plain text");

        let err = JsonRpcError::from_value(&serde_json::json!({}));
        assert_eq!(err.message, "Unknown error");

        let err = JsonRpcError::from_value(&serde_json::json!(42));
        assert_eq!(err.message, "Unknown error");
    }

    #[test]
    fn test_mcp_response_from_results() {
        let ok: McpResponse = Ok(serde_json::json!({"key": "DEMO-1"})).into();
        assert!(ok.is_success());
        assert_eq!(ok.data().unwrap()["key"], "DEMO-1");
        assert!(ok.error().is_none());

        let app: McpResponse = Err(McpError::ServerError {
            code: -32000,
            message: "Issue does not exist".into(),
            data: None,
        })
        .into();
        assert!(!app.is_success());
        assert_eq!(app.error(), Some("Issue does not exist"));
        assert!(matches!(app, McpResponse::Failure { kind: ErrorKind::Application, .. }));

        let timeout: McpResponse = Err(McpError::Timeout {
            name: "jira".into(),
            method: "tools/call".into(),
            timeout_ms: 50,
        })
        .into();
        assert!(matches!(timeout, McpResponse::Failure { kind: ErrorKind::Timeout, .. }));
        assert!(timeout.data().is_none());
    }

    #[test]
    fn test_terminal_states() {
        assert!(ServerState::Stopped.is_terminal());
        assert!(ServerState::Failed.is_terminal());
        assert!(!ServerState::Running.is_terminal());
        assert!(!ServerState::NotStarted.is_terminal());
    }

    #[test]
    fn test_python_module_spec() {
        let spec = ServerSpec::python_module(
            "jira",
            "python3",
            "mcp_jira_server.server",
            PathBuf::from("/opt/jira-mcp"),
        );
        assert_eq!(spec.command, "python3");
        assert_eq!(spec.args, vec!["-m", "mcp_jira_server.server"]);
        assert_eq!(spec.cwd, Some(PathBuf::from("/opt/jira-mcp")));
        assert_eq!(spec.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(spec.shutdown_timeout, Duration::from_secs(5));
    }
}
