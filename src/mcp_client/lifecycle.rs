//! Server process lifecycle management.
//!
//! A [`ServerProcess`] owns one tool server child process, its stdio pipes,
//! and the [`StdioTransport`] bound to them. Lifetime is an explicit state
//! tag: `NotStarted → Starting → Running → Stopping → Stopped`, with
//! `Failed` reachable from `Starting`. `Stopped` and `Failed` are terminal.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::errors::McpError;
use super::transport::StdioTransport;
use super::types::{ServerSpec, ServerState};

// ─── Constants ───────────────────────────────────────────────────────────────

/// How many trailing stderr lines are kept for diagnostics.
const STDERR_TAIL_LINES: usize = 50;

/// Cap on stderr included in a spawn error.
const STDERR_CONTEXT_CHARS: usize = 2000;

/// How long to wait for stderr from a process that died during startup.
const STDERR_CAPTURE_TIMEOUT: Duration = Duration::from_millis(500);

type StderrTail = Arc<std::sync::Mutex<VecDeque<String>>>;

// ─── ServerProcess ───────────────────────────────────────────────────────────

/// One supervised tool server child process.
pub struct ServerProcess {
    spec: ServerSpec,
    state: ServerState,
    process: Option<Child>,
    transport: Option<StdioTransport>,
    stderr_tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
}

impl ServerProcess {
    /// Create a process handle in `NotStarted`. Nothing is spawned yet.
    pub fn new(spec: ServerSpec) -> Self {
        Self {
            spec,
            state: ServerState::NotStarted,
            process: None,
            transport: None,
            stderr_tail: StderrTail::default(),
            stderr_task: None,
        }
    }

    /// A new, unstarted process with the same launch spec.
    pub fn fresh(&self) -> Self {
        Self::new(self.spec.clone())
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// The transport, while the process is running.
    pub fn transport(&self) -> Option<&StdioTransport> {
        match self.state {
            ServerState::Running => self.transport.as_ref(),
            _ => None,
        }
    }

    /// Check if the child process is still running.
    pub fn is_alive(&mut self) -> bool {
        match self.process.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(Ok(Some(_))) | Some(Err(_)) | None => false,
        }
    }

    /// The most recent lines the server wrote to stderr.
    pub fn recent_stderr(&self) -> Vec<String> {
        self.stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    // ─── Start ───────────────────────────────────────────────────────────

    /// Spawn the server and verify it survives the startup grace period.
    ///
    /// A no-op on a running process. Fails with `NotRunning` on a terminal
    /// process; use [`fresh`](Self::fresh) to get a restartable handle.
    pub async fn start(&mut self) -> Result<(), McpError> {
        match self.state {
            ServerState::NotStarted => {}
            ServerState::Running => {
                debug!(server = %self.spec.name, "server already running");
                return Ok(());
            }
            state => {
                return Err(McpError::NotRunning {
                    name: self.spec.name.clone(),
                    state,
                });
            }
        }

        self.state = ServerState::Starting;
        info!(
            server = %self.spec.name,
            command = %self.spec.command,
            args = ?self.spec.args,
            cwd = ?self.spec.cwd,
            "starting server"
        );

        match self.spawn().await {
            Ok(()) => {
                self.state = ServerState::Running;
                info!(server = %self.spec.name, pid = ?self.process.as_ref().and_then(Child::id), "server started");
                Ok(())
            }
            Err(e) => {
                self.state = ServerState::Failed;
                warn!(server = %self.spec.name, error = %e, "server failed to start");
                Err(e)
            }
        }
    }

    async fn spawn(&mut self) -> Result<(), McpError> {
        let name = self.spec.name.as_str();
        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&self.spec.args);
        cmd.envs(&self.spec.env);
        if let Some(dir) = &self.spec.cwd {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: name.to_string(),
            reason: format!("{e}"),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;
        let stderr = child.stderr.take();

        // Let early failures (bad module, missing deps) surface before we
        // declare the server running.
        sleep(self.spec.startup_grace).await;

        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                let stderr_ctx = read_stderr_on_failure(stderr).await;
                if !stderr_ctx.is_empty() {
                    warn!(server = name, stderr = %stderr_ctx, "server stderr captured on early exit");
                }
                return Err(McpError::SpawnFailed {
                    name: name.to_string(),
                    reason: format!(
                        "exited during startup ({status}){}",
                        format_stderr_suffix(&stderr_ctx)
                    ),
                });
            }
            Err(e) => {
                let _ = child.kill().await;
                return Err(McpError::SpawnFailed {
                    name: name.to_string(),
                    reason: format!("failed to check process status: {e}"),
                });
            }
        }

        self.transport = Some(StdioTransport::new(
            name,
            stdin,
            stdout,
            self.spec.request_timeout,
        ));
        self.stderr_task = stderr.map(|handle| {
            tokio::spawn(drain_stderr(
                name.to_string(),
                handle,
                Arc::clone(&self.stderr_tail),
            ))
        });
        self.process = Some(child);
        Ok(())
    }

    // ─── Stop ────────────────────────────────────────────────────────────

    /// Terminate the server and reap it.
    ///
    /// Closes stdin and (on Unix) sends SIGTERM, waits up to the shutdown
    /// timeout, then kills. Outstanding requests fail with a transport
    /// error. A no-op on a process that is not running.
    pub async fn stop(&mut self) -> Result<(), McpError> {
        if matches!(
            self.state,
            ServerState::NotStarted | ServerState::Stopped | ServerState::Failed
        ) {
            return Ok(());
        }

        self.state = ServerState::Stopping;
        info!(server = %self.spec.name, "stopping server");

        let result = self.terminate().await;

        if let Some(transport) = self.transport.take() {
            transport.shutdown("server stopped");
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.process = None;
        self.state = ServerState::Stopped;

        match &result {
            Ok(()) => info!(server = %self.spec.name, "server stopped"),
            Err(e) => warn!(server = %self.spec.name, error = %e, "server stop incomplete"),
        }
        result
    }

    async fn terminate(&mut self) -> Result<(), McpError> {
        let name = self.spec.name.as_str();
        let Some(child) = self.process.as_mut() else {
            return Ok(());
        };

        if let Some(transport) = &self.transport {
            transport.close_stdin().await;
        }
        request_termination(child, name);

        match tokio::time::timeout(self.spec.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(server = name, %status, "server exited");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                Err(McpError::TransportError {
                    server: name.to_string(),
                    reason: format!("failed to wait for process exit: {e}"),
                })
            }
            Err(_) => {
                warn!(
                    server = name,
                    timeout_ms = u64::try_from(self.spec.shutdown_timeout.as_millis()).unwrap_or(u64::MAX),
                    "server did not exit in time, killing"
                );
                child.kill().await.map_err(|e| McpError::TransportError {
                    server: name.to_string(),
                    reason: format!("failed to kill process: {e}"),
                })
            }
        }
    }

    // ─── Requests ────────────────────────────────────────────────────────

    /// Send one request over this server's transport.
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        match self.transport() {
            Some(transport) => transport.request(method, params).await,
            None => Err(McpError::NotRunning {
                name: self.spec.name.clone(),
                state: self.state,
            }),
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Ask the child to exit. Closing stdin has already happened; on Unix we also send SIGTERM.
#[cfg(unix)]
fn request_termination(child: &Child, name: &str) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    debug!(server = name, pid, "sending SIGTERM");
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        if e != nix::errno::Errno::ESRCH {
            warn!(server = name, pid, error = %e, "failed to send SIGTERM");
        }
    }
}

#[cfg(not(unix))]
fn request_termination(_child: &Child, _name: &str) {}

/// Log every stderr line and keep the tail for diagnostics.
async fn drain_stderr(name: String, stderr: ChildStderr, tail: StderrTail) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(server = %name, stderr = %line, "server stderr");
        let mut kept = tail.lock().unwrap_or_else(PoisonError::into_inner);
        if kept.len() == STDERR_TAIL_LINES {
            kept.pop_front();
        }
        kept.push_back(line);
    }
}

/// Read any available stderr output from a failed server process.
///
/// Uses a short timeout in case a grandchild still holds the pipe open.
async fn read_stderr_on_failure(stderr_handle: Option<ChildStderr>) -> String {
    use tokio::io::AsyncReadExt;

    let Some(mut stderr) = stderr_handle else {
        return String::new();
    };

    let mut buf = String::new();
    match tokio::time::timeout(STDERR_CAPTURE_TIMEOUT, stderr.read_to_string(&mut buf)).await {
        Ok(Ok(_)) => {
            if buf.len() > STDERR_CONTEXT_CHARS {
                let mut cut = STDERR_CONTEXT_CHARS;
                while !buf.is_char_boundary(cut) {
                    cut -= 1;
                }
                buf.truncate(cut);
                buf.push_str("...(truncated)");
            }
            buf
        }
        _ => String::new(),
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_stderr_suffix() {
        assert_eq!(format_stderr_suffix(""), "");
        assert_eq!(format_stderr_suffix("  \n"), "");
        assert_eq!(format_stderr_suffix("boom\n"), " | stderr: boom");
    }

    #[test]
    fn test_new_process_is_not_started() {
        let process = ServerProcess::new(ServerSpec::new("jira", "python3"));
        assert_eq!(process.state(), ServerState::NotStarted);
        assert!(process.transport().is_none());
        assert!(process.recent_stderr().is_empty());
    }

    #[tokio::test]
    async fn test_stop_never_started_is_noop() {
        let mut process = ServerProcess::new(ServerSpec::new("jira", "python3"));
        process.stop().await.unwrap();
        assert_eq!(process.state(), ServerState::NotStarted);
    }

    #[tokio::test]
    async fn test_request_before_start_is_not_running() {
        let process = ServerProcess::new(ServerSpec::new("jira", "python3"));
        let err = process
            .request("tools/call", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            McpError::NotRunning { state: ServerState::NotStarted, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_executable_fails() {
        let mut process = ServerProcess::new(ServerSpec::new(
            "jira",
            "/nonexistent/bin/definitely-not-a-server",
        ));
        let err = process.start().await.unwrap_err();
        assert!(matches!(err, McpError::SpawnFailed { .. }));
        assert_eq!(process.state(), ServerState::Failed);
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use crate::mcp_client::test_support::{sh_spec, ECHO_DEMO_ISSUE, EXIT_IMMEDIATELY, IGNORE_TERM, SILENT};

        #[tokio::test]
        async fn test_start_request_stop() {
            let mut process = ServerProcess::new(sh_spec("jira", ECHO_DEMO_ISSUE));
            process.start().await.unwrap();
            assert_eq!(process.state(), ServerState::Running);
            assert!(process.is_alive());

            let result = process
                .request("tools/call", serde_json::json!({}))
                .await
                .unwrap();
            assert_eq!(result["key"], "DEMO-1");

            process.stop().await.unwrap();
            assert_eq!(process.state(), ServerState::Stopped);
            assert!(!process.is_alive());
        }

        #[tokio::test]
        async fn test_stop_is_idempotent() {
            let mut process = ServerProcess::new(sh_spec("jira", SILENT));
            process.start().await.unwrap();

            process.stop().await.unwrap();
            assert_eq!(process.state(), ServerState::Stopped);
            process.stop().await.unwrap();
            assert_eq!(process.state(), ServerState::Stopped);
        }

        #[tokio::test]
        async fn test_nonexistent_server_path_fails() {
            let spec = sh_spec("jira", SILENT)
                .with_cwd(std::path::PathBuf::from("/nonexistent/mcp-jira-server"));
            let mut process = ServerProcess::new(spec);

            let err = process.start().await.unwrap_err();
            assert!(matches!(err, McpError::SpawnFailed { .. }));
            assert_eq!(process.state(), ServerState::Failed);
            assert_ne!(process.state(), ServerState::Running);
        }

        #[tokio::test]
        async fn test_early_exit_is_spawn_error_with_stderr() {
            let mut process = ServerProcess::new(sh_spec("jira", EXIT_IMMEDIATELY));

            let err = process.start().await.unwrap_err();
            match err {
                McpError::SpawnFailed { reason, .. } => {
                    assert!(reason.contains("exited during startup"), "{reason}");
                    assert!(reason.contains("ModuleNotFoundError"), "{reason}");
                }
                other => panic!("expected SpawnFailed, got {other:?}"),
            }
            assert_eq!(process.state(), ServerState::Failed);
        }

        #[tokio::test]
        async fn test_terminal_states_reject_start() {
            let mut process = ServerProcess::new(sh_spec("jira", SILENT));
            process.start().await.unwrap();
            process.stop().await.unwrap();

            let err = process.start().await.unwrap_err();
            assert!(matches!(
                err,
                McpError::NotRunning { state: ServerState::Stopped, .. }
            ));

            let mut fresh = process.fresh();
            assert_eq!(fresh.state(), ServerState::NotStarted);
            fresh.start().await.unwrap();
            assert_eq!(fresh.state(), ServerState::Running);
            fresh.stop().await.unwrap();
        }

        #[tokio::test]
        async fn test_start_twice_is_noop() {
            let mut process = ServerProcess::new(sh_spec("jira", SILENT));
            process.start().await.unwrap();
            process.start().await.unwrap();
            assert_eq!(process.state(), ServerState::Running);
            process.stop().await.unwrap();
        }

        #[tokio::test]
        async fn test_stubborn_server_is_killed_after_timeout() {
            let mut process = ServerProcess::new(sh_spec("jira", IGNORE_TERM));
            process.start().await.unwrap();

            let started = std::time::Instant::now();
            process.stop().await.unwrap();
            assert!(started.elapsed() >= Duration::from_millis(500));
            assert_eq!(process.state(), ServerState::Stopped);
        }

        #[tokio::test]
        async fn test_request_after_stop_is_not_running() {
            let mut process = ServerProcess::new(sh_spec("jira", ECHO_DEMO_ISSUE));
            process.start().await.unwrap();
            process.stop().await.unwrap();

            let err = process
                .request("tools/call", serde_json::json!({}))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                McpError::NotRunning { state: ServerState::Stopped, .. }
            ));
        }

        #[tokio::test]
        async fn test_stderr_is_retained() {
            let script = "echo 'server booting' >&2; cat > /dev/null";
            let mut process = ServerProcess::new(sh_spec("jira", script));
            process.start().await.unwrap();

            for _ in 0..50 {
                if !process.recent_stderr().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            assert_eq!(process.recent_stderr(), vec!["server booting".to_string()]);

            process.stop().await.unwrap();
            assert_eq!(process.recent_stderr().len(), 1);
        }
    }
}
