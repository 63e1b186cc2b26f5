//! Stub tool servers for tests, written as `/bin/sh` scripts.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::types::ServerSpec;

/// Answers every request with the same issue payload, no `id`.
pub(crate) const ECHO_DEMO_ISSUE: &str = r#"while IFS= read -r line; do
  printf '%s\n' '{"result": {"key": "DEMO-1"}}'
done"#;

/// Answers every request with an application error.
pub(crate) const REPLY_ERROR: &str = r#"while IFS= read -r line; do
  printf '%s\n' '{"error": {"code": -32000, "message": "Issue does not exist"}}'
done"#;

/// Answers with a result alongside `"error": null`.
pub(crate) const RESULT_WITH_NULL_ERROR: &str = r#"while IFS= read -r line; do
  printf '%s\n' '{"result": {"key": "X"}, "error": null}'
done"#;

/// Never answers the first request; answers every later one without an `id`.
pub(crate) const DROP_FIRST_REQUEST: &str = r#"read -r first
n=1
while IFS= read -r line; do
  n=$((n+1))
  printf '{"result": {"seq": %d}}\n' "$n"
done"#;

/// Answers each request in arrival order without an `id`, echoing its method.
pub(crate) const ECHO_METHOD_IN_ORDER: &str = r#"while IFS= read -r line; do
  method=$(printf '%s' "$line" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
  printf '{"result":{"method":"%s"}}\n' "$method"
done"#;

/// Reads requests forever and never answers.
pub(crate) const SILENT: &str = "cat > /dev/null";

/// Sleeps before the first reply; replies carry a sequence number and no `id`.
pub(crate) const SLOW_FIRST_REPLY: &str = r#"n=0
while IFS= read -r line; do
  n=$((n+1))
  if [ "$n" -eq 1 ]; then sleep 1; fi
  printf '{"result": {"seq": %d}}\n' "$n"
done"#;

/// Echoes the request's params back inside `result`, preserving the `id`.
pub(crate) const ECHO_PARAMS: &str = r#"while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  params=$(printf '%s' "$line" | sed -n 's/.*,"params":\(.*\)}$/\1/p')
  printf '{"jsonrpc":"2.0","id":%s,"result":%s}\n' "$id" "$params"
done"#;

/// Reads two requests, then answers them in reverse order by `id`, echoing each method.
pub(crate) const ECHO_METHOD_REVERSED: &str = r#"read -r first
read -r second
reply() {
  id=$(printf '%s' "$1" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  method=$(printf '%s' "$1" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
  printf '{"jsonrpc":"2.0","id":%s,"result":{"method":"%s"}}\n' "$id" "$method"
}
reply "$second"
reply "$first"
cat > /dev/null"#;

/// Exits before the startup grace period ends, complaining on stderr.
pub(crate) const EXIT_IMMEDIATELY: &str = "echo 'ModuleNotFoundError: No module named mcp_jira_server' >&2; exit 1";

/// Ignores SIGTERM and stdin EOF so only a forced kill stops it.
pub(crate) const IGNORE_TERM: &str = "trap '' TERM; while true; do sleep 1; done";

/// A spec running `script` under `/bin/sh` with short test timings.
pub(crate) fn sh_spec(name: &str, script: &str) -> ServerSpec {
    ServerSpec::new(name, "/bin/sh")
        .with_args(["-c", script])
        .with_startup_grace(Duration::from_millis(100))
        .with_shutdown_timeout(Duration::from_millis(500))
        .with_request_timeout(Duration::from_secs(5))
}

/// Spawn `script` with stdin and stdout piped, without any lifecycle wrapper.
pub(crate) fn spawn_piped(script: &str) -> (Child, ChildStdin, ChildStdout) {
    let mut child = Command::new("/bin/sh")
        .args(["-c", script])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    let stdin = child.stdin.take().unwrap();
    let stdout = child.stdout.take().unwrap();
    (child, stdin, stdout)
}
