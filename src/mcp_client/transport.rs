//! JSON-RPC over stdio transport.
//!
//! Handles low-level communication with tool server child processes:
//! - Writing JSON-RPC requests to stdin, one JSON object per line
//! - A dedicated read loop per process that demultiplexes stdout lines
//!   to the waiting request by `id`
//! - Per-request deadlines that never reset the pipe or kill the process
//!
//! Servers that answer without an `id` are served in request order: an
//! id-less line goes to the oldest outstanding request. A request that timed
//! out stays "abandoned" until its reply shows up, and that late reply is
//! discarded instead of being handed to whoever asked next. An abandoned
//! request expires one timeout past its deadline, so a server that never
//! answers it cannot swallow later replies forever.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::errors::McpError;
use super::types::{JsonRpcError, JsonRpcRequest};

type Reply = Result<serde_json::Value, McpError>;
type SharedRoutes = Arc<std::sync::Mutex<RouteTable>>;

fn lock_routes(routes: &SharedRoutes) -> MutexGuard<'_, RouteTable> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Routing Table ───────────────────────────────────────────────────────────

/// A request written to the server and still waiting for its reply.
struct PendingRequest {
    method: String,
    deadline: Instant,
    timeout: Duration,
    /// `RouteTable::fifo_discards` when this request was registered.
    fifo_discards_at_register: u64,
    reply_tx: oneshot::Sender<Reply>,
}

/// A request whose caller gave up; its reply is discarded on arrival.
struct AbandonedRequest {
    method: String,
    deadline: Instant,
    /// After this, the late reply is no longer expected.
    expires: Instant,
}

/// One decoded stdout line.
#[derive(Debug)]
enum Incoming {
    Response { id: Option<u64>, reply: Reply },
    Notification { method: String },
    Malformed(McpError),
}

/// Which outstanding request an uncorrelated line belongs to.
enum Oldest {
    Pending(u64),
    Abandoned(u64),
}

#[derive(Default)]
struct RouteTable {
    pending: BTreeMap<u64, PendingRequest>,
    abandoned: BTreeMap<u64, AbandonedRequest>,
    /// Id-less lines consumed as late replies to abandoned requests.
    fifo_discards: u64,
    /// Set once the read side is gone; no new requests are accepted.
    closed: Option<String>,
}

impl RouteTable {
    fn register(
        &mut self,
        id: u64,
        method: &str,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Reply>, String> {
        if let Some(reason) = &self.closed {
            return Err(reason.clone());
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                deadline: Instant::now() + timeout,
                timeout,
                fifo_discards_at_register: self.fifo_discards,
                reply_tx,
            },
        );
        Ok(reply_rx)
    }

    /// Move a still-pending request to the abandoned set.
    ///
    /// If an id-less line was discarded as a late reply while this request
    /// was pending, that line was most likely this request's own answer and
    /// the server owes nothing more; the request is dropped instead.
    fn abandon(&mut self, id: u64) {
        let Some(req) = self.pending.remove(&id) else {
            return;
        };
        if self.closed.is_some() {
            return;
        }
        if self.fifo_discards > req.fifo_discards_at_register {
            debug!(id, method = %req.method, "reply slot already consumed, not awaiting late reply");
            return;
        }
        self.abandoned.insert(
            id,
            AbandonedRequest {
                method: req.method,
                deadline: req.deadline,
                expires: req.deadline + req.timeout,
            },
        );
    }

    /// Stop expecting late replies whose window has passed.
    fn prune_expired(&mut self, server: &str, now: Instant) {
        self.abandoned.retain(|id, late| {
            let keep = late.expires > now;
            if !keep {
                debug!(server, id, method = %late.method, "late reply never arrived, forgetting request");
            }
            keep
        });
    }

    /// Drop a request that never reached the server.
    fn forget(&mut self, id: u64) {
        self.pending.remove(&id);
    }

    fn oldest(&self) -> Option<Oldest> {
        let pending = self.pending.keys().next().copied();
        let abandoned = self.abandoned.keys().next().copied();
        match (pending, abandoned) {
            (Some(p), Some(a)) if a < p => Some(Oldest::Abandoned(a)),
            (Some(p), _) => Some(Oldest::Pending(p)),
            (None, Some(a)) => Some(Oldest::Abandoned(a)),
            (None, None) => None,
        }
    }

    fn dispatch(&mut self, server: &str, line: &str) {
        match decode_line(server, line) {
            Incoming::Notification { method } => {
                debug!(server, method = %method, "ignoring server notification");
            }
            Incoming::Response { id: Some(id), reply } => self.deliver_to(server, id, reply),
            Incoming::Response { id: None, reply } => self.deliver_in_order(server, reply),
            Incoming::Malformed(err) => self.deliver_in_order(server, Err(err)),
        }
    }

    fn deliver_to(&mut self, server: &str, id: u64, reply: Reply) {
        if let Some(req) = self.pending.remove(&id) {
            complete(server, id, req, reply);
        } else if let Some(late) = self.abandoned.remove(&id) {
            discard_late(server, id, &late);
        } else {
            warn!(server, id, "response for unknown request id, discarding");
        }
    }

    fn deliver_in_order(&mut self, server: &str, reply: Reply) {
        self.prune_expired(server, Instant::now());
        match self.oldest() {
            Some(Oldest::Pending(id)) => {
                if let Some(req) = self.pending.remove(&id) {
                    complete(server, id, req, reply);
                }
            }
            Some(Oldest::Abandoned(id)) => {
                if let Some(late) = self.abandoned.remove(&id) {
                    self.fifo_discards += 1;
                    discard_late(server, id, &late);
                }
            }
            None => {
                warn!(server, "unsolicited line from server, discarding");
            }
        }
    }

    /// Fail every waiter and refuse new requests.
    fn close(&mut self, server: &str, reason: &str) {
        if self.closed.is_none() {
            self.closed = Some(reason.to_string());
        }
        for (id, req) in std::mem::take(&mut self.pending) {
            let err = McpError::TransportError {
                server: server.to_string(),
                reason: reason.to_string(),
            };
            complete(server, id, req, Err(err));
        }
        self.abandoned.clear();
    }
}

fn complete(server: &str, id: u64, req: PendingRequest, reply: Reply) {
    // The receiver is gone only if the caller was cancelled mid-flight.
    if req.reply_tx.send(reply).is_err() {
        debug!(server, id, method = %req.method, "waiter dropped before reply");
    }
}

fn discard_late(server: &str, id: u64, late: &AbandonedRequest) {
    let late_ms = u64::try_from(late.deadline.elapsed().as_millis()).unwrap_or(u64::MAX);
    warn!(
        server,
        id,
        method = %late.method,
        late_ms,
        "discarding late response for timed-out request"
    );
}

/// Classify one non-empty stdout line.
fn decode_line(server: &str, line: &str) -> Incoming {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return Incoming::Malformed(McpError::ProtocolError {
                server: server.to_string(),
                reason: format!("invalid JSON in response: {e}"),
            });
        }
    };

    let serde_json::Value::Object(mut obj) = value else {
        return Incoming::Malformed(McpError::ProtocolError {
            server: server.to_string(),
            reason: "response is not a JSON object".into(),
        });
    };

    let id = obj.get("id").and_then(serde_json::Value::as_u64);
    // Any `error` key marks a failure, even `"error": null`.
    let error = obj.remove("error");
    let result = obj.remove("result");

    if let Some(err) = error {
        return Incoming::Response {
            id,
            reply: Err(JsonRpcError::from_value(&err).into()),
        };
    }
    if let Some(result) = result {
        return Incoming::Response {
            id,
            reply: Ok(result),
        };
    }
    // Server-initiated messages are not replies to anything we sent.
    if let Some(method) = obj.get("method").and_then(serde_json::Value::as_str) {
        return Incoming::Notification {
            method: method.to_string(),
        };
    }
    Incoming::Response {
        id,
        reply: Err(McpError::ProtocolError {
            server: server.to_string(),
            reason: "response missing both result and error".into(),
        }),
    }
}

// ─── Read Loop ───────────────────────────────────────────────────────────────

async fn read_loop(server: String, stdout: ChildStdout, routes: SharedRoutes) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                debug!(server = %server, "server stdout closed");
                lock_routes(&routes).close(&server, "server stdout closed (process may have exited)");
                return;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                lock_routes(&routes).dispatch(&server, trimmed);
            }
            Err(e) => {
                let reason = format!("failed to read from stdout: {e}");
                lock_routes(&routes).close(&server, &reason);
                return;
            }
        }
    }
}

/// Abandons its request id when dropped, covering both timeouts and
/// callers that cancel the request future.
struct PendingGuard<'a> {
    routes: &'a SharedRoutes,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock_routes(self.routes).abandon(self.id);
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Multiplexed JSON-RPC channel over a child process's stdin/stdout.
///
/// `request` takes `&self`; any number of requests may be in flight at once.
pub struct StdioTransport {
    server_name: String,
    writer: Mutex<Option<ChildStdin>>,
    routes: SharedRoutes,
    next_id: AtomicU64,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl StdioTransport {
    /// Create a transport and start its read loop. Must be called inside a tokio runtime.
    pub fn new(server_name: &str, stdin: ChildStdin, stdout: ChildStdout, timeout: Duration) -> Self {
        let routes: SharedRoutes = Arc::default();
        let reader = tokio::spawn(read_loop(
            server_name.to_string(),
            stdout,
            Arc::clone(&routes),
        ));
        Self {
            server_name: server_name.to_string(),
            writer: Mutex::new(Some(stdin)),
            routes,
            next_id: AtomicU64::new(1),
            timeout,
            reader,
        }
    }

    /// Default deadline applied by [`request`](Self::request).
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a request and wait for its reply within the default deadline.
    pub async fn request(&self, method: &str, params: serde_json::Value) -> Reply {
        self.request_with_timeout(method, params, self.timeout).await
    }

    /// Send a request and wait for its reply within `timeout`.
    ///
    /// A timeout ends this caller's wait only; the server keeps running and
    /// its eventual reply is discarded.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Reply {
        let started = Instant::now();

        // Ids are taken, registered, and written under the writer lock so
        // wire order matches id order for FIFO routing.
        let (id, reply_rx, _guard) = {
            let mut writer = self.writer.lock().await;
            let stdin = writer
                .as_mut()
                .ok_or_else(|| self.transport_error("server stdin closed".into()))?;

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let mut json = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
                .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;
            json.push('\n');

            let reply_rx = lock_routes(&self.routes)
                .register(id, method, timeout)
                .map_err(|reason| self.transport_error(reason))?;
            let guard = PendingGuard {
                routes: &self.routes,
                id,
            };

            if let Err(e) = self.write_line(stdin, &json).await {
                lock_routes(&self.routes).forget(id);
                return Err(e);
            }
            (id, reply_rx, guard)
        };
        debug!(server = %self.server_name, id, method, "request sent");

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => {
                debug!(
                    server = %self.server_name,
                    id,
                    method,
                    ok = reply.is_ok(),
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "response received"
                );
                reply
            }
            Ok(Err(_)) => Err(self.transport_error("read loop ended before reply".into())),
            Err(_) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(server = %self.server_name, id, method, timeout_ms, "request timed out");
                Err(McpError::Timeout {
                    name: self.server_name.clone(),
                    method: method.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    async fn write_line(&self, stdin: &mut ChildStdin, line: &str) -> Result<(), McpError> {
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("failed to flush stdin: {e}")))
    }

    /// Close the server's stdin, signalling that no more requests follow.
    pub async fn close_stdin(&self) {
        self.writer.lock().await.take();
    }

    /// Stop the read loop and fail every outstanding request with `reason`.
    pub fn shutdown(&self, reason: &str) {
        self.reader.abort();
        lock_routes(&self.routes).close(&self.server_name, reason);
    }

    /// Whether the read side has closed.
    pub fn is_closed(&self) -> bool {
        lock_routes(&self.routes).closed.is_some()
    }

    /// Requests written and still awaiting a reply.
    pub fn outstanding(&self) -> usize {
        lock_routes(&self.routes).pending.len()
    }

    /// Timed-out requests whose late reply has not arrived yet.
    pub fn abandoned(&self) -> BTreeSet<u64> {
        lock_routes(&self.routes).abandoned.keys().copied().collect()
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
