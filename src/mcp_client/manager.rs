//! Aggregate ownership of the configured domain clients.
//!
//! The manager starts and stops every owned server together and tracks
//! readiness. A partial start does not stop the peers that came up; use
//! [`McpManager::start_all_or_nothing`] when that matters.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::{info, warn};

use super::domain::{Domain, DomainClient};
use super::errors::McpError;
use super::lifecycle::ServerProcess;
use crate::config::McpConfig;

/// Owns one [`DomainClient`] per configured domain.
pub struct McpManager {
    clients: BTreeMap<Domain, DomainClient>,
    ready: bool,
    last_start_failures: Vec<(Domain, McpError)>,
}

impl McpManager {
    /// A manager over the given clients. A later client for the same domain replaces an earlier one.
    pub fn new(clients: impl IntoIterator<Item = DomainClient>) -> Self {
        Self {
            clients: clients
                .into_iter()
                .map(|client| (client.domain(), client))
                .collect(),
            ready: false,
            last_start_failures: Vec::new(),
        }
    }

    /// Build clients for every domain with a configured server path.
    ///
    /// A disabled config yields a manager with no domains.
    pub fn from_config(config: &McpConfig) -> Self {
        if !config.enabled {
            info!("MCP integration disabled");
            return Self::new(Vec::new());
        }

        let clients = Domain::ALL.into_iter().filter_map(|domain| {
            let path = match domain {
                Domain::IssueTracker => config.jira_server_path.clone(),
                Domain::Documentation => config.confluence_server_path.clone(),
            }?;
            let spec = domain
                .server_spec(&config.python_command, path)
                .with_request_timeout(Duration::from_secs(config.timeout_seconds))
                .with_startup_grace(Duration::from_millis(config.startup_grace_ms))
                .with_shutdown_timeout(Duration::from_secs(config.shutdown_timeout_seconds));
            Some(DomainClient::new(domain, ServerProcess::new(spec)))
        });
        Self::new(clients.collect::<Vec<_>>())
    }

    // ─── Introspection ───────────────────────────────────────────────────

    /// Configured domains, in a stable order.
    pub fn domains(&self) -> Vec<Domain> {
        self.clients.keys().copied().collect()
    }

    pub fn client(&self, domain: Domain) -> Option<&DomainClient> {
        self.clients.get(&domain)
    }

    pub fn client_mut(&mut self, domain: Domain) -> Option<&mut DomainClient> {
        self.clients.get_mut(&domain)
    }

    pub fn issue_tracker(&self) -> Option<&DomainClient> {
        self.client(Domain::IssueTracker)
    }

    pub fn documentation(&self) -> Option<&DomainClient> {
        self.client(Domain::Documentation)
    }

    /// Domains whose server is currently running.
    pub fn running_domains(&self) -> Vec<Domain> {
        self.clients
            .values()
            .filter(|client| client.is_running())
            .map(DomainClient::domain)
            .collect()
    }

    /// Per-domain failures from the most recent [`start`](Self::start).
    pub fn last_start_failures(&self) -> &[(Domain, McpError)] {
        &self.last_start_failures
    }

    /// True when the last start succeeded for every domain and no stop has run since.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    // ─── Start / Stop ────────────────────────────────────────────────────

    /// Start every owned server concurrently.
    ///
    /// Returns true only if all of them started. Failures are recorded per
    /// domain and do not affect the servers that did start.
    pub async fn start(&mut self) -> bool {
        let outcomes = join_all(self.clients.values_mut().map(|client| async move {
            let domain = client.domain();
            (domain, client.start().await)
        }))
        .await;

        self.last_start_failures = outcomes
            .into_iter()
            .filter_map(|(domain, outcome)| outcome.err().map(|e| (domain, e)))
            .collect();

        for (domain, error) in &self.last_start_failures {
            warn!(domain = %domain, error = %error, "failed to start MCP server");
        }

        self.ready = self.last_start_failures.is_empty();
        if self.ready {
            info!(domains = self.clients.len(), "all MCP servers started");
        }
        self.ready
    }

    /// Start every server, or none: on any failure, stop the ones that started.
    pub async fn start_all_or_nothing(&mut self) -> Result<(), McpError> {
        if self.start().await {
            return Ok(());
        }
        self.stop().await;
        let failures = std::mem::take(&mut self.last_start_failures)
            .into_iter()
            .map(|(domain, e)| (domain.name().to_string(), e))
            .collect();
        Err(McpError::StartupFailed { failures })
    }

    /// Stop every owned server. Best-effort and safe to repeat.
    pub async fn stop(&mut self) {
        self.ready = false;
        let outcomes = join_all(self.clients.values_mut().map(|client| async move {
            let domain = client.domain();
            (domain, client.stop().await)
        }))
        .await;

        for (domain, outcome) in outcomes {
            if let Err(e) = outcome {
                warn!(domain = %domain, error = %e, "error while stopping MCP server");
            }
        }
    }

    /// Start, run `f`, and stop on every exit path.
    ///
    /// `f` runs even after a partial start; operations on domains that
    /// failed return `NotRunning`. A panic in `f` is resumed after teardown.
    pub async fn scoped<T, F>(&mut self, f: F) -> Result<T, McpError>
    where
        F: for<'a> FnOnce(&'a McpManager) -> BoxFuture<'a, Result<T, McpError>>,
    {
        self.start().await;
        let outcome = AssertUnwindSafe(f(self)).catch_unwind().await;
        self.stop().await;
        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
