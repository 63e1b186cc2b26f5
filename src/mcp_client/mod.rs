//! MCP client: JSON-RPC over stdio to external tool servers.
//!
//! This module handles:
//! - Spawning, supervising, and stopping tool server child processes
//! - Newline-delimited JSON-RPC 2.0 framing over the children's stdio
//! - Correlating concurrent requests with responses by id
//! - Typed per-domain operations (issue tracker, documentation store)
//! - Aggregate start/stop and readiness across domains

pub mod domain;
pub mod errors;
pub mod lifecycle;
pub mod manager;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use domain::{Domain, DomainClient, SearchFilters};
pub use errors::{ErrorKind, McpError};
pub use lifecycle::ServerProcess;
pub use manager::McpManager;
pub use transport::StdioTransport;
pub use types::{McpResponse, ServerSpec, ServerState};
