//! Supervised stdio JSON-RPC clients for external tool servers.
//!
//! Each backend domain (issue tracker, documentation store) is served by
//! its own child process speaking newline-delimited JSON-RPC 2.0 over
//! stdin/stdout. [`McpManager`] owns one [`DomainClient`] per configured
//! domain and starts, stops, and tracks them together.
//!
//! ```no_run
//! use futures::FutureExt;
//! use mcp_bridge::{config::McpConfig, McpManager};
//!
//! # async fn run() -> Result<(), mcp_bridge::McpError> {
//! let config = McpConfig::from_env()?;
//! mcp_bridge::logging::init_tracing(&config.logging)?;
//!
//! let mut manager = McpManager::from_config(&config);
//! let issue = manager
//!     .scoped(|m| {
//!         async move {
//!             match m.issue_tracker() {
//!                 Some(jira) => jira.fetch_item("DEMO-1").await,
//!                 None => Ok(serde_json::Value::Null),
//!             }
//!         }
//!         .boxed()
//!     })
//!     .await?;
//! println!("{issue}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod mcp_client;

pub use config::{find_config_path, load_config, LoggingConfig, McpConfig};
pub use mcp_client::{
    Domain, DomainClient, ErrorKind, McpError, McpManager, McpResponse, SearchFilters,
    ServerProcess, ServerSpec, ServerState,
};
