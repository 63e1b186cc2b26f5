//! Typed façades over one tool server per backend domain.
//!
//! Every operation is a single `tools/call` request whose params are
//! `{"name": <tool>, "arguments": {...}}`. Nothing is validated, retried,
//! or cached here; transport and server errors pass through unchanged.

use std::path::PathBuf;

use serde_json::{json, Map, Value};

use super::errors::McpError;
use super::lifecycle::ServerProcess;
use super::types::{ServerSpec, ServerState, TOOLS_CALL_METHOD};

/// Default result cap for issue searches.
pub const DEFAULT_MAX_RESULTS: u32 = 50;

// ─── Domain Table ────────────────────────────────────────────────────────────

/// A backend domain served by one tool server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    /// Issue tracker (Jira).
    IssueTracker,
    /// Documentation store (Confluence).
    Documentation,
}

/// Tool names and argument keys a domain's server understands.
struct DomainTools {
    fetch_item: &'static str,
    search: &'static str,
    create_item: &'static str,
    add_note: &'static str,
    list_containers: &'static str,
    /// Argument key naming an item (`issue_key`, `page_id`).
    item_key: &'static str,
    /// Argument key naming a container (`project_key`, `space_key`).
    container_key: &'static str,
}

const ISSUE_TRACKER_TOOLS: DomainTools = DomainTools {
    fetch_item: "jira_get_issue",
    search: "jira_search_issues",
    create_item: "jira_create_issue",
    add_note: "jira_add_comment",
    list_containers: "jira_get_projects",
    item_key: "issue_key",
    container_key: "project_key",
};

const DOCUMENTATION_TOOLS: DomainTools = DomainTools {
    fetch_item: "confluence_get_page",
    search: "confluence_search_content",
    create_item: "confluence_create_page",
    add_note: "confluence_add_comment",
    list_containers: "confluence_get_spaces",
    item_key: "page_id",
    container_key: "space_key",
};

impl Domain {
    pub const ALL: [Domain; 2] = [Domain::IssueTracker, Domain::Documentation];

    /// Short name used in logs, errors, and config keys.
    pub fn name(self) -> &'static str {
        match self {
            Domain::IssueTracker => "jira",
            Domain::Documentation => "confluence",
        }
    }

    /// Python module that implements this domain's server.
    pub fn server_module(self) -> &'static str {
        match self {
            Domain::IssueTracker => "mcp_jira_server.server",
            Domain::Documentation => "mcp_confluence_server.server",
        }
    }

    fn tools(self) -> &'static DomainTools {
        match self {
            Domain::IssueTracker => &ISSUE_TRACKER_TOOLS,
            Domain::Documentation => &DOCUMENTATION_TOOLS,
        }
    }

    /// Launch spec: `<python> -m <server_module>` run from `server_path`.
    pub fn server_spec(self, python: &str, server_path: PathBuf) -> ServerSpec {
        ServerSpec::python_module(self.name(), python, self.server_module(), server_path)
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Optional narrowing for [`DomainClient::search`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    /// Result cap. The issue tracker always sends one, defaulting to 50.
    pub max_results: Option<u32>,
    /// Restrict to one project/space.
    pub container: Option<String>,
}

// ─── DomainClient ────────────────────────────────────────────────────────────

/// Named operations for one domain, sent to the domain's own server.
pub struct DomainClient {
    domain: Domain,
    server: ServerProcess,
}

impl DomainClient {
    pub fn new(domain: Domain, server: ServerProcess) -> Self {
        Self { domain, server }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn server(&self) -> &ServerProcess {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut ServerProcess {
        &mut self.server
    }

    pub fn state(&self) -> ServerState {
        self.server.state()
    }

    pub fn is_running(&self) -> bool {
        self.server.state() == ServerState::Running
    }

    /// Start the server, replacing a stopped or failed process with a fresh one first.
    pub async fn start(&mut self) -> Result<(), McpError> {
        if self.server.state().is_terminal() {
            self.server = self.server.fresh();
        }
        self.server.start().await
    }

    pub async fn stop(&mut self) -> Result<(), McpError> {
        self.server.stop().await
    }

    // ─── Operations ──────────────────────────────────────────────────────

    /// Call a tool by name with raw arguments.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.server
            .request(TOOLS_CALL_METHOD, tool_call_params(name, arguments))
            .await
    }

    /// Fetch one issue or page by key/id.
    pub async fn fetch_item(&self, id: &str) -> Result<Value, McpError> {
        let tools = self.domain.tools();
        self.call_tool(tools.fetch_item, json!({ tools.item_key: id }))
            .await
    }

    /// Search issues (query is JQL) or content (query is free text).
    pub async fn search(&self, query: &str, filters: &SearchFilters) -> Result<Value, McpError> {
        let tools = self.domain.tools();
        let mut arguments = Map::new();
        match self.domain {
            Domain::IssueTracker => {
                arguments.insert("jql".into(), json!(query));
                arguments.insert(
                    "max_results".into(),
                    json!(filters.max_results.unwrap_or(DEFAULT_MAX_RESULTS)),
                );
            }
            Domain::Documentation => {
                arguments.insert("query".into(), json!(query));
                if let Some(max_results) = filters.max_results {
                    arguments.insert("max_results".into(), json!(max_results));
                }
            }
        }
        if let Some(container) = filters.container.as_deref().filter(|c| !c.is_empty()) {
            arguments.insert(tools.container_key.into(), json!(container));
        }
        self.call_tool(tools.search, Value::Object(arguments)).await
    }

    /// Create an issue or page in `container`; `fields` are passed through as-is.
    pub async fn create_item(
        &self,
        container: &str,
        fields: Map<String, Value>,
    ) -> Result<Value, McpError> {
        let tools = self.domain.tools();
        let mut arguments = Map::new();
        arguments.insert(tools.container_key.into(), json!(container));
        arguments.extend(fields);
        self.call_tool(tools.create_item, Value::Object(arguments))
            .await
    }

    /// Add a comment to an issue or page.
    pub async fn add_note(&self, id: &str, text: &str) -> Result<Value, McpError> {
        let tools = self.domain.tools();
        self.call_tool(
            tools.add_note,
            json!({ tools.item_key: id, "comment": text }),
        )
        .await
    }

    /// List projects or spaces.
    pub async fn list_containers(&self) -> Result<Value, McpError> {
        self.call_tool(self.domain.tools().list_containers, json!({}))
            .await
    }

    // ─── Conveniences ────────────────────────────────────────────────────

    /// Create an issue with a summary plus any extra fields.
    pub async fn create_issue(
        &self,
        project_key: &str,
        summary: &str,
        mut extra: Map<String, Value>,
    ) -> Result<Value, McpError> {
        extra.insert("summary".into(), json!(summary));
        self.create_item(project_key, extra).await
    }

    /// Create a page with a title and body plus any extra fields.
    pub async fn create_page(
        &self,
        space_key: &str,
        title: &str,
        content: &str,
        mut extra: Map<String, Value>,
    ) -> Result<Value, McpError> {
        extra.insert("title".into(), json!(title));
        extra.insert("content".into(), json!(content));
        self.create_item(space_key, extra).await
    }
}

fn tool_call_params(name: &str, arguments: Value) -> Value {
    json!({ "name": name, "arguments": arguments })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
