//! Reposter MCP server: start and watch delete-and-repost jobs.
//! Forwards every tool call to the Reposter HTTP API on localhost.
//!
//! Usage: reposter-mcp  (stdio transport; set REPOSTER_API_PORT if not 38480)

use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    schemars, tool, tool_handler, tool_router, ServerHandler,
    service::RequestContext,
    RoleServer, ServiceExt,
    ErrorData as McpError,
};
use reqwest::Client;
use serde_json::json;
use std::env;

const DEFAULT_PORT: u16 = 38480;

fn api_base() -> String {
    let port = env::var("REPOSTER_API_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    format!("http://127.0.0.1:{}", port)
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct StartRepostParam {
    /// Full URL of the listing to repost (include https://)
    url: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct HistoryParam {
    /// Maximum number of entries, newest first (default: 50)
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize { 50 }

#[derive(Clone)]
struct ReposterMcpServer {
    client: Client,
    base: String,
    api_key: Option<String>,
    tool_router: ToolRouter<Self>,
}

impl ReposterMcpServer {
    fn new() -> Self {
        Self {
            client: Client::new(),
            base: api_base(),
            api_key: env::var("REPOSTER_API_KEY").ok().filter(|s| !s.is_empty()),
            tool_router: Self::tool_router(),
        }
    }

    fn apply_key(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("X-API-Key", key),
            None => builder,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<String, McpError> {
        let resp = self.apply_key(req).send().await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        let status = resp.status();
        let text = resp.text().await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        if !status.is_success() {
            return Err(McpError::internal_error(
                format!("HTTP {}: {}", status.as_u16(), text),
                None,
            ));
        }
        Ok(text)
    }

    fn text_result(text: impl Into<String>) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

#[tool_router]
impl ReposterMcpServer {
    #[tool(description = "Start a delete-and-repost job for a listing URL. The browser opens the listing, copies its data, deletes it and places it again. Fails with HTTP 409 if a job is already active. Returns { accepted, status }.")]
    async fn start_repost(
        &self,
        Parameters(p): Parameters<StartRepostParam>,
    ) -> Result<CallToolResult, McpError> {
        let req = self.client.post(format!("{}/api/repost", self.base)).json(&json!({ "url": p.url }));
        let body = self.send(req).await?;
        Self::text_result(body)
    }

    #[tool(description = "Get the active job record: status (IDLE, SCRAPING, PENDING_DELETE, POSTING_1_DETAILS .. POSTING_6_FINAL, DONE, ERROR), source_url, extracted listing data, image count and error_message. Fails with HTTP 404 when no job is active.")]
    async fn get_job(&self) -> Result<CallToolResult, McpError> {
        let body = self.send(self.client.get(format!("{}/api/job", self.base))).await?;
        // Image payloads are large base64 blobs; summarize them.
        let mut record: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        if let Some(images) = record.get_mut("images") {
            let count = images.as_array().map(|a| a.len()).unwrap_or(0);
            *images = json!({ "count": count });
        }
        Self::text_result(record.to_string())
    }

    #[tool(description = "Abandon and delete the active job record, clearing all one-shot guards. This is the only way out of the ERROR state.")]
    async fn clear_job(&self) -> Result<CallToolResult, McpError> {
        self.send(self.client.delete(format!("{}/api/job", self.base))).await?;
        Self::text_result(json!({ "cleared": true }).to_string())
    }

    #[tool(description = "Recent job transitions, accepted and rejected. Each entry has { ts, job_id, trigger, from, to, accepted, page, reason }.")]
    async fn get_history(
        &self,
        Parameters(p): Parameters<HistoryParam>,
    ) -> Result<CallToolResult, McpError> {
        let req = self.client.get(format!("{}/api/history?limit={}", self.base, p.limit));
        let body = self.send(req).await?;
        Self::text_result(body)
    }
}

#[tool_handler]
impl ServerHandler for ReposterMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "reposter-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: Some("Reposter".into()),
                description: Some("Delete and repost marketplace listings through a driven browser".into()),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "# Reposter MCP\n\
                 \n\
                 One job at a time. A job walks IDLE -> SCRAPING -> PENDING_DELETE -> POSTING_1..6 -> DONE.\n\
                 \n\
                 1. start_repost(url)  -> begins the job\n\
                 2. get_job            -> poll status; ERROR carries error_message\n\
                 3. get_history        -> see which steps ran or were rejected\n\
                 4. clear_job          -> reset after DONE or ERROR"
                    .into(),
            ),
        }
    }

    async fn initialize(
        &self,
        _request: InitializeRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        Ok(self.get_info())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let base = api_base();
    let client = Client::new();

    match client.get(format!("{}/api/health", base)).send().await {
        Ok(resp) if resp.status().is_success() => {
            tracing::info!("Reposter API reachable at {}", base);
        }
        Ok(resp) => {
            eprintln!("Reposter API returned HTTP {}: {}", resp.status(), base);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Reposter API not reachable at {}: {}", base, e);
            eprintln!("Start reposter with [api] enabled in config.toml (default port 38480).");
            std::process::exit(1);
        }
    }

    let server = ReposterMcpServer::new();
    let transport = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
    let service = server.serve(transport).await?;
    service.waiting().await?;
    Ok(())
}
