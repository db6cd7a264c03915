//! MCP server for Coalesce: exposes deduplication and relationship cleanup
//! via the Model Context Protocol.
//!
//! Tools: `deduplicate`, `sanitize`, `graph_stats`.

pub mod params;

use crate::config::DedupConfig;
use crate::dedup::{DedupParams, Deduplicator};
use crate::llm_orc::SubprocessClient;
use crate::resolver::{LlmOrcResolver, SemanticResolver};
use crate::stats::GraphStats;
use crate::storage::{GraphStore, OpenStore, SqliteStore};
use params::*;
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ok_json<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    match serde_json::to_string_pretty(value) {
        Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
        Err(e) => err_text(format!("failed to serialize result: {}", e)),
    }
}

fn err_text(msg: String) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg)]))
}

/// Build the llm-orc backed resolver described by `config`.
pub fn resolver_from_config(config: &DedupConfig) -> Arc<dyn SemanticResolver> {
    let mut client = SubprocessClient::new();
    if let Some(dir) = &config.llm_orc_project_dir {
        client = client.with_project_dir(dir.clone());
    }
    Arc::new(LlmOrcResolver::new(Arc::new(client), config.ensemble.clone()))
}

// ---------------------------------------------------------------------------
// CoalesceMcpServer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CoalesceMcpServer {
    store: Arc<dyn GraphStore>,
    resolver: Arc<dyn SemanticResolver>,
    config: DedupConfig,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl CoalesceMcpServer {
    pub fn new(
        store: Arc<dyn GraphStore>,
        resolver: Arc<dyn SemanticResolver>,
        config: DedupConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            config,
            tool_router: Self::tool_router(),
        }
    }

    fn deduplicator(&self, config: DedupConfig) -> Deduplicator {
        Deduplicator::new(Arc::clone(&self.store), Arc::clone(&self.resolver), config)
    }

    #[tool(
        description = "Find and merge duplicate Category nodes: embedding similarity, fuzzy name clustering, semantic adjudication, merge, then relationship cleanup. Returns a run summary"
    )]
    async fn deduplicate(
        &self,
        Parameters(p): Parameters<DeduplicateParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = DedupParams {
            similarity_cutoff: p.similarity_cutoff,
            word_similarity: p.word_similarity,
        };
        match self
            .deduplicator(self.config.clone())
            .deduplicate(params)
            .await
        {
            Ok(summary) => ok_json(&summary),
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(
        description = "Remove self-loops, parallel duplicates and reciprocal duplicates from the relationship set"
    )]
    async fn sanitize(
        &self,
        Parameters(p): Parameters<SanitizeParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut config = self.config.clone();
        if p.relationship_type.is_some() {
            config.sanitize_relationship_type = p.relationship_type;
        }
        match self.deduplicator(config).sanitize().await {
            Ok(report) => ok_json(&report),
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "Count categories, communities and relationships by type")]
    fn graph_stats(&self) -> Result<CallToolResult, McpError> {
        match GraphStats::collect(self.store.as_ref()) {
            Ok(stats) => ok_json(&stats),
            Err(e) => err_text(e.to_string()),
        }
    }
}

#[tool_handler]
impl ServerHandler for CoalesceMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Coalesce MCP server: deduplicates Category nodes of a knowledge graph and cleans up its relationships"
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run_mcp_server(db_path: PathBuf, config: DedupConfig) -> i32 {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };

    rt.block_on(async {
        let store = match SqliteStore::open(&db_path) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                eprintln!("failed to open database at {}: {}", db_path.display(), e);
                return 1;
            }
        };
        let resolver = resolver_from_config(&config);
        let server = CoalesceMcpServer::new(store, resolver, config);

        info!(db = %db_path.display(), "coalesce mcp server starting on stdio");

        let service = match server.serve(rmcp::transport::stdio()).await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("failed to start MCP server: {}", e);
                return 1;
            }
        };

        if let Err(e) = service.waiting().await {
            eprintln!("MCP server error: {}", e);
            return 1;
        }

        0
    })
}
