//! llm-orc client: integration with the LLM orchestration service
//!
//! Defines the client trait and response types for calling llm-orc ensembles.
//! Two implementations:
//! - `SubprocessClient`: runs `llm-orc invoke` once per request (production)
//! - `MockClient`: returns preconfigured responses (testing)
//!
//! The entity-resolution ensemble is the semantic oracle behind
//! [`LlmOrcResolver`](crate::resolver::LlmOrcResolver).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Result of invoking an llm-orc ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// Per-agent results (agent name → output)
    pub results: HashMap<String, AgentResult>,
    /// Overall execution status
    pub status: String,
    /// Execution metadata (timing, usage)
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl InvokeResponse {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }

    pub fn is_failed(&self) -> bool {
        self.status == "failed"
    }

    /// Response texts of the agents that succeeded, in agent-name order.
    pub fn successful_texts(&self) -> Vec<&str> {
        let mut names: Vec<&String> = self.results.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| {
                let agent = &self.results[name];
                if agent.is_success() {
                    agent.response.as_deref()
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Result from a single agent in an ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    /// The agent's response text or JSON
    #[serde(default)]
    pub response: Option<String>,
    /// Agent status
    #[serde(default)]
    pub status: Option<String>,
    /// Error message if the agent failed
    #[serde(default)]
    pub error: Option<String>,
}

impl AgentResult {
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}

/// Errors from llm-orc client operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmOrcError {
    #[error("llm-orc not available: {0}")]
    Unavailable(String),
    #[error("ensemble not found: {0}")]
    EnsembleNotFound(String),
    #[error("invocation failed: {0}")]
    InvocationFailed(String),
    #[error("response parse error: {0}")]
    ParseError(String),
}

/// Client trait for calling llm-orc ensembles.
///
/// Abstracts over transport (subprocess, mock) so the resolver
/// doesn't depend on how llm-orc is reached.
#[async_trait]
pub trait LlmOrcClient: Send + Sync {
    /// Check if llm-orc is reachable.
    async fn is_available(&self) -> bool;

    /// Invoke an ensemble with input data.
    ///
    /// Returns the full response including per-agent results and metadata.
    async fn invoke(
        &self,
        ensemble_name: &str,
        input_data: &str,
    ) -> Result<InvokeResponse, LlmOrcError>;
}

/// Runs `llm-orc invoke <ensemble> --output-format json` per request.
///
/// Any non-zero exit, including an unknown ensemble, is an
/// `InvocationFailed` carrying the exit status and stderr.
/// Input is written to the child's stdin. The child is killed if the
/// returned future is dropped, so a caller-side timeout cleans up.
pub struct SubprocessClient {
    llm_orc_path: String,
    project_dir: Option<PathBuf>,
}

impl SubprocessClient {
    pub fn new() -> Self {
        Self {
            llm_orc_path: "llm-orc".to_string(),
            project_dir: None,
        }
    }

    pub fn with_executable(mut self, path: impl Into<String>) -> Self {
        self.llm_orc_path = path.into();
        self
    }

    /// Directory holding the `.llm-orc` ensemble definitions.
    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.llm_orc_path);
        if let Some(dir) = &self.project_dir {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

impl Default for SubprocessClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmOrcClient for SubprocessClient {
    async fn is_available(&self) -> bool {
        let mut cmd = self.command();
        cmd.arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        matches!(cmd.status().await, Ok(status) if status.success())
    }

    async fn invoke(
        &self,
        ensemble_name: &str,
        input_data: &str,
    ) -> Result<InvokeResponse, LlmOrcError> {
        let mut cmd = self.command();
        cmd.args(["invoke", ensemble_name, "--output-format", "json"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            LlmOrcError::Unavailable(format!("failed to start {}: {}", self.llm_orc_path, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input_data.as_bytes())
                .await
                .map_err(|e| LlmOrcError::InvocationFailed(format!("failed to write input: {}", e)))?;
            // Closing stdin tells llm-orc the input is complete
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| LlmOrcError::InvocationFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LlmOrcError::InvocationFailed(format!(
                "llm-orc exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        debug!(ensemble = ensemble_name, bytes = output.stdout.len(), "llm-orc responded");
        serde_json::from_slice(&output.stdout).map_err(|e| LlmOrcError::ParseError(e.to_string()))
    }
}

/// Mock client for testing: returns preconfigured responses.
pub struct MockClient {
    available: bool,
    responses: HashMap<String, Result<InvokeResponse, LlmOrcError>>,
    inputs: Mutex<Vec<String>>,
}

impl MockClient {
    /// Create a mock client that reports as available.
    pub fn available() -> Self {
        Self {
            available: true,
            responses: HashMap::new(),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock client that reports as unavailable.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::available()
        }
    }

    /// Register a response for a specific ensemble name.
    pub fn with_response(
        mut self,
        ensemble_name: impl Into<String>,
        response: InvokeResponse,
    ) -> Self {
        self.responses.insert(ensemble_name.into(), Ok(response));
        self
    }

    /// Register a failure for a specific ensemble name.
    pub fn with_failure(mut self, ensemble_name: impl Into<String>, error: LlmOrcError) -> Self {
        self.responses.insert(ensemble_name.into(), Err(error));
        self
    }

    /// Every input passed to `invoke`, in call order.
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().map(|i| i.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmOrcClient for MockClient {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn invoke(
        &self,
        ensemble_name: &str,
        input_data: &str,
    ) -> Result<InvokeResponse, LlmOrcError> {
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(input_data.to_string());
        }
        if !self.available {
            return Err(LlmOrcError::Unavailable(
                "mock client configured as unavailable".to_string(),
            ));
        }

        match self.responses.get(ensemble_name) {
            Some(Ok(response)) => Ok(response.clone()),
            Some(Err(e)) => Err(LlmOrcError::InvocationFailed(format!(
                "mock failure for ensemble '{}': {}",
                ensemble_name, e
            ))),
            None => Err(LlmOrcError::EnsembleNotFound(format!(
                "no mock response for ensemble '{}'",
                ensemble_name
            ))),
        }
    }
}

/// Helper to construct an InvokeResponse for testing.
pub fn mock_response(agents: Vec<(&str, &str)>) -> InvokeResponse {
    let mut results = HashMap::new();
    for (name, response) in agents {
        results.insert(
            name.to_string(),
            AgentResult {
                response: Some(response.to_string()),
                status: Some("success".to_string()),
                error: None,
            },
        );
    }
    InvokeResponse {
        results,
        status: "completed".to_string(),
        metadata: serde_json::Value::Null,
    }
}
