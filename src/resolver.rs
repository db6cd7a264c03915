//! Semantic resolution oracle
//!
//! Given the names in one duplicate cluster, a resolver proposes how they
//! partition: a mapping from a canonical merged name to the original names
//! it subsumes. The pipeline only depends on [`SemanticResolver`]; the
//! production implementation asks an llm-orc ensemble.

use crate::llm_orc::{LlmOrcClient, LlmOrcError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Canonical name → original names it subsumes.
pub type MergeProposal = BTreeMap<String, Vec<String>>;

/// Errors from a semantic resolver. None of them are fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("resolver unavailable: {0}")]
    Unavailable(String),
    #[error("resolver invocation failed: {0}")]
    InvocationFailed(String),
    #[error("malformed resolver response: {0}")]
    Malformed(String),
    #[error("resolver timed out after {0:?}")]
    Timeout(Duration),
}

impl From<LlmOrcError> for ResolverError {
    fn from(e: LlmOrcError) -> Self {
        match e {
            LlmOrcError::Unavailable(msg) => ResolverError::Unavailable(msg),
            LlmOrcError::EnsembleNotFound(msg) => {
                ResolverError::Unavailable(format!("ensemble not found: {}", msg))
            }
            LlmOrcError::InvocationFailed(msg) => ResolverError::InvocationFailed(msg),
            LlmOrcError::ParseError(msg) => ResolverError::Malformed(msg),
        }
    }
}

/// Proposes which names in a cluster denote the same concept.
#[async_trait]
pub trait SemanticResolver: Send + Sync {
    async fn resolve(&self, names: &[String]) -> Result<MergeProposal, ResolverError>;
}

const INSTRUCTIONS: &str = "\
You are a data processing assistant. Your task is to identify duplicate entities in a list \
and decide which of them should be merged. The entities might be slightly different in format \
or content, but essentially refer to the same thing.

Rules for identifying duplicates:
1. Entities with minor typographical differences are duplicates.
2. Entities with different formats but the same content are duplicates.
3. Entities that refer to the same real-world object or concept, even if described differently, are duplicates.
4. Entities that refer to different numbers, dates, or products must not be merged.

Respond with a single JSON object mapping each merged entity to the list of original entities \
it replaces, and nothing else. Example:
{\"merged entity 1\": [\"original entity 1\", \"original entity 2\"], \"merged entity 2\": [\"original entity 3\"]}";

/// Build the request sent to the ensemble for one cluster.
pub fn build_prompt(names: &[String]) -> String {
    let entities = serde_json::to_string(names).unwrap_or_else(|_| "[]".to_string());
    format!(
        "{}\n\nHere is the list of entities to process (in JSON format):\n{}",
        INSTRUCTIONS, entities
    )
}

/// Extract a JSON object from LLM response text.
///
/// Tries, in order:
/// 1. Direct parse (response is pure JSON)
/// 2. Extract from ```json ... ``` or ``` ... ``` fenced block
/// 3. Find the first `{` to last `}` span and parse that
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() {
            return Some(v);
        }
    }

    let fenced = if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        after.find("```").map(|end| &after[..end])
    } else if let Some(start) = trimmed.find("```\n") {
        let after = &trimmed[start + 4..];
        after.find("```").map(|end| &after[..end])
    } else {
        None
    };

    if let Some(block) = fenced {
        if let Ok(v) = serde_json::from_str::<Value>(block.trim()) {
            if v.is_object() {
                return Some(v);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                if v.is_object() {
                    return Some(v);
                }
            }
        }
    }

    None
}

/// Parse a resolver reply into a proposal.
///
/// Every value must be a list of strings; blank names inside a list are
/// dropped, and groups left empty are omitted.
pub fn parse_proposal(text: &str) -> Result<MergeProposal, ResolverError> {
    let value = extract_json(text)
        .ok_or_else(|| ResolverError::Malformed("no JSON object in response".to_string()))?;
    let Value::Object(map) = value else {
        return Err(ResolverError::Malformed("response is not an object".to_string()));
    };

    let mut proposal = MergeProposal::new();
    for (merged, originals) in map {
        let Value::Array(items) = originals else {
            return Err(ResolverError::Malformed(format!(
                "value for '{}' is not a list",
                merged
            )));
        };
        let mut names = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(s) if !s.trim().is_empty() => names.push(s),
                Value::String(_) => {}
                other => {
                    return Err(ResolverError::Malformed(format!(
                        "non-string entry {} under '{}'",
                        other, merged
                    )))
                }
            }
        }
        if !names.is_empty() {
            proposal.insert(merged, names);
        }
    }
    Ok(proposal)
}

/// Resolver backed by an llm-orc ensemble.
pub struct LlmOrcResolver {
    client: Arc<dyn LlmOrcClient>,
    ensemble: String,
}

impl LlmOrcResolver {
    pub fn new(client: Arc<dyn LlmOrcClient>, ensemble: impl Into<String>) -> Self {
        Self {
            client,
            ensemble: ensemble.into(),
        }
    }

    pub fn ensemble(&self) -> &str {
        &self.ensemble
    }
}

#[async_trait]
impl SemanticResolver for LlmOrcResolver {
    async fn resolve(&self, names: &[String]) -> Result<MergeProposal, ResolverError> {
        let response = self.client.invoke(&self.ensemble, &build_prompt(names)).await?;
        if response.is_failed() {
            return Err(ResolverError::InvocationFailed(format!(
                "ensemble '{}' reported failure",
                self.ensemble
            )));
        }

        let mut last_error = None;
        for text in response.successful_texts() {
            match parse_proposal(text) {
                Ok(proposal) => {
                    debug!(ensemble = %self.ensemble, groups = proposal.len(), "parsed proposal");
                    return Ok(proposal);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            ResolverError::Malformed("no successful agent response".to_string())
        }))
    }
}
