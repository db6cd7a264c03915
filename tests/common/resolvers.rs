//! Scripted semantic resolvers

use async_trait::async_trait;
use coalesce::{MergeProposal, ResolverError, SemanticResolver};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Every cluster is one concept, named after its longest name.
pub struct MergeAllResolver;

#[async_trait]
impl SemanticResolver for MergeAllResolver {
    async fn resolve(&self, names: &[String]) -> Result<MergeProposal, ResolverError> {
        Ok(merge_all(names))
    }
}

fn merge_all(names: &[String]) -> MergeProposal {
    let mut proposal = MergeProposal::new();
    if let Some(longest) = names.iter().max_by_key(|n| n.len()) {
        proposal.insert(longest.clone(), names.to_vec());
    }
    proposal
}

/// Fails every cluster containing `poison` (case-insensitive), merges the rest.
pub struct FailingResolver {
    pub poison: String,
}

impl FailingResolver {
    pub fn new(poison: &str) -> Self {
        Self {
            poison: poison.to_lowercase(),
        }
    }
}

#[async_trait]
impl SemanticResolver for FailingResolver {
    async fn resolve(&self, names: &[String]) -> Result<MergeProposal, ResolverError> {
        if names.iter().any(|n| n.to_lowercase().contains(&self.poison)) {
            return Err(ResolverError::InvocationFailed("ensemble crashed".into()));
        }
        Ok(merge_all(names))
    }
}

/// Merges everything and counts how often it was asked.
#[derive(Default)]
pub struct CountingResolver {
    pub calls: AtomicUsize,
}

impl CountingResolver {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SemanticResolver for CountingResolver {
    async fn resolve(&self, names: &[String]) -> Result<MergeProposal, ResolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(merge_all(names))
    }
}
