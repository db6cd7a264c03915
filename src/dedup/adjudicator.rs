//! Adjudicator: bounded-concurrency semantic resolution of clusters
//!
//! Clusters are disjoint, so each one is an independent call to the
//! resolver. A semaphore bounds how many calls are outstanding; every call
//! has its own timeout. A failed cluster is logged with its contents and
//! dropped, the rest of the run carries on.

use super::cancel::CancellationToken;
use super::cluster::DuplicateCluster;
use crate::resolver::{MergeProposal, ResolverError, SemanticResolver};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Accumulated result of adjudicating every cluster of a run.
#[derive(Debug, Default)]
pub struct Adjudication {
    pub proposals: Vec<MergeProposal>,
    pub clusters_resolved: usize,
    pub clusters_failed: usize,
    /// Clusters never sent because the run was cancelled first
    pub clusters_skipped: usize,
    /// Set when cancellation skipped at least one cluster
    pub cancelled: bool,
}

enum Outcome {
    Resolved(MergeProposal),
    Failed,
    Skipped,
}

pub struct Adjudicator {
    resolver: Arc<dyn SemanticResolver>,
    /// Semaphore to limit concurrent resolver calls
    semaphore: Arc<Semaphore>,
    timeout: Duration,
}

impl Adjudicator {
    pub fn new(resolver: Arc<dyn SemanticResolver>) -> Self {
        Self {
            resolver,
            semaphore: Arc::new(Semaphore::new(10)),
            timeout: Duration::from_secs(120),
        }
    }

    /// Maximum number of resolver calls in flight at once
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.semaphore = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve every cluster; never fails as a whole.
    ///
    /// Once `cancel` fires, clusters still waiting for a slot are skipped.
    /// Calls already in flight run to completion or timeout.
    pub async fn adjudicate(
        &self,
        clusters: Vec<DuplicateCluster>,
        cancel: &CancellationToken,
    ) -> Adjudication {
        let total = clusters.len();
        let mut tasks = JoinSet::new();

        for cluster in clusters {
            let resolver = Arc::clone(&self.resolver);
            let semaphore = Arc::clone(&self.semaphore);
            let cancel = cancel.clone();
            let limit = self.timeout;

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Outcome::Skipped,
                };
                if cancel.is_cancelled() {
                    return Outcome::Skipped;
                }

                let names = cluster.names;
                match timeout(limit, resolver.resolve(&names)).await {
                    Ok(Ok(proposal)) => {
                        debug!(cluster = ?names, groups = proposal.len(), "cluster adjudicated");
                        Outcome::Resolved(proposal)
                    }
                    Ok(Err(e)) => {
                        warn!(cluster = ?names, error = %e, "adjudication failed, cluster dropped");
                        Outcome::Failed
                    }
                    Err(_) => {
                        let e = ResolverError::Timeout(limit);
                        warn!(cluster = ?names, error = %e, "adjudication failed, cluster dropped");
                        Outcome::Failed
                    }
                }
            });
        }

        let mut result = Adjudication::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Outcome::Resolved(proposal)) => {
                    result.clusters_resolved += 1;
                    if !proposal.is_empty() {
                        result.proposals.push(proposal);
                    }
                }
                Ok(Outcome::Failed) => result.clusters_failed += 1,
                Ok(Outcome::Skipped) => result.clusters_skipped += 1,
                Err(e) => {
                    error!(error = %e, "adjudication task aborted");
                    result.clusters_failed += 1;
                }
            }
        }
        // A token that fires after the last call started has lost nothing
        result.cancelled = result.clusters_skipped > 0;

        info!(
            clusters = total,
            resolved = result.clusters_resolved,
            failed = result.clusters_failed,
            skipped = result.clusters_skipped,
            proposals = result.proposals.len(),
            "adjudication finished"
        );
        result
    }
}
