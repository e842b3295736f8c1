//! Deployment tracker: settles completion messages into persisted outcomes.
//!
//! The tracker is the single consumer of the completion channel. For each
//! message it marks the matching `Deployment` processed, then re-evaluates
//! the owning `RequestDeployment` from the persisted children. A failure
//! while handling one message is logged and counted; the loop keeps going.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use chartdeck_backend::CompletionMessage;
use chartdeck_state::store::epoch_secs;
use chartdeck_state::{RequestDeployment, RequestId, StateStore};

use crate::error::{DispatchError, DispatchResult};

/// Counters for the tracker loop, shared with the metrics endpoint.
#[derive(Debug, Default)]
pub struct TrackerStats {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl TrackerStats {
    /// Messages handled without error.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Messages whose handling failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

pub struct DeploymentTracker {
    store: StateStore,
    stats: Arc<TrackerStats>,
}

impl DeploymentTracker {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            stats: Arc::new(TrackerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<TrackerStats> {
        self.stats.clone()
    }

    /// Consume completion messages until the channel closes or shutdown fires.
    pub async fn run(
        self,
        mut completions: mpsc::Receiver<CompletionMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("deployment tracker started");
        loop {
            tokio::select! {
                message = completions.recv() => match message {
                    Some(message) => {
                        let deployment_id = message.deployment_id;
                        match self.handle(&message) {
                            Ok(_) => {
                                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                                error!(deployment_id, error = %e, "failed to settle completion");
                            }
                        }
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("deployment tracker stopped");
    }

    /// Settle one completion. Returns the parent batch once it is settled.
    pub fn handle(&self, message: &CompletionMessage) -> DispatchResult<Option<RequestDeployment>> {
        let mut deployment = self
            .store
            .get_deployment(message.deployment_id)?
            .ok_or(DispatchError::DeploymentNotFound(message.deployment_id))?;

        if deployment.processed {
            debug!(
                deployment_id = deployment.id,
                "duplicate completion, deployment already settled"
            );
        } else {
            deployment.success = message.success;
            deployment.message = message.error.clone();
            deployment.processed = true;
            deployment.updated_at = epoch_secs();
            self.store.put_deployment(&deployment)?;
            debug!(
                deployment_id = deployment.id,
                request_id = deployment.request_id,
                success = deployment.success,
                "deployment settled"
            );
        }

        reconcile_request(&self.store, deployment.request_id)
    }
}

/// Re-evaluate a batch from its persisted children.
///
/// Returns `Some` with the settled batch once every child is processed,
/// `None` while work is still outstanding. A batch that is already settled
/// is returned unchanged.
pub fn reconcile_request(
    store: &StateStore,
    request_id: RequestId,
) -> DispatchResult<Option<RequestDeployment>> {
    let Some(mut request) = store.get_request(request_id)? else {
        warn!(request_id, "completion refers to a missing deployment request");
        return Ok(None);
    };
    if request.processed {
        return Ok(Some(request));
    }
    if !store.all_children_processed(request_id)? {
        return Ok(None);
    }

    request.success = !store.any_child_failed(request_id)?;
    request.processed = true;
    request.updated_at = epoch_secs();
    store.put_request(&request)?;
    info!(request_id, success = request.success, "deployment request settled");
    Ok(Some(request))
}
