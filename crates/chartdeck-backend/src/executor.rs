//! Backend executor: runs dispatched units and reports completions.
//!
//! Each dispatch message is executed on its own task, so one slow release
//! never holds up the others. Every unit yields exactly one completion
//! message, success or failure.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::backend::ChartBackend;
use crate::types::{CompletionMessage, DispatchMessage};

pub struct BackendExecutor {
    backend: Arc<dyn ChartBackend>,
    completions: mpsc::Sender<CompletionMessage>,
}

impl BackendExecutor {
    pub fn new(backend: Arc<dyn ChartBackend>, completions: mpsc::Sender<CompletionMessage>) -> Self {
        Self {
            backend,
            completions,
        }
    }

    /// Consume dispatch messages until the channel closes or shutdown fires.
    pub async fn run(
        self,
        mut dispatches: mpsc::Receiver<DispatchMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("backend executor started");
        loop {
            tokio::select! {
                message = dispatches.recv() => match message {
                    Some(message) => {
                        let backend = self.backend.clone();
                        let completions = self.completions.clone();
                        tokio::spawn(execute(backend, completions, message));
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("backend executor stopped");
    }
}

async fn execute(
    backend: Arc<dyn ChartBackend>,
    completions: mpsc::Sender<CompletionMessage>,
    message: DispatchMessage,
) {
    let deployment_id = message.deployment_id;
    let unit = &message.unit;
    debug!(
        deployment_id,
        release = %unit.release_name,
        chart = %unit.chart,
        version = %unit.chart_version,
        "executing deployment unit"
    );

    let completion = match backend.upgrade(unit).await {
        Ok(_) => {
            info!(deployment_id, release = %unit.release_name, "deployment unit applied");
            CompletionMessage::succeeded(deployment_id)
        }
        Err(e) => {
            warn!(deployment_id, release = %unit.release_name, error = %e, "deployment unit failed");
            CompletionMessage::failed(deployment_id, e.to_string())
        }
    };

    if completions.send(completion).await.is_err() {
        warn!(deployment_id, "completion channel closed, outcome dropped");
    }
}
