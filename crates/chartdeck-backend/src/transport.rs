//! Dispatch transport: how deployment units reach the backend executor.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{BackendError, BackendResult};
use crate::types::{CompletionMessage, DispatchMessage};

/// Publishes dispatch messages for asynchronous execution.
#[async_trait]
pub trait DispatchPublisher: Send + Sync {
    async fn publish(&self, message: DispatchMessage) -> BackendResult<()>;
}

/// In-process transport over a bounded tokio channel.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<DispatchMessage>,
}

#[async_trait]
impl DispatchPublisher for ChannelTransport {
    async fn publish(&self, message: DispatchMessage) -> BackendResult<()> {
        let deployment_id = message.deployment_id;
        self.tx.send(message).await.map_err(|_| {
            BackendError::Transport(format!("dispatch channel closed (deployment {deployment_id})"))
        })
    }
}

/// Create a dispatch transport and the receiver the executor consumes.
pub fn dispatch_channel(capacity: usize) -> (ChannelTransport, mpsc::Receiver<DispatchMessage>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelTransport { tx }, rx)
}

/// Create the completion channel between executor and tracker.
pub fn completion_channel(
    capacity: usize,
) -> (mpsc::Sender<CompletionMessage>, mpsc::Receiver<CompletionMessage>) {
    mpsc::channel(capacity)
}
