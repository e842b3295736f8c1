//! The chart backend interface.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::BackendResult;
use crate::kubeconfig::Kubeconfig;
use crate::types::*;

/// A cluster package manager able to install and inspect chart releases.
#[async_trait]
pub trait ChartBackend: Send + Sync {
    /// Search configured repositories for charts matching `terms`.
    async fn search_charts(&self, terms: &str, all_versions: bool) -> BackendResult<Vec<ChartSummary>>;

    /// Fetch a rendered artifact of a chart version. Not reentrant; call
    /// through [`TemplateGate`].
    async fn get_template(&self, chart: &str, version: &str, kind: TemplateKind) -> BackendResult<String>;

    /// Install or upgrade a release. Returns the backend's status output.
    async fn upgrade(&self, unit: &DeploymentUnit) -> BackendResult<String>;

    /// Remove a release from the kubeconfig's namespace.
    async fn delete_release(&self, kubeconfig: &Kubeconfig, name: &str, purge: bool) -> BackendResult<()>;

    async fn list_releases(&self, kubeconfig: &Kubeconfig, namespace: &str) -> BackendResult<Vec<ReleaseInfo>>;

    async fn rollback(&self, kubeconfig: &Kubeconfig, name: &str, revision: u32) -> BackendResult<()>;

    async fn release_history(&self, kubeconfig: &Kubeconfig, name: &str) -> BackendResult<Vec<ReleaseRevision>>;
}

/// Serializes template fetches against a backend.
pub struct TemplateGate {
    backend: Arc<dyn ChartBackend>,
    lock: Mutex<()>,
}

impl TemplateGate {
    pub fn new(backend: Arc<dyn ChartBackend>) -> Self {
        Self {
            backend,
            lock: Mutex::new(()),
        }
    }

    pub async fn get_template(&self, chart: &str, version: &str, kind: TemplateKind) -> BackendResult<String> {
        let _guard = self.lock.lock().await;
        self.backend.get_template(chart, version, kind).await
    }
}
