//! Fakes and state builders for handler tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;

use chartdeck_backend::*;
use chartdeck_dispatch::{DeploymentTracker, Dispatcher};
use chartdeck_insight::{CachePolicy, DependencyGraphBuilder, UpgradeDetector};
use chartdeck_promote::Promoter;
use chartdeck_state::{ClusterConnection, Environment, StateStore};
use chartdeck_vars::{RuleKind, RuleSet, RuleSpec, SecretCipher, VariableResolver};

use crate::ApiState;

/// Backend with one installed release per namespace.
pub(crate) struct StubBackend;

#[async_trait]
impl ChartBackend for StubBackend {
    async fn search_charts(&self, terms: &str, _: bool) -> BackendResult<Vec<ChartSummary>> {
        Ok(vec![ChartSummary {
            name: format!("stable/{terms}"),
            version: "1.0.0".to_string(),
            app_version: String::new(),
            description: String::new(),
        }])
    }

    async fn get_template(&self, chart: &str, _: &str, kind: TemplateKind) -> BackendResult<String> {
        if chart == "broken" {
            return Err(BackendError::NotFound(format!("{chart} templates")));
        }
        Ok(format!("{}: {chart}", kind.as_str()))
    }

    async fn upgrade(&self, _: &DeploymentUnit) -> BackendResult<String> {
        Ok("deployed".to_string())
    }

    async fn delete_release(&self, _: &Kubeconfig, _: &str, _: bool) -> BackendResult<()> {
        Ok(())
    }

    async fn list_releases(&self, _: &Kubeconfig, namespace: &str) -> BackendResult<Vec<ReleaseInfo>> {
        Ok(vec![ReleaseInfo {
            name: format!("api-{namespace}"),
            namespace: namespace.to_string(),
            revision: 2,
            status: "deployed".to_string(),
            chart: "api-1.0.0".to_string(),
            app_version: String::new(),
        }])
    }

    async fn rollback(&self, _: &Kubeconfig, _: &str, _: u32) -> BackendResult<()> {
        Ok(())
    }

    async fn release_history(&self, _: &Kubeconfig, _: &str) -> BackendResult<Vec<ReleaseRevision>> {
        Ok(Vec::new())
    }
}

pub(crate) struct StubRegistry;

#[async_trait]
impl ImageRegistry for StubRegistry {
    async fn list_tags(&self, _: &str) -> BackendResult<Vec<String>> {
        Ok(vec!["1.0.0".to_string(), "1.1.0".to_string()])
    }

    async fn tag_created_at(&self, _: &str, tag: &str) -> BackendResult<DateTime<Utc>> {
        let day = if tag == "1.0.0" { 1 } else { 2 };
        Ok(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap())
    }
}

/// Handler state plus the channel ends the handlers feed.
pub(crate) struct TestHarness {
    pub state: ApiState,
    pub dispatched: mpsc::Receiver<DispatchMessage>,
    pub _completions: mpsc::Receiver<CompletionMessage>,
}

pub(crate) fn test_harness() -> TestHarness {
    let store = StateStore::open_in_memory().unwrap();
    let cipher = SecretCipher::from_passkey("test-passkey");
    let resolver = VariableResolver::new(cipher.clone());
    let backend: Arc<dyn ChartBackend> = Arc::new(StubBackend);
    let rules = RuleSet::compile(&[RuleSpec {
        name: "DB_URL".to_string(),
        kind: RuleKind::StartsWith,
        arg: "postgres://".to_string(),
    }])
    .unwrap();

    let (publisher, dispatched) = dispatch_channel(16);
    let (completions_tx, completions) = completion_channel(16);
    let tracker = DeploymentTracker::new(store.clone());
    let images = StaticImageLookup::new(HashMap::from([(
        "billing".to_string(),
        "reg.example.com/billing".to_string(),
    )]));

    let state = ApiState {
        store: store.clone(),
        cipher,
        rules: Arc::new(rules),
        dispatcher: Arc::new(Dispatcher::new(
            store.clone(),
            resolver.clone(),
            Arc::new(publisher),
            completions_tx,
        )),
        promoter: Promoter::new(store.clone(), backend.clone(), resolver, "stable"),
        backend: backend.clone(),
        templates: Arc::new(TemplateGate::new(backend)),
        detector: Arc::new(UpgradeDetector::new(
            Arc::new(StubRegistry),
            Arc::new(images),
            CachePolicy::unbounded(),
        )),
        graphs: Arc::new(DependencyGraphBuilder::new(store)),
        tracker: tracker.stats(),
    };
    TestHarness {
        state,
        dispatched,
        _completions: completions,
    }
}

pub(crate) fn seed_environment(store: &StateStore, name: &str) -> Environment {
    store
        .create_environment(Environment {
            id: 0,
            group: "payments".to_string(),
            name: name.to_string(),
            cluster: ClusterConnection {
                server: "https://k8s.example.com".to_string(),
                token: "token".to_string(),
                ca_data: String::new(),
            },
            namespace: name.to_string(),
            gateway: None,
            product_version: None,
            created_at: 0,
            updated_at: 0,
        })
        .unwrap()
}
