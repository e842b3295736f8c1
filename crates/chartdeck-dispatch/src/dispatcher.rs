//! Deployment dispatcher: turns a batch into tracking rows and messages.
//!
//! A dispatch creates one `RequestDeployment` and one `Deployment` child
//! per unit, then publishes each unit for asynchronous execution. Every unit
//! is resolved before anything is written, and the request is committed
//! together with all of its children, so a batch is either stored whole or
//! not at all. A fast completion can never settle the batch while siblings
//! are still missing.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use chartdeck_backend::{
    CompletionMessage, DeploymentUnit, DispatchMessage, DispatchPublisher, Kubeconfig,
};
use chartdeck_state::{
    Deployment, Environment, EnvironmentId, GLOBAL_SCOPE, RequestDeployment, StateStore,
};
use chartdeck_vars::VariableResolver;

use crate::error::{DispatchError, DispatchResult};

/// One unit of a batch as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Chart coordinate `<repo>/<chart>`; also the variable scope.
    pub chart: String,
    pub version: String,
    pub release_name: String,
    pub environment_id: EnvironmentId,
    #[serde(default)]
    pub dry_run: bool,
}

impl DeploymentRequest {
    fn validate(&self, index: usize) -> DispatchResult<()> {
        let missing = if self.chart.trim().is_empty() {
            "chart"
        } else if self.version.trim().is_empty() {
            "version"
        } else if self.release_name.trim().is_empty() {
            "release_name"
        } else {
            return Ok(());
        };
        Err(DispatchError::Validation(format!("unit {index}: {missing} is required")))
    }
}

pub struct Dispatcher {
    store: StateStore,
    resolver: VariableResolver,
    publisher: Arc<dyn DispatchPublisher>,
    /// Where undeliverable units are reported as failed, so the tracker
    /// remains the only writer of batch outcomes.
    completions: mpsc::Sender<CompletionMessage>,
}

impl Dispatcher {
    pub fn new(
        store: StateStore,
        resolver: VariableResolver,
        publisher: Arc<dyn DispatchPublisher>,
        completions: mpsc::Sender<CompletionMessage>,
    ) -> Self {
        Self {
            store,
            resolver,
            publisher,
            completions,
        }
    }

    pub fn resolver(&self) -> &VariableResolver {
        &self.resolver
    }

    /// Resolve the override list for one chart in one environment.
    pub fn resolve_unit(
        &self,
        environment: &Environment,
        chart: &str,
        release_name: &str,
        chart_version: &str,
        dry_run: bool,
    ) -> DispatchResult<DeploymentUnit> {
        let globals = self.store.list_variables_by_scope(environment.id, GLOBAL_SCOPE)?;
        let scoped = self.store.list_variables_by_scope(environment.id, chart)?;
        let resolution = self.resolver.resolve(environment, &globals, &scoped);
        if resolution.has_undecryptable_secrets() {
            warn!(
                environment_id = environment.id,
                %chart,
                "deploying with secrets that could not be decrypted"
            );
        }
        Ok(DeploymentUnit {
            kubeconfig: Kubeconfig::for_environment(environment),
            namespace: environment.namespace.clone(),
            chart: chart.to_string(),
            chart_version: chart_version.to_string(),
            release_name: release_name.to_string(),
            overrides: resolution.overrides,
            dry_run,
        })
    }

    /// Dispatch a batch. Returns the unsettled `RequestDeployment` as soon
    /// as every unit has been handed to the transport.
    pub async fn dispatch(
        &self,
        user_id: &str,
        requests: Vec<DeploymentRequest>,
    ) -> DispatchResult<RequestDeployment> {
        if user_id.trim().is_empty() {
            return Err(DispatchError::Validation("user id is required".to_string()));
        }
        if requests.is_empty() {
            return Err(DispatchError::Validation("batch contains no units".to_string()));
        }
        for (index, request) in requests.iter().enumerate() {
            request.validate(index)?;
        }

        let mut environments: HashMap<EnvironmentId, Environment> = HashMap::new();
        for request in &requests {
            if environments.contains_key(&request.environment_id) {
                continue;
            }
            let env = self
                .store
                .get_environment(request.environment_id)?
                .ok_or(DispatchError::EnvironmentNotFound(request.environment_id))?;
            environments.insert(env.id, env);
        }

        let mut units = Vec::with_capacity(requests.len());
        let mut children = Vec::with_capacity(requests.len());
        for request in requests {
            let Some(env) = environments.get(&request.environment_id) else {
                return Err(DispatchError::EnvironmentNotFound(request.environment_id));
            };
            let unit = self.resolve_unit(
                env,
                &request.chart,
                &request.release_name,
                &request.version,
                request.dry_run,
            )?;
            children.push(Deployment {
                id: 0,
                request_id: 0,
                environment_id: env.id,
                release_name: unit.release_name.clone(),
                chart: unit.chart.clone(),
                chart_version: unit.chart_version.clone(),
                success: false,
                message: String::new(),
                processed: false,
                created_at: 0,
                updated_at: 0,
            });
            units.push(unit);
        }

        let (batch, children) = self.store.create_batch(user_id, children)?;
        let messages: Vec<DispatchMessage> = children
            .iter()
            .zip(units)
            .map(|(deployment, unit)| DispatchMessage {
                deployment_id: deployment.id,
                unit,
            })
            .collect();

        let units = messages.len();
        for message in messages {
            let deployment_id = message.deployment_id;
            debug!(request_id = batch.id, deployment_id, "publishing deployment unit");
            if let Err(e) = self.publisher.publish(message).await {
                warn!(request_id = batch.id, deployment_id, error = %e, "publish failed");
                let failed = CompletionMessage::failed(deployment_id, e.to_string());
                if self.completions.send(failed).await.is_err() {
                    error!(deployment_id, "completion channel closed, unit left unsettled");
                }
            }
        }

        info!(request_id = batch.id, %user_id, units, "deployment batch dispatched");
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use chartdeck_backend::{BackendError, BackendResult, dispatch_channel};
    use chartdeck_state::tables::VARIABLES;
    use chartdeck_state::{ClusterConnection, Variable};
    use chartdeck_vars::SecretCipher;

    use crate::tracker::DeploymentTracker;

    /// Records published messages, refusing releases named "unreachable".
    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<DispatchMessage>>,
    }

    #[async_trait]
    impl DispatchPublisher for RecordingPublisher {
        async fn publish(&self, message: DispatchMessage) -> BackendResult<()> {
            if message.unit.release_name == "unreachable" {
                return Err(BackendError::Transport("broker down".to_string()));
            }
            self.published.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn seed_environment(store: &StateStore) -> Environment {
        let env = store
            .create_environment(Environment {
                id: 0,
                group: "core".to_string(),
                name: "qa".to_string(),
                cluster: ClusterConnection {
                    server: "https://k8s.example.com".to_string(),
                    token: "kubeconfig-u-1:secret".to_string(),
                    ca_data: String::new(),
                },
                namespace: "core-qa".to_string(),
                gateway: Some("core-gw".to_string()),
                product_version: None,
                created_at: 0,
                updated_at: 0,
            })
            .unwrap();
        for (scope, name, value) in [
            (GLOBAL_SCOPE, "username", "svc"),
            ("stable/api", "image.tag", "1.4.0"),
            ("stable/web", "image.tag", "9.9.9"),
        ] {
            store
                .upsert_variable(&Variable {
                    environment_id: env.id,
                    scope: scope.to_string(),
                    name: name.to_string(),
                    value: value.to_string(),
                    secret: false,
                    description: String::new(),
                })
                .unwrap();
        }
        env
    }

    fn request(env: EnvironmentId, release: &str) -> DeploymentRequest {
        DeploymentRequest {
            chart: "stable/api".to_string(),
            version: "1.4.0".to_string(),
            release_name: release.to_string(),
            environment_id: env,
            dry_run: false,
        }
    }

    fn dispatcher(
        store: &StateStore,
        publisher: Arc<dyn DispatchPublisher>,
    ) -> (Dispatcher, mpsc::Receiver<CompletionMessage>) {
        let (tx, rx) = mpsc::channel(16);
        let resolver = VariableResolver::new(SecretCipher::from_passkey("k"));
        (Dispatcher::new(store.clone(), resolver, publisher, tx), rx)
    }

    #[tokio::test]
    async fn creates_one_request_and_one_child_per_unit() {
        let store = StateStore::open_in_memory().unwrap();
        let env = seed_environment(&store);
        let publisher = Arc::new(RecordingPublisher::default());
        let (dispatcher, _rx) = dispatcher(&store, publisher.clone());

        let batch = dispatcher
            .dispatch(
                "alice",
                vec![request(env.id, "api-a"), request(env.id, "api-b"), request(env.id, "api-c")],
            )
            .await
            .unwrap();

        assert!(!batch.processed);
        assert!(!batch.success);
        let children = store.list_deployments_for_request(batch.id).unwrap();
        assert_eq!(children.len(), 3);
        assert!(children.iter().all(|d| !d.processed));

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 3);
        let ids: Vec<u64> = published.iter().map(|m| m.deployment_id).collect();
        let child_ids: Vec<u64> = children.iter().map(|d| d.id).collect();
        assert_eq!(ids, child_ids);
    }

    #[tokio::test]
    async fn units_carry_resolved_overrides_for_their_scope() {
        let store = StateStore::open_in_memory().unwrap();
        let env = seed_environment(&store);
        let publisher = Arc::new(RecordingPublisher::default());
        let (dispatcher, _rx) = dispatcher(&store, publisher.clone());

        dispatcher.dispatch("alice", vec![request(env.id, "api")]).await.unwrap();

        let published = publisher.published.lock().unwrap();
        let unit = &published[0].unit;
        assert_eq!(unit.namespace, "core-qa");
        assert_eq!(
            unit.overrides,
            vec![
                "app.username=svc",
                "image.tag=1.4.0",
                "istio.virtualservices.gateways[0]=core-gw",
            ]
        );
        assert_eq!(unit.kubeconfig.namespace(), Some("core-qa"));
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        let (dispatcher, _rx) = dispatcher(&store, Arc::new(RecordingPublisher::default()));
        let err = dispatcher.dispatch("alice", vec![]).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_environment_creates_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        let env = seed_environment(&store);
        let (dispatcher, _rx) = dispatcher(&store, Arc::new(RecordingPublisher::default()));

        let err = dispatcher
            .dispatch("alice", vec![request(env.id, "api"), request(404, "api")])
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::EnvironmentNotFound(404)));
        assert!(store.list_requests_for_user("alice").unwrap().is_empty());
    }

    #[tokio::test]
    async fn unresolvable_unit_leaves_no_request_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");
        let env_id = {
            let store = StateStore::open(&path).unwrap();
            seed_environment(&store).id
        };

        // A row that no longer deserializes makes its scope unresolvable.
        {
            let key = Variable {
                environment_id: env_id,
                scope: "stable/broken".to_string(),
                name: "image.tag".to_string(),
                value: String::new(),
                secret: false,
                description: String::new(),
            }
            .table_key();
            let db = redb::Database::create(&path).unwrap();
            let txn = db.begin_write().unwrap();
            {
                let mut table = txn.open_table(VARIABLES).unwrap();
                table.insert(key.as_str(), b"not json".as_slice()).unwrap();
            }
            txn.commit().unwrap();
        }

        let store = StateStore::open(&path).unwrap();
        let publisher = Arc::new(RecordingPublisher::default());
        let (dispatcher, _rx) = dispatcher(&store, publisher.clone());
        let mut broken = request(env_id, "broken");
        broken.chart = "stable/broken".to_string();

        let err = dispatcher
            .dispatch("alice", vec![request(env_id, "api"), broken])
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::State(_)));
        assert!(store.list_requests_for_user("alice").unwrap().is_empty());
        assert!(store.get_deployment(1).unwrap().is_none());
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_fields_are_validation_errors() {
        let store = StateStore::open_in_memory().unwrap();
        let env = seed_environment(&store);
        let (dispatcher, _rx) = dispatcher(&store, Arc::new(RecordingPublisher::default()));

        let mut bad = request(env.id, "api");
        bad.version = String::new();
        let err = dispatcher.dispatch("alice", vec![bad]).await.unwrap_err();
        assert!(err.to_string().contains("version"));

        let err = dispatcher.dispatch(" ", vec![request(env.id, "api")]).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[tokio::test]
    async fn undeliverable_unit_is_reported_as_failed() {
        let store = StateStore::open_in_memory().unwrap();
        let env = seed_environment(&store);
        let (dispatcher, mut completions) =
            dispatcher(&store, Arc::new(RecordingPublisher::default()));

        let batch = dispatcher
            .dispatch("alice", vec![request(env.id, "api"), request(env.id, "unreachable")])
            .await
            .unwrap();

        let failed = completions.recv().await.unwrap();
        assert!(!failed.success);
        assert!(failed.error.contains("broker down"));

        // Once the tracker sees both outcomes the batch settles as failed.
        let tracker = DeploymentTracker::new(store.clone());
        tracker.handle(&failed).unwrap();
        let children = store.list_deployments_for_request(batch.id).unwrap();
        let delivered = children.iter().find(|d| d.release_name == "api").unwrap();
        let settled = tracker
            .handle(&CompletionMessage::succeeded(delivered.id))
            .unwrap()
            .unwrap();
        assert!(settled.processed);
        assert!(!settled.success);
    }

    #[tokio::test]
    async fn channel_transport_delivers_to_receiver() {
        let store = StateStore::open_in_memory().unwrap();
        let env = seed_environment(&store);
        let (transport, mut dispatches) = dispatch_channel(4);
        let (dispatcher, _rx) = dispatcher(&store, Arc::new(transport));

        dispatcher.dispatch("bob", vec![request(env.id, "api")]).await.unwrap();

        let message = dispatches.recv().await.unwrap();
        assert_eq!(message.unit.release_name, "api");
        assert_eq!(message.unit.chart_version, "1.4.0");
    }
}
