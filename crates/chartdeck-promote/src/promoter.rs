//! Environment promotion.
//!
//! A promotion runs in two phases:
//!
//! 1. **Variables**, synchronously: copied from source to target and
//!    committed before [`Promoter::promote`] returns.
//! 2. **Releases**, on a detached task: every release in the target is
//!    purged, then every release from the source is redeployed. A purge
//!    failure aborts the phase; a redeploy failure is logged and skipped.
//!
//! The release phase outlives the caller. Its outcome is delivered as a
//! [`PromotionReport`] on the returned handle, which callers may drop.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use chartdeck_backend::{ChartBackend, DeploymentUnit, Kubeconfig};
use chartdeck_state::{Environment, EnvironmentId, GLOBAL_SCOPE, StateStore, Variable};
use chartdeck_vars::VariableResolver;

use crate::error::{PromoteError, PromoteResult};
use crate::plan::PromotionPlan;

/// Variables copied by a partial promotion.
const PARTIAL_VARIABLES: [&str; 2] = ["image.tag", "image.repository"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionMode {
    /// Replace every target variable with the source's.
    Full,
    /// Copy image coordinates only, keep the rest of the target.
    Partial,
}

impl PromotionMode {
    fn copies(self, var: &Variable) -> bool {
        match self {
            Self::Full => true,
            Self::Partial => PARTIAL_VARIABLES.contains(&var.name.as_str()),
        }
    }
}

/// Outcome of a promotion's release phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    pub source: EnvironmentId,
    pub target: EnvironmentId,
    pub purged: Vec<String>,
    pub deployed: Vec<String>,
    /// `(release, error)` for redeploys that failed.
    pub failed: Vec<(String, String)>,
    /// Set when the phase stopped early; no redeploy was attempted.
    pub aborted: Option<String>,
}

/// Handle to an accepted promotion.
#[derive(Debug)]
pub struct PromotionHandle {
    pub variables_copied: u32,
    report: oneshot::Receiver<PromotionReport>,
}

impl PromotionHandle {
    /// Wait for the release phase. `None` if the task died without reporting.
    pub async fn report(self) -> Option<PromotionReport> {
        self.report.await.ok()
    }
}

#[derive(Clone)]
pub struct Promoter {
    store: StateStore,
    backend: Arc<dyn ChartBackend>,
    resolver: VariableResolver,
    /// Repository prefix for redeployed chart coordinates.
    default_repository: String,
}

impl Promoter {
    pub fn new(
        store: StateStore,
        backend: Arc<dyn ChartBackend>,
        resolver: VariableResolver,
        default_repository: impl Into<String>,
    ) -> Self {
        Self {
            store,
            backend,
            resolver,
            default_repository: default_repository.into(),
        }
    }

    /// Promote `source` onto `target`.
    pub async fn promote(
        &self,
        source: EnvironmentId,
        target: EnvironmentId,
        mode: PromotionMode,
    ) -> PromoteResult<PromotionHandle> {
        if source == target {
            return Err(PromoteError::Validation(
                "source and target must be different environments".to_string(),
            ));
        }
        let source_env = self.environment(source)?;
        let target_env = self.environment(target)?;

        let variables_copied = self.copy_variables(&source_env, &target_env, mode)?;
        info!(source, target, ?mode, variables_copied, "promotion variables copied");

        let (tx, rx) = oneshot::channel();
        let promoter = self.clone();
        tokio::spawn(async move {
            let report = promoter.release_phase(&source_env, &target_env).await;
            // The caller may have dropped its handle.
            let _ = tx.send(report);
        });

        Ok(PromotionHandle {
            variables_copied,
            report: rx,
        })
    }

    fn environment(&self, id: EnvironmentId) -> PromoteResult<Environment> {
        self.store
            .get_environment(id)?
            .ok_or(PromoteError::EnvironmentNotFound(id))
    }

    /// Copy variables for `mode`. Returns how many rows were written.
    ///
    /// The target's variables change in a single transaction: on error they
    /// are left exactly as they were.
    pub fn copy_variables(
        &self,
        source: &Environment,
        target: &Environment,
        mode: PromotionMode,
    ) -> PromoteResult<u32> {
        let rows: Vec<Variable> = self
            .store
            .list_variables_by_environment(source.id)?
            .into_iter()
            .filter(|var| mode.copies(var))
            .map(|var| Variable {
                environment_id: target.id,
                ..var
            })
            .collect();

        match mode {
            PromotionMode::Full => {
                let removed = self.store.replace_variables(target.id, &rows)?;
                debug!(target = target.id, removed, "target variables replaced");
            }
            PromotionMode::Partial => self.store.upsert_variables(&rows)?,
        }
        Ok(rows.len() as u32)
    }

    async fn release_phase(&self, source: &Environment, target: &Environment) -> PromotionReport {
        let mut report = PromotionReport {
            source: source.id,
            target: target.id,
            ..Default::default()
        };

        let source_kubeconfig = Kubeconfig::for_environment(source);
        let target_kubeconfig = Kubeconfig::for_environment(target);

        let listed = async {
            let source_releases = self
                .backend
                .list_releases(&source_kubeconfig, &source.namespace)
                .await?;
            let target_releases = self
                .backend
                .list_releases(&target_kubeconfig, &target.namespace)
                .await?;
            Ok::<_, chartdeck_backend::BackendError>((source_releases, target_releases))
        };
        let plan = match listed.await {
            Ok((source_releases, target_releases)) => {
                PromotionPlan::build(&source.namespace, &source_releases, &target_releases)
            }
            Err(e) => {
                error!(source = source.id, target = target.id, error = %e, "promotion could not list releases");
                report.aborted = Some(e.to_string());
                return report;
            }
        };
        info!(
            source = source.id,
            target = target.id,
            purge = plan.purge.len(),
            deploy = plan.deploy.len(),
            "promotion release phase started"
        );

        for item in &plan.purge {
            if let Err(e) = self
                .backend
                .delete_release(&target_kubeconfig, &item.release_name, true)
                .await
            {
                error!(
                    target = target.id,
                    release = %item.release_name,
                    error = %e,
                    "purge failed, promotion aborted"
                );
                report.aborted = Some(format!("purge of {} failed: {e}", item.release_name));
                return report;
            }
            debug!(target = target.id, release = %item.release_name, "release purged");
            report.purged.push(item.release_name.clone());
        }

        for item in &plan.deploy {
            let chart = format!("{}/{}", self.default_repository, item.chart);
            let outcome = match self.unit_for(target, &target_kubeconfig, &chart, item) {
                Ok(unit) => self.backend.upgrade(&unit).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match outcome {
                Ok(_) => {
                    debug!(target = target.id, release = %item.release_name, "release redeployed");
                    report.deployed.push(item.release_name.clone());
                }
                Err(e) => {
                    warn!(
                        target = target.id,
                        release = %item.release_name,
                        error = %e,
                        "redeploy failed, continuing"
                    );
                    report.failed.push((item.release_name.clone(), e));
                }
            }
        }

        info!(
            source = source.id,
            target = target.id,
            deployed = report.deployed.len(),
            failed = report.failed.len(),
            "promotion release phase finished"
        );
        report
    }

    fn unit_for(
        &self,
        target: &Environment,
        kubeconfig: &Kubeconfig,
        chart: &str,
        item: &crate::plan::DeployItem,
    ) -> PromoteResult<DeploymentUnit> {
        let globals = self.store.list_variables_by_scope(target.id, GLOBAL_SCOPE)?;
        let scoped = self.store.list_variables_by_scope(target.id, chart)?;
        let resolution = self.resolver.resolve(target, &globals, &scoped);
        Ok(DeploymentUnit {
            kubeconfig: kubeconfig.clone(),
            namespace: target.namespace.clone(),
            chart: chart.to_string(),
            chart_version: item.version.clone(),
            release_name: item.release_name.clone(),
            overrides: resolution.overrides,
            dry_run: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use chartdeck_backend::*;
    use chartdeck_state::ClusterConnection;
    use chartdeck_vars::SecretCipher;

    /// Backend that lists fixed releases per namespace and records calls.
    #[derive(Default)]
    struct ScriptedBackend {
        calls: Mutex<Vec<String>>,
        units: Mutex<Vec<DeploymentUnit>>,
        fail_purge: Option<&'static str>,
        fail_upgrade: Option<&'static str>,
    }

    fn release(name: &str, namespace: &str, chart: &str) -> ReleaseInfo {
        ReleaseInfo {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision: 1,
            status: "deployed".to_string(),
            chart: chart.to_string(),
            app_version: String::new(),
        }
    }

    #[async_trait]
    impl ChartBackend for ScriptedBackend {
        async fn search_charts(&self, _: &str, _: bool) -> BackendResult<Vec<ChartSummary>> {
            Ok(vec![])
        }

        async fn get_template(&self, _: &str, _: &str, _: TemplateKind) -> BackendResult<String> {
            Ok(String::new())
        }

        async fn upgrade(&self, unit: &DeploymentUnit) -> BackendResult<String> {
            self.calls.lock().unwrap().push(format!("upgrade {}", unit.release_name));
            self.units.lock().unwrap().push(unit.clone());
            if self.fail_upgrade == Some(unit.release_name.as_str()) {
                return Err(BackendError::NotFound(unit.chart.clone()));
            }
            Ok("deployed".to_string())
        }

        async fn delete_release(&self, _: &Kubeconfig, name: &str, purge: bool) -> BackendResult<()> {
            assert!(purge);
            self.calls.lock().unwrap().push(format!("delete {name}"));
            if self.fail_purge == Some(name) {
                return Err(BackendError::Transport("cluster unreachable".to_string()));
            }
            Ok(())
        }

        async fn list_releases(&self, _: &Kubeconfig, namespace: &str) -> BackendResult<Vec<ReleaseInfo>> {
            Ok(match namespace {
                "qa" => vec![
                    release("billing-qa", "qa", "billing-1.4.0"),
                    release("ledger-qa", "qa", "ledger-0.9.2"),
                ],
                "uat" => vec![
                    release("billing", "uat", "billing-1.2.0"),
                    release("audit", "uat", "audit-3.0.0"),
                ],
                _ => vec![],
            })
        }

        async fn rollback(&self, _: &Kubeconfig, _: &str, _: u32) -> BackendResult<()> {
            Ok(())
        }

        async fn release_history(&self, _: &Kubeconfig, _: &str) -> BackendResult<Vec<ReleaseRevision>> {
            Ok(vec![])
        }
    }

    fn environment(store: &StateStore, name: &str) -> Environment {
        store
            .create_environment(Environment {
                id: 0,
                group: "core".to_string(),
                name: name.to_string(),
                cluster: ClusterConnection::default(),
                namespace: name.to_string(),
                gateway: None,
                product_version: None,
                created_at: 0,
                updated_at: 0,
            })
            .unwrap()
    }

    fn put(store: &StateStore, env: EnvironmentId, scope: &str, name: &str, value: &str) {
        store
            .upsert_variable(&Variable {
                environment_id: env,
                scope: scope.to_string(),
                name: name.to_string(),
                value: value.to_string(),
                secret: false,
                description: String::new(),
            })
            .unwrap();
    }

    fn promoter(store: &StateStore, backend: Arc<ScriptedBackend>) -> Promoter {
        let resolver = VariableResolver::new(SecretCipher::from_passkey("k"));
        Promoter::new(store.clone(), backend, resolver, "stable")
    }

    fn seeded() -> (StateStore, Environment, Environment) {
        let store = StateStore::open_in_memory().unwrap();
        let qa = environment(&store, "qa");
        let uat = environment(&store, "uat");
        put(&store, qa.id, GLOBAL_SCOPE, "username", "qa-user");
        put(&store, qa.id, "stable/billing", "image.tag", "1.4.0");
        put(&store, qa.id, "stable/billing", "image.repository", "reg/billing");
        put(&store, uat.id, GLOBAL_SCOPE, "password", "keep-me");
        put(&store, uat.id, "stable/billing", "image.tag", "1.2.0");
        (store, qa, uat)
    }

    fn names(store: &StateStore, env: EnvironmentId) -> Vec<String> {
        let mut names: Vec<String> = store
            .list_variables_by_environment(env)
            .unwrap()
            .into_iter()
            .map(|v| format!("{}:{}={}", v.scope, v.name, v.value))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn full_mode_replaces_target_variables() {
        let (store, qa, uat) = seeded();
        let promoter = promoter(&store, Arc::new(ScriptedBackend::default()));

        let handle = promoter.promote(qa.id, uat.id, PromotionMode::Full).await.unwrap();
        assert_eq!(handle.variables_copied, 3);
        assert_eq!(
            names(&store, uat.id),
            vec![
                "global:username=qa-user",
                "stable/billing:image.repository=reg/billing",
                "stable/billing:image.tag=1.4.0",
            ]
        );
        handle.report().await.unwrap();
    }

    #[tokio::test]
    async fn partial_mode_copies_image_coordinates_only() {
        let (store, qa, uat) = seeded();
        let promoter = promoter(&store, Arc::new(ScriptedBackend::default()));

        let handle = promoter.promote(qa.id, uat.id, PromotionMode::Partial).await.unwrap();
        assert_eq!(handle.variables_copied, 2);
        assert_eq!(
            names(&store, uat.id),
            vec![
                "global:password=keep-me",
                "stable/billing:image.repository=reg/billing",
                "stable/billing:image.tag=1.4.0",
            ]
        );
        handle.report().await.unwrap();
    }

    #[tokio::test]
    async fn failed_copy_leaves_target_variables_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");
        let (qa, uat) = {
            let store = StateStore::open(&path).unwrap();
            let qa = environment(&store, "qa");
            let uat = environment(&store, "uat");
            put(&store, uat.id, GLOBAL_SCOPE, "password", "keep-me");
            (qa, uat)
        };

        // An unreadable source row fails the copy partway through.
        {
            let key = Variable {
                environment_id: qa.id,
                scope: GLOBAL_SCOPE.to_string(),
                name: "username".to_string(),
                value: String::new(),
                secret: false,
                description: String::new(),
            }
            .table_key();
            let db = redb::Database::create(&path).unwrap();
            let txn = db.begin_write().unwrap();
            {
                let mut table = txn.open_table(chartdeck_state::tables::VARIABLES).unwrap();
                table.insert(key.as_str(), b"{".as_slice()).unwrap();
            }
            txn.commit().unwrap();
        }

        let store = StateStore::open(&path).unwrap();
        let promoter = promoter(&store, Arc::new(ScriptedBackend::default()));
        let err = promoter.promote(qa.id, uat.id, PromotionMode::Full).await.unwrap_err();

        assert!(matches!(err, PromoteError::State(_)));
        assert_eq!(names(&store, uat.id), vec!["global:password=keep-me"]);
    }

    #[tokio::test]
    async fn purges_everything_before_redeploying() {
        let (store, qa, uat) = seeded();
        let backend = Arc::new(ScriptedBackend::default());
        let promoter = promoter(&store, backend.clone());

        let report = promoter
            .promote(qa.id, uat.id, PromotionMode::Full)
            .await
            .unwrap()
            .report()
            .await
            .unwrap();

        assert_eq!(
            *backend.calls.lock().unwrap(),
            vec!["delete billing", "delete audit", "upgrade billing", "upgrade ledger"]
        );
        assert_eq!(report.purged, vec!["billing", "audit"]);
        assert_eq!(report.deployed, vec!["billing", "ledger"]);
        assert!(report.aborted.is_none());

        let units = backend.units.lock().unwrap();
        assert_eq!(units[0].chart, "stable/billing");
        assert_eq!(units[0].chart_version, "1.4.0");
        assert_eq!(units[0].namespace, "uat");
        assert!(units[0].overrides.contains(&"image.tag=1.4.0".to_string()));
    }

    #[tokio::test]
    async fn purge_failure_aborts_redeploy() {
        let (store, qa, uat) = seeded();
        let backend = Arc::new(ScriptedBackend {
            fail_purge: Some("billing"),
            ..Default::default()
        });
        let promoter = promoter(&store, backend.clone());

        let report = promoter
            .promote(qa.id, uat.id, PromotionMode::Partial)
            .await
            .unwrap()
            .report()
            .await
            .unwrap();

        assert_eq!(*backend.calls.lock().unwrap(), vec!["delete billing"]);
        assert!(report.aborted.unwrap().contains("cluster unreachable"));
        assert!(report.deployed.is_empty());
    }

    #[tokio::test]
    async fn redeploy_failures_do_not_stop_the_rest() {
        let (store, qa, uat) = seeded();
        let backend = Arc::new(ScriptedBackend {
            fail_upgrade: Some("billing"),
            ..Default::default()
        });
        let promoter = promoter(&store, backend.clone());

        let report = promoter
            .promote(qa.id, uat.id, PromotionMode::Full)
            .await
            .unwrap()
            .report()
            .await
            .unwrap();

        assert_eq!(report.deployed, vec!["ledger"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "billing");
    }

    #[tokio::test]
    async fn rejects_same_or_unknown_environments() {
        let (store, qa, _) = seeded();
        let promoter = promoter(&store, Arc::new(ScriptedBackend::default()));

        assert!(matches!(
            promoter.promote(qa.id, qa.id, PromotionMode::Full).await,
            Err(PromoteError::Validation(_))
        ));
        assert!(matches!(
            promoter.promote(qa.id, 99, PromotionMode::Full).await,
            Err(PromoteError::EnvironmentNotFound(99))
        ));
    }
}
