//! StateStore: redb-backed state persistence for chartdeck.
//!
//! Provides typed CRUD operations over environments, variables, deployment
//! batches, deployment units and chart release metadata. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, Table, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [ENVIRONMENTS, VARIABLES, REQUESTS, DEPLOYMENTS, CHART_RELEASES] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.open_table(REQUEST_CHILDREN).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic record access ──────────────────────────────────────

    fn get_record<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Scan a table, keeping records whose key starts with `prefix`.
    fn scan_records<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(prefix) {
                break;
            }
            let record = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    fn put_record<T: Serialize>(&self, table: JsonTable, key: &str, record: &T) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            insert_json(&mut table, key, record)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert a record under a freshly issued id, within one transaction.
    fn create_record<T: Serialize>(
        &self,
        table: JsonTable,
        sequence: &str,
        assign: impl FnOnce(u64) -> T,
    ) -> StateResult<T> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let id = next_id(&txn, sequence)?;
        let record = assign(id);
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            insert_json(&mut table, &id_key(id), &record)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(record)
    }

    fn delete_record(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Environments ───────────────────────────────────────────────

    /// Persist a new environment; the id and timestamps are assigned here.
    pub fn create_environment(&self, env: Environment) -> StateResult<Environment> {
        let now = epoch_secs();
        let created = self.create_record(ENVIRONMENTS, "environments", |id| Environment {
            id,
            created_at: now,
            updated_at: now,
            ..env
        })?;
        debug!(environment_id = created.id, name = %created.name, "environment stored");
        Ok(created)
    }

    /// Replace an existing environment record.
    pub fn put_environment(&self, env: &Environment) -> StateResult<()> {
        self.put_record(ENVIRONMENTS, &env.table_key(), env)
    }

    pub fn get_environment(&self, id: EnvironmentId) -> StateResult<Option<Environment>> {
        self.get_record(ENVIRONMENTS, &id_key(id))
    }

    pub fn list_environments(&self) -> StateResult<Vec<Environment>> {
        self.scan_records(ENVIRONMENTS, "")
    }

    /// Delete an environment and its variables. Returns true if it existed.
    pub fn delete_environment(&self, id: EnvironmentId) -> StateResult<bool> {
        let existed = self.delete_record(ENVIRONMENTS, &id_key(id))?;
        let removed = self.delete_variables_for_environment(id)?;
        debug!(environment_id = id, existed, variables_removed = removed, "environment deleted");
        Ok(existed)
    }

    // ── Variables ──────────────────────────────────────────────────

    /// Insert or replace a variable keyed by `(environment, scope, name)`.
    pub fn upsert_variable(&self, var: &Variable) -> StateResult<()> {
        let key = var.table_key();
        self.put_record(VARIABLES, &key, var)?;
        debug!(%key, "variable stored");
        Ok(())
    }

    pub fn get_variable(
        &self,
        environment_id: EnvironmentId,
        scope: &str,
        name: &str,
    ) -> StateResult<Option<Variable>> {
        self.get_record(VARIABLES, &variable_key(environment_id, scope, name))
    }

    /// All variables of an environment, across scopes.
    pub fn list_variables_by_environment(
        &self,
        environment_id: EnvironmentId,
    ) -> StateResult<Vec<Variable>> {
        let vars: Vec<Variable> =
            self.scan_records(VARIABLES, &environment_prefix(environment_id))?;
        Ok(vars
            .into_iter()
            .filter(|v| v.environment_id == environment_id)
            .collect())
    }

    /// Variables of an environment restricted to one scope.
    pub fn list_variables_by_scope(
        &self,
        environment_id: EnvironmentId,
        scope: &str,
    ) -> StateResult<Vec<Variable>> {
        let vars: Vec<Variable> =
            self.scan_records(VARIABLES, &scope_prefix(environment_id, scope))?;
        Ok(vars
            .into_iter()
            .filter(|v| v.environment_id == environment_id && v.scope == scope)
            .collect())
    }

    pub fn delete_variable(
        &self,
        environment_id: EnvironmentId,
        scope: &str,
        name: &str,
    ) -> StateResult<bool> {
        self.delete_record(VARIABLES, &variable_key(environment_id, scope, name))
    }

    /// Delete every variable of an environment. Returns number deleted.
    pub fn delete_variables_for_environment(&self, environment_id: EnvironmentId) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = {
            let mut table = txn.open_table(VARIABLES).map_err(map_err!(Table))?;
            remove_prefixed(&mut table, &environment_prefix(environment_id))?
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(environment_id, count, "variables deleted");
        Ok(count)
    }

    /// Replace every variable of an environment with `vars`, atomically.
    ///
    /// Each row must belong to `environment_id`; otherwise nothing changes.
    /// Returns the number of rows removed.
    pub fn replace_variables(&self, environment_id: EnvironmentId, vars: &[Variable]) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed = {
            let mut table = txn.open_table(VARIABLES).map_err(map_err!(Table))?;
            let removed = remove_prefixed(&mut table, &environment_prefix(environment_id))?;
            for var in vars {
                if var.environment_id != environment_id {
                    return Err(StateError::Invalid(format!(
                        "variable {} belongs to environment {}, not {environment_id}",
                        var.name, var.environment_id
                    )));
                }
                insert_json(&mut table, &var.table_key(), var)?;
            }
            removed
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(environment_id, removed, inserted = vars.len(), "variables replaced");
        Ok(removed)
    }

    /// Insert or replace several variables in one transaction.
    pub fn upsert_variables(&self, vars: &[Variable]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(VARIABLES).map_err(map_err!(Table))?;
            for var in vars {
                insert_json(&mut table, &var.table_key(), var)?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = vars.len(), "variables stored");
        Ok(())
    }

    // ── Deployment batches ─────────────────────────────────────────

    /// Create an unsettled batch owned by `user_id`.
    pub fn create_request(&self, user_id: &str) -> StateResult<RequestDeployment> {
        let now = epoch_secs();
        let request = self.create_record(REQUESTS, "requests", |id| RequestDeployment {
            id,
            user_id: user_id.to_string(),
            success: false,
            processed: false,
            created_at: now,
            updated_at: now,
        })?;
        debug!(request_id = request.id, %user_id, "deployment request created");
        Ok(request)
    }

    /// Create a batch together with all of its children in one transaction.
    ///
    /// Either the request and every child are persisted, or nothing is. The
    /// children's `request_id`, ids and timestamps are assigned here.
    pub fn create_batch(
        &self,
        user_id: &str,
        children: Vec<Deployment>,
    ) -> StateResult<(RequestDeployment, Vec<Deployment>)> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let request = RequestDeployment {
            id: next_id(&txn, "requests")?,
            user_id: user_id.to_string(),
            success: false,
            processed: false,
            created_at: now,
            updated_at: now,
        };
        {
            let mut table = txn.open_table(REQUESTS).map_err(map_err!(Table))?;
            insert_json(&mut table, &request.table_key(), &request)?;
        }
        let mut created = Vec::with_capacity(children.len());
        for child in children {
            let child = Deployment {
                request_id: request.id,
                ..child
            };
            created.push(insert_deployment(&txn, child, now)?);
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(request_id = request.id, %user_id, units = created.len(), "deployment batch created");
        Ok((request, created))
    }

    pub fn get_request(&self, id: RequestId) -> StateResult<Option<RequestDeployment>> {
        self.get_record(REQUESTS, &id_key(id))
    }

    /// Replace an existing batch record.
    pub fn put_request(&self, request: &RequestDeployment) -> StateResult<()> {
        self.put_record(REQUESTS, &request.table_key(), request)
    }

    pub fn list_requests_for_user(&self, user_id: &str) -> StateResult<Vec<RequestDeployment>> {
        let all: Vec<RequestDeployment> = self.scan_records(REQUESTS, "")?;
        Ok(all.into_iter().filter(|r| r.user_id == user_id).collect())
    }

    /// Children of a batch, in creation order.
    ///
    /// Reads the batch's slice of the child index, not the whole
    /// deployments table.
    pub fn list_deployments_for_request(&self, request_id: RequestId) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn.open_table(REQUEST_CHILDREN).map_err(map_err!(Table))?;
        let deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let prefix = child_prefix(request_id);
        let mut children = Vec::new();
        for entry in index.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, id) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let id = id.value();
            let child_key = id_key(id);
            let guard = deployments
                .get(child_key.as_str())
                .map_err(map_err!(Read))?
                .ok_or_else(|| StateError::NotFound(format!("deployment {id} of request {request_id}")))?;
            let child = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            children.push(child);
        }
        Ok(children)
    }

    /// True when every child of the batch is processed.
    ///
    /// Computed from persisted rows, so the answer does not depend on the
    /// order completion messages arrived in. A batch without children counts
    /// as processed.
    pub fn all_children_processed(&self, request_id: RequestId) -> StateResult<bool> {
        Ok(self
            .list_deployments_for_request(request_id)?
            .iter()
            .all(|d| d.processed))
    }

    /// True when at least one child of the batch failed.
    pub fn any_child_failed(&self, request_id: RequestId) -> StateResult<bool> {
        Ok(self
            .list_deployments_for_request(request_id)?
            .iter()
            .any(|d| !d.success))
    }

    // ── Deployment units ───────────────────────────────────────────

    /// Persist a new unprocessed child; id and timestamps are assigned here.
    pub fn create_deployment(&self, deployment: Deployment) -> StateResult<Deployment> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let created = insert_deployment(&txn, deployment, epoch_secs())?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            deployment_id = created.id,
            request_id = created.request_id,
            release = %created.release_name,
            "deployment created"
        );
        Ok(created)
    }

    pub fn get_deployment(&self, id: DeploymentId) -> StateResult<Option<Deployment>> {
        self.get_record(DEPLOYMENTS, &id_key(id))
    }

    /// Replace an existing deployment record.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        self.put_record(DEPLOYMENTS, &deployment.table_key(), deployment)
    }

    // ── Chart releases ─────────────────────────────────────────────

    pub fn put_chart_release(&self, release: &ChartRelease) -> StateResult<()> {
        self.put_record(CHART_RELEASES, &release.table_key(), release)
    }

    pub fn get_chart_release(&self, chart: &str, version: &str) -> StateResult<Option<ChartRelease>> {
        self.get_record(CHART_RELEASES, &chart_release_key(chart, version))
    }

    /// Every known version of a chart.
    pub fn list_chart_versions(&self, chart: &str) -> StateResult<Vec<String>> {
        let releases: Vec<ChartRelease> = self.scan_records(CHART_RELEASES, &chart_prefix(chart))?;
        Ok(releases
            .into_iter()
            .filter(|r| r.chart == chart)
            .map(|r| r.version)
            .collect())
    }
}

/// Serialize `record` and insert it under `key`.
fn insert_json<T: Serialize>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    record: &T,
) -> StateResult<()> {
    let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
    table
        .insert(key, value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

/// Remove every row whose key starts with `prefix`. Returns the count.
fn remove_prefixed(table: &mut Table<'_, &'static str, &'static [u8]>, prefix: &str) -> StateResult<u32> {
    let mut keys = Vec::new();
    for entry in table.range(prefix..).map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        let key = key.value();
        if !key.starts_with(prefix) {
            break;
        }
        keys.push(key.to_string());
    }
    for key in &keys {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    Ok(keys.len() as u32)
}

/// Persist a new child and its index entry inside an open write transaction.
fn insert_deployment(txn: &WriteTransaction, deployment: Deployment, now: u64) -> StateResult<Deployment> {
    let deployment = Deployment {
        id: next_id(txn, "deployments")?,
        created_at: now,
        updated_at: now,
        ..deployment
    };
    {
        let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        insert_json(&mut table, &deployment.table_key(), &deployment)?;
    }
    let mut index = txn.open_table(REQUEST_CHILDREN).map_err(map_err!(Table))?;
    index
        .insert(deployment.child_key().as_str(), deployment.id)
        .map_err(map_err!(Write))?;
    Ok(deployment)
}

/// Issue the next id of a sequence inside an open write transaction.
fn next_id(txn: &WriteTransaction, sequence: &str) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let current = table
        .get(sequence)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = current + 1;
    table.insert(sequence, next).map_err(map_err!(Write))?;
    Ok(next)
}

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
