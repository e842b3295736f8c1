//! Domain types for the chartdeck state store.
//!
//! These types represent the persisted state of environments, variables,
//! deployment batches and chart release metadata. All types are
//! serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

use crate::tables::{id_key, length_prefixed};

/// Identifier of an environment.
pub type EnvironmentId = u64;

/// Identifier of a deployment batch.
pub type RequestId = u64;

/// Identifier of a single deployment unit record.
pub type DeploymentId = u64;

/// Scope value for variables that apply to every chart.
pub const GLOBAL_SCOPE: &str = "global";

// ── Environment ───────────────────────────────────────────────────

/// Cluster connection descriptor. Opaque to the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClusterConnection {
    /// API server URI.
    pub server: String,
    /// Bearer token (`kubeconfig-<user>:<secret>` for rancher-issued tokens).
    pub token: String,
    /// Base64 CA certificate bundle.
    pub ca_data: String,
}

/// A named deployment target: one namespace on one cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    /// Assigned by the store on create.
    #[serde(default)]
    pub id: EnvironmentId,
    pub group: String,
    pub name: String,
    pub cluster: ClusterConnection,
    pub namespace: String,
    /// Network gateway injected into every deployment, if any.
    #[serde(default)]
    pub gateway: Option<String>,
    /// Product version label currently running in the environment.
    #[serde(default)]
    pub product_version: Option<String>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl Environment {
    pub fn table_key(&self) -> String {
        id_key(self.id)
    }
}

// ── Variable ──────────────────────────────────────────────────────

/// A configuration variable applied to deployments in one environment.
///
/// `scope` is either [`GLOBAL_SCOPE`] or a chart coordinate `<repo>/<chart>`.
/// When `secret` is set, `value` holds hex-encoded ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variable {
    pub environment_id: EnvironmentId,
    pub scope: String,
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub secret: bool,
    #[serde(default)]
    pub description: String,
}

impl Variable {
    /// Build the composite key for the variables table.
    pub fn table_key(&self) -> String {
        variable_key(self.environment_id, &self.scope, &self.name)
    }

    pub fn is_global(&self) -> bool {
        self.scope == GLOBAL_SCOPE
    }
}

pub(crate) fn variable_key(environment_id: EnvironmentId, scope: &str, name: &str) -> String {
    format!("{}{name}", scope_prefix(environment_id, scope))
}

pub(crate) fn scope_prefix(environment_id: EnvironmentId, scope: &str) -> String {
    format!("{}{}:", environment_prefix(environment_id), length_prefixed(scope))
}

pub(crate) fn environment_prefix(environment_id: EnvironmentId) -> String {
    format!("{}:", id_key(environment_id))
}

// ── Deployment tracking ───────────────────────────────────────────

/// A batch of deployment units submitted by one user.
///
/// Settled (`processed = true`) once every child [`Deployment`] is processed;
/// `success` is then the conjunction of the children's outcomes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestDeployment {
    #[serde(default)]
    pub id: RequestId,
    pub user_id: String,
    pub success: bool,
    pub processed: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl RequestDeployment {
    pub fn table_key(&self) -> String {
        id_key(self.id)
    }
}

/// One deployment unit belonging to a [`RequestDeployment`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    #[serde(default)]
    pub id: DeploymentId,
    pub request_id: RequestId,
    pub environment_id: EnvironmentId,
    pub release_name: String,
    pub chart: String,
    pub chart_version: String,
    pub success: bool,
    /// Error detail reported by the backend; empty on success.
    pub message: String,
    pub processed: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Deployment {
    pub fn table_key(&self) -> String {
        id_key(self.id)
    }

    /// Key of this deployment in its batch's child index.
    pub fn child_key(&self) -> String {
        format!("{}{}", child_prefix(self.request_id), id_key(self.id))
    }
}

pub(crate) fn child_prefix(request_id: RequestId) -> String {
    format!("{}:", id_key(request_id))
}

// ── Chart releases ────────────────────────────────────────────────

/// A dependency declared by a chart version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartDependency {
    pub name: String,
    /// Version constraint as declared (exact tag or semver range).
    pub version: String,
    #[serde(default)]
    pub repository: Option<String>,
}

/// Metadata for one published chart version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartRelease {
    pub chart: String,
    pub version: String,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<ChartDependency>,
}

impl ChartRelease {
    /// Build the composite key for the chart releases table.
    pub fn table_key(&self) -> String {
        chart_release_key(&self.chart, &self.version)
    }
}

pub(crate) fn chart_release_key(chart: &str, version: &str) -> String {
    format!("{}{version}", chart_prefix(chart))
}

pub(crate) fn chart_prefix(chart: &str) -> String {
    format!("{}:", length_prefixed(chart))
}
