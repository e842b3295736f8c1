//! Per-environment kubeconfig documents.
//!
//! The backend authenticates against each environment's cluster with a
//! single-cluster, single-context, token-based kubeconfig rendered from the
//! environment record.

use serde::{Deserialize, Serialize};

use chartdeck_state::Environment;

use crate::error::{BackendError, BackendResult};

/// Marker preceding the user name inside issued tokens.
const TOKEN_USER_MARKER: &str = "kubeconfig-";

/// User name used when the token does not embed one.
const FALLBACK_USER: &str = "chartdeck";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    pub api_version: String,
    pub kind: String,
    pub clusters: Vec<NamedCluster>,
    pub contexts: Vec<NamedContext>,
    pub current_context: String,
    pub users: Vec<NamedUser>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    pub certificate_authority_data: String,
    pub server: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub cluster: String,
    pub namespace: String,
    pub user: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    pub user: UserEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserEntry {
    pub token: String,
}

impl Kubeconfig {
    /// Build the credential document for an environment.
    pub fn for_environment(env: &Environment) -> Self {
        let cluster_name = format!("{}-{}", env.group, env.name);
        let user = user_from_token(&env.cluster.token).unwrap_or(FALLBACK_USER);
        Self {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: vec![NamedCluster {
                name: cluster_name.clone(),
                cluster: ClusterEntry {
                    certificate_authority_data: env.cluster.ca_data.clone(),
                    server: env.cluster.server.clone(),
                },
            }],
            contexts: vec![NamedContext {
                name: cluster_name.clone(),
                context: ContextEntry {
                    cluster: cluster_name.clone(),
                    namespace: env.namespace.clone(),
                    user: user.to_string(),
                },
            }],
            current_context: cluster_name,
            users: vec![NamedUser {
                name: user.to_string(),
                user: UserEntry {
                    token: env.cluster.token.clone(),
                },
            }],
        }
    }

    /// Namespace of the first context, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.contexts
            .first()
            .map(|c| c.context.namespace.as_str())
            .filter(|ns| !ns.is_empty())
    }

    pub fn to_yaml(&self) -> BackendResult<String> {
        serde_yaml::to_string(self).map_err(|e| BackendError::Parse(e.to_string()))
    }

    pub fn from_yaml(doc: &str) -> BackendResult<Self> {
        serde_yaml::from_str(doc).map_err(|e| BackendError::Parse(e.to_string()))
    }
}

/// The user embedded in a `kubeconfig-<user>:<secret>` token.
pub fn user_from_token(token: &str) -> Option<&str> {
    let start = token.find(TOKEN_USER_MARKER)? + TOKEN_USER_MARKER.len();
    let rest = &token[start..];
    let end = rest.find(':')?;
    Some(&rest[..end]).filter(|user| !user.is_empty())
}
