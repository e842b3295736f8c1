//! Data exchanged with the chart backend and carried on message channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chartdeck_state::DeploymentId;

use crate::kubeconfig::Kubeconfig;

/// Fully resolved instruction to install or upgrade one release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentUnit {
    pub kubeconfig: Kubeconfig,
    pub namespace: String,
    /// Chart coordinate `<repo>/<chart>`.
    pub chart: String,
    pub chart_version: String,
    pub release_name: String,
    /// `key=value` overrides, applied in order.
    pub overrides: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
}

/// Dispatch message: a unit tagged with the record that tracks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMessage {
    pub deployment_id: DeploymentId,
    #[serde(flatten)]
    pub unit: DeploymentUnit,
}

/// Completion message emitted once the backend finished a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMessage {
    pub deployment_id: DeploymentId,
    pub success: bool,
    #[serde(default)]
    pub error: String,
}

impl CompletionMessage {
    pub fn succeeded(deployment_id: DeploymentId) -> Self {
        Self {
            deployment_id,
            success: true,
            error: String::new(),
        }
    }

    pub fn failed(deployment_id: DeploymentId, error: impl Into<String>) -> Self {
        Self {
            deployment_id,
            success: false,
            error: error.into(),
        }
    }
}

/// A chart found in the configured repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSummary {
    /// Chart coordinate `<repo>/<chart>`.
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub description: String,
}

/// Which rendered artifact of a chart to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Values,
    Readme,
    Chart,
}

impl TemplateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Values => "values",
            Self::Readme => "readme",
            Self::Chart => "chart",
        }
    }
}

/// A release currently installed in a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    pub status: String,
    /// Chart as reported by the backend, `<chart>-<version>`.
    pub chart: String,
    #[serde(default)]
    pub app_version: String,
}

/// One entry of a release's revision history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRevision {
    pub revision: u32,
    pub updated: String,
    pub status: String,
    pub chart: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub description: String,
}

/// An image tag with its creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub tag: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_message_wire_shape_is_flat() {
        let msg = DispatchMessage {
            deployment_id: 9,
            unit: DeploymentUnit {
                kubeconfig: Kubeconfig::default(),
                namespace: "qa".to_string(),
                chart: "stable/api".to_string(),
                chart_version: "1.0.0".to_string(),
                release_name: "api".to_string(),
                overrides: vec!["app.a=1".to_string()],
                dry_run: false,
            },
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["deploymentId"], 9);
        assert_eq!(json["chartVersion"], "1.0.0");
        assert_eq!(json["releaseName"], "api");
        assert_eq!(json["dryRun"], false);

        let back: DispatchMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn completion_message_defaults_error() {
        let msg: CompletionMessage =
            serde_json::from_str(r#"{"deploymentId": 3, "success": true}"#).unwrap();
        assert_eq!(msg, CompletionMessage::succeeded(3));
    }
}
