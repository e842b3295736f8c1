//! `helm` CLI adapter implementing [`ChartBackend`].
//!
//! Every cluster-facing call writes the environment's kubeconfig to a
//! temporary file that lives for the duration of the command.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

use crate::backend::ChartBackend;
use crate::error::{BackendError, BackendResult};
use crate::kubeconfig::Kubeconfig;
use crate::types::*;

/// Runs helm as a subprocess.
#[derive(Debug, Clone)]
pub struct HelmCli {
    bin: PathBuf,
    /// Where scoped kubeconfig files are written; the system temp dir if unset.
    kubeconfig_dir: Option<PathBuf>,
}

impl HelmCli {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            kubeconfig_dir: None,
        }
    }

    pub fn with_kubeconfig_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.kubeconfig_dir = Some(dir.into());
        self
    }

    async fn run(&self, args: &[String]) -> BackendResult<String> {
        let program = self.bin.display().to_string();
        debug!(%program, ?args, "running helm");
        let output = Command::new(&self.bin)
            .args(args)
            .output()
            .await
            .map_err(|source| BackendError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(BackendError::Command {
                program,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a command against a cluster with a scoped kubeconfig file.
    async fn run_with_kubeconfig(&self, kubeconfig: &Kubeconfig, mut args: Vec<String>) -> BackendResult<String> {
        let file = write_kubeconfig(self.kubeconfig_dir.as_deref(), kubeconfig)?;
        args.push("--kubeconfig".to_string());
        args.push(file.path().display().to_string());
        // `file` is removed on drop, after the command completes.
        self.run(&args).await
    }
}

fn write_kubeconfig(dir: Option<&Path>, kubeconfig: &Kubeconfig) -> BackendResult<NamedTempFile> {
    let mut file = match dir {
        Some(dir) => NamedTempFile::new_in(dir)?,
        None => NamedTempFile::new()?,
    };
    file.write_all(kubeconfig.to_yaml()?.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn namespace_args(kubeconfig: &Kubeconfig) -> Vec<String> {
    match kubeconfig.namespace() {
        Some(ns) => vec!["--namespace".to_string(), ns.to_string()],
        None => vec![],
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(stdout: &str) -> BackendResult<T> {
    serde_json::from_str(stdout).map_err(|e| BackendError::Parse(e.to_string()))
}

/// Row of `helm list -o json`; revision is printed as a string.
#[derive(Deserialize)]
struct ListRow {
    name: String,
    namespace: String,
    revision: String,
    status: String,
    chart: String,
    #[serde(default)]
    app_version: String,
}

/// Build the argument list for `helm upgrade --install`.
pub fn upgrade_args(unit: &DeploymentUnit) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        unit.release_name.clone(),
        unit.chart.clone(),
        "--version".to_string(),
        unit.chart_version.clone(),
        "--namespace".to_string(),
        unit.namespace.clone(),
    ];
    for value in &unit.overrides {
        args.push("--set".to_string());
        args.push(value.clone());
    }
    if unit.dry_run {
        args.push("--dry-run".to_string());
    }
    args
}

#[async_trait]
impl ChartBackend for HelmCli {
    async fn search_charts(&self, terms: &str, all_versions: bool) -> BackendResult<Vec<ChartSummary>> {
        let mut args = vec!["search".to_string(), "repo".to_string()];
        if !terms.is_empty() {
            args.push(terms.to_string());
        }
        if all_versions {
            args.push("--versions".to_string());
        }
        args.extend(["-o".to_string(), "json".to_string()]);
        parse_json(&self.run(&args).await?)
    }

    async fn get_template(&self, chart: &str, version: &str, kind: TemplateKind) -> BackendResult<String> {
        let args = vec![
            "show".to_string(),
            kind.as_str().to_string(),
            chart.to_string(),
            "--version".to_string(),
            version.to_string(),
        ];
        self.run(&args).await
    }

    async fn upgrade(&self, unit: &DeploymentUnit) -> BackendResult<String> {
        self.run_with_kubeconfig(&unit.kubeconfig, upgrade_args(unit)).await
    }

    async fn delete_release(&self, kubeconfig: &Kubeconfig, name: &str, purge: bool) -> BackendResult<()> {
        let mut args = vec!["uninstall".to_string(), name.to_string()];
        args.extend(namespace_args(kubeconfig));
        if !purge {
            args.push("--keep-history".to_string());
        }
        self.run_with_kubeconfig(kubeconfig, args).await.map(|_| ())
    }

    async fn list_releases(&self, kubeconfig: &Kubeconfig, namespace: &str) -> BackendResult<Vec<ReleaseInfo>> {
        let args = vec![
            "list".to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "-o".to_string(),
            "json".to_string(),
        ];
        let rows: Vec<ListRow> = parse_json(&self.run_with_kubeconfig(kubeconfig, args).await?)?;
        rows.into_iter()
            .map(|row| {
                let revision = row
                    .revision
                    .parse()
                    .map_err(|_| BackendError::Parse(format!("revision {:?}", row.revision)))?;
                Ok(ReleaseInfo {
                    name: row.name,
                    namespace: row.namespace,
                    revision,
                    status: row.status,
                    chart: row.chart,
                    app_version: row.app_version,
                })
            })
            .collect()
    }

    async fn rollback(&self, kubeconfig: &Kubeconfig, name: &str, revision: u32) -> BackendResult<()> {
        let mut args = vec!["rollback".to_string(), name.to_string(), revision.to_string()];
        args.extend(namespace_args(kubeconfig));
        self.run_with_kubeconfig(kubeconfig, args).await.map(|_| ())
    }

    async fn release_history(&self, kubeconfig: &Kubeconfig, name: &str) -> BackendResult<Vec<ReleaseRevision>> {
        let mut args = vec!["history".to_string(), name.to_string()];
        args.extend(namespace_args(kubeconfig));
        args.extend(["-o".to_string(), "json".to_string()]);
        parse_json(&self.run_with_kubeconfig(kubeconfig, args).await?)
    }
}
