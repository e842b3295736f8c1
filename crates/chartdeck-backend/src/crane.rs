//! `crane` CLI adapter implementing [`ImageRegistry`].
//!
//! Registry credentials come from the docker config crane already reads;
//! `docker_config` overrides its location.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::registry::ImageRegistry;

#[derive(Debug, Clone)]
pub struct CraneRegistry {
    bin: PathBuf,
    docker_config: Option<PathBuf>,
}

/// The part of an image config blob we read.
#[derive(Deserialize)]
struct ImageConfig {
    created: Option<DateTime<Utc>>,
}

impl CraneRegistry {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            docker_config: None,
        }
    }

    pub fn with_docker_config(mut self, dir: impl Into<PathBuf>) -> Self {
        self.docker_config = Some(dir.into());
        self
    }

    async fn run(&self, args: &[&str]) -> BackendResult<String> {
        let program = self.bin.display().to_string();
        debug!(%program, ?args, "running crane");
        let mut cmd = Command::new(&self.bin);
        cmd.args(args);
        if let Some(dir) = &self.docker_config {
            cmd.env("DOCKER_CONFIG", dir);
        }
        let output = cmd.output().await.map_err(|source| BackendError::Spawn {
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
}

fn parse_tags(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_created(image: &str, stdout: &str) -> BackendResult<DateTime<Utc>> {
    let config: ImageConfig =
        serde_json::from_str(stdout).map_err(|e| BackendError::Parse(format!("{image}: {e}")))?;
    config
        .created
        .ok_or_else(|| BackendError::Parse(format!("{image}: config has no creation time")))
}

#[async_trait]
impl ImageRegistry for CraneRegistry {
    async fn list_tags(&self, image: &str) -> BackendResult<Vec<String>> {
        Ok(parse_tags(&self.run(&["ls", image]).await?))
    }

    async fn tag_created_at(&self, image: &str, tag: &str) -> BackendResult<DateTime<Utc>> {
        let reference = format!("{image}:{tag}");
        let stdout = self.run(&["config", &reference]).await?;
        parse_created(&reference, &stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_one_per_line() {
        assert_eq!(parse_tags("1.0.0\n1.1.0\n\n latest \n"), vec!["1.0.0", "1.1.0", "latest"]);
    }

    #[test]
    fn creation_time_comes_from_config_blob() {
        let created = parse_created(
            "img:1",
            r#"{"architecture":"amd64","created":"2024-03-01T10:00:00Z","config":{}}"#,
        )
        .unwrap();
        assert_eq!(created.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert!(parse_created("img:1", r#"{"architecture":"amd64"}"#).is_err());
    }
}
