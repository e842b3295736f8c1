//! Chart dependency graphs.
//!
//! Starting from one chart version, declared dependencies are expanded
//! recursively from stored release metadata. Every node is visited once,
//! so cyclic declarations terminate.

use std::collections::HashSet;

use semver::{Version, VersionReq};
use serde::Serialize;
use tracing::debug;

use chartdeck_state::{ChartDependency, StateStore};

use crate::error::{InsightError, InsightResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Link {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyGraph {
    /// `<chart>-<version>` labels in discovery order.
    pub nodes: Vec<String>,
    pub links: Vec<Link>,
}

impl DependencyGraph {
    pub fn contains(&self, node: &str) -> bool {
        self.nodes.iter().any(|n| n == node)
    }
}

fn node_label(chart: &str, version: &str) -> String {
    format!("{chart}-{version}")
}

pub struct DependencyGraphBuilder {
    store: StateStore,
}

impl DependencyGraphBuilder {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Build the graph rooted at `chart` `version`.
    ///
    /// The root must have published metadata: an unknown root is
    /// [`InsightError::ChartNotFound`] instead of a single-node graph, so a
    /// mistyped coordinate surfaces as a 404. Dependencies without metadata
    /// still appear as leaf nodes.
    pub fn build(&self, chart: &str, version: &str) -> InsightResult<DependencyGraph> {
        if self.store.get_chart_release(chart, version)?.is_none() {
            return Err(InsightError::ChartNotFound(node_label(chart, version)));
        }
        let mut graph = DependencyGraph::default();
        let mut visited = HashSet::new();
        let mut linked = HashSet::new();
        self.expand(chart, version, None, &mut graph, &mut visited, &mut linked)?;
        debug!(
            %chart,
            %version,
            nodes = graph.nodes.len(),
            links = graph.links.len(),
            "dependency graph built"
        );
        Ok(graph)
    }

    fn expand(
        &self,
        chart: &str,
        version: &str,
        parent: Option<&str>,
        graph: &mut DependencyGraph,
        visited: &mut HashSet<String>,
        linked: &mut HashSet<Link>,
    ) -> InsightResult<()> {
        let node = node_label(chart, version);
        if let Some(parent) = parent {
            let link = Link {
                source: parent.to_string(),
                target: node.clone(),
            };
            if linked.insert(link.clone()) {
                graph.links.push(link);
            }
        }
        if !visited.insert(node.clone()) {
            return Ok(());
        }
        graph.nodes.push(node.clone());

        let Some(release) = self.store.get_chart_release(chart, version)? else {
            debug!(%node, "no release metadata, treating as leaf");
            return Ok(());
        };
        for dependency in &release.dependencies {
            let resolved = self.resolve_version(dependency)?;
            self.expand(&dependency.name, &resolved, Some(node.as_str()), graph, visited, linked)?;
        }
        Ok(())
    }

    /// Pick a concrete version for a declared constraint.
    ///
    /// An exact known version is used as is. Otherwise a semver range picks
    /// the highest matching known version. Anything else is taken verbatim.
    pub fn resolve_version(&self, dependency: &ChartDependency) -> InsightResult<String> {
        let declared = dependency.version.trim();
        let known = self.store.list_chart_versions(&dependency.name)?;
        if known.iter().any(|v| v == declared) {
            return Ok(declared.to_string());
        }

        if let Ok(req) = VersionReq::parse(declared) {
            let best = known
                .iter()
                .filter_map(|v| Version::parse(v).ok().map(|parsed| (parsed, v)))
                .filter(|(parsed, _)| req.matches(parsed))
                .max_by(|a, b| a.0.cmp(&b.0));
            if let Some((_, version)) = best {
                debug!(dependency = %dependency.name, %declared, %version, "range resolved");
                return Ok(version.clone());
            }
        }
        Ok(declared.to_string())
    }
}
