//! Release planning for a promotion.
//!
//! The backend reports each release's chart as a single `<chart>-<version>`
//! label. Grammar used here:
//!
//! ```text
//! label   := chart "-" version      split at the LAST hyphen
//! chart   := any text               may contain hyphens
//! version := any text without "-"
//! ```
//!
//! Labels whose version itself contains a hyphen (`api-1.0.0-rc1`) split in
//! the wrong place. Storing chart name and version as separate fields
//! upstream would remove the ambiguity.

use serde::Serialize;

use chartdeck_backend::ReleaseInfo;

/// A `<chart>-<version>` label split into its parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartLabel {
    pub chart: String,
    /// Empty when the label has no hyphen.
    pub version: String,
}

/// Split a chart label at its last hyphen.
pub fn parse_chart_label(label: &str) -> ChartLabel {
    match label.rsplit_once('-') {
        Some((chart, version)) => ChartLabel {
            chart: chart.to_string(),
            version: version.to_string(),
        },
        None => ChartLabel {
            chart: label.to_string(),
            version: String::new(),
        },
    }
}

/// Strip a trailing `-<namespace>` from a release name.
pub fn strip_namespace_suffix<'a>(release: &'a str, namespace: &str) -> &'a str {
    if namespace.is_empty() {
        return release;
    }
    release
        .strip_suffix(namespace)
        .and_then(|rest| rest.strip_suffix('-'))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(release)
}

/// A target release to uninstall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeItem {
    pub release_name: String,
    pub chart: String,
}

/// A source release to install into the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployItem {
    pub release_name: String,
    pub chart: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromotionPlan {
    pub purge: Vec<PurgeItem>,
    pub deploy: Vec<DeployItem>,
}

impl PromotionPlan {
    /// Purge everything in the target, deploy everything from the source.
    pub fn build(source_namespace: &str, source: &[ReleaseInfo], target: &[ReleaseInfo]) -> Self {
        let purge = target
            .iter()
            .map(|release| PurgeItem {
                release_name: release.name.clone(),
                chart: parse_chart_label(&release.chart).chart,
            })
            .collect();
        let deploy = source
            .iter()
            .map(|release| {
                let label = parse_chart_label(&release.chart);
                DeployItem {
                    release_name: strip_namespace_suffix(&release.name, source_namespace).to_string(),
                    chart: label.chart,
                    version: label.version,
                }
            })
            .collect();
        Self { purge, deploy }
    }

    pub fn is_empty(&self) -> bool {
        self.purge.is_empty() && self.deploy.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn labels_split_at_last_hyphen() {
        assert_eq!(
            parse_chart_label("payment-gateway-2.3.1"),
            ChartLabel {
                chart: "payment-gateway".to_string(),
                version: "2.3.1".to_string()
            }
        );
        assert_eq!(parse_chart_label("nohyphen").chart, "nohyphen");
        assert_eq!(parse_chart_label("nohyphen").version, "");
    }

    #[test]
    fn prerelease_versions_split_in_the_wrong_place() {
        let label = parse_chart_label("api-1.0.0-rc1");
        assert_eq!(label.chart, "api-1.0.0");
        assert_eq!(label.version, "rc1");
    }

    #[test]
    fn namespace_suffix_is_stripped_once() {
        assert_eq!(strip_namespace_suffix("billing-qa", "qa"), "billing");
        assert_eq!(strip_namespace_suffix("billing-qa-qa", "qa"), "billing-qa");
        assert_eq!(strip_namespace_suffix("billingqa", "qa"), "billingqa");
        assert_eq!(strip_namespace_suffix("-qa", "qa"), "-qa");
        assert_eq!(strip_namespace_suffix("billing", ""), "billing");
    }

    #[test]
    fn plan_purges_target_and_deploys_source() {
        let source = vec![
            release("billing-qa", "qa", "billing-1.4.0"),
            release("ledger-qa", "qa", "ledger-api-0.9.2"),
        ];
        let target = vec![release("billing-uat", "uat", "billing-1.2.0")];

        let plan = PromotionPlan::build("qa", &source, &target);
        assert_eq!(
            plan.purge,
            vec![PurgeItem {
                release_name: "billing-uat".to_string(),
                chart: "billing".to_string()
            }]
        );
        assert_eq!(plan.deploy.len(), 2);
        assert_eq!(plan.deploy[1].release_name, "ledger");
        assert_eq!(plan.deploy[1].chart, "ledger-api");
        assert_eq!(plan.deploy[1].version, "0.9.2");
        assert!(!plan.is_empty());
    }
}
