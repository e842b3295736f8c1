//! Variable comparison between a source and a target environment.

use std::collections::BTreeMap;

use serde::Serialize;

use chartdeck_state::Variable;

/// Rendered in place of secret values.
const MASK: &str = "******";

/// One difference between two environments' variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariableDiff {
    Changed {
        scope: String,
        name: String,
        source: String,
        target: String,
    },
    SourceOnly {
        scope: String,
        name: String,
        value: String,
    },
    TargetOnly {
        scope: String,
        name: String,
        value: String,
    },
}

impl VariableDiff {
    pub fn name(&self) -> &str {
        match self {
            Self::Changed { name, .. } | Self::SourceOnly { name, .. } | Self::TargetOnly { name, .. } => {
                name
            }
        }
    }
}

fn shown(var: &Variable) -> String {
    if var.secret {
        MASK.to_string()
    } else {
        var.value.clone()
    }
}

/// Compare variables keyed by `(scope, name)`.
///
/// Equal pairs produce nothing. Stored values are compared, so secrets
/// copied by a promotion compare equal. Output is sorted by scope, then name.
pub fn compare(source: &[Variable], target: &[Variable]) -> Vec<VariableDiff> {
    let mut keyed: BTreeMap<(&str, &str), (Option<&Variable>, Option<&Variable>)> = BTreeMap::new();
    for var in source {
        keyed.entry((var.scope.as_str(), var.name.as_str())).or_default().0 = Some(var);
    }
    for var in target {
        keyed.entry((var.scope.as_str(), var.name.as_str())).or_default().1 = Some(var);
    }

    keyed
        .into_iter()
        .filter_map(|((scope, name), pair)| {
            let (scope, name) = (scope.to_string(), name.to_string());
            match pair {
                (Some(s), Some(t)) if s.value == t.value && s.secret == t.secret => None,
                (Some(s), Some(t)) => Some(VariableDiff::Changed {
                    scope,
                    name,
                    source: shown(s),
                    target: shown(t),
                }),
                (Some(s), None) => Some(VariableDiff::SourceOnly {
                    scope,
                    name,
                    value: shown(s),
                }),
                (None, Some(t)) => Some(VariableDiff::TargetOnly {
                    scope,
                    name,
                    value: shown(t),
                }),
                (None, None) => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartdeck_state::GLOBAL_SCOPE;

    fn var(env: u64, scope: &str, name: &str, value: &str) -> Variable {
        Variable {
            environment_id: env,
            scope: scope.to_string(),
            name: name.to_string(),
            value: value.to_string(),
            secret: false,
            description: String::new(),
        }
    }

    #[test]
    fn reports_changed_source_only_and_target_only() {
        let source = vec![
            var(1, GLOBAL_SCOPE, "foo", "not-equal-1"),
            var(1, GLOBAL_SCOPE, "pass", "only-in-source"),
        ];
        let target = vec![
            var(2, GLOBAL_SCOPE, "foo", "not-equal-2"),
            var(2, GLOBAL_SCOPE, "port", "only-in-target"),
        ];

        let diff = compare(&source, &target);
        assert_eq!(
            diff,
            vec![
                VariableDiff::Changed {
                    scope: "global".to_string(),
                    name: "foo".to_string(),
                    source: "not-equal-1".to_string(),
                    target: "not-equal-2".to_string(),
                },
                VariableDiff::SourceOnly {
                    scope: "global".to_string(),
                    name: "pass".to_string(),
                    value: "only-in-source".to_string(),
                },
                VariableDiff::TargetOnly {
                    scope: "global".to_string(),
                    name: "port".to_string(),
                    value: "only-in-target".to_string(),
                },
            ]
        );
    }

    #[test]
    fn equal_values_and_scopes_are_independent() {
        let source = vec![var(1, GLOBAL_SCOPE, "a", "1"), var(1, "stable/api", "a", "1")];
        let target = vec![var(2, GLOBAL_SCOPE, "a", "1")];

        let diff = compare(&source, &target);
        assert_eq!(diff.len(), 1);
        assert!(matches!(&diff[0], VariableDiff::SourceOnly { scope, .. } if scope == "stable/api"));
    }

    #[test]
    fn secret_values_are_masked() {
        let mut secret = var(1, GLOBAL_SCOPE, "password", "a1b2");
        secret.secret = true;
        let diff = compare(&[secret], &[]);

        let json = serde_json::to_value(&diff[0]).unwrap();
        assert_eq!(json["kind"], "source_only");
        assert_eq!(json["value"], "******");
        assert_eq!(diff[0].name(), "password");
    }
}
