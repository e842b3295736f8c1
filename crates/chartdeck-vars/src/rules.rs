//! Value rules enforced when variables are written.
//!
//! Rules are configured per variable name and compiled once into a
//! [`RuleSet`]. Every rule bound to a name must pass for a write to be
//! accepted.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RuleViolation, VarsError, VarsResult};

/// Rule kinds accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    NotEmpty,
    StartsWith,
    EndsWith,
    Regex,
}

/// Configured rule, before compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Variable name the rule applies to.
    pub name: String,
    pub kind: RuleKind,
    #[serde(default)]
    pub arg: String,
}

/// A compiled value rule.
#[derive(Debug, Clone)]
pub enum ValueRule {
    NotEmpty,
    StartsWith(String),
    EndsWith(String),
    Regex(Regex),
}

impl ValueRule {
    pub fn compile(spec: &RuleSpec) -> VarsResult<Self> {
        let needs_arg = |kind: &str| {
            if spec.arg.is_empty() {
                Err(VarsError::InvalidRule {
                    name: spec.name.clone(),
                    reason: format!("{kind} requires an argument"),
                })
            } else {
                Ok(spec.arg.clone())
            }
        };
        match spec.kind {
            RuleKind::NotEmpty => Ok(Self::NotEmpty),
            RuleKind::StartsWith => Ok(Self::StartsWith(needs_arg("starts_with")?)),
            RuleKind::EndsWith => Ok(Self::EndsWith(needs_arg("ends_with")?)),
            RuleKind::Regex => {
                let pattern = needs_arg("regex")?;
                let regex = Regex::new(&pattern).map_err(|e| VarsError::InvalidRule {
                    name: spec.name.clone(),
                    reason: e.to_string(),
                })?;
                Ok(Self::Regex(regex))
            }
        }
    }

    pub fn check(&self, value: &str) -> bool {
        match self {
            Self::NotEmpty => !value.trim().is_empty(),
            Self::StartsWith(prefix) => value.starts_with(prefix.as_str()),
            Self::EndsWith(suffix) => value.ends_with(suffix.as_str()),
            Self::Regex(regex) => regex.is_match(value),
        }
    }

    /// Short human-readable description, used in violation messages.
    pub fn describe(&self) -> String {
        match self {
            Self::NotEmpty => "not_empty".to_string(),
            Self::StartsWith(prefix) => format!("starts_with({prefix})"),
            Self::EndsWith(suffix) => format!("ends_with({suffix})"),
            Self::Regex(regex) => format!("regex({})", regex.as_str()),
        }
    }
}

/// Rules bound to variable names.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<(String, ValueRule)>,
}

impl RuleSet {
    pub fn compile(specs: &[RuleSpec]) -> VarsResult<Self> {
        let rules = specs
            .iter()
            .map(|spec| Ok((spec.name.clone(), ValueRule::compile(spec)?)))
            .collect::<VarsResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check a plaintext value against every rule bound to `name`.
    pub fn validate(&self, name: &str, value: &str) -> Result<(), RuleViolation> {
        match self
            .rules
            .iter()
            .find(|(bound, rule)| bound == name && !rule.check(value))
        {
            Some((_, rule)) => Err(RuleViolation {
                name: name.to_string(),
                rule: rule.describe(),
            }),
            None => Ok(()),
        }
    }
}
