//! Variable resolution: stored variables to backend override arguments.
//!
//! A resolution pass takes the environment's global variables and the
//! variables scoped to the chart being deployed, then:
//!
//! 1. decrypts secret values (keeping the stored value when that fails),
//! 2. binds `${NAMESPACE}` to the environment namespace,
//! 3. substitutes `${NAME}` placeholders from the global set,
//! 4. renders `key=value` pairs with normalized key paths,
//! 5. appends the environment gateway, if one is declared.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use chartdeck_state::{Environment, Variable};

use crate::cipher::SecretCipher;
use crate::error::CipherError;
use crate::names::normalize_variable_name;
use crate::template::{NAMESPACE_PLACEHOLDER, substitute_placeholders};

/// Override key carrying the environment gateway.
pub const GATEWAY_OVERRIDE_KEY: &str = "istio.virtualservices.gateways[0]";

static DECRYPT_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Number of secret values that failed to decrypt since process start.
pub fn decrypt_failures() -> u64 {
    DECRYPT_FAILURES.load(Ordering::Relaxed)
}

/// Non-fatal problems found while resolving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveWarning {
    /// A secret could not be decrypted; its stored ciphertext was used.
    UndecryptableSecret {
        scope: String,
        name: String,
        error: CipherError,
    },
    /// A `${NAME}` placeholder had no matching global variable.
    UnresolvedPlaceholder { variable: String, placeholder: String },
}

/// Output of a resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// `key=value` overrides in input order, gateway last.
    pub overrides: Vec<String>,
    pub warnings: Vec<ResolveWarning>,
}

impl Resolution {
    /// True when some secret went out still encrypted.
    pub fn has_undecryptable_secrets(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, ResolveWarning::UndecryptableSecret { .. }))
    }
}

/// Resolves variables for a deployment unit.
#[derive(Debug, Clone)]
pub struct VariableResolver {
    cipher: SecretCipher,
}

impl VariableResolver {
    pub fn new(cipher: SecretCipher) -> Self {
        Self { cipher }
    }

    pub fn cipher(&self) -> &SecretCipher {
        &self.cipher
    }

    /// Resolve `globals` followed by `scoped` into override arguments.
    pub fn resolve(
        &self,
        environment: &Environment,
        globals: &[Variable],
        scoped: &[Variable],
    ) -> Resolution {
        let mut warnings = Vec::new();

        // Placeholders may only reference globals, using their plain values.
        let plain_globals: Vec<(&str, String)> = globals
            .iter()
            .map(|var| (var.name.as_str(), self.plain_value(environment, var, &mut warnings)))
            .collect();
        let scoped_plain: Vec<(&str, String)> = scoped
            .iter()
            .map(|var| (var.name.as_str(), self.plain_value(environment, var, &mut warnings)))
            .collect();

        let mut overrides = Vec::with_capacity(globals.len() + scoped.len() + 1);
        for (name, plain) in plain_globals.iter().chain(scoped_plain.iter()) {
            let (value, unresolved) = substitute_placeholders(plain, |placeholder| {
                plain_globals
                    .iter()
                    .find(|(global, _)| *global == placeholder)
                    .map(|(_, value)| value.as_str())
            });
            for placeholder in unresolved {
                debug!(variable = %name, %placeholder, "placeholder left unresolved");
                warnings.push(ResolveWarning::UnresolvedPlaceholder {
                    variable: name.to_string(),
                    placeholder,
                });
            }
            if name.is_empty() || value.is_empty() {
                continue;
            }
            overrides.push(format!("{}={value}", normalize_variable_name(name)));
        }

        if let Some(gateway) = environment.gateway.as_deref().filter(|g| !g.is_empty()) {
            overrides.push(format!("{GATEWAY_OVERRIDE_KEY}={gateway}"));
        }

        Resolution { overrides, warnings }
    }

    /// Decrypted value with the namespace bound.
    fn plain_value(
        &self,
        environment: &Environment,
        var: &Variable,
        warnings: &mut Vec<ResolveWarning>,
    ) -> String {
        let value = if var.secret {
            match self.cipher.decrypt(&var.value) {
                Ok(plain) => plain,
                Err(error) => {
                    DECRYPT_FAILURES.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        environment_id = environment.id,
                        scope = %var.scope,
                        name = %var.name,
                        %error,
                        "secret variable could not be decrypted, using stored value"
                    );
                    warnings.push(ResolveWarning::UndecryptableSecret {
                        scope: var.scope.clone(),
                        name: var.name.clone(),
                        error,
                    });
                    var.value.clone()
                }
            }
        } else {
            var.value.clone()
        };
        value.replace(NAMESPACE_PLACEHOLDER, &environment.namespace)
    }
}
