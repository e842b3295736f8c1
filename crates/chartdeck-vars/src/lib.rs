//! chartdeck-vars: turns stored variables into backend override arguments.
//!
//! # Components
//!
//! - **`cipher`**: passkey-derived symmetric encryption for secret variables
//! - **`names`**: key-path normalization (`app.` prefixing)
//! - **`template`**: `${NAME}` placeholder extraction and substitution
//! - **`resolver`**: the full resolution pass producing `key=value` overrides
//! - **`rules`**: value rules checked before a variable is written

pub mod cipher;
pub mod error;
pub mod names;
pub mod resolver;
pub mod rules;
pub mod template;

pub use cipher::SecretCipher;
pub use error::{CipherError, RuleViolation, VarsError, VarsResult};
pub use names::normalize_variable_name;
pub use resolver::{Resolution, ResolveWarning, VariableResolver};
pub use rules::{RuleKind, RuleSet, RuleSpec, ValueRule};
pub use template::{extract_placeholders, substitute_placeholders};
