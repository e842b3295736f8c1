//! Error types for variable handling.

use thiserror::Error;

pub type VarsResult<T> = Result<T, VarsError>;

#[derive(Debug, Error)]
pub enum VarsError {
    #[error("invalid rule for {name}: {reason}")]
    InvalidRule { name: String, reason: String },

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Rule(#[from] RuleViolation),
}

/// Failures of the secret cipher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("secret is not valid hex: {0}")]
    Hex(String),

    #[error("secret payload too short ({0} bytes)")]
    Truncated(usize),

    #[error("secret failed authentication (wrong passkey or corrupted value)")]
    Authentication,

    #[error("decrypted secret is not utf-8")]
    Utf8,

    #[error("failed to generate nonce: {0}")]
    Nonce(String),

    #[error("failed to encrypt secret")]
    Encrypt,
}

/// A value rejected by a configured rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("variable {name} violates rule {rule}")]
pub struct RuleViolation {
    pub name: String,
    pub rule: String,
}
