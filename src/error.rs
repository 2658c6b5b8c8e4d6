//! Error taxonomy for the bootstrap library
//!
//! Every failure is fatal: errors propagate to the caller, which aborts the run.
//! Artifacts completed before the failure stay on disk.

use openssl::error::ErrorStack;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for bootstrap operations
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// The in-process cryptographic backend is missing or too old
    #[error("Cryptographic backend unavailable: {reason}")]
    DependencyUnavailable { reason: String },

    /// The CSPRNG could not produce bytes
    #[error("Secure random source unavailable: {0}")]
    EntropyUnavailable(#[source] ErrorStack),

    #[error("Failed to generate key pair: {0}")]
    KeyGeneration(#[source] ErrorStack),

    /// Directory creation, permission setting or file write failure
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed key or certificate serialization
    #[error("{context}: {source}")]
    Encoding {
        context: &'static str,
        #[source]
        source: ErrorStack,
    },

    /// Signing operation rejected
    #[error("Signing failed: {context}: {source}")]
    Signing {
        context: &'static str,
        #[source]
        source: ErrorStack,
    },

    /// The CA refused to sign a request
    #[error("Signing request rejected: {reason}")]
    SigningRejected { reason: String },

    /// CA key material missing, unreadable or not matching the CA certificate
    #[error("CA signing key unavailable at {}: {reason}", path.display())]
    SigningKeyUnavailable { path: PathBuf, reason: String },

    /// Leaf issuance attempted before the CA was established
    #[error("Certificate authority has not been bootstrapped")]
    CaUnavailable,

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Secret length must be at least 1")]
    InvalidSecretLength,
}

pub type Result<T> = std::result::Result<T, BootstrapError>;

impl BootstrapError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BootstrapError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        BootstrapError::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Adapter for `map_err` on openssl calls that build or serialize structures
pub(crate) fn encoding(context: &'static str) -> impl FnOnce(ErrorStack) -> BootstrapError {
    move |source| BootstrapError::Encoding { context, source }
}

/// Adapter for `map_err` on openssl calls that sign or verify
pub(crate) fn signing(context: &'static str) -> impl FnOnce(ErrorStack) -> BootstrapError {
    move |source| BootstrapError::Signing { context, source }
}
