//! Error types for the integration crate.
//!
//! - `ConnectorError`: Errors from connector operations
//! - `CredentialError`: Errors resolving credentials for a node

use weft_core::CredentialId;
use std::fmt;

/// Why a connector call failed before producing an `OperationResult`.
///
/// Remote endpoints that answer with an error status are not connector
/// errors; they come back as a failed `OperationResult`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// The remote service could not be reached.
    ConnectionFailed { reason: String },
    /// The remote service rejected the supplied credentials.
    AuthenticationFailed { reason: String },
    /// The remote service asked the caller to slow down.
    RateLimited { retry_after_secs: Option<u64> },
    /// The connector has no operation with this name.
    OperationNotSupported { operation: String },
    /// The operation's resolved parameters are unusable.
    InvalidParameters { operation: String, reason: String },
    /// The response could not be read.
    ProtocolError { reason: String },
    /// The connector's own deadline passed.
    Timeout,
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { reason } => write!(f, "could not reach service: {reason}"),
            Self::AuthenticationFailed { reason } => write!(f, "credentials rejected: {reason}"),
            Self::RateLimited {
                retry_after_secs: Some(secs),
            } => write!(f, "rate limited, retry after {secs}s"),
            Self::RateLimited {
                retry_after_secs: None,
            } => write!(f, "rate limited"),
            Self::OperationNotSupported { operation } => {
                write!(f, "unsupported operation '{operation}'")
            }
            Self::InvalidParameters { operation, reason } => {
                write!(f, "invalid parameters for '{operation}': {reason}")
            }
            Self::ProtocolError { reason } => write!(f, "unreadable response: {reason}"),
            Self::Timeout => write!(f, "connector timed out"),
        }
    }
}

impl std::error::Error for ConnectorError {}

/// Errors from credential resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Credential not found.
    NotFound { id: CredentialId },
    /// Credential exists but has been revoked.
    Revoked { id: CredentialId },
    /// Invalid credential format.
    InvalidFormat { reason: String },
    /// The credential backend could not be reached.
    Unavailable { reason: String },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => {
                write!(f, "credential not found: {id}")
            }
            Self::Revoked { id } => {
                write!(f, "credential revoked: {id}")
            }
            Self::InvalidFormat { reason } => {
                write!(f, "invalid credential format: {reason}")
            }
            Self::Unavailable { reason } => {
                write!(f, "credential backend unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for CredentialError {}
