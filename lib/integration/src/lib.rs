//! Integration contracts for the weft workflow engine.
//!
//! This crate provides:
//!
//! - **Connector trait**: Uniform interface the engine calls for third-party operations
//! - **HTTP connector**: A generic REST connector built on reqwest
//! - **Credential resolution**: Secrets handed to connectors at execution time

pub mod connector;
pub mod credential;
pub mod error;
pub mod http;

pub use connector::{Connector, ConnectorInfo, Operation, OperationMetadata, OperationResult};
pub use credential::{CredentialData, CredentialResolver, CredentialType, StaticCredentialResolver};
pub use error::{ConnectorError, CredentialError};
pub use http::{HttpConnector, HttpRequestSpec};
