//! Core domain types and utilities for the weft workflow engine.
//!
//! This crate provides the identifiers and error handling foundation shared
//! by the engine, integration, and metering crates.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{AccountId, CredentialId, ParseIdError, WorkflowId, WorkflowRunId, WorkflowVersionId};
