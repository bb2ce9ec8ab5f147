//! Loading the runner's input documents.

use crate::error::RunnerError;
use rootcause::prelude::Report;
use serde_json::Value as JsonValue;
use std::path::Path;
use weft_integration::StaticCredentialResolver;
use weft_workflow::WorkflowSnapshot;

fn read(path: &Path) -> Result<Vec<u8>, Report<RunnerError>> {
    Ok(std::fs::read(path).map_err(|e| RunnerError::read_file(path, e))?)
}

/// Reads a workflow snapshot document.
pub fn load_workflow(path: &Path) -> Result<WorkflowSnapshot, Report<RunnerError>> {
    let bytes = read(path)?;
    Ok(
        WorkflowSnapshot::from_json_slice(&bytes).map_err(|e| RunnerError::InvalidWorkflow {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?,
    )
}

/// Reads the trigger input document.
pub fn load_trigger_input(path: &Path) -> Result<JsonValue, Report<RunnerError>> {
    let bytes = read(path)?;
    Ok(
        serde_json::from_slice(&bytes).map_err(|e| RunnerError::InvalidTriggerInput {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?,
    )
}

/// Reads a credential list into a resolver.
pub fn load_credentials(path: &Path) -> Result<StaticCredentialResolver, Report<RunnerError>> {
    let bytes = read(path)?;
    Ok(
        StaticCredentialResolver::from_json_slice(&bytes).map_err(|e| {
            RunnerError::InvalidCredentials {
                path: path.to_path_buf(),
                details: e.to_string(),
            }
        })?,
    )
}
