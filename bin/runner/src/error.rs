//! Error type for the runner process.
//!
//! Library errors are flattened into these variants at the process boundary
//! and carried in a `rootcause` report.

use std::fmt;
use std::path::{Path, PathBuf};

/// Errors that stop the runner.
#[derive(Debug)]
pub enum RunnerError {
    /// Configuration could not be loaded.
    Config { details: String },
    /// An input file could not be read.
    ReadFile { path: PathBuf, details: String },
    /// The workflow file is not a valid snapshot.
    InvalidWorkflow { path: PathBuf, details: String },
    /// The trigger input file is not valid JSON.
    InvalidTriggerInput { path: PathBuf, details: String },
    /// The credentials file is not a valid credential list.
    InvalidCredentials { path: PathBuf, details: String },
    /// Connecting to or migrating the database failed.
    Database { details: String },
    /// The HTTP connector could not be built.
    Connector { details: String },
    /// The engine rejected or lost a run.
    Engine { details: String },
}

impl RunnerError {
    pub(crate) fn read_file(path: &Path, error: impl fmt::Display) -> Self {
        Self::ReadFile {
            path: path.to_path_buf(),
            details: error.to_string(),
        }
    }
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {}", details),
            Self::ReadFile { path, details } => {
                write!(f, "failed to read '{}': {}", path.display(), details)
            }
            Self::InvalidWorkflow { path, details } => {
                write!(f, "invalid workflow in '{}': {}", path.display(), details)
            }
            Self::InvalidTriggerInput { path, details } => {
                write!(f, "invalid trigger input in '{}': {}", path.display(), details)
            }
            Self::InvalidCredentials { path, details } => {
                write!(f, "invalid credentials in '{}': {}", path.display(), details)
            }
            Self::Database { details } => write!(f, "database error: {}", details),
            Self::Connector { details } => write!(f, "connector setup failed: {}", details),
            Self::Engine { details } => write!(f, "engine error: {}", details),
        }
    }
}

impl std::error::Error for RunnerError {}
