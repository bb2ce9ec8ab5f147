//! Versioned envelope for persisted JSON payloads.
//!
//! Graph snapshots and node results are stored wrapped in an
//! envelope so their layout can change without rewriting old rows.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// The current envelope version.
pub const CURRENT_VERSION: u32 = 1;

/// A versioned envelope that wraps serialized data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// The version of the envelope format.
    pub version: u32,
    /// The wrapped payload.
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Creates a new envelope with the current version.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            payload,
        }
    }

    /// Unwraps the envelope, returning the payload.
    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Returns a reference to the payload.
    #[must_use]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Returns true if this envelope uses the current version.
    #[must_use]
    pub fn is_current_version(&self) -> bool {
        self.version == CURRENT_VERSION
    }
}

impl<T: Serialize> Envelope<T> {
    /// Wraps `payload` and converts it to a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn wrap(payload: T) -> Result<JsonValue, EnvelopeError> {
        serde_json::to_value(Self::new(payload)).map_err(EnvelopeError::Json)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Reads an envelope document, checking its version before the payload.
    ///
    /// # Errors
    ///
    /// Returns an error for unsupported versions or malformed payloads.
    pub fn unwrap_value(value: JsonValue) -> Result<T, EnvelopeError> {
        let raw: Envelope<JsonValue> = serde_json::from_value(value).map_err(EnvelopeError::Json)?;
        if !raw.is_current_version() {
            return Err(EnvelopeError::UnsupportedVersion {
                version: raw.version,
            });
        }
        serde_json::from_value(raw.payload).map_err(EnvelopeError::Json)
    }
}

/// Errors from reading or writing an envelope.
#[derive(Debug)]
pub enum EnvelopeError {
    /// The stored version is newer or older than this build understands.
    UnsupportedVersion { version: u32 },
    /// The document or payload is not valid JSON for the expected type.
    Json(serde_json::Error),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported envelope version {version}")
            }
            Self::Json(e) => write!(f, "invalid envelope: {e}"),
        }
    }
}

impl std::error::Error for EnvelopeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::UnsupportedVersion { .. } => None,
        }
    }
}
