//! Strongly-typed ID types for domain entities.
//!
//! Every ID wraps a ULID. `Display` adds a short type prefix (`run_01H...`),
//! while serde uses the bare ULID so snapshot documents stay prefix-free.
//! Parsing accepts either form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Parses `<prefix>_<ulid>` or a bare ULID.
fn parse_ulid(id_type: &'static str, prefix: &str, s: &str) -> Result<Ulid, ParseIdError> {
    let raw = s
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .unwrap_or(s);
    Ulid::from_str(raw).map_err(|e| ParseIdError {
        id_type,
        reason: e.to_string(),
    })
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Display prefix for this ID type.
            pub const PREFIX: &'static str = $prefix;

            /// Generates a new ID.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", Self::PREFIX, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_ulid(stringify!($name), Self::PREFIX, s).map(Self)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a workflow definition.
    WorkflowId,
    "wf"
);

define_id!(
    /// Unique identifier for one frozen version of a workflow definition.
    WorkflowVersionId,
    "wfv"
);

define_id!(
    /// Unique identifier for a single execution (run) of a workflow.
    WorkflowRunId,
    "run"
);

define_id!(
    /// Unique identifier for a billing account whose credit balance is metered.
    AccountId,
    "acct"
);

define_id!(
    /// Unique identifier for a stored credential.
    CredentialId,
    "cred"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_type_prefix() {
        assert!(AccountId::new().to_string().starts_with("acct_"));
        assert!(CredentialId::new().to_string().starts_with("cred_"));
    }

    #[test]
    fn version_prefix_is_not_a_workflow_prefix() {
        let display = WorkflowVersionId::new().to_string();
        assert!(display.starts_with("wfv_"));
        assert!(display.parse::<WorkflowId>().is_err());
        assert!(display.parse::<WorkflowVersionId>().is_ok());
    }

    #[test]
    fn parses_prefixed_and_bare_forms() {
        let id = WorkflowRunId::new();
        assert_eq!(id.to_string().parse::<WorkflowRunId>().unwrap(), id);
        assert_eq!(id.as_ulid().to_string().parse::<WorkflowRunId>().unwrap(), id);
    }

    #[test]
    fn parse_error_names_the_type() {
        let err = "run_nope".parse::<WorkflowRunId>().unwrap_err();
        assert_eq!(err.id_type, "WorkflowRunId");
    }

    #[test]
    fn serde_uses_bare_ulid() {
        let ulid = Ulid::new();
        let id = AccountId::from_ulid(ulid);
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(ulid.to_string()));
        assert_eq!(serde_json::from_value::<AccountId>(json).unwrap(), id);
    }

    #[test]
    fn ids_order_by_ulid() {
        let earlier = WorkflowRunId::from_ulid(Ulid::from_parts(1, 0));
        let later = WorkflowRunId::from_ulid(Ulid::from_parts(2, 0));
        assert!(earlier < later);
    }
}
