//! Error types for the metering crate.

use std::fmt;
use weft_core::AccountId;

/// Errors returned by a metering gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeteringError {
    /// The account cannot cover the cost of the operation.
    InsufficientBalance {
        account_id: AccountId,
        operation_key: String,
        required: u64,
        available: u64,
    },
    /// The account has no balance record.
    UnknownAccount { account_id: AccountId },
    /// Price times quantity does not fit in a balance.
    QuantityOverflow {
        operation_key: String,
        quantity: u64,
    },
    /// The backing ledger could not be reached.
    Unavailable { reason: String },
}

impl fmt::Display for MeteringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientBalance {
                account_id,
                operation_key,
                required,
                available,
            } => write!(
                f,
                "insufficient balance on {account_id} for '{operation_key}': requires {required}, available {available}"
            ),
            Self::UnknownAccount { account_id } => {
                write!(f, "unknown account: {account_id}")
            }
            Self::QuantityOverflow {
                operation_key,
                quantity,
            } => write!(f, "cost of {quantity} x '{operation_key}' overflows"),
            Self::Unavailable { reason } => write!(f, "metering unavailable: {reason}"),
        }
    }
}

impl std::error::Error for MeteringError {}
