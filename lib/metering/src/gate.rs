//! The metering gate contract.

use crate::error::MeteringError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use weft_core::AccountId;

/// Receipt for an authorized charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    /// Account that was debited.
    pub account_id: AccountId,
    /// Operation the charge was for.
    pub operation_key: String,
    /// Units of the operation.
    pub quantity: u64,
    /// Credits debited.
    pub cost: u64,
    /// Balance left after the debit.
    pub remaining: u64,
    /// When the debit happened.
    pub charged_at: DateTime<Utc>,
}

/// Authorizes and records cost against an account balance.
///
/// Implementations must perform the balance check and the debit as one
/// atomic step so that concurrent runs cannot overspend.
#[async_trait]
pub trait MeteringGate: Send + Sync {
    /// Debits the cost of `quantity` units of `operation_key`, or rejects.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientBalance` when the balance cannot cover the cost;
    /// nothing is debited in that case.
    async fn charge_or_reject(
        &self,
        account_id: AccountId,
        operation_key: &str,
        quantity: u64,
    ) -> Result<Charge, MeteringError>;
}
