//! In-memory credit ledger.
//!
//! Balances live behind a single lock so the balance check and the debit
//! for one charge can never interleave with another charge.

use crate::error::MeteringError;
use crate::gate::{Charge, MeteringGate};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use weft_core::AccountId;

/// Unit prices per operation key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTable {
    /// Price for operations without an explicit entry.
    #[serde(default)]
    pub default_price: u64,
    /// Explicit unit prices.
    #[serde(default)]
    pub prices: HashMap<String, u64>,
}

impl PriceTable {
    /// Creates a table where every operation costs `default_price`.
    #[must_use]
    pub fn flat(default_price: u64) -> Self {
        Self {
            default_price,
            prices: HashMap::new(),
        }
    }

    /// Sets the unit price of one operation.
    #[must_use]
    pub fn with_price(mut self, operation_key: impl Into<String>, price: u64) -> Self {
        self.prices.insert(operation_key.into(), price);
        self
    }

    /// Returns the unit price of an operation.
    #[must_use]
    pub fn unit_price(&self, operation_key: &str) -> u64 {
        self.prices
            .get(operation_key)
            .copied()
            .unwrap_or(self.default_price)
    }

    /// Returns the cost of `quantity` units, or `None` on overflow.
    #[must_use]
    pub fn cost(&self, operation_key: &str, quantity: u64) -> Option<u64> {
        self.unit_price(operation_key).checked_mul(quantity)
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::flat(1)
    }
}

/// A metering gate holding balances in memory.
#[derive(Debug, Clone)]
pub struct InMemoryLedger {
    prices: PriceTable,
    /// Balance per account.
    balances: Arc<Mutex<HashMap<AccountId, u64>>>,
}

impl InMemoryLedger {
    /// Creates an empty ledger with the given prices.
    #[must_use]
    pub fn new(prices: PriceTable) -> Self {
        Self {
            prices,
            balances: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Credits an account, creating it if needed. Returns the new balance.
    pub async fn deposit(&self, account_id: AccountId, amount: u64) -> u64 {
        let mut balances = self.balances.lock().await;
        let balance = balances.entry(account_id).or_insert(0);
        *balance = balance.saturating_add(amount);
        *balance
    }

    /// Returns the balance of an account.
    pub async fn balance(&self, account_id: AccountId) -> Option<u64> {
        self.balances.lock().await.get(&account_id).copied()
    }
}

#[async_trait]
impl MeteringGate for InMemoryLedger {
    async fn charge_or_reject(
        &self,
        account_id: AccountId,
        operation_key: &str,
        quantity: u64,
    ) -> Result<Charge, MeteringError> {
        let cost = self
            .prices
            .cost(operation_key, quantity)
            .ok_or_else(|| MeteringError::QuantityOverflow {
                operation_key: operation_key.to_string(),
                quantity,
            })?;

        let mut balances = self.balances.lock().await;
        let balance = balances
            .get_mut(&account_id)
            .ok_or(MeteringError::UnknownAccount { account_id })?;

        if *balance < cost {
            tracing::debug!(
                account_id = %account_id,
                operation_key,
                cost,
                available = *balance,
                "Charge rejected"
            );
            return Err(MeteringError::InsufficientBalance {
                account_id,
                operation_key: operation_key.to_string(),
                required: cost,
                available: *balance,
            });
        }

        *balance -= cost;
        Ok(Charge {
            account_id,
            operation_key: operation_key.to_string(),
            quantity,
            cost,
            remaining: *balance,
            charged_at: Utc::now(),
        })
    }
}
