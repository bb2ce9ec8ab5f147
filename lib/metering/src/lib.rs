//! Credit metering for the weft workflow engine.
//!
//! The engine asks a `MeteringGate` to authorize cost before a run starts and
//! before each chargeable node. The gate owns the check-then-debit; balances
//! are never read and written in separate steps.
//!
//! - **Gate**: The `MeteringGate` trait and the `Charge` receipt
//! - **Ledger**: An in-memory gate with a per-operation price table

pub mod error;
pub mod gate;
pub mod ledger;

pub use error::MeteringError;
pub use gate::{Charge, MeteringGate};
pub use ledger::{InMemoryLedger, PriceTable};
