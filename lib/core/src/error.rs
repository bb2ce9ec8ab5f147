//! Error handling foundation for weft.
//!
//! This module provides only the `Result` type alias using rootcause.
//! Library crates define their own error enums; binaries wrap them in a
//! `Report` as errors propagate up to the process boundary.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
