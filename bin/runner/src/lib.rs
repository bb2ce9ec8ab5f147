//! Runner process for weft workflows.
//!
//! Loads a workflow snapshot and its trigger input from files, executes it on
//! a `weft_workflow::Engine`, and persists run state to Postgres when a
//! database is configured.

pub mod config;
pub mod db;
pub mod error;
pub mod files;
pub mod runner;
