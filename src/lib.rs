//! docquery - validated document-database queries from structured intents.
//!
//! This library exposes the core modules for the binary and for integration tests.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod intent;
pub mod logging;
pub mod plan;
pub mod query;
pub mod safety;
pub mod validate;
