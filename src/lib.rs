//! jiradw - Incremental Jira Data Center to reporting-warehouse sync
//!
//! jiradw pulls issues, links, and changelog histories out of a Jira Data
//! Center instance and maintains them in a local SQLite reporting warehouse.
//! Runs are incremental and resumable: every fetched page commits atomically
//! with the cursor that records it, so a crash or an interrupt never loses
//! committed work and re-running never duplicates it.
//!
//! # Architecture
//!
//! - **config**: YAML configuration (instance, scopes, windows, retry)
//! - **jira**: HTTP transport, wire types, and the search provider seam
//! - **transform**: raw issue JSON into warehouse row-sets (pure, no I/O)
//! - **store**: cursors, run records, and the SQLite warehouse
//! - **sync**: window resolution, lazy page walking, atomic page loads,
//!   and per-scope orchestration

// Core modules
pub mod config;
pub mod error;
pub mod logging;
pub mod retry;

// Pipeline
pub mod jira;
pub mod store;
pub mod sync;
pub mod transform;

// Re-exports
pub use error::{EtlError, Result};
