//! unify-sync library
//!
//! Reconciles records between document and relational stores according to
//! declarative mapping strings, reporting or applying the inserts and
//! updates that bring a target dataset into agreement with a source.
//!
//! # Overview
//!
//! - [`lang`]: parser for mapping strings such as
//!   `MAP films.title TO movies.Title MATCH BY IDS(films.film_id, movies.ext_id) DO INSERT, UPDATE`
//! - [`topology`]: per-run cache of tables and records, one table per
//!   `database.table` id
//! - [`mapping`]: binds parsed links to resolved nodes
//! - [`pairing`]: correlates active source and target records
//! - [`executor`]: classifies every pair as idle, insert or update and
//!   applies the write unless simulating
//! - [`report`]: per-link report of every classified pair
//! - [`sync`]: one run of a job, from configuration to report
//! - [`app`] / [`server`]: control plane for one-off and ongoing runs
//!
//! Store access goes through the `sync_store::Database` trait; adapters for
//! MongoDB and PostgreSQL live in their own crates.
//!
//! # CLI Usage
//!
//! ```bash
//! # Simulate a job and print the report
//! unify-sync --config-dir config run films --simulation true
//!
//! # Check every job without connecting to any store
//! unify-sync --config-dir config check
//!
//! # Serve the HTTP/WebSocket control plane
//! unify-sync --config-dir config serve --listen 127.0.0.1:8080
//! ```

pub mod app;
pub mod config;
pub mod connect;
pub mod error;
pub mod executor;
pub mod lang;
pub mod mapping;
pub mod pairing;
pub mod report;
pub mod server;
pub mod sync;
pub mod topology;

pub use app::{AppError, Application, JobSummary, RunMode, RunResponse};
pub use config::AppConfig;
pub use error::{ConfigurationError, SyncError, SyncResult, TopologyError};
pub use executor::ActionType;
pub use lang::{parse_mapping, ParseError, ParsedMapping};
pub use report::{ActionRecord, LinkReport, Report, RunStatus};
pub use sync::{check_job, run_job, RunResult, SyncRun};
