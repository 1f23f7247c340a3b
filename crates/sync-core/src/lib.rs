//! Core types for the unify-sync framework.
//!
//! This crate provides the foundational types shared by the engine and by
//! every store adapter:
//!
//! - [`UniversalValue`] - Normalized representation of a single cell
//! - [`Row`] - A row as a column name to value map
//! - [`ComparisonError`] - Raised when two values cannot be compared
//! - [`JobConfig`] / [`DatabasesConfig`] - Configuration loaded from YAML
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── sync-store              (Database trait, registry, memory store)
//!    │       ├─── sync-store-mongodb     (BSON <-> UniversalValue)
//!    │       └─── sync-store-postgresql  (tokio-postgres <-> UniversalValue)
//!    │
//!    └─── unify-sync              (engine, control plane, CLI)
//! ```
//!
//! # Example
//!
//! ```rust
//! use sync_core::UniversalValue;
//!
//! // An integer from one store and a float from another compare equal.
//! let left = UniversalValue::Int(42);
//! let right = UniversalValue::Float(42.0);
//! assert!(left.equals(&right).unwrap());
//! ```

pub mod config;
pub mod values;

pub use config::{
    load_jobs_dir, ConfigError, DatabaseConfig, DatabaseKind, DatabasesConfig, JobConfig,
    NodeConfig,
};
pub use values::{ComparisonError, Row, UniversalValue, ValueKind};
