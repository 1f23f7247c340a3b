//! Database capability abstraction.
//!
//! This crate defines the `Database` trait the synchronization engine uses to
//! talk to any backing store. The engine never branches on the kind of store;
//! adapters for MongoDB (`sync-store-mongodb`) and PostgreSQL
//! (`sync-store-postgresql`) implement the trait, and so does the in-process
//! [`MemoryDatabase`] shipped here.
//!
//! Live connections are owned by a [`DatabaseRegistry`] keyed by the
//! configured database name and shared by every run that references them.

mod error;
mod memory;
mod registry;
mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryDatabase, WriteOperation};
pub use registry::DatabaseRegistry;
pub use traits::{selects_all, Database};
