//! Database construction from configuration.
//!
//! Connections are opened lazily by [`Database::init`]; building the
//! registry never touches the network.

use std::sync::Arc;
use sync_core::{DatabaseConfig, DatabaseKind, DatabasesConfig};
use sync_store::{Database, DatabaseRegistry, MemoryDatabase};
use sync_store_mongodb::MongoDatabase;
use sync_store_postgresql::PostgresDatabase;

/// Create the store adapter for a configured database.
pub fn open_database(config: &DatabaseConfig) -> Arc<dyn Database> {
    match config.kind {
        DatabaseKind::Mongo => Arc::new(MongoDatabase::new(config.clone())),
        DatabaseKind::Postgres => Arc::new(PostgresDatabase::new(config.clone())),
        DatabaseKind::Memory => Arc::new(MemoryDatabase::new(config.clone())),
    }
}

/// Build a registry holding one adapter per configured database.
pub fn build_registry(config: &DatabasesConfig) -> DatabaseRegistry {
    let mut registry = DatabaseRegistry::new();
    for database in &config.databases {
        tracing::debug!("Registering {} database '{}'", database.kind, database.name);
        registry.register(open_database(database));
    }
    registry
}
