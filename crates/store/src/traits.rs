//! Database trait definition.
//!
//! This trait abstracts over store-specific drivers, allowing the engine to
//! be compiled against a single interface that works with document and
//! relational stores alike.

use crate::StoreResult;
use sync_core::{DatabaseConfig, Row, UniversalValue};

/// Capability contract for a configured database.
///
/// Implementations own their connection (or pool) and must be safe to call
/// concurrently: the engine issues `select`, `insert` and `update` calls for
/// independent mappings at the same time.
///
/// # Usage Pattern
///
/// The engine only holds `Arc<dyn Database>` handles obtained from the
/// [`DatabaseRegistry`](crate::DatabaseRegistry):
///
/// ```ignore
/// let db = registry.get("films_pg").expect("configured");
/// db.init().await?;
/// let rows = db.select("film", "-").await?;
/// ```
#[async_trait::async_trait]
pub trait Database: Send + Sync {
    /// Open the connection. Calling `init` again on an initialized database
    /// is a no-op.
    async fn init(&self) -> StoreResult<()>;

    /// Select rows from a table.
    ///
    /// The where-clause is passed through in the store's own filter syntax.
    /// An empty clause or `"-"` selects the full table (see [`selects_all`]).
    async fn select(&self, table: &str, where_clause: &str) -> StoreResult<Vec<Row>>;

    /// Insert a row and return its key.
    ///
    /// When `key_value` is null the store generates the key; otherwise the
    /// row is stored under `key_value` in `key_column`.
    async fn insert(
        &self,
        table: &str,
        key_column: &str,
        key_value: &UniversalValue,
        row: &Row,
    ) -> StoreResult<UniversalValue>;

    /// Set one column of the row identified by `key_column = key_value`.
    ///
    /// Returns the number of rows matched.
    async fn update(
        &self,
        table: &str,
        key_column: &str,
        key_value: &UniversalValue,
        column: &str,
        value: &UniversalValue,
    ) -> StoreResult<u64>;

    /// Configuration this database was created from.
    fn describe(&self) -> &DatabaseConfig;
}

/// Whether a where-clause selects the full table.
pub fn selects_all(where_clause: &str) -> bool {
    let clause = where_clause.trim();
    clause.is_empty() || clause == "-"
}
