//! PostgreSQL store adapter
//!
//! Implements the `sync_store::Database` contract on top of `tokio-postgres`.
//! Where-clauses are raw SQL appended after `WHERE`; values are converted
//! to and from `UniversalValue` by column type.

mod client;
mod database;
mod value;

pub use client::new_postgresql_client;
pub use database::PostgresDatabase;
pub use value::{convert_postgres_value, quote_ident, to_sql_param, SqlParam};
