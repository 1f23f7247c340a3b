//! MongoDB store adapter for unify-sync
//!
//! Implements the `sync_store::Database` contract for MongoDB. Tables are
//! collections; where-clauses are JSON filter documents such as
//! `{"_id": {"$lt": 3}}`.

mod database;
mod value;

pub use database::MongoDatabase;
pub use value::{bson_to_universal, document_to_row, key_to_bson, parse_filter, universal_to_bson};
