//! `Database` implementation for MongoDB.

use crate::value::{bson_to_universal, document_to_row, key_to_bson, parse_filter, universal_to_bson};
use bson::oid::ObjectId;
use bson::{doc, Document};
use mongodb::options::ClientOptions;
use mongodb::Client as MongoClient;
use std::time::Duration;
use sync_core::{DatabaseConfig, Row, UniversalValue};
use sync_store::{selects_all, Database, StoreError, StoreResult};
use tokio::sync::OnceCell;

/// MongoDB database opened lazily by [`Database::init`].
pub struct MongoDatabase {
    config: DatabaseConfig,
    database: OnceCell<mongodb::Database>,
}

impl MongoDatabase {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            database: OnceCell::new(),
        }
    }

    fn collection(&self, table: &str) -> StoreResult<mongodb::Collection<Document>> {
        self.database
            .get()
            .map(|db| db.collection::<Document>(table))
            .ok_or_else(|| StoreError::NotInitialized(self.config.name.clone()))
    }

    fn connection_error(&self, message: impl ToString) -> StoreError {
        StoreError::Connection {
            database: self.config.name.clone(),
            message: message.to_string(),
        }
    }

    async fn connect(&self) -> StoreResult<mongodb::Database> {
        let uri = self
            .config
            .uri
            .as_deref()
            .ok_or_else(|| self.connection_error("missing uri"))?;
        let database_name = self
            .config
            .database
            .as_deref()
            .ok_or_else(|| self.connection_error("missing database name"))?;

        tracing::debug!("Parsing MongoDB connection options for '{}'", self.config.name);
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| self.connection_error(e))?;
        // Add connection timeout to prevent hanging
        options.connect_timeout = Some(Duration::from_secs(10));
        options.server_selection_timeout = Some(Duration::from_secs(10));

        let client = MongoClient::with_options(options).map_err(|e| self.connection_error(e))?;
        let database = client.database(database_name);
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| self.connection_error(e))?;

        tracing::info!(
            "Connected to MongoDB database '{}' ({database_name})",
            self.config.name
        );
        Ok(database)
    }
}

/// Build the document to insert and the key it will be stored under.
///
/// `None` means the server assigns `_id`.
fn insert_document(
    key_column: &str,
    key_value: &UniversalValue,
    row: &Row,
) -> (Document, Option<UniversalValue>) {
    let mut document = Document::new();
    let mut columns: Vec<_> = row
        .iter()
        .filter(|(column, _)| column.as_str() != key_column)
        .collect();
    columns.sort_by(|a, b| a.0.cmp(b.0));
    for (column, value) in columns {
        document.insert(column.clone(), universal_to_bson(value));
    }

    let key = match key_value {
        UniversalValue::Null if key_column == "_id" => None,
        UniversalValue::Null => Some(UniversalValue::String(ObjectId::new().to_hex())),
        other => Some(other.clone()),
    };
    if let Some(key) = &key {
        document.insert(key_column, key_to_bson(key_column, key));
    }
    (document, key)
}

#[async_trait::async_trait]
impl Database for MongoDatabase {
    async fn init(&self) -> StoreResult<()> {
        self.database.get_or_try_init(|| self.connect()).await?;
        Ok(())
    }

    async fn select(&self, table: &str, where_clause: &str) -> StoreResult<Vec<Row>> {
        let collection = self.collection(table)?;
        let filter = if selects_all(where_clause) {
            Document::new()
        } else {
            parse_filter(table, where_clause)?
        };
        tracing::debug!("Selecting from collection {table} with filter {filter}");

        let mut cursor = collection
            .find(filter)
            .await
            .map_err(|e| StoreError::query(table, e))?;
        let mut rows = Vec::new();
        while cursor
            .advance()
            .await
            .map_err(|e| StoreError::query(table, e))?
        {
            let document: Document = cursor
                .current()
                .try_into()
                .map_err(|e| StoreError::query(table, e))?;
            rows.push(document_to_row(document));
        }
        Ok(rows)
    }

    async fn insert(
        &self,
        table: &str,
        key_column: &str,
        key_value: &UniversalValue,
        row: &Row,
    ) -> StoreResult<UniversalValue> {
        let collection = self.collection(table)?;
        let (document, key) = insert_document(key_column, key_value, row);

        let result = collection
            .insert_one(document)
            .await
            .map_err(|e| StoreError::write(table, e))?;
        Ok(key.unwrap_or_else(|| bson_to_universal(result.inserted_id)))
    }

    async fn update(
        &self,
        table: &str,
        key_column: &str,
        key_value: &UniversalValue,
        column: &str,
        value: &UniversalValue,
    ) -> StoreResult<u64> {
        let collection = self.collection(table)?;
        let mut set = Document::new();
        set.insert(column, universal_to_bson(value));
        let mut filter = Document::new();
        filter.insert(key_column, key_to_bson(key_column, key_value));

        let result = collection
            .update_one(filter, doc! { "$set": set })
            .await
            .map_err(|e| StoreError::write(table, e))?;
        Ok(result.matched_count)
    }

    fn describe(&self) -> &DatabaseConfig {
        &self.config
    }
}
