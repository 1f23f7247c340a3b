//! `Database` implementation backed by a single `tokio-postgres` client.

use crate::client::new_postgresql_client;
use crate::value::{convert_postgres_value, convert_row, quote_ident, to_sql_param, SqlParam};
use sync_core::{DatabaseConfig, Row, UniversalValue};
use sync_store::{selects_all, Database, StoreError, StoreResult};
use tokio::sync::OnceCell;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;
use tracing::{debug, info};

/// PostgreSQL database opened lazily by [`Database::init`].
pub struct PostgresDatabase {
    config: DatabaseConfig,
    client: OnceCell<Client>,
}

impl PostgresDatabase {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    fn client(&self) -> StoreResult<&Client> {
        self.client
            .get()
            .ok_or_else(|| StoreError::NotInitialized(self.config.name.clone()))
    }
}

/// Quote a possibly schema-qualified table name.
fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

fn param_refs(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

/// Build the insert statement and the ordered columns it binds.
fn insert_statement(
    table: &str,
    key_column: &str,
    key_value: &UniversalValue,
    row: &Row,
) -> (String, Vec<(String, UniversalValue)>) {
    let mut columns: Vec<(String, UniversalValue)> = row
        .iter()
        .filter(|(column, _)| column.as_str() != key_column)
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect();
    if !key_value.is_null() {
        columns.push((key_column.to_string(), key_value.clone()));
    }
    columns.sort_by(|a, b| a.0.cmp(&b.0));

    let returning = quote_ident(key_column);
    let sql = if columns.is_empty() {
        format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {returning}",
            quote_table(table)
        )
    } else {
        let names = columns
            .iter()
            .map(|(column, _)| quote_ident(column))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({names}) VALUES ({placeholders}) RETURNING {returning}",
            quote_table(table)
        )
    };
    (sql, columns)
}

#[async_trait::async_trait]
impl Database for PostgresDatabase {
    async fn init(&self) -> StoreResult<()> {
        let uri = self.config.uri.as_deref().ok_or_else(|| StoreError::Connection {
            database: self.config.name.clone(),
            message: "missing uri".to_string(),
        })?;

        self.client
            .get_or_try_init(|| async {
                info!("Connecting to PostgreSQL database '{}'", self.config.name);
                new_postgresql_client(uri)
                    .await
                    .map_err(|e| StoreError::Connection {
                        database: self.config.name.clone(),
                        message: e.to_string(),
                    })
            })
            .await?;
        Ok(())
    }

    async fn select(&self, table: &str, where_clause: &str) -> StoreResult<Vec<Row>> {
        let client = self.client()?;

        let mut query = format!("SELECT * FROM {}", quote_table(table));
        if !selects_all(where_clause) {
            query.push_str(" WHERE ");
            query.push_str(where_clause.trim());
        }
        debug!("Selecting from {table} with: {query}");

        let rows = client
            .query(&query, &[])
            .await
            .map_err(|e| StoreError::query(table, e))?;
        rows.iter().map(convert_row).collect()
    }

    async fn insert(
        &self,
        table: &str,
        key_column: &str,
        key_value: &UniversalValue,
        row: &Row,
    ) -> StoreResult<UniversalValue> {
        let client = self.client()?;
        let (sql, columns) = insert_statement(table, key_column, key_value, row);

        let statement = client
            .prepare(&sql)
            .await
            .map_err(|e| StoreError::write(table, e))?;
        let params = columns
            .iter()
            .zip(statement.params())
            .map(|((column, value), ty)| to_sql_param(column, value, ty))
            .collect::<StoreResult<Vec<_>>>()?;

        let inserted = client
            .query_one(&statement, &param_refs(&params))
            .await
            .map_err(|e| StoreError::write(table, e))?;
        convert_postgres_value(&inserted, 0)
    }

    async fn update(
        &self,
        table: &str,
        key_column: &str,
        key_value: &UniversalValue,
        column: &str,
        value: &UniversalValue,
    ) -> StoreResult<u64> {
        let client = self.client()?;
        let sql = format!(
            "UPDATE {} SET {} = $1 WHERE {} = $2",
            quote_table(table),
            quote_ident(column),
            quote_ident(key_column)
        );

        let statement = client
            .prepare(&sql)
            .await
            .map_err(|e| StoreError::write(table, e))?;
        let types = statement.params();
        let params = vec![
            to_sql_param(column, value, &types[0])?,
            to_sql_param(key_column, key_value, &types[1])?,
        ];

        client
            .execute(&statement, &param_refs(&params))
            .await
            .map_err(|e| StoreError::write(table, e))
    }

    fn describe(&self) -> &DatabaseConfig {
        &self.config
    }
}
