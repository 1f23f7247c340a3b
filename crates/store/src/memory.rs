//! In-process store.
//!
//! `MemoryDatabase` keeps each table as a vector of rows behind a lock. It is
//! configured with `kind: memory` and seeded from the configuration, and it
//! records every successful write so callers can inspect what a run did.
//!
//! Where-clauses are conjunctions of simple comparisons:
//!
//! ```text
//! release_year >= 2000 AND rating = 'PG' AND deleted = false
//! ```
//!
//! Supported operators are `=`, `!=`, `<>`, `<`, `<=`, `>` and `>=`; literals
//! are quoted strings, numbers, `true`, `false` and `null`.

use crate::{selects_all, Database, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use sync_core::{DatabaseConfig, Row, UniversalValue};

/// A write accepted by a [`MemoryDatabase`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    Insert {
        table: String,
        key_column: String,
        key_value: UniversalValue,
        row: Row,
    },
    Update {
        table: String,
        key_column: String,
        key_value: UniversalValue,
        column: String,
        value: UniversalValue,
    },
}

/// In-process [`Database`] implementation.
pub struct MemoryDatabase {
    config: DatabaseConfig,
    tables: RwLock<HashMap<String, Vec<Row>>>,
    read_only: RwLock<HashSet<String>>,
    writes: Mutex<Vec<WriteOperation>>,
}

impl MemoryDatabase {
    /// Create a database from its configuration, loading the seed rows.
    pub fn new(config: DatabaseConfig) -> Self {
        let tables = config
            .seed
            .iter()
            .map(|(table, rows)| (table.clone(), rows.clone()))
            .collect();
        Self {
            config,
            tables: RwLock::new(tables),
            read_only: RwLock::new(HashSet::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Create an empty database with the given registry name.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(DatabaseConfig::memory(name))
    }

    /// Replace the contents of a table.
    pub fn with_table(self, table: impl Into<String>, rows: Vec<Row>) -> Self {
        self.tables.write().insert(table.into(), rows);
        self
    }

    /// Current contents of a table.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Remove every row of a table without recording a write.
    pub fn truncate(&self, table: &str) {
        if let Some(rows) = self.tables.write().get_mut(table) {
            rows.clear();
        }
    }

    /// Every write accepted so far, in order.
    pub fn writes(&self) -> Vec<WriteOperation> {
        self.writes.lock().clone()
    }

    /// Reject (or accept again) writes to a table.
    pub fn set_read_only(&self, table: &str, read_only: bool) {
        let mut guard = self.read_only.write();
        if read_only {
            guard.insert(table.to_string());
        } else {
            guard.remove(table);
        }
    }

    fn check_writable(&self, table: &str) -> StoreResult<()> {
        if self.read_only.read().contains(table) {
            return Err(StoreError::write(table, "table is read-only"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Database for MemoryDatabase {
    async fn init(&self) -> StoreResult<()> {
        tracing::debug!("Memory database '{}' ready", self.config.name);
        Ok(())
    }

    async fn select(&self, table: &str, where_clause: &str) -> StoreResult<Vec<Row>> {
        let conditions = if selects_all(where_clause) {
            Vec::new()
        } else {
            parse_filter(where_clause).map_err(|message| StoreError::query(table, message))?
        };

        let tables = self.tables.read();
        let rows = tables.get(table).map(Vec::as_slice).unwrap_or_default();
        Ok(rows
            .iter()
            .filter(|row| conditions.iter().all(|c| c.matches(row)))
            .cloned()
            .collect())
    }

    async fn insert(
        &self,
        table: &str,
        key_column: &str,
        key_value: &UniversalValue,
        row: &Row,
    ) -> StoreResult<UniversalValue> {
        self.check_writable(table)?;

        let mut tables = self.tables.write();
        let rows = tables.entry(table.to_string()).or_default();

        let key = if key_value.is_null() {
            let max = rows
                .iter()
                .filter_map(|r| r.get(key_column).and_then(UniversalValue::as_i64))
                .max()
                .unwrap_or(0);
            UniversalValue::Int(max + 1)
        } else {
            let taken = rows.iter().any(|r| {
                r.get(key_column)
                    .is_some_and(|existing| existing.equals(key_value).unwrap_or(false))
            });
            if taken {
                return Err(StoreError::write(
                    table,
                    format!("duplicate key {key_column} = {key_value}"),
                ));
            }
            key_value.clone()
        };

        let mut stored = row.clone();
        stored.insert(key_column.to_string(), key.clone());
        rows.push(stored);

        self.writes.lock().push(WriteOperation::Insert {
            table: table.to_string(),
            key_column: key_column.to_string(),
            key_value: key_value.clone(),
            row: row.clone(),
        });
        Ok(key)
    }

    async fn update(
        &self,
        table: &str,
        key_column: &str,
        key_value: &UniversalValue,
        column: &str,
        value: &UniversalValue,
    ) -> StoreResult<u64> {
        self.check_writable(table)?;

        let mut tables = self.tables.write();
        let mut matched = 0;
        if let Some(rows) = tables.get_mut(table) {
            for row in rows.iter_mut() {
                let is_target = row
                    .get(key_column)
                    .is_some_and(|existing| existing.equals(key_value).unwrap_or(false));
                if is_target {
                    row.insert(column.to_string(), value.clone());
                    matched += 1;
                }
            }
        }

        self.writes.lock().push(WriteOperation::Update {
            table: table.to_string(),
            key_column: key_column.to_string(),
            key_value: key_value.clone(),
            column: column.to_string(),
            value: value.clone(),
        });
        Ok(matched)
    }

    fn describe(&self) -> &DatabaseConfig {
        &self.config
    }
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
struct Condition {
    column: String,
    op: CompareOp,
    literal: UniversalValue,
}

impl Condition {
    fn matches(&self, row: &Row) -> bool {
        let value = row.get(&self.column).unwrap_or(&UniversalValue::Null);
        match self.op {
            CompareOp::Eq => value.equals(&self.literal).unwrap_or(false),
            CompareOp::Ne => !value.equals(&self.literal).unwrap_or(false),
            CompareOp::Lt => compare(value, &self.literal) == Some(Ordering::Less),
            CompareOp::Le => matches!(
                compare(value, &self.literal),
                Some(Ordering::Less | Ordering::Equal)
            ),
            CompareOp::Gt => compare(value, &self.literal) == Some(Ordering::Greater),
            CompareOp::Ge => matches!(
                compare(value, &self.literal),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

fn compare(left: &UniversalValue, right: &UniversalValue) -> Option<Ordering> {
    use UniversalValue as V;

    match (left, right) {
        (V::Int(_) | V::Float(_), V::Int(_) | V::Float(_)) => {
            left.as_f64()?.partial_cmp(&right.as_f64()?)
        }
        (V::String(a), V::String(b)) => Some(a.cmp(b)),
        (V::Bool(a), V::Bool(b)) => Some(a.cmp(b)),
        (V::Timestamp(a), V::Timestamp(b)) => Some(a.cmp(b)),
        (V::Timestamp(a), V::String(s)) => Some(a.cmp(&parse_timestamp(s)?)),
        (V::String(s), V::Timestamp(b)) => Some(parse_timestamp(s)?.cmp(b)),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn parse_filter(clause: &str) -> Result<Vec<Condition>, String> {
    let mut parser = FilterParser {
        input: clause,
        pos: 0,
    };
    let mut conditions = Vec::new();

    loop {
        let column = parser
            .ident()
            .ok_or_else(|| format!("expected a column name at offset {}", parser.pos))?;
        let op = parser
            .op()
            .ok_or_else(|| format!("expected a comparison operator after '{column}'"))?;
        let literal = parser.literal()?;
        conditions.push(Condition {
            column: column.to_string(),
            op,
            literal,
        });

        if parser.is_done() {
            return Ok(conditions);
        }
        if !parser.and() {
            return Err(format!("expected AND at offset {}", parser.pos));
        }
    }
}

struct FilterParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> FilterParser<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn is_done(&mut self) -> bool {
        self.skip_ws();
        self.pos >= self.input.len()
    }

    fn ident(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(rest.len());
        if len == 0 {
            return None;
        }
        self.pos += len;
        Some(&rest[..len])
    }

    fn op(&mut self) -> Option<CompareOp> {
        const OPERATORS: [(&str, CompareOp); 7] = [
            ("<=", CompareOp::Le),
            (">=", CompareOp::Ge),
            ("!=", CompareOp::Ne),
            ("<>", CompareOp::Ne),
            ("=", CompareOp::Eq),
            ("<", CompareOp::Lt),
            (">", CompareOp::Gt),
        ];

        self.skip_ws();
        let rest = self.rest();
        let (token, op) = OPERATORS.iter().find(|(t, _)| rest.starts_with(t))?;
        self.pos += token.len();
        Some(*op)
    }

    fn literal(&mut self) -> Result<UniversalValue, String> {
        self.skip_ws();
        let rest = self.rest();

        if let Some(quote) = rest.chars().next().filter(|c| *c == '\'' || *c == '"') {
            let body = &rest[1..];
            let end = body
                .find(quote)
                .ok_or_else(|| "unterminated string literal".to_string())?;
            self.pos += end + 2;
            return Ok(UniversalValue::String(body[..end].to_string()));
        }

        let len = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let word = &rest[..len];
        if word.is_empty() {
            return Err("expected a literal".to_string());
        }
        self.pos += len;

        match word.to_ascii_lowercase().as_str() {
            "null" => return Ok(UniversalValue::Null),
            "true" => return Ok(UniversalValue::Bool(true)),
            "false" => return Ok(UniversalValue::Bool(false)),
            _ => {}
        }
        if let Ok(i) = word.parse::<i64>() {
            return Ok(UniversalValue::Int(i));
        }
        if let Ok(f) = word.parse::<f64>() {
            return Ok(UniversalValue::Float(f));
        }
        Err(format!("invalid literal '{word}'"))
    }

    fn and(&mut self) -> bool {
        self.skip_ws();
        let rest = self.rest();
        let is_and = rest.get(..3).is_some_and(|w| w.eq_ignore_ascii_case("and"))
            && rest[3..].starts_with(char::is_whitespace);
        if is_and {
            self.pos += 3;
        }
        is_and
    }
}
