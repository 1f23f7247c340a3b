//! Topology cache.
//!
//! Every node of a job resolves to a [`Table`] identified by
//! `database.table`. Tables are created once per run no matter how many
//! nodes reference them, loaded with a full `select`, and hold the
//! [`Record`]s that mappings attach their backlinks to.

use crate::error::{ConfigurationError, SyncError, SyncResult, TopologyError};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use sync_core::{JobConfig, NodeConfig, Row, UniversalValue};
use sync_store::{Database, DatabaseRegistry, StoreResult};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Rows of one table keyed by [`UniversalValue::key_string`].
pub type TableSnapshot = BTreeMap<String, Row>;

/// Snapshots of every table of a run keyed by table id.
pub type TableSnapshots = BTreeMap<String, TableSnapshot>;

/// A row of a table, unique by key within it.
///
/// Column data is an immutable snapshot; only the mapping backlinks change
/// during a run.
#[derive(Debug)]
pub struct Record {
    key: UniversalValue,
    data: Row,
    active_in: Mutex<Vec<usize>>,
    paired_in: Mutex<Vec<usize>>,
}

impl Record {
    pub fn new(key: UniversalValue, data: Row) -> Self {
        Self {
            key,
            data,
            active_in: Mutex::new(Vec::new()),
            paired_in: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &UniversalValue {
        &self.key
    }

    pub fn data(&self) -> &Row {
        &self.data
    }

    /// Value of a column; missing columns read as null.
    pub fn get(&self, column: &str) -> &UniversalValue {
        self.data.get(column).unwrap_or(&UniversalValue::Null)
    }

    /// Mark the record active in a mapping. Returns `false` if it already was.
    pub fn mark_active(&self, mapping: usize) -> bool {
        let mut active_in = self.active_in.lock();
        if active_in.contains(&mapping) {
            return false;
        }
        active_in.push(mapping);
        true
    }

    pub fn mark_paired(&self, mapping: usize) {
        let mut paired_in = self.paired_in.lock();
        if !paired_in.contains(&mapping) {
            paired_in.push(mapping);
        }
    }

    pub fn active_in(&self) -> Vec<usize> {
        self.active_in.lock().clone()
    }

    pub fn paired_in(&self) -> Vec<usize> {
        self.paired_in.lock().clone()
    }
}

/// Counts of differences between a table and its previous snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.modified == 0
    }
}

/// A loaded table.
pub struct Table {
    id: String,
    name: String,
    key_column: String,
    database: Arc<dyn Database>,
    records: RwLock<BTreeMap<String, Arc<Record>>>,
    old_records: Option<TableSnapshot>,
}

impl Table {
    pub fn new(node: &NodeConfig, database: Arc<dyn Database>) -> Self {
        Self {
            id: node.table_id(),
            name: node.table.clone(),
            key_column: node.key.clone(),
            database,
            records: RwLock::new(BTreeMap::new()),
            old_records: None,
        }
    }

    /// Attach the snapshot of the previous run.
    pub fn with_old_records(mut self, old_records: Option<TableSnapshot>) -> Self {
        self.old_records = old_records;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    /// Resolve a selected row to its record, registering it if new.
    ///
    /// Returns `None` for rows without a key.
    pub fn resolve(&self, row: Row) -> Option<Arc<Record>> {
        let key = match row.get(&self.key_column) {
            Some(key) if !key.is_null() => key.clone(),
            _ => {
                warn!(
                    "Skipping row of table '{}' without key column '{}'",
                    self.id, self.key_column
                );
                return None;
            }
        };

        let mut records = self.records.write();
        let record = records
            .entry(key.key_string())
            .or_insert_with(|| Arc::new(Record::new(key, row)));
        Some(Arc::clone(record))
    }

    /// Register a row written during this run, replacing any cached record
    /// with the same key.
    pub fn register(&self, key: UniversalValue, row: Row) -> Arc<Record> {
        let record = Arc::new(Record::new(key.clone(), row));
        self.records
            .write()
            .insert(key.key_string(), Arc::clone(&record));
        record
    }

    pub fn record(&self, key: &UniversalValue) -> Option<Arc<Record>> {
        self.records.read().get(&key.key_string()).cloned()
    }

    /// All records ordered by key.
    pub fn records(&self) -> Vec<Arc<Record>> {
        self.records.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Populate the table with a full select.
    pub async fn load(&self) -> StoreResult<usize> {
        let rows = self.database.select(&self.name, "").await?;
        let selected = rows.len();
        for row in rows {
            self.resolve(row);
        }
        debug!("Loaded {selected} rows into table '{}'", self.id);
        Ok(selected)
    }

    /// Current column data keyed by record key.
    pub fn snapshot(&self) -> TableSnapshot {
        self.records
            .read()
            .iter()
            .map(|(key, record)| (key.clone(), record.data().clone()))
            .collect()
    }

    /// Snapshot carried over from the previous run of an ongoing job.
    pub fn old_records(&self) -> Option<&TableSnapshot> {
        self.old_records.as_ref()
    }

    /// Compare the current records with the previous snapshot.
    pub fn diff(&self) -> Option<SnapshotDiff> {
        let old = self.old_records.as_ref()?;
        let records = self.records.read();

        let mut diff = SnapshotDiff::default();
        for (key, record) in records.iter() {
            match old.get(key) {
                None => diff.added += 1,
                Some(old_row) if !rows_equal(old_row, record.data()) => diff.modified += 1,
                Some(_) => {}
            }
        }
        diff.removed = old.keys().filter(|key| !records.contains_key(*key)).count();
        Some(diff)
    }
}

fn rows_equal(a: &Row, b: &Row) -> bool {
    let columns: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    columns.into_iter().all(|column| {
        let left = a.get(column).unwrap_or(&UniversalValue::Null);
        let right = b.get(column).unwrap_or(&UniversalValue::Null);
        left.equals(right).unwrap_or(false)
    })
}

/// A resolved node.
pub struct Node {
    pub name: String,
    pub key_column: String,
    pub table: Arc<Table>,
}

/// Tables and nodes of one run.
#[derive(Default)]
pub struct Topology {
    tables: BTreeMap<String, Arc<Table>>,
    nodes: BTreeMap<String, Arc<Node>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the table for a node, creating it on first use.
    ///
    /// Returns the table and whether it was created by this call.
    pub fn get_or_create(
        &mut self,
        node: &NodeConfig,
        database: &Arc<dyn Database>,
    ) -> Result<(Arc<Table>, bool), ConfigurationError> {
        let id = node.table_id();
        if let Some(table) = self.tables.get(&id) {
            if table.key_column() != node.key {
                return Err(ConfigurationError::ConflictingKey {
                    table_id: id,
                    first: table.key_column().to_string(),
                    second: node.key.clone(),
                });
            }
            return Ok((Arc::clone(table), false));
        }

        let table = Arc::new(Table::new(node, Arc::clone(database)));
        self.tables.insert(id, Arc::clone(&table));
        Ok((table, true))
    }

    /// Bind a node to its materialized table.
    pub fn resolve_node(&mut self, node: &NodeConfig) -> Result<Arc<Node>, TopologyError> {
        let table_id = node.table_id();
        let table = self.tables.get(&table_id).ok_or_else(|| TopologyError {
            node: node.name.clone(),
            table_id: table_id.clone(),
        })?;

        let resolved = Arc::new(Node {
            name: node.name.clone(),
            key_column: node.key.clone(),
            table: Arc::clone(table),
        });
        self.nodes.insert(node.name.clone(), Arc::clone(&resolved));
        Ok(resolved)
    }

    pub fn table(&self, id: &str) -> Option<&Arc<Table>> {
        self.tables.get(id)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<Table>> {
        self.tables.values()
    }

    pub fn node(&self, name: &str) -> Option<&Arc<Node>> {
        self.nodes.get(name)
    }

    pub fn snapshots(&self) -> TableSnapshots {
        self.tables
            .iter()
            .map(|(id, table)| (id.clone(), table.snapshot()))
            .collect()
    }

    /// Build and load the topology of a job.
    ///
    /// Every referenced database must be registered; this is checked before
    /// any connection is opened. Databases are initialized and distinct
    /// tables loaded concurrently.
    pub async fn build(
        job: &JobConfig,
        registry: &DatabaseRegistry,
        mut previous: Option<TableSnapshots>,
    ) -> SyncResult<Self> {
        let databases = resolve_databases(job, registry)?;

        let mut topology = Topology::new();
        for node in &job.nodes {
            let database = &databases[node.database.as_str()];
            let id = node.table_id();
            if !topology.tables.contains_key(&id) {
                let old = previous.as_mut().and_then(|p| p.remove(&id));
                let table = Table::new(node, Arc::clone(database)).with_old_records(old);
                topology.tables.insert(id, Arc::new(table));
            }
            topology.get_or_create(node, database)?;
        }

        let mut inits = JoinSet::new();
        for (name, database) in databases {
            let name = name.to_string();
            inits.spawn(async move { database.init().await.map(|_| name) });
        }
        while let Some(joined) = inits.join_next().await {
            let name = joined??;
            debug!("Database '{name}' initialized");
        }

        let mut loads = JoinSet::new();
        for table in topology.tables.values() {
            let table = Arc::clone(table);
            loads.spawn(async move {
                let count = table.load().await?;
                StoreResult::Ok((table, count))
            });
        }
        while let Some(joined) = loads.join_next().await {
            let (table, count) = joined??;
            info!("Table '{}' loaded with {count} records", table.id());
            if let Some(diff) = table.diff() {
                info!(
                    "Table '{}' changed since previous run: {} added, {} removed, {} modified",
                    table.id(),
                    diff.added,
                    diff.removed,
                    diff.modified
                );
            }
        }

        for node in &job.nodes {
            topology.resolve_node(node)?;
        }
        Ok(topology)
    }
}

/// Look up every database a job references.
pub fn resolve_databases<'a>(
    job: &'a JobConfig,
    registry: &DatabaseRegistry,
) -> Result<BTreeMap<&'a str, Arc<dyn Database>>, SyncError> {
    let mut seen_nodes = BTreeSet::new();
    let mut databases = BTreeMap::new();
    for node in &job.nodes {
        if !seen_nodes.insert(node.name.as_str()) {
            return Err(ConfigurationError::DuplicateNode {
                job: job.name.clone(),
                node: node.name.clone(),
            }
            .into());
        }
        let database = registry.get(&node.database).ok_or_else(|| {
            ConfigurationError::UnknownDatabase {
                job: job.name.clone(),
                database: node.database.clone(),
            }
        })?;
        databases.insert(node.database.as_str(), database);
    }
    Ok(databases)
}
