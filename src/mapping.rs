//! Mapping builder.
//!
//! Mapping strings are parsed concurrently, then every link becomes one
//! [`Mapping`] bound to the resolved nodes of the run. Links are first
//! planned against the job configuration alone, so configuration mistakes
//! surface before any table is loaded.

use crate::error::{ConfigurationError, SyncError, SyncResult, TopologyError};
use crate::lang::{parse_mapping, ColumnRef, Operation, ParsedMapping};
use crate::topology::{Node, Record, Topology};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use sync_core::{JobConfig, UniversalValue};
use tokio::sync::OnceCell;
use tokio::task::JoinSet;

/// A source column compared with a target column when correlating records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPair {
    pub source_column: String,
    pub target_column: String,
}

/// A link checked against the job configuration but not yet bound to
/// loaded tables.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkPlan {
    /// Position of the mapping string the link was written in.
    pub mapping_index: usize,
    pub link_id: String,
    pub cmd: String,
    pub source_node: String,
    pub target_node: String,
    pub source_column: String,
    pub target_column: String,
    pub match_rule: Vec<ColumnPair>,
    /// Link columns of every link of the same mapping string between the
    /// same two nodes, this one included.
    pub row_columns: Vec<ColumnPair>,
    pub operations: BTreeSet<Operation>,
    pub source_where: String,
    pub target_where: String,
}

/// Result of inserting a row for one source record.
pub type InsertResult = Result<Arc<Record>, String>;

/// Inserts shared by sibling links.
///
/// Links of one mapping string between the same two nodes write a single
/// row per incomplete source record. The first link to reach a record
/// inserts it; the others wait for and attach to the same result.
#[derive(Default)]
pub struct SharedInserts {
    slots: Mutex<HashMap<String, Arc<OnceCell<InsertResult>>>>,
}

impl SharedInserts {
    pub fn slot(&self, source_key: &UniversalValue) -> Arc<OnceCell<InsertResult>> {
        let mut slots = self.slots.lock();
        Arc::clone(
            slots
                .entry(source_key.key_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }
}

/// One link of a job, bound to its nodes for the current run.
pub struct Mapping {
    /// Position among all mappings of the run, used for record backlinks.
    pub index: usize,
    pub link_id: String,
    pub cmd: String,
    pub source: Arc<Node>,
    pub target: Arc<Node>,
    pub source_column: String,
    pub target_column: String,
    pub match_rule: Vec<ColumnPair>,
    pub row_columns: Vec<ColumnPair>,
    pub inserts: Arc<SharedInserts>,
    pub operations: BTreeSet<Operation>,
    pub source_where: String,
    pub target_where: String,
    pub simulation: bool,
}

impl Mapping {
    pub fn allows(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }

    fn bind(
        index: usize,
        plan: LinkPlan,
        inserts: Arc<SharedInserts>,
        job: &JobConfig,
        topology: &Topology,
        simulation: bool,
    ) -> Result<Self, TopologyError> {
        let resolve = |name: &str| {
            topology.node(name).cloned().ok_or_else(|| TopologyError {
                node: name.to_string(),
                table_id: job.node(name).map(|n| n.table_id()).unwrap_or_default(),
            })
        };

        Ok(Self {
            index,
            source: resolve(&plan.source_node)?,
            target: resolve(&plan.target_node)?,
            link_id: plan.link_id,
            cmd: plan.cmd,
            source_column: plan.source_column,
            target_column: plan.target_column,
            match_rule: plan.match_rule,
            row_columns: plan.row_columns,
            inserts,
            operations: plan.operations,
            source_where: plan.source_where,
            target_where: plan.target_where,
            simulation,
        })
    }
}

/// Parse every mapping string of a job, one task each.
///
/// The first parse error aborts the remaining tasks.
pub async fn parse_mappings(raw: &[String]) -> SyncResult<Vec<ParsedMapping>> {
    let mut tasks = JoinSet::new();
    for (index, mapping) in raw.iter().enumerate() {
        let mapping = mapping.clone();
        tasks.spawn(async move { (index, parse_mapping(&mapping)) });
    }

    let mut parsed: Vec<Option<ParsedMapping>> = vec![None; raw.len()];
    while let Some(joined) = tasks.join_next().await {
        let (index, result) = joined?;
        match result {
            Ok(mapping) => parsed[index] = Some(mapping),
            Err(source) => {
                tasks.abort_all();
                return Err(SyncError::Parse { index, source });
            }
        }
    }
    Ok(parsed.into_iter().flatten().collect())
}

/// Check parsed mappings against the job's nodes.
pub fn plan_links(
    job: &JobConfig,
    raw: &[String],
    parsed: &[ParsedMapping],
) -> Result<Vec<LinkPlan>, ConfigurationError> {
    let mut plans = Vec::new();

    for (mapping_index, mapping) in parsed.iter().enumerate() {
        let known = |column: &ColumnRef| {
            if job.node(&column.node).is_some() {
                Ok(())
            } else {
                Err(ConfigurationError::UnknownNode {
                    job: job.name.clone(),
                    mapping: mapping_index,
                    node: column.node.clone(),
                })
            }
        };
        for condition in &mapping.match_rule {
            known(&condition.left)?;
            known(&condition.right)?;
        }

        for (link_index, link) in mapping.links.iter().enumerate() {
            known(&link.source)?;
            known(&link.target)?;

            let link_id = format!("{mapping_index}.{link_index}");
            let match_rule: Vec<ColumnPair> = mapping
                .match_rule
                .iter()
                .filter_map(|condition| relate(&link.source.node, &link.target.node, &condition.left, &condition.right))
                .collect();
            if match_rule.is_empty() {
                return Err(ConfigurationError::UnrelatedLink {
                    job: job.name.clone(),
                    link_id,
                    source_node: link.source.node.clone(),
                    target_node: link.target.node.clone(),
                });
            }

            let row_columns = mapping
                .links
                .iter()
                .filter(|sibling| {
                    sibling.source.node == link.source.node
                        && sibling.target.node == link.target.node
                })
                .map(|sibling| ColumnPair {
                    source_column: sibling.source.column.clone(),
                    target_column: sibling.target.column.clone(),
                })
                .collect();

            plans.push(LinkPlan {
                mapping_index,
                link_id,
                cmd: raw.get(mapping_index).cloned().unwrap_or_default(),
                source_node: link.source.node.clone(),
                target_node: link.target.node.clone(),
                source_column: link.source.column.clone(),
                target_column: link.target.column.clone(),
                match_rule,
                row_columns,
                operations: mapping.operations.clone(),
                source_where: mapping.source_where.clone().unwrap_or_default(),
                target_where: mapping.target_where.clone().unwrap_or_default(),
            });
        }
    }

    Ok(plans)
}

/// Orient a match condition to a link's source and target nodes.
fn relate(source: &str, target: &str, left: &ColumnRef, right: &ColumnRef) -> Option<ColumnPair> {
    if left.node == source && right.node == target {
        Some(ColumnPair {
            source_column: left.column.clone(),
            target_column: right.column.clone(),
        })
    } else if right.node == source && left.node == target {
        Some(ColumnPair {
            source_column: right.column.clone(),
            target_column: left.column.clone(),
        })
    } else {
        None
    }
}

/// Bind planned links to the nodes of a loaded topology.
///
/// Sibling links share one [`SharedInserts`] for the run.
pub fn build_mappings(
    job: &JobConfig,
    plans: Vec<LinkPlan>,
    topology: &Topology,
    simulation: bool,
) -> SyncResult<Vec<Arc<Mapping>>> {
    let mut shared: BTreeMap<(usize, String, String), Arc<SharedInserts>> = BTreeMap::new();
    plans
        .into_iter()
        .enumerate()
        .map(|(index, plan)| {
            let inserts = Arc::clone(
                shared
                    .entry((
                        plan.mapping_index,
                        plan.source_node.clone(),
                        plan.target_node.clone(),
                    ))
                    .or_default(),
            );
            Mapping::bind(index, plan, inserts, job, topology, simulation)
                .map(Arc::new)
                .map_err(SyncError::from)
        })
        .collect()
}
