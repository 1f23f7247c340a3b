//! Pairing engine.
//!
//! For each mapping the active source and target rows are selected, resolved
//! to cached records and correlated by the mapping's match rule. Every active
//! source record yields exactly one [`Pair`].

use crate::error::SyncResult;
use crate::mapping::Mapping;
use crate::topology::Record;
use std::collections::HashSet;
use std::sync::Arc;
use sync_store::StoreResult;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

/// A source record and the target record it correlates with, if any.
pub struct Pair {
    pub mapping: Arc<Mapping>,
    pub source: Arc<Record>,
    pub target: Option<Arc<Record>>,
}

impl Pair {
    pub fn is_complete(&self) -> bool {
        self.target.is_some()
    }
}

/// Whether every match condition of a mapping holds for two records.
///
/// A null on either side never correlates, and values that cannot be
/// compared count as not matching.
pub fn matches(mapping: &Mapping, source: &Record, target: &Record) -> bool {
    mapping.match_rule.iter().all(|pair| {
        let left = source.get(&pair.source_column);
        let right = target.get(&pair.target_column);
        if left.is_null() || right.is_null() {
            return false;
        }
        match left.equals(right) {
            Ok(equal) => equal,
            Err(e) => {
                debug!(
                    "Link {}: {}.{} vs {}.{}: {e}",
                    mapping.link_id,
                    mapping.source.name,
                    pair.source_column,
                    mapping.target.name,
                    pair.target_column
                );
                false
            }
        }
    })
}

/// First target, in selection order, that the source record matches.
pub fn find_match(
    mapping: &Mapping,
    source: &Record,
    targets: &[Arc<Record>],
) -> Option<Arc<Record>> {
    targets
        .iter()
        .find(|target| matches(mapping, source, target))
        .cloned()
}

async fn select_active(mapping: &Mapping, source_side: bool) -> StoreResult<Vec<Arc<Record>>> {
    let (node, where_clause) = if source_side {
        (&mapping.source, &mapping.source_where)
    } else {
        (&mapping.target, &mapping.target_where)
    };

    let rows = node
        .table
        .database()
        .select(node.table.name(), where_clause)
        .await?;

    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(record) = node.table.resolve(row) {
            if seen.insert(record.key().key_string()) {
                record.mark_active(mapping.index);
                records.push(record);
            }
        }
    }
    Ok(records)
}

/// Build the pairs of one mapping.
pub async fn build_pairs(mapping: &Arc<Mapping>) -> StoreResult<Vec<Pair>> {
    let sources = select_active(mapping, true).await?;
    let targets = select_active(mapping, false).await?;

    let mut pairs = Vec::with_capacity(sources.len());
    for source in sources {
        let target = find_match(mapping, &source, &targets);
        match &target {
            Some(target) => {
                source.mark_paired(mapping.index);
                target.mark_paired(mapping.index);
                trace!(
                    "Link {}: paired {} with {}",
                    mapping.link_id,
                    source.key(),
                    target.key()
                );
            }
            None => trace!("Link {}: {} has no target", mapping.link_id, source.key()),
        }
        pairs.push(Pair {
            mapping: Arc::clone(mapping),
            source,
            target,
        });
    }

    let complete = pairs.iter().filter(|p| p.is_complete()).count();
    debug!(
        "Link {}: {} pairs ({complete} complete) from {} target records",
        mapping.link_id,
        pairs.len(),
        targets.len()
    );
    Ok(pairs)
}

/// Build the pairs of every mapping concurrently, one task each.
///
/// The result is indexed like `mappings`.
pub async fn build_all(mappings: &[Arc<Mapping>]) -> SyncResult<Vec<Vec<Pair>>> {
    let mut tasks = JoinSet::new();
    for (position, mapping) in mappings.iter().enumerate() {
        let mapping = Arc::clone(mapping);
        tasks.spawn(async move { (position, build_pairs(&mapping).await) });
    }

    let mut all: Vec<Vec<Pair>> = mappings.iter().map(|_| Vec::new()).collect();
    while let Some(joined) = tasks.join_next().await {
        let (position, pairs) = joined?;
        match pairs {
            Ok(pairs) => all[position] = pairs,
            Err(e) => {
                warn!("Pairing for link {} failed: {e}", mappings[position].link_id);
                tasks.abort_all();
                return Err(e.into());
            }
        }
    }
    Ok(all)
}
