//! Reconciliation executor.
//!
//! Every pair is classified as idle, insert or update and, unless the run is
//! a simulation, the write is applied. Write failures stay local to their
//! pair: they are logged and attached to its report entry.

use crate::error::SyncResult;
use crate::lang::Operation;
use crate::mapping::{InsertResult, Mapping};
use crate::pairing::Pair;
use crate::report::Reporter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use sync_core::{ComparisonError, Row, UniversalValue};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Idle,
    Insert,
    Update,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Idle => write!(f, "idle"),
            ActionType::Insert => write!(f, "insert"),
            ActionType::Update => write!(f, "update"),
        }
    }
}

/// What happened to one pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub action: ActionType,
    pub error: Option<String>,
}

impl Outcome {
    fn new(action: ActionType) -> Self {
        Self {
            action,
            error: None,
        }
    }

    fn failed(action: ActionType, error: impl ToString) -> Self {
        Self {
            action,
            error: Some(error.to_string()),
        }
    }
}

/// Decide the action for a pair.
///
/// A comparison error means the pair cannot be updated; the caller records
/// it as idle.
pub fn classify(pair: &Pair) -> Result<ActionType, ComparisonError> {
    let mapping = &pair.mapping;
    match &pair.target {
        Some(target) if mapping.allows(Operation::Update) => {
            let source_value = pair.source.get(&mapping.source_column);
            let target_value = target.get(&mapping.target_column);
            if source_value.equals(target_value)? {
                Ok(ActionType::Idle)
            } else {
                Ok(ActionType::Update)
            }
        }
        Some(_) => Ok(ActionType::Idle),
        None if mapping.allows(Operation::Insert) => Ok(ActionType::Insert),
        None => Ok(ActionType::Idle),
    }
}

/// Row written for an incomplete pair and the key to insert it under.
///
/// The columns of every sibling link and every match-rule column are carried
/// over, so one row holds the whole record and the next run correlates it
/// with its source.
pub fn insert_row(pair: &Pair) -> (Row, UniversalValue) {
    let mapping = &pair.mapping;
    let mut row = Row::new();
    for column_pair in mapping.match_rule.iter().chain(&mapping.row_columns) {
        row.insert(
            column_pair.target_column.clone(),
            pair.source.get(&column_pair.source_column).clone(),
        );
    }

    let key = row
        .get(&mapping.target.key_column)
        .cloned()
        .unwrap_or(UniversalValue::Null);
    (row, key)
}

async fn apply_update(pair: &Pair) -> Outcome {
    let mapping = &pair.mapping;
    let Some(target) = &pair.target else {
        return Outcome::new(ActionType::Idle);
    };
    let table = &mapping.target.table;
    let value = pair.source.get(&mapping.source_column);

    match table
        .database()
        .update(
            table.name(),
            &mapping.target.key_column,
            target.key(),
            &mapping.target_column,
            value,
        )
        .await
    {
        Ok(0) => {
            warn!(
                "Link {}: update of {} {} matched no rows",
                mapping.link_id,
                table.id(),
                target.key()
            );
            Outcome::failed(ActionType::Update, "update matched no rows")
        }
        Ok(matched) => {
            debug!(
                "Link {}: updated {matched} row(s) of {} where {} = {}",
                mapping.link_id,
                table.id(),
                mapping.target.key_column,
                target.key()
            );
            Outcome::new(ActionType::Update)
        }
        Err(e) => {
            warn!("Link {}: update failed: {e}", mapping.link_id);
            Outcome::failed(ActionType::Update, e)
        }
    }
}

async fn insert_record(pair: &Pair) -> InsertResult {
    let mapping = &pair.mapping;
    let table = &mapping.target.table;
    let (mut row, key) = insert_row(pair);

    match table
        .database()
        .insert(table.name(), &mapping.target.key_column, &key, &row)
        .await
    {
        Ok(new_key) => {
            debug!(
                "Link {}: inserted {} into {}",
                mapping.link_id,
                new_key,
                table.id()
            );
            row.insert(mapping.target.key_column.clone(), new_key.clone());
            Ok(table.register(new_key, row))
        }
        Err(e) => {
            warn!("Link {}: insert failed: {e}", mapping.link_id);
            Err(e.to_string())
        }
    }
}

async fn apply_insert(pair: &mut Pair) -> Outcome {
    let mapping = Arc::clone(&pair.mapping);
    let slot = mapping.inserts.slot(pair.source.key());
    let inserted = slot.get_or_init(|| insert_record(&*pair)).await;

    match inserted {
        Ok(record) => {
            record.mark_active(mapping.index);
            record.mark_paired(mapping.index);
            pair.source.mark_paired(mapping.index);
            pair.target = Some(Arc::clone(record));
            Outcome::new(ActionType::Insert)
        }
        Err(e) => Outcome::failed(ActionType::Insert, e),
    }
}

/// Classify a pair and, unless simulating, apply its write.
pub async fn execute_pair(pair: &mut Pair) -> Outcome {
    let action = match classify(pair) {
        Ok(action) => action,
        Err(e) => {
            warn!(
                "Link {}: cannot compare {} of {}: {e}",
                pair.mapping.link_id,
                pair.mapping.source_column,
                pair.source.key()
            );
            return Outcome::failed(ActionType::Idle, e);
        }
    };

    if pair.mapping.simulation {
        return Outcome::new(action);
    }
    match action {
        ActionType::Idle => Outcome::new(ActionType::Idle),
        ActionType::Update => apply_update(pair).await,
        ActionType::Insert => apply_insert(pair).await,
    }
}

/// Execute the pairs of one mapping in order.
///
/// Returns the pairs and whether the run was stopped before all of them
/// were executed.
pub async fn execute_mapping(
    mut pairs: Vec<Pair>,
    reporter: &Reporter,
    cancel: &CancellationToken,
) -> (Vec<Pair>, bool) {
    for (position, pair) in pairs.iter_mut().enumerate() {
        if cancel.is_cancelled() {
            info!(
                "Link {}: stopped after {position} pairs",
                pair.mapping.link_id
            );
            return (pairs, true);
        }
        let outcome = execute_pair(pair).await;
        reporter.add_action(pair, &outcome);
    }
    (pairs, false)
}

/// Execute every mapping concurrently, one task each.
///
/// Returns whether any mapping was stopped early.
pub async fn execute_all(
    mappings: &[Arc<Mapping>],
    pairs: &mut [Vec<Pair>],
    reporter: &Arc<Reporter>,
    cancel: &CancellationToken,
) -> SyncResult<bool> {
    let mut tasks = JoinSet::new();
    for (position, mapping_pairs) in pairs.iter_mut().enumerate() {
        let mapping_pairs = std::mem::take(mapping_pairs);
        let reporter = Arc::clone(reporter);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let (done, stopped) = execute_mapping(mapping_pairs, &reporter, &cancel).await;
            (position, done, stopped)
        });
    }

    let mut stopped = false;
    while let Some(joined) = tasks.join_next().await {
        let (position, done, mapping_stopped) = joined?;
        debug!(
            "Link {}: executed {} pairs",
            mappings[position].link_id,
            done.len()
        );
        pairs[position] = done;
        stopped |= mapping_stopped;
    }
    Ok(stopped)
}
