//! Error types for synchronization runs.

use crate::lang::ParseError;
use sync_store::StoreError;
use thiserror::Error;

/// Result type for synchronization runs.
pub type SyncResult<T> = Result<T, SyncError>;

/// A node references a table that was never loaded into the topology.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("node '{node}' references table '{table_id}' which was never loaded")]
pub struct TopologyError {
    pub node: String,
    pub table_id: String,
}

/// Inconsistent job or database configuration. Always raised before any
/// write happens.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("job '{job}' references unknown database '{database}'")]
    UnknownDatabase { job: String, database: String },

    #[error("mapping #{mapping} of job '{job}' references unknown node '{node}'")]
    UnknownNode {
        job: String,
        mapping: usize,
        node: String,
    },

    #[error("job '{job}' declares node '{node}' more than once")]
    DuplicateNode { job: String, node: String },

    #[error("table '{table_id}' is used with key column '{first}' and '{second}'")]
    ConflictingKey {
        table_id: String,
        first: String,
        second: String,
    },

    #[error(
        "link {link_id} of job '{job}': nodes '{source_node}' and '{target_node}' are not related by any match condition"
    )]
    UnrelatedLink {
        job: String,
        link_id: String,
        source_node: String,
        target_node: String,
    },

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// Errors that abort a synchronization run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("mapping #{index} is invalid: {source}")]
    Parse { index: usize, source: ParseError },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to serialize report: {0}")]
    ReportSerialization(#[from] serde_json::Error),

    #[error("run task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

impl From<TopologyError> for SyncError {
    fn from(e: TopologyError) -> Self {
        Self::Configuration(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_error_is_configuration_error() {
        let err: SyncError = TopologyError {
            node: "films".to_string(),
            table_id: "local.film".to_string(),
        }
        .into();

        assert!(matches!(
            err,
            SyncError::Configuration(ConfigurationError::Topology(_))
        ));
        assert_eq!(
            err.to_string(),
            "configuration error: node 'films' references table 'local.film' which was never loaded"
        );
    }
}
