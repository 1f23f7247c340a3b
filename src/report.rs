//! Run report.
//!
//! The [`Reporter`] holds one [`LinkReport`] per mapping, created before any
//! pair is executed so links without pairs still show up. Pairs of different
//! mappings are reported concurrently; each link has its own lock.

use crate::executor::{ActionType, Outcome};
use crate::mapping::Mapping;
use crate::pairing::Pair;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

/// One classified pair as it appears in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub source_node_key: String,
    pub source_data: serde_json::Value,
    pub source_column: String,
    pub source_column_data: serde_json::Value,
    pub target_key_name: String,
    pub target_key_value: serde_json::Value,
    pub target_column: String,
    pub target_column_data: serde_json::Value,
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionRecord {
    pub fn from_pair(pair: &Pair, outcome: &Outcome) -> Self {
        let mapping = &pair.mapping;
        let source_key_name = &mapping.source.key_column;

        let (target_key_name, target_key_value, target_column_data) = match &pair.target {
            Some(target) => (
                mapping.target.key_column.clone(),
                target.key().to_json(),
                target.get(&mapping.target_column).preview(),
            ),
            None => (String::new(), serde_json::Value::Null, serde_json::Value::Null),
        };

        Self {
            source_node_key: source_key_name.clone(),
            source_data: pair.source.get(source_key_name).to_json(),
            source_column: mapping.source_column.clone(),
            source_column_data: pair.source.get(&mapping.source_column).preview(),
            target_key_name,
            target_key_value,
            target_column: mapping.target_column.clone(),
            target_column_data,
            action_type: outcome.action,
            error: outcome.error.clone(),
        }
    }

    /// One-line summary used by the text rendering.
    pub fn summary(&self) -> String {
        let arrow = match self.action_type {
            ActionType::Idle => "==",
            ActionType::Insert => "=>",
            ActionType::Update => "=^",
        };
        let target_key = if self.target_key_name.is_empty() {
            "-".to_string()
        } else {
            format!("{}: {}", self.target_key_name, json_text(&self.target_key_value))
        };

        let mut line = format!(
            "|{}: {}, {}: {}|  {arrow}  |{target_key}, {}: {}|",
            self.source_node_key,
            json_text(&self.source_data),
            self.source_column,
            json_text(&self.source_column_data),
            self.target_column,
            json_text(&self.target_column_data),
        );
        if let Some(error) = &self.error {
            let _ = write!(line, "  ({error})");
        }
        line
    }
}

fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// Report entries of one link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkReport {
    pub cmd: String,
    pub idle: Vec<ActionRecord>,
    pub inserts: Vec<ActionRecord>,
    pub updates: Vec<ActionRecord>,
}

impl LinkReport {
    pub fn len(&self) -> usize {
        self.idle.len() + self.inserts.len() + self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Stopped,
}

/// The rendered report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub message: String,
    pub links: BTreeMap<String, LinkReport>,
}

impl Report {
    /// Human-readable rendering, one line per action.
    pub fn render_text(&self) -> String {
        let mut out = format!("{}\n", self.message);
        for (link_id, link) in &self.links {
            let _ = writeln!(out, "\n[{link_id}] {}", link.cmd);
            for (title, records) in [
                ("idle", &link.idle),
                ("inserts", &link.inserts),
                ("updates", &link.updates),
            ] {
                let _ = writeln!(out, "  {title}: {}", records.len());
                for record in records {
                    let _ = writeln!(out, "    {}", record.summary());
                }
            }
        }
        out
    }
}

/// Accumulates action records for one run.
pub struct Reporter {
    job: String,
    simulation: bool,
    links: BTreeMap<String, Mutex<LinkReport>>,
}

impl Reporter {
    pub fn new(job: impl Into<String>, simulation: bool, mappings: &[Arc<Mapping>]) -> Self {
        let links = mappings
            .iter()
            .map(|mapping| {
                let report = LinkReport {
                    cmd: mapping.cmd.clone(),
                    ..Default::default()
                };
                (mapping.link_id.clone(), Mutex::new(report))
            })
            .collect();
        Self {
            job: job.into(),
            simulation,
            links,
        }
    }

    /// Record the outcome of a pair under its link.
    pub fn add_action(&self, pair: &Pair, outcome: &Outcome) {
        let Some(link) = self.links.get(&pair.mapping.link_id) else {
            tracing::warn!("No report entry for link {}", pair.mapping.link_id);
            return;
        };
        let record = ActionRecord::from_pair(pair, outcome);
        let mut link = link.lock();
        match outcome.action {
            ActionType::Idle => link.idle.push(record),
            ActionType::Insert => link.inserts.push(record),
            ActionType::Update => link.updates.push(record),
        }
    }

    pub fn message(&self, status: RunStatus) -> String {
        let job = &self.job;
        match (status, self.simulation) {
            (RunStatus::Completed, true) => format!(
                "'{job}' simulation was successful. The report contains changes that would be made if you requested an actual synchronization."
            ),
            (RunStatus::Completed, false) => format!(
                "'{job}' synchronization was successful. The report contains changes that have been made to the relevant nodes."
            ),
            (RunStatus::Stopped, true) => format!(
                "'{job}' simulation was stopped before completion. The report contains the changes classified before the stop request."
            ),
            (RunStatus::Stopped, false) => format!(
                "'{job}' synchronization was stopped before completion. The report contains the changes processed before the stop request."
            ),
        }
    }

    /// Current state of the report.
    pub fn report(&self, status: RunStatus) -> Report {
        Report {
            message: self.message(status),
            links: self
                .links
                .iter()
                .map(|(id, link)| (id.clone(), link.lock().clone()))
                .collect(),
        }
    }

    /// Render the report as JSON.
    pub fn finalize(&self, status: RunStatus) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.report(status))
    }
}
