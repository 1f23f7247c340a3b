//! Synchronization runs.
//!
//! A run goes through three phases:
//!
//! 1. **init**: the job's databases are looked up, its mapping strings are
//!    parsed and checked against its nodes, then the topology is built and
//!    every distinct table loaded. Any failure here aborts the run before a
//!    single write is issued.
//! 2. **synchronize**: pairs are built per mapping and executed; each pair
//!    is classified and, unless the run is a simulation, its write applied.
//! 3. **finalize**: the accumulated report is rendered to JSON.
//!
//! Ongoing jobs call [`run_job`] repeatedly, passing the table snapshots of
//! the previous run so changes between runs can be logged.

use crate::error::SyncResult;
use crate::executor::execute_all;
use crate::mapping::{build_mappings, parse_mappings, plan_links, LinkPlan, Mapping};
use crate::pairing::build_all;
use crate::report::{Report, Reporter, RunStatus};
use crate::topology::{resolve_databases, TableSnapshots, Topology};
use std::sync::Arc;
use std::time::Instant;
use sync_core::JobConfig;
use sync_store::DatabaseRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Result of a finished run.
#[derive(Debug)]
pub struct RunResult {
    /// Rendered JSON report
    pub report: Vec<u8>,
    /// Table contents at the end of the run, for the next ongoing run
    pub snapshots: TableSnapshots,
    pub status: RunStatus,
}

impl RunResult {
    /// Decode the report again, mainly for callers that want to render it
    /// differently.
    pub fn parsed_report(&self) -> Result<Report, serde_json::Error> {
        serde_json::from_slice(&self.report)
    }
}

/// Check a job without touching any store.
///
/// Verifies that every referenced database is registered, that every mapping
/// string parses and that every link relates known nodes. Returns the
/// planned links.
pub async fn check_job(job: &JobConfig, registry: &DatabaseRegistry) -> SyncResult<Vec<LinkPlan>> {
    resolve_databases(job, registry)?;
    let parsed = parse_mappings(&job.mappings).await?;
    Ok(plan_links(job, &job.mappings, &parsed)?)
}

/// One run of a job.
pub struct SyncRun {
    job: JobConfig,
    simulation: bool,
    topology: Topology,
    mappings: Vec<Arc<Mapping>>,
    reporter: Arc<Reporter>,
}

impl SyncRun {
    /// Parse, plan and load everything the run needs.
    pub async fn init(
        job: &JobConfig,
        registry: &DatabaseRegistry,
        simulation: bool,
        previous: Option<TableSnapshots>,
    ) -> SyncResult<Self> {
        let plans = check_job(job, registry).await?;
        debug!("Job '{}': {} links planned", job.name, plans.len());

        let topology = Topology::build(job, registry, previous).await?;
        let mappings = build_mappings(job, plans, &topology, simulation)?;
        let reporter = Arc::new(Reporter::new(job.name.clone(), simulation, &mappings));

        Ok(Self {
            job: job.clone(),
            simulation,
            topology,
            mappings,
            reporter,
        })
    }

    pub fn mappings(&self) -> &[Arc<Mapping>] {
        &self.mappings
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Pair and execute every mapping.
    pub async fn synchronize(&self, cancel: &CancellationToken) -> SyncResult<RunStatus> {
        let mut pairs = build_all(&self.mappings).await?;
        let total: usize = pairs.iter().map(Vec::len).sum();
        info!(
            "Job '{}': executing {total} pairs across {} links{}",
            self.job.name,
            self.mappings.len(),
            if self.simulation { " (simulation)" } else { "" }
        );

        let stopped = execute_all(&self.mappings, &mut pairs, &self.reporter, cancel).await?;
        Ok(if stopped {
            RunStatus::Stopped
        } else {
            RunStatus::Completed
        })
    }

    /// Render the report.
    pub fn finalize(self, status: RunStatus) -> SyncResult<RunResult> {
        let report = self.reporter.finalize(status)?;
        Ok(RunResult {
            report,
            snapshots: self.topology.snapshots(),
            status,
        })
    }
}

/// Run a job once.
pub async fn run_job(
    job: &JobConfig,
    registry: &DatabaseRegistry,
    simulation: bool,
    cancel: &CancellationToken,
    previous: Option<TableSnapshots>,
) -> SyncResult<RunResult> {
    let started = Instant::now();
    info!(
        "Starting {} of job '{}'",
        if simulation { "simulation" } else { "synchronization" },
        job.name
    );

    let run = SyncRun::init(job, registry, simulation, previous).await?;
    let status = run.synchronize(cancel).await?;
    let result = run.finalize(status)?;

    info!(
        "Job '{}' finished ({:?}) in {:?}",
        job.name,
        result.status,
        started.elapsed()
    );
    Ok(result)
}
