//! Control plane.
//!
//! The [`Application`] owns the database registry and the configured jobs,
//! and tracks which jobs are currently running. At most one run per job is
//! in flight: a second request for a running job is rejected rather than
//! queued.
//!
//! One-off runs return their report when they finish. Ongoing runs are
//! acknowledged immediately and repeat in the background at the job's
//! interval until [`Application::stop_job`] is called; each round keeps
//! the latest report, which [`Application::last_report`] returns.

use crate::config::{job_interval, AppConfig};
use crate::connect::build_registry;
use crate::error::SyncError;
use crate::mapping::LinkPlan;
use crate::report::RunStatus;
use crate::sync::{check_job, run_job};
use crate::topology::TableSnapshots;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use sync_core::JobConfig;
use sync_store::DatabaseRegistry;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How a job is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Run once and return the report
    OneOff,
    /// Repeat at the job interval until stopped
    Ongoing,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::OneOff => f.write_str("one-off"),
            RunMode::Ongoing => f.write_str("ongoing"),
        }
    }
}

impl FromStr for RunMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "one-off" | "oneoff" | "oo" => Ok(RunMode::OneOff),
            "ongoing" | "ng" => Ok(RunMode::Ongoing),
            other => Err(AppError::InvalidMode(other.to_string())),
        }
    }
}

/// Control plane errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("unknown job '{0}'")]
    UnknownJob(String),

    #[error("job '{0}' is already running")]
    AlreadyRunning(String),

    #[error("job '{0}' is not running")]
    NotRunning(String),

    #[error("job '{0}': an ongoing synchronization cannot be a simulation")]
    OngoingSimulation(String),

    #[error("invalid run mode '{0}', expected 'one-off' or 'ongoing'")]
    InvalidMode(String),

    #[error("job '{job}': {message}")]
    InvalidInterval { job: String, message: String },

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Result of a run request.
#[derive(Debug)]
pub enum RunResponse {
    /// JSON report of a finished one-off run
    Report(Vec<u8>),
    /// Acknowledgement of a started ongoing run
    Started(String),
}

/// A job as listed by [`Application::list_jobs`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub name: String,
    pub nodes: Vec<String>,
    pub mappings: Vec<String>,
    pub simulation: bool,
    pub interval: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<RunMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

struct JobHandle {
    mode: RunMode,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

type RunningJobs = Arc<Mutex<HashMap<String, JobHandle>>>;

/// Marks a job as running for as long as it lives.
struct RunGuard {
    running: RunningJobs,
    name: String,
}

impl RunGuard {
    fn acquire(running: &RunningJobs, name: &str, mode: RunMode) -> Result<(Self, CancellationToken), AppError> {
        let mut jobs = running.lock();
        if jobs.contains_key(name) {
            return Err(AppError::AlreadyRunning(name.to_string()));
        }
        let cancel = CancellationToken::new();
        jobs.insert(
            name.to_string(),
            JobHandle {
                mode,
                cancel: cancel.clone(),
                started_at: Utc::now(),
            },
        );
        let guard = Self {
            running: Arc::clone(running),
            name: name.to_string(),
        };
        Ok((guard, cancel))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.lock().remove(&self.name);
    }
}

pub struct Application {
    registry: Arc<DatabaseRegistry>,
    jobs: BTreeMap<String, JobConfig>,
    running: RunningJobs,
    reports: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl Application {
    pub fn new(registry: DatabaseRegistry, jobs: Vec<JobConfig>) -> Self {
        Self {
            registry: Arc::new(registry),
            jobs: jobs.into_iter().map(|job| (job.name.clone(), job)).collect(),
            running: Arc::new(Mutex::new(HashMap::new())),
            reports: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(build_registry(&config.databases), config.jobs.clone())
    }

    pub fn registry(&self) -> &DatabaseRegistry {
        &self.registry
    }

    pub fn job(&self, name: &str) -> Result<&JobConfig, AppError> {
        self.jobs
            .get(name)
            .ok_or_else(|| AppError::UnknownJob(name.to_string()))
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.lock().contains_key(name)
    }

    /// Run a job.
    ///
    /// `simulation` overrides the job's own setting when given. Ongoing runs
    /// never simulate; asking for one is rejected before anything runs.
    pub async fn run(
        &self,
        name: &str,
        mode: RunMode,
        simulation: Option<bool>,
    ) -> Result<RunResponse, AppError> {
        let job = self.job(name)?;
        let simulation = simulation.unwrap_or(job.simulation);
        match mode {
            RunMode::OneOff => self.run_once(job, simulation).await.map(RunResponse::Report),
            RunMode::Ongoing if simulation => Err(AppError::OngoingSimulation(name.to_string())),
            RunMode::Ongoing => self.start_ongoing(job).map(RunResponse::Started),
        }
    }

    async fn run_once(&self, job: &JobConfig, simulation: bool) -> Result<Vec<u8>, AppError> {
        let (guard, cancel) = RunGuard::acquire(&self.running, &job.name, RunMode::OneOff)?;

        // The run gets its own task so a dropped caller does not abandon
        // writes halfway.
        let registry = Arc::clone(&self.registry);
        let task_job = job.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            run_job(&task_job, &registry, simulation, &cancel, None).await
        });

        let result = handle.await.map_err(SyncError::from)??;
        self.reports
            .lock()
            .insert(job.name.clone(), result.report.clone());
        Ok(result.report)
    }

    fn start_ongoing(&self, job: &JobConfig) -> Result<String, AppError> {
        let interval = job_interval(job).map_err(|e| AppError::InvalidInterval {
            job: job.name.clone(),
            message: format!("{e:#}"),
        })?;
        let (guard, cancel) = RunGuard::acquire(&self.running, &job.name, RunMode::Ongoing)?;

        tokio::spawn(ongoing_loop(
            job.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.reports),
            interval,
            cancel,
            guard,
        ));

        info!("Ongoing synchronization of '{}' started", job.name);
        Ok(format!(
            "'{}' ongoing synchronization started, running every {}.",
            job.name, job.interval
        ))
    }

    /// Start a job as an ongoing synchronization.
    pub fn start_job(&self, name: &str) -> Result<String, AppError> {
        let job = self.job(name)?;
        if job.simulation {
            return Err(AppError::OngoingSimulation(name.to_string()));
        }
        self.start_ongoing(job)
    }

    /// Request a running job to stop.
    ///
    /// Pairs already being written complete; no new pair is started.
    pub fn stop_job(&self, name: &str) -> Result<String, AppError> {
        self.job(name)?;
        let running = self.running.lock();
        let handle = running
            .get(name)
            .ok_or_else(|| AppError::NotRunning(name.to_string()))?;
        handle.cancel.cancel();
        info!("Stop requested for {} job '{name}'", handle.mode);
        Ok(format!("'{name}' stop requested."))
    }

    pub fn list_jobs(&self) -> Vec<JobSummary> {
        let running = self.running.lock();
        self.jobs
            .values()
            .map(|job| {
                let handle = running.get(&job.name);
                JobSummary {
                    name: job.name.clone(),
                    nodes: job.nodes.iter().map(|n| n.name.clone()).collect(),
                    mappings: job.mappings.clone(),
                    simulation: job.simulation,
                    interval: job.interval.clone(),
                    running: handle.map(|h| h.mode),
                    started_at: handle.map(|h| h.started_at),
                }
            })
            .collect()
    }

    pub fn list_jobs_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.list_jobs())
    }

    /// Latest report of a job, if it has run since startup.
    pub fn last_report(&self, name: &str) -> Option<Vec<u8>> {
        self.reports.lock().get(name).cloned()
    }

    /// Check every job without touching any store.
    pub async fn check_jobs(&self) -> Vec<(String, Result<Vec<LinkPlan>, SyncError>)> {
        let mut results = Vec::with_capacity(self.jobs.len());
        for job in self.jobs.values() {
            results.push((job.name.clone(), check_job(job, &self.registry).await));
        }
        results
    }

    /// Wait until a job is no longer running.
    ///
    /// Returns false if it is still running after `timeout`.
    pub async fn wait_idle(&self, name: &str, timeout: Duration) -> bool {
        let poll = async {
            while self.is_running(name) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }
}

async fn ongoing_loop(
    job: JobConfig,
    registry: Arc<DatabaseRegistry>,
    reports: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    interval: Duration,
    cancel: CancellationToken,
    _guard: RunGuard,
) {
    let mut previous: Option<TableSnapshots> = None;
    let mut round: u64 = 0;

    loop {
        round += 1;
        match run_job(&job, &registry, false, &cancel, previous.take()).await {
            Ok(result) => {
                info!("Ongoing job '{}' finished round {round}", job.name);
                reports.lock().insert(job.name.clone(), result.report);
                previous = Some(result.snapshots);
                if result.status == RunStatus::Stopped {
                    break;
                }
            }
            Err(e) => error!("Ongoing job '{}' round {round} failed: {e}", job.name),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    warn!("Ongoing job '{}' stopped after {round} rounds", job.name);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_mode_from_str() {
        assert_eq!("one-off".parse::<RunMode>().unwrap(), RunMode::OneOff);
        assert_eq!("Ongoing".parse::<RunMode>().unwrap(), RunMode::Ongoing);
        assert!(matches!(
            "weekly".parse::<RunMode>(),
            Err(AppError::InvalidMode(mode)) if mode == "weekly"
        ));
        assert_eq!(RunMode::OneOff.to_string(), "one-off");
    }

    #[test]
    fn test_run_guard_is_exclusive() {
        let running: RunningJobs = Arc::new(Mutex::new(HashMap::new()));
        let (guard, _cancel) = RunGuard::acquire(&running, "films", RunMode::OneOff).unwrap();
        assert!(matches!(
            RunGuard::acquire(&running, "films", RunMode::Ongoing),
            Err(AppError::AlreadyRunning(_))
        ));
        drop(guard);
        assert!(running.lock().is_empty());
        assert!(RunGuard::acquire(&running, "films", RunMode::Ongoing).is_ok());
    }
}
