//! Configuration directory loading.
//!
//! A configuration directory holds `databases.yaml` and a `jobs/` directory
//! with one YAML file per job.

mod duration;

pub use duration::parse_duration;

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_core::{load_jobs_dir, DatabasesConfig, JobConfig};

pub const DATABASES_FILE: &str = "databases.yaml";
pub const JOBS_DIR: &str = "jobs";

/// Everything loaded from a configuration directory.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub dir: PathBuf,
    pub databases: DatabasesConfig,
    pub jobs: Vec<JobConfig>,
}

impl AppConfig {
    /// Load and validate a configuration directory.
    ///
    /// Job intervals are parsed up front so a bad interval is reported at
    /// startup rather than when an ongoing job is started.
    pub fn load<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let databases_path = dir.join(DATABASES_FILE);
        let databases = DatabasesConfig::from_file(&databases_path).with_context(|| {
            format!("Failed to load databases from {}", databases_path.display())
        })?;

        let jobs_dir = dir.join(JOBS_DIR);
        let jobs = if jobs_dir.is_dir() {
            load_jobs_dir(&jobs_dir)
                .with_context(|| format!("Failed to load jobs from {}", jobs_dir.display()))?
        } else {
            tracing::warn!("No jobs directory at {}", jobs_dir.display());
            Vec::new()
        };

        for job in &jobs {
            job_interval(job)?;
        }

        tracing::info!(
            "Loaded {} databases and {} jobs from {}",
            databases.databases.len(),
            jobs.len(),
            dir.display()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            databases,
            jobs,
        })
    }

    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|job| job.name == name)
    }
}

/// Interval between runs of an ongoing job.
pub fn job_interval(job: &JobConfig) -> anyhow::Result<Duration> {
    parse_duration(&job.interval)
        .with_context(|| format!("Invalid interval for job '{}'", job.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const DATABASES: &str = r#"
databases:
  - name: local
    kind: memory
    seed:
      film:
        - { id: 1, title: Alien }
"#;

    const JOB: &str = r#"
name: films
interval: 5m
nodes:
  - { name: films, database: local, table: film, key: id }
  - { name: archive, database: local, table: archive, key: id }
mappings:
  - MAP films.title TO archive.title MATCH BY IDS(films.id, archive.id) DO INSERT
"#;

    #[test]
    fn test_load_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(DATABASES_FILE), DATABASES).unwrap();
        fs::create_dir(dir.path().join(JOBS_DIR)).unwrap();
        fs::write(dir.path().join(JOBS_DIR).join("films.yaml"), JOB).unwrap();

        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.databases.databases.len(), 1);
        assert_eq!(config.jobs.len(), 1);

        let job = config.job("films").unwrap();
        assert_eq!(job_interval(job).unwrap(), Duration::from_secs(300));
        assert!(config.job("missing").is_none());
    }

    #[test]
    fn test_load_config_dir_without_jobs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(DATABASES_FILE), DATABASES).unwrap();

        let config = AppConfig::load(dir.path()).unwrap();
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn test_load_config_dir_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("databases.yaml"));

        fs::write(dir.path().join(DATABASES_FILE), DATABASES).unwrap();
        fs::create_dir(dir.path().join(JOBS_DIR)).unwrap();
        fs::write(
            dir.path().join(JOBS_DIR).join("films.yaml"),
            JOB.replace("5m", "never"),
        )
        .unwrap();
        let err = AppConfig::load(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid interval for job 'films'"));
    }
}
