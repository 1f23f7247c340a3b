//! Command-line interface for unify-sync
//!
//! # Usage Examples
//!
//! ```bash
//! # One-off synchronization, report written to a file
//! unify-sync run films --output films-report.json
//!
//! # Simulation with a human-readable report
//! unify-sync run films --simulation true --format text
//!
//! # Ongoing synchronization, repeated at the job interval until Ctrl-C
//! unify-sync run films --mode ongoing
//!
//! # List configured jobs / check them without connecting to any store
//! unify-sync jobs
//! unify-sync check
//!
//! # HTTP and WebSocket control plane
//! unify-sync serve --listen 0.0.0.0:8080
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use unify_sync::{server, AppConfig, Application, Report, RunMode, RunResponse};

#[derive(Parser)]
#[command(name = "unify-sync")]
#[command(about = "Reconcile records between MongoDB and PostgreSQL using declarative mappings")]
#[command(long_about = None)]
struct Cli {
    /// Directory holding databases.yaml and jobs/
    #[arg(long, default_value = "config", env = "UNIFY_CONFIG_DIR")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job
    Run {
        /// Job name
        job: String,

        /// Run once or repeat at the job interval
        #[arg(long, value_enum, default_value = "one-off")]
        mode: RunMode,

        /// Classify without writing (defaults to the job's setting)
        #[arg(long)]
        simulation: Option<bool>,

        /// Write the report to a file instead of stdout
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Report format
        #[arg(long, value_enum, default_value = "json")]
        format: ReportFormat,
    },

    /// List configured jobs
    Jobs,

    /// Check every job without connecting to any store
    Check,

    /// Serve the HTTP and WebSocket control plane
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8080", env = "UNIFY_LISTEN")]
        listen: SocketAddr,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config_dir).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            cli.config_dir.display()
        )
    })?;
    let app = Arc::new(Application::from_config(&config));

    match cli.command {
        Commands::Run {
            job,
            mode,
            simulation,
            output,
            format,
        } => match app.run(&job, mode, simulation).await? {
            RunResponse::Report(report) => {
                write_report(&report, output.as_deref(), format)?;
            }
            RunResponse::Started(message) => {
                println!("{message}");
                tokio::signal::ctrl_c()
                    .await
                    .context("Failed to listen for Ctrl-C")?;
                app.stop_job(&job)?;
                if !app.wait_idle(&job, Duration::from_secs(60)).await {
                    tracing::warn!("Job '{job}' did not stop within 60s");
                }
                if let Some(report) = app.last_report(&job) {
                    write_report(&report, output.as_deref(), format)?;
                }
            }
        },
        Commands::Jobs => {
            let jobs = serde_json::to_string_pretty(&app.list_jobs())?;
            println!("{jobs}");
        }
        Commands::Check => {
            let mut failed = 0;
            for (name, result) in app.check_jobs().await {
                match result {
                    Ok(links) => println!("{name}: ok ({} links)", links.len()),
                    Err(e) => {
                        failed += 1;
                        println!("{name}: {e}");
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} job(s) failed the check");
            }
        }
        Commands::Serve { listen } => {
            server::serve(app, listen).await?;
        }
    }

    Ok(())
}

fn write_report(
    report: &[u8],
    output: Option<&std::path::Path>,
    format: ReportFormat,
) -> anyhow::Result<()> {
    let rendered = match format {
        ReportFormat::Json => {
            let value: serde_json::Value =
                serde_json::from_slice(report).context("Failed to decode report")?;
            serde_json::to_string_pretty(&value)?
        }
        ReportFormat::Text => {
            let report: Report =
                serde_json::from_slice(report).context("Failed to decode report")?;
            report.render_text()
        }
    };

    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            tracing::info!("Report written to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
