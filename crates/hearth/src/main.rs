//! Hearth: persistent job scheduling with supervised workers
//!
//! Main binary with subcommands:
//! - `run`: Host daemon (worker pool, notification dispatch)
//! - `submit`: Schedule a one-off or cron job
//! - `jobs`: Inspect the job table
//! - `gc`: Remove expired finished jobs once

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use hearth_scheduler::{JobStore, NewJob, StoreConfig};
use hearth_workers::{WorkerConfig, WorkerCount};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;
mod handlers;

#[derive(Parser)]
#[command(name = "hearth")]
#[command(about = "Persistent job scheduler and worker pool", long_about = None)]
struct Cli {
    /// SQLite database holding the job table
    #[arg(long, global = true, env = "HEARTH_DATABASE", default_value = "hearth.db")]
    database: PathBuf,

    /// Seconds after which a claimed but unfinished job may be claimed again
    #[arg(long, global = true, env = "HEARTH_STALE_THRESHOLD_SECS", default_value = "1800")]
    stale_threshold_secs: u64,

    /// Default retention of finished jobs, in seconds
    #[arg(long, global = true, env = "HEARTH_REMOVE_DELAY_SECS", default_value = "3600")]
    remove_delay_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host daemon
    Run {
        /// Number of workers, or "cpus" for one per core
        #[arg(long, env = "HEARTH_WORKERS", default_value = "cpus")]
        workers: WorkerCount,

        /// Worker poll interval in milliseconds
        #[arg(long, env = "HEARTH_POLL_INTERVAL_MS", default_value = "1000")]
        poll_interval_ms: u64,

        /// Heartbeat every N worker cycles (0 disables)
        #[arg(long, env = "HEARTH_HEARTBEAT_EVERY", default_value = "30")]
        heartbeat_every: u32,

        /// Consecutive crashes tolerated per worker slot
        #[arg(long, env = "HEARTH_MAX_RESTARTS", default_value = "5")]
        max_restarts: u32,

        /// Seconds to wait for workers on shutdown before aborting them
        #[arg(long, env = "HEARTH_SHUTDOWN_TIMEOUT_SECS", default_value = "10")]
        shutdown_timeout_secs: u64,
    },

    /// Schedule a job
    Submit {
        /// Job type (handler name)
        #[arg(long = "type")]
        job_type: String,

        /// Tag; pending jobs with the same tag are cancelled. Defaults to the type.
        #[arg(long)]
        tag: Option<String>,

        /// Owning user; omit for a system job
        #[arg(long)]
        user: Option<i64>,

        /// JSON payload
        #[arg(long, default_value = "{}")]
        data: String,

        /// Run after this many seconds
        #[arg(long, conflicts_with = "cron")]
        delay_secs: Option<u64>,

        /// Recurrence expression (5 or 6 fields, or @hourly-style)
        #[arg(long)]
        cron: Option<String>,

        /// Retry this many milliseconds after a failure
        #[arg(long)]
        retry_delay_ms: Option<u64>,

        /// Never garbage collect this job
        #[arg(long)]
        persistent: bool,
    },

    /// List jobs for a tag, or summarize pending work
    Jobs {
        #[arg(long)]
        tag: Option<String>,
    },

    /// Remove expired finished jobs
    Gc,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "hearth=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let store_config = StoreConfig {
        stale_threshold: Duration::from_secs(cli.stale_threshold_secs),
        default_remove_delay: Duration::from_secs(cli.remove_delay_secs),
    };

    match cli.command {
        Commands::Run {
            workers,
            poll_interval_ms,
            heartbeat_every,
            max_restarts,
            shutdown_timeout_secs,
        } => {
            let workers = WorkerConfig {
                count: workers,
                poll_interval: Duration::from_millis(poll_interval_ms),
                heartbeat_every,
                max_restarts,
                shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
                ..Default::default()
            };
            daemon::run(daemon::DaemonConfig {
                database: cli.database,
                store: store_config,
                workers,
            })
            .await
        }

        Commands::Submit {
            job_type,
            tag,
            user,
            data,
            delay_secs,
            cron,
            retry_delay_ms,
            persistent,
        } => {
            let data: serde_json::Value = serde_json::from_str(&data)
                .map_err(|e| miette::miette!("--data is not valid JSON: {}", e))?;
            let mut job = NewJob::new(tag.unwrap_or_else(|| job_type.clone()), job_type, data);
            if let Some(user) = user {
                job = job.for_user(user);
            }
            if let Some(secs) = delay_secs {
                job = job.delayed(Duration::from_secs(secs));
            }
            if let Some(ms) = retry_delay_ms {
                job = job.retry_on_failure(Duration::from_millis(ms));
            }
            if persistent {
                job = job.persistent();
            }

            let store = open_store(&cli.database, store_config)?;
            let job = match cron {
                Some(expression) => store.schedule_cron(job, &expression),
                None => store.schedule(job),
            }
            .map_err(|e| miette::miette!("failed to schedule job: {}", e))?;

            println!("scheduled job {} ({}) due {}", job.id, job.tag, job.due.to_rfc3339());
            Ok(())
        }

        Commands::Jobs { tag } => {
            let store = open_store(&cli.database, store_config)?;
            match tag {
                Some(tag) => {
                    let jobs = store
                        .list_by_tag(&tag)
                        .map_err(|e| miette::miette!("failed to list jobs: {}", e))?;
                    for job in jobs {
                        println!(
                            "{:>6}  {:<9}  {}  {}  {}",
                            job.id,
                            job.state().to_string(),
                            job.due.to_rfc3339(),
                            job.job_type,
                            job.result.map(|r| r.to_string()).unwrap_or_default()
                        );
                    }
                }
                None => {
                    let pending = store
                        .get_total_pending()
                        .map_err(|e| miette::miette!("failed to count jobs: {}", e))?;
                    println!("pending: {pending}");
                    let next = store
                        .get_next_pending()
                        .map_err(|e| miette::miette!("failed to read jobs: {}", e))?;
                    if let Some(job) = next {
                        println!(
                            "next: {} ({}, {}) due {}",
                            job.id,
                            job.tag,
                            job.job_type,
                            job.due.to_rfc3339()
                        );
                    }
                }
            }
            Ok(())
        }

        Commands::Gc => {
            let store = open_store(&cli.database, store_config)?;
            let removed = store
                .remove_old_jobs(&[])
                .map_err(|e| miette::miette!("failed to remove old jobs: {}", e))?;
            println!("removed {removed} jobs");
            Ok(())
        }
    }
}

fn open_store(path: &std::path::Path, config: StoreConfig) -> Result<JobStore> {
    JobStore::open(path, config).map_err(|e| miette::miette!("failed to open job store: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn submit_arguments_parse() {
        let cli = Cli::try_parse_from([
            "hearth",
            "--database",
            "/tmp/jobs.db",
            "submit",
            "--type",
            "send_notification",
            "--user",
            "3",
            "--data",
            r#"{"message_type":"hi"}"#,
            "--retry-delay-ms",
            "5000",
        ])
        .unwrap();

        assert_eq!(cli.database, PathBuf::from("/tmp/jobs.db"));
        match cli.command {
            Commands::Submit {
                job_type,
                user,
                retry_delay_ms,
                tag,
                ..
            } => {
                assert_eq!(job_type, "send_notification");
                assert_eq!(user, Some(3));
                assert_eq!(retry_delay_ms, Some(5000));
                assert_eq!(tag, None);
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn run_accepts_cpus_worker_count() {
        let cli = Cli::try_parse_from(["hearth", "run", "--workers", "cpus"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Run {
                workers: WorkerCount::PerCore,
                ..
            }
        ));
    }

    #[test]
    fn delay_and_cron_conflict() {
        let result = Cli::try_parse_from([
            "hearth", "submit", "--type", "x", "--delay-secs", "5", "--cron", "* * * * *",
        ]);
        assert!(result.is_err());
    }
}
