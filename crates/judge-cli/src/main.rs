mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "judge")]
#[command(about = "Operator CLI for the judge sandbox cluster", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submission store connectivity and migrations
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Layered language-profile config inspection
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },

    /// Judge worker pool (sandbox slots + dispatch consumers)
    Worker {
        #[command(subcommand)]
        cmd: WorkerCmd,
    },

    /// Transactional outbox publisher
    Outbox {
        #[command(subcommand)]
        cmd: OutboxCmd,
    },

    /// Worker heartbeat staleness reclaim loop
    Reconcile {
        #[command(subcommand)]
        cmd: ReconcileCmd,
    },

    /// Read-only submission inspection
    Submission {
        #[command(subcommand)]
        cmd: SubmissionCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    /// Check connectivity and whether migrations have been applied
    Status,
    /// Apply pending migrations
    Migrate,
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Merge layered YAML files and print the resulting hash + canonical JSON
    Hash {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Merge layered YAML files and validate the resulting language profile registry
    Validate {
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum WorkerCmd {
    /// Boot the worker pool and block until shutdown
    Run {
        /// Layered language-profile config paths, merge order base -> env
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        /// Number of sandbox slots to run; defaults to JUDGE_WORKER_COUNT
        #[arg(long)]
        slots: Option<u32>,

        /// Arm the pool gate immediately instead of booting disarmed
        #[arg(long, default_value_t = false)]
        arm: bool,
    },
}

#[derive(Subcommand)]
enum OutboxCmd {
    /// Run the outbox publisher loop and block until shutdown
    Run {
        /// Stable identifier for this publisher instance, used in logs and claims
        #[arg(long, default_value = "judge-outbox")]
        publisher_id: String,

        /// Rows claimed per poll tick; defaults to JUDGE_OUTBOX_BATCH_SIZE
        #[arg(long)]
        batch_size: Option<u32>,

        /// Poll interval in milliseconds; defaults to JUDGE_OUTBOX_POLL_INTERVAL_MS
        #[arg(long)]
        poll_interval_ms: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ReconcileCmd {
    /// Run the reclaim loop and block until shutdown
    Run {
        /// Heartbeat age past which a worker is considered dead; defaults to JUDGE_WORKER_STALENESS_SECS
        #[arg(long)]
        staleness_secs: Option<u64>,

        /// Interval between reclaim sweeps
        #[arg(long, default_value_t = 15)]
        tick_interval_secs: u64,
    },
}

#[derive(Subcommand)]
enum SubmissionCmd {
    /// Print a submission's verdict, score, and per-test results
    Status {
        id: i64,
    },
    /// List known workers and their current assignment
    Workers,
    /// List outbox rows that have exhausted retries and escalated
    EscalatedOutbox,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => match cmd {
            DbCmd::Status => commands::db::status().await?,
            DbCmd::Migrate => commands::db::migrate().await?,
        },

        Commands::Config { cmd } => match cmd {
            ConfigCmd::Hash { paths } => commands::config::hash(&paths)?,
            ConfigCmd::Validate { paths } => commands::config::validate(&paths)?,
        },

        Commands::Worker { cmd } => match cmd {
            WorkerCmd::Run { config_paths, slots, arm } => {
                commands::worker::run(commands::worker::WorkerRunOpts { config_paths, slots, arm }).await?
            }
        },

        Commands::Outbox { cmd } => match cmd {
            OutboxCmd::Run { publisher_id, batch_size, poll_interval_ms } => {
                commands::outbox::run(commands::outbox::OutboxRunOpts {
                    publisher_id,
                    batch_size,
                    poll_interval_ms,
                })
                .await?
            }
        },

        Commands::Reconcile { cmd } => match cmd {
            ReconcileCmd::Run { staleness_secs, tick_interval_secs } => {
                commands::reconcile::run(commands::reconcile::ReconcileRunOpts {
                    staleness_secs,
                    tick_interval_secs: Some(tick_interval_secs),
                })
                .await?
            }
        },

        Commands::Submission { cmd } => match cmd {
            SubmissionCmd::Status { id } => commands::submission::status(id).await?,
            SubmissionCmd::Workers => commands::submission::workers().await?,
            SubmissionCmd::EscalatedOutbox => commands::submission::escalated_outbox().await?,
        },
    }

    Ok(())
}
