//! Burst advisor CLI
//!
//! Advises whether a batch job should run on the local cluster or burst to
//! the cloud partition, right-sizes resource requests from the user's own
//! history, and emits execution plans for the downstream executor.

mod commands;
mod config;
mod output;

use anyhow::Result;
use asba_lib::budget::{BudgetClient, DEFAULT_TIMEOUT};
use asba_lib::{Advisor, AdvisorError, JobHistoryStore};
use clap::{Parser, Subcommand};
use commands::advise::AdviseOptions;
use commands::burst::BurstOptions;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Decide where a batch job should run: local partition or cloud burst.
#[derive(Parser)]
#[command(name = "asba")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.asba/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (or set ASBA_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a job and print the local-vs-cloud recommendation
    Advise {
        /// Submit script to analyze
        script: PathBuf,
        /// Burst (cloud) partition to compare against
        burst_partition: String,
        /// Target (local) partition; defaults to the script's directive
        #[arg(long, short)]
        target_partition: Option<String>,
        /// Show insights from similar past runs
        #[arg(long)]
        with_history: bool,
        /// Propose right-sized resources and re-score the decision
        #[arg(long, short = 'O')]
        optimize: bool,
        /// Budget account for the optional affordability report
        #[arg(long, short = 'A', env = "ASBA_ACCOUNT")]
        account: Option<String>,
        /// Consult the budget service before recommending the cloud
        #[arg(long)]
        check_budget: bool,
        /// Override the script's node count
        #[arg(long, short = 'N')]
        nodes: Option<u32>,
        /// Override the script's CPUs per task
        #[arg(long, short = 'c')]
        cpus_per_task: Option<u32>,
        /// Override the script's time limit (e.g. 2:00:00)
        #[arg(long)]
        time: Option<String>,
        /// Override the script's memory request (e.g. 64G)
        #[arg(long)]
        mem: Option<String>,
        /// Override the script's generic resources (e.g. gpu:2)
        #[arg(long)]
        gres: Option<String>,
    },

    /// Emit an execution-plan JSON document for the downstream executor
    Plan {
        script: PathBuf,
        burst_partition: String,
        #[arg(long, short)]
        target_partition: Option<String>,
        /// Write the plan here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Advise and, unless told otherwise, hand the plan to the executor
    Burst {
        script: PathBuf,
        burst_partition: String,
        /// Node list passed through to the executor
        node_list: String,
        #[arg(long, short)]
        target_partition: Option<String>,
        /// Print the plan without invoking the executor
        #[arg(long)]
        dry_run: bool,
        /// Executor binary consuming the plan
        #[arg(long, default_value = "aws-slurm-burst")]
        executor: String,
    },

    /// Inspect the job history store
    History {
        /// Show aggregated per-script patterns
        #[arg(long)]
        patterns: bool,
        /// Ingest this many days of accounting history into the store
        #[arg(long)]
        days: Option<u32>,
    },

    /// Summarize efficiency patterns and over-allocation
    Insights,

    /// Classify a script's research domain
    DetectDomain { script: PathBuf },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ASBA_LOG")
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli).await {
        output::print_error(&format!("{err:#}"));
        let code = err
            .downcast_ref::<AdvisorError>()
            .map(AdvisorError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = config::load_settings(cli.config.as_deref())?;
    let user = config::current_user();

    match cli.command {
        Commands::Advise {
            script,
            burst_partition,
            target_partition,
            with_history,
            optimize,
            account,
            check_budget,
            nodes,
            cpus_per_task,
            time,
            mem,
            gres,
        } => {
            let advisor = Advisor::new(settings.clone(), VERSION)?;
            let mut ctx = commands::load_job(&script, target_partition.as_deref())?;
            commands::JobOverrides {
                nodes,
                cpus_per_task,
                time_limit: time,
                memory: mem,
                gres,
            }
            .apply(&mut ctx.job)?;
            let store = open_store_if(&user, with_history || optimize);

            let budget = if check_budget {
                Some(BudgetClient::new(
                    &settings.budget.endpoint,
                    settings.budget.api_key.clone(),
                    budget_timeout(&settings),
                )?)
            } else {
                None
            };

            commands::advise::run(
                &advisor,
                store.as_ref(),
                &ctx,
                &burst_partition,
                budget.as_ref(),
                &AdviseOptions {
                    with_history,
                    optimize,
                    account,
                    check_budget,
                },
            )
            .await?;
        }

        Commands::Plan {
            script,
            burst_partition,
            target_partition,
            output,
        } => {
            let advisor = Advisor::new(settings, VERSION)?;
            let ctx = commands::load_job(&script, target_partition.as_deref())?;
            let store = open_store_if(&user, true);

            commands::plan::run(
                &advisor,
                store.as_ref(),
                &ctx,
                &burst_partition,
                VERSION,
                &user,
                output.as_deref(),
            )
            .await?;
        }

        Commands::Burst {
            script,
            burst_partition,
            node_list,
            target_partition,
            dry_run,
            executor,
        } => {
            let advisor = Advisor::new(settings, VERSION)?;
            let ctx = commands::load_job(&script, target_partition.as_deref())?;
            let store = open_store_if(&user, true);

            commands::burst::run(
                &advisor,
                store.as_ref(),
                &ctx,
                &burst_partition,
                VERSION,
                &user,
                &BurstOptions {
                    node_list,
                    dry_run,
                    executor,
                },
            )
            .await?;
        }

        Commands::History { patterns, days } => {
            let store = JobHistoryStore::open_for_user(&user)?;
            if let Some(days) = days {
                let slurm_timeout =
                    Duration::from_secs(settings.analysis.slurm_timeout_seconds);
                let slurm = asba_lib::slurm::SlurmClient::new(settings.slurm_bin_path.clone())
                    .with_timeout(slurm_timeout);
                commands::history::ingest(&store, &slurm, &user, days).await?;
            } else if patterns {
                commands::history::show_patterns(&store)?;
            } else {
                commands::history::show_stats(&store, &user)?;
            }
        }

        Commands::Insights => {
            let store = JobHistoryStore::open_for_user(&user)?;
            commands::history::show_insights(&store)?;
        }

        Commands::DetectDomain { script } => {
            commands::domain::run(&script)?;
        }
    }

    Ok(())
}

/// Open the per-user store when the command wants history; a store that
/// fails to open degrades the run instead of failing it.
fn open_store_if(user: &str, wanted: bool) -> Option<JobHistoryStore> {
    if !wanted {
        return None;
    }
    match JobHistoryStore::open_for_user(user) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(error = %e, "history store unavailable; continuing without history");
            None
        }
    }
}

fn budget_timeout(settings: &asba_lib::AdvisorSettings) -> Duration {
    let secs = settings.budget.timeout_seconds;
    if secs == 0 {
        DEFAULT_TIMEOUT
    } else {
        Duration::from_secs(secs)
    }
}
