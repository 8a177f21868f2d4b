use advrecon_core::{evaluate_acos, evaluate_spend, evaluate_time_in_budget};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "advrecon-cli")]
#[command(about = "Advertising ticket reconciler")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every reconcile job once.
    Run {
        /// Store id supplied by the caller; checked alongside RECON_STORE_ID.
        #[arg(long)]
        store_id: Option<String>,
    },
    /// Run on the RECON_CRON schedule until interrupted.
    Schedule,
    /// Print the rating a metric change would earn.
    Evaluate {
        #[arg(value_enum)]
        metric: Metric,
        old: f64,
        new: f64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Metric {
    /// Average daily spend.
    Spend,
    /// Percent of time in budget.
    Budget,
    /// Advertising cost of sales, percent.
    Acos,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("advrecon=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run { store_id: None }) {
        Commands::Run { store_id } => {
            let summary = advrecon_sync::run_once_from_env(store_id).await?;
            println!("reconcile complete: {summary}");
            for step in &summary.steps {
                println!("  {:<26} {:?} {}", step.step, step.status, step.detail);
            }
        }
        Commands::Schedule => {
            let Some(mut sched) = advrecon_sync::scheduler_from_env().await? else {
                bail!("scheduler disabled; set RECON_SCHEDULER_ENABLED=true");
            };
            sched.start().await.context("starting scheduler")?;
            tracing::info!("scheduler started; waiting for ctrl-c");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            tracing::info!("shutting down scheduler");
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Evaluate { metric, old, new } => {
            let good = match metric {
                Metric::Spend => evaluate_spend(old, new),
                Metric::Budget => evaluate_time_in_budget(old, new),
                Metric::Acos => evaluate_acos(old, new),
            };
            println!("{}", if good { "good" } else { "bad" });
        }
    }

    Ok(())
}
