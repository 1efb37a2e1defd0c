use anyhow::Context;
use clap::{Parser, Subcommand};
use coindaily_core::config::Settings;
use coindaily_core::domain::universe::Universe;
use coindaily_core::ingest::{CoinGeckoClient, TokioSleeper};
use coindaily_core::pipeline::{self, DailyOptions, JobContext, SeedOptions};
use coindaily_core::storage::{FactStore, MissingQueue};
use coindaily_core::time::utc_day;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod summary;

#[derive(Debug, Parser)]
#[command(name = "coindaily_worker", about = "Daily crypto market snapshot pipeline")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch one row per universe coin for a UTC date and queue the failures.
    Daily {
        /// UTC date (YYYY-MM-DD). Defaults to today's UTC date.
        #[arg(long)]
        date: Option<String>,

        /// Do not refetch coins that already have a row for the date.
        #[arg(long)]
        skip_existing: bool,
    },

    /// Re-attempt every pending entry of the missing queue.
    Retry,

    /// Replace the rows of the given past dates with samples nearest to UTC midnight.
    Backfill {
        /// Comma-separated UTC dates (YYYY-MM-DD).
        #[arg(long, value_delimiter = ',', required = true)]
        date: Vec<String>,
    },

    /// Create the initial history from up to N days of daily samples.
    Seed {
        #[arg(long, default_value_t = 365)]
        days: u32,

        /// Comma-separated coin ids to seed instead of the whole universe.
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
    },

    /// Recompute the 24h/7d/30d return columns for every coin.
    RecomputeReturns,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    if let Err(err) = run(args.command, &settings).await {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %format!("{err:#}"), "pipeline run aborted");
        return Err(err);
    }
    Ok(())
}

async fn run(command: Command, settings: &Settings) -> anyhow::Result<()> {
    let now = chrono::Utc::now();

    let mut facts = FactStore::open(&settings.fact_store_path)
        .with_context(|| format!("load fact store {} failed", settings.fact_store_path.display()))?;

    let universe = Universe::from_path(&settings.universe_path)?;
    let mut queue = MissingQueue::open(&settings.missing_queue_path)
        .with_context(|| format!("load missing queue {} failed", settings.missing_queue_path.display()))?;

    let sleeper = Arc::new(TokioSleeper);
    let client = CoinGeckoClient::from_settings(settings, sleeper.clone())?;
    let ctx = JobContext {
        client: &client,
        sleeper: sleeper.as_ref(),
        universe: &universe,
        settings,
    };

    tracing::info!(
        coins = universe.len(),
        pinned_on = %universe.pinned_on(),
        facts = facts.len(),
        pending = queue.pending_entries().len(),
        "stores loaded"
    );

    let summary = match command {
        Command::Daily { date, skip_existing } => {
            let target_date = utc_day::resolve_target_date(date.as_deref(), now)?;
            let opts = DailyOptions {
                target_date,
                skip_existing,
            };
            pipeline::run_daily(ctx, &mut facts, &mut queue, opts, now).await?
        }
        Command::Retry => pipeline::run_retry(ctx, &mut facts, &mut queue, now).await?,
        Command::Backfill { date } => {
            let dates = date
                .iter()
                .map(|s| utc_day::parse_date(s))
                .collect::<anyhow::Result<BTreeSet<_>>>()?;
            pipeline::run_backfill(ctx, &mut facts, &mut queue, &dates, now).await?
        }
        Command::Seed { days, only } => {
            let opts = SeedOptions { days, only };
            pipeline::run_seed(ctx, &mut facts, &mut queue, &opts, now).await?
        }
        Command::RecomputeReturns => {
            pipeline::run_recompute_returns(&mut facts)?;
            return Ok(());
        }
    };

    summary::log(&summary);
    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
