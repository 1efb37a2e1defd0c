//! Jobs that move data from the market data API into the fact table and missing queue.
//!
//! Every job processes coins strictly one after another. Per-coin fetch failures are recorded in
//! the returned [`RunSummary`] (and, where the job owns them, in the missing queue); only storage
//! failures abort a job.

pub mod backfill;
pub mod daily;
pub mod rebuild;
pub mod retry;
pub mod seed;

pub use backfill::run_backfill;
pub use daily::{run_daily, DailyOptions};
pub use rebuild::run_recompute_returns;
pub use retry::run_retry;
pub use seed::{run_seed, SeedOptions};

use crate::config::Settings;
use crate::domain::fact::FactRow;
use crate::domain::universe::{Coin, Universe};
use crate::ingest::{FetchError, HistoryPoint, MarketDataClient, Sleeper};
use crate::storage::{FactStore, MissingQueue};
use crate::time::utc_day::nearest_to_midnight;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use uuid::Uuid;

/// Collaborators shared by every job. Borrowed for the duration of one run.
#[derive(Clone, Copy)]
pub struct JobContext<'a> {
    pub client: &'a dyn MarketDataClient,
    pub sleeper: &'a dyn Sleeper,
    pub universe: &'a Universe,
    pub settings: &'a Settings,
}

impl<'a> JobContext<'a> {
    /// Waits `REQUEST_DELAY_MS` before every coin except the first.
    pub(crate) async fn pace(&self, index: usize) {
        if index > 0 && !self.settings.request_delay.is_zero() {
            self.sleeper.sleep(self.settings.request_delay).await;
        }
    }

    /// Fetches `days` of history and picks the sample closest to `date` 00:00 UTC.
    pub(crate) async fn fetch_midnight_point(
        &self,
        coin_id: &str,
        date: NaiveDate,
        days: u32,
    ) -> Result<HistoryPoint, FetchError> {
        let points = self.client.fetch_history(coin_id, days).await?;
        select_midnight(&points, date, self.settings.max_midnight_offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Ok,
    Failed,
    Skipped,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutcomeStatus::Ok => "ok",
            OutcomeStatus::Failed => "failed",
            OutcomeStatus::Skipped => "skipped",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityOutcome {
    pub coin_id: String,
    pub date: Option<NaiveDate>,
    pub status: OutcomeStatus,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub job: &'static str,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<EntityOutcome>,
}

impl RunSummary {
    pub(crate) fn new(job: &'static str, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            job,
            started_at,
            outcomes: Vec::new(),
        }
    }

    pub(crate) fn record(
        &mut self,
        coin_id: &str,
        date: Option<NaiveDate>,
        status: OutcomeStatus,
        detail: Option<String>,
    ) {
        match status {
            OutcomeStatus::Ok => tracing::info!(coin_id, date = ?date, detail = ?detail, "entity ok"),
            OutcomeStatus::Failed => tracing::warn!(coin_id, date = ?date, error = ?detail, "entity failed"),
            OutcomeStatus::Skipped => tracing::info!(coin_id, date = ?date, reason = ?detail, "entity skipped"),
        }
        self.outcomes.push(EntityOutcome {
            coin_id: coin_id.to_string(),
            date,
            status,
            detail,
        });
    }

    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntityOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
    }
}

/// Nearest sample to `date` 00:00 UTC, rejected when it is farther away than `tolerance`.
pub fn select_midnight(
    points: &[HistoryPoint],
    date: NaiveDate,
    tolerance: chrono::Duration,
) -> Result<HistoryPoint, FetchError> {
    match nearest_to_midnight(points, date, |p| p.timestamp) {
        Some((point, offset)) if offset <= tolerance => Ok(*point),
        Some((_, offset)) => Err(FetchError::NoSampleNearMidnight {
            date,
            nearest_offset_secs: Some(offset.num_seconds()),
        }),
        None => Err(FetchError::NoSampleNearMidnight {
            date,
            nearest_offset_secs: None,
        }),
    }
}

/// History window (in days) that reaches back far enough to contain `date` 00:00 UTC.
pub(crate) fn history_days_for(today: NaiveDate, date: NaiveDate, minimum: u32) -> u32 {
    let back = (today - date).num_days().max(0) as u32;
    minimum.max(back + 2)
}

/// Fact row for `coin` on `date`, with returns against the stored history.
pub(crate) fn build_row(
    facts: &FactStore,
    coin: &Coin,
    date: NaiveDate,
    point: &HistoryPoint,
    run_at: DateTime<Utc>,
) -> FactRow {
    let mut row = FactRow::from_history_point(coin, date, point, run_at);
    row.set_returns(facts.returns_at(&coin.id, date, point.price));
    row
}

/// Resolves pending queue entries whose fact row already exists.
pub(crate) fn reconcile(facts: &FactStore, queue: &mut MissingQueue) -> anyhow::Result<usize> {
    let mut resolved = 0usize;
    for entry in queue.pending_entries() {
        if facts.contains(&entry.id, entry.date) && queue.resolve(&entry.id, entry.date)? {
            resolved += 1;
        }
    }
    if resolved > 0 {
        tracing::info!(resolved, "resolved queue entries that already had fact rows");
    }
    Ok(resolved)
}
