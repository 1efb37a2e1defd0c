use super::{build_row, reconcile, select_midnight, JobContext, OutcomeStatus, RunSummary};
use crate::storage::{FactStore, MissingQueue};
use crate::time::utc_day::dates_between;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub days: u32,
    /// Restrict seeding to these coin ids; empty means the whole universe.
    pub only: Vec<String>,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            days: 365,
            only: Vec::new(),
        }
    }
}

/// Builds the initial history: one row per day the fetched window covers, for each coin.
///
/// Failures are reported in the summary only and never queued, so a coin that failed is re-seeded
/// with `only`. Pending entries whose key now has a row are resolved.
pub async fn run_seed(
    ctx: JobContext<'_>,
    facts: &mut FactStore,
    queue: &mut MissingQueue,
    opts: &SeedOptions,
    now: DateTime<Utc>,
) -> anyhow::Result<RunSummary> {
    anyhow::ensure!(opts.days >= 1, "seed needs at least one day of history");

    let universe = if opts.only.is_empty() {
        ctx.universe.clone()
    } else {
        ctx.universe.restrict_to(&opts.only)?
    };

    let mut summary = RunSummary::new("seed", now);
    let span = tracing::info_span!("seed", run_id = %summary.run_id, days = opts.days);

    async {
        tracing::info!(coins = universe.len(), "seed started");
        let today = now.date_naive();
        let mut touched = BTreeSet::new();

        for (idx, coin) in universe.coins().iter().enumerate() {
            ctx.pace(idx).await;

            let points = match ctx.client.fetch_history(&coin.id, opts.days).await {
                Ok(points) => points,
                Err(err) => {
                    summary.record(&coin.id, None, OutcomeStatus::Failed, Some(err.to_string()));
                    continue;
                }
            };

            let (Some(first), Some(last)) = (points.first(), points.last()) else {
                summary.record(&coin.id, None, OutcomeStatus::Failed, Some("empty history".to_string()));
                continue;
            };
            let end = last.timestamp.date_naive().min(today);

            let rows: Vec<_> = dates_between(first.timestamp.date_naive(), end)
                .into_iter()
                .filter_map(|date| {
                    select_midnight(&points, date, ctx.settings.max_midnight_offset)
                        .ok()
                        .map(|p| build_row(facts, coin, date, &p, now))
                })
                .collect();

            if rows.is_empty() {
                summary.record(
                    &coin.id,
                    None,
                    OutcomeStatus::Failed,
                    Some("no sample close enough to any midnight".to_string()),
                );
                continue;
            }

            let count = rows.len();
            let stats = facts.append_or_replace(rows)?;
            touched.insert(coin.id.clone());
            summary.record(
                &coin.id,
                None,
                OutcomeStatus::Ok,
                Some(format!("{count} rows ({} new, {} replaced)", stats.inserted, stats.replaced)),
            );
        }

        let refreshed = facts.recompute_returns(&touched)?;
        let resolved = reconcile(facts, queue)?;
        tracing::info!(
            ok = summary.count(OutcomeStatus::Ok),
            failed = summary.count(OutcomeStatus::Failed),
            refreshed,
            resolved,
            "seed finished"
        );
        Ok::<(), anyhow::Error>(())
    }
    .instrument(span)
    .await?;

    Ok(summary)
}
