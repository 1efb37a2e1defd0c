use super::{build_row, history_days_for, reconcile, JobContext, OutcomeStatus, RunSummary};
use crate::storage::{FactStore, MissingQueue};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;
use tracing::Instrument;

#[derive(Debug, Clone, Copy)]
pub struct DailyOptions {
    pub target_date: NaiveDate,
    /// Leave coins that already have a row for the target date untouched.
    pub skip_existing: bool,
}

/// Attempts every universe coin once for `target_date`. Successes are upserted into the fact
/// table and clear any queue entry for the key. Failures are queued unless a row for the key
/// already exists, in which case that row is kept.
pub async fn run_daily(
    ctx: JobContext<'_>,
    facts: &mut FactStore,
    queue: &mut MissingQueue,
    opts: DailyOptions,
    now: DateTime<Utc>,
) -> anyhow::Result<RunSummary> {
    let mut summary = RunSummary::new("daily", now);
    let span = tracing::info_span!("daily", run_id = %summary.run_id, date = %opts.target_date);

    async {
        let today = now.date_naive();
        anyhow::ensure!(
            opts.target_date <= today,
            "target date {} is after the current UTC date {today}",
            opts.target_date
        );

        reconcile(facts, queue)?;

        let days = history_days_for(today, opts.target_date, ctx.settings.daily_history_days);
        tracing::info!(
            coins = ctx.universe.len(),
            days,
            provider = ctx.client.provider_name(),
            "daily ingestion started"
        );

        let date = opts.target_date;
        let mut touched = BTreeSet::new();
        let mut attempted = 0usize;

        for coin in ctx.universe.coins() {
            if opts.skip_existing && facts.contains(&coin.id, date) {
                summary.record(&coin.id, Some(date), OutcomeStatus::Skipped, Some("row exists".to_string()));
                continue;
            }

            ctx.pace(attempted).await;
            attempted += 1;

            match ctx.fetch_midnight_point(&coin.id, date, days).await {
                Ok(point) => {
                    let row = build_row(facts, coin, date, &point, now);
                    facts.append_or_replace([row])?;
                    queue.resolve(&coin.id, date)?;
                    touched.insert(coin.id.clone());
                    summary.record(&coin.id, Some(date), OutcomeStatus::Ok, None);
                }
                Err(err) if facts.contains(&coin.id, date) => {
                    // The last good row stays; a queue entry next to it would never be retried.
                    summary.record(
                        &coin.id,
                        Some(date),
                        OutcomeStatus::Failed,
                        Some(format!("kept existing row: {err}")),
                    );
                }
                Err(err) => {
                    queue.enqueue(&coin.id, date, now, &err.to_string())?;
                    summary.record(&coin.id, Some(date), OutcomeStatus::Failed, Some(err.to_string()));
                }
            }
        }

        let refreshed = facts.recompute_returns(&touched)?;
        tracing::info!(
            ok = summary.count(OutcomeStatus::Ok),
            failed = summary.count(OutcomeStatus::Failed),
            skipped = summary.count(OutcomeStatus::Skipped),
            refreshed,
            "daily ingestion finished"
        );
        Ok::<(), anyhow::Error>(())
    }
    .instrument(span)
    .await?;

    Ok(summary)
}
