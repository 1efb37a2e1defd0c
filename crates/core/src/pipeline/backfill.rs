use super::{build_row, select_midnight, JobContext, OutcomeStatus, RunSummary};
use crate::storage::{FactStore, MissingQueue};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;
use tracing::Instrument;

/// Sub-daily samples are only served for windows up to this many days.
pub const MAX_SUBDAILY_WINDOW_DAYS: u32 = 90;

/// Replaces the fact rows of the named dates with samples nearest to each date's UTC midnight.
///
/// All coins are fetched before anything is written. The target dates are then cleared and the
/// fetched rows inserted in one write. Keys that could not be fetched are queued so the retry job
/// can restore them. Rows of coins outside the universe are removed too and reported as skipped.
/// When nothing at all could be fetched the store is left untouched and an error is returned.
pub async fn run_backfill(
    ctx: JobContext<'_>,
    facts: &mut FactStore,
    queue: &mut MissingQueue,
    dates: &BTreeSet<NaiveDate>,
    now: DateTime<Utc>,
) -> anyhow::Result<RunSummary> {
    let mut summary = RunSummary::new("backfill", now);
    let span = tracing::info_span!("backfill", run_id = %summary.run_id, dates = dates.len());

    async {
        let today = now.date_naive();
        let (Some(&first), Some(&last)) = (dates.first(), dates.last()) else {
            anyhow::bail!("backfill needs at least one target date");
        };
        anyhow::ensure!(last <= today, "backfill date {last} is after the current UTC date {today}");

        let back = (today - first).num_days() as u32 + 2;
        let days = back.max(ctx.settings.backfill_history_days);
        anyhow::ensure!(
            days <= MAX_SUBDAILY_WINDOW_DAYS,
            "backfill window of {days} days exceeds {MAX_SUBDAILY_WINDOW_DAYS}; the API would only return daily samples"
        );

        tracing::info!(coins = ctx.universe.len(), days, first = %first, last = %last, "backfill started");

        let mut rows = Vec::new();
        let mut failed = Vec::new();

        for (idx, coin) in ctx.universe.coins().iter().enumerate() {
            ctx.pace(idx).await;

            let points = match ctx.client.fetch_history(&coin.id, days).await {
                Ok(points) => points,
                Err(err) => {
                    for &date in dates {
                        summary.record(&coin.id, Some(date), OutcomeStatus::Failed, Some(err.to_string()));
                        failed.push((coin.id.clone(), date, err.to_string()));
                    }
                    continue;
                }
            };

            for &date in dates {
                match select_midnight(&points, date, ctx.settings.max_midnight_offset) {
                    Ok(point) => {
                        tracing::debug!(
                            coin_id = %coin.id,
                            %date,
                            observed_at = %point.timestamp,
                            "selected sample nearest to midnight"
                        );
                        rows.push(build_row(facts, coin, date, &point, now));
                        summary.record(&coin.id, Some(date), OutcomeStatus::Ok, None);
                    }
                    Err(err) => {
                        summary.record(&coin.id, Some(date), OutcomeStatus::Failed, Some(err.to_string()));
                        failed.push((coin.id.clone(), date, err.to_string()));
                    }
                }
            }
        }

        if rows.is_empty() {
            anyhow::bail!("backfill fetched no replacement rows; fact store left unchanged");
        }

        for (id, date) in facts.keys_on_dates(dates) {
            if ctx.universe.get(&id).is_none() {
                tracing::warn!(coin_id = %id, %date, "removing row of a coin outside the universe");
                summary.record(&id, Some(date), OutcomeStatus::Skipped, Some("removed; not in universe".to_string()));
            }
        }

        let written: Vec<(String, NaiveDate)> = rows.iter().map(|r| (r.id.clone(), r.date)).collect();
        let (removed, stats) = facts.replace_dates(dates, rows)?;
        tracing::info!(removed, inserted = stats.inserted, "target dates replaced");

        for (id, date) in &written {
            queue.resolve(id, *date)?;
        }
        for (id, date, err) in &failed {
            queue.enqueue(id, *date, now, err)?;
        }

        let ids = facts.entity_ids();
        let refreshed = facts.recompute_returns(&ids)?;
        tracing::info!(
            ok = summary.count(OutcomeStatus::Ok),
            failed = summary.count(OutcomeStatus::Failed),
            dropped = summary.count(OutcomeStatus::Skipped),
            refreshed,
            "backfill finished"
        );
        Ok::<(), anyhow::Error>(())
    }
    .instrument(span)
    .await?;

    Ok(summary)
}
