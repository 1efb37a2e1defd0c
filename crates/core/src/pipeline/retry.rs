use super::{build_row, history_days_for, reconcile, JobContext, OutcomeStatus, RunSummary};
use crate::domain::queue::QueueEntry;
use crate::domain::universe::Coin;
use crate::ingest::{FetchError, HistoryPoint};
use crate::storage::{FactStore, MissingQueue};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::Instrument;

/// Re-attempts every entry that was pending when the job started.
///
/// Entries dated today are fetched from the current quote; older dates from history, picking the
/// sample nearest to that day's midnight. A failure bumps the entry's attempt counter and leaves
/// it pending. This job never creates queue entries.
pub async fn run_retry(
    ctx: JobContext<'_>,
    facts: &mut FactStore,
    queue: &mut MissingQueue,
    now: DateTime<Utc>,
) -> anyhow::Result<RunSummary> {
    let mut summary = RunSummary::new("retry", now);
    let span = tracing::info_span!("retry", run_id = %summary.run_id);

    async {
        reconcile(facts, queue)?;

        let snapshot = queue.pending_entries();
        tracing::info!(pending = snapshot.len(), "retry started");

        let today = now.date_naive();
        let mut touched = BTreeSet::new();
        let mut attempted = 0usize;

        for entry in &snapshot {
            let Some(coin) = ctx.universe.get(&entry.id) else {
                summary.record(
                    &entry.id,
                    Some(entry.date),
                    OutcomeStatus::Skipped,
                    Some("not in universe".to_string()),
                );
                continue;
            };
            if entry.date > today {
                summary.record(
                    &entry.id,
                    Some(entry.date),
                    OutcomeStatus::Skipped,
                    Some("date is in the future".to_string()),
                );
                continue;
            }

            ctx.pace(attempted).await;
            attempted += 1;

            match fetch_for_entry(ctx, coin, entry, now).await {
                Ok(point) => {
                    let row = build_row(facts, coin, entry.date, &point, now);
                    facts.append_or_replace([row])?;
                    queue.resolve(&entry.id, entry.date)?;
                    touched.insert(entry.id.clone());
                    summary.record(&entry.id, Some(entry.date), OutcomeStatus::Ok, None);
                }
                Err(err) => {
                    queue.record_failure(&entry.id, entry.date, now, &err.to_string())?;
                    summary.record(&entry.id, Some(entry.date), OutcomeStatus::Failed, Some(err.to_string()));
                }
            }
        }

        let refreshed = facts.recompute_returns(&touched)?;
        tracing::info!(
            resolved = summary.count(OutcomeStatus::Ok),
            still_pending = summary.count(OutcomeStatus::Failed),
            skipped = summary.count(OutcomeStatus::Skipped),
            refreshed,
            "retry finished"
        );
        Ok::<(), anyhow::Error>(())
    }
    .instrument(span)
    .await?;

    Ok(summary)
}

async fn fetch_for_entry(
    ctx: JobContext<'_>,
    coin: &Coin,
    entry: &QueueEntry,
    now: DateTime<Utc>,
) -> Result<HistoryPoint, FetchError> {
    let today = now.date_naive();
    if entry.date == today {
        let snapshot = ctx.client.fetch_current(&coin.id).await?;
        return snapshot
            .as_point(now)
            .ok_or_else(|| FetchError::Decode(format!("{} quote is missing market fields", coin.id)));
    }

    let days = history_days_for(today, entry.date, ctx.settings.retry_history_days);
    ctx.fetch_midnight_point(&coin.id, entry.date, days).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::retry::testing::RecordingSleeper;
    use crate::ingest::MarketSnapshot;
    use crate::pipeline::testing::{hourly, settings, stores, universe, ScriptedClient};
    use chrono::{NaiveDate, TimeZone};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, day).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 10, 6, 0, 0).unwrap()
    }

    /// Exactly one of {fact row, pending entry} holds for every key.
    fn assert_complementary(facts: &FactStore, queue: &MissingQueue, keys: &[(&str, NaiveDate)]) {
        for &(id, date) in keys {
            let has_row = facts.contains(id, date);
            let pending = queue.is_pending(id, date);
            assert!(has_row ^ pending, "{id} {date}: row={has_row} pending={pending}");
        }
    }

    fn history(client: &ScriptedClient, id: &str) {
        let from = Utc.with_ymd_and_hms(2025, 11, 30, 0, 0, 0).unwrap();
        client.always_history(id, hourly(from, now(), |ts| 50.0 + (ts - from).num_hours() as f64));
    }

    #[tokio::test]
    async fn entry_resolves_after_the_nth_run() {
        let dir = tempfile::tempdir().unwrap();
        let (mut facts, mut queue) = stores(&dir);
        let u = universe(&["bitcoin"]);
        let client = ScriptedClient::default();
        client.push_history("bitcoin", Err(FetchError::RateLimited));
        client.push_history("bitcoin", Err(FetchError::Timeout));
        history(&client, "bitcoin");
        let sleeper = RecordingSleeper::default();
        let s = settings();
        let ctx = JobContext { client: &client, sleeper: &sleeper, universe: &u, settings: &s };

        queue.enqueue("bitcoin", d(4), now(), "rate limited").unwrap();

        let first = run_retry(ctx, &mut facts, &mut queue, now()).await.unwrap();
        assert_complementary(&facts, &queue, &[("bitcoin", d(4))]);
        assert_eq!(first.count(OutcomeStatus::Failed), 1);
        assert!(queue.is_pending("bitcoin", d(4)));
        assert_eq!(queue.get("bitcoin", d(4)).unwrap().attempts, 2);

        run_retry(ctx, &mut facts, &mut queue, now()).await.unwrap();
        assert_complementary(&facts, &queue, &[("bitcoin", d(4))]);
        assert!(queue.is_pending("bitcoin", d(4)));
        assert!(facts.is_empty());

        let third = run_retry(ctx, &mut facts, &mut queue, now()).await.unwrap();
        assert_complementary(&facts, &queue, &[("bitcoin", d(4))]);
        assert_eq!(third.count(OutcomeStatus::Ok), 1);
        assert!(!queue.is_pending("bitcoin", d(4)));
        assert_eq!(facts.len(), 1);

        // Midnight of 2025-12-04 is 96 hours after the first sample.
        assert_eq!(facts.get("bitcoin", d(4)).unwrap().current_price, 146.0);

        let fourth = run_retry(ctx, &mut facts, &mut queue, now()).await.unwrap();
        assert_complementary(&facts, &queue, &[("bitcoin", d(4))]);
        assert!(fourth.outcomes.is_empty());
        assert_eq!(facts.len(), 1);

        // 2025-12-04 is six days back, so the window is the configured minimum.
        assert!(client.calls().iter().all(|(_, _, days)| *days == Some(10)));
    }

    #[tokio::test]
    async fn todays_entries_use_the_current_quote() {
        let dir = tempfile::tempdir().unwrap();
        let (mut facts, mut queue) = stores(&dir);
        let u = universe(&["ethereum"]);
        let client = ScriptedClient::default();
        client.push_current(
            "ethereum",
            Ok(MarketSnapshot {
                id: "ethereum".to_string(),
                symbol: "eth".to_string(),
                name: "Ethereum".to_string(),
                current_price: Some(3100.0),
                market_cap: Some(3.7e11),
                total_volume: Some(2.0e10),
                last_updated: Some(Utc.with_ymd_and_hms(2025, 12, 10, 5, 59, 0).unwrap()),
            }),
        );
        let sleeper = RecordingSleeper::default();
        let s = settings();
        let ctx = JobContext { client: &client, sleeper: &sleeper, universe: &u, settings: &s };

        queue.enqueue("ethereum", d(10), now(), "timeout").unwrap();
        run_retry(ctx, &mut facts, &mut queue, now()).await.unwrap();
        assert_complementary(&facts, &queue, &[("ethereum", d(10))]);

        let row = facts.get("ethereum", d(10)).unwrap();
        assert_eq!(row.current_price, 3100.0);
        assert_eq!(row.symbol, "eth");
        assert_eq!(client.calls()[0].0, "current");
        assert!(queue.pending_entries().is_empty());
    }

    #[tokio::test]
    async fn entries_outside_the_universe_stay_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (mut facts, mut queue) = stores(&dir);
        let u = universe(&["bitcoin"]);
        let client = ScriptedClient::default();
        let sleeper = RecordingSleeper::default();
        let s = settings();
        let ctx = JobContext { client: &client, sleeper: &sleeper, universe: &u, settings: &s };

        queue.enqueue("dogecoin", d(4), now(), "e").unwrap();
        let summary = run_retry(ctx, &mut facts, &mut queue, now()).await.unwrap();
        assert_complementary(&facts, &queue, &[("dogecoin", d(4))]);

        assert_eq!(summary.count(OutcomeStatus::Skipped), 1);
        assert!(queue.is_pending("dogecoin", d(4)));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn queued_keys_that_already_have_rows_are_reconciled() {
        let dir = tempfile::tempdir().unwrap();
        let (mut facts, mut queue) = stores(&dir);
        let u = universe(&["bitcoin"]);
        let client = ScriptedClient::default();
        history(&client, "bitcoin");
        let sleeper = RecordingSleeper::default();
        let s = settings();
        let ctx = JobContext { client: &client, sleeper: &sleeper, universe: &u, settings: &s };

        queue.enqueue("bitcoin", d(4), now(), "e").unwrap();
        run_retry(ctx, &mut facts, &mut queue, now()).await.unwrap();
        assert_complementary(&facts, &queue, &[("bitcoin", d(4))]);
        // Simulate an interrupted run that wrote the row but not the resolution.
        queue.enqueue("bitcoin", d(4), now(), "e").unwrap();
        assert!(queue.is_pending("bitcoin", d(4)));

        let summary = run_retry(ctx, &mut facts, &mut queue, now()).await.unwrap();
        assert_complementary(&facts, &queue, &[("bitcoin", d(4))]);
        assert!(summary.outcomes.is_empty());
        assert!(!queue.is_pending("bitcoin", d(4)));
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn mixed_queue_stays_complementary_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let (mut facts, mut queue) = stores(&dir);
        let u = universe(&["bitcoin", "ethereum", "solana"]);
        let client = ScriptedClient::default();
        history(&client, "bitcoin");
        client.push_history("ethereum", Err(FetchError::RateLimited));
        history(&client, "ethereum");
        let sleeper = RecordingSleeper::default();
        let s = settings();
        let ctx = JobContext { client: &client, sleeper: &sleeper, universe: &u, settings: &s };

        let keys = [("bitcoin", d(4)), ("ethereum", d(4)), ("solana", d(5))];
        for (id, date) in keys {
            queue.enqueue(id, date, now(), "e").unwrap();
        }

        for _ in 0..3 {
            run_retry(ctx, &mut facts, &mut queue, now()).await.unwrap();
            let reopened = MissingQueue::open(queue.path()).unwrap();
            assert_complementary(&facts, &reopened, &keys);
        }

        assert!(facts.contains("bitcoin", d(4)));
        assert!(facts.contains("ethereum", d(4)));
        assert!(queue.is_pending("solana", d(5)));
        assert_eq!(queue.get("solana", d(5)).unwrap().attempts, 4);
    }

    #[tokio::test]
    async fn older_dates_widen_the_history_window() {
        let dir = tempfile::tempdir().unwrap();
        let (mut facts, mut queue) = stores(&dir);
        let u = universe(&["bitcoin"]);
        let client = ScriptedClient::default();
        let sleeper = RecordingSleeper::default();
        let s = settings();
        let ctx = JobContext { client: &client, sleeper: &sleeper, universe: &u, settings: &s };

        queue
            .enqueue("bitcoin", NaiveDate::from_ymd_opt(2025, 11, 20).unwrap(), now(), "e")
            .unwrap();
        run_retry(ctx, &mut facts, &mut queue, now()).await.unwrap();

        assert_eq!(client.calls()[0].2, Some(22));
    }
}
