use crate::domain::fact::{FactKey, FactRow, FACT_COLUMNS};
use crate::returns::{daily_trailing_returns, TrailingReturns};
use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    pub inserted: usize,
    pub replaced: usize,
}

/// The fact table: at most one row per (coin, date), persisted as CSV.
///
/// Every mutating call rewrites the backing file before returning, so each call is an independent
/// durable unit. There is no transaction spanning several calls.
#[derive(Debug)]
pub struct FactStore {
    path: PathBuf,
    rows: BTreeMap<FactKey, FactRow>,
}

impl FactStore {
    /// Loads the table at `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let loaded: Vec<FactRow> = super::read_table(&path, &FACT_COLUMNS)?;

        let total = loaded.len();
        let mut rows = BTreeMap::new();
        for row in loaded {
            rows.insert(row.key(), row);
        }

        let collapsed = total - rows.len();
        if collapsed > 0 {
            tracing::warn!(
                path = %path.display(),
                collapsed,
                "fact table contained duplicate (id, date) keys; kept the last occurrence"
            );
        }

        tracing::debug!(path = %path.display(), rows = rows.len(), "fact store loaded");
        Ok(Self { path, rows })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: &str, date: NaiveDate) -> Option<&FactRow> {
        self.rows.get(&FactKey {
            date,
            id: id.to_string(),
        })
    }

    pub fn contains(&self, id: &str, date: NaiveDate) -> bool {
        self.get(id, date).is_some()
    }

    /// All rows ordered by date, then coin id.
    pub fn read_all(&self) -> Vec<FactRow> {
        self.rows.values().cloned().collect()
    }

    pub fn entity_ids(&self) -> BTreeSet<String> {
        self.rows.keys().map(|k| k.id.clone()).collect()
    }

    /// (id, date) of every row dated on any of `dates`, ordered by date.
    pub fn keys_on_dates(&self, dates: &BTreeSet<NaiveDate>) -> Vec<(String, NaiveDate)> {
        self.rows
            .keys()
            .filter(|k| dates.contains(&k.date))
            .map(|k| (k.id.clone(), k.date))
            .collect()
    }

    /// Inserts each row, replacing any existing row with the same (id, date).
    pub fn append_or_replace<I>(&mut self, rows: I) -> anyhow::Result<UpsertStats>
    where
        I: IntoIterator<Item = FactRow>,
    {
        let stats = self.upsert_in_memory(rows);
        if stats != UpsertStats::default() {
            self.persist()?;
        }
        Ok(stats)
    }

    /// Removes every row dated on any of `dates`.
    pub fn delete_dates(&mut self, dates: &BTreeSet<NaiveDate>) -> anyhow::Result<usize> {
        let removed = self.delete_in_memory(dates);
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    /// `delete_dates` followed by `append_or_replace`, written to disk once.
    pub fn replace_dates<I>(&mut self, dates: &BTreeSet<NaiveDate>, rows: I) -> anyhow::Result<(usize, UpsertStats)>
    where
        I: IntoIterator<Item = FactRow>,
    {
        let removed = self.delete_in_memory(dates);
        let stats = self.upsert_in_memory(rows);
        self.persist()?;
        Ok((removed, stats))
    }

    /// Ascending (date, price) series for one coin.
    pub fn price_series(&self, id: &str) -> Vec<(NaiveDate, f64)> {
        self.rows
            .values()
            .filter(|r| r.id == id)
            .map(|r| (r.date, r.current_price))
            .collect()
    }

    /// Trailing returns a row for `id` on `date` at `price` would get from the stored history.
    pub fn returns_at(&self, id: &str, date: NaiveDate, price: f64) -> TrailingReturns {
        let mut series: Vec<(NaiveDate, f64)> = [30, 7, 1]
            .into_iter()
            .filter_map(|days| {
                let d = date - Duration::days(days);
                self.get(id, d).map(|r| (d, r.current_price))
            })
            .collect();
        series.push((date, price));

        daily_trailing_returns(&series)
            .ok()
            .and_then(|v| v.last().copied())
            .unwrap_or_default()
    }

    /// Recomputes the return columns of every row of the given coins from the stored prices and
    /// writes the table once. Returns the number of rows whose returns changed.
    pub fn recompute_returns(&mut self, ids: &BTreeSet<String>) -> anyhow::Result<usize> {
        let mut changed = 0usize;
        for id in ids {
            let series = self.price_series(id);
            let returns = daily_trailing_returns(&series)?;
            for ((date, _), r) in series.iter().zip(returns) {
                let key = FactKey {
                    date: *date,
                    id: id.clone(),
                };
                if let Some(row) = self.rows.get_mut(&key) {
                    if row.returns() != r {
                        row.set_returns(r);
                        changed += 1;
                    }
                }
            }
        }

        if changed > 0 {
            self.persist()?;
        }
        Ok(changed)
    }

    fn upsert_in_memory<I>(&mut self, rows: I) -> UpsertStats
    where
        I: IntoIterator<Item = FactRow>,
    {
        let mut stats = UpsertStats::default();
        for row in rows {
            match self.rows.insert(row.key(), row) {
                Some(_) => stats.replaced += 1,
                None => stats.inserted += 1,
            }
        }
        stats
    }

    fn delete_in_memory(&mut self, dates: &BTreeSet<NaiveDate>) -> usize {
        let before = self.rows.len();
        self.rows.retain(|k, _| !dates.contains(&k.date));
        before - self.rows.len()
    }

    fn persist(&self) -> anyhow::Result<()> {
        super::write_table(&self.path, &FACT_COLUMNS, self.rows.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, day).unwrap()
    }

    fn row(id: &str, date: NaiveDate, price: f64) -> FactRow {
        let ts = Utc.with_ymd_and_hms(2025, 12, 10, 0, 5, 0).unwrap();
        FactRow {
            id: id.to_string(),
            symbol: id[..3].to_string(),
            name: id.to_string(),
            date,
            current_price: price,
            market_cap: price * 1000.0,
            total_volume: price * 10.0,
            pct_change_24h: None,
            pct_change_7d: None,
            pct_change_30d: None,
            observed_at_utc: date.and_hms_opt(0, 5, 0).unwrap().and_utc(),
            last_pipeline_run_utc: ts,
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> FactStore {
        FactStore::open(dir.path().join("data").join("coingecko_markets.csv")).unwrap()
    }

    #[test]
    fn same_key_is_replaced_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);

        let first = store.append_or_replace([row("bitcoin", d(4), 1.0)]).unwrap();
        let second = store
            .append_or_replace([row("bitcoin", d(4), 2.0), row("ethereum", d(4), 3.0)])
            .unwrap();

        assert_eq!(first, UpsertStats { inserted: 1, replaced: 0 });
        assert_eq!(second, UpsertStats { inserted: 1, replaced: 1 });
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("bitcoin", d(4)).unwrap().current_price, 2.0);
    }

    #[test]
    fn round_trips_through_the_file_with_fixed_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let mut r = row("bitcoin", d(5), 91000.5);
        r.pct_change_24h = Some(1.25);
        store.append_or_replace([r.clone(), row("ethereum", d(4), 3000.0)]).unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, FACT_COLUMNS.join(","));

        let reopened = FactStore::open(store.path()).unwrap();
        assert_eq!(reopened.len(), 2);
        let back = reopened.get("bitcoin", d(5)).unwrap();
        assert_eq!(back, &r);
        assert_eq!(back.pct_change_7d, None);

        // Ordered by date, then id.
        let all = reopened.read_all();
        assert_eq!(all[0].id, "ethereum");
        assert_eq!(all[1].id, "bitcoin");
    }

    #[test]
    fn rejects_unexpected_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.csv");
        std::fs::write(&path, "id,date,current_price\nbitcoin,2025-12-04,1.0\n").unwrap();

        let err = FactStore::open(&path).unwrap_err();
        assert!(err.to_string().contains("unexpected columns"));
    }

    #[test]
    fn duplicate_keys_on_disk_collapse_to_last() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.csv");
        let rows = vec![row("bitcoin", d(4), 1.0), row("bitcoin", d(4), 2.0)];
        crate::storage::write_table(&path, &FACT_COLUMNS, rows.iter()).unwrap();

        let store = FactStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("bitcoin", d(4)).unwrap().current_price, 2.0);
    }

    #[test]
    fn empty_store_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.append_or_replace([row("bitcoin", d(4), 1.0)]).unwrap();
        store.delete_dates(&BTreeSet::from([d(4)])).unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(text.trim_end(), FACT_COLUMNS.join(","));
        assert!(FactStore::open(store.path()).unwrap().is_empty());
    }

    #[test]
    fn delete_dates_only_touches_targets() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store
            .append_or_replace([
                row("bitcoin", d(3), 1.0),
                row("bitcoin", d(4), 1.0),
                row("ethereum", d(4), 1.0),
                row("ethereum", d(5), 1.0),
            ])
            .unwrap();

        assert_eq!(
            store.keys_on_dates(&BTreeSet::from([d(4), d(9)])),
            vec![("bitcoin".to_string(), d(4)), ("ethereum".to_string(), d(4))]
        );

        let removed = store.delete_dates(&BTreeSet::from([d(4), d(9)])).unwrap();
        assert_eq!(removed, 2);
        assert!(store.contains("bitcoin", d(3)));
        assert!(store.contains("ethereum", d(5)));
        assert!(!store.contains("ethereum", d(4)));
    }

    #[test]
    fn returns_look_back_by_calendar_day() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store
            .append_or_replace([row("bitcoin", d(1), 100.0), row("bitcoin", d(7), 110.0)])
            .unwrap();

        let r = store.returns_at("bitcoin", d(8), 121.0);
        assert!((r.pct_24h.unwrap() - 10.0).abs() < 1e-9);
        assert!((r.pct_7d.unwrap() - 21.0).abs() < 1e-9);
        assert_eq!(r.pct_30d, None);
    }

    #[test]
    fn recompute_fixes_rows_after_a_filled_gap() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store
            .append_or_replace([row("bitcoin", d(1), 100.0), row("bitcoin", d(3), 121.0)])
            .unwrap();
        store.recompute_returns(&BTreeSet::from(["bitcoin".to_string()])).unwrap();
        assert_eq!(store.get("bitcoin", d(3)).unwrap().pct_change_24h, None);

        store.append_or_replace([row("bitcoin", d(2), 110.0)]).unwrap();
        let changed = store
            .recompute_returns(&BTreeSet::from(["bitcoin".to_string()]))
            .unwrap();

        assert_eq!(changed, 2);
        let after = FactStore::open(store.path()).unwrap();
        assert!((after.get("bitcoin", d(3)).unwrap().pct_change_24h.unwrap() - 10.0).abs() < 1e-9);
        assert!((after.get("bitcoin", d(2)).unwrap().pct_change_24h.unwrap() - 10.0).abs() < 1e-9);
    }
}
