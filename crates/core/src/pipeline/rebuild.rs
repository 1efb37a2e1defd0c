use crate::storage::FactStore;

/// Recomputes the return columns of every coin in the fact table. Returns the number of rows that
/// changed.
pub fn run_recompute_returns(facts: &mut FactStore) -> anyhow::Result<usize> {
    let ids = facts.entity_ids();
    let changed = facts.recompute_returns(&ids)?;
    tracing::info!(coins = ids.len(), rows = facts.len(), changed, "returns recomputed");
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fact::FactRow;
    use chrono::{NaiveDate, Utc};

    fn row(id: &str, day: u32, price: f64, stale: Option<f64>) -> FactRow {
        let date = NaiveDate::from_ymd_opt(2025, 12, day).unwrap();
        FactRow {
            id: id.to_string(),
            symbol: id.to_string(),
            name: id.to_string(),
            date,
            current_price: price,
            market_cap: 0.0,
            total_volume: 0.0,
            pct_change_24h: stale,
            pct_change_7d: stale,
            pct_change_30d: stale,
            observed_at_utc: date.and_hms_opt(0, 0, 0).unwrap().and_utc(),
            last_pipeline_run_utc: Utc::now(),
        }
    }

    #[test]
    fn returns_are_computed_per_coin() {
        let dir = tempfile::tempdir().unwrap();
        let mut facts = FactStore::open(dir.path().join("facts.csv")).unwrap();
        facts
            .append_or_replace([
                row("bitcoin", 1, 100.0, Some(99.0)),
                row("ethereum", 1, 1.0, None),
                row("bitcoin", 2, 110.0, Some(99.0)),
                row("ethereum", 2, 2.0, None),
                row("bitcoin", 3, 121.0, None),
            ])
            .unwrap();

        run_recompute_returns(&mut facts).unwrap();

        let btc: Vec<_> = facts
            .read_all()
            .into_iter()
            .filter(|r| r.id == "bitcoin")
            .map(|r| r.pct_change_24h)
            .collect();
        assert_eq!(btc[0], None);
        assert!((btc[1].unwrap() - 10.0).abs() < 1e-9);
        assert!((btc[2].unwrap() - 10.0).abs() < 1e-9);

        let eth = facts
            .get("ethereum", NaiveDate::from_ymd_opt(2025, 12, 2).unwrap())
            .unwrap();
        assert!((eth.pct_change_24h.unwrap() - 100.0).abs() < 1e-9);
        assert_eq!(eth.pct_change_7d, None);
    }
}
