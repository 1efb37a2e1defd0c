use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of `/coins/markets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub total_volume: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl MarketSnapshot {
    /// The snapshot as a sample, or `None` when the API left a market field empty.
    /// `observed_at` stands in for a missing `last_updated`.
    pub fn as_point(&self, observed_at: DateTime<Utc>) -> Option<HistoryPoint> {
        Some(HistoryPoint {
            timestamp: self.last_updated.unwrap_or(observed_at),
            price: self.current_price?,
            market_cap: self.market_cap?,
            total_volume: self.total_volume?,
        })
    }
}

/// A single sub-daily (or daily, for long windows) sample from `/coins/{id}/market_chart`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub market_cap: f64,
    pub total_volume: f64,
}

/// Raw `/coins/{id}/market_chart` body: three parallel `[timestamp_ms, value]` series.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketChartResponse {
    pub prices: Vec<[f64; 2]>,
    pub market_caps: Vec<[f64; 2]>,
    pub total_volumes: Vec<[f64; 2]>,
}

impl MarketChartResponse {
    /// Inner-joins the three series on timestamp and returns the points in ascending time order.
    /// Samples whose timestamp appears in only some of the series are dropped.
    pub fn into_points(self) -> Vec<HistoryPoint> {
        use std::collections::BTreeMap;

        let mut caps = BTreeMap::new();
        for [ts, v] in self.market_caps {
            caps.insert(ts as i64, v);
        }
        let mut vols = BTreeMap::new();
        for [ts, v] in self.total_volumes {
            vols.insert(ts as i64, v);
        }

        let mut out: Vec<HistoryPoint> = self
            .prices
            .into_iter()
            .filter_map(|[ts, price]| {
                let ms = ts as i64;
                let market_cap = *caps.get(&ms)?;
                let total_volume = *vols.get(&ms)?;
                let timestamp = DateTime::<Utc>::from_timestamp_millis(ms)?;
                Some(HistoryPoint {
                    timestamp,
                    price,
                    market_cap,
                    total_volume,
                })
            })
            .collect();

        out.sort_by_key(|p| p.timestamp);
        out.dedup_by_key(|p| p.timestamp);
        out
    }
}
