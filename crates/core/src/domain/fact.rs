use crate::domain::universe::Coin;
use crate::ingest::types::HistoryPoint;
use crate::returns::TrailingReturns;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Column order of the fact table file. Downstream dashboards read these names positionally, so
/// any change here is a breaking change of the published dataset.
pub const FACT_COLUMNS: [&str; 12] = [
    "id",
    "symbol",
    "name",
    "date",
    "current_price",
    "market_cap",
    "total_volume",
    "price_change_percentage_24h_in_currency",
    "price_change_percentage_7d_in_currency",
    "price_change_percentage_30d_in_currency",
    "observed_at_utc",
    "last_pipeline_run_utc",
];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FactKey {
    pub date: NaiveDate,
    pub id: String,
}

/// One coin on one UTC calendar date. Field order matches [`FACT_COLUMNS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub date: NaiveDate,
    pub current_price: f64,
    pub market_cap: f64,
    pub total_volume: f64,
    #[serde(rename = "price_change_percentage_24h_in_currency")]
    pub pct_change_24h: Option<f64>,
    #[serde(rename = "price_change_percentage_7d_in_currency")]
    pub pct_change_7d: Option<f64>,
    #[serde(rename = "price_change_percentage_30d_in_currency")]
    pub pct_change_30d: Option<f64>,
    /// Timestamp of the source sample the row was built from.
    pub observed_at_utc: DateTime<Utc>,
    pub last_pipeline_run_utc: DateTime<Utc>,
}

impl FactRow {
    pub fn from_history_point(
        coin: &Coin,
        date: NaiveDate,
        point: &HistoryPoint,
        run_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: coin.id.clone(),
            symbol: coin.symbol.clone(),
            name: coin.name.clone(),
            date,
            current_price: point.price,
            market_cap: point.market_cap,
            total_volume: point.total_volume,
            pct_change_24h: None,
            pct_change_7d: None,
            pct_change_30d: None,
            observed_at_utc: point.timestamp,
            last_pipeline_run_utc: run_at,
        }
    }

    pub fn key(&self) -> FactKey {
        FactKey {
            date: self.date,
            id: self.id.clone(),
        }
    }

    pub fn returns(&self) -> TrailingReturns {
        TrailingReturns {
            pct_24h: self.pct_change_24h,
            pct_7d: self.pct_change_7d,
            pct_30d: self.pct_change_30d,
        }
    }

    pub fn set_returns(&mut self, r: TrailingReturns) {
        self.pct_change_24h = r.pct_24h;
        self.pct_change_7d = r.pct_7d;
        self.pct_change_30d = r.pct_30d;
    }
}
