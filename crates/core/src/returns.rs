//! Trailing percentage-change metrics.
//!
//! Inputs are one entity's prices in ascending time order. Callers are responsible for grouping
//! by entity and sorting; results computed on mixed or unordered input are meaningless.

use chrono::{Duration, NaiveDate};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrailingReturns {
    pub pct_24h: Option<f64>,
    pub pct_7d: Option<f64>,
    pub pct_30d: Option<f64>,
}

/// `(price[i] - price[i - periods]) / price[i - periods] * 100`, `None` for the first `periods`
/// points, or where the base price is zero or the result is not finite.
pub fn pct_change(prices: &[f64], periods: usize) -> Vec<Option<f64>> {
    prices
        .iter()
        .enumerate()
        .map(|(i, &now)| {
            if periods == 0 || i < periods {
                return None;
            }
            pct(now, prices[i - periods])
        })
        .collect()
}

/// Trailing 1/7/30-day returns for each point of a daily series, looking back by calendar date.
///
/// On a gap-free series this is exactly `pct_change` with 1, 7 and 30 periods. When a date is
/// missing from the series, returns that would need it are `None` rather than silently measured
/// over a longer window.
pub fn daily_trailing_returns(series: &[(NaiveDate, f64)]) -> anyhow::Result<Vec<TrailingReturns>> {
    anyhow::ensure!(
        series.windows(2).all(|w| w[0].0 < w[1].0),
        "price series must be strictly ascending by date"
    );

    let lookup = |date: NaiveDate| -> Option<f64> {
        series
            .binary_search_by_key(&date, |(d, _)| *d)
            .ok()
            .map(|idx| series[idx].1)
    };

    Ok(series
        .iter()
        .map(|&(date, price)| {
            let back = |days: i64| lookup(date - Duration::days(days)).and_then(|past| pct(price, past));
            TrailingReturns {
                pct_24h: back(1),
                pct_7d: back(7),
                pct_30d: back(30),
            }
        })
        .collect())
}

fn pct(now: f64, past: f64) -> Option<f64> {
    if past == 0.0 {
        return None;
    }
    let v = (now - past) / past * 100.0;
    v.is_finite().then_some(v)
}
