use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Explicit `--date` wins; otherwise the current UTC calendar date.
pub fn resolve_target_date(date_arg: Option<&str>, now_utc: DateTime<Utc>) -> anyhow::Result<NaiveDate> {
    if let Some(s) = date_arg {
        return parse_date(s);
    }
    Ok(now_utc.date_naive())
}

pub fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("invalid date {s:?} (expected YYYY-MM-DD): {e}"))
}

pub fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Picks the item whose timestamp is closest to `date` 00:00 UTC and returns it with its absolute
/// offset. Ties go to the earlier item in `items`.
pub fn nearest_to_midnight<T, F>(items: &[T], date: NaiveDate, timestamp: F) -> Option<(&T, Duration)>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    let midnight = midnight_utc(date);
    let mut best: Option<(&T, Duration)> = None;
    for item in items {
        let offset = (timestamp(item) - midnight).abs();
        match best {
            Some((_, best_offset)) if best_offset <= offset => {}
            _ => best = Some((item, offset)),
        }
    }
    best
}

/// Inclusive range of calendar dates.
pub fn dates_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}
