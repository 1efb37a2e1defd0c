pub mod domain;
pub mod ingest;
pub mod pipeline;
pub mod returns;
pub mod storage;
pub mod time;

pub mod config {
    use crate::ingest::retry::{BackoffGrowth, RetryPolicy};
    use anyhow::Context;
    use std::path::PathBuf;
    use std::str::FromStr;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub coingecko_base_url: String,
        pub coingecko_api_key: Option<String>,
        pub vs_currency: String,
        pub fact_store_path: PathBuf,
        pub missing_queue_path: PathBuf,
        pub universe_path: PathBuf,
        pub http_timeout: Duration,
        pub retry: RetryPolicy,
        /// Pause between consecutive coins.
        pub request_delay: Duration,
        pub daily_history_days: u32,
        pub retry_history_days: u32,
        pub backfill_history_days: u32,
        /// Samples farther than this from UTC midnight are not accepted as that day's row.
        pub max_midnight_offset: chrono::Duration,
        pub sentry_dsn: Option<String>,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                coingecko_base_url: "https://api.coingecko.com/api/v3".to_string(),
                coingecko_api_key: None,
                vs_currency: "usd".to_string(),
                fact_store_path: PathBuf::from("data/coingecko_markets.csv"),
                missing_queue_path: PathBuf::from("data/missing_queue.csv"),
                universe_path: PathBuf::from("config/universe_top50_dec01_2025.csv"),
                http_timeout: Duration::from_secs(60),
                retry: RetryPolicy::default(),
                request_delay: Duration::from_millis(1500),
                daily_history_days: 5,
                retry_history_days: 10,
                backfill_history_days: 10,
                max_midnight_offset: chrono::Duration::hours(12),
                sentry_dsn: None,
            }
        }
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Self::from_lookup(|key| std::env::var(key).ok())
        }

        /// Builds settings from any key lookup; unset or blank keys keep their default.
        pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
        where
            F: Fn(&str) -> Option<String>,
        {
            let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
            let d = Self::default();

            let retry = RetryPolicy {
                max_attempts: parse_or(&var, "RETRY_MAX_ATTEMPTS", d.retry.max_attempts)?,
                base_delay: Duration::from_millis(parse_or(
                    &var,
                    "RETRY_BASE_DELAY_MS",
                    d.retry.base_delay.as_millis() as u64,
                )?),
                growth: parse_or::<BackoffGrowth, _>(&var, "RETRY_GROWTH", d.retry.growth)?,
            };
            anyhow::ensure!(retry.max_attempts >= 1, "RETRY_MAX_ATTEMPTS must be at least 1");

            let max_offset_hours: i64 =
                parse_or(&var, "MAX_MIDNIGHT_OFFSET_HOURS", d.max_midnight_offset.num_hours())?;
            anyhow::ensure!(
                (0..=48).contains(&max_offset_hours),
                "MAX_MIDNIGHT_OFFSET_HOURS must be between 0 and 48"
            );

            let settings = Self {
                coingecko_base_url: var("COINGECKO_BASE_URL").unwrap_or(d.coingecko_base_url),
                coingecko_api_key: var("COINGECKO_API_KEY"),
                vs_currency: var("VS_CURRENCY").unwrap_or(d.vs_currency).to_lowercase(),
                fact_store_path: var("FACT_STORE_PATH").map(PathBuf::from).unwrap_or(d.fact_store_path),
                missing_queue_path: var("MISSING_QUEUE_PATH").map(PathBuf::from).unwrap_or(d.missing_queue_path),
                universe_path: var("UNIVERSE_PATH").map(PathBuf::from).unwrap_or(d.universe_path),
                http_timeout: Duration::from_secs(parse_or(&var, "HTTP_TIMEOUT_SECS", d.http_timeout.as_secs())?),
                retry,
                request_delay: Duration::from_millis(parse_or(
                    &var,
                    "REQUEST_DELAY_MS",
                    d.request_delay.as_millis() as u64,
                )?),
                daily_history_days: parse_or(&var, "DAILY_HISTORY_DAYS", d.daily_history_days)?,
                retry_history_days: parse_or(&var, "RETRY_HISTORY_DAYS", d.retry_history_days)?,
                backfill_history_days: parse_or(&var, "BACKFILL_HISTORY_DAYS", d.backfill_history_days)?,
                max_midnight_offset: chrono::Duration::hours(max_offset_hours),
                sentry_dsn: var("SENTRY_DSN"),
            };

            anyhow::ensure!(settings.http_timeout > Duration::ZERO, "HTTP_TIMEOUT_SECS must be positive");
            anyhow::ensure!(settings.daily_history_days >= 2, "DAILY_HISTORY_DAYS must be at least 2");
            anyhow::ensure!(settings.retry_history_days >= 2, "RETRY_HISTORY_DAYS must be at least 2");
            anyhow::ensure!(
                (2..=90).contains(&settings.backfill_history_days),
                "BACKFILL_HISTORY_DAYS must be between 2 and 90"
            );
            Ok(settings)
        }
    }

    fn parse_or<T, V>(var: &V, key: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
        V: Fn(&str) -> Option<String>,
    {
        match var(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{e}"))
                .with_context(|| format!("{key} has invalid value {raw:?}")),
        }
    }

}
