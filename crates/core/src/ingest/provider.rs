use crate::config::Settings;
use crate::ingest::error::FetchError;
use crate::ingest::retry::{with_retry, RetryPolicy, Sleeper};
use crate::ingest::types::{HistoryPoint, MarketChartResponse, MarketSnapshot};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use std::sync::Arc;

const API_KEY_HEADER: &str = "x-cg-demo-api-key";

/// Query surface of the external market data API.
#[async_trait::async_trait]
pub trait MarketDataClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Latest snapshot for one coin.
    async fn fetch_current(&self, coin_id: &str) -> Result<MarketSnapshot, FetchError>;

    /// Time-ascending samples covering the last `days` days. Windows up to 90 days come back at
    /// sub-daily resolution; longer windows are daily.
    async fn fetch_history(&self, coin_id: &str, days: u32) -> Result<Vec<HistoryPoint>, FetchError>;
}

#[derive(Clone)]
pub struct CoinGeckoClient {
    http: reqwest::Client,
    base_url: String,
    vs_currency: String,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for CoinGeckoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinGeckoClient")
            .field("base_url", &self.base_url)
            .field("vs_currency", &self.vs_currency)
            .field("retry", &self.retry)
            .finish()
    }
}

impl CoinGeckoClient {
    pub fn from_settings(settings: &Settings, sleeper: Arc<dyn Sleeper>) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("application/json"));
        if let Some(api_key) = settings.coingecko_api_key.as_deref() {
            headers.insert(
                API_KEY_HEADER,
                HeaderValue::from_str(api_key).context("COINGECKO_API_KEY is not a valid header value")?,
            );
        }

        let http = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .default_headers(headers)
            .build()
            .context("failed to build market data http client")?;

        Ok(Self {
            http,
            base_url: settings.coingecko_base_url.trim_end_matches('/').to_string(),
            vs_currency: settings.vs_currency.clone(),
            retry: settings.retry,
            sleeper,
        })
    }

    async fn get_once<T: DeserializeOwned + Send>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let res = self.http.get(url).query(query).send().await?;

        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(FetchError::from_status(status, &text));
        }

        serde_json::from_str::<T>(&text).map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn get_with_retry<T: DeserializeOwned + Send>(
        &self,
        label: &str,
        url: String,
        query: Vec<(&str, String)>,
    ) -> Result<T, FetchError> {
        with_retry(&self.retry, self.sleeper.as_ref(), label, |_attempt| {
            self.get_once::<T>(&url, &query)
        })
        .await
    }
}

#[async_trait::async_trait]
impl MarketDataClient for CoinGeckoClient {
    fn provider_name(&self) -> &'static str {
        "coingecko"
    }

    async fn fetch_current(&self, coin_id: &str) -> Result<MarketSnapshot, FetchError> {
        let url = format!("{}/coins/markets", self.base_url);
        let query = vec![
            ("vs_currency", self.vs_currency.clone()),
            ("ids", coin_id.to_string()),
            ("sparkline", "false".to_string()),
        ];

        let rows: Vec<MarketSnapshot> = self.get_with_retry("coins/markets", url, query).await?;
        rows.into_iter()
            .find(|r| r.id == coin_id)
            .ok_or_else(|| FetchError::NotFound(coin_id.to_string()))
    }

    async fn fetch_history(&self, coin_id: &str, days: u32) -> Result<Vec<HistoryPoint>, FetchError> {
        let url = format!("{}/coins/{}/market_chart", self.base_url, coin_id);
        let query = vec![
            ("vs_currency", self.vs_currency.clone()),
            ("days", days.to_string()),
        ];

        let chart: MarketChartResponse = self.get_with_retry("coins/market_chart", url, query).await?;
        let points = chart.into_points();
        if points.is_empty() {
            return Err(FetchError::NotFound(coin_id.to_string()));
        }
        Ok(points)
    }
}
