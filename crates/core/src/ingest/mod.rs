pub mod error;
pub mod provider;
pub mod retry;
pub mod types;

pub use error::FetchError;
pub use provider::{CoinGeckoClient, MarketDataClient};
pub use retry::{BackoffGrowth, RetryPolicy, Sleeper, TokioSleeper};
pub use types::{HistoryPoint, MarketSnapshot};
