use chrono::NaiveDate;
use reqwest::StatusCode;

const MAX_BODY_IN_ERROR: usize = 200;

/// Why a single entity fetch failed.
///
/// Only [`FetchError::is_retryable`] variants are retried by the client's backoff loop; everything
/// else surfaces immediately as an entity failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("rate limited by market data API (HTTP 429)")]
    RateLimited,

    #[error("transient HTTP {status}: {body}")]
    TransientHttp { status: u16, body: String },

    #[error("HTTP {status}: {body}")]
    PermanentHttp { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("no market data returned for {0}")]
    NotFound(String),

    #[error("no sample within tolerance of {date} 00:00 UTC (nearest offset: {nearest_offset_secs:?}s)")]
    NoSampleNearMidnight {
        date: NaiveDate,
        nearest_offset_secs: Option<i64>,
    },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited
                | FetchError::TransientHttp { .. }
                | FetchError::Timeout
                | FetchError::Transport(_)
        )
    }

    /// Classifies a non-success HTTP status.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return FetchError::RateLimited;
        }

        let body = truncate(body);
        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            FetchError::TransientHttp {
                status: status.as_u16(),
                body,
            }
        } else {
            FetchError::PermanentHttp {
                status: status.as_u16(),
                body,
            }
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_BODY_IN_ERROR) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
