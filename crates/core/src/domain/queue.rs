use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const QUEUE_COLUMNS: [&str; 7] = [
    "id",
    "date",
    "first_failure_utc",
    "resolved",
    "attempts",
    "last_attempt_utc",
    "last_error",
];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueKey {
    pub id: String,
    pub date: NaiveDate,
}

/// A (coin, date) pair that could not be ingested. Field order matches [`QUEUE_COLUMNS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub date: NaiveDate,
    pub first_failure_utc: DateTime<Utc>,
    pub resolved: bool,
    pub attempts: u32,
    pub last_attempt_utc: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl QueueEntry {
    pub fn key(&self) -> QueueKey {
        QueueKey {
            id: self.id.clone(),
            date: self.date,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.resolved
    }
}
