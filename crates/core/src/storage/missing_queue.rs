use crate::domain::queue::{QueueEntry, QueueKey, QUEUE_COLUMNS};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const MAX_ERROR_LEN: usize = 300;

/// Durable record of (coin, date) pairs that failed to ingest.
///
/// Resolved entries stay in the file with `resolved = true`. Each key appears at most once.
#[derive(Debug)]
pub struct MissingQueue {
    path: PathBuf,
    entries: BTreeMap<QueueKey, QueueEntry>,
}

impl MissingQueue {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let loaded: Vec<QueueEntry> = super::read_table(&path, &QUEUE_COLUMNS)?;

        let mut entries = BTreeMap::new();
        for entry in loaded {
            entries.insert(entry.key(), entry);
        }

        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            pending = entries.values().filter(|e| e.is_pending()).count(),
            "missing queue loaded"
        );
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str, date: NaiveDate) -> Option<&QueueEntry> {
        self.entries.get(&key(id, date))
    }

    pub fn is_pending(&self, id: &str, date: NaiveDate) -> bool {
        self.get(id, date).is_some_and(QueueEntry::is_pending)
    }

    /// Records a failed (id, date).
    ///
    /// Already pending: nothing changes and `false` is returned. Previously resolved: the entry is
    /// reopened with a fresh failure time. Otherwise a new pending entry is added.
    pub fn enqueue(&mut self, id: &str, date: NaiveDate, now: DateTime<Utc>, error: &str) -> anyhow::Result<bool> {
        let k = key(id, date);
        match self.entries.get_mut(&k) {
            Some(entry) if entry.is_pending() => return Ok(false),
            Some(entry) => {
                entry.resolved = false;
                entry.first_failure_utc = now;
                entry.attempts += 1;
                entry.last_attempt_utc = Some(now);
                entry.last_error = Some(clip(error));
                tracing::info!(id, %date, "reopened resolved missing entry");
            }
            None => {
                self.entries.insert(
                    k,
                    QueueEntry {
                        id: id.to_string(),
                        date,
                        first_failure_utc: now,
                        resolved: false,
                        attempts: 1,
                        last_attempt_utc: Some(now),
                        last_error: Some(clip(error)),
                    },
                );
            }
        }

        self.persist()?;
        Ok(true)
    }

    /// Marks (id, date) resolved. Returns `false` when there was no pending entry for it.
    pub fn resolve(&mut self, id: &str, date: NaiveDate) -> anyhow::Result<bool> {
        let Some(entry) = self.entries.get_mut(&key(id, date)) else {
            return Ok(false);
        };
        if entry.resolved {
            return Ok(false);
        }
        entry.resolved = true;

        self.persist()?;
        Ok(true)
    }

    /// Bumps the attempt counter of a pending entry after another failed try.
    pub fn record_failure(&mut self, id: &str, date: NaiveDate, now: DateTime<Utc>, error: &str) -> anyhow::Result<bool> {
        let Some(entry) = self.entries.get_mut(&key(id, date)).filter(|e| e.is_pending()) else {
            return Ok(false);
        };
        entry.attempts += 1;
        entry.last_attempt_utc = Some(now);
        entry.last_error = Some(clip(error));

        self.persist()?;
        Ok(true)
    }

    /// Unresolved entries, oldest failure first.
    pub fn pending_entries(&self) -> Vec<QueueEntry> {
        let mut pending: Vec<QueueEntry> = self
            .entries
            .values()
            .filter(|e| e.is_pending())
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.first_failure_utc
                .cmp(&b.first_failure_utc)
                .then_with(|| a.date.cmp(&b.date))
                .then_with(|| a.id.cmp(&b.id))
        });
        pending
    }

    fn persist(&self) -> anyhow::Result<()> {
        super::write_table(&self.path, &QUEUE_COLUMNS, self.entries.values())
    }
}

fn key(id: &str, date: NaiveDate) -> QueueKey {
    QueueKey {
        id: id.to_string(),
        date,
    }
}

fn clip(error: &str) -> String {
    let one_line = error.replace(['\n', '\r'], " ");
    if one_line.chars().count() <= MAX_ERROR_LEN {
        return one_line;
    }
    let mut s: String = one_line.chars().take(MAX_ERROR_LEN).collect();
    s.push_str("...");
    s
}
