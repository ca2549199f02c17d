//! Transition history: every accepted or rejected job event, newest kept in
//! memory and appended to daily JSONL files under ~/.reposter/logs/.

use crate::job::{JobStatus, Trigger};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

const MAX_ENTRIES: usize = 500;
const CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionEntry {
    pub id: String,     // uuid v4
    pub ts: u64,        // Unix ms
    pub job_id: String, // empty when no job was active
    pub trigger: Trigger,
    pub from: JobStatus,
    pub to: JobStatus,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TransitionEntry {
    pub fn new(job_id: &str, trigger: Trigger, from: JobStatus, to: JobStatus) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ts: crate::job::now_ms(),
            job_id: job_id.to_string(),
            trigger,
            from,
            to,
            accepted: true,
            page: None,
            reason: None,
        }
    }

    pub fn rejected(mut self, reason: impl Into<String>) -> Self {
        self.accepted = false;
        self.reason = Some(reason.into());
        self
    }

    pub fn with_page(mut self, page: Option<&crate::job::PageId>) -> Self {
        self.page = page.map(|p| p.to_string());
        self
    }
}

#[derive(Clone)]
pub struct TransitionLog {
    buffer: Arc<Mutex<VecDeque<TransitionEntry>>>,
    tx: broadcast::Sender<TransitionEntry>,
    log_dir: Option<PathBuf>,
}

impl TransitionLog {
    /// Log kept in memory only.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_ENTRIES))),
            tx,
            log_dir: None,
        }
    }

    /// Log that also appends to `<dir>/<yyyy-mm-dd>.jsonl`.
    pub fn with_dir(dir: PathBuf) -> Self {
        Self {
            log_dir: Some(dir),
            ..Self::new()
        }
    }

    pub fn push(&self, entry: TransitionEntry) {
        {
            let mut buf = self.buffer.lock();
            if buf.len() >= MAX_ENTRIES {
                buf.pop_front();
            }
            buf.push_back(entry.clone());
        }
        if let Some(dir) = &self.log_dir {
            append_to_file(dir.clone(), &entry);
        }
        let _ = self.tx.send(entry);
    }

    /// Newest-first, up to `limit`.
    pub fn recent(&self, limit: usize) -> Vec<TransitionEntry> {
        self.buffer.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEntry> {
        self.tx.subscribe()
    }
}

impl Default for TransitionLog {
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_log_dir() -> PathBuf {
    crate::config::reposter_home().join("logs")
}

/// Append one entry to the daily log file (fire-and-forget).
fn append_to_file(log_dir: PathBuf, entry: &TransitionEntry) {
    let days = (entry.ts / 1000 / 86400) as i64;
    let (y, m, d) = days_to_ymd(days);
    let date = format!("{:04}-{:02}-{:02}", y, m, d);

    let line = match serde_json::to_string(entry) {
        Ok(s) => s + "\n",
        Err(_) => return,
    };

    tokio::spawn(async move {
        if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
            tracing::warn!("Failed to create log dir: {}", e);
            return;
        }
        let path = log_dir.join(format!("{}.jsonl", date));
        use tokio::io::AsyncWriteExt;
        match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
        {
            Ok(mut f) => {
                let _ = f.write_all(line.as_bytes()).await;
            }
            Err(e) => tracing::warn!("Failed to write transition log: {}", e),
        }
    });
}

/// Convert days-since-unix-epoch to (year, month, day). Gregorian calendar.
fn days_to_ymd(days: i64) -> (i64, i64, i64) {
    // civil_from_days (Howard Hinnant)
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}
