//! Persisted cooldown between bundle submissions.
//!
//! The store is advisory: a missing, unreadable or corrupted record counts as
//! "no cooldown", and write failures are logged and dropped. File access runs
//! on the blocking pool so endpoint tasks never stall a runtime worker.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::{debug, warn};

// Shared by every store in the process so temp files never collide, even
// when two stores point at the same record.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// On-disk throttle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleRecord {
    pub last_submission_epoch_millis: u64,
}

/// File-backed record of the last accepted or rate-limited submission.
#[derive(Debug, Clone)]
pub struct ThrottleStore {
    path: PathBuf,
    cooldown: Duration,
}

impl ThrottleStore {
    pub fn new(path: impl Into<PathBuf>, cooldown: Duration) -> Self {
        Self {
            path: path.into(),
            cooldown,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Reads the persisted record, treating any failure as absent.
    pub async fn load(&self) -> Option<ThrottleRecord> {
        let path = self.path.clone();
        match task::spawn_blocking(move || load_record(&path)).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "throttle read task failed");
                None
            }
        }
    }

    /// Time left before the next submission may start.
    pub async fn remaining(&self) -> Duration {
        let Some(record) = self.load().await else {
            return Duration::ZERO;
        };
        let ready_at = record
            .last_submission_epoch_millis
            .saturating_add(duration_millis(self.cooldown));
        Duration::from_millis(ready_at.saturating_sub(now_millis()))
    }

    /// Stamps the record with the current time.
    ///
    /// The stored value never moves backwards, even if the wall clock does.
    pub async fn record(&self) {
        let path = self.path.clone();
        if let Err(e) = task::spawn_blocking(move || record_now(&path)).await {
            warn!(error = %e, "throttle write task failed");
        }
    }
}

fn load_record(path: &Path) -> Option<ThrottleRecord> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %e, "throttle record unreadable");
            }
            return None;
        }
    };

    match serde_json::from_slice(&raw) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "throttle record corrupted, ignoring");
            None
        }
    }
}

fn record_now(path: &Path) {
    let now = now_millis();
    let stamp = match load_record(path) {
        Some(prev) => prev.last_submission_epoch_millis.max(now),
        None => now,
    };

    if let Err(e) = write_record(
        path,
        ThrottleRecord {
            last_submission_epoch_millis: stamp,
        },
    ) {
        warn!(path = %path.display(), error = %e, "failed to persist throttle record");
    } else {
        debug!(path = %path.display(), stamp, "throttle record updated");
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.{seq}.tmp", std::process::id()));
    PathBuf::from(tmp)
}

fn write_record(path: &Path, record: ThrottleRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path(path);
    let body = serde_json::to_vec(&record)?;
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_millis)
        .unwrap_or(0)
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
