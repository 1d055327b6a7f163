//! Process-wide record of per-reference download status.
//!
//! The registry answers "has this reference been downloaded, and where is
//! it?" for the coordinator, and exposes a progress fraction per reference
//! for diagnostics:
//!
//! | Status       | Fraction            |
//! |--------------|---------------------|
//! | `Unknown`    | 0.0                 |
//! | `Failed`     | 0.0                 |
//! | `InProgress` | received / declared, always below 1.0 |
//! | `Complete`   | 1.0                 |

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::Serialize;

use crate::reference::FileReference;

/// Largest fraction reported for a transfer that is not yet finalized.
const MAX_IN_PROGRESS_FRACTION: f64 = 0.99;

/// Lifecycle state of one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Never requested.
    Unknown,
    /// A transfer is in flight.
    InProgress,
    /// Verified and finalized on disk.
    Complete,
    /// The last attempt failed; a later request may retry.
    Failed,
}

/// Registry entry for one reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadRecord {
    pub status: DownloadStatus,
    /// Artifact path, set once complete.
    pub path: Option<PathBuf>,
    /// Progress fraction in `[0, 1]`.
    pub progress: f64,
}

impl DownloadRecord {
    fn new(status: DownloadStatus) -> Self {
        Self {
            status,
            path: None,
            progress: 0.0,
        }
    }
}

/// Thread-safe table of download records keyed by reference.
#[derive(Debug, Default)]
pub struct DownloadRegistry {
    records: Mutex<HashMap<FileReference, DownloadRecord>>,
}

impl DownloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a transfer as started. Complete records are left untouched.
    pub fn record_started(&self, reference: &FileReference) {
        let mut records = self.records.lock();
        let record = records
            .entry(reference.clone())
            .or_insert_with(|| DownloadRecord::new(DownloadStatus::InProgress));
        if record.status != DownloadStatus::Complete {
            *record = DownloadRecord::new(DownloadStatus::InProgress);
        }
    }

    /// Update the progress of an in-flight transfer.
    pub fn record_progress(&self, reference: &FileReference, fraction: f64) {
        let mut records = self.records.lock();
        if let Some(record) = records.get_mut(reference) {
            if record.status == DownloadStatus::InProgress {
                record.progress = fraction.clamp(0.0, MAX_IN_PROGRESS_FRACTION);
            }
        }
    }

    /// Record a verified, finalized artifact.
    pub fn record_complete(&self, reference: &FileReference, path: PathBuf) {
        self.records.lock().insert(
            reference.clone(),
            DownloadRecord {
                status: DownloadStatus::Complete,
                path: Some(path),
                progress: 1.0,
            },
        );
    }

    /// Record a failed attempt. A complete record is never downgraded.
    pub fn record_failed(&self, reference: &FileReference) {
        let mut records = self.records.lock();
        let record = records
            .entry(reference.clone())
            .or_insert_with(|| DownloadRecord::new(DownloadStatus::Failed));
        if record.status == DownloadStatus::Complete {
            tracing::debug!(%reference, "Ignoring failure for completed reference");
            return;
        }
        *record = DownloadRecord::new(DownloadStatus::Failed);
    }

    /// Progress fraction for a reference; 0.0 if never seen or failed.
    pub fn status(&self, reference: &FileReference) -> f64 {
        self.records
            .lock()
            .get(reference)
            .map(|r| r.progress)
            .unwrap_or(0.0)
    }

    /// Lifecycle state of a reference.
    pub fn download_status(&self, reference: &FileReference) -> DownloadStatus {
        self.records
            .lock()
            .get(reference)
            .map(|r| r.status)
            .unwrap_or(DownloadStatus::Unknown)
    }

    /// Artifact path of a complete reference.
    pub fn completed_path(&self, reference: &FileReference) -> Option<PathBuf> {
        self.records
            .lock()
            .get(reference)
            .filter(|r| r.status == DownloadStatus::Complete)
            .and_then(|r| r.path.clone())
    }

    /// Progress fractions of every known reference.
    pub fn all_statuses(&self) -> BTreeMap<FileReference, f64> {
        self.records
            .lock()
            .iter()
            .map(|(reference, record)| (reference.clone(), record.progress))
            .collect()
    }

    /// Snapshot of every record, for diagnostics.
    pub fn records(&self) -> BTreeMap<FileReference, DownloadRecord> {
        self.records
            .lock()
            .iter()
            .map(|(reference, record)| (reference.clone(), record.clone()))
            .collect()
    }

    /// Every record as a JSON object keyed by reference.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.records())
    }

    /// Forget a reference so it can be downloaded again.
    pub fn evict(&self, reference: &FileReference) -> Option<DownloadRecord> {
        self.records.lock().remove(reference)
    }
}
