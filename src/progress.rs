//! Live per-document progress, shared between page workers and pollers.
//!
//! A [`ProgressTracker`] is constructed by the caller (usually through
//! [`crate::convert::Converter`]) and handed to every pipeline run as an
//! `Arc`. Page workers mutate it when a page reaches a terminal outcome;
//! pollers read [`ProgressSnapshot`] copies at any time.
//!
//! # Thread safety
//!
//! All access goes through one `Mutex<HashMap<..>>`. Each mutation is a short
//! critical section (an increment and possibly a push), so contention between
//! eight page workers and a handful of pollers is negligible, and no update is
//! ever lost.
//!
//! # Example
//!
//! ```rust
//! use edgequake_ocr2md::{DocumentId, ProgressTracker, Stage};
//!
//! let tracker = ProgressTracker::new();
//! let id = DocumentId::new();
//!
//! // Polling before initialisation is fine: a zeroed snapshot comes back.
//! assert_eq!(tracker.snapshot(&id).stage, Stage::Pending);
//!
//! tracker.initialize(&id, 3);
//! tracker.record_page_done(&id, 0, false);
//! tracker.record_page_done(&id, 1, true);
//!
//! let snap = tracker.snapshot(&id);
//! assert_eq!(snap.pages_processed, 2);
//! assert_eq!(snap.failed_pages, vec![1]);
//! ```

use crate::output::DocumentId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Coarse-grained lifecycle stage of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// No record exists: not yet initialised, or already cleaned up.
    #[default]
    Pending,
    /// Pages are being OCR'd and extracted.
    Processing,
    /// All pages resolved; fragments are being assembled.
    Converting,
    /// Markdown assembled and stored.
    Completed,
    /// A fatal error stopped the pipeline.
    Error,
}

/// Read-only copy of a document's progress, returned to pollers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub page_count: usize,
    /// Pages that reached a terminal outcome, successful or not.
    pub pages_processed: usize,
    /// 0-indexed pages that failed, in the order they finished.
    pub failed_pages: Vec<usize>,
    pub stage: Stage,
}

impl ProgressSnapshot {
    /// Fraction of pages processed, in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.page_count == 0 {
            return if self.stage == Stage::Completed { 1.0 } else { 0.0 };
        }
        self.pages_processed as f64 / self.page_count as f64
    }

    /// `true` once the document reached `Completed` or `Error`.
    pub fn is_finished(&self) -> bool {
        matches!(self.stage, Stage::Completed | Stage::Error)
    }
}

/// Concurrent registry of [`ProgressSnapshot`]s keyed by [`DocumentId`].
#[derive(Debug, Default)]
pub struct ProgressTracker {
    records: Mutex<HashMap<DocumentId, ProgressSnapshot>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DocumentId, ProgressSnapshot>> {
        // A panicking page worker must not take progress reporting down with it.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create (or reset) the record for `id` with stage `Processing`.
    pub fn initialize(&self, id: &DocumentId, page_count: usize) {
        debug!("Progress {}: initialised with {} pages", id, page_count);
        self.lock().insert(
            *id,
            ProgressSnapshot {
                page_count,
                pages_processed: 0,
                failed_pages: Vec::new(),
                stage: Stage::Processing,
            },
        );
    }

    /// Count one page as processed; remember its index when it failed.
    ///
    /// `pages_processed` saturates at `page_count`. Unknown ids are ignored.
    pub fn record_page_done(&self, id: &DocumentId, index: usize, failed: bool) {
        let mut records = self.lock();
        let Some(record) = records.get_mut(id) else {
            warn!("Progress {}: page {} finished for an unknown document", id, index);
            return;
        };
        if record.pages_processed < record.page_count {
            record.pages_processed += 1;
        } else {
            warn!(
                "Progress {}: page {} reported after all {} pages were counted",
                id, index, record.page_count
            );
        }
        if failed && !record.failed_pages.contains(&index) {
            record.failed_pages.push(index);
        }
    }

    /// Move the document to `stage`. Unknown ids are ignored.
    pub fn set_stage(&self, id: &DocumentId, stage: Stage) {
        if let Some(record) = self.lock().get_mut(id) {
            debug!("Progress {}: {:?} → {:?}", id, record.stage, stage);
            record.stage = stage;
        }
    }

    /// Copy of the current record, or a zeroed `Pending` snapshot when absent.
    pub fn snapshot(&self, id: &DocumentId) -> ProgressSnapshot {
        self.lock().get(id).cloned().unwrap_or_default()
    }

    /// `true` when a record exists for `id`.
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.lock().contains_key(id)
    }

    /// Delete the record. Returns `false` when there was nothing to delete.
    pub fn remove(&self, id: &DocumentId) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Number of documents currently tracked.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn absent_id_yields_zeroed_sentinel() {
        let tracker = ProgressTracker::new();
        let snap = tracker.snapshot(&DocumentId::new());
        assert_eq!(snap, ProgressSnapshot::default());
        assert_eq!(snap.stage, Stage::Pending);
        assert!(!snap.is_finished());
    }

    #[test]
    fn pages_processed_saturates_at_page_count() {
        let tracker = ProgressTracker::new();
        let id = DocumentId::new();
        tracker.initialize(&id, 2);
        for i in 0..5 {
            tracker.record_page_done(&id, i, false);
        }
        assert_eq!(tracker.snapshot(&id).pages_processed, 2);
    }

    #[test]
    fn failed_pages_are_recorded_once() {
        let tracker = ProgressTracker::new();
        let id = DocumentId::new();
        tracker.initialize(&id, 3);
        tracker.record_page_done(&id, 2, true);
        tracker.record_page_done(&id, 2, true);
        assert_eq!(tracker.snapshot(&id).failed_pages, vec![2]);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let tracker = ProgressTracker::new();
        let id = DocumentId::new();
        tracker.record_page_done(&id, 0, true);
        tracker.set_stage(&id, Stage::Completed);
        assert!(!tracker.contains(&id));
    }

    #[test]
    fn remove_is_idempotent() {
        let tracker = ProgressTracker::new();
        let id = DocumentId::new();
        tracker.initialize(&id, 1);
        assert!(tracker.remove(&id));
        assert!(!tracker.remove(&id));
        assert!(tracker.is_empty());
    }

    #[test]
    fn fraction_and_finished() {
        let tracker = ProgressTracker::new();
        let id = DocumentId::new();
        tracker.initialize(&id, 4);
        tracker.record_page_done(&id, 0, false);
        assert!((tracker.snapshot(&id).fraction() - 0.25).abs() < f64::EPSILON);
        tracker.set_stage(&id, Stage::Completed);
        assert!(tracker.snapshot(&id).is_finished());
    }

    #[test]
    fn concurrent_workers_lose_no_updates() {
        let tracker = Arc::new(ProgressTracker::new());
        let id = DocumentId::new();
        tracker.initialize(&id, 800);

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    let mut last = 0;
                    for i in 0..100 {
                        let index = worker * 100 + i;
                        tracker.record_page_done(&id, index, index % 10 == 0);
                        let seen = tracker.snapshot(&id).pages_processed;
                        assert!(seen >= last, "pages_processed went backwards");
                        last = seen;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = tracker.snapshot(&id);
        assert_eq!(snap.pages_processed, 800);
        assert_eq!(snap.failed_pages.len(), 80);
    }
}
