//! ABOUTME: Thread-safe monotonic progress counters for one step execution
//! ABOUTME: Consumers colour progress bars by error rate (green <=1%, yellow <=5%, red above)

use std::sync::atomic::{AtomicU64, Ordering};

use weft_core::FlowMessage;

/// Counters for one step's execution. Updates are monotonic and safe to
/// call from any worker.
#[derive(Debug)]
pub struct ProgressTracker {
    step_id: String,
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

/// Point-in-time view handed to progress callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub step_id: String,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Error-rate band used by TTY progress displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorBand {
    Green,
    Yellow,
    Red,
}

impl ProgressSnapshot {
    #[must_use]
    pub fn error_band(&self) -> ErrorBand {
        if self.processed == 0 {
            return ErrorBand::Green;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.failed as f64 / self.processed as f64;
        if rate <= 0.01 {
            ErrorBand::Green
        } else if rate <= 0.05 {
            ErrorBand::Yellow
        } else {
            ErrorBand::Red
        }
    }
}

impl ProgressTracker {
    #[must_use]
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            processed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// Count one emitted message.
    pub fn record_message(&self, message: &FlowMessage) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if message.is_failed() {
            self.failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            step_id: self.step_id.clone(),
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use weft_core::{Session, WeftError};

    #[test]
    fn test_counts_split_by_outcome() {
        let tracker = ProgressTracker::new("step");
        let ok = FlowMessage::new(Arc::new(Session::new("s")));
        let failed = ok.with_error("step", &WeftError::step("step", "boom"));

        tracker.record_message(&ok);
        tracker.record_message(&ok);
        tracker.record_message(&failed);

        let snap = tracker.snapshot();
        assert_eq!(snap.processed, 3);
        assert_eq!(snap.succeeded, 2);
        assert_eq!(snap.failed, 1);
    }

    #[test]
    fn test_error_bands() {
        let snap = |processed, failed| ProgressSnapshot {
            step_id: "s".into(),
            processed,
            succeeded: processed - failed,
            failed,
            cache_hits: 0,
            cache_misses: 0,
        };
        assert_eq!(snap(100, 1).error_band(), ErrorBand::Green);
        assert_eq!(snap(100, 5).error_band(), ErrorBand::Yellow);
        assert_eq!(snap(100, 6).error_band(), ErrorBand::Red);
        assert_eq!(snap(0, 0).error_band(), ErrorBand::Green);
    }
}
