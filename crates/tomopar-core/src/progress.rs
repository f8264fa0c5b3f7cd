//! Progress reporting and cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::arena::ControlBlock;

/// Handle for cooperative cancellation of an execution.
///
/// `CancelToken` can be cloned and shared across threads; cancelling any clone
/// is visible to all of them. The engine checks it before every slice, so a
/// running slice always finishes before the execution stops.
///
/// # Example
///
/// ```
/// use tomopar_core::CancelToken;
///
/// let token = CancelToken::new();
/// let clone = token.clone();
///
/// assert!(!token.is_cancelled());
/// clone.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Clear a previous cancellation so the token can be reused.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Relaxed);
    }
}

/// Receiver for progress updates.
///
/// Values passed to `on_progress` never decrease within one execution and
/// never exceed `total`. A successful execution always ends with a call where
/// `current == total`.
pub trait ProgressSink: Send + Sync {
    /// Called with the number of finished slices.
    fn on_progress(&self, current: u64, total: u64);
}

impl<F> ProgressSink for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    fn on_progress(&self, current: u64, total: u64) {
        self(current, total)
    }
}

const NOTHING_REPORTED: u64 = u64::MAX;

enum Counter<'a> {
    Local(AtomicU64),
    Shared(&'a ControlBlock),
}

/// Monotonic count of finished slices, paired with a fixed total.
///
/// The counter either lives in this process (sequential path) or in the shared
/// control block that every worker advances (parallel path).
pub struct Progress<'a> {
    total: u64,
    counter: Counter<'a>,
    last_reported: AtomicU64,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl Progress<'static> {
    /// An in-process counter.
    pub fn new(total: u64) -> Self {
        Self {
            total,
            counter: Counter::Local(AtomicU64::new(0)),
            last_reported: AtomicU64::new(NOTHING_REPORTED),
            sink: None,
        }
    }
}

impl<'a> Progress<'a> {
    /// A counter backed by a shared control block.
    pub fn shared(block: &'a ControlBlock) -> Self {
        Self {
            total: block.total(),
            counter: Counter::Shared(block),
            last_reported: AtomicU64::new(NOTHING_REPORTED),
            sink: None,
        }
    }

    /// Attach a sink that receives updates from [`Progress::report`].
    pub fn with_sink(mut self, sink: Option<Arc<dyn ProgressSink>>) -> Self {
        self.sink = sink;
        self
    }

    /// Total number of slices.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Record `by` finished slices.
    pub fn advance(&self, by: u64) -> u64 {
        match &self.counter {
            Counter::Local(count) => count.fetch_add(by, Ordering::AcqRel) + by,
            Counter::Shared(block) => block.advance(by),
        }
    }

    /// Slices finished so far, clamped to the total.
    pub fn current(&self) -> u64 {
        let raw = match &self.counter {
            Counter::Local(count) => count.load(Ordering::Acquire),
            Counter::Shared(block) => block.progress(),
        };
        raw.min(self.total)
    }

    /// Push the current value to the sink if it moved since the last report.
    pub fn report(&self) -> u64 {
        let current = self.current();
        let previous = self
            .last_reported
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                (last == NOTHING_REPORTED || current > last).then_some(current)
            });
        if previous.is_ok() {
            if let Some(sink) = &self.sink {
                sink.on_progress(current, self.total);
            }
        }
        current
    }

    /// Final report of a successful execution: the sink sees exactly `total`.
    pub fn finish(&self) {
        let last = self.last_reported.swap(self.total, Ordering::AcqRel);
        if last != self.total {
            if let Some(sink) = &self.sink {
                sink.on_progress(self.total, self.total);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_sink() -> (Arc<Mutex<Vec<(u64, u64)>>>, Arc<dyn ProgressSink>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: Arc<dyn ProgressSink> = Arc::new(move |current: u64, total: u64| {
            sink_seen.lock().unwrap().push((current, total));
        });
        (seen, sink)
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());

        clone.cancel();
        assert!(token.is_cancelled());

        token.reset();
        assert!(!clone.is_cancelled());
        assert!(!CancelToken::default().is_cancelled());
    }

    #[test]
    fn test_report_is_monotonic() {
        let (seen, sink) = recording_sink();
        let progress = Progress::new(4).with_sink(Some(sink));

        progress.report();
        progress.advance(1);
        progress.report();
        progress.report();
        progress.advance(2);
        progress.report();
        progress.advance(1);
        progress.finish();

        assert_eq!(*seen.lock().unwrap(), vec![(0, 4), (1, 4), (3, 4), (4, 4)]);
    }

    #[test]
    fn test_finish_reports_total_once() {
        let (seen, sink) = recording_sink();
        let progress = Progress::new(2).with_sink(Some(sink));
        progress.advance(2);
        progress.report();
        progress.finish();
        assert_eq!(*seen.lock().unwrap(), vec![(2, 2)]);
    }

    #[test]
    fn test_empty_total_finishes_at_zero() {
        let (seen, sink) = recording_sink();
        Progress::new(0).with_sink(Some(sink)).finish();
        assert_eq!(*seen.lock().unwrap(), vec![(0, 0)]);
    }

    #[test]
    fn test_current_is_clamped() {
        let progress = Progress::new(3);
        progress.advance(5);
        assert_eq!(progress.current(), 3);
    }

    #[test]
    fn test_concurrent_advance() {
        let progress = Progress::new(4000);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        progress.advance(1);
                    }
                });
            }
        });
        assert_eq!(progress.current(), 4000);
    }
}
