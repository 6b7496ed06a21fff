//! Rate-limited progress logging for long-running operations.

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

struct ProgressInner {
    items_total: usize,
    items_processed: usize,
    last_write: Option<Instant>,
}

/// Emits a progress line at most once per `interval` while a long-running
/// operation repeatedly calls [`ProgressLogger::update`].
pub struct ProgressLogger {
    message: String,
    interval: Duration,
    start_time: Instant,
    inner: Mutex<ProgressInner>,
}

impl ProgressLogger {
    pub fn new(message: impl Into<String>, items_total: usize) -> Self {
        Self::with_interval(message, items_total, Duration::from_secs(5))
    }

    pub fn with_interval(message: impl Into<String>, items_total: usize, interval: Duration) -> Self {
        Self {
            message: message.into(),
            interval,
            start_time: Instant::now(),
            inner: Mutex::new(ProgressInner {
                items_total,
                items_processed: 0,
                last_write: None,
            }),
        }
    }

    /// Adjust the expected total, e.g. when an earlier estimate is refined.
    pub fn adjust_total(&self, increment: isize) {
        let mut inner = self.inner.lock().expect("progress lock poisoned");
        inner.items_total = inner.items_total.saturating_add_signed(increment);
    }

    /// Add to the processed count, possibly emitting a log line.
    pub fn update(&self, increment: usize) {
        let now = Instant::now();
        let (processed, total) = {
            let mut inner = self.inner.lock().expect("progress lock poisoned");
            inner.items_processed += increment;

            // Rate limit, but always log once the expected total is reached.
            if inner.items_processed < inner.items_total {
                if let Some(last) = inner.last_write {
                    if now.duration_since(last) < self.interval {
                        return;
                    }
                }
            }
            inner.last_write = Some(now);
            (inner.items_processed, inner.items_total)
        };

        let percent = if total > 0 {
            processed as f64 / total as f64 * 100.0
        } else {
            100.0
        };
        let runtime = now.duration_since(self.start_time).as_secs_f64();
        let items_per_second = if runtime > 0.01 {
            processed as f64 / runtime
        } else {
            0.0
        };

        tracing::info!(
            "{}: {} (of {}) [{:2.0}% ] [{:2.1} p/sec]",
            self.message,
            processed,
            total,
            percent,
            items_per_second,
        );
    }

    pub fn processed(&self) -> usize {
        self.inner.lock().expect("progress lock poisoned").items_processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_updates() {
        let progress = ProgressLogger::new("Writing items", 10);
        progress.update(3);
        progress.update(4);
        assert_eq!(progress.processed(), 7);
    }

    #[test]
    fn adjust_total_saturates() {
        let progress = ProgressLogger::new("Writing items", 1);
        progress.adjust_total(-5);
        progress.update(1);
        assert_eq!(progress.processed(), 1);
    }

    #[test]
    fn rate_limits_intermediate_updates() {
        let progress = ProgressLogger::with_interval("Writing", 100, Duration::from_secs(3600));
        progress.update(1);
        let first_write = progress.inner.lock().unwrap().last_write;
        assert!(first_write.is_some());

        // Second update within the interval must not move last_write.
        progress.update(1);
        assert_eq!(progress.inner.lock().unwrap().last_write, first_write);

        // Passing the total forces a write regardless of the interval.
        progress.update(98);
        assert_ne!(progress.inner.lock().unwrap().last_write, first_write);
    }
}
