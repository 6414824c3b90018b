use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::event::{Phase, ProgressEvent};
use crate::reporter::ProgressReporter;

/// Byte counter shared by the workers of one file.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter(Arc<AtomicU64>);

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` bytes and returns the new total.
    pub fn add(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress handle for one file in one phase.
///
/// Clones share the same counter, so concurrent workers advancing their own
/// clone report the combined byte count.
#[derive(Debug, Clone)]
pub struct FileProgress {
    reporter: ProgressReporter,
    path: String,
    total: u64,
    phase: Phase,
    counter: ProgressCounter,
}

impl FileProgress {
    pub fn new(
        reporter: ProgressReporter,
        path: impl Into<String>,
        phase: Phase,
        total: u64,
    ) -> Self {
        Self {
            reporter,
            path: path.into(),
            total,
            phase,
            counter: ProgressCounter::new(),
        }
    }

    /// Records `n` more bytes and offers an event. Returns the new total.
    pub fn advance(&self, n: u64) -> u64 {
        let now = self.counter.add(n);
        self.reporter
            .report(ProgressEvent::new(&self.path, self.phase, now, self.total));
        now
    }

    /// Offers an event marking the start of the phase. Whatever was delivered
    /// for this path before, such as a failed earlier attempt, is forgotten.
    pub fn start(&self) {
        self.reporter.restart(&self.path);
        let now = self.counter.get();
        self.reporter
            .report(ProgressEvent::new(&self.path, self.phase, now, self.total));
    }

    pub fn current(&self) -> u64 {
        self.counter.get()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_add_returns_running_total() {
        let c = ProgressCounter::new();
        assert_eq!(c.add(5), 5);
        assert_eq!(c.add(7), 12);
        assert_eq!(c.get(), 12);
    }

    #[test]
    fn clones_share_counter() {
        let (reporter, mut rx) = ProgressReporter::channel(16);
        let a = FileProgress::new(reporter, "f.bin", Phase::Transferring, 10);
        let b = a.clone();

        a.advance(4);
        b.advance(6);
        assert_eq!(a.current(), 10);

        let mut last = None;
        while let Ok(ev) = rx.try_recv() {
            last = Some(ev);
        }
        let last = last.unwrap();
        assert_eq!(last.bytes_so_far, 10);
        assert_eq!(last.total_bytes, 10);
    }

    #[test]
    fn retried_file_reports_from_zero() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let reporter = ProgressReporter::new(tx, std::time::Duration::ZERO);

        let first = FileProgress::new(reporter.clone(), "f.bin", Phase::Transferring, 100);
        first.start();
        first.advance(80);

        let retry = FileProgress::new(reporter, "f.bin", Phase::Transferring, 100);
        retry.start();
        retry.advance(10);

        let mut bytes = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            bytes.push(ev.bytes_so_far);
        }
        assert_eq!(bytes, [0, 80, 0, 10]);
    }
}
