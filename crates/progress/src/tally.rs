use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::event::{Phase, ProgressEvent};
use crate::speed::SpeedCalculator;

/// Job-level totals derived from the event stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TallySnapshot {
    /// Files seen so far.
    pub files_seen: usize,
    /// Files downloaded and finished (`done` or `verified`).
    pub files_finished: usize,
    pub files_skipped: usize,
    /// Bytes received across all files.
    pub bytes_transferred: u64,
    /// Sum of sizes of every file that entered the transferring phase.
    pub bytes_expected: u64,
    /// Mean throughput since the first transferring event.
    pub average_speed: f64,
    /// Throughput over the recent sliding window.
    pub current_speed: f64,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct FileTally {
    phase: Option<Phase>,
    transferred: u64,
    total: u64,
    transferring: bool,
}

/// Consumer-side fold of [`ProgressEvent`]s.
pub struct ProgressTally {
    files: HashMap<String, FileTally>,
    speed: SpeedCalculator,
    started: Option<Instant>,
}

impl ProgressTally {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            speed: SpeedCalculator::default(),
            started: None,
        }
    }

    pub fn apply(&mut self, event: &ProgressEvent) {
        self.apply_at(event, Instant::now());
    }

    fn apply_at(&mut self, event: &ProgressEvent, at: Instant) {
        let file = self.files.entry(event.file_path.clone()).or_default();
        file.total = event.total_bytes;
        file.phase = Some(event.phase);

        let received = match event.phase {
            Phase::Transferring => Some(event.bytes_so_far),
            Phase::Done | Phase::Verified if file.transferring => Some(event.total_bytes),
            _ => None,
        };
        if let Some(received) = received {
            file.transferring = true;
            if received > file.transferred {
                let delta = received - file.transferred;
                file.transferred = received;
                self.started.get_or_insert(at);
                self.speed.add_sample_at(delta, at);
            }
        }
    }

    pub fn snapshot(&self) -> TallySnapshot {
        let mut snap = TallySnapshot {
            files_seen: self.files.len(),
            ..TallySnapshot::default()
        };
        for file in self.files.values() {
            match file.phase {
                Some(Phase::Done | Phase::Verified) => snap.files_finished += 1,
                Some(Phase::Skipped) => snap.files_skipped += 1,
                _ => {}
            }
            if file.transferring {
                snap.bytes_transferred += file.transferred;
                snap.bytes_expected += file.total;
            }
        }

        if let Some(started) = self.started {
            snap.elapsed = started.elapsed();
            let secs = snap.elapsed.as_secs_f64();
            if secs > 0.0 {
                snap.average_speed = snap.bytes_transferred as f64 / secs;
            }
        }
        snap.current_speed = self.speed.bytes_per_second();
        snap
    }

    /// Drains `rx` until every sender is gone, calling `on_update` after each
    /// event. Returns the final snapshot.
    pub async fn consume<F>(
        mut self,
        mut rx: mpsc::Receiver<ProgressEvent>,
        mut on_update: F,
    ) -> TallySnapshot
    where
        F: FnMut(&ProgressEvent, &TallySnapshot),
    {
        while let Some(event) = rx.recv().await {
            self.apply(&event);
            on_update(&event, &self.snapshot());
        }
        self.snapshot()
    }
}

impl Default for ProgressTally {
    fn default() -> Self {
        Self::new()
    }
}
