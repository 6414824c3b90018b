use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

use crate::event::{Phase, ProgressEvent};

/// Minimum spacing between two non-final events of the same file.
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(100);

/// Cloneable, thread-safe progress sink.
///
/// A disabled reporter (the default) accepts and discards every event.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    inner: Option<Arc<ReporterInner>>,
}

struct ReporterInner {
    tx: mpsc::Sender<ProgressEvent>,
    interval: Duration,
    files: Mutex<HashMap<String, FileState>>,
}

/// Last event delivered for a file.
struct FileState {
    sent_at: Instant,
    phase: Phase,
    bytes: u64,
}

impl ProgressReporter {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(tx: mpsc::Sender<ProgressEvent>, interval: Duration) -> Self {
        Self {
            inner: Some(Arc::new(ReporterInner {
                tx,
                interval,
                files: Mutex::new(HashMap::new()),
            })),
        }
    }

    /// Creates a reporter with the default throttle and its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx, DEFAULT_THROTTLE), rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Offers an event to the consumer. Returns `true` if it was delivered.
    ///
    /// Within one phase, an event carrying fewer bytes than the last delivered
    /// one is dropped, and non-urgent events closer than the throttle interval
    /// to the previous delivery are dropped. A phase change always passes.
    pub fn report(&self, mut event: ProgressEvent) -> bool {
        let Some(inner) = &self.inner else {
            return false;
        };

        event.bytes_so_far = event.bytes_so_far.min(event.total_bytes);
        let now = Instant::now();

        // The lock is held across `try_send` so delivery order matches the
        // order in which events passed the checks.
        let mut files = inner.files.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = files.get(&event.file_path)
            && last.phase == event.phase
        {
            if event.bytes_so_far < last.bytes {
                return false;
            }
            if !event.is_urgent() && now.duration_since(last.sent_at) < inner.interval {
                return false;
            }
        }

        let path = event.file_path.clone();
        let phase = event.phase;
        let bytes = event.bytes_so_far;
        match inner.tx.try_send(event) {
            Ok(()) => {
                files.insert(
                    path,
                    FileState {
                        sent_at: now,
                        phase,
                        bytes,
                    },
                );
                true
            }
            Err(TrySendError::Full(ev)) => {
                trace!(path = %ev.file_path, "progress channel full, event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Forgets the last delivery for `file_path`, so the next event for it is
    /// checked against nothing.
    pub fn restart(&self, file_path: &str) {
        if let Some(inner) = &self.inner {
            let mut files = inner.files.lock().unwrap_or_else(PoisonError::into_inner);
            files.remove(file_path);
        }
    }

    /// Shorthand for [`report`](Self::report) without a note.
    pub fn emit(
        &self,
        file_path: &str,
        phase: Phase,
        bytes_so_far: u64,
        total_bytes: u64,
    ) -> bool {
        self.report(ProgressEvent::new(file_path, phase, bytes_so_far, total_bytes))
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
