use serde::{Deserialize, Serialize};

/// Lifecycle phase of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Transferring,
    Verifying,
    Verified,
    Done,
    Skipped,
}

impl Phase {
    /// Final phases are never throttled.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Verified | Phase::Done | Phase::Skipped)
    }
}

/// One progress update for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub file_path: String,
    pub phase: Phase,
    pub bytes_so_far: u64,
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ProgressEvent {
    pub fn new(
        file_path: impl Into<String>,
        phase: Phase,
        bytes_so_far: u64,
        total_bytes: u64,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            phase,
            bytes_so_far,
            total_bytes,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// A transferring event at 100% bypasses throttling.
    pub(crate) fn is_urgent(&self) -> bool {
        self.phase.is_terminal()
            || (self.phase == Phase::Transferring && self.bytes_so_far >= self.total_bytes)
    }
}
