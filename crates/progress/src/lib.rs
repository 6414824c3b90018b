//! Per-file progress reporting for repository transfers.
//!
//! Producers (plan builder, single-stream copies, multi-stream workers) share
//! a cloneable [`ProgressReporter`] that throttles and forwards
//! [`ProgressEvent`]s to one consumer over a bounded `tokio::sync::mpsc`
//! channel. Delivery never blocks a transfer: when the channel is full the
//! event is dropped.
//!
//! The consumer side folds events into job totals with [`ProgressTally`].

mod counter;
mod event;
mod reporter;
mod speed;
mod tally;

pub use counter::{FileProgress, ProgressCounter};
pub use event::{Phase, ProgressEvent};
pub use reporter::{DEFAULT_THROTTLE, ProgressReporter};
pub use speed::SpeedCalculator;
pub use tally::{ProgressTally, TallySnapshot};
