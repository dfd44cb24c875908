//! The monitoring core.
//!
//! - `backoff`: per-endpoint retry state machine
//! - `paginate`: cursor walk over a post's comments
//! - `detect`: comparison against persisted state
//! - `batch`: size/age triggered buffering and flushing
//! - `monitor`: the polling loop tying them together

pub mod backoff;
pub mod batch;
pub mod detect;
pub mod monitor;
pub mod paginate;

pub use backoff::{BackoffController, BackoffPolicy, BackoffState};
pub use batch::{BatchAccumulator, FlushReport, FlushTrigger};
pub use detect::{ChangeDetector, Detection};
pub use monitor::{MonitorLoop, TickReport};
pub use paginate::{PaginationWalker, WalkOutcome};
