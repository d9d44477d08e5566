//! Debounced autosave: a generic per-target sink and the scheduler that feeds it from state
//! changes.

mod scheduler;
mod sink;

pub use scheduler::{AutoSaveScheduler, SaveTarget};
pub use sink::{DebouncedSink, SaveStatus};
