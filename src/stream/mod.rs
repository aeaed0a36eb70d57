//! Stream module - chain event ingestion
//!
//! - `watcher`: new-token detection over a log subscription feed
//! - `spike`: per-token trade-flow intensity classification

pub mod spike;
pub mod watcher;

pub use spike::{monitor_spikes, wait_for_next_pop};
pub use watcher::{Candidate, EventWatcher};
