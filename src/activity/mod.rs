//! Activity log for the shake relay.
//!
//! Keeps the short, human-readable history of what the monitor did
//! (shakes detected, events sent, failures) along with cumulative counters.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, ActivityEntry, ActivityKind,
    ActivityLog, ActivityStats, SharedActivityLog, MAX_ENTRIES,
};
