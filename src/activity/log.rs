//! User-facing activity log.
//!
//! Holds the most recent entries in memory (newest first) and a set of
//! cumulative counters that survive restarts when persistence is enabled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Number of entries kept in memory.
pub const MAX_ENTRIES: usize = 20;

/// Outcome class of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Info,
    Success,
    Error,
}

/// One line of the activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub kind: ActivityKind,
    pub message: String,
}

/// Activity for the current process plus persisted totals.
#[derive(Debug)]
pub struct ActivityLog {
    entries: Mutex<VecDeque<ActivityEntry>>,
    /// Number of shakes confirmed (real and simulated)
    shakes_detected: AtomicU64,
    /// Number of events accepted by an ingestion endpoint
    events_sent: AtomicU64,
    /// Number of dispatches that failed
    send_failures: AtomicU64,
    /// Number of monitoring sessions started
    sessions_started: AtomicU64,
    /// Process start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl ActivityLog {
    /// Create a new activity log.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(MAX_ENTRIES)),
            shakes_detected: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create an activity log with persistence.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("Could not load previous activity stats: {}", e);
        }

        log
    }

    /// Append an entry and emit it as a single tracing event.
    pub fn record(&self, kind: ActivityKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            ActivityKind::Info => tracing::info!("{}", message),
            ActivityKind::Success => tracing::info!(outcome = "success", "{}", message),
            ActivityKind::Error => tracing::error!("{}", message),
        }

        let entry = ActivityEntry {
            at: Utc::now(),
            kind,
            message,
        };

        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push_front(entry);
        entries.truncate(MAX_ENTRIES);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(ActivityKind::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.record(ActivityKind::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(ActivityKind::Error, message);
    }

    /// Entries, newest first.
    pub fn entries(&self) -> Vec<ActivityEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn record_shake_detected(&self) {
        self.shakes_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_sent(&self) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> ActivityStats {
        ActivityStats {
            shakes_detected: self.shakes_detected.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Activity:\n\
             - Sessions started: {}\n\
             - Shakes detected: {}\n\
             - Events sent: {}\n\
             - Send failures: {}\n\
             - Uptime: {} seconds",
            stats.sessions_started,
            stats.shakes_detected,
            stats.events_sent,
            stats.send_failures,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                shakes_detected: stats.shakes_detected,
                events_sent: stats.events_sent,
                send_failures: stats.send_failures,
                sessions_started: stats.sessions_started,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.shakes_detected
                    .store(persisted.shakes_detected, Ordering::Relaxed);
                self.events_sent
                    .store(persisted.events_sent, Ordering::Relaxed);
                self.send_failures
                    .store(persisted.send_failures, Ordering::Relaxed);
                self.sessions_started
                    .store(persisted.sessions_started, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters and clear the entries.
    pub fn reset(&self) {
        self.shakes_detected.store(0, Ordering::Relaxed);
        self.events_sent.store(0, Ordering::Relaxed);
        self.send_failures.store(0, Ordering::Relaxed);
        self.sessions_started.store(0, Ordering::Relaxed);
        match self.entries.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of activity counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStats {
    pub shakes_detected: u64,
    pub events_sent: u64,
    pub send_failures: u64,
    pub sessions_started: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    shakes_detected: u64,
    events_sent: u64,
    send_failures: u64,
    sessions_started: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared activity log.
pub type SharedActivityLog = Arc<ActivityLog>;

/// Create a new shared activity log.
pub fn create_shared_log() -> SharedActivityLog {
    Arc::new(ActivityLog::new())
}

/// Create a new shared activity log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedActivityLog {
    Arc::new(ActivityLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_newest_first_and_capped() {
        let log = ActivityLog::new();

        for i in 0..25 {
            log.info(format!("entry {i}"));
        }
        log.error("boom");

        let entries = log.entries();
        assert_eq!(entries.len(), MAX_ENTRIES);
        assert_eq!(entries[0].message, "boom");
        assert_eq!(entries[0].kind, ActivityKind::Error);
        assert_eq!(entries[1].message, "entry 24");
        assert_eq!(entries.last().unwrap().message, "entry 6");
    }

    #[test]
    fn test_counters_and_reset() {
        let log = ActivityLog::new();

        log.record_shake_detected();
        log.record_shake_detected();
        log.record_event_sent();
        log.record_send_failure();
        log.success("sent");

        let stats = log.stats();
        assert_eq!(stats.shakes_detected, 2);
        assert_eq!(stats.events_sent, 1);
        assert_eq!(stats.send_failures, 1);

        log.reset();
        let stats = log.stats();
        assert_eq!(stats.shakes_detected, 0);
        assert_eq!(stats.events_sent, 0);
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.json");

        let log = ActivityLog::with_persistence(path.clone());
        log.record_session_started();
        log.record_shake_detected();
        log.record_event_sent();
        log.save().unwrap();

        let reloaded = ActivityLog::with_persistence(path);
        let stats = reloaded.stats();
        assert_eq!(stats.sessions_started, 1);
        assert_eq!(stats.shakes_detected, 1);
        assert_eq!(stats.events_sent, 1);
        // Entries are not persisted
        assert!(reloaded.entries().is_empty());
    }

    #[test]
    fn test_summary_format() {
        let log = ActivityLog::new();
        let summary = log.summary();

        assert!(summary.contains("Shakes detected"));
        assert!(summary.contains("Events sent"));
        assert!(summary.contains("Send failures"));
    }
}
