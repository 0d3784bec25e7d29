//! Core functionality for the shake relay.
//!
//! This module contains:
//! - Shake detection over acceleration samples
//! - The telemetry record emitted for each confirmed shake

pub mod detector;
pub mod event;

// Re-export commonly used types
pub use detector::{
    DetectorSettings, DetectorState, EventCounter, ShakeDetector, SHAKE_COOLDOWN, SHAKE_THRESHOLD,
};
pub use event::{round2, EventType, ShakeEvent, ShakeIntensity, TelemetryRecord, VectorReading};
