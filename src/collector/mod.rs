//! Sensor collection for the shake relay.
//!
//! The collector is the sensor source: it delivers motion readings over a
//! channel and has no say in how often they arrive.

pub mod replay;
pub mod types;

// Re-export commonly used types
pub use replay::{CollectorConfig, CollectorError, ReplayCollector, SampleSource};
pub use types::{AccelerationSample, AxisReading, MotionReading, SensorInput};

/// Platform-agnostic collector type alias
pub type Collector = ReplayCollector;
