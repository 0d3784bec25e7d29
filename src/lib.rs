//! Shake Relay - shake detection with telemetry relay to Event Hubs.
//!
//! This library watches a stream of three-axis acceleration samples, detects
//! shakes by thresholding the change between consecutive samples, and sends
//! one JSON telemetry record per shake to an Event Hubs style ingestion
//! endpoint, either directly or through a relay.
//!
//! # Delivery Guarantees
//!
//! - **One attempt**: each record is sent exactly once, with no retry and no queue
//! - **Counted on success**: the event counter only moves when the endpoint accepts
//! - **Never blocking**: sends run as their own tasks and never hold up detection
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Shake Relay                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │  Collector  │──▶│   Shake     │──▶│ Dispatcher  │──▶ Hub  │
//! │  │  (replay)   │   │  Detector   │   │ (one task)  │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! │                           │                 │                │
//! │                           ▼                 ▼                │
//! │                    ┌─────────────┐   ┌─────────────┐         │
//! │                    │  Activity   │   │ Destination │         │
//! │                    │    Log      │   │  Selector   │         │
//! │                    └─────────────┘   └─────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use shake_relay::{collector, core};
//! use std::time::Duration;
//!
//! let mut detector = core::ShakeDetector::new("ada", core::DetectorSettings::default());
//! detector.start();
//!
//! let sample = collector::AxisReading::new(20.0, 0.0, 0.0);
//! if let Some(event) = detector.on_sample(&sample, Duration::ZERO) {
//!     println!("{} shake", event.shake_intensity);
//! }
//! ```

pub mod activity;
pub mod collector;
pub mod config;
pub mod core;
pub mod destination;
pub mod dispatch;
pub mod monitor;

#[cfg(feature = "http")]
pub mod endpoint;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use activity::{ActivityLog, ActivityStats, SharedActivityLog};
pub use collector::{Collector, CollectorConfig, CollectorError, SensorInput};
pub use config::{Config, ConfigError, DefaultDestination, DestinationStore};
pub use core::{ShakeDetector, ShakeEvent, ShakeIntensity, TelemetryRecord};
pub use destination::{CredentialError, Destination, DestinationKind, DestinationSelector};
pub use dispatch::{
    Accepted, DispatchError, Dispatcher, EndpointError, IngestionEndpoint, Validated,
    ValidationError,
};
pub use monitor::{Monitor, MonitorStatus};

// HTTP endpoint re-exports (when enabled)
#[cfg(feature = "http")]
pub use endpoint::{EventHubsEndpoint, RelayEndpoint};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
