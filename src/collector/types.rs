//! Motion sample types delivered by the sensor source.
//!
//! Readings mirror what a device motion callback reports: two optional
//! acceleration vectors whose axes may individually be missing.

use serde::{Deserialize, Serialize};
use std::ops::Sub;

/// A three-axis acceleration sample in m/s², possibly including gravity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccelerationSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelerationSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector, used as the baseline right after monitoring starts.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Euclidean norm of the vector.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

impl Sub for AccelerationSample {
    type Output = AccelerationSample;

    fn sub(self, rhs: AccelerationSample) -> AccelerationSample {
        AccelerationSample {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

/// Raw axis values as reported by the sensor. Any axis may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisReading {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub z: Option<f64>,
}

impl AxisReading {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    /// Convert to a sample, treating every absent axis as 0.0.
    pub fn to_sample(&self) -> AccelerationSample {
        AccelerationSample {
            x: self.x.unwrap_or(0.0),
            y: self.y.unwrap_or(0.0),
            z: self.z.unwrap_or(0.0),
        }
    }
}

impl From<AccelerationSample> for AxisReading {
    fn from(sample: AccelerationSample) -> Self {
        AxisReading::new(sample.x, sample.y, sample.z)
    }
}

/// One device motion callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionReading {
    /// Monotonic offset of the reading in milliseconds, if the source has one
    #[serde(default)]
    pub timestamp_ms: Option<u64>,
    /// Acceleration including gravity
    #[serde(default)]
    pub acceleration_including_gravity: Option<AxisReading>,
    /// Acceleration with gravity removed
    #[serde(default)]
    pub acceleration: Option<AxisReading>,
}

impl MotionReading {
    /// A reading carrying only a gravity-inclusive vector.
    pub fn including_gravity(x: f64, y: f64, z: f64) -> Self {
        Self {
            timestamp_ms: None,
            acceleration_including_gravity: Some(AxisReading::new(x, y, z)),
            acceleration: None,
        }
    }

    pub fn at(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Pick the vector to feed the detector.
    ///
    /// The gravity-inclusive vector wins when it reports an `x` axis; the
    /// gravity-free vector is the fallback under the same rule. `None` means
    /// the reading has nothing usable.
    pub fn select(&self) -> Option<&AxisReading> {
        self.acceleration_including_gravity
            .as_ref()
            .filter(|a| a.x.is_some())
            .or_else(|| self.acceleration.as_ref().filter(|a| a.x.is_some()))
    }
}

/// Input delivered by a collector.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorInput {
    /// A sensor reading
    Motion(MotionReading),
    /// Request for a synthetic shake
    SimulateShake,
}

impl SensorInput {
    /// Parse one line of a recorded motion stream.
    ///
    /// A line reading `simulate` requests a synthetic shake; anything else
    /// must be a JSON [`MotionReading`].
    pub fn parse_line(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }
        if trimmed.eq_ignore_ascii_case("simulate") {
            return Ok(Some(SensorInput::SimulateShake));
        }
        serde_json::from_str(trimmed).map(|r| Some(SensorInput::Motion(r)))
    }

    pub fn timestamp_ms(&self) -> Option<u64> {
        match self {
            SensorInput::Motion(r) => r.timestamp_ms,
            SensorInput::SimulateShake => None,
        }
    }
}
