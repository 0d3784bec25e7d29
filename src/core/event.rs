//! Shake telemetry record.
//!
//! A [`ShakeEvent`] is built once when a shake is confirmed and serializes
//! directly to the camelCase JSON record the ingestion endpoint expects.

use crate::collector::types::AccelerationSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of shake that produced the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    /// Detected from sensor samples
    Shake,
    /// Synthesized without a sensor
    SimulatedShake,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Shake => "shake",
            EventType::SimulatedShake => "simulated-shake",
        }
    }
}

/// Intensity bucket derived from the delta magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShakeIntensity {
    Low,
    Medium,
    High,
}

impl ShakeIntensity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShakeIntensity::Low => "low",
            ShakeIntensity::Medium => "medium",
            ShakeIntensity::High => "high",
        }
    }
}

impl std::fmt::Display for ShakeIntensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vector together with its magnitude, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorReading {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub magnitude: f64,
}

impl VectorReading {
    /// Build a reading with every component rounded to two decimals.
    pub fn rounded(sample: AccelerationSample, magnitude: f64) -> Self {
        Self {
            x: round2(sample.x),
            y: round2(sample.y),
            z: round2(sample.z),
            magnitude: round2(magnitude),
        }
    }
}

/// A confirmed shake, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShakeEvent {
    /// When the shake was confirmed
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    pub user_name: String,
    pub event_type: EventType,
    pub acceleration: VectorReading,
    pub delta_acceleration: VectorReading,
    pub shake_intensity: ShakeIntensity,
}

/// The record accepted by the ingestion endpoint is the event itself.
pub type TelemetryRecord = ShakeEvent;

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Serde support for ISO-8601 timestamps with millisecond precision.
pub(crate) mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_event() -> ShakeEvent {
        ShakeEvent {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap(),
            user_name: "ada".to_string(),
            event_type: EventType::SimulatedShake,
            acceleration: VectorReading::rounded(AccelerationSample::new(1.234, -5.678, 9.999), 11.6),
            delta_acceleration: VectorReading::rounded(AccelerationSample::new(20.0, 0.0, 0.0), 20.0),
            shake_intensity: ShakeIntensity::Medium,
        }
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(1.234), 1.23);
        assert_eq!(round2(-5.678), -5.68);
        assert_eq!(round2(1300f64.sqrt()), 36.06);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(sample_event()).unwrap();

        assert_eq!(json["timestamp"], "2024-03-01T12:30:05.000Z");
        assert_eq!(json["userName"], "ada");
        assert_eq!(json["eventType"], "simulated-shake");
        assert_eq!(json["shakeIntensity"], "medium");
        assert_eq!(json["acceleration"]["x"], 1.23);
        assert_eq!(json["acceleration"]["y"], -5.68);
        assert_eq!(json["acceleration"]["z"], 10.0);
        assert_eq!(json["deltaAcceleration"]["magnitude"], 20.0);
    }

    #[test]
    fn test_parse_client_record() {
        let raw = r#"{
            "timestamp": "2024-03-01T12:30:05.123Z",
            "userName": "grace",
            "eventType": "shake",
            "acceleration": {"x": 1, "y": 2, "z": 3, "magnitude": 3.74},
            "deltaAcceleration": {"x": 20, "y": 0, "z": 0, "magnitude": 20},
            "shakeIntensity": "high"
        }"#;
        let event: TelemetryRecord = serde_json::from_str(raw).unwrap();

        assert_eq!(event.user_name, "grace");
        assert_eq!(event.event_type, EventType::Shake);
        assert_eq!(event.shake_intensity, ShakeIntensity::High);
        assert_eq!(event.timestamp.timestamp_subsec_millis(), 123);
    }
}
