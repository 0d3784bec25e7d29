//! Shake detection over a stream of acceleration samples.
//!
//! The detector keeps only the previous sample. Each new sample is compared
//! against it; a jump in acceleration larger than the threshold, outside the
//! cooldown window, is a shake.

use crate::collector::types::{AccelerationSample, AxisReading, MotionReading};
use crate::core::event::{EventType, ShakeEvent, ShakeIntensity, VectorReading};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Minimum delta magnitude (m/s²) for a shake.
pub const SHAKE_THRESHOLD: f64 = 15.0;

/// Minimum time between two confirmed shakes.
pub const SHAKE_COOLDOWN: Duration = Duration::from_millis(500);

/// Delta magnitude above which a shake is `medium`.
pub const INTENSITY_MEDIUM_ABOVE: f64 = 18.0;

/// Delta magnitude above which a shake is `high`.
pub const INTENSITY_HIGH_ABOVE: f64 = 25.0;

/// Range of each axis of a simulated sample.
const SIMULATED_AXIS_RANGE: std::ops::Range<f64> = -10.0..10.0;

/// Tunable detection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub threshold: f64,
    #[serde(with = "crate::config::duration_millis")]
    pub cooldown: Duration,
    pub medium_above: f64,
    pub high_above: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            threshold: SHAKE_THRESHOLD,
            cooldown: SHAKE_COOLDOWN,
            medium_above: INTENSITY_MEDIUM_ABOVE,
            high_above: INTENSITY_HIGH_ABOVE,
        }
    }
}

impl DetectorSettings {
    /// Classify a delta magnitude. Bounds are strict.
    pub fn classify(&self, delta_magnitude: f64) -> ShakeIntensity {
        if delta_magnitude > self.high_above {
            ShakeIntensity::High
        } else if delta_magnitude > self.medium_above {
            ShakeIntensity::Medium
        } else {
            ShakeIntensity::Low
        }
    }
}

/// Count of successfully delivered events, shared with in-flight dispatches.
#[derive(Debug, Clone, Default)]
pub struct EventCounter(Arc<AtomicU64>);

impl EventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one delivered event and return the new total.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

/// Everything the detector remembers between samples.
#[derive(Debug, Clone, Default)]
pub struct DetectorState {
    /// Whether samples are being evaluated
    pub active: bool,
    /// Shakes confirmed since the last start
    pub shake_count: u64,
    /// Events delivered since the last start
    pub event_count: EventCounter,
    /// The previous sample
    pub last_acceleration: AccelerationSample,
    /// Offset of the last confirmed shake, `None` until the first one
    pub last_shake_time: Option<Duration>,
}

/// Threshold and cooldown based shake detector.
pub struct ShakeDetector {
    user_name: String,
    settings: DetectorSettings,
    state: DetectorState,
}

impl ShakeDetector {
    /// Create an idle detector that tags its events with `user_name`.
    pub fn new(user_name: impl Into<String>, settings: DetectorSettings) -> Self {
        Self {
            user_name: user_name.into(),
            settings,
            state: DetectorState::default(),
        }
    }

    /// Enter monitoring and reset counters and the baseline.
    ///
    /// Calling this while already monitoring performs the same full reset.
    pub fn start(&mut self) {
        self.state.active = true;
        self.state.shake_count = 0;
        self.state.event_count.reset();
        self.state.last_acceleration = AccelerationSample::zero();
        self.state.last_shake_time = None;
    }

    /// Leave monitoring. Counters are kept until the next start.
    pub fn stop(&mut self) {
        self.state.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Handle to the delivered-event counter, for the dispatcher.
    pub fn event_counter(&self) -> EventCounter {
        self.state.event_count.clone()
    }

    /// Evaluate a full device reading.
    ///
    /// Readings without a usable vector are ignored and leave the state
    /// untouched.
    pub fn on_reading(&mut self, reading: &MotionReading, now: Duration) -> Option<ShakeEvent> {
        let raw = *reading.select()?;
        self.on_sample(&raw, now)
    }

    /// Evaluate one raw sample taken at monotonic offset `now`.
    ///
    /// Returns the confirmed shake, if any. Does nothing while idle.
    pub fn on_sample(&mut self, raw: &AxisReading, now: Duration) -> Option<ShakeEvent> {
        if !self.state.active {
            return None;
        }

        let current = raw.to_sample();
        let delta = current - self.state.last_acceleration;
        let delta_magnitude = delta.magnitude();

        let cooled_down = match self.state.last_shake_time {
            Some(last) => now.saturating_sub(last) > self.settings.cooldown,
            None => true,
        };

        let event = if delta_magnitude > self.settings.threshold && cooled_down {
            Some(self.confirm(current, delta, now, EventType::Shake))
        } else {
            None
        };

        self.state.last_acceleration = current;
        event
    }

    /// Produce a shake from a random sample, bypassing threshold and cooldown.
    pub fn simulate_shake(&mut self, now: Duration) -> ShakeEvent {
        self.simulate_shake_with(&mut rand::thread_rng(), now)
    }

    /// Same as [`simulate_shake`](Self::simulate_shake) with a caller-supplied RNG.
    pub fn simulate_shake_with<R: Rng>(&mut self, rng: &mut R, now: Duration) -> ShakeEvent {
        let current = AccelerationSample::new(
            rng.gen_range(SIMULATED_AXIS_RANGE),
            rng.gen_range(SIMULATED_AXIS_RANGE),
            rng.gen_range(SIMULATED_AXIS_RANGE),
        );
        let delta = current - self.state.last_acceleration;

        let event = self.confirm(current, delta, now, EventType::SimulatedShake);
        self.state.last_acceleration = current;
        event
    }

    fn confirm(
        &mut self,
        current: AccelerationSample,
        delta: AccelerationSample,
        now: Duration,
        event_type: EventType,
    ) -> ShakeEvent {
        let delta_magnitude = delta.magnitude();

        self.state.last_shake_time = Some(now);
        self.state.shake_count += 1;

        ShakeEvent {
            timestamp: Utc::now(),
            user_name: self.user_name.clone(),
            event_type,
            acceleration: VectorReading::rounded(current, current.magnitude()),
            delta_acceleration: VectorReading::rounded(delta, delta_magnitude),
            shake_intensity: self.settings.classify(delta_magnitude),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn started() -> ShakeDetector {
        let mut detector = ShakeDetector::new("tester", DetectorSettings::default());
        detector.start();
        detector
    }

    #[test]
    fn test_idle_detector_ignores_samples() {
        let mut detector = ShakeDetector::new("tester", DetectorSettings::default());

        assert!(detector.on_sample(&AxisReading::new(50.0, 0.0, 0.0), ms(0)).is_none());
        assert_eq!(detector.state().last_acceleration, AccelerationSample::zero());
        assert_eq!(detector.state().shake_count, 0);
    }

    #[test]
    fn test_reference_scenario() {
        let mut detector = started();

        let first = detector
            .on_sample(&AxisReading::new(20.0, 0.0, 0.0), ms(0))
            .expect("first jump is a shake");
        assert_eq!(first.delta_acceleration.magnitude, 20.0);
        assert_eq!(first.shake_intensity, ShakeIntensity::Medium);
        assert_eq!(first.event_type, EventType::Shake);
        assert_eq!(detector.state().shake_count, 1);

        assert!(detector
            .on_sample(&AxisReading::new(20.0, 0.0, 0.0), ms(100))
            .is_none());

        let second = detector
            .on_sample(&AxisReading::new(0.0, 0.0, 30.0), ms(700))
            .expect("second jump is a shake");
        assert_eq!(second.delta_acceleration.magnitude, 36.06);
        assert_eq!(second.delta_acceleration.x, -20.0);
        assert_eq!(second.shake_intensity, ShakeIntensity::High);
        assert_eq!(detector.state().shake_count, 2);
    }

    #[test]
    fn test_cooldown_debounces() {
        let mut detector = started();

        assert!(detector.on_sample(&AxisReading::new(20.0, 0.0, 0.0), ms(0)).is_some());
        // Large swing, but only 100ms later
        assert!(detector.on_sample(&AxisReading::new(-20.0, 0.0, 0.0), ms(100)).is_none());
        assert_eq!(detector.state().shake_count, 1);

        // Exactly at the cooldown boundary is still too soon
        assert!(detector.on_sample(&AxisReading::new(20.0, 0.0, 0.0), ms(500)).is_none());
        assert!(detector.on_sample(&AxisReading::new(-20.0, 0.0, 0.0), ms(600)).is_some());
        assert_eq!(detector.state().shake_count, 2);
    }

    #[test]
    fn test_baseline_tracks_every_sample() {
        let mut detector = started();

        // Small steps never exceed the threshold even though the total does
        for (i, x) in [10.0, 20.0, 30.0, 40.0].iter().enumerate() {
            assert!(detector
                .on_sample(&AxisReading::new(*x, 0.0, 0.0), ms(i as u64 * 1000))
                .is_none());
        }
        assert_eq!(
            detector.state().last_acceleration,
            AccelerationSample::new(40.0, 0.0, 0.0)
        );
    }

    #[test]
    fn test_intensity_boundaries() {
        let settings = DetectorSettings::default();
        assert_eq!(settings.classify(18.0), ShakeIntensity::Low);
        assert_eq!(settings.classify(18.01), ShakeIntensity::Medium);
        assert_eq!(settings.classify(25.0), ShakeIntensity::Medium);
        assert_eq!(settings.classify(25.01), ShakeIntensity::High);

        let mut detector = started();
        let event = detector
            .on_sample(&AxisReading::new(0.0, 18.0, 0.0), ms(0))
            .unwrap();
        assert_eq!(event.shake_intensity, ShakeIntensity::Low);
    }

    #[test]
    fn test_missing_axes_count_as_zero() {
        let mut detector = started();
        let raw = AxisReading {
            x: None,
            y: Some(16.0),
            z: None,
        };

        let event = detector.on_sample(&raw, ms(0)).unwrap();
        assert_eq!(event.acceleration.x, 0.0);
        assert_eq!(event.acceleration.magnitude, 16.0);
    }

    #[test]
    fn test_unusable_reading_leaves_state() {
        let mut detector = started();
        detector.on_sample(&AxisReading::new(3.0, 0.0, 0.0), ms(0));

        assert!(detector.on_reading(&MotionReading::default(), ms(10)).is_none());
        assert_eq!(
            detector.state().last_acceleration,
            AccelerationSample::new(3.0, 0.0, 0.0)
        );
    }

    #[test]
    fn test_restart_resets_baseline_and_counts() {
        let mut detector = started();
        detector.on_sample(&AxisReading::new(20.0, 0.0, 0.0), ms(0));
        detector.event_counter().increment();
        detector.stop();
        assert!(!detector.is_active());

        detector.start();
        detector.start();
        let state = detector.state();
        assert!(state.active);
        assert_eq!(state.shake_count, 0);
        assert_eq!(state.event_count.get(), 0);
        assert_eq!(state.last_acceleration, AccelerationSample::zero());
        assert_eq!(state.last_shake_time, None);

        // The baseline is zero again, so the same sample confirms
        assert!(detector.on_sample(&AxisReading::new(20.0, 0.0, 0.0), ms(50)).is_some());
    }

    #[test]
    fn test_simulated_shake_bypasses_gate() {
        let mut detector = started();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        assert!(detector.on_sample(&AxisReading::new(20.0, 0.0, 0.0), ms(0)).is_some());
        let simulated = detector.simulate_shake_with(&mut rng, ms(1));

        assert_eq!(simulated.event_type, EventType::SimulatedShake);
        assert_eq!(detector.state().shake_count, 2);
        assert_eq!(detector.state().last_shake_time, Some(ms(1)));
        for axis in [simulated.acceleration.x, simulated.acceleration.y, simulated.acceleration.z] {
            assert!((-10.0..=10.0).contains(&axis));
        }
    }
}
