//! Monitoring session.
//!
//! A [`Monitor`] pumps sensor input from the collector through the shake
//! detector on the calling thread. Every confirmed shake is handed to the
//! dispatcher as its own task on the tokio runtime so slow sends never hold
//! up the next sample.

use crate::activity::SharedActivityLog;
use crate::collector::{Collector, CollectorError, SensorInput};
use crate::core::{ShakeDetector, ShakeEvent};
use crate::destination::DestinationSelector;
use crate::dispatch::{Accepted, DispatchError, Dispatcher, IngestionEndpoint};
use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How long `run` waits for input before checking the running flag.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Session time base shared by stream readings and simulated shakes.
///
/// Readings carrying a stream timestamp are evaluated at that timestamp;
/// everything else at the last evaluated offset plus the wall time since.
/// The offset never goes backwards.
#[derive(Debug, Clone, Copy)]
struct SessionClock {
    offset: Duration,
    observed_at: Instant,
}

impl SessionClock {
    fn new() -> Self {
        Self {
            offset: Duration::ZERO,
            observed_at: Instant::now(),
        }
    }

    /// Offset for the next input, recorded as the new session offset.
    fn advance(&mut self, timestamp: Option<Duration>) -> Duration {
        let now = match timestamp {
            Some(timestamp) => timestamp.max(self.offset),
            None => self.offset + self.observed_at.elapsed(),
        };
        self.offset = now;
        self.observed_at = Instant::now();
        now
    }
}

/// Snapshot of a monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStatus {
    pub session_id: Uuid,
    pub active: bool,
    pub shake_count: u64,
    pub event_count: u64,
    pub in_flight: usize,
}

/// Outcome of the dispatches awaited by [`Monitor::finish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinishSummary {
    pub delivered: usize,
    pub failed: usize,
}

pub struct Monitor {
    collector: Collector,
    detector: ShakeDetector,
    dispatcher: Arc<Dispatcher>,
    destinations: Arc<DestinationSelector>,
    runtime: Handle,
    in_flight: Vec<JoinHandle<Result<Accepted, DispatchError>>>,
    subscribed: bool,
    session_id: Uuid,
    clock: SessionClock,
    activity: SharedActivityLog,
}

impl Monitor {
    /// Build an idle monitor. The dispatcher shares the detector's event counter.
    pub fn new(
        collector: Collector,
        detector: ShakeDetector,
        endpoint: Arc<dyn IngestionEndpoint>,
        destinations: Arc<DestinationSelector>,
        activity: SharedActivityLog,
        runtime: Handle,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            endpoint,
            detector.event_counter(),
            activity.clone(),
        ));

        Self {
            collector,
            detector,
            dispatcher,
            destinations,
            runtime,
            in_flight: Vec::new(),
            subscribed: false,
            session_id: Uuid::new_v4(),
            clock: SessionClock::new(),
            activity,
        }
    }

    /// Subscribe to the sensor and reset the detector.
    ///
    /// If the sensor cannot deliver, the monitor stays idle.
    pub fn start(&mut self) -> Result<(), CollectorError> {
        if !self.subscribed {
            match self.collector.start() {
                Ok(()) | Err(CollectorError::AlreadyRunning) => self.subscribed = true,
                Err(e) => {
                    self.activity.error(e.to_string());
                    return Err(e);
                }
            }
        }

        self.detector.start();
        self.session_id = Uuid::new_v4();
        self.clock = SessionClock::new();
        self.activity.record_session_started();
        self.activity.info(format!(
            "Monitoring started (session {})",
            &self.session_id.to_string()[..8]
        ));
        Ok(())
    }

    /// Unsubscribe from the sensor and go idle. In-flight dispatches keep running.
    pub fn stop(&mut self) {
        self.collector.stop();
        self.subscribed = false;
        self.detector.stop();
        self.activity.info("Monitoring stopped");
    }

    pub fn is_active(&self) -> bool {
        self.detector.is_active()
    }

    pub fn detector(&self) -> &ShakeDetector {
        &self.detector
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn status(&self) -> MonitorStatus {
        let state = self.detector.state();
        MonitorStatus {
            session_id: self.session_id,
            active: state.active,
            shake_count: state.shake_count,
            event_count: state.event_count.get(),
            in_flight: self.in_flight.iter().filter(|h| !h.is_finished()).count(),
        }
    }

    /// Feed one input through the detector at offset `now`, held to the
    /// session clock so it never runs backwards.
    pub fn handle(&mut self, input: SensorInput, now: Duration) -> Option<ShakeEvent> {
        let now = self.clock.advance(Some(now));
        let event = match input {
            SensorInput::Motion(reading) => self.detector.on_reading(&reading, now),
            SensorInput::SimulateShake => Some(self.detector.simulate_shake(now)),
        }?;

        self.activity.record_shake_detected();
        self.spawn_dispatch(event.clone());
        Some(event)
    }

    /// Synthesize a shake and dispatch it.
    pub fn simulate_shake(&mut self) -> ShakeEvent {
        let now = self.clock.advance(None);
        let event = self.detector.simulate_shake(now);
        self.activity.record_shake_detected();
        self.spawn_dispatch(event.clone());
        event
    }

    fn spawn_dispatch(&mut self, event: ShakeEvent) {
        self.in_flight.retain(|h| !h.is_finished());

        let destination = match self.destinations.active() {
            Some(destination) => destination,
            None => {
                self.activity.record_send_failure();
                self.activity.error("No destination configured, shake not sent");
                return;
            }
        };

        let dispatcher = self.dispatcher.clone();
        let handle = self
            .runtime
            .spawn(async move { dispatcher.dispatch(event, destination).await });
        self.in_flight.push(handle);
    }

    /// Offset to evaluate `input` at on the session clock.
    fn offset_for(&mut self, input: &SensorInput) -> Duration {
        self.clock.advance(input.timestamp_ms().map(Duration::from_millis))
    }

    /// Pump the collector until `running` clears or the sensor stream ends.
    pub fn run(&mut self, running: &AtomicBool) {
        let receiver = self.collector.receiver();

        while running.load(Ordering::SeqCst) {
            match receiver.recv_timeout(RECV_TIMEOUT) {
                Ok(input) => {
                    let now = self.offset_for(&input);
                    self.handle(input, now);
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.in_flight.retain(|h| !h.is_finished());
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::info!("Sensor stream ended");
                    break;
                }
            }
        }
    }

    /// Unsubscribe from the sensor and wait for every in-flight dispatch.
    ///
    /// Must not be called from inside the runtime.
    pub fn finish(&mut self) -> FinishSummary {
        self.collector.stop();
        self.subscribed = false;

        let mut summary = FinishSummary::default();
        for handle in self.in_flight.drain(..) {
            match self.runtime.block_on(handle) {
                Ok(Ok(_)) => summary.delivered += 1,
                Ok(Err(_)) => summary.failed += 1,
                Err(e) => {
                    tracing::error!("Dispatch task failed: {}", e);
                    summary.failed += 1;
                }
            }
        }

        if let Err(e) = self.activity.save() {
            tracing::warn!("Could not save activity stats: {}", e);
        }

        summary
    }
}
