//! End-to-end tests for detector -> dispatcher -> endpoint

use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use shake_relay::activity::create_shared_log;
use shake_relay::collector::{AxisReading, Collector};
use shake_relay::config::DestinationStore;
use shake_relay::core::{DetectorSettings, EventType, ShakeDetector, ShakeIntensity};
use shake_relay::destination::{Destination, DestinationSelector};
use shake_relay::dispatch::{
    Delivery, DispatchError, Dispatcher, EndpointError, IngestionEndpoint, ValidationError,
};
use shake_relay::monitor::Monitor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WITH_ENTITY: &str = "Endpoint=sb://demo-ns.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=abc=;EntityPath=shakes";

/// Endpoint that accepts everything, or nothing.
struct CountingEndpoint {
    requests: AtomicUsize,
    accept: bool,
}

impl CountingEndpoint {
    fn new(accept: bool) -> Self {
        Self {
            requests: AtomicUsize::new(0),
            accept,
        }
    }
}

#[async_trait]
impl IngestionEndpoint for CountingEndpoint {
    async fn send(
        &self,
        destination: &Destination,
        _payload: Option<&serde_json::Value>,
    ) -> Result<Delivery, EndpointError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let target = destination.target()?;
        // Let concurrent dispatches overlap
        tokio::time::sleep(Duration::from_millis(10)).await;
        if self.accept {
            Ok(Delivery {
                endpoint_name: target.entity_path,
            })
        } else {
            Err(EndpointError::Rejected {
                status: 401,
                message: "unauthorized".to_string(),
            })
        }
    }
}

fn at(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[tokio::test]
async fn test_reference_scenario_concurrent_dispatch() {
    let mut detector = ShakeDetector::new("ada", DetectorSettings::default());
    let endpoint = Arc::new(CountingEndpoint::new(true));
    let dispatcher = Arc::new(Dispatcher::new(
        endpoint.clone(),
        detector.event_counter(),
        create_shared_log(),
    ));
    detector.start();

    let samples = [
        (AxisReading::new(20.0, 0.0, 0.0), at(0)),
        (AxisReading::new(20.0, 0.0, 0.0), at(100)),
        (AxisReading::new(0.0, 0.0, 30.0), at(700)),
    ];

    let mut handles = Vec::new();
    let mut intensities = Vec::new();
    for (sample, now) in samples {
        if let Some(event) = detector.on_sample(&sample, now) {
            intensities.push(event.shake_intensity);
            let dispatcher = dispatcher.clone();
            let destination = Destination::custom(WITH_ENTITY);
            handles.push(tokio::spawn(async move {
                dispatcher.dispatch(event, destination).await
            }));
        }
    }

    assert_eq!(intensities, vec![ShakeIntensity::Medium, ShakeIntensity::High]);
    assert_eq!(detector.state().shake_count, 2);

    let mut totals = Vec::new();
    for handle in handles {
        totals.push(handle.await.unwrap().unwrap().event_count);
    }
    totals.sort();
    assert_eq!(totals, vec![1, 2]);
    assert_eq!(detector.state().event_count.get(), 2);
    assert_eq!(endpoint.requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_dispatch_returns_error_and_keeps_count() {
    let mut detector = ShakeDetector::new("ada", DetectorSettings::default());
    let dispatcher = Dispatcher::new(
        Arc::new(CountingEndpoint::new(false)),
        detector.event_counter(),
        create_shared_log(),
    );
    detector.start();

    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let event = detector.simulate_shake_with(&mut rng, at(0));
    assert_eq!(event.event_type, EventType::SimulatedShake);

    let result = dispatcher
        .dispatch(event, Destination::custom(WITH_ENTITY))
        .await;

    assert!(matches!(
        result,
        Err(DispatchError::Failed(EndpointError::Rejected { status: 401, .. }))
    ));
    assert_eq!(detector.state().event_count.get(), 0);
    assert_eq!(dispatcher.activity().stats().send_failures, 1);
}

#[tokio::test]
async fn test_validate_touches_no_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = DestinationStore::new(dir.path().join("custom_destination.json"));

    let detector = ShakeDetector::new("ada", DetectorSettings::default());
    let dispatcher = Dispatcher::new(
        Arc::new(CountingEndpoint::new(true)),
        detector.event_counter(),
        create_shared_log(),
    );

    let validated = dispatcher
        .validate(&Destination::custom(WITH_ENTITY))
        .await
        .unwrap();
    assert_eq!(validated.endpoint_name, "shakes");

    let rejected = Dispatcher::new(
        Arc::new(CountingEndpoint::new(false)),
        detector.event_counter(),
        create_shared_log(),
    )
    .validate(&Destination::custom(WITH_ENTITY))
    .await;
    assert!(matches!(rejected, Err(ValidationError::Rejected(_))));

    assert_eq!(detector.state().event_count.get(), 0);
    assert!(store.load().unwrap().is_none());
    assert!(!store.path().exists());
}

#[test]
fn test_monitor_replays_stream_with_simulated_shake() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let stream = "\
{\"timestampMs\": 0, \"accelerationIncludingGravity\": {\"x\": 20, \"y\": 0, \"z\": 0}}
simulate
{\"timestampMs\": 50, \"acceleration\": {\"x\": null, \"y\": 1, \"z\": 1}}
";
    let endpoint = Arc::new(CountingEndpoint::new(true));
    let mut monitor = Monitor::new(
        Collector::from_reader(std::io::Cursor::new(stream)),
        ShakeDetector::new("ada", DetectorSettings::default()),
        endpoint.clone(),
        Arc::new(DestinationSelector::new(
            Some(Destination::default_hub(WITH_ENTITY, None)),
            None,
        )),
        create_shared_log(),
        runtime.handle().clone(),
    );

    monitor.start().unwrap();
    monitor.run(&AtomicBool::new(true));
    let summary = monitor.finish();

    // One real shake, one simulated; the reading without an x axis is skipped
    assert_eq!(summary.delivered, 2);
    assert_eq!(monitor.status().shake_count, 2);
    assert_eq!(monitor.status().event_count, 2);
    assert_eq!(endpoint.requests.load(Ordering::SeqCst), 2);
}
