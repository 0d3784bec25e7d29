//! Telemetry dispatch.
//!
//! The [`Dispatcher`] turns a confirmed [`ShakeEvent`] into one request
//! against an [`IngestionEndpoint`]. There is no retry and no queue: a failed
//! send is logged once and reported back to the caller.

use crate::activity::SharedActivityLog;
use crate::core::{EventCounter, EventType, ShakeEvent};
use crate::destination::{CredentialError, Destination};
use async_trait::async_trait;
use std::sync::Arc;

/// Result of a request the endpoint accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Name of the hub (or relay target) that accepted the request
    pub endpoint_name: String,
}

/// Errors reported by an ingestion endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointError {
    /// The credential could not be turned into a target
    Credential(CredentialError),
    /// The request never got a response
    Network(String),
    /// The endpoint answered with a non-success status
    Rejected { status: u16, message: String },
    /// The endpoint client could not be used
    Client(String),
}

impl std::fmt::Display for EndpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointError::Credential(e) => write!(f, "Invalid connection string: {e}"),
            EndpointError::Network(msg) => write!(f, "Network error: {msg}"),
            EndpointError::Rejected { status, message } if message.is_empty() => {
                write!(f, "Send failed HTTP {status}")
            }
            EndpointError::Rejected { status, message } => {
                write!(f, "Send failed HTTP {status}: {message}")
            }
            EndpointError::Client(msg) => write!(f, "Endpoint client error: {msg}"),
        }
    }
}

impl std::error::Error for EndpointError {}

impl From<CredentialError> for EndpointError {
    fn from(e: CredentialError) -> Self {
        EndpointError::Credential(e)
    }
}

/// Something that accepts telemetry records over the network.
#[async_trait]
pub trait IngestionEndpoint: Send + Sync {
    /// Check that a destination is usable without touching the network.
    fn check(&self, destination: &Destination) -> Result<(), CredentialError> {
        destination.target().map(|_| ())
    }

    /// Issue one request. `None` probes the destination without sending a record.
    async fn send(
        &self,
        destination: &Destination,
        payload: Option<&serde_json::Value>,
    ) -> Result<Delivery, EndpointError>;
}

/// A record the endpoint accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub endpoint_name: String,
    /// Delivered events in this session, including this one
    pub event_count: u64,
}

/// Why a dispatch did not deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// Caught before any network attempt
    InvalidCredentialShape(CredentialError),
    /// The single attempt failed
    Failed(EndpointError),
    /// The event could not be encoded
    Serialization(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::InvalidCredentialShape(e) => write!(f, "Invalid connection string: {e}"),
            DispatchError::Failed(EndpointError::Network(_)) => {
                write!(f, "Network error sending telemetry")
            }
            DispatchError::Failed(e) => write!(f, "{e}"),
            DispatchError::Serialization(msg) => write!(f, "Could not encode telemetry: {msg}"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// A destination that answered the probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    pub endpoint_name: String,
}

/// Why a destination did not validate.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    InvalidCredentialShape(CredentialError),
    Rejected(EndpointError),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidCredentialShape(e) => {
                write!(f, "Invalid connection string: {e}")
            }
            ValidationError::Rejected(EndpointError::Credential(e)) => {
                write!(f, "Invalid connection string: {e}")
            }
            ValidationError::Rejected(e) => write!(f, "Destination rejected: {e}"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Sends shake events to the active destination.
pub struct Dispatcher {
    endpoint: Arc<dyn IngestionEndpoint>,
    event_count: EventCounter,
    activity: SharedActivityLog,
}

impl Dispatcher {
    pub fn new(
        endpoint: Arc<dyn IngestionEndpoint>,
        event_count: EventCounter,
        activity: SharedActivityLog,
    ) -> Self {
        Self {
            endpoint,
            event_count,
            activity,
        }
    }

    /// Delivered events since the counter was last reset.
    pub fn event_count(&self) -> u64 {
        self.event_count.get()
    }

    pub fn activity(&self) -> &SharedActivityLog {
        &self.activity
    }

    /// Send one event. The counter only moves when the endpoint accepts it.
    pub async fn dispatch(
        &self,
        event: ShakeEvent,
        destination: Destination,
    ) -> Result<Accepted, DispatchError> {
        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(e) => return Err(self.fail(DispatchError::Serialization(e.to_string()))),
        };

        if let Err(e) = self.endpoint.check(&destination) {
            return Err(self.fail(DispatchError::InvalidCredentialShape(e)));
        }

        match self.endpoint.send(&destination, Some(&payload)).await {
            Ok(delivery) => {
                let event_count = self.event_count.increment();
                self.activity.record_event_sent();

                let label = match event.event_type {
                    EventType::Shake => "Real",
                    EventType::SimulatedShake => "Simulated",
                };
                self.activity.success(format!(
                    "{} shake sent (Δ{:.2} m/s², {})",
                    label, event.delta_acceleration.magnitude, event.shake_intensity
                ));

                Ok(Accepted {
                    endpoint_name: delivery.endpoint_name,
                    event_count,
                })
            }
            Err(EndpointError::Credential(e)) => {
                Err(self.fail(DispatchError::InvalidCredentialShape(e)))
            }
            Err(e) => Err(self.fail(DispatchError::Failed(e))),
        }
    }

    fn fail(&self, error: DispatchError) -> DispatchError {
        self.activity.record_send_failure();
        self.activity.error(error.to_string());
        error
    }

    /// Probe a destination. Counters and persisted state are left alone.
    pub async fn validate(&self, destination: &Destination) -> Result<Validated, ValidationError> {
        if let Err(e) = self.endpoint.check(destination) {
            let error = ValidationError::InvalidCredentialShape(e);
            tracing::warn!("{}", error);
            return Err(error);
        }

        match self.endpoint.send(destination, None).await {
            Ok(delivery) => {
                tracing::info!(
                    "Destination validated ({}): {}",
                    destination.kind().as_str(),
                    delivery.endpoint_name
                );
                Ok(Validated {
                    endpoint_name: delivery.endpoint_name,
                })
            }
            Err(EndpointError::Credential(e)) => {
                let error = ValidationError::InvalidCredentialShape(e);
                tracing::warn!("{}", error);
                Err(error)
            }
            Err(e) => {
                let error = ValidationError::Rejected(e);
                tracing::warn!("{}", error);
                Err(error)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingEndpoint;
    use super::*;
    use crate::activity::{create_shared_log, ActivityKind};
    use crate::collector::AxisReading;
    use crate::core::{DetectorSettings, ShakeDetector};
    use std::time::Duration;

    const WITH_ENTITY: &str = "Endpoint=sb://demo-ns.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=abc=;EntityPath=shakes";
    const WITHOUT_ENTITY: &str =
        "Endpoint=sb://demo-ns.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=abc=";

    fn shake() -> ShakeEvent {
        let mut detector = ShakeDetector::new("ada", DetectorSettings::default());
        detector.start();
        detector
            .on_sample(&AxisReading::new(20.0, 0.0, 0.0), Duration::ZERO)
            .unwrap()
    }

    fn dispatcher(endpoint: Arc<RecordingEndpoint>) -> Dispatcher {
        Dispatcher::new(endpoint, EventCounter::new(), create_shared_log())
    }

    #[tokio::test]
    async fn test_dispatch_success_counts_and_logs() {
        let endpoint = Arc::new(RecordingEndpoint::default());
        let dispatcher = dispatcher(endpoint.clone());

        let accepted = dispatcher
            .dispatch(shake(), Destination::custom(WITH_ENTITY))
            .await
            .unwrap();

        assert_eq!(accepted.endpoint_name, "shakes");
        assert_eq!(accepted.event_count, 1);
        assert_eq!(dispatcher.event_count(), 1);

        let sent = endpoint.sent.lock().unwrap();
        let payload = sent[0].as_ref().unwrap();
        assert_eq!(payload["userName"], "ada");
        assert_eq!(payload["shakeIntensity"], "medium");
        drop(sent);

        let entries = dispatcher.activity().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, ActivityKind::Success);
        assert_eq!(entries[0].message, "Real shake sent (Δ20.00 m/s², medium)");
    }

    #[tokio::test]
    async fn test_dispatch_failure_leaves_count() {
        let endpoint = Arc::new(RecordingEndpoint::failing(EndpointError::Rejected {
            status: 401,
            message: String::new(),
        }));
        let dispatcher = dispatcher(endpoint.clone());

        let err = dispatcher
            .dispatch(shake(), Destination::custom(WITH_ENTITY))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Failed(EndpointError::Rejected { status: 401, .. })));
        assert_eq!(dispatcher.event_count(), 0);
        assert_eq!(endpoint.requests(), 1);

        let stats = dispatcher.activity().stats();
        assert_eq!(stats.send_failures, 1);
        assert_eq!(stats.events_sent, 0);
        assert_eq!(dispatcher.activity().entries()[0].message, "Send failed HTTP 401");
    }

    #[tokio::test]
    async fn test_network_failure_message() {
        let endpoint = Arc::new(RecordingEndpoint::failing(EndpointError::Network(
            "connection refused".to_string(),
        )));
        let dispatcher = dispatcher(endpoint);

        let err = dispatcher
            .dispatch(shake(), Destination::custom(WITH_ENTITY))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Network error sending telemetry");
    }

    #[tokio::test]
    async fn test_bad_credential_never_hits_network() {
        let endpoint = Arc::new(RecordingEndpoint::default());
        let dispatcher = dispatcher(endpoint.clone());

        let err = dispatcher
            .dispatch(shake(), Destination::custom(WITHOUT_ENTITY))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            DispatchError::InvalidCredentialShape(CredentialError::MissingSegment("EntityPath"))
        );
        assert_eq!(endpoint.requests(), 0);
        assert_eq!(dispatcher.event_count(), 0);
    }

    #[tokio::test]
    async fn test_validate_leaves_counters() {
        let endpoint = Arc::new(RecordingEndpoint::default());
        let dispatcher = dispatcher(endpoint.clone());

        let validated = dispatcher
            .validate(&Destination::custom(WITH_ENTITY))
            .await
            .unwrap();
        assert_eq!(validated.endpoint_name, "shakes");
        assert_eq!(endpoint.sent.lock().unwrap()[0], None);

        let err = dispatcher
            .validate(&Destination::custom(WITHOUT_ENTITY))
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCredentialShape(_)));
        assert_eq!(endpoint.requests(), 1);

        assert_eq!(dispatcher.event_count(), 0);
        let stats = dispatcher.activity().stats();
        assert_eq!(stats.events_sent, 0);
        assert_eq!(stats.send_failures, 0);
    }

    #[tokio::test]
    async fn test_validate_reports_rejection() {
        let endpoint = Arc::new(RecordingEndpoint::failing(EndpointError::Rejected {
            status: 404,
            message: "hub not found".to_string(),
        }));
        let dispatcher = dispatcher(endpoint);

        let err = dispatcher
            .validate(&Destination::custom(WITH_ENTITY))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("hub not found"));
    }
}
