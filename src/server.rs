//! Relay server for clients that cannot reach Event Hubs themselves.
//!
//! This module provides an HTTP server that:
//! - Accepts shake telemetry via POST /api/telemetry and forwards it to the
//!   default destination configured through the environment
//! - Accepts telemetry or a validation probe for a caller-supplied
//!   connection string via POST /api/telemetry-custom
//! - Reports whether the default destination is usable via GET /api/config-status
//!
//! # Architecture
//!
//! ```text
//! shake-relay monitor ──→ POST /api/telemetry ──→ relay ──→ Event Hubs
//!                                                   ↓
//!                                      [serverTimestamp enrichment]
//! ```

use crate::config::{ConfigStatus, DefaultDestination};
use crate::core::TelemetryRecord;
use crate::destination::Destination;
use crate::dispatch::{EndpointError, IngestionEndpoint};
use crate::endpoint::{AcceptedResponse, CustomTelemetryRequest, ValidationResponse};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Destination used by POST /api/telemetry
    pub default_destination: DefaultDestination,
    /// Where accepted records are forwarded
    pub downstream: Arc<dyn IngestionEndpoint>,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(
        port: u16,
        default_destination: DefaultDestination,
        downstream: Arc<dyn IngestionEndpoint>,
    ) -> Self {
        Self {
            port,
            default_destination,
            downstream,
        }
    }
}

/// Shared server state
pub struct ServerState {
    default_destination: DefaultDestination,
    downstream: Arc<dyn IngestionEndpoint>,
}

impl ServerState {
    /// Create new server state
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            default_destination: config.default_destination.clone(),
            downstream: config.downstream.clone(),
        }
    }

    /// Enrich a record and make the single forwarding attempt.
    async fn forward(
        &self,
        record: &TelemetryRecord,
        destination: &Destination,
    ) -> Result<AcceptedResponse, ApiError> {
        let payload = enrich(record)?;

        match self.downstream.send(destination, Some(&payload)).await {
            Ok(delivery) => {
                tracing::info!(
                    "Forwarded {} from {} to {}",
                    record.event_type.as_str(),
                    record.user_name,
                    delivery.endpoint_name
                );
                Ok(AcceptedResponse {
                    accepted: true,
                    endpoint_name: delivery.endpoint_name,
                })
            }
            Err(EndpointError::Credential(e)) => Err(api_error(
                StatusCode::BAD_REQUEST,
                "INVALID_CONNECTION_STRING",
                format!("Invalid connection string: {e}"),
            )),
            Err(e) => {
                tracing::error!("Failed to forward telemetry: {}", e);
                Err(api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "SEND_FAILED",
                    format!("Send failed: {e}"),
                ))
            }
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// The forwarded form of a record: the record itself plus relay-side fields.
fn enrich(record: &TelemetryRecord) -> Result<serde_json::Value, ApiError> {
    let mut value = serde_json::to_value(record).map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SERIALIZATION_ERROR",
            format!("Could not encode telemetry: {e}"),
        )
    })?;

    if let Some(fields) = value.as_object_mut() {
        fields.insert(
            "serverTimestamp".to_string(),
            Utc::now()
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .into(),
        );
        fields.insert(
            "accelerationValue".to_string(),
            record.acceleration.magnitude.into(),
        );
        fields.insert(
            "deltaAccelerationValue".to_string(),
            record.delta_acceleration.magnitude.into(),
        );
    }

    Ok(value)
}

/// Turn a body the JSON extractor refused into a 400.
fn bad_body(rejection: JsonRejection) -> ApiError {
    api_error(
        StatusCode::BAD_REQUEST,
        "INVALID_BODY",
        format!("Invalid request body: {}", rejection.body_text()),
    )
}

/// Decode a telemetry record, requiring a non-blank `userName`.
fn parse_record(value: serde_json::Value) -> Result<TelemetryRecord, ApiError> {
    let has_user_name = value
        .get("userName")
        .and_then(|name| name.as_str())
        .is_some_and(|name| !name.trim().is_empty());
    if !has_user_name {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "USER_NAME_REQUIRED",
            "userName required",
        ));
    }

    serde_json::from_value(value).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_TELEMETRY",
            format!("Invalid telemetry: {e}"),
        )
    })
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /api/config-status
async fn config_status(State(state): State<Arc<ServerState>>) -> Json<ConfigStatus> {
    Json(state.default_destination.status())
}

/// POST /api/telemetry
///
/// Forwards a record to the default destination.
async fn telemetry(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let Json(value) = payload.map_err(bad_body)?;
    let record = parse_record(value)?;

    let destination = match state.default_destination.destination() {
        Some(destination) if state.default_destination.is_ready() => destination,
        _ => {
            return Err(api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "NOT_CONFIGURED",
                "Default destination is not configured",
            ))
        }
    };

    let accepted = state.forward(&record, &destination).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// POST /api/telemetry-custom
///
/// With `telemetry: null` only validates the connection string; otherwise
/// forwards the record to the hub the connection string names.
async fn telemetry_custom(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<CustomTelemetryRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(bad_body)?;
    if request.connection_string.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "CONNECTION_STRING_REQUIRED",
            "connectionString required",
        ));
    }

    let destination = Destination::custom(request.connection_string);
    state.downstream.check(&destination).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_CONNECTION_STRING",
            format!("Invalid connection string: {e}"),
        )
    })?;

    let telemetry = match request.telemetry {
        Some(telemetry) if !telemetry.is_null() => telemetry,
        _ => {
            return match state.downstream.send(&destination, None).await {
                Ok(delivery) => {
                    tracing::info!("Validated custom connection to hub: {}", delivery.endpoint_name);
                    Ok(Json(ValidationResponse {
                        validated: true,
                        endpoint_name: delivery.endpoint_name,
                    })
                    .into_response())
                }
                Err(e) => {
                    tracing::warn!("Custom connection string rejected: {}", e);
                    Err(api_error(
                        StatusCode::BAD_REQUEST,
                        "INVALID_CONNECTION_STRING",
                        format!("Invalid connection string: {e}"),
                    ))
                }
            };
        }
    };

    let record = parse_record(telemetry)?;

    let accepted = state.forward(&record, &destination).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)).into_response())
}

/// Build the relay router.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/config-status", get(config_status))
        .route("/api/telemetry", post(telemetry))
        .route("/api/telemetry-custom", post(telemetry_custom))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new(&config));
    let status = config.default_destination.status();
    if !status.producer_ready {
        tracing::warn!(
            "Default destination not ready (source: {:?}); /api/telemetry will answer 503",
            status.connection_string_source
        );
    }

    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Shake relay listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::AccelerationSample;
    use crate::core::{EventType, ShakeIntensity, VectorReading};

    #[test]
    fn test_enrich_adds_relay_fields() {
        let record = TelemetryRecord {
            timestamp: Utc::now(),
            user_name: "ada".to_string(),
            event_type: EventType::Shake,
            acceleration: VectorReading::rounded(AccelerationSample::new(0.0, 0.0, 30.0), 30.0),
            delta_acceleration: VectorReading::rounded(
                AccelerationSample::new(-20.0, 0.0, 30.0),
                1300f64.sqrt(),
            ),
            shake_intensity: ShakeIntensity::High,
        };

        let value = enrich(&record).unwrap();
        assert_eq!(value["userName"], "ada");
        assert_eq!(value["accelerationValue"], 30.0);
        assert_eq!(value["deltaAccelerationValue"], 36.06);
        assert!(value["serverTimestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_parse_record_requires_user_name() {
        let mut value = serde_json::json!({
            "timestamp": "2024-03-01T12:30:05.123Z",
            "eventType": "shake",
            "acceleration": {"x": 20.0, "y": 0.0, "z": 0.0, "magnitude": 20.0},
            "deltaAcceleration": {"x": 20.0, "y": 0.0, "z": 0.0, "magnitude": 20.0},
            "shakeIntensity": "medium"
        });

        let (status, Json(body)) = parse_record(value.clone()).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "userName required");

        value["userName"] = "ada".into();
        assert_eq!(parse_record(value.clone()).unwrap().user_name, "ada");

        value["shakeIntensity"] = "extreme".into();
        let (status, Json(body)) = parse_record(value).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "INVALID_TELEMETRY");
    }
}
