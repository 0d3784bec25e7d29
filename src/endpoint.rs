//! HTTP ingestion endpoints.
//!
//! [`EventHubsEndpoint`] talks to the Event Hubs REST API directly and signs
//! each request with a shared access signature. [`RelayEndpoint`] posts to a
//! relay server that holds the default credential itself.

use crate::config::ConfigStatus;
use crate::destination::{CredentialError, Destination, DestinationKind};
use crate::dispatch::{Delivery, EndpointError, IngestionEndpoint};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Content type the Event Hubs send API documents for single events.
const EVENT_CONTENT_TYPE: &str = "application/atom+xml;type=entry;charset=utf-8";

/// Body of `POST /api/telemetry-custom`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomTelemetryRequest {
    pub connection_string: String,
    /// `None` validates the connection string without sending
    #[serde(default)]
    pub telemetry: Option<serde_json::Value>,
}

/// Answer to a validation-only request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub validated: bool,
    pub endpoint_name: String,
}

/// Answer to an accepted telemetry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    pub accepted: bool,
    pub endpoint_name: String,
}

/// Error body returned by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

async fn rejection(response: reqwest::Response) -> EndpointError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    EndpointError::Rejected { status, message }
}

fn client() -> Result<reqwest::Client, EndpointError> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| EndpointError::Client(e.to_string()))
}

/// Direct Event Hubs REST delivery.
pub struct EventHubsEndpoint {
    client: reqwest::Client,
}

impl EventHubsEndpoint {
    pub fn new() -> Result<Self, EndpointError> {
        Ok(Self { client: client()? })
    }
}

#[async_trait]
impl IngestionEndpoint for EventHubsEndpoint {
    async fn send(
        &self,
        destination: &Destination,
        payload: Option<&serde_json::Value>,
    ) -> Result<Delivery, EndpointError> {
        let target = destination.target()?;

        let request = match payload {
            Some(record) => {
                let body = serde_json::to_vec(record)
                    .map_err(|e| EndpointError::Client(e.to_string()))?;
                self.client
                    .post(target.messages_url())
                    .header("Content-Type", EVENT_CONTENT_TYPE)
                    .body(body)
            }
            None => self.client.get(target.description_url()),
        };

        let response = request
            .header("Authorization", target.fresh_sas_token())
            .send()
            .await
            .map_err(|e| EndpointError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        Ok(Delivery {
            endpoint_name: target.entity_path,
        })
    }
}

/// Delivery through a relay server.
pub struct RelayEndpoint {
    client: reqwest::Client,
    base_url: String,
}

impl RelayEndpoint {
    pub fn new(base_url: impl Into<String>) -> Result<Self, EndpointError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(EndpointError::Client("relay URL is empty".to_string()));
        }
        Ok(Self {
            client: client()?,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn telemetry_url(&self) -> String {
        format!("{}/api/telemetry", self.base_url)
    }

    pub fn custom_telemetry_url(&self) -> String {
        format!("{}/api/telemetry-custom", self.base_url)
    }

    pub fn config_status_url(&self) -> String {
        format!("{}/api/config-status", self.base_url)
    }

    async fn probe_default(&self) -> Result<Delivery, EndpointError> {
        let response = self
            .client
            .get(self.config_status_url())
            .send()
            .await
            .map_err(|e| EndpointError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let status: ConfigStatus = response
            .json()
            .await
            .map_err(|e| EndpointError::Client(e.to_string()))?;

        if !status.producer_ready {
            return Err(EndpointError::Rejected {
                status: 503,
                message: "Default destination is not configured".to_string(),
            });
        }

        Ok(Delivery {
            endpoint_name: status.hub_name_used.unwrap_or_else(|| "default".to_string()),
        })
    }

    async fn probe_custom(&self, destination: &Destination) -> Result<Delivery, EndpointError> {
        let request = CustomTelemetryRequest {
            connection_string: destination.credential().to_string(),
            telemetry: None,
        };

        let response = self
            .client
            .post(self.custom_telemetry_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| EndpointError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let validation: ValidationResponse = response
            .json()
            .await
            .map_err(|e| EndpointError::Client(e.to_string()))?;

        Ok(Delivery {
            endpoint_name: validation.endpoint_name,
        })
    }
}

#[async_trait]
impl IngestionEndpoint for RelayEndpoint {
    fn check(&self, destination: &Destination) -> Result<(), CredentialError> {
        match destination.kind() {
            // The relay holds the default credential
            DestinationKind::Default => Ok(()),
            DestinationKind::Custom => destination.target().map(|_| ()),
        }
    }

    async fn send(
        &self,
        destination: &Destination,
        payload: Option<&serde_json::Value>,
    ) -> Result<Delivery, EndpointError> {
        let record = match payload {
            Some(record) => record,
            None => {
                return match destination.kind() {
                    DestinationKind::Default => self.probe_default().await,
                    DestinationKind::Custom => self.probe_custom(destination).await,
                }
            }
        };

        let request = match destination.kind() {
            DestinationKind::Default => self.client.post(self.telemetry_url()).json(record),
            DestinationKind::Custom => self.client.post(self.custom_telemetry_url()).json(
                &CustomTelemetryRequest {
                    connection_string: destination.credential().to_string(),
                    telemetry: Some(record.clone()),
                },
            ),
        };

        let response = request
            .send()
            .await
            .map_err(|e| EndpointError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(rejection(response).await);
        }

        let endpoint_name = response
            .json::<AcceptedResponse>()
            .await
            .map(|r| r.endpoint_name)
            .unwrap_or_else(|_| "relay".to_string());

        Ok(Delivery { endpoint_name })
    }
}
