//! Delivery destinations and their credentials.
//!
//! A destination credential is an Event Hubs connection string:
//!
//! ```text
//! Endpoint=sb://<namespace>.servicebus.windows.net/;SharedAccessKeyName=<name>;SharedAccessKey=<key>;EntityPath=<hub>
//! ```
//!
//! `EntityPath` names the hub events are delivered to. Custom destinations
//! must embed it; the default destination may take the hub name from
//! separate configuration instead.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::RwLock;

/// Lifetime of a generated shared access signature, in seconds.
pub const SAS_TOKEN_TTL_SECS: i64 = 3600;

/// Which configured destination a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    Default,
    Custom,
}

impl DestinationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationKind::Default => "default",
            DestinationKind::Custom => "custom",
        }
    }
}

/// A credentialed delivery target.
#[derive(Clone, PartialEq, Eq)]
pub struct Destination {
    kind: DestinationKind,
    credential: String,
    hub_name: Option<String>,
}

impl Destination {
    /// The default destination, with an optional hub name used when the
    /// connection string has no `EntityPath`.
    pub fn default_hub(credential: impl Into<String>, hub_name: Option<String>) -> Self {
        Self {
            kind: DestinationKind::Default,
            credential: credential.into(),
            hub_name: hub_name.filter(|h| !h.trim().is_empty()),
        }
    }

    /// A user-supplied destination.
    pub fn custom(credential: impl Into<String>) -> Self {
        Self {
            kind: DestinationKind::Custom,
            credential: credential.into(),
            hub_name: None,
        }
    }

    /// The default destination as held by a relay; the credential stays on
    /// the relay side.
    pub fn relay_default() -> Self {
        Self {
            kind: DestinationKind::Default,
            credential: String::new(),
            hub_name: None,
        }
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn hub_name(&self) -> Option<&str> {
        self.hub_name.as_deref()
    }

    /// Resolve the delivery target without touching the network.
    pub fn target(&self) -> Result<EventHubTarget, CredentialError> {
        let parsed = ConnectionString::parse(&self.credential)?;

        let entity_path = match (parsed.entity_path, self.kind) {
            (Some(path), _) => path,
            (None, DestinationKind::Default) => self
                .hub_name
                .clone()
                .ok_or(CredentialError::MissingSegment("EntityPath"))?,
            (None, DestinationKind::Custom) => {
                return Err(CredentialError::MissingSegment("EntityPath"))
            }
        };

        Ok(EventHubTarget {
            host: parsed.host,
            entity_path,
            key_name: parsed.key_name,
            key: parsed.key,
        })
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("kind", &self.kind)
            .field("credential", &"<redacted>")
            .field("hub_name", &self.hub_name)
            .finish()
    }
}

/// Credential shape errors. These are caught before any network attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The credential string is empty
    Empty,
    /// A segment is not `Key=Value`
    Malformed(String),
    /// A mandatory segment is missing
    MissingSegment(&'static str),
    /// The `Endpoint` segment is not a usable URI
    InvalidEndpoint(String),
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialError::Empty => write!(f, "Connection string is empty"),
            CredentialError::Malformed(segment) => {
                write!(f, "Malformed connection string segment '{segment}'")
            }
            CredentialError::MissingSegment(name) => {
                write!(f, "Connection string must include {name}")
            }
            CredentialError::InvalidEndpoint(endpoint) => {
                write!(f, "Invalid connection string endpoint '{endpoint}'")
            }
        }
    }
}

impl std::error::Error for CredentialError {}

/// Parsed Event Hubs connection string.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub host: String,
    pub key_name: String,
    pub key: String,
    pub entity_path: Option<String>,
}

impl ConnectionString {
    /// Parse `Key=Value` segments separated by `;`. Keys are case-insensitive
    /// and values may themselves contain `=`.
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        if raw.trim().is_empty() {
            return Err(CredentialError::Empty);
        }

        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut entity_path = None;

        for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (name, value) = segment
                .split_once('=')
                .ok_or_else(|| CredentialError::Malformed(segment.to_string()))?;
            let value = value.trim().to_string();

            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value),
                "sharedaccesskeyname" => key_name = Some(value),
                "sharedaccesskey" => key = Some(value),
                "entitypath" => entity_path = Some(value).filter(|v| !v.is_empty()),
                _ => {}
            }
        }

        let endpoint = endpoint.ok_or(CredentialError::MissingSegment("Endpoint"))?;
        let key_name = key_name.ok_or(CredentialError::MissingSegment("SharedAccessKeyName"))?;
        let key = key.ok_or(CredentialError::MissingSegment("SharedAccessKey"))?;

        Ok(Self {
            host: endpoint_host(&endpoint)?,
            key_name,
            key,
            entity_path,
        })
    }
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host", &self.host)
            .field("key_name", &self.key_name)
            .field("entity_path", &self.entity_path)
            .finish_non_exhaustive()
    }
}

/// Extract the namespace host from `sb://host/`.
fn endpoint_host(endpoint: &str) -> Result<String, CredentialError> {
    let without_scheme = endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint);
    let host = without_scheme.split('/').next().unwrap_or_default().trim();

    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(CredentialError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(host.to_string())
}

/// A fully resolved Event Hub to deliver to.
#[derive(Clone, PartialEq, Eq)]
pub struct EventHubTarget {
    pub host: String,
    pub entity_path: String,
    pub key_name: String,
    key: String,
}

impl EventHubTarget {
    /// The hub's resource URI, as signed into SAS tokens.
    pub fn resource_uri(&self) -> String {
        format!("https://{}/{}", self.host, self.entity_path)
    }

    /// REST endpoint accepting a single event.
    pub fn messages_url(&self) -> String {
        format!("{}/messages?api-version=2014-01", self.resource_uri())
    }

    /// REST endpoint describing the hub.
    pub fn description_url(&self) -> String {
        format!("{}?api-version=2014-01", self.resource_uri())
    }

    /// Build a shared access signature valid until `expiry` (unix seconds).
    pub fn sas_token(&self, expiry: i64) -> String {
        let encoded_uri = urlencoding::encode(&self.resource_uri()).into_owned();
        let string_to_sign = format!("{encoded_uri}\n{expiry}");

        let mut mac = Hmac::<Sha256>::new_from_slice(self.key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(string_to_sign.as_bytes());
        let signature =
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        format!(
            "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
            encoded_uri,
            urlencoding::encode(&signature),
            expiry,
            urlencoding::encode(&self.key_name)
        )
    }

    /// A token valid for [`SAS_TOKEN_TTL_SECS`] from now.
    pub fn fresh_sas_token(&self) -> String {
        self.sas_token(chrono::Utc::now().timestamp() + SAS_TOKEN_TTL_SECS)
    }
}

impl std::fmt::Debug for EventHubTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHubTarget")
            .field("host", &self.host)
            .field("entity_path", &self.entity_path)
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}

/// Holds the default and custom destinations; the custom one wins.
#[derive(Debug, Default)]
pub struct DestinationSelector {
    default: Option<Destination>,
    custom: RwLock<Option<Destination>>,
}

impl DestinationSelector {
    pub fn new(default: Option<Destination>, custom: Option<Destination>) -> Self {
        Self {
            default,
            custom: RwLock::new(custom),
        }
    }

    /// Snapshot of the destination to use right now.
    pub fn active(&self) -> Option<Destination> {
        let custom = self
            .custom
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        custom.clone().or_else(|| self.default.clone())
    }

    pub fn set_custom(&self, destination: Destination) {
        let mut custom = self
            .custom
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *custom = Some(destination);
    }

    pub fn clear_custom(&self) {
        let mut custom = self
            .custom
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *custom = None;
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}
