//! Configuration for the shake relay.

use crate::core::DetectorSettings;
use crate::destination::Destination;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable holding the default destination's connection string.
pub const ENV_CONNECTION_STRING: &str = "EVENTHUB__CONNECTIONSTRING";

/// Environment variable naming the hub when the connection string has no `EntityPath`.
pub const ENV_HUB_NAME: &str = "EVENTHUB__NAME";

/// Main configuration for the relay client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name attached to every telemetry record
    #[serde(default)]
    pub user_name: Option<String>,

    /// Relay base URL; when unset, events go straight to Event Hubs
    #[serde(default)]
    pub relay_url: Option<String>,

    /// Path for the activity log and the saved custom destination
    pub data_path: PathBuf,

    /// Shake detection parameters
    #[serde(default)]
    pub detector: DetectorSettings,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shake-relay");

        Self {
            user_name: None,
            relay_url: None,
            data_path: data_dir,
            detector: DetectorSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shake-relay")
            .join("config.json")
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    pub fn activity_path(&self) -> PathBuf {
        self.data_path.join("activity.json")
    }

    pub fn custom_destination_path(&self) -> PathBuf {
        self.data_path.join("custom_destination.json")
    }
}

/// Where the default connection string came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    Environment,
    Unset,
}

/// The default destination as configured through the environment.
#[derive(Debug, Clone)]
pub struct DefaultDestination {
    connection_string: Option<String>,
    hub_name: Option<String>,
}

impl DefaultDestination {
    pub fn new(connection_string: Option<String>, hub_name: Option<String>) -> Self {
        Self {
            connection_string: connection_string.filter(|s| !s.trim().is_empty()),
            hub_name: hub_name.filter(|s| !s.trim().is_empty()),
        }
    }

    /// Read [`ENV_CONNECTION_STRING`] and [`ENV_HUB_NAME`].
    pub fn from_env() -> Self {
        Self::new(
            std::env::var(ENV_CONNECTION_STRING).ok(),
            std::env::var(ENV_HUB_NAME).ok(),
        )
    }

    /// The configured destination, if any.
    pub fn destination(&self) -> Option<Destination> {
        self.connection_string
            .as_ref()
            .map(|cs| Destination::default_hub(cs.clone(), self.hub_name.clone()))
    }

    /// Whether events can be sent: a credential is present and resolves to a hub.
    pub fn is_ready(&self) -> bool {
        self.destination()
            .map(|d| d.target().is_ok())
            .unwrap_or(false)
    }

    pub fn source(&self) -> CredentialSource {
        if self.connection_string.is_some() {
            CredentialSource::Environment
        } else {
            CredentialSource::Unset
        }
    }

    pub fn entity_path_embedded(&self) -> bool {
        self.connection_string
            .as_deref()
            .map(|cs| cs.to_ascii_lowercase().contains("entitypath="))
            .unwrap_or(false)
    }

    /// Hub the default destination delivers to, if it resolves.
    pub fn hub_name_used(&self) -> Option<String> {
        self.destination()
            .and_then(|d| d.target().ok())
            .map(|t| t.entity_path)
            .or_else(|| self.hub_name.clone())
    }

    /// Status report for `GET /api/config-status`.
    pub fn status(&self) -> ConfigStatus {
        ConfigStatus {
            active_destination: "default".to_string(),
            producer_ready: self.is_ready(),
            entity_path_embedded: self.entity_path_embedded(),
            connection_string_source: self.source(),
            hub_name_used: self.hub_name_used(),
        }
    }
}

/// Which destination is active and whether it can accept events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigStatus {
    pub active_destination: String,
    pub producer_ready: bool,
    pub entity_path_embedded: bool,
    pub connection_string_source: CredentialSource,
    pub hub_name_used: Option<String>,
}

/// A saved custom destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomDestinationRecord {
    pub credential: String,
    pub saved_at: DateTime<Utc>,
}

impl CustomDestinationRecord {
    pub fn destination(&self) -> Destination {
        Destination::custom(self.credential.clone())
    }
}

/// Persists the custom destination between runs.
#[derive(Debug, Clone)]
pub struct DestinationStore {
    path: PathBuf,
}

impl DestinationStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved record, if there is one.
    pub fn load(&self) -> Result<Option<CustomDestinationRecord>, ConfigError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content =
            std::fs::read_to_string(&self.path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        let record = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(Some(record))
    }

    /// Save a connection string as the custom destination.
    pub fn save(&self, connection_string: &str) -> Result<CustomDestinationRecord, ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let record = CustomDestinationRecord {
            credential: connection_string.to_string(),
            saved_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&record)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(&self.path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(record)
    }

    /// Forget the custom destination.
    pub fn clear(&self) -> Result<(), ConfigError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConfigError::IoError(e.to_string())),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
