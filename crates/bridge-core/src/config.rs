//! Configuration management for the chat bridge
//!
//! Settings come from a JSON file. Any key can be overridden from the
//! environment with the `BRIDGE__` prefix and `__` as the section separator,
//! e.g. `BRIDGE__N8N__API_KEY` or `BRIDGE__SESSION__SEND_TIMEOUT_SECS`.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "BRIDGE";
const ENV_SEPARATOR: &str = "__";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub n8n: Option<N8nConfig>,

    #[serde(default)]
    pub flowise: Option<FlowiseConfig>,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Messaging gateway that hosts the network session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(alias = "url")]
    pub base_url: String,

    #[serde(default = "default_session_name")]
    pub session_name: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct N8nConfig {
    #[serde(alias = "url")]
    pub webhook_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_engine_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowiseConfig {
    #[serde(alias = "url")]
    pub base_url: String,

    pub flow_id: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_engine_timeout_secs")]
    pub timeout_secs: u64,
}

/// Timeouts around the messaging session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// How long a pairing code stays valid before the session gives up
    #[serde(default = "default_pairing_timeout_secs")]
    pub pairing_timeout_secs: u64,

    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            pairing_timeout_secs: default_pairing_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Inbound routing policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Only forward chats from senders flagged eligible in the directory
    #[serde(default = "default_require_eligible_sender")]
    pub require_eligible_sender: bool,

    #[serde(default = "default_lookup_timeout_secs")]
    pub lookup_timeout_secs: u64,

    #[serde(default = "default_engine_timeout_secs")]
    pub forward_timeout_secs: u64,

    /// How long a forwarded request waits for its callback before it is forgotten
    #[serde(default = "default_reply_window_secs")]
    pub reply_window_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            require_eligible_sender: default_require_eligible_sender(),
            lookup_timeout_secs: default_lookup_timeout_secs(),
            forward_timeout_secs: default_engine_timeout_secs(),
            reply_window_secs: default_reply_window_secs(),
        }
    }
}

impl RoutingConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }

    pub fn reply_window(&self) -> Duration {
        Duration::from_secs(self.reply_window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_directory_file")]
    pub directory_file: String,

    #[serde(default = "default_device_file")]
    pub device_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            directory_file: default_directory_file(),
            device_file: default_device_file(),
        }
    }
}

impl StorageConfig {
    pub fn directory_path(&self) -> PathBuf {
        self.data_dir.join(&self.directory_file)
    }

    pub fn device_path(&self) -> PathBuf {
        self.data_dir.join(&self.device_file)
    }
}

// Default functions
fn default_session_name() -> String {
    "default".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_engine_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_send_timeout_secs() -> u64 {
    15
}

fn default_pairing_timeout_secs() -> u64 {
    120
}

fn default_stop_timeout_secs() -> u64 {
    10
}

fn default_require_eligible_sender() -> bool {
    true
}

fn default_lookup_timeout_secs() -> u64 {
    5
}

fn default_reply_window_secs() -> u64 {
    900
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data/bridge")
}

fn default_directory_file() -> String {
    "recipients.json".to_string()
}

fn default_device_file() -> String {
    "device.json".to_string()
}

impl BridgeConfig {
    /// Load configuration from a JSON file, applying `BRIDGE__*` environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let layered = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Json))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                BridgeError::Config(format!("Failed to read config file {}: {}", path.display(), e))
            })?;

        let config: Self = layered
            .try_deserialize()
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.gateway.base_url.trim().is_empty() {
            return Err(BridgeError::Config("Gateway base URL is required".to_string()));
        }

        if self.n8n.is_none() && self.flowise.is_none() {
            return Err(BridgeError::Config(
                "At least one workflow engine (n8n or flowise) is required".to_string(),
            ));
        }

        if let Some(n8n) = &self.n8n {
            if n8n.webhook_url.trim().is_empty() {
                return Err(BridgeError::Config("n8n webhook URL is required".to_string()));
            }
        }

        if let Some(flowise) = &self.flowise {
            if flowise.base_url.trim().is_empty() || flowise.flow_id.trim().is_empty() {
                return Err(BridgeError::Config(
                    "Flowise base URL and flow ID are required".to_string(),
                ));
            }
        }

        if self.session.connect_timeout_secs == 0
            || self.session.send_timeout_secs == 0
            || self.session.stop_timeout_secs == 0
        {
            return Err(BridgeError::Config(
                "Session timeouts must be greater than zero".to_string(),
            ));
        }

        if self.routing.lookup_timeout_secs == 0 || self.routing.forward_timeout_secs == 0 {
            return Err(BridgeError::Config(
                "Routing timeouts must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
