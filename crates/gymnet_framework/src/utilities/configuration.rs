use crate::entity::builder::IdPolicy;
use crate::get_or_create_gym_config_json_path;
use crate::network::framing::DEFAULT_MAX_FRAME_BYTES;
use crate::network::TransportType;
use crate::simulation::{ControlInterval, KernelError};

use gymnet_types::data::codec::DEFAULT_MAX_DEPTH;
use gymnet_types::prelude::WireFormat;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[macro_use]
pub mod gym_config_macros {
    /// Resolves config json file between argument and default value.
    #[macro_export]
    macro_rules! resolve_gym_config_json_path {
        ($path: expr) => {
            match $path {
                Some(p) => $crate::get_or_create_gym_config_json_path!(p.clone()),
                None => $crate::utilities::configuration::DEFAULT_GYM_CONFIG_PATH.clone(),
            }
        };
    }

    /// Will write config file if not found in provided path.
    /// Reads file if found, writes new file if not
    #[macro_export]
    macro_rules! get_or_create_gym_config_json_path {
        ($path: expr) => {{
            let path: std::path::PathBuf = $path;
            if path.exists() {
                log::debug!("[GymConfigLoader - load_config] Found config at: {:?}", path);
                Some(path)
            } else {
                match std::fs::write(
                    &path,
                    $crate::utilities::configuration::DEFAULT_GYM_CONFIG_CONTENT,
                ) {
                    Ok(_) => {
                        log::info!("[GymConfigLoader - load_config] Created new config at: {:?}", path);
                        Some(path)
                    }
                    Err(e) => {
                        log::error!(
                            "[GymConfigLoader - load_config] Failed to create config file: {}",
                            e
                        );
                        None
                    }
                }
            }
        }};
    }
}

/// The default configuration file path, loaded lazily at runtime.
/// If not overridden, the configuration will be retrieved or created in the cwd.
pub static DEFAULT_GYM_CONFIG_PATH: Lazy<Option<PathBuf>> =
    Lazy::new(|| get_or_create_gym_config_json_path!(PathBuf::from("gymnet_config.json")));

pub const DEFAULT_GYM_CONFIG_CONTENT: &str = r#"{
    "entity_config": {
        "control_interval_ns": 100000000,
        "id_policy": "monotonic",
        "action_keys": ["example_action"],
        "fallback_actions": {
            "example_action": [0.0, 0.0]
        },
        "on_protocol_error": "no_op",
        "on_connection_error": "terminate",
        "reconnect_when_degraded": false
    },
    "transport_config": {
        "transport": "tcp",
        "address": {
            "prefix": "tcp://",
            "host": "127.0.0.1",
            "port": "7655"
        },
        "connect_timeout_ms": 3000,
        "reply_timeout_ms": 3000,
        "max_frame_bytes": 16777216,
        "max_value_depth": 128,
        "wire_format": "pickle"
    },
    "logging_config": {
        "level": "info",
        "file": null
    }
}"#;

const DEFAULT_CONTROL_INTERVAL_NS: u64 = 100_000_000;
const DEFAULT_TIMEOUT_MS: u64 = 3000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("[ConfigError] Could not resolve a config path")]
    UnresolvedPath,
    #[error("[ConfigError] Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("[ConfigError] Failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("[ConfigError] Invalid configuration: {0}")]
    Invalid(String),
}

impl From<KernelError> for ConfigError {
    fn from(err: KernelError) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}

/// Server address parameters.
///
/// Each address includes a prefix, host, and port. For IPC the host is the socket path.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NetworkParams {
    pub prefix: String,
    pub host: String,
    pub port: String,
}

impl NetworkParams {
    /// `host:port`, as taken by std sockets.
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `prefix + host:port`, as taken by ZeroMQ.
    pub fn endpoint(&self) -> String {
        format!("{}{}:{}", self.prefix, self.host, self.port)
    }
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            prefix: "tcp://".to_string(),
            host: "127.0.0.1".to_string(),
            port: "7655".to_string(),
        }
    }
}

/// What an entity does when a reply is malformed or truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolErrorPolicy {
    /// Apply an explicit no-action for the tick and keep running.
    #[default]
    NoOp,
    Terminate,
}

/// What an entity does when the peer is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorPolicy {
    #[default]
    Terminate,
    /// Keep ticking with the fallback action.
    Degrade,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EntityConfigParams {
    pub control_interval_ns: u64,
    #[serde(default)]
    pub id_policy: IdPolicy,
    pub action_keys: Vec<String>,
    /// Values applied per action key when no reply arrives in time.
    #[serde(default)]
    pub fallback_actions: HashMap<String, Vec<f64>>,
    #[serde(default)]
    pub on_protocol_error: ProtocolErrorPolicy,
    #[serde(default)]
    pub on_connection_error: ConnectionErrorPolicy,
    #[serde(default)]
    pub reconnect_when_degraded: bool,
}

impl EntityConfigParams {
    pub fn control_interval(&self) -> Result<ControlInterval, ConfigError> {
        Ok(ControlInterval::from_nanos(self.control_interval_ns)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.control_interval()?;
        if let Some(key) = self
            .fallback_actions
            .keys()
            .find(|key| !self.action_keys.contains(key))
        {
            return Err(ConfigError::Invalid(format!(
                "fallback action `{}` is not one of the action keys",
                key
            )));
        }
        Ok(())
    }
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_max_value_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_timeout_ms() -> Option<u64> {
    Some(DEFAULT_TIMEOUT_MS)
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TransportConfigParams {
    #[serde(default)]
    pub transport: TransportType,
    pub address: NetworkParams,
    /// Absent means the default timeout; `null` means the OS connect timeout.
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: Option<u64>,
    /// Absent means the default timeout; `null` blocks until the reply arrives.
    #[serde(default = "default_timeout_ms")]
    pub reply_timeout_ms: Option<u64>,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Deepest observation, reward or action tree either side may send.
    #[serde(default = "default_max_value_depth")]
    pub max_value_depth: usize,
    #[serde(default)]
    pub wire_format: WireFormat,
}

impl TransportConfigParams {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(Duration::from_millis)
    }

    pub fn get_address(&self) -> &NetworkParams {
        &self.address
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid("max_frame_bytes must be non-zero".to_string()));
        }
        if self.max_value_depth == 0 {
            return Err(ConfigError::Invalid("max_value_depth must be non-zero".to_string()));
        }
        if self.connect_timeout_ms == Some(0) || self.reply_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "timeouts must be positive or null".to_string(),
            ));
        }
        if self.address.host.is_empty() {
            return Err(ConfigError::Invalid("address host is empty".to_string()));
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LoggingParams {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingParams {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GymConfigLoader {
    pub entity_config: EntityConfigParams,
    pub transport_config: TransportConfigParams,
    #[serde(default)]
    pub logging_config: LoggingParams,
}

impl GymConfigLoader {
    /// Loads `config_path`, or `gymnet_config.json` in the cwd when `None`. A missing file is
    /// created with default content first.
    pub fn new_config(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path: PathBuf = crate::resolve_gym_config_json_path!(config_path)
            .ok_or(ConfigError::UnresolvedPath)?;
        Self::load_config(&path)
    }

    pub fn load_config(config_path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Io {
            path: config_path.to_path_buf(),
            source,
        })?;
        let config: GymConfigLoader =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: config_path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.entity_config.validate()?;
        self.transport_config.validate()
    }

    pub fn get_entity_config(&self) -> &EntityConfigParams {
        &self.entity_config
    }

    pub fn get_transport_config(&self) -> &TransportConfigParams {
        &self.transport_config
    }

    pub fn get_logging_config(&self) -> &LoggingParams {
        &self.logging_config
    }
}

pub trait EntityConfigBuildParams {
    fn set_control_interval_ns(&mut self, control_interval_ns: u64) -> &mut Self;
    fn set_id_policy(&mut self, id_policy: IdPolicy) -> &mut Self;
    fn set_action_keys(&mut self, action_keys: &[&str]) -> &mut Self;
    fn set_fallback_action(&mut self, key: &str, values: &[f64]) -> &mut Self;
    fn set_on_protocol_error(&mut self, policy: ProtocolErrorPolicy) -> &mut Self;
    fn set_on_connection_error(&mut self, policy: ConnectionErrorPolicy) -> &mut Self;
    fn set_reconnect_when_degraded(&mut self, reconnect: bool) -> &mut Self;
    fn build(&self) -> Result<EntityConfigParams, ConfigError>;
    fn build_default() -> EntityConfigParams;
}

#[derive(Debug, Default)]
pub struct EntityConfigBuilder {
    control_interval_ns: Option<u64>,
    id_policy: Option<IdPolicy>,
    action_keys: Option<Vec<String>>,
    fallback_actions: HashMap<String, Vec<f64>>,
    on_protocol_error: Option<ProtocolErrorPolicy>,
    on_connection_error: Option<ConnectionErrorPolicy>,
    reconnect_when_degraded: Option<bool>,
}

impl EntityConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityConfigBuildParams for EntityConfigBuilder {
    fn set_control_interval_ns(&mut self, control_interval_ns: u64) -> &mut Self {
        self.control_interval_ns = Some(control_interval_ns);
        self
    }

    fn set_id_policy(&mut self, id_policy: IdPolicy) -> &mut Self {
        self.id_policy = Some(id_policy);
        self
    }

    fn set_action_keys(&mut self, action_keys: &[&str]) -> &mut Self {
        self.action_keys = Some(action_keys.iter().map(|k| k.to_string()).collect());
        self
    }

    fn set_fallback_action(&mut self, key: &str, values: &[f64]) -> &mut Self {
        self.fallback_actions.insert(key.to_string(), values.to_vec());
        self
    }

    fn set_on_protocol_error(&mut self, policy: ProtocolErrorPolicy) -> &mut Self {
        self.on_protocol_error = Some(policy);
        self
    }

    fn set_on_connection_error(&mut self, policy: ConnectionErrorPolicy) -> &mut Self {
        self.on_connection_error = Some(policy);
        self
    }

    fn set_reconnect_when_degraded(&mut self, reconnect: bool) -> &mut Self {
        self.reconnect_when_degraded = Some(reconnect);
        self
    }

    fn build(&self) -> Result<EntityConfigParams, ConfigError> {
        let params = EntityConfigParams {
            control_interval_ns: self
                .control_interval_ns
                .unwrap_or(DEFAULT_CONTROL_INTERVAL_NS),
            id_policy: self.id_policy.unwrap_or_default(),
            action_keys: self
                .action_keys
                .clone()
                .unwrap_or_else(|| vec!["example_action".to_string()]),
            fallback_actions: self.fallback_actions.clone(),
            on_protocol_error: self.on_protocol_error.unwrap_or_default(),
            on_connection_error: self.on_connection_error.unwrap_or_default(),
            reconnect_when_degraded: self.reconnect_when_degraded.unwrap_or(false),
        };
        params.validate()?;
        Ok(params)
    }

    fn build_default() -> EntityConfigParams {
        EntityConfigParams {
            control_interval_ns: DEFAULT_CONTROL_INTERVAL_NS,
            id_policy: IdPolicy::Monotonic,
            action_keys: vec!["example_action".to_string()],
            fallback_actions: HashMap::from([(
                "example_action".to_string(),
                vec![0.0, 0.0],
            )]),
            on_protocol_error: ProtocolErrorPolicy::NoOp,
            on_connection_error: ConnectionErrorPolicy::Terminate,
            reconnect_when_degraded: false,
        }
    }
}

pub trait TransportConfigBuildParams {
    fn set_transport(&mut self, transport: TransportType) -> &mut Self;
    fn set_address(&mut self, prefix: &str, host: &str, port: &str) -> &mut Self;
    fn set_connect_timeout_ms(&mut self, timeout_ms: Option<u64>) -> &mut Self;
    fn set_reply_timeout_ms(&mut self, timeout_ms: Option<u64>) -> &mut Self;
    fn set_max_frame_bytes(&mut self, max_frame_bytes: usize) -> &mut Self;
    fn set_max_value_depth(&mut self, max_value_depth: usize) -> &mut Self;
    fn set_wire_format(&mut self, wire_format: WireFormat) -> &mut Self;
    fn build(&self) -> Result<TransportConfigParams, ConfigError>;
    fn build_default() -> TransportConfigParams;
}

#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    transport: Option<TransportType>,
    address: Option<NetworkParams>,
    connect_timeout_ms: Option<Option<u64>>,
    reply_timeout_ms: Option<Option<u64>>,
    max_frame_bytes: Option<usize>,
    max_value_depth: Option<usize>,
    wire_format: Option<WireFormat>,
}

impl TransportConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransportConfigBuildParams for TransportConfigBuilder {
    fn set_transport(&mut self, transport: TransportType) -> &mut Self {
        self.transport = Some(transport);
        self
    }

    fn set_address(&mut self, prefix: &str, host: &str, port: &str) -> &mut Self {
        self.address = Some(NetworkParams {
            prefix: prefix.to_string(),
            host: host.to_string(),
            port: port.to_string(),
        });
        self
    }

    fn set_connect_timeout_ms(&mut self, timeout_ms: Option<u64>) -> &mut Self {
        self.connect_timeout_ms = Some(timeout_ms);
        self
    }

    fn set_reply_timeout_ms(&mut self, timeout_ms: Option<u64>) -> &mut Self {
        self.reply_timeout_ms = Some(timeout_ms);
        self
    }

    fn set_max_frame_bytes(&mut self, max_frame_bytes: usize) -> &mut Self {
        self.max_frame_bytes = Some(max_frame_bytes);
        self
    }

    fn set_max_value_depth(&mut self, max_value_depth: usize) -> &mut Self {
        self.max_value_depth = Some(max_value_depth);
        self
    }

    fn set_wire_format(&mut self, wire_format: WireFormat) -> &mut Self {
        self.wire_format = Some(wire_format);
        self
    }

    fn build(&self) -> Result<TransportConfigParams, ConfigError> {
        let params = TransportConfigParams {
            transport: self.transport.unwrap_or_default(),
            address: self.address.clone().unwrap_or_default(),
            connect_timeout_ms: self.connect_timeout_ms.unwrap_or(Some(DEFAULT_TIMEOUT_MS)),
            reply_timeout_ms: self.reply_timeout_ms.unwrap_or(Some(DEFAULT_TIMEOUT_MS)),
            max_frame_bytes: self.max_frame_bytes.unwrap_or(DEFAULT_MAX_FRAME_BYTES),
            max_value_depth: self.max_value_depth.unwrap_or(DEFAULT_MAX_DEPTH),
            wire_format: self.wire_format.unwrap_or_default(),
        };
        params.validate()?;
        Ok(params)
    }

    fn build_default() -> TransportConfigParams {
        TransportConfigParams {
            transport: TransportType::TCP,
            address: NetworkParams::default(),
            connect_timeout_ms: Some(DEFAULT_TIMEOUT_MS),
            reply_timeout_ms: Some(DEFAULT_TIMEOUT_MS),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_value_depth: DEFAULT_MAX_DEPTH,
            wire_format: WireFormat::Pickle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_content_matches_builders() {
        let config: GymConfigLoader = serde_json::from_str(DEFAULT_GYM_CONFIG_CONTENT).unwrap();
        assert_eq!(config.entity_config, EntityConfigBuilder::build_default());
        assert_eq!(config.transport_config, TransportConfigBuilder::build_default());
        assert_eq!(config.logging_config, LoggingParams::default());
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gymnet_config.json");
        assert!(!path.exists());

        let config = GymConfigLoader::new_config(Some(path.clone())).unwrap();
        assert!(path.exists());
        assert_eq!(config.entity_config.control_interval_ns, 100_000_000);
        assert_eq!(config.transport_config.address.socket_address(), "127.0.0.1:7655");
    }

    #[test]
    fn test_minimal_file_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "entity_config": {{ "control_interval_ns": 5, "action_keys": ["steer"] }},
                "transport_config": {{
                    "address": {{ "prefix": "tcp://", "host": "localhost", "port": "9000" }}
                }}
            }}"#
        )
        .unwrap();

        let config = GymConfigLoader::load_config(file.path()).unwrap();
        assert_eq!(config.entity_config.id_policy, IdPolicy::Monotonic);
        assert_eq!(config.entity_config.on_protocol_error, ProtocolErrorPolicy::NoOp);
        assert_eq!(
            config.entity_config.on_connection_error,
            ConnectionErrorPolicy::Terminate
        );
        assert_eq!(config.transport_config.transport, TransportType::TCP);
        assert_eq!(
            config.transport_config.reply_timeout(),
            Some(Duration::from_millis(DEFAULT_TIMEOUT_MS))
        );
        assert_eq!(
            config.transport_config.connect_timeout(),
            Some(Duration::from_millis(DEFAULT_TIMEOUT_MS))
        );
        assert_eq!(config.transport_config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert_eq!(config.transport_config.max_value_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.logging_config.level, "info");
    }

    #[test]
    fn test_explicit_null_reply_timeout_blocks() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "entity_config": {{ "control_interval_ns": 5, "action_keys": ["steer"] }},
                "transport_config": {{
                    "address": {{ "prefix": "tcp://", "host": "localhost", "port": "9000" }},
                    "reply_timeout_ms": null
                }}
            }}"#
        )
        .unwrap();

        let config = GymConfigLoader::load_config(file.path()).unwrap();
        assert_eq!(config.transport_config.reply_timeout(), None);
        assert_eq!(
            config.transport_config.connect_timeout(),
            Some(Duration::from_millis(DEFAULT_TIMEOUT_MS))
        );
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let mut file = NamedTempFile::new().unwrap();
        let content = DEFAULT_GYM_CONFIG_CONTENT.replace("100000000", "0");
        file.write_all(content.as_bytes()).unwrap();

        assert!(matches!(
            GymConfigLoader::load_config(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_unparseable_file_reports_path() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        match GymConfigLoader::load_config(file.path()) {
            Err(ConfigError::Parse { path, .. }) => assert_eq!(path, file.path()),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_builders_validate() {
        let mut entity = EntityConfigBuilder::new();
        entity.set_fallback_action("unknown", &[1.0]);
        assert!(entity.build().is_err());

        let mut transport = TransportConfigBuilder::new();
        transport.set_max_frame_bytes(0);
        assert!(transport.build().is_err());

        let mut transport = TransportConfigBuilder::new();
        transport
            .set_transport(TransportType::IPC)
            .set_address("ipc://", "/tmp/gym.sock", "0")
            .set_reply_timeout_ms(None)
            .set_wire_format(WireFormat::Bincode);
        let params = transport.build().unwrap();
        assert_eq!(params.reply_timeout(), None);
        assert_eq!(params.address.host, "/tmp/gym.sock");
    }
}
