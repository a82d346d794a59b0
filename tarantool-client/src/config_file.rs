//! Declarative configuration loading from YAML, TOML, and environment variables.
//!
//! This module provides file-based configuration support through mirror structs
//! that can be deserialized with serde. These structs are then converted into the
//! programmatic [`ClientConfig`](crate::config::ClientConfig) using the builder API.
//!
//! # Supported Formats
//!
//! - **YAML** (requires `config-file` feature): `ClientConfig::from_yaml("config.yaml")`
//! - **TOML** (requires `config-file` feature): `ClientConfig::from_toml("config.toml")`
//! - **Environment Variables** (always available): `ClientConfig::from_env()`
//!
//! # Example YAML
//!
//! ```yaml
//! network:
//!   addresses:
//!     - "10.0.0.1:3301"
//!     - "10.0.0.2"
//!   connections-per-node: 4
//!   connect-timeout-ms: 1000
//!   request-timeout-ms: 2000
//!   selection-strategy: parallel-round-robin
//!   tcp-nodelay: true
//! retry:
//!   kind: attempts-bound
//!   retry-on: network-errors
//!   max-attempts: 5
//!   delay-ms: 100
//!   max-delay-ms: 5000
//!   multiplier: 2.0
//!   jitter: 0.1
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{
    ClientConfig, ClientConfigBuilder, ConfigError, RetryKind, RetryOn, SelectionStrategyKind,
};

/// Port appended to addresses given without one.
const DEFAULT_PORT: u16 = 3301;

/// Top-level file-based configuration.
///
/// This struct mirrors [`ClientConfig`](crate::config::ClientConfig) with
/// serde-friendly types. It can be deserialized from YAML or TOML and then
/// converted to `ClientConfig` via [`TryFrom`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileConfig {
    /// Network configuration.
    pub network: Option<FileNetworkConfig>,
    /// Retry configuration.
    pub retry: Option<FileRetryConfig>,
}

/// File-based network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileNetworkConfig {
    /// Node addresses; the default port is used when none is given.
    pub addresses: Option<Vec<String>>,
    /// Connections opened to every node.
    pub connections_per_node: Option<usize>,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Default request timeout in milliseconds.
    pub request_timeout_ms: Option<u64>,
    /// `"round-robin"` or `"parallel-round-robin"`.
    pub selection_strategy: Option<String>,
    /// Enable TCP_NODELAY (Nagle's algorithm disabled).
    pub tcp_nodelay: Option<bool>,
}

/// File-based retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileRetryConfig {
    /// `"disabled"`, `"attempts-bound"` or `"infinite"`.
    pub kind: Option<String>,
    /// `"network-errors"` or `"any-error"`.
    pub retry_on: Option<String>,
    /// Retries allowed by the attempts-bound policy.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry in milliseconds.
    pub delay_ms: Option<u64>,
    /// Upper bound for a growing delay in milliseconds.
    pub max_delay_ms: Option<u64>,
    /// Delay multiplier.
    pub multiplier: Option<f64>,
    /// Jitter factor (0.0 to 1.0).
    pub jitter: Option<f64>,
    /// Per-attempt timeout in milliseconds.
    pub request_timeout_ms: Option<u64>,
    /// Operation timeout of the infinite policy in milliseconds.
    pub operation_timeout_ms: Option<u64>,
}

fn parse_address(value: &str) -> Result<SocketAddr, ConfigError> {
    let value = value.trim();
    value
        .parse::<SocketAddr>()
        .or_else(|_| format!("{value}:{DEFAULT_PORT}").parse::<SocketAddr>())
        .map_err(|_| ConfigError::new(format!("invalid node address: {value}")))
}

fn parse_strategy(value: &str) -> Result<SelectionStrategyKind, ConfigError> {
    match value.to_lowercase().as_str() {
        "round-robin" => Ok(SelectionStrategyKind::RoundRobin),
        "parallel-round-robin" => Ok(SelectionStrategyKind::ParallelRoundRobin),
        other => Err(ConfigError::new(format!(
            "unknown selection strategy: {other} (expected round-robin or parallel-round-robin)"
        ))),
    }
}

fn parse_retry_kind(value: &str) -> Result<RetryKind, ConfigError> {
    match value.to_lowercase().as_str() {
        "disabled" | "off" => Ok(RetryKind::Disabled),
        "attempts-bound" => Ok(RetryKind::AttemptsBound),
        "infinite" => Ok(RetryKind::Infinite),
        other => Err(ConfigError::new(format!(
            "unknown retry kind: {other} (expected disabled, attempts-bound or infinite)"
        ))),
    }
}

fn parse_retry_on(value: &str) -> Result<RetryOn, ConfigError> {
    match value.to_lowercase().as_str() {
        "network-errors" => Ok(RetryOn::NetworkErrors),
        "any-error" => Ok(RetryOn::AnyError),
        other => Err(ConfigError::new(format!(
            "unknown retry-on value: {other} (expected network-errors or any-error)"
        ))),
    }
}

impl TryFrom<FileConfig> for ClientConfig {
    type Error = ConfigError;

    fn try_from(file: FileConfig) -> Result<Self, Self::Error> {
        let mut builder = ClientConfigBuilder::new();

        if let Some(net) = file.network {
            let addresses = net
                .addresses
                .unwrap_or_default()
                .iter()
                .map(|address| parse_address(address))
                .collect::<Result<Vec<_>, _>>()?;
            let strategy = net
                .selection_strategy
                .as_deref()
                .map(parse_strategy)
                .transpose()?;

            builder = builder.network(|mut n| {
                if !addresses.is_empty() {
                    n = n.addresses(addresses);
                }
                if let Some(count) = net.connections_per_node {
                    n = n.connections_per_node(count);
                }
                if let Some(ms) = net.connect_timeout_ms {
                    n = n.connect_timeout(Duration::from_millis(ms));
                }
                if let Some(ms) = net.request_timeout_ms {
                    n = n.request_timeout(Duration::from_millis(ms));
                }
                if let Some(kind) = strategy {
                    n = n.selection_strategy(kind);
                }
                if let Some(v) = net.tcp_nodelay {
                    n = n.tcp_nodelay(v);
                }
                n
            });
        }

        if let Some(retry) = file.retry {
            let kind = retry.kind.as_deref().map(parse_retry_kind).transpose()?;
            let retry_on = retry.retry_on.as_deref().map(parse_retry_on).transpose()?;

            builder = builder.retry(|mut r| {
                if let Some(kind) = kind {
                    r = r.kind(kind);
                }
                if let Some(n) = retry.max_attempts {
                    r = r.max_attempts(n);
                }
                if let Some(on) = retry_on {
                    r = r.retry_on(on);
                }
                if let Some(ms) = retry.delay_ms {
                    r = r.delay(Duration::from_millis(ms));
                }
                if let Some(ms) = retry.max_delay_ms {
                    r = r.max_delay(Duration::from_millis(ms));
                }
                if let Some(m) = retry.multiplier {
                    r = r.multiplier(m);
                }
                if let Some(j) = retry.jitter {
                    r = r.jitter(j);
                }
                if let Some(ms) = retry.request_timeout_ms {
                    r = r.request_timeout(Duration::from_millis(ms));
                }
                if let Some(ms) = retry.operation_timeout_ms {
                    r = r.operation_timeout(Duration::from_millis(ms));
                }
                r
            });
        }

        builder.build()
    }
}

impl ClientConfig {
    /// Loads configuration from a YAML file.
    ///
    /// Requires the `config-file` feature.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let config = ClientConfig::from_yaml("tarantool-client.yaml")?;
    /// let client = ClusterTarantoolClient::connect(config).await?;
    /// ```
    #[cfg(feature = "config-file")]
    pub fn from_yaml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::new(format!("failed to read YAML config file: {e}"))
        })?;
        let file_config: FileConfig = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::new(format!("failed to parse YAML config: {e}"))
        })?;
        file_config.try_into()
    }

    /// Loads configuration from a TOML file.
    ///
    /// Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::new(format!("failed to read TOML config file: {e}"))
        })?;
        let file_config: FileConfig = toml::from_str(&content).map_err(|e| {
            ConfigError::new(format!("failed to parse TOML config: {e}"))
        })?;
        file_config.try_into()
    }

    /// Loads configuration from environment variables.
    ///
    /// This method is always available (no feature flag required).
    ///
    /// # Supported Environment Variables
    ///
    /// | Variable | Maps to |
    /// |----------|---------|
    /// | `TARANTOOL_ADDRESSES` | Comma-separated addresses (e.g., `10.0.0.1:3301,10.0.0.2:3301`) |
    /// | `TARANTOOL_CONNECTIONS_PER_NODE` | Connections opened to every node |
    /// | `TARANTOOL_CONNECT_TIMEOUT_MS` | Connect timeout in milliseconds |
    /// | `TARANTOOL_REQUEST_TIMEOUT_MS` | Request timeout in milliseconds |
    /// | `TARANTOOL_SELECTION_STRATEGY` | `round-robin` or `parallel-round-robin` |
    /// | `TARANTOOL_RETRY_KIND` | `disabled`, `attempts-bound` or `infinite` |
    /// | `TARANTOOL_RETRY_ON` | `network-errors` or `any-error` |
    /// | `TARANTOOL_RETRY_MAX_ATTEMPTS` | Retries allowed by the attempts-bound policy |
    /// | `TARANTOOL_RETRY_DELAY_MS` | Delay between retries in milliseconds |
    /// | `TARANTOOL_OPERATION_TIMEOUT_MS` | Operation timeout in milliseconds |
    ///
    /// Numeric variables that fail to parse are ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut file_config = FileConfig::default();

        if let Some(val) = var("TARANTOOL_ADDRESSES") {
            file_config.network.get_or_insert_with(Default::default).addresses =
                Some(val.split(',').map(|s| s.trim().to_string()).collect());
        }

        if let Some(n) = var("TARANTOOL_CONNECTIONS_PER_NODE").and_then(|v| v.parse().ok()) {
            file_config
                .network
                .get_or_insert_with(Default::default)
                .connections_per_node = Some(n);
        }

        if let Some(ms) = var("TARANTOOL_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            file_config
                .network
                .get_or_insert_with(Default::default)
                .connect_timeout_ms = Some(ms);
        }

        if let Some(ms) = var("TARANTOOL_REQUEST_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            file_config
                .network
                .get_or_insert_with(Default::default)
                .request_timeout_ms = Some(ms);
        }

        if let Some(val) = var("TARANTOOL_SELECTION_STRATEGY") {
            file_config
                .network
                .get_or_insert_with(Default::default)
                .selection_strategy = Some(val);
        }

        if let Some(val) = var("TARANTOOL_RETRY_KIND") {
            file_config.retry.get_or_insert_with(Default::default).kind = Some(val);
        }

        if let Some(val) = var("TARANTOOL_RETRY_ON") {
            file_config.retry.get_or_insert_with(Default::default).retry_on = Some(val);
        }

        if let Some(n) = var("TARANTOOL_RETRY_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            file_config.retry.get_or_insert_with(Default::default).max_attempts = Some(n);
        }

        if let Some(ms) = var("TARANTOOL_RETRY_DELAY_MS").and_then(|v| v.parse().ok()) {
            file_config.retry.get_or_insert_with(Default::default).delay_ms = Some(ms);
        }

        if let Some(ms) = var("TARANTOOL_OPERATION_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            file_config
                .retry
                .get_or_insert_with(Default::default)
                .operation_timeout_ms = Some(ms);
        }

        file_config.try_into()
    }
}

/// Convenience function to load a configuration file, auto-detecting format by extension.
///
/// Supports `.yaml`, `.yml`, and `.toml` extensions.
/// Requires the `config-file` feature.
#[cfg(feature = "config-file")]
pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> Result<ClientConfig, ConfigError> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => ClientConfig::from_yaml(path),
        Some("toml") => ClientConfig::from_toml(path),
        Some(ext) => Err(ConfigError::new(format!(
            "unsupported config file extension: .{ext} (expected .yaml, .yml, or .toml)"
        ))),
        None => Err(ConfigError::new(
            "config file has no extension; expected .yaml, .yml, or .toml",
        )),
    }
}
