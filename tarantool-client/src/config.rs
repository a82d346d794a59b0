//! Client configuration types and builders.

use std::net::SocketAddr;
use std::time::Duration;

/// Default Tarantool listen port.
const DEFAULT_PORT: u16 = 3301;
/// Default number of connections opened to every node.
const DEFAULT_CONNECTIONS_PER_NODE: usize = 1;
/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
/// Default number of retries for attempts-bound policies.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay between retry attempts.
const DEFAULT_RETRY_DELAY: Duration = Duration::ZERO;
/// Default upper bound for a growing retry delay.
const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
/// Default retry delay multiplier (fixed delay).
const DEFAULT_RETRY_MULTIPLIER: f64 = 1.0;
/// Default operation timeout for unbounded retry policies.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration error returned when validation fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("configuration error: {message}")]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the validation message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ConfigError> for tarantool_core::TarantoolError {
    fn from(err: ConfigError) -> Self {
        tarantool_core::TarantoolError::Configuration(err.message)
    }
}

/// Algorithm used to pick a pooled connection for the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategyKind {
    /// Cycle over every connection of every node in registry order.
    #[default]
    RoundRobin,
    /// Cycle over nodes first, then over the connections of the chosen node.
    ParallelRoundRobin,
}

/// Network configuration for node connections.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    addresses: Vec<SocketAddr>,
    connections_per_node: usize,
    connect_timeout: Duration,
    request_timeout: Duration,
    selection_strategy: SelectionStrategyKind,
    tcp_nodelay: bool,
}

impl NetworkConfig {
    /// Creates a new builder for network configuration.
    pub fn builder() -> NetworkConfigBuilder {
        NetworkConfigBuilder::new()
    }

    /// Returns the configured node addresses.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    /// Returns the number of connections kept open to every node.
    pub fn connections_per_node(&self) -> usize {
        self.connections_per_node
    }

    /// Returns the connection timeout duration.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the default request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the connection selection strategy.
    pub fn selection_strategy(&self) -> SelectionStrategyKind {
        self.selection_strategy
    }

    /// Returns whether `TCP_NODELAY` is set on new sockets.
    pub fn tcp_nodelay(&self) -> bool {
        self.tcp_nodelay
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            addresses: vec![default_address()],
            connections_per_node: DEFAULT_CONNECTIONS_PER_NODE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            selection_strategy: SelectionStrategyKind::default(),
            tcp_nodelay: true,
        }
    }
}

pub(crate) fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
}

/// Builder for `NetworkConfig`.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfigBuilder {
    addresses: Vec<SocketAddr>,
    connections_per_node: Option<usize>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    selection_strategy: Option<SelectionStrategyKind>,
    tcp_nodelay: Option<bool>,
}

impl NetworkConfigBuilder {
    /// Creates a new network configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node address.
    pub fn add_address(mut self, address: SocketAddr) -> Self {
        self.addresses.push(address);
        self
    }

    /// Sets the node addresses, replacing any previously configured.
    pub fn addresses(mut self, addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.addresses = addresses.into_iter().collect();
        self
    }

    /// Sets how many connections are opened to every node.
    pub fn connections_per_node(mut self, count: usize) -> Self {
        self.connections_per_node = Some(count);
        self
    }

    /// Sets the connection timeout duration.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the default request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the connection selection strategy.
    pub fn selection_strategy(mut self, kind: SelectionStrategyKind) -> Self {
        self.selection_strategy = Some(kind);
        self
    }

    /// Enables or disables `TCP_NODELAY`.
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = Some(enabled);
        self
    }

    /// Builds the network configuration.
    pub fn build(self) -> Result<NetworkConfig, ConfigError> {
        let addresses = if self.addresses.is_empty() {
            vec![default_address()]
        } else {
            self.addresses
        };

        let connections_per_node = self
            .connections_per_node
            .unwrap_or(DEFAULT_CONNECTIONS_PER_NODE);
        if connections_per_node == 0 {
            return Err(ConfigError::new(
                "connections_per_node must be at least 1",
            ));
        }

        let connect_timeout = self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        if connect_timeout.is_zero() {
            return Err(ConfigError::new("connect_timeout must be greater than zero"));
        }

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        if request_timeout.is_zero() {
            return Err(ConfigError::new("request_timeout must be greater than zero"));
        }

        Ok(NetworkConfig {
            addresses,
            connections_per_node,
            connect_timeout,
            request_timeout,
            selection_strategy: self.selection_strategy.unwrap_or_default(),
            tcp_nodelay: self.tcp_nodelay.unwrap_or(true),
        })
    }
}

/// Which retry policy wraps client operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryKind {
    /// Every failure propagates immediately.
    #[default]
    Disabled,
    /// Retry up to a fixed number of times.
    AttemptsBound,
    /// Retry until the operation timeout is exceeded.
    Infinite,
}

/// Which failures a configured retry policy considers retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryOn {
    /// Only network-class failures (connection loss, timeouts).
    #[default]
    NetworkErrors,
    /// Any failure.
    AnyError,
}

/// Retry configuration for client operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    kind: RetryKind,
    retry_on: RetryOn,
    max_attempts: u32,
    delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
    request_timeout: Option<Duration>,
    operation_timeout: Duration,
}

impl RetryConfig {
    /// Creates a new builder for retry configuration.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Returns which retry policy is used.
    pub fn kind(&self) -> RetryKind {
        self.kind
    }

    /// Returns which failures are retried.
    pub fn retry_on(&self) -> RetryOn {
        self.retry_on
    }

    /// Returns the maximum number of retries for attempts-bound policies.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay before the first retry.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns the maximum delay between retries.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Returns the delay multiplier applied after every retry.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Returns the jitter factor applied to delays (0.0 to 1.0).
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Returns the per-attempt timeout, if it overrides the network default.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Returns the whole-operation timeout for unbounded policies.
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            kind: RetryKind::default(),
            retry_on: RetryOn::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
            max_delay: DEFAULT_MAX_RETRY_DELAY,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
            jitter: 0.0,
            request_timeout: None,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl From<RetryConfig> for RetryConfigBuilder {
    fn from(config: RetryConfig) -> Self {
        Self {
            kind: Some(config.kind),
            retry_on: Some(config.retry_on),
            max_attempts: Some(config.max_attempts),
            delay: Some(config.delay),
            max_delay: Some(config.max_delay),
            multiplier: Some(config.multiplier),
            jitter: Some(config.jitter),
            request_timeout: config.request_timeout,
            operation_timeout: Some(config.operation_timeout),
        }
    }
}

/// Builder for `RetryConfig`.
#[derive(Debug, Clone, Default)]
pub struct RetryConfigBuilder {
    kind: Option<RetryKind>,
    retry_on: Option<RetryOn>,
    max_attempts: Option<u32>,
    delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
    request_timeout: Option<Duration>,
    operation_timeout: Option<Duration>,
}

impl RetryConfigBuilder {
    /// Creates a new retry configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses an attempts-bound policy allowing `max_attempts` retries.
    pub fn attempts_bound(mut self, max_attempts: u32) -> Self {
        self.kind = Some(RetryKind::AttemptsBound);
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Uses an unbounded policy limited by `operation_timeout`.
    pub fn infinite(mut self, operation_timeout: Duration) -> Self {
        self.kind = Some(RetryKind::Infinite);
        self.operation_timeout = Some(operation_timeout);
        self
    }

    /// Disables retrying.
    pub fn disabled(mut self) -> Self {
        self.kind = Some(RetryKind::Disabled);
        self
    }

    /// Sets the retry policy kind without touching its limits.
    pub fn kind(mut self, kind: RetryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Sets the number of retries allowed by the attempts-bound policy.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Sets which failures are retried.
    pub fn retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = Some(retry_on);
        self
    }

    /// Sets the delay before the first retry.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sets the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Sets the delay multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Sets the jitter factor (0.0 to 1.0).
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Sets the per-attempt timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the whole-operation timeout for unbounded policies.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Builds the retry configuration, returning an error if validation fails.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `delay` exceeds `max_delay`
    /// - `multiplier` is less than 1.0
    /// - `jitter` is outside 0.0..=1.0
    /// - a timeout is zero
    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        let delay = self.delay.unwrap_or(DEFAULT_RETRY_DELAY);
        let max_delay = self.max_delay.unwrap_or(DEFAULT_MAX_RETRY_DELAY);
        let multiplier = self.multiplier.unwrap_or(DEFAULT_RETRY_MULTIPLIER);
        let jitter = self.jitter.unwrap_or(0.0);
        let operation_timeout = self.operation_timeout.unwrap_or(DEFAULT_OPERATION_TIMEOUT);

        if delay > max_delay {
            return Err(ConfigError::new("delay must not exceed max_delay"));
        }

        if multiplier < 1.0 {
            return Err(ConfigError::new("multiplier must be at least 1.0"));
        }

        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::new("jitter must be between 0.0 and 1.0"));
        }

        if operation_timeout.is_zero() {
            return Err(ConfigError::new(
                "operation_timeout must be greater than zero",
            ));
        }

        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::new("request_timeout must be greater than zero"));
        }

        Ok(RetryConfig {
            kind: self.kind.unwrap_or_default(),
            retry_on: self.retry_on.unwrap_or_default(),
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            delay,
            max_delay,
            multiplier,
            jitter,
            request_timeout: self.request_timeout,
            operation_timeout,
        })
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    network: NetworkConfig,
    retry: RetryConfig,
}

impl ClientConfig {
    /// Creates a new client configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Returns the network configuration.
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Returns the retry configuration.
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Returns the timeout applied to each retry attempt.
    ///
    /// Falls back to the network request timeout when the retry section does
    /// not override it.
    pub fn attempt_timeout(&self) -> Duration {
        self.retry
            .request_timeout()
            .unwrap_or_else(|| self.network.request_timeout())
    }
}

/// Builder for `ClientConfig`.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    network: NetworkConfigBuilder,
    retry: RetryConfigBuilder,
}

impl ClientConfigBuilder {
    /// Creates a new client configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures network settings using a builder function.
    pub fn network<F>(mut self, f: F) -> Self
    where
        F: FnOnce(NetworkConfigBuilder) -> NetworkConfigBuilder,
    {
        self.network = f(self.network);
        self
    }

    /// Configures retry settings using a builder function.
    pub fn retry<F>(mut self, f: F) -> Self
    where
        F: FnOnce(RetryConfigBuilder) -> RetryConfigBuilder,
    {
        self.retry = f(self.retry);
        self
    }

    /// Adds a node address.
    pub fn add_address(mut self, address: SocketAddr) -> Self {
        self.network = self.network.add_address(address);
        self
    }

    /// Sets the node addresses, replacing any previously configured.
    pub fn addresses(mut self, addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.network = self.network.addresses(addresses);
        self
    }

    /// Sets how many connections are opened to every node.
    pub fn connections_per_node(mut self, count: usize) -> Self {
        self.network = self.network.connections_per_node(count);
        self
    }

    /// Sets the connection timeout duration.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.connect_timeout(timeout);
        self
    }

    /// Sets the default request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.request_timeout(timeout);
        self
    }

    /// Sets the connection selection strategy.
    pub fn selection_strategy(mut self, kind: SelectionStrategyKind) -> Self {
        self.network = self.network.selection_strategy(kind);
        self
    }

    /// Builds the client configuration.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let network = self.network.build()?;
        let retry = self.retry.build()?;

        Ok(ClientConfig { network, retry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_client_config() {
        let config = ClientConfig::default();
        assert_eq!(config.network().addresses(), &[default_address()]);
        assert_eq!(config.network().connections_per_node(), 1);
        assert_eq!(config.network().connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.retry().kind(), RetryKind::Disabled);
    }

    #[test]
    fn test_builder_default_address() {
        let config = ClientConfig::builder().build().unwrap();
        assert_eq!(
            config.network().addresses()[0],
            "127.0.0.1:3301".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_builder_addresses_replaces() {
        let addr1: SocketAddr = "10.0.0.1:3301".parse().unwrap();
        let addr2: SocketAddr = "10.0.0.2:3301".parse().unwrap();

        let config = ClientConfig::builder()
            .add_address("10.0.0.9:3301".parse().unwrap())
            .addresses([addr1, addr2])
            .build()
            .unwrap();

        assert_eq!(config.network().addresses(), &[addr1, addr2]);
    }

    #[test]
    fn test_builder_zero_connections_fails() {
        let result = ClientConfig::builder().connections_per_node(0).build();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("connections_per_node must be at least 1"));
    }

    #[test]
    fn test_builder_zero_connect_timeout_fails() {
        let result = ClientConfig::builder()
            .connect_timeout(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_network_builder_closure() {
        let config = ClientConfig::builder()
            .network(|n| {
                n.connections_per_node(4)
                    .request_timeout(Duration::from_millis(500))
                    .selection_strategy(SelectionStrategyKind::ParallelRoundRobin)
                    .tcp_nodelay(false)
            })
            .build()
            .unwrap();

        assert_eq!(config.network().connections_per_node(), 4);
        assert_eq!(config.network().request_timeout(), Duration::from_millis(500));
        assert_eq!(
            config.network().selection_strategy(),
            SelectionStrategyKind::ParallelRoundRobin
        );
        assert!(!config.network().tcp_nodelay());
    }

    #[test]
    fn test_retry_attempts_bound() {
        let config = ClientConfig::builder()
            .retry(|r| r.attempts_bound(5).delay(Duration::from_millis(10)))
            .build()
            .unwrap();

        assert_eq!(config.retry().kind(), RetryKind::AttemptsBound);
        assert_eq!(config.retry().max_attempts(), 5);
        assert_eq!(config.retry().delay(), Duration::from_millis(10));
    }

    #[test]
    fn test_retry_infinite() {
        let config = ClientConfig::builder()
            .retry(|r| r.infinite(Duration::from_secs(5)).retry_on(RetryOn::AnyError))
            .build()
            .unwrap();

        assert_eq!(config.retry().kind(), RetryKind::Infinite);
        assert_eq!(config.retry().operation_timeout(), Duration::from_secs(5));
        assert_eq!(config.retry().retry_on(), RetryOn::AnyError);
    }

    #[test]
    fn test_retry_delay_exceeding_max_fails() {
        let result = RetryConfigBuilder::new()
            .delay(Duration::from_secs(10))
            .max_delay(Duration::from_secs(1))
            .build();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("delay must not exceed max_delay"));
    }

    #[test]
    fn test_retry_multiplier_below_one_fails() {
        let result = RetryConfigBuilder::new().multiplier(0.5).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_retry_jitter_out_of_range_fails() {
        let result = RetryConfigBuilder::new().jitter(1.5).build();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("jitter must be between 0.0 and 1.0"));
    }

    #[test]
    fn test_attempt_timeout_falls_back_to_network() {
        let config = ClientConfig::builder()
            .request_timeout(Duration::from_millis(700))
            .build()
            .unwrap();
        assert_eq!(config.attempt_timeout(), Duration::from_millis(700));

        let config = ClientConfig::builder()
            .request_timeout(Duration::from_millis(700))
            .retry(|r| r.request_timeout(Duration::from_millis(100)))
            .build()
            .unwrap();
        assert_eq!(config.attempt_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_retry_config_into_builder() {
        let original = RetryConfigBuilder::new()
            .attempts_bound(7)
            .jitter(0.25)
            .build()
            .unwrap();
        let rebuilt = RetryConfigBuilder::from(original.clone()).build().unwrap();

        assert_eq!(rebuilt.max_attempts(), 7);
        assert_eq!(rebuilt.jitter(), 0.25);
        assert_eq!(rebuilt.kind(), original.kind());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::new("bad value");
        assert_eq!(err.to_string(), "configuration error: bad value");
    }
}
