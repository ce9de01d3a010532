//! Meshelect Configuration
//!
//! Configuration structures for a meshelect node. Timing constants are
//! expressed relative to the announce interval: the leader threshold and
//! leader timeout are multiples of it.

use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::time::Duration;

/// Main meshelect configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Node-specific configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Broadcast channel configuration
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Election timing configuration
    #[serde(default)]
    pub election: ElectionConfig,

    /// Aggregate (EWMA) configuration
    #[serde(default)]
    pub aggregate: AggregateConfig,

    /// Request/response endpoint configuration
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    /// Node address override; auto-detected when unset
    #[serde(default)]
    pub address: Option<Ipv6Addr>,
}

/// Broadcast channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Multicast group for both channels
    #[serde(default = "default_group")]
    pub group: Ipv6Addr,

    /// Port for the identity announce channel
    #[serde(default = "default_announce_port")]
    pub announce_port: u16,

    /// Port for the aggregate publish channel
    #[serde(default = "default_aggregate_port")]
    pub aggregate_port: u16,
}

/// Election timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Periodic announce/query interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Leader threshold as a multiple of the interval (settling window)
    #[serde(default = "default_threshold_intervals")]
    pub leader_threshold_intervals: u64,

    /// Leader timeout as a multiple of the interval (failure detector)
    #[serde(default = "default_timeout_intervals")]
    pub leader_timeout_intervals: u64,

    /// Maximum number of clients the coordinator registers
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
}

/// Aggregate (EWMA) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfig {
    /// EWMA weight divisor; must be a power of two
    #[serde(default = "default_weight")]
    pub weight: i32,
}

/// Request/response endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// UDP port the endpoint server binds
    #[serde(default = "default_endpoint_port")]
    pub port: u16,

    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions

fn default_group() -> Ipv6Addr {
    // Site-local scope, outside any assigned range
    "ff15::2409".parse().unwrap()
}

fn default_announce_port() -> u16 {
    2409
}

fn default_aggregate_port() -> u16 {
    2410
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_threshold_intervals() -> u64 {
    5
}

fn default_timeout_intervals() -> u64 {
    7
}

fn default_max_nodes() -> usize {
    8
}

fn default_weight() -> i32 {
    16
}

fn default_endpoint_port() -> u16 {
    5683
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            announce_port: default_announce_port(),
            aggregate_port: default_aggregate_port(),
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            leader_threshold_intervals: default_threshold_intervals(),
            leader_timeout_intervals: default_timeout_intervals(),
            max_nodes: default_max_nodes(),
        }
    }
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            weight: default_weight(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            port: default_endpoint_port(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl MeshConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: MeshConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.election.interval_ms == 0 {
            return Err(crate::Error::Config(
                "election.interval_ms must be greater than zero".into(),
            ));
        }

        if self.election.leader_threshold_intervals == 0 {
            return Err(crate::Error::Config(
                "election.leader_threshold_intervals must be greater than zero".into(),
            ));
        }

        // The failure detector must outlast the settling window, or a
        // fresh client times out its coordinator before committing to it
        if self.election.leader_timeout_intervals <= self.election.leader_threshold_intervals {
            return Err(crate::Error::Config(
                "election.leader_timeout_intervals must exceed leader_threshold_intervals".into(),
            ));
        }

        if self.election.max_nodes == 0 {
            return Err(crate::Error::Config(
                "election.max_nodes must be greater than zero".into(),
            ));
        }

        if self.aggregate.weight <= 0 || !(self.aggregate.weight as u32).is_power_of_two() {
            return Err(crate::Error::Config(format!(
                "aggregate.weight must be a positive power of two, got {}",
                self.aggregate.weight
            )));
        }

        if !self.broadcast.group.is_multicast() {
            return Err(crate::Error::Config(format!(
                "broadcast.group must be a multicast address, got {}",
                self.broadcast.group
            )));
        }

        if self.broadcast.announce_port == self.broadcast.aggregate_port {
            return Err(crate::Error::Config(
                "broadcast.announce_port and broadcast.aggregate_port must differ".into(),
            ));
        }

        Ok(())
    }

    /// Get the announce interval as Duration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.election.interval_ms)
    }

    /// Get the leader threshold (settling window) as Duration
    pub fn leader_threshold(&self) -> Duration {
        Duration::from_millis(self.election.interval_ms * self.election.leader_threshold_intervals)
    }

    /// Get the leader timeout (failure detector window) as Duration
    pub fn leader_timeout(&self) -> Duration {
        Duration::from_millis(self.election.interval_ms * self.election.leader_timeout_intervals)
    }

    /// Get the request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.endpoint.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[broadcast]
group = "ff15::2409"
announce_port = 2409
aggregate_port = 2410

[election]
interval_ms = 2000
leader_threshold_intervals = 5
leader_timeout_intervals = 7
max_nodes = 8

[aggregate]
weight = 16
"#;

        let config = MeshConfig::from_str(toml).unwrap();
        assert_eq!(config.election.max_nodes, 8);
        assert_eq!(config.interval(), Duration::from_secs(2));
        assert_eq!(config.leader_threshold(), Duration::from_secs(10));
        assert_eq!(config.leader_timeout(), Duration::from_secs(14));
    }

    #[test]
    fn test_defaults() {
        let config = MeshConfig::from_str("").unwrap();
        assert_eq!(config.election.interval_ms, 2000);
        assert_eq!(config.aggregate.weight, 16);
        assert_eq!(config.endpoint.port, 5683);
        assert!(config.node.address.is_none());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshelect.toml");
        std::fs::write(&path, "[election]\ninterval_ms = 500\n").unwrap();

        let config = MeshConfig::from_file(&path).unwrap();
        assert_eq!(config.interval(), Duration::from_millis(500));

        assert!(MeshConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_rejects_non_power_of_two_weight() {
        let toml = r#"
[aggregate]
weight = 12
"#;
        assert!(MeshConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_rejects_timeout_not_exceeding_threshold() {
        let toml = r#"
[election]
leader_threshold_intervals = 7
leader_timeout_intervals = 7
"#;
        assert!(MeshConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_rejects_unicast_group() {
        let toml = r#"
[broadcast]
group = "2001:db8::1"
"#;
        assert!(MeshConfig::from_str(toml).is_err());
    }
}
