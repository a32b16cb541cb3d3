//! Schema Registry configuration

use crate::types::{CompatibilityLevel, NodeIdentity};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one registry instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRegistryConfig {
    /// Advertised host of this instance; forwarded requests land here.
    #[serde(default = "default_host")]
    pub host: String,

    /// Advertised port of this instance.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Coordinator namespace segment; every node of a cluster must agree.
    pub cluster_name: String,

    /// Whether this node may win master election.
    #[serde(default = "default_true")]
    pub master_eligibility: bool,

    /// Log store options
    #[serde(default)]
    pub log: LogStoreOptions,

    /// Default cluster compatibility level, used when neither a subject-level
    /// nor a cluster-level config record exists.
    #[serde(default)]
    pub compatibility_level: CompatibilityLevel,

    /// Metrics sampling options
    #[serde(default)]
    pub metrics: MetricsOptions,
}

/// Options for the log-backed store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogStoreOptions {
    /// Name of the dedicated single-partition topic.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Bootstrap URL of the log/coordination deployment.
    #[serde(default = "default_connection_url")]
    pub connection_url: String,

    /// Coordinator session and connection timeout.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Deadline for a produced record to be applied by the local tailer.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Deadline for bootstrap to reach the end of the log.
    #[serde(default = "default_bootstrap_timeout_ms")]
    pub bootstrap_timeout_ms: u64,
}

/// Metrics sampling options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsOptions {
    #[serde(default = "default_num_samples")]
    pub num_samples: u32,

    #[serde(default = "default_sample_window_ms")]
    pub sample_window_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_true() -> bool {
    true
}

fn default_topic() -> String {
    "_schemas".to_string()
}

fn default_connection_url() -> String {
    "localhost:9092".to_string()
}

fn default_session_timeout_ms() -> u64 {
    30000
}

fn default_write_timeout_ms() -> u64 {
    5000
}

fn default_bootstrap_timeout_ms() -> u64 {
    60000
}

fn default_num_samples() -> u32 {
    2
}

fn default_sample_window_ms() -> u64 {
    30000
}

impl Default for LogStoreOptions {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            connection_url: default_connection_url(),
            session_timeout_ms: default_session_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            bootstrap_timeout_ms: default_bootstrap_timeout_ms(),
        }
    }
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            num_samples: default_num_samples(),
            sample_window_ms: default_sample_window_ms(),
        }
    }
}

impl LogStoreOptions {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

impl SchemaRegistryConfig {
    /// Create a config for the given cluster with defaults everywhere else.
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cluster_name: cluster_name.into(),
            master_eligibility: true,
            log: LogStoreOptions::default(),
            compatibility_level: CompatibilityLevel::default(),
            metrics: MetricsOptions::default(),
        }
    }

    pub fn with_identity(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_master_eligibility(mut self, eligible: bool) -> Self {
        self.master_eligibility = eligible;
        self
    }

    pub fn with_compatibility(mut self, level: CompatibilityLevel) -> Self {
        self.compatibility_level = level;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.log.write_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.log.bootstrap_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Identity registered with the coordinator for master election.
    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity::new(self.host.clone(), self.port, self.master_eligibility)
    }

    /// Coordinator namespace root for this cluster.
    pub fn namespace(&self) -> String {
        format!("/{}", self.cluster_name)
    }

    /// Coordinator group used for master election.
    pub fn election_group(&self) -> String {
        format!("/{}/master", self.cluster_name)
    }

    /// Coordinator node holding the schema id counter.
    pub fn id_counter_path(&self) -> String {
        format!("/{}/schema_id_counter", self.cluster_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchemaRegistryConfig::new("registry-test");
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8081);
        assert!(config.master_eligibility);
        assert_eq!(config.log.topic, "_schemas");
        assert_eq!(config.log.session_timeout_ms, 30000);
        assert_eq!(config.compatibility_level, CompatibilityLevel::Backward);
        assert_eq!(config.metrics.num_samples, 2);
        assert_eq!(config.metrics.sample_window_ms, 30000);
    }

    #[test]
    fn test_coordinator_paths() {
        let config = SchemaRegistryConfig::new("prod");
        assert_eq!(config.namespace(), "/prod");
        assert_eq!(config.election_group(), "/prod/master");
        assert_eq!(config.id_counter_path(), "/prod/schema_id_counter");
    }

    #[test]
    fn test_deserialization_with_defaults() {
        let config: SchemaRegistryConfig =
            serde_json::from_str(r#"{"cluster_name":"c1","port":9000}"#).unwrap();
        assert_eq!(config.cluster_name, "c1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.log.write_timeout_ms, 5000);
        assert!(config.master_eligibility);
    }

    #[test]
    fn test_builders() {
        let config = SchemaRegistryConfig::new("c1")
            .with_identity("10.0.0.1", 9001)
            .with_master_eligibility(false)
            .with_compatibility(CompatibilityLevel::Full);
        let identity = config.identity();
        assert_eq!(identity.host, "10.0.0.1");
        assert_eq!(identity.port, 9001);
        assert!(!identity.master_eligibility);
        assert_eq!(config.compatibility_level, CompatibilityLevel::Full);
    }
}
