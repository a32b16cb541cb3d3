//! Registry metrics
//!
//! The one gauge the replication design depends on is `master_slave_role`:
//! 1.0 on the node currently holding the master lease, 0.0 everywhere else.
//! Registration and forwarding counters round out the operational picture.

use crate::config::MetricsOptions;
use crate::error::{RegistryError, RegistryResult};
use prometheus::{Encoder, Gauge, IntCounter, Registry, TextEncoder};

pub struct RegistryMetrics {
    registry: Registry,
    /// 1.0 indicates this node is the active master in the cluster and is
    /// where all register and config update requests are served.
    pub master_role: Gauge,
    pub registrations: IntCounter,
    pub forwarded_requests: IntCounter,
    #[allow(dead_code)]
    options: MetricsOptions,
}

impl RegistryMetrics {
    pub fn new(options: MetricsOptions) -> RegistryResult<Self> {
        let registry = Registry::new();

        let master_role = Gauge::new(
            "schema_registry_master_slave_role",
            "1.0 indicates the node is the active master in the cluster and is the node \
             where all register schema and config update requests are served",
        )
        .map_err(|e| RegistryError::Initialization(format!("failed to create gauge: {}", e)))?;

        let registrations = IntCounter::new(
            "schema_registry_registrations_total",
            "Schema registrations served locally by this node",
        )
        .map_err(|e| RegistryError::Initialization(format!("failed to create counter: {}", e)))?;

        let forwarded_requests = IntCounter::new(
            "schema_registry_forwarded_requests_total",
            "Mutating requests forwarded to the current master",
        )
        .map_err(|e| RegistryError::Initialization(format!("failed to create counter: {}", e)))?;

        for collector in [
            Box::new(master_role.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(registrations.clone()),
            Box::new(forwarded_requests.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|e| RegistryError::Initialization(format!("metric registration: {}", e)))?;
        }

        Ok(Self {
            registry,
            master_role,
            registrations,
            forwarded_requests,
            options,
        })
    }

    /// Render all metrics in the text exposition format.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
