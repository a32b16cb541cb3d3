//! Log-backed key-value store
//!
//! The authoritative state is the append-only schema topic; this store
//! projects it into an ordered in-memory map. A single tailer task applies
//! records in log order, fans schema/config values out to an
//! [`ApplyListener`] (how the registry maintains its derived indexes without
//! a back-reference), and publishes the highest applied offset.
//!
//! Writes use a producer-with-readback discipline: `append` produces to the
//! log and then waits until the local tailer has applied the produced offset.
//! When `append` returns, every derived index on this node reflects the
//! write. This is what gives the master read-your-writes.
//!
//! Bootstrap appends a `Noop` probe record and waits for the tailer to reach
//! it, guaranteeing the view is at least as fresh as the moment bootstrap
//! completed.

use crate::error::{RegistryError, RegistryResult};
use crate::log::{LogClient, LogRecord};
use crate::types::{ConfigValue, RegistryKey, RegistryValue, SchemaValue};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::ops::Bound::Included;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Observer of applied log records, used to maintain derived indexes.
pub trait ApplyListener: Send + Sync {
    fn on_schema(&self, value: &SchemaValue);
    fn on_config(&self, subject: &Option<String>, value: &ConfigValue);
}

/// No-op listener for stores that need no derived indexes.
pub struct NullListener;

impl ApplyListener for NullListener {
    fn on_schema(&self, _value: &SchemaValue) {}
    fn on_config(&self, _subject: &Option<String>, _value: &ConfigValue) {}
}

/// Wire codec for topic records. Implementations must be stable:
/// byte-for-byte equal outputs for equal logical inputs.
pub trait WireSerializer: Send + Sync {
    fn serialize_key(&self, key: &RegistryKey) -> RegistryResult<Vec<u8>>;
    fn deserialize_key(&self, raw: &[u8]) -> RegistryResult<RegistryKey>;
    fn serialize_value(&self, value: &RegistryValue) -> RegistryResult<Vec<u8>>;
    fn deserialize_value(&self, raw: &[u8]) -> RegistryResult<RegistryValue>;
}

/// Tagged-JSON codec; the default wire format of the schema topic.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl WireSerializer for JsonSerializer {
    fn serialize_key(&self, key: &RegistryKey) -> RegistryResult<Vec<u8>> {
        Ok(serde_json::to_vec(key)?)
    }

    fn deserialize_key(&self, raw: &[u8]) -> RegistryResult<RegistryKey> {
        serde_json::from_slice(raw)
            .map_err(|e| RegistryError::Store(format!("undecodable record key: {}", e)))
    }

    fn serialize_value(&self, value: &RegistryValue) -> RegistryResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize_value(&self, raw: &[u8]) -> RegistryResult<RegistryValue> {
        serde_json::from_slice(raw)
            .map_err(|e| RegistryError::Store(format!("undecodable record value: {}", e)))
    }
}

struct StoreShared {
    serializer: Arc<dyn WireSerializer>,
    listener: Arc<dyn ApplyListener>,
    entries: RwLock<BTreeMap<RegistryKey, RegistryValue>>,
    /// Highest offset applied by the tailer; −1 before the first record.
    applied: watch::Sender<i64>,
}

impl StoreShared {
    /// Apply one record in log order. Undecodable records are logged and
    /// skipped; the tailer must never halt on them.
    fn apply(&self, record: &LogRecord) {
        let key = match self.serializer.deserialize_key(&record.key) {
            Ok(key) => key,
            Err(e) => {
                warn!(offset = record.offset, error = %e, "skipping record with undecodable key");
                return;
            }
        };

        match key {
            // Freshness probes are never materialized.
            RegistryKey::Noop => {}
            RegistryKey::Config { subject } => {
                match self.serializer.deserialize_value(&record.value) {
                    Ok(RegistryValue::Config(config)) => {
                        self.listener.on_config(&subject, &config);
                        self.entries.write().insert(
                            RegistryKey::Config { subject },
                            RegistryValue::Config(config),
                        );
                    }
                    Ok(other) => {
                        warn!(offset = record.offset, value = ?other, "config key with non-config value");
                    }
                    Err(e) => {
                        warn!(offset = record.offset, error = %e, "skipping undecodable config record");
                    }
                }
            }
            RegistryKey::Schema(schema_key) => {
                match self.serializer.deserialize_value(&record.value) {
                    Ok(RegistryValue::Schema(schema)) => {
                        self.listener.on_schema(&schema);
                        self.entries.write().insert(
                            RegistryKey::Schema(schema_key),
                            RegistryValue::Schema(schema),
                        );
                    }
                    Ok(other) => {
                        warn!(offset = record.offset, value = ?other, "schema key with non-schema value");
                    }
                    Err(e) => {
                        warn!(offset = record.offset, error = %e, "skipping undecodable schema record");
                    }
                }
            }
        }
    }
}

/// Typed key-value store projected from the schema topic
pub struct LogBackedStore {
    log: Arc<dyn LogClient>,
    shared: Arc<StoreShared>,
    tailer: Mutex<Option<JoinHandle<()>>>,
    write_timeout: Duration,
    bootstrap_timeout: Duration,
}

impl LogBackedStore {
    pub fn new(
        log: Arc<dyn LogClient>,
        serializer: Arc<dyn WireSerializer>,
        listener: Arc<dyn ApplyListener>,
        write_timeout: Duration,
        bootstrap_timeout: Duration,
    ) -> Self {
        let (applied, _) = watch::channel(-1i64);
        Self {
            log,
            shared: Arc::new(StoreShared {
                serializer,
                listener,
                entries: RwLock::new(BTreeMap::new()),
                applied,
            }),
            tailer: Mutex::new(None),
            write_timeout,
            bootstrap_timeout,
        }
    }

    /// Subscribe to the topic from offset 0, start the tailer, and block
    /// until bootstrap completes: a `Noop` probe is appended and the tailer
    /// must apply everything up to and including it.
    pub async fn init(&self) -> RegistryResult<()> {
        let rx = self.log.subscribe(0).await?;
        let handle = Self::spawn_tailer(Arc::clone(&self.shared), rx);
        {
            let mut tailer = self.tailer.lock();
            if tailer.is_some() {
                handle.abort();
                return Err(RegistryError::Initialization(
                    "store is already initialized".to_string(),
                ));
            }
            *tailer = Some(handle);
        }

        self.wait_until_bootstrap_completes().await?;
        info!(applied = *self.shared.applied.borrow(), "log store bootstrap complete");
        Ok(())
    }

    fn spawn_tailer(
        shared: Arc<StoreShared>,
        mut rx: mpsc::Receiver<LogRecord>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                shared.apply(&record);
                shared.applied.send_replace(record.offset as i64);
            }
            debug!("log subscription ended, tailer exiting");
        })
    }

    /// Idempotent freshness barrier: appends a `Noop` probe and waits until
    /// the tailer has applied it. Used at bootstrap and on master promotion.
    pub async fn wait_until_bootstrap_completes(&self) -> RegistryResult<()> {
        let key = self.shared.serializer.serialize_key(&RegistryKey::Noop)?;
        let offset = self.log.append(Bytes::from(key), Bytes::new()).await?;
        if self.wait_applied(offset as i64, self.bootstrap_timeout).await {
            Ok(())
        } else {
            Err(RegistryError::BootstrapTimeout(self.bootstrap_timeout))
        }
    }

    /// Produce a record and wait until the local tailer has applied it.
    pub async fn append(&self, key: RegistryKey, value: RegistryValue) -> RegistryResult<()> {
        let raw_key = self.shared.serializer.serialize_key(&key)?;
        let raw_value = self.shared.serializer.serialize_value(&value)?;
        let offset = self
            .log
            .append(Bytes::from(raw_key), Bytes::from(raw_value))
            .await?;
        if self.wait_applied(offset as i64, self.write_timeout).await {
            Ok(())
        } else {
            Err(RegistryError::WriteTimeout(self.write_timeout))
        }
    }

    async fn wait_applied(&self, target: i64, limit: Duration) -> bool {
        let mut rx = self.shared.applied.subscribe();
        let reached = async {
            while *rx.borrow_and_update() < target {
                if rx.changed().await.is_err() {
                    return false;
                }
            }
            true
        };
        tokio::time::timeout(limit, reached).await.unwrap_or(false)
    }

    /// Current value for a key, from the materialized view.
    pub fn get(&self, key: &RegistryKey) -> Option<RegistryValue> {
        self.shared.entries.read().get(key).cloned()
    }

    /// Values whose keys fall in `[lo, hi]`, in key order.
    pub fn get_all(&self, lo: &RegistryKey, hi: &RegistryKey) -> Vec<RegistryValue> {
        self.shared
            .entries
            .read()
            .range((Included(lo.clone()), Included(hi.clone())))
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// All keys in the materialized view, in key order.
    pub fn get_all_keys(&self) -> Vec<RegistryKey> {
        self.shared.entries.read().keys().cloned().collect()
    }

    /// Stop the tailer. The materialized view stays readable.
    pub fn close(&self) {
        if let Some(handle) = self.tailer.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for LogBackedStore {
    fn drop(&mut self) {
        self.close();
    }
}
