//! Schema Registry - main interface
//!
//! One `SchemaRegistry` instance per process, with lifecycle
//! `new → init → serve → close`. Reads are served from the materialized view
//! of the log store; mutations run on the master (or are forwarded to it) and
//! become visible through the log-apply path only.
//!
//! The master lock guards the current master identity and the
//! route-or-forward decision; it is never held across forwarded network I/O,
//! and `register` itself runs without it; correctness of concurrent
//! registrations on the master follows from the per-session atomic id
//! counter, the producer-with-readback store, and content deduplication
//! after readback.

use crate::config::SchemaRegistryConfig;
use crate::coordinator::Coordinator;
use crate::dialect::{AvroDialect, SchemaDialect};
use crate::elector::MasterElector;
use crate::error::{RegistryError, RegistryResult};
use crate::fingerprint::Md5;
use crate::forwarder::{Forwarder, HeaderProperties};
use crate::id_allocator::IdAllocator;
use crate::log::LogClient;
use crate::metrics::RegistryMetrics;
use crate::store::{ApplyListener, JsonSerializer, LogBackedStore};
use crate::types::{
    CompatibilityLevel, ConfigValue, NodeIdentity, RegistryKey, RegistryValue, Schema, SchemaKey,
    SchemaIdAndSubjects, SchemaValue, VersionSpec, MAX_VERSION, MIN_VERSION,
};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Derived indexes over the log, rebuilt purely from the apply path.
///
/// Mutated only by the store's tailer (through [`ApplyListener`]); readers
/// take per-key atomic snapshots.
#[derive(Debug, Default)]
pub struct RegistryIndexes {
    /// id -> canonical (subject, version) holding the schema
    guid_to_schema_key: DashMap<i32, SchemaKey>,
    /// md5(canonical schema) -> id and every subject/version it appears under
    schema_hash_to_guid: DashMap<Md5, SchemaIdAndSubjects>,
    /// Largest id ever observed in the log; −1 before any schema record.
    max_id_in_store: AtomicI32,
}

impl RegistryIndexes {
    fn new() -> Self {
        Self {
            guid_to_schema_key: DashMap::new(),
            schema_hash_to_guid: DashMap::new(),
            max_id_in_store: AtomicI32::new(-1),
        }
    }

    pub fn max_id(&self) -> i32 {
        self.max_id_in_store.load(Ordering::SeqCst)
    }

    fn schema_key_for(&self, id: i32) -> Option<SchemaKey> {
        self.guid_to_schema_key.get(&id).map(|k| k.clone())
    }

    /// Copy out the dedupe entry for a schema hash: `(id, version under the
    /// given subject, if any)`.
    fn dedupe_entry(&self, hash: &Md5, subject: &str) -> Option<(i32, Option<i32>)> {
        self.schema_hash_to_guid
            .get(hash)
            .map(|entry| (entry.id, entry.version_for(subject)))
    }
}

impl ApplyListener for RegistryIndexes {
    fn on_schema(&self, value: &SchemaValue) {
        self.guid_to_schema_key
            .insert(value.id, SchemaKey::new(value.subject.clone(), value.version));
        self.schema_hash_to_guid
            .entry(Md5::of(&value.schema))
            .or_insert_with(|| SchemaIdAndSubjects::new(value.id))
            .record(&value.subject, value.version);
        self.max_id_in_store.fetch_max(value.id, Ordering::SeqCst);
    }

    fn on_config(&self, _subject: &Option<String>, _value: &ConfigValue) {}
}

#[derive(Default)]
struct MasterState {
    /// Identity of the current master; `None` while no master is known.
    master: Option<NodeIdentity>,
    /// Allocator of the current master session; `Some` only on the master.
    allocator: Option<Arc<IdAllocator>>,
}

enum Route {
    Local,
    Forward(NodeIdentity),
    Unknown,
}

/// Replicated schema registry node
pub struct SchemaRegistry {
    config: SchemaRegistryConfig,
    my_identity: NodeIdentity,
    store: LogBackedStore,
    indexes: Arc<RegistryIndexes>,
    dialect: Arc<dyn SchemaDialect>,
    coordinator: Arc<dyn Coordinator>,
    forwarder: Forwarder,
    metrics: RegistryMetrics,
    master: tokio::sync::Mutex<MasterState>,
    elector: parking_lot::Mutex<Option<MasterElector>>,
}

impl SchemaRegistry {
    /// Create a registry over the given log and coordinator, with the Avro
    /// dialect. The instance is shared with its elector, so it is handed out
    /// behind an `Arc`.
    pub fn new(
        config: SchemaRegistryConfig,
        log: Arc<dyn LogClient>,
        coordinator: Arc<dyn Coordinator>,
    ) -> RegistryResult<Arc<Self>> {
        Self::with_dialect(config, log, coordinator, Arc::new(AvroDialect))
    }

    pub fn with_dialect(
        config: SchemaRegistryConfig,
        log: Arc<dyn LogClient>,
        coordinator: Arc<dyn Coordinator>,
        dialect: Arc<dyn SchemaDialect>,
    ) -> RegistryResult<Arc<Self>> {
        let indexes = Arc::new(RegistryIndexes::new());
        let store = LogBackedStore::new(
            log,
            Arc::new(JsonSerializer),
            Arc::clone(&indexes) as Arc<dyn ApplyListener>,
            config.log.write_timeout(),
            config.log.bootstrap_timeout(),
        );
        let metrics = RegistryMetrics::new(config.metrics.clone())?;
        let my_identity = config.identity();

        Ok(Arc::new(Self {
            config,
            my_identity,
            store,
            indexes,
            dialect,
            coordinator,
            forwarder: Forwarder::new(),
            metrics,
            master: tokio::sync::Mutex::new(MasterState::default()),
            elector: parking_lot::Mutex::new(None),
        }))
    }

    /// Bootstrap from the log, ensure the coordinator namespace, and join
    /// master election. Returns once the view is caught up and the first
    /// election has settled.
    pub async fn init(self: &Arc<Self>) -> RegistryResult<()> {
        self.store.init().await.map_err(|e| match e {
            timeout @ RegistryError::BootstrapTimeout(_) => timeout,
            other => RegistryError::Initialization(format!(
                "error initializing the log store: {}",
                other
            )),
        })?;

        self.coordinator
            .ensure(&self.config.namespace())
            .await
            .map_err(|e| {
                RegistryError::Initialization(format!(
                    "error creating coordinator namespace {}: {}",
                    self.config.namespace(),
                    e
                ))
            })?;
        info!(namespace = %self.config.namespace(), "coordinator namespace ready");

        let elector = MasterElector::start(
            Arc::clone(&self.coordinator),
            self.config.election_group(),
            self.my_identity.clone(),
            Arc::clone(self),
        )
        .await?;
        *self.elector.lock() = Some(elector);

        Ok(())
    }

    /// Stop electing and tailing. The materialized view stays readable.
    pub async fn close(&self) {
        info!("shutting down schema registry");
        let elector = self.elector.lock().take();
        if let Some(elector) = elector {
            elector.close();
        }
        let mut state = self.master.lock().await;
        state.master = None;
        state.allocator = None;
        drop(state);
        self.store.close();
    }

    pub fn my_identity(&self) -> &NodeIdentity {
        &self.my_identity
    }

    pub async fn is_master(&self) -> bool {
        let state = self.master.lock().await;
        state.master.as_ref() == Some(&self.my_identity)
    }

    /// Identity of the node this instance currently believes is master.
    pub async fn master_identity(&self) -> Option<NodeIdentity> {
        self.master.lock().await.master.clone()
    }

    pub fn metrics(&self) -> &RegistryMetrics {
        &self.metrics
    }

    /// Inform this instance which node is the current master. `None` means no
    /// master is alive. On promotion the local view is caught up with the log
    /// and the next id batch is reserved before the call returns.
    pub async fn set_master(&self, new_master: Option<NodeIdentity>) -> RegistryResult<()> {
        debug!(master = ?new_master, "setting master");

        if let Some(identity) = &new_master {
            if !identity.master_eligibility {
                return Err(RegistryError::InvalidInput(format!(
                    "tried to set an ineligible node to master: {}",
                    identity
                )));
            }
        }

        let mut state = self.master.lock().await;
        let becoming_master = new_master.as_ref() == Some(&self.my_identity);
        state.master = new_master;

        if becoming_master {
            // To act as master, the view must be at least as fresh as the
            // log end at promotion time.
            self.store.wait_until_bootstrap_completes().await?;

            let allocator = Arc::new(IdAllocator::new(
                Arc::clone(&self.coordinator),
                self.config.id_counter_path(),
            ));
            allocator.prime(self.indexes.max_id()).await?;
            state.allocator = Some(allocator);

            self.metrics.master_role.set(1.0);
            info!(identity = %self.my_identity, "elected master");
        } else {
            state.allocator = None;
            self.metrics.master_role.set(0.0);
            if let Some(master) = &state.master {
                info!(master = %master, "following master");
            } else {
                info!("no master currently known");
            }
        }

        Ok(())
    }

    /// Register a schema under a subject on this node. Master path only; use
    /// [`register_or_forward`](Self::register_or_forward) for the routed
    /// entry point.
    pub async fn register(&self, subject: &str, schema: &str) -> RegistryResult<i32> {
        if subject.is_empty() {
            return Err(RegistryError::InvalidInput(
                "subject must not be empty".to_string(),
            ));
        }

        let canonical = self.dialect.canonicalize(schema).ok_or_else(|| {
            RegistryError::InvalidSchema(format!("unparsable schema for subject {}", subject))
        })?;

        // Content dedupe: the same canonical schema keeps its id everywhere.
        let hash = Md5::of(&canonical);
        let carried_id = match self.indexes.dedupe_entry(&hash, subject) {
            Some((id, Some(_version))) => {
                // Already registered under this subject; idempotent no-op.
                return Ok(id);
            }
            Some((id, None)) => Some(id),
            None => None,
        };

        // Derive the next version from the view, which incorporates every
        // prior write thanks to producer readback.
        let versions = self.get_all_versions(subject);
        let latest = versions.last();
        let new_version = latest.map(|s| s.version + 1).unwrap_or(MIN_VERSION);

        if let Some(latest) = latest {
            let level = self.compatibility_level(Some(subject));
            if !self
                .dialect
                .is_compatible(level, &canonical, &latest.schema)?
            {
                return Err(RegistryError::IncompatibleSchema(format!(
                    "new schema for subject {} is not {} compatible with version {}",
                    subject, level, latest.version
                )));
            }
        }

        let id = match carried_id {
            Some(id) => id,
            None => {
                let allocator = {
                    let state = self.master.lock().await;
                    state.allocator.clone()
                }
                .ok_or_else(|| {
                    RegistryError::UnknownMaster(
                        "register invoked without an active master session".to_string(),
                    )
                })?;
                allocator.next(self.indexes.max_id()).await?
            }
        };

        let key = RegistryKey::schema(subject, new_version);
        let value = RegistryValue::Schema(SchemaValue {
            subject: subject.to_string(),
            version: new_version,
            id,
            schema: canonical,
            deleted: false,
        });
        self.store.append(key, value).await?;

        self.metrics.registrations.inc();
        info!(subject, version = new_version, id, "registered schema");
        Ok(id)
    }

    /// Routed register: run locally on the master, forward to it otherwise.
    pub async fn register_or_forward(
        &self,
        subject: &str,
        schema: &str,
        headers: &HeaderProperties,
    ) -> RegistryResult<i32> {
        match self.route().await {
            Route::Local => self.register(subject, schema).await,
            Route::Forward(master) => {
                self.metrics.forwarded_requests.inc();
                self.forwarder
                    .register(&master, subject, schema, headers)
                    .await
            }
            Route::Unknown => Err(RegistryError::UnknownMaster(
                "register schema request failed since master is unknown".to_string(),
            )),
        }
    }

    /// Check whether a schema was ever registered under a subject; returns
    /// the registered coordinates if so.
    pub fn lookup(&self, subject: &str, schema: &str) -> RegistryResult<Option<Schema>> {
        let canonical = self.dialect.canonicalize(schema).ok_or_else(|| {
            RegistryError::InvalidSchema(format!("unparsable schema for subject {}", subject))
        })?;

        let hash = Md5::of(&canonical);
        Ok(self
            .indexes
            .dedupe_entry(&hash, subject)
            .and_then(|(id, version)| {
                version.map(|version| Schema {
                    subject: subject.to_string(),
                    version,
                    id,
                    schema: canonical.clone(),
                })
            }))
    }

    /// Routed lookup: local on the master, forwarded otherwise.
    pub async fn lookup_or_forward(
        &self,
        subject: &str,
        schema: &str,
        headers: &HeaderProperties,
    ) -> RegistryResult<Option<Schema>> {
        match self.route().await {
            Route::Local => self.lookup(subject, schema),
            Route::Forward(master) => {
                self.metrics.forwarded_requests.inc();
                self.forwarder
                    .lookup(&master, subject, schema, headers)
                    .await
            }
            Route::Unknown => Err(RegistryError::UnknownMaster(
                "schema lookup request failed since master is unknown".to_string(),
            )),
        }
    }

    /// Schema string bound to a global id, if any.
    pub fn get_by_id(&self, id: i32) -> Option<String> {
        if id < 0 {
            return None;
        }
        let key = self.indexes.schema_key_for(id)?;
        match self.store.get(&RegistryKey::Schema(key)) {
            Some(RegistryValue::Schema(value)) => Some(value.schema),
            _ => None,
        }
    }

    /// Schema registered under `(subject, version)`, with the `latest`
    /// sentinel resolving to the highest version.
    pub fn get_by_version(&self, subject: &str, version: VersionSpec) -> Option<Schema> {
        match version {
            VersionSpec::Latest => self.get_latest_version(subject),
            VersionSpec::Number(version) => {
                match self.store.get(&RegistryKey::schema(subject, version)) {
                    Some(RegistryValue::Schema(value)) => Some(value.into()),
                    _ => None,
                }
            }
        }
    }

    /// All live versions under a subject, ordered by version ascending.
    pub fn get_all_versions(&self, subject: &str) -> Vec<Schema> {
        self.store
            .get_all(
                &RegistryKey::schema(subject, MIN_VERSION),
                &RegistryKey::schema(subject, MAX_VERSION),
            )
            .into_iter()
            .filter_map(|value| match value {
                RegistryValue::Schema(value) => Some(value.into()),
                _ => None,
            })
            .collect()
    }

    /// Highest-version schema under a subject, if any.
    pub fn get_latest_version(&self, subject: &str) -> Option<Schema> {
        self.get_all_versions(subject).pop()
    }

    /// Every subject appearing in any schema key of the log.
    pub fn list_subjects(&self) -> BTreeSet<String> {
        self.store
            .get_all_keys()
            .into_iter()
            .filter_map(|key| match key {
                RegistryKey::Schema(key) => Some(key.subject),
                _ => None,
            })
            .collect()
    }

    /// Write a compatibility level for a subject (or the cluster default
    /// when `subject` is `None`). Master only; followers fail with
    /// `UnknownMaster` (config forwarding is a future extension).
    pub async fn update_compatibility(
        &self,
        subject: Option<&str>,
        level: CompatibilityLevel,
    ) -> RegistryResult<()> {
        if !self.is_master().await {
            return Err(RegistryError::UnknownMaster(
                "config update request failed since this node is not the master".to_string(),
            ));
        }

        let key = RegistryKey::config(subject);
        self.store
            .append(
                key,
                RegistryValue::Config(ConfigValue {
                    compatibility_level: level,
                }),
            )
            .await?;
        info!(subject = ?subject, level = %level, "updated compatibility level");
        Ok(())
    }

    /// Effective compatibility level: subject config, else cluster config,
    /// else the startup default.
    pub fn compatibility_level(&self, subject: Option<&str>) -> CompatibilityLevel {
        if let Some(subject) = subject {
            if let Some(RegistryValue::Config(config)) =
                self.store.get(&RegistryKey::config(Some(subject)))
            {
                return config.compatibility_level;
            }
        }
        if let Some(RegistryValue::Config(config)) = self.store.get(&RegistryKey::config(None)) {
            return config.compatibility_level;
        }
        self.config.compatibility_level
    }

    async fn route(&self) -> Route {
        let state = self.master.lock().await;
        match &state.master {
            Some(master) if *master == self.my_identity => Route::Local,
            Some(master) => Route::Forward(master.clone()),
            None => Route::Unknown,
        }
    }
}
