//! # Scribe Schema Registry
//!
//! A highly-available, replicated schema registry: globally unique integer
//! ids for schemas, named subjects with monotonic per-subject versioning, and
//! a configurable compatibility policy between successive versions.
//!
//! ## Architecture
//!
//! The registry is a replicated state machine over two external services,
//! both abstracted behind capability traits: a partitioned, append-only log
//! ([`LogClient`]) and a coordination service ([`Coordinator`]).
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Schema Registry                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │  REST API                                                     │
//! │  ├── POST /subjects/{subject}/versions  (register-or-forward) │
//! │  ├── POST /subjects/{subject}           (lookup-or-forward)   │
//! │  ├── GET  /schemas/ids/{id}                                   │
//! │  ├── GET  /subjects[/{subject}/versions[/{version}]]          │
//! │  └── GET|PUT /config[/{subject}]                              │
//! ├───────────────────────────────────────────────────────────────┤
//! │  Registry                                                     │
//! │  ├── registration: canonicalize → dedupe → gate → assign      │
//! │  ├── routing: master executes, followers forward              │
//! │  └── derived indexes (id → key, md5 → id, max id)             │
//! ├───────────────────────────────────────────────────────────────┤
//! │  MasterElector ──── Coordinator (ephemeral membership)        │
//! │  IdAllocator ────── Coordinator (batched CAS counter)         │
//! │  LogBackedStore ─── LogClient   (tail, apply, readback)       │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All state mutations flow through the single-partition log: the topic's
//! offset order is the sole serialization order, every node tails it into an
//! in-memory materialized view, and only the elected master appends. The
//! master's writes use producer-with-readback, so a completed registration
//! is immediately visible to reads on that node.
//!
//! Schema ids are allocated in batches of 20 reserved against the
//! coordinator with version-guarded writes; batches are reconciled against
//! the largest id already in the log, so failovers never reuse ids.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use scribe_schema::{MemoryCoordinator, MemoryLog, SchemaRegistry, SchemaRegistryConfig};
//! use std::sync::Arc;
//!
//! let config = SchemaRegistryConfig::new("schema-registry");
//! let registry = SchemaRegistry::new(
//!     config,
//!     Arc::new(MemoryLog::new()),
//!     Arc::new(MemoryCoordinator::new()),
//! )?;
//! registry.init().await?;
//!
//! let id = registry.register("user-value", r#""string""#).await?;
//! let latest = registry.get_by_version("user-value", scribe_schema::VersionSpec::Latest);
//! ```
//!
//! The format-specific parts (parsing, canonicalization, compatibility)
//! live behind [`SchemaDialect`]; the shipped dialect is Avro.

pub mod config;
pub mod coordinator;
pub mod dialect;
pub mod elector;
pub mod error;
pub mod fingerprint;
pub mod forwarder;
pub mod id_allocator;
pub mod log;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use config::{LogStoreOptions, MetricsOptions, SchemaRegistryConfig};
pub use coordinator::{Coordinator, GroupMember, MemoryCoordinator, Membership};
pub use dialect::{AvroDialect, SchemaDialect};
pub use elector::MasterElector;
pub use error::{error_codes, RegistryError, RegistryResult};
pub use fingerprint::Md5;
pub use forwarder::{Forwarder, HeaderProperties, RegisterSchemaRequest, RegisterSchemaResponse};
pub use id_allocator::{IdAllocator, ID_BATCH_SIZE};
pub use log::{LogClient, LogRecord, MemoryLog};
pub use metrics::RegistryMetrics;
pub use registry::{RegistryIndexes, SchemaRegistry};
pub use server::SchemaServer;
pub use store::{ApplyListener, JsonSerializer, LogBackedStore, WireSerializer};
pub use types::{
    CompatibilityLevel, ConfigValue, NodeIdentity, RegistryKey, RegistryValue, Schema,
    SchemaIdAndSubjects, SchemaKey, SchemaValue, VersionSpec, MAX_VERSION, MIN_VERSION,
};
