//! Core types: log keys and values, compatibility levels, node identity
//!
//! The key and value types double as the wire format of the schema topic.
//! Both are tagged sums (`keytype` / `valuetype` discriminators in JSON) so
//! new variants can be added without breaking existing consumers of the
//! topic. Keys carry a total order: `Noop < Config < Schema`, with schema
//! keys ordered by `(subject, version)`, the order the store's range scans
//! rely on.

use crate::error::{RegistryError, RegistryResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Schema versions under a subject are indexed from `MIN_VERSION`.
pub const MIN_VERSION: i32 = 1;
pub const MAX_VERSION: i32 = i32::MAX;

/// Key of a schema version record: `(subject, version)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaKey {
    pub subject: String,
    pub version: i32,
}

impl SchemaKey {
    pub fn new(subject: impl Into<String>, version: i32) -> Self {
        Self {
            subject: subject.into(),
            version,
        }
    }
}

/// Key of a record on the schema topic
///
/// The derived `Ord` gives `Noop < Config < Schema`; schema keys sort by
/// `(subject asc, version asc)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "keytype")]
pub enum RegistryKey {
    /// Liveness probe record; never materialized, carries an empty value.
    #[serde(rename = "NOOP")]
    Noop,

    /// Compatibility configuration; an absent subject is the cluster default.
    #[serde(rename = "CONFIG")]
    Config { subject: Option<String> },

    /// A schema version under a subject.
    #[serde(rename = "SCHEMA")]
    Schema(SchemaKey),
}

impl RegistryKey {
    pub fn schema(subject: impl Into<String>, version: i32) -> Self {
        RegistryKey::Schema(SchemaKey::new(subject, version))
    }

    pub fn config(subject: Option<&str>) -> Self {
        RegistryKey::Config {
            subject: subject.map(|s| s.to_string()),
        }
    }
}

/// Value of a schema version record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaValue {
    pub subject: String,
    pub version: i32,
    pub id: i32,
    pub schema: String,
    /// Carried on the wire for consumers of the topic; this core never
    /// deletes schemas, so it is always `false` here.
    #[serde(default)]
    pub deleted: bool,
}

/// Value of a compatibility configuration record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigValue {
    #[serde(rename = "compatibilityLevel")]
    pub compatibility_level: CompatibilityLevel,
}

/// Value of a record on the schema topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "valuetype")]
pub enum RegistryValue {
    #[serde(rename = "SCHEMA")]
    Schema(SchemaValue),
    #[serde(rename = "CONFIG")]
    Config(ConfigValue),
}

/// Compatibility policy between successive schema versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompatibilityLevel {
    /// No compatibility checking
    None,
    /// New schema can read data written by the latest schema (default)
    #[default]
    Backward,
    /// The latest schema can read data written by the new schema
    Forward,
    /// Both backward and forward compatible
    Full,
}

impl std::fmt::Display for CompatibilityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompatibilityLevel::None => write!(f, "NONE"),
            CompatibilityLevel::Backward => write!(f, "BACKWARD"),
            CompatibilityLevel::Forward => write!(f, "FORWARD"),
            CompatibilityLevel::Full => write!(f, "FULL"),
        }
    }
}

impl std::str::FromStr for CompatibilityLevel {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NONE" => Ok(CompatibilityLevel::None),
            "BACKWARD" => Ok(CompatibilityLevel::Backward),
            "FORWARD" => Ok(CompatibilityLevel::Forward),
            "FULL" => Ok(CompatibilityLevel::Full),
            _ => Err(RegistryError::InvalidInput(format!(
                "invalid compatibility level: {}",
                s
            ))),
        }
    }
}

/// A registered schema as served to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub subject: String,
    pub version: i32,
    pub id: i32,
    pub schema: String,
}

impl From<SchemaValue> for Schema {
    fn from(v: SchemaValue) -> Self {
        Schema {
            subject: v.subject,
            version: v.version,
            id: v.id,
            schema: v.schema,
        }
    }
}

/// Identity of a registry node, registered with the coordinator for election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_eligibility")]
    pub master_eligibility: bool,
}

fn default_eligibility() -> bool {
    true
}

impl NodeIdentity {
    pub fn new(host: impl Into<String>, port: u16, master_eligibility: bool) -> Self {
        Self {
            host: host.into(),
            port,
            master_eligibility,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The id bound to a schema content, plus every subject/version it appears
/// under. One entry per distinct canonical schema string.
#[derive(Debug, Clone)]
pub struct SchemaIdAndSubjects {
    pub id: i32,
    version_by_subject: HashMap<String, i32>,
}

impl SchemaIdAndSubjects {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            version_by_subject: HashMap::new(),
        }
    }

    pub fn record(&mut self, subject: &str, version: i32) {
        self.version_by_subject.insert(subject.to_string(), version);
    }

    pub fn has_subject(&self, subject: &str) -> bool {
        self.version_by_subject.contains_key(subject)
    }

    pub fn version_for(&self, subject: &str) -> Option<i32> {
        self.version_by_subject.get(subject).copied()
    }
}

/// A requested version: a number in `[1, i32::MAX]` or the `latest` sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSpec {
    Latest,
    Number(i32),
}

impl std::str::FromStr for VersionSpec {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(VersionSpec::Latest);
        }
        match s.parse::<i32>() {
            Ok(v) if v >= MIN_VERSION => Ok(VersionSpec::Number(v)),
            _ => Err(RegistryError::InvalidInput(format!(
                "version must be 'latest' or an integer in [{}, {}]: {}",
                MIN_VERSION, MAX_VERSION, s
            ))),
        }
    }
}

pub fn parse_identity(raw: &str) -> RegistryResult<NodeIdentity> {
    serde_json::from_str(raw)
        .map_err(|e| RegistryError::Store(format!("invalid node identity payload: {}", e)))
}
