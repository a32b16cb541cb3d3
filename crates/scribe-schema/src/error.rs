//! Schema Registry errors

use std::time::Duration;
use thiserror::Error;

/// Confluent-compatible error codes
pub mod error_codes {
    // Subject/schema not found
    pub const SUBJECT_NOT_FOUND: u32 = 40401;
    pub const VERSION_NOT_FOUND: u32 = 40402;
    pub const SCHEMA_NOT_FOUND: u32 = 40403;

    // Invalid schema/input
    pub const INVALID_SCHEMA: u32 = 42201;
    pub const INVALID_VERSION: u32 = 42202;
    pub const INCOMPATIBLE_SCHEMA: u32 = 409;

    // Internal errors
    pub const INITIALIZATION_ERROR: u32 = 50000;
    pub const STORE_ERROR: u32 = 50001;
    pub const OPERATION_TIMEOUT: u32 = 50002;
    pub const FORWARDING_ERROR: u32 = 50003;
    pub const UNKNOWN_MASTER: u32 = 50004;
}

/// Schema Registry error types
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("incompatible schema: {0}")]
    IncompatibleSchema(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("bootstrap did not reach the end of the log within {0:?}")]
    BootstrapTimeout(Duration),

    #[error("write was not applied by the local tailer within {0:?}")]
    WriteTimeout(Duration),

    #[error("unknown master: {0}")]
    UnknownMaster(String),

    #[error("forwarding to master failed (upstream status {status:?}): {message}")]
    Forwarding {
        status: Option<u16>,
        message: String,
    },

    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("subject not found: {0}")]
    SubjectNotFound(String),

    #[error("version {version} not found under subject {subject}")]
    VersionNotFound { subject: String, version: i32 },

    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl RegistryError {
    /// Get the Confluent-compatible error code
    pub fn error_code(&self) -> u32 {
        match self {
            RegistryError::InvalidSchema(_) => error_codes::INVALID_SCHEMA,
            RegistryError::IncompatibleSchema(_) => error_codes::INCOMPATIBLE_SCHEMA,
            RegistryError::Store(_) => error_codes::STORE_ERROR,
            RegistryError::BootstrapTimeout(_) | RegistryError::WriteTimeout(_) => {
                error_codes::OPERATION_TIMEOUT
            }
            RegistryError::UnknownMaster(_) => error_codes::UNKNOWN_MASTER,
            RegistryError::Forwarding { .. } => error_codes::FORWARDING_ERROR,
            RegistryError::Initialization(_) => error_codes::INITIALIZATION_ERROR,
            RegistryError::SubjectNotFound(_) => error_codes::SUBJECT_NOT_FOUND,
            RegistryError::VersionNotFound { .. } => error_codes::VERSION_NOT_FOUND,
            RegistryError::SchemaNotFound(_) => error_codes::SCHEMA_NOT_FOUND,
            RegistryError::InvalidInput(_) => error_codes::INVALID_VERSION,
        }
    }

    /// Get the HTTP status code
    pub fn http_status(&self) -> u16 {
        match self {
            RegistryError::SubjectNotFound(_)
            | RegistryError::VersionNotFound { .. }
            | RegistryError::SchemaNotFound(_) => 404,
            RegistryError::InvalidSchema(_) | RegistryError::InvalidInput(_) => 422,
            RegistryError::IncompatibleSchema(_) => 409,
            RegistryError::UnknownMaster(_) => 503,
            RegistryError::Forwarding { .. } => 502,
            RegistryError::Store(_)
            | RegistryError::BootstrapTimeout(_)
            | RegistryError::WriteTimeout(_)
            | RegistryError::Initialization(_) => 500,
        }
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::Store(format!("serialization error: {}", e))
    }
}
