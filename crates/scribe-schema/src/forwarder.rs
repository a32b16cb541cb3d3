//! Request forwarding to the current master
//!
//! Followers never write to the log. A mutating request that lands on a
//! follower is serialized to JSON and POSTed to the master's REST surface,
//! carrying the caller's opaque header properties (auth and the like)
//! verbatim. Upstream status codes are mapped back to their semantic error so
//! the caller observes identical behavior on any node.

use crate::error::{RegistryError, RegistryResult};
use crate::types::{NodeIdentity, Schema};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Body of `POST /subjects/{subject}/versions` and `POST /subjects/{subject}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSchemaRequest {
    pub schema: String,
}

/// Body of a successful register response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSchemaResponse {
    pub id: i32,
}

/// Error body rendered by the REST surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error_code: u32,
    pub message: String,
}

/// Opaque header properties forwarded with a request
pub type HeaderProperties = HashMap<String, String>;

/// HTTP forwarder for mutating requests
#[derive(Debug, Clone, Default)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward a register request to the master; returns the assigned id.
    pub async fn register(
        &self,
        master: &NodeIdentity,
        subject: &str,
        schema: &str,
        headers: &HeaderProperties,
    ) -> RegistryResult<i32> {
        let url = format!("{}/subjects/{}/versions", master.base_url(), subject);
        debug!(%url, subject, "forwarding register request to master");

        let response = self
            .post(&url, schema, headers)
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            let body: RegisterSchemaResponse = response
                .json()
                .await
                .map_err(|e| transport_error(&url, e))?;
            Ok(body.id)
        } else {
            Err(upstream_error(status, &body_text(response).await))
        }
    }

    /// Forward a subject-version lookup to the master. A 404 means the
    /// schema was never registered under the subject.
    pub async fn lookup(
        &self,
        master: &NodeIdentity,
        subject: &str,
        schema: &str,
        headers: &HeaderProperties,
    ) -> RegistryResult<Option<Schema>> {
        let url = format!("{}/subjects/{}", master.base_url(), subject);
        debug!(%url, subject, "forwarding lookup request to master");

        let response = self
            .post(&url, schema, headers)
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            let body: Schema = response.json().await.map_err(|e| transport_error(&url, e))?;
            Ok(Some(body))
        } else if status == 404 {
            Ok(None)
        } else {
            Err(upstream_error(status, &body_text(response).await))
        }
    }

    async fn post(
        &self,
        url: &str,
        schema: &str,
        headers: &HeaderProperties,
    ) -> reqwest::Result<reqwest::Response> {
        let mut request = self.client.post(url).json(&RegisterSchemaRequest {
            schema: schema.to_string(),
        });
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request.send().await
    }
}

fn transport_error(url: &str, e: impl std::fmt::Display) -> RegistryError {
    RegistryError::Forwarding {
        status: None,
        message: format!("error while forwarding request to {}: {}", url, e),
    }
}

async fn body_text(response: reqwest::Response) -> String {
    response.text().await.unwrap_or_default()
}

/// Map an upstream HTTP status back to the matching error kind.
fn upstream_error(status: u16, body: &str) -> RegistryError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.to_string());

    match status {
        409 => RegistryError::IncompatibleSchema(message),
        422 => RegistryError::InvalidSchema(message),
        _ => RegistryError::Forwarding {
            status: Some(status),
            message,
        },
    }
}
