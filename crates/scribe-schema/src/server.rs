//! HTTP server for the Schema Registry
//!
//! The minimal Confluent-style REST surface: registration and lookup (routed
//! to the master when this node is a follower), reads from the local view,
//! and per-subject/cluster compatibility configuration. This is also the
//! surface the forwarder targets, so every node of a cluster runs it.

use crate::error::{RegistryError, RegistryResult};
use crate::forwarder::{ErrorBody, RegisterSchemaRequest, RegisterSchemaResponse};
use crate::registry::SchemaRegistry;
use crate::types::{CompatibilityLevel, Schema, VersionSpec};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Schema Registry HTTP server
pub struct SchemaServer {
    registry: Arc<SchemaRegistry>,
}

impl SchemaServer {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(render_metrics))
            // Schemas
            .route("/schemas/ids/:id", get(get_schema_by_id))
            // Subjects
            .route("/subjects", get(list_subjects))
            .route("/subjects/:subject", post(lookup_schema))
            .route("/subjects/:subject/versions", get(list_versions))
            .route("/subjects/:subject/versions", post(register_schema))
            .route("/subjects/:subject/versions/:version", get(get_version))
            // Config
            .route("/config", get(get_cluster_config))
            .route("/config", put(update_cluster_config))
            .route("/config/:subject", get(get_subject_config))
            .route("/config/:subject", put(update_subject_config))
            .with_state(Arc::clone(&self.registry))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and serve until the process exits.
    pub async fn run(self, addr: SocketAddr) -> anyhow::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("schema registry server listening on {}", addr);
        axum::serve(listener, router).await?;
        Ok(())
    }
}

type ErrorResponse = (StatusCode, Json<ErrorBody>);

fn error_response(e: RegistryError) -> ErrorResponse {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorBody {
            error_code: e.error_code(),
            message: e.to_string(),
        }),
    )
}

fn ok_or_error<T>(result: RegistryResult<T>) -> Result<Json<T>, ErrorResponse> {
    result.map(Json).map_err(error_response)
}

/// Collect the caller's opaque header properties for forwarding, dropping
/// hop-by-hop and body-framing headers.
fn forwardable_headers(headers: &HeaderMap) -> HashMap<String, String> {
    const SKIPPED: &[&str] = &[
        "host",
        "connection",
        "content-length",
        "content-type",
        "transfer-encoding",
        "accept-encoding",
    ];
    headers
        .iter()
        .filter(|(name, _)| !SKIPPED.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
}

async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    master: Option<String>,
}

async fn health_handler(State(registry): State<Arc<SchemaRegistry>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        master: registry.master_identity().await.map(|m| m.to_string()),
    })
}

async fn render_metrics(State(registry): State<Arc<SchemaRegistry>>) -> String {
    registry.metrics().render()
}

#[derive(Serialize)]
struct SchemaStringResponse {
    schema: String,
}

async fn get_schema_by_id(
    State(registry): State<Arc<SchemaRegistry>>,
    Path(id): Path<i32>,
) -> Result<Json<SchemaStringResponse>, ErrorResponse> {
    registry
        .get_by_id(id)
        .map(|schema| Json(SchemaStringResponse { schema }))
        .ok_or_else(|| error_response(RegistryError::SchemaNotFound(format!("id {}", id))))
}

async fn list_subjects(
    State(registry): State<Arc<SchemaRegistry>>,
) -> Json<Vec<String>> {
    Json(registry.list_subjects().into_iter().collect())
}

async fn list_versions(
    State(registry): State<Arc<SchemaRegistry>>,
    Path(subject): Path<String>,
) -> Result<Json<Vec<i32>>, ErrorResponse> {
    let versions: Vec<i32> = registry
        .get_all_versions(&subject)
        .into_iter()
        .map(|s| s.version)
        .collect();
    if versions.is_empty() {
        return Err(error_response(RegistryError::SubjectNotFound(subject)));
    }
    Ok(Json(versions))
}

async fn get_version(
    State(registry): State<Arc<SchemaRegistry>>,
    Path((subject, version)): Path<(String, String)>,
) -> Result<Json<Schema>, ErrorResponse> {
    let spec: VersionSpec = version.parse().map_err(error_response)?;
    registry
        .get_by_version(&subject, spec)
        .map(Json)
        .ok_or_else(|| match spec {
            VersionSpec::Latest => error_response(RegistryError::SubjectNotFound(subject)),
            VersionSpec::Number(version) => {
                error_response(RegistryError::VersionNotFound { subject, version })
            }
        })
}

async fn register_schema(
    State(registry): State<Arc<SchemaRegistry>>,
    Path(subject): Path<String>,
    headers: HeaderMap,
    Json(request): Json<RegisterSchemaRequest>,
) -> Result<Json<RegisterSchemaResponse>, ErrorResponse> {
    let forwarded = forwardable_headers(&headers);
    let id = registry
        .register_or_forward(&subject, &request.schema, &forwarded)
        .await
        .map_err(error_response)?;
    Ok(Json(RegisterSchemaResponse { id }))
}

async fn lookup_schema(
    State(registry): State<Arc<SchemaRegistry>>,
    Path(subject): Path<String>,
    headers: HeaderMap,
    Json(request): Json<RegisterSchemaRequest>,
) -> Result<Json<Schema>, ErrorResponse> {
    let forwarded = forwardable_headers(&headers);
    registry
        .lookup_or_forward(&subject, &request.schema, &forwarded)
        .await
        .map_err(error_response)?
        .map(Json)
        .ok_or_else(|| {
            error_response(RegistryError::SchemaNotFound(format!(
                "no version of the given schema registered under subject {}",
                subject
            )))
        })
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfigResponse {
    #[serde(rename = "compatibilityLevel")]
    compatibility_level: CompatibilityLevel,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfigUpdateRequest {
    compatibility: String,
}

async fn get_cluster_config(
    State(registry): State<Arc<SchemaRegistry>>,
) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        compatibility_level: registry.compatibility_level(None),
    })
}

async fn get_subject_config(
    State(registry): State<Arc<SchemaRegistry>>,
    Path(subject): Path<String>,
) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        compatibility_level: registry.compatibility_level(Some(&subject)),
    })
}

async fn update_cluster_config(
    State(registry): State<Arc<SchemaRegistry>>,
    Json(request): Json<ConfigUpdateRequest>,
) -> Result<Json<ConfigResponse>, ErrorResponse> {
    let level: CompatibilityLevel = request.compatibility.parse().map_err(error_response)?;
    ok_or_error(
        registry
            .update_compatibility(None, level)
            .await
            .map(|()| ConfigResponse {
                compatibility_level: level,
            }),
    )
}

async fn update_subject_config(
    State(registry): State<Arc<SchemaRegistry>>,
    Path(subject): Path<String>,
    Json(request): Json<ConfigUpdateRequest>,
) -> Result<Json<ConfigResponse>, ErrorResponse> {
    let level: CompatibilityLevel = request.compatibility.parse().map_err(error_response)?;
    ok_or_error(
        registry
            .update_compatibility(Some(&subject), level)
            .await
            .map(|()| ConfigResponse {
                compatibility_level: level,
            }),
    )
}
