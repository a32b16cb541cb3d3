//! Integration tests for scribe-schema
//!
//! Multi-node clusters are simulated in one process by sharing a single
//! in-memory log (the replicated topic) and a single in-memory coordinator
//! across registry instances.

use scribe_schema::{
    CompatibilityLevel, Coordinator, HeaderProperties, LogClient, MemoryCoordinator, MemoryLog,
    NodeIdentity, RegistryError, SchemaRegistry, SchemaRegistryConfig, SchemaServer, VersionSpec,
    ID_BATCH_SIZE,
};
use std::sync::Arc;
use std::time::Duration;

const CLUSTER: &str = "it";

async fn start_node(
    log: &Arc<MemoryLog>,
    coordinator: &Arc<MemoryCoordinator>,
    port: u16,
    eligible: bool,
) -> Arc<SchemaRegistry> {
    let config = SchemaRegistryConfig::new(CLUSTER)
        .with_identity("127.0.0.1", port)
        .with_master_eligibility(eligible);
    let registry = SchemaRegistry::new(
        config,
        Arc::clone(log) as Arc<dyn LogClient>,
        Arc::clone(coordinator) as Arc<dyn Coordinator>,
    )
    .unwrap();
    registry.init().await.unwrap();
    registry
}

async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn wait_for_master(registry: &Arc<SchemaRegistry>) {
    for _ in 0..200 {
        if registry.is_master().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("node did not become master in time");
}

fn record_schema(name: &str) -> String {
    format!(r#"{{"type":"record","name":"{}","fields":[]}}"#, name)
}

fn no_headers() -> HeaderProperties {
    HeaderProperties::new()
}

async fn counter_value(coordinator: &MemoryCoordinator) -> String {
    coordinator
        .read(&format!("/{}/schema_id_counter", CLUSTER))
        .await
        .unwrap()
        .expect("schema id counter node")
        .0
}

/// Fresh single-node cluster; registration is idempotent and versions
/// start at 1.
#[tokio::test]
async fn test_fresh_cluster_first_registration() {
    let log = Arc::new(MemoryLog::new());
    let coordinator = Arc::new(MemoryCoordinator::new());
    let node = start_node(&log, &coordinator, 8101, true).await;

    let id = node.register("customers", r#""string""#).await.unwrap();
    assert_eq!(id, 0);
    let again = node.register("customers", r#""string""#).await.unwrap();
    assert_eq!(again, 0);

    let versions: Vec<i32> = node
        .get_all_versions("customers")
        .into_iter()
        .map(|s| s.version)
        .collect();
    assert_eq!(versions, vec![1]);

    node.close().await;
}

/// The default BACKWARD level gates an incompatible successor.
#[tokio::test]
async fn test_backward_compatibility_gating() {
    let log = Arc::new(MemoryLog::new());
    let coordinator = Arc::new(MemoryCoordinator::new());
    let node = start_node(&log, &coordinator, 8101, true).await;

    let id = node
        .register(
            "users",
            r#"{"type":"record","name":"U","fields":[{"name":"a","type":"int"}]}"#,
        )
        .await
        .unwrap();
    assert_eq!(id, 0);
    assert_eq!(
        node.get_by_version("users", VersionSpec::Latest).unwrap().version,
        1
    );

    let err = node
        .register(
            "users",
            r#"{"type":"record","name":"U","fields":[{"name":"a","type":"string"}]}"#,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::IncompatibleSchema(_)));

    node.close().await;
}

/// The same canonical content carries one id across subjects.
#[tokio::test]
async fn test_cross_subject_id_reuse() {
    let log = Arc::new(MemoryLog::new());
    let coordinator = Arc::new(MemoryCoordinator::new());
    let node = start_node(&log, &coordinator, 8101, true).await;

    assert_eq!(node.register("a", r#""string""#).await.unwrap(), 0);
    assert_eq!(node.register("b", r#""string""#).await.unwrap(), 0);

    let under_b = node.get_by_version("b", VersionSpec::Number(1)).unwrap();
    assert_eq!(under_b.version, 1);
    assert_eq!(under_b.id, 0);

    assert_eq!(node.get_by_id(0).unwrap(), r#""string""#);

    node.close().await;
}

/// The 21st distinct schema crosses the batch boundary; the counter node
/// transitions 20 -> 40.
#[tokio::test]
async fn test_id_batch_boundary() {
    let log = Arc::new(MemoryLog::new());
    let coordinator = Arc::new(MemoryCoordinator::new());
    let node = start_node(&log, &coordinator, 8101, true).await;

    let mut ids = Vec::new();
    for i in 0..ID_BATCH_SIZE {
        let id = node
            .register(&format!("s{}", i), &record_schema(&format!("R{}", i)))
            .await
            .unwrap();
        ids.push(id);
    }
    assert_eq!(ids, (0..ID_BATCH_SIZE).collect::<Vec<i32>>());
    assert_eq!(counter_value(&coordinator).await, "20");

    let id = node
        .register("s20", &record_schema("R20"))
        .await
        .unwrap();
    assert_eq!(id, ID_BATCH_SIZE);
    assert_eq!(counter_value(&coordinator).await, "40");

    node.close().await;
}

/// After failover the new master issues strictly greater, batch-aligned
/// ids.
#[tokio::test]
async fn test_master_failover_id_monotonicity() {
    let log = Arc::new(MemoryLog::new());
    let coordinator = Arc::new(MemoryCoordinator::new());
    let a = start_node(&log, &coordinator, 8101, true).await;
    let b = start_node(&log, &coordinator, 8102, true).await;

    assert!(a.is_master().await);
    assert!(!b.is_master().await);

    let mut issued = Vec::new();
    for i in 0..5 {
        let id = a
            .register(&format!("x{}", i), &record_schema(&format!("X{}", i)))
            .await
            .unwrap();
        issued.push(id);
    }
    assert_eq!(issued, vec![0, 1, 2, 3, 4]);

    // Kill A; B must take over.
    a.close().await;
    wait_for_master(&b).await;

    let id = b.register("x", r#""bytes""#).await.unwrap();
    assert_eq!(id, ID_BATCH_SIZE, "first id of the new master session");
    assert!(issued.iter().all(|&old| id > old));
    assert_eq!(id % ID_BATCH_SIZE, 0);
    assert_eq!(counter_value(&coordinator).await, "40");

    b.close().await;
}

/// A follower forwards registration to the master over HTTP and the
/// caller observes the master's result.
#[tokio::test]
async fn test_follower_forwards_to_master() {
    let log = Arc::new(MemoryLog::new());
    let coordinator = Arc::new(MemoryCoordinator::new());

    // Master's REST surface on an ephemeral port; its advertised identity
    // must match the bound address.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let a = start_node(&log, &coordinator, port, true).await;
    let router = SchemaServer::new(Arc::clone(&a)).router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let b = start_node(&log, &coordinator, 8199, true).await;
    assert!(!b.is_master().await);
    assert_eq!(
        b.master_identity().await.unwrap(),
        NodeIdentity::new("127.0.0.1", port, true)
    );

    let id = b
        .register_or_forward("fwd", r#""string""#, &no_headers())
        .await
        .unwrap();
    assert_eq!(id, 0);

    // The write replicates to the follower through the log.
    let b_view = Arc::clone(&b);
    wait_until(move || b_view.get_by_id(0).is_some(), "follower to apply the write").await;
    assert_eq!(b.get_by_id(0).unwrap(), r#""string""#);

    // Forwarded lookup agrees with the master.
    let found = b
        .lookup_or_forward("fwd", r#""string""#, &no_headers())
        .await
        .unwrap()
        .unwrap();
    assert_eq!((found.id, found.version), (0, 1));

    a.close().await;
    b.close().await;
}

/// A dead master connection surfaces as a forwarding error and leaves no
/// partial state; no log append happens anywhere.
#[tokio::test]
async fn test_forwarding_failure_leaves_no_state() {
    let log = Arc::new(MemoryLog::new());
    let coordinator = Arc::new(MemoryCoordinator::new());
    let node = start_node(&log, &coordinator, 8101, false).await;

    // Point the node at a master nobody is running.
    node.set_master(Some(NodeIdentity::new("127.0.0.1", 1, true)))
        .await
        .unwrap();

    let appended_before = log.len();
    let err = node
        .register_or_forward("fwd", r#""string""#, &no_headers())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Forwarding { status: None, .. }));

    assert_eq!(log.len(), appended_before);
    assert!(node.list_subjects().is_empty());

    node.close().await;
}

/// Version sets are contiguous ranges starting at 1.
#[tokio::test]
async fn test_versions_are_contiguous() {
    let log = Arc::new(MemoryLog::new());
    let coordinator = Arc::new(MemoryCoordinator::new());
    let node = start_node(&log, &coordinator, 8101, true).await;

    node.update_compatibility(Some("evolve"), CompatibilityLevel::None)
        .await
        .unwrap();

    for i in 0..4 {
        node.register("evolve", &record_schema(&format!("E{}", i)))
            .await
            .unwrap();
    }

    let versions: Vec<i32> = node
        .get_all_versions("evolve")
        .into_iter()
        .map(|s| s.version)
        .collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);

    node.close().await;
}

/// Read-your-writes on the master and subject listing from the log.
#[tokio::test]
async fn test_read_your_writes_and_subject_listing() {
    let log = Arc::new(MemoryLog::new());
    let coordinator = Arc::new(MemoryCoordinator::new());
    let node = start_node(&log, &coordinator, 8101, true).await;

    node.register("beta", r#""string""#).await.unwrap();
    node.register("alpha", r#""int""#).await.unwrap();

    // Immediately after register returns, the latest version is visible.
    let latest = node.get_by_version("alpha", VersionSpec::Latest).unwrap();
    assert_eq!(latest.schema, r#""int""#);

    let subjects: Vec<String> = node.list_subjects().into_iter().collect();
    assert_eq!(subjects, vec!["alpha".to_string(), "beta".to_string()]);

    node.close().await;
}

/// A restart from the full log rebuilds identical derived state.
#[tokio::test]
async fn test_restart_rebuilds_indexes() {
    let log = Arc::new(MemoryLog::new());
    let coordinator = Arc::new(MemoryCoordinator::new());

    {
        let node = start_node(&log, &coordinator, 8101, true).await;
        node.register("customers", r#""string""#).await.unwrap();
        node.register(
            "users",
            r#"{"type":"record","name":"U","fields":[{"name":"a","type":"int"}]}"#,
        )
        .await
        .unwrap();
        // Same content as customers: id is shared, no new id allocated.
        node.register("orders", r#""string""#).await.unwrap();
        node.update_compatibility(None, CompatibilityLevel::Full)
            .await
            .unwrap();
        node.close().await;
    }

    let node = start_node(&log, &coordinator, 8102, true).await;

    assert_eq!(node.get_by_id(0).unwrap(), r#""string""#);
    assert!(node.get_by_id(1).unwrap().contains(r#""name":"U""#));

    let subjects: Vec<String> = node.list_subjects().into_iter().collect();
    assert_eq!(subjects, vec!["customers", "orders", "users"]);

    // Rebuilt dedupe index: same content is an idempotent no-op.
    assert_eq!(node.register("customers", r#""string""#).await.unwrap(), 0);
    assert_eq!(node.get_all_versions("customers").len(), 1);

    // Rebuilt config: the cluster-level record survives restarts.
    assert_eq!(node.compatibility_level(None), CompatibilityLevel::Full);

    // Rebuilt max id: fresh ids clear everything already in the log.
    let id = node.register("fresh", &record_schema("F")).await.unwrap();
    assert_eq!(id, ID_BATCH_SIZE);

    node.close().await;
}

/// Config updates are master-only; a follower reports UnknownMaster rather
/// than forwarding.
#[tokio::test]
async fn test_follower_config_update_fails() {
    let log = Arc::new(MemoryLog::new());
    let coordinator = Arc::new(MemoryCoordinator::new());
    let a = start_node(&log, &coordinator, 8101, true).await;
    let b = start_node(&log, &coordinator, 8102, true).await;

    assert!(a.is_master().await);
    let err = b
        .update_compatibility(None, CompatibilityLevel::Full)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::UnknownMaster(_)));

    a.close().await;
    b.close().await;
}

/// Followers converge on the master's writes through the log.
#[tokio::test]
async fn test_follower_eventually_sees_master_writes() {
    let log = Arc::new(MemoryLog::new());
    let coordinator = Arc::new(MemoryCoordinator::new());
    let a = start_node(&log, &coordinator, 8101, true).await;
    let b = start_node(&log, &coordinator, 8102, true).await;

    a.register("customers", r#""string""#).await.unwrap();

    let b_view = Arc::clone(&b);
    wait_until(
        move || b_view.get_by_version("customers", VersionSpec::Latest).is_some(),
        "follower to apply the master's write",
    )
    .await;

    let replicated = b.get_by_version("customers", VersionSpec::Latest).unwrap();
    assert_eq!((replicated.id, replicated.version), (0, 1));

    a.close().await;
    b.close().await;
}

/// End-to-end over HTTP: register through the REST surface, read back, and
/// check the error body shape.
#[tokio::test]
async fn test_rest_surface_round_trip() {
    let log = Arc::new(MemoryLog::new());
    let coordinator = Arc::new(MemoryCoordinator::new());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let node = start_node(&log, &coordinator, port, true).await;
    let router = SchemaServer::new(Arc::clone(&node)).router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/subjects/customers/versions", base))
        .json(&serde_json::json!({ "schema": r#""string""# }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["id"], 0);

    let response = client
        .get(format!("{}/subjects/customers/versions/latest", base))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["version"], 1);
    assert_eq!(body["schema"], r#""string""#);

    let response = client
        .get(format!("{}/schemas/ids/0", base))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["schema"], r#""string""#);

    // Unknown id renders the Confluent-style error body.
    let response = client
        .get(format!("{}/schemas/ids/42", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], 40403);

    // Config round trip.
    let response = client
        .put(format!("{}/config", base))
        .json(&serde_json::json!({ "compatibility": "FULL" }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let response = client
        .get(format!("{}/config", base))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["compatibilityLevel"], "FULL");

    node.close().await;
}
