//! Scribe Schema Registry server and CLI
//!
//! ```bash
//! # Start a single-node registry (in-process log and coordinator)
//! scribe-schema serve --port 8081 --cluster-name schema-registry
//!
//! # Talk to a running registry
//! scribe-schema register --subject users-value --file user.avsc
//! scribe-schema get --id 0
//! scribe-schema subjects
//! scribe-schema health
//! ```

use clap::{Parser, Subcommand};
use scribe_schema::{
    CompatibilityLevel, MemoryCoordinator, MemoryLog, SchemaRegistry, SchemaRegistryConfig,
    SchemaServer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "scribe-schema")]
#[command(
    author,
    version,
    about = "Scribe Schema Registry - replicated, log-backed schema management"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a registry node
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8081")]
        port: u16,

        /// Host to bind and advertise
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Cluster name (coordinator namespace)
        #[arg(long, default_value = "schema-registry")]
        cluster_name: String,

        /// Default compatibility level
        #[arg(long, default_value = "BACKWARD")]
        compatibility: String,

        /// Whether this node may win master election
        #[arg(long, default_value = "true")]
        master_eligibility: bool,
    },

    /// Check server health
    Health {
        /// Schema registry URL
        #[arg(long, default_value = "http://localhost:8081")]
        url: String,
    },

    /// Register a schema
    Register {
        /// Schema registry URL
        #[arg(long, default_value = "http://localhost:8081")]
        url: String,

        /// Subject name
        #[arg(short, long)]
        subject: String,

        /// Schema file path
        #[arg(short = 'f', long)]
        file: String,
    },

    /// Get a schema by id
    Get {
        /// Schema registry URL
        #[arg(long, default_value = "http://localhost:8081")]
        url: String,

        /// Schema id
        #[arg(short, long)]
        id: i32,
    },

    /// List subjects
    Subjects {
        /// Schema registry URL
        #[arg(long, default_value = "http://localhost:8081")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve {
            port,
            host,
            cluster_name,
            compatibility,
            master_eligibility,
        } => serve(port, host, cluster_name, compatibility, master_eligibility).await,
        Commands::Health { url } => health_check(&url).await,
        Commands::Register { url, subject, file } => register_schema(&url, &subject, &file).await,
        Commands::Get { url, id } => get_schema(&url, id).await,
        Commands::Subjects { url } => list_subjects(&url).await,
    }
}

async fn serve(
    port: u16,
    host: String,
    cluster_name: String,
    compatibility: String,
    master_eligibility: bool,
) -> anyhow::Result<()> {
    let level: CompatibilityLevel = compatibility
        .parse()
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    let config = SchemaRegistryConfig::new(cluster_name)
        .with_identity(host.clone(), port)
        .with_master_eligibility(master_eligibility)
        .with_compatibility(level);

    info!(
        host,
        port,
        compatibility = %level,
        "starting scribe schema registry (single-node mode)"
    );

    // Single-node mode runs against the in-process log and coordinator.
    let log = Arc::new(MemoryLog::new());
    let coordinator = Arc::new(MemoryCoordinator::new());
    let registry = SchemaRegistry::new(config, log, coordinator)?;
    registry.init().await?;

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let server = SchemaServer::new(registry);

    info!("API endpoints:");
    info!("  POST /subjects/{{subject}}/versions - register schema");
    info!("  GET  /schemas/ids/{{id}} - get schema by id");
    info!("  GET  /subjects - list subjects");
    info!("  GET  /subjects/{{subject}}/versions/{{version}} - get schema version");
    info!("  GET|PUT /config[/{{subject}}] - compatibility configuration");

    server.run(addr).await
}

async fn health_check(url: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let response = client.get(format!("{}/health", url)).send().await?;

    if response.status().is_success() {
        let body: serde_json::Value = response.json().await?;
        println!("Schema registry is healthy");
        if let Some(master) = body.get("master").and_then(|m| m.as_str()) {
            println!("  master: {}", master);
        }
        Ok(())
    } else {
        anyhow::bail!("health check failed: {}", response.status())
    }
}

async fn register_schema(url: &str, subject: &str, file: &str) -> anyhow::Result<()> {
    let schema = std::fs::read_to_string(file)?;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/subjects/{}/versions", url, subject))
        .json(&serde_json::json!({ "schema": schema }))
        .send()
        .await?;

    if response.status().is_success() {
        let body: serde_json::Value = response.json().await?;
        let id = body.get("id").and_then(|v| v.as_i64()).unwrap_or(-1);
        println!("Registered schema under subject {} with id {}", subject, id);
        Ok(())
    } else {
        let error: serde_json::Value = response.json().await?;
        anyhow::bail!(
            "failed to register schema: {}",
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
        )
    }
}

async fn get_schema(url: &str, id: i32) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/schemas/ids/{}", url, id))
        .send()
        .await?;

    if response.status().is_success() {
        let body: serde_json::Value = response.json().await?;
        println!("{}", serde_json::to_string_pretty(&body)?);
        Ok(())
    } else {
        anyhow::bail!("schema {} not found", id)
    }
}

async fn list_subjects(url: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let response = client.get(format!("{}/subjects", url)).send().await?;

    if response.status().is_success() {
        let subjects: Vec<String> = response.json().await?;
        println!("Subjects ({}):", subjects.len());
        for subject in subjects {
            println!("  - {}", subject);
        }
        Ok(())
    } else {
        anyhow::bail!("failed to list subjects")
    }
}
