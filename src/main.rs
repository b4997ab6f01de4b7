//! Migration Operator
//!
//! A Kubernetes operator that migrates application workloads (volumes and
//! resource manifests) from this cluster to a paired destination cluster.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Migration Operator                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Reconciler  │───▶│   Volume     │───▶│   Resource   │       │
//! │  │ (state machine)│  │   Driver     │    │   Pipeline   │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::wait::{await_condition, conditions};
use kube::{Client, CustomResourceExt};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod adapters;
mod controller;
mod crd;
mod domain;
mod error;
mod migrator;
mod unstructured;

use crate::adapters::{KubeClusterPairRegistry, NoopRuleExecutor, ResourceOnlyDriver};
use crate::controller::ControllerContext;
use crate::crd::{ClusterPair, Migration};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Migration Operator - cross-cluster workload migration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace whose Migrations may span arbitrary namespaces
    #[arg(long, env = "ADMIN_NAMESPACE", default_value = "kube-system")]
    admin_namespace: String,

    /// Resync period in seconds for long-running stages
    #[arg(long, env = "RESYNC_SECONDS", default_value = "30")]
    resync_seconds: u64,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the CRD manifests as YAML and exit
    #[arg(long)]
    print_crds: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_crds {
        print!("{}", serde_yaml::to_string(&Migration::crd())?);
        println!("---");
        print!("{}", serde_yaml::to_string(&ClusterPair::crd())?);
        return Ok(());
    }

    // Initialize logging
    init_logging(&args);

    info!("Starting Migration Operator");
    info!("  Admin namespace: {}", args.admin_namespace);
    info!("  Resync period: {}s", args.resync_seconds);

    // Create Kubernetes client
    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    info!("Connected to Kubernetes cluster");

    register_crds(&client)
        .await
        .context("Failed to register CRDs")?;

    // Wire the external collaborators. Real storage drivers and rule
    // engines implement the domain ports and replace these.
    let driver = Arc::new(ResourceOnlyDriver::new());
    let rules = Arc::new(NoopRuleExecutor::new());
    let pairs = Arc::new(KubeClusterPairRegistry::new(client.clone()));

    let ctx = ControllerContext::new(
        client.clone(),
        driver,
        rules,
        pairs,
        args.admin_namespace.clone(),
        Duration::from_secs(args.resync_seconds),
    );

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Run the controller
    info!("Starting Migration controller");
    controller::run(ctx).await?;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// CRD Registration
// =============================================================================

/// Apply the operator's CRDs and wait for the API server to establish
/// them before processing any event.
async fn register_crds(client: &Client) -> anyhow::Result<()> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("migration-operator").force();

    for crd in [Migration::crd(), ClusterPair::crd()] {
        let name = crd
            .metadata
            .name
            .clone()
            .context("generated CRD has no name")?;

        api.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .with_context(|| format!("Failed to apply CRD {}", name))?;

        let establish = await_condition(api.clone(), &name, conditions::is_crd_established());
        tokio::time::timeout(Duration::from_secs(30), establish)
            .await
            .with_context(|| format!("Timed out waiting for CRD {} to be established", name))?
            .with_context(|| format!("Failed waiting for CRD {}", name))?;

        info!("CRD {} established", name);
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("kube=info".parse().expect("static directive"))
        .add_directive("tower=warn".parse().expect("static directive"));

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn health_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let (status, body) = match req.uri().path() {
            "/healthz" | "/livez" | "/readyz" => (StatusCode::OK, "ok"),
            _ => (StatusCode::NOT_FOUND, "not found"),
        };
        let response = Response::builder()
            .status(status)
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_default();
        Ok(response)
    }

    let addr: SocketAddr = addr.parse().context("Invalid health server address")?;
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind health server")?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("Health server accept error")?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(health_handler))
                .await
            {
                tracing::error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => {
                let encoder = TextEncoder::new();
                let metric_families = prometheus::gather();
                let mut buffer = Vec::new();
                if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                    tracing::error!("Failed to encode metrics: {}", e);
                }

                Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", encoder.format_type())
                    .body(Full::new(Bytes::from(buffer)))
                    .unwrap_or_default()
            }
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("not found")))
                .unwrap_or_default(),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr.parse().context("Invalid metrics server address")?;
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind metrics server")?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("Metrics server accept error")?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}
