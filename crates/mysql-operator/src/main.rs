//! MySQL Kubernetes Operator
//!
//! Watches `Mysql` custom resources and reconciles databases, accounts and
//! grants on the referenced MySQL servers.

use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use mysql_operator::prelude::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

/// MySQL Kubernetes Operator
#[derive(Parser, Debug)]
#[command(name = "mysql-operator")]
#[command(about = "Kubernetes operator for MySQL databases, users and grants")]
#[command(version)]
struct Args {
    /// Metrics server address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// Health probe address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: SocketAddr,

    /// Namespace to watch (empty for cluster-wide)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    namespace: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,

    /// Print CRD YAML and exit
    #[arg(long)]
    print_crd: bool,

    /// Deadline for one reconcile pass, in seconds
    #[arg(long, env = "PASS_TIMEOUT_SECS", default_value = "120")]
    pass_timeout_secs: u64,

    /// Timeout for opening a MySQL connection, in seconds
    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value = "10")]
    connect_timeout_secs: u64,

    /// Timeout for a single MySQL statement, in seconds
    #[arg(long, env = "STATEMENT_TIMEOUT_SECS", default_value = "30")]
    statement_timeout_secs: u64,

    /// Interval between periodic re-checks of a reconciled resource, in seconds
    #[arg(long, env = "REQUEUE_SECS", default_value = "300")]
    requeue_secs: u64,
}

impl Args {
    fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            pass_timeout: Duration::from_secs(self.pass_timeout_secs),
            requeue_interval: Duration::from_secs(self.requeue_secs),
        }
    }

    fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            statement_timeout: Duration::from_secs(self.statement_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle CRD printing
    if args.print_crd {
        print_crd()?;
        return Ok(());
    }

    // Initialize logging
    init_logging(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = if args.namespace.is_empty() {
            "all"
        } else {
            &args.namespace
        },
        "Starting MySQL Kubernetes Operator"
    );

    // Initialize metrics
    let metrics_addr = args.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_addr).await {
            tracing::error!(error = %e, "Metrics server failed");
        }
    });

    // Start health server
    let health_addr = args.health_addr;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_addr).await {
            tracing::error!(error = %e, "Health server failed");
        }
    });

    // Create Kubernetes client
    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let reconciler = Reconciler::new(
        Arc::new(KubeResourceStore::new(client.clone())),
        Arc::new(SecretCredentialStore::new(client.clone())),
        Arc::new(MysqlConnector::with_config(args.connector_config())),
        args.reconciler_config(),
    );

    // Parse namespace (empty string means cluster-wide)
    let namespace = if args.namespace.is_empty() {
        None
    } else {
        Some(args.namespace)
    };

    // Run the controller
    run_controller(client, namespace, reconciler)
        .await
        .context("Controller failed")?;

    Ok(())
}

/// Initialize logging subsystem
fn init_logging(args: &Args) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Start the Prometheus metrics server
async fn start_metrics_server(addr: SocketAddr) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    info!(address = %addr, "Starting metrics server");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    // Keep the server running
    std::future::pending::<()>().await;

    Ok(())
}

/// Start the health probe server
async fn start_health_server(addr: SocketAddr) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    info!(address = %addr, "Starting health server");

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind health server")?;

    loop {
        let (mut socket, _) = listener.accept().await?;

        tokio::spawn(async move {
            let mut buf = [0; 1024];
            if socket.read(&mut buf).await.is_ok() {
                let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK";
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
    }
}

/// Print the CRD YAML for installation
fn print_crd() -> Result<()> {
    use kube::CustomResourceExt;

    let crd = Mysql::crd();
    let yaml = serde_yaml::to_string(&crd)?;
    println!("{}", yaml);

    Ok(())
}
