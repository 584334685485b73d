//! logship-daemon entry point.
//!
//! This file is intentionally thin: it loads configuration, opens the
//! persistent stores, builds the shared `Services` value, spawns every
//! transport listener, and waits on a shutdown signal. Route handlers live
//! in `logship-transport::http`; receiver loops live in the other
//! `logship-transport` modules.

use std::sync::Arc;

use anyhow::Context;
use logship_config::Settings;
use logship_ingest::Batcher;
use logship_registry::SchemaRegistry;
use logship_store::ColumnarWriter;
use logship_transport::{ack, grpc, http, tcp, udp, Services};
use logship_model::ModuleAllowList;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Tasks get 5s to drain after the stop signal before the process hard-exits
/// (spec §5 "Cancellation").
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::from_env();
    info!(config_hash = %settings.content_hash(), "logship-daemon starting");

    let db = sled::open(&settings.kv_path).context("failed to open schema cache")?;

    let store = Arc::new(ColumnarWriter::new(
        &settings.clickhouse_addr,
        &settings.clickhouse_user,
        &settings.clickhouse_pass,
        &settings.clickhouse_db,
    ));

    let registry = Arc::new(
        SchemaRegistry::open(&db, store.clone() as Arc<dyn logship_registry::DatabaseCatalog>)
            .context("failed to open schema registry")?,
    );

    let (shutdown_tx, _) = broadcast::channel(1);

    let tcp_batcher = Batcher::new(store.clone(), settings.batch_size, settings.buffer_capacity);
    let udp_batcher = Batcher::new(store.clone(), settings.batch_size, settings.buffer_capacity);

    tcp_batcher.spawn_flusher(settings.batch_timeout, shutdown_tx.subscribe());
    udp_batcher.spawn_flusher(settings.batch_timeout, shutdown_tx.subscribe());

    let services = Arc::new(Services {
        registry,
        store: store.clone(),
        tcp_batcher,
        udp_batcher,
        module_allow_list: ModuleAllowList::default(),
        read_timeout: settings.read_timeout,
        buffer_capacity: settings.buffer_capacity,
        ack_port: settings.ack_port,
    });

    let ack_socket = tokio::net::UdpSocket::bind(("0.0.0.0", settings.ack_port))
        .await
        .context("failed to bind ack port")?;
    info!(port = settings.ack_port, "ack responder listening");
    tokio::spawn(ack::run_responder(ack_socket, shutdown_tx.subscribe()));

    {
        let services = Arc::clone(&services);
        let base_port = settings.grpc_base_port;
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(err) = grpc::run(services, base_port, shutdown_rx).await {
                error!(error = %err, "grpc receiver exited with error");
            }
        });
    }

    {
        let services = Arc::clone(&services);
        let base_port = settings.tcp_base_port;
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(err) = tcp::run(services, base_port, shutdown_rx).await {
                error!(error = %err, "tcp receiver exited with error");
            }
        });
    }

    {
        let services = Arc::clone(&services);
        let base_port = settings.udp_base_port;
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(err) = udp::run(services, base_port, shutdown_rx).await {
                error!(error = %err, "udp receiver exited with error");
            }
        });
    }

    let http_port = settings.http_port;
    let app = http::router(Arc::clone(&services));
    let http_listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port))
        .await
        .context("failed to bind http port")?;
    info!(port = http_port, "http receiver listening");

    let mut http_shutdown = shutdown_tx.subscribe();
    let http_server = tokio::spawn(async move {
        axum::serve(http_listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.recv().await;
            })
            .await
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping");
    let _ = shutdown_tx.send(());

    if tokio::time::timeout(SHUTDOWN_GRACE, http_server).await.is_err() {
        error!("shutdown grace period elapsed, forcing exit");
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
