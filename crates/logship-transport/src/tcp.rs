//! TCP receiver (spec §4.4.3): `\n`-delimited JSON, schema carried by ID.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use logship_model::{LogRecord, PushType, RawFields};

use crate::ports::probe_tcp;
use crate::Services;

#[derive(Debug, Deserialize)]
struct TcpLine {
    #[serde(alias = "schemaId")]
    schema_id: String,
    module: String,
    output: String,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    error_info: String,
    #[serde(default)]
    service: String,
    #[serde(default)]
    log_level: String,
    #[serde(default)]
    operator_id: String,
    #[serde(default)]
    operator: String,
    #[serde(default)]
    operator_ip: String,
    #[serde(default)]
    operator_equipment: String,
    #[serde(default)]
    operator_company: String,
    #[serde(default)]
    operator_project: String,
}

/// Binds the listener (probing from `base_port`), publishes the chosen port
/// in `TCP_PORT`, and runs the accept loop until `shutdown` fires.
pub async fn run(
    services: Arc<Services>,
    base_port: u16,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let (std_listener, port) = probe_tcp(base_port)?;
    std_listener.set_nonblocking(true)?;
    let listener = TcpListener::from_std(std_listener)?;
    std::env::set_var("TCP_PORT", port.to_string());
    tracing::info!(port, "tcp receiver listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "tcp: accept failed");
                        continue;
                    }
                };
                let services = Arc::clone(&services);
                let conn_shutdown = shutdown.resubscribe();
                tokio::spawn(async move {
                    handle_connection(services, stream, peer, conn_shutdown).await;
                });
            }
            _ = shutdown.recv() => return Ok(()),
        }
    }
}

/// `idle -> reading -> {reading | closed}` (spec §4.6). A read timeout loops
/// back to re-check the stop signal rather than closing the connection.
async fn handle_connection(
    services: Arc<Services>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        tokio::select! {
            result = tokio::time::timeout(services.read_timeout, reader.read_line(&mut line)) => {
                match result {
                    Ok(Ok(0)) => return, // EOF
                    Ok(Ok(_)) => handle_line(&services, &line, peer).await,
                    Ok(Err(err)) => {
                        tracing::warn!(%peer, error = %err, "tcp: read error");
                        return;
                    }
                    Err(_) => continue, // read timeout
                }
            }
            _ = shutdown.recv() => return,
        }
    }
}

async fn handle_line(services: &Arc<Services>, line: &str, peer: SocketAddr) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }

    let parsed: TcpLine = match serde_json::from_str(trimmed) {
        Ok(p) => p,
        Err(err) => {
            tracing::error!(%peer, error = %err, "tcp: malformed json, line skipped");
            return;
        }
    };

    if parsed.schema_id.trim().is_empty()
        || parsed.service.trim().is_empty()
        || parsed.module.trim().is_empty()
    {
        tracing::error!(%peer, "tcp: missing required field, line skipped");
        return;
    }

    if !services.module_allow_list.is_allowed(&parsed.module) {
        tracing::error!(%peer, module = %parsed.module, "tcp: module not allowed, line skipped");
        return;
    }

    let schema_name = match services.registry.rebuild_and_wait(&parsed.schema_id).await {
        Ok(Some(name)) => name,
        Ok(None) => {
            tracing::error!(%peer, schema_id = %parsed.schema_id, "tcp: schema resolution failed");
            return;
        }
        Err(err) => {
            tracing::error!(%peer, error = %err, "tcp: registry error");
            return;
        }
    };

    let raw = RawFields {
        output: parsed.output,
        detail: parsed.detail,
        error_info: parsed.error_info,
        service: parsed.service,
        client_ip: peer.ip().to_string(),
        client_addr: peer.to_string(),
        log_level: parsed.log_level,
        operator_id: parsed.operator_id,
        operator: parsed.operator,
        operator_ip: parsed.operator_ip,
        operator_equipment: parsed.operator_equipment,
        operator_company: parsed.operator_company,
        operator_project: parsed.operator_project,
    };

    let record = match LogRecord::from_fields(
        raw,
        schema_name,
        parsed.module,
        PushType::Tcp,
        chrono::Utc::now(),
    ) {
        Ok(record) => record,
        Err(err) => {
            tracing::error!(%peer, error = %err, "tcp: rejected record");
            return;
        }
    };

    if !services.tcp_batcher.admit(record).await {
        tracing::error!(%peer, "tcp: buffer full, record dropped");
    }
}
