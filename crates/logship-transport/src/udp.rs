//! UDP receiver (spec §4.4.4): one datagram = one JSON record, consumed by a
//! fixed worker pool behind a bounded internal channel.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, Mutex};

use logship_model::{LogRecord, PushType, RawFields};

use crate::ack::send_ack_request;
use crate::ports::probe_udp;
use crate::Services;

const RECV_BUFFER_LEN: usize = 4096;
const WORKER_COUNT: usize = 5;

#[derive(Debug, Deserialize)]
struct UdpDatagram {
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

struct Received {
    bytes: Vec<u8>,
    peer: SocketAddr,
}

/// Binds the socket (probing from `base_port`), publishes the chosen port in
/// `UDP_PORT`, spawns the worker pool, and runs the recv loop until
/// `shutdown` fires.
pub async fn run(
    services: Arc<Services>,
    base_port: u16,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let (std_socket, port) = probe_udp(base_port)?;
    std_socket.set_nonblocking(true)?;
    let socket = UdpSocket::from_std(std_socket)?;
    std::env::set_var("UDP_PORT", port.to_string());
    tracing::info!(port, "udp receiver listening");

    let (tx, rx) = mpsc::channel::<Received>(services.buffer_capacity);
    let rx = Arc::new(Mutex::new(rx));

    for _ in 0..WORKER_COUNT {
        let services = Arc::clone(&services);
        let rx = Arc::clone(&rx);
        tokio::spawn(worker_loop(services, rx));
    }

    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, peer)) => {
                        let datagram = Received { bytes: buf[..n].to_vec(), peer };
                        if tx.try_send(datagram).is_err() {
                            tracing::error!(%peer, "udp: internal channel full, datagram dropped");
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "udp: recv failed"),
                }
            }
            _ = shutdown.recv() => return Ok(()),
        }
    }
}

async fn worker_loop(services: Arc<Services>, rx: Arc<Mutex<mpsc::Receiver<Received>>>) {
    loop {
        let datagram = rx.lock().await.recv().await;
        let Some(datagram) = datagram else {
            return;
        };
        handle_datagram(&services, datagram).await;
    }
}

async fn handle_datagram(services: &Arc<Services>, datagram: Received) {
    let peer = datagram.peer;
    let parsed: UdpDatagram = match serde_json::from_slice(&datagram.bytes) {
        Ok(p) => p,
        Err(err) => {
            tracing::error!(%peer, error = %err, "udp: malformed json, datagram dropped");
            return;
        }
    };

    if parsed.schema_id.trim().is_empty()
        || parsed.service.trim().is_empty()
        || parsed.module.trim().is_empty()
    {
        tracing::error!(%peer, "udp: missing required field, datagram dropped");
        return;
    }

    if !services.module_allow_list.is_allowed(&parsed.module) {
        tracing::error!(%peer, module = %parsed.module, "udp: module not allowed, datagram dropped");
        return;
    }

    let schema_name = match services.registry.rebuild_and_wait(&parsed.schema_id).await {
        Ok(Some(name)) => name,
        Ok(None) => {
            tracing::error!(%peer, schema_id = %parsed.schema_id, "udp: schema resolution failed");
            return;
        }
        Err(err) => {
            tracing::error!(%peer, error = %err, "udp: registry error");
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
        PushType::Udp,
        chrono::Utc::now(),
    ) {
        Ok(record) => record,
        Err(err) => {
            tracing::error!(%peer, error = %err, "udp: rejected record");
            return;
        }
    };

    if services.udp_batcher.admit(record).await {
        let ack_port = services.ack_port;
        let peer_ip = peer.ip();
        tokio::spawn(async move {
            send_ack_request(peer_ip, ack_port).await;
        });
    } else {
        tracing::error!(%peer, "udp: buffer full, datagram dropped");
    }
}
