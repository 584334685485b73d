//! UDP ACK subsystem (spec §4.5): a companion socket answers application-level
//! liveness probes. This is not a per-record delivery receipt — nothing in
//! the payload identifies which record triggered it (spec §9, "UDP ACK
//! semantics are thin"; kept as observed behavior, not redesigned here).

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;

const ACK_REQUEST: &[u8] = b"ACK_REQUEST";
const ACK_REPLY: &[u8] = b"ACK";
const ACK_ATTEMPTS: u32 = 3;
const ACK_WRITE_DEADLINE: Duration = Duration::from_millis(200);
const ACK_BACKOFF: Duration = Duration::from_millis(50);

/// Answers every `ACK_REQUEST` datagram with `ACK` until `shutdown` fires.
pub async fn run_responder(socket: UdpSocket, mut shutdown: broadcast::Receiver<()>) {
    let mut buf = [0u8; 64];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, peer)) if &buf[..n] == ACK_REQUEST => {
                        if let Err(err) = socket.send_to(ACK_REPLY, peer).await {
                            tracing::warn!(%peer, error = %err, "ack responder: send failed");
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "ack responder: recv failed");
                    }
                }
            }
            _ = shutdown.recv() => return,
        }
    }
}

/// Best-effort client-side probe fired after a UDP record is admitted.
pub async fn send_ack_request(peer_ip: std::net::IpAddr, ack_port: u16) {
    let target = SocketAddr::new(peer_ip, ack_port);
    let socket = match UdpSocket::bind(("0.0.0.0", 0)).await {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(%target, error = %err, "ack client: failed to bind ephemeral socket");
            return;
        }
    };

    for attempt in 1..=ACK_ATTEMPTS {
        match tokio::time::timeout(ACK_WRITE_DEADLINE, socket.send_to(ACK_REQUEST, target)).await {
            Ok(Ok(_)) => return,
            Ok(Err(err)) => {
                tracing::debug!(%target, attempt, error = %err, "ack client: send failed");
            }
            Err(_) => {
                tracing::debug!(%target, attempt, "ack client: send timed out");
            }
        }
        if attempt < ACK_ATTEMPTS {
            tokio::time::sleep(ACK_BACKOFF).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket as TokioUdpSocket;

    #[tokio::test]
    async fn responder_answers_ack_request() {
        let responder_socket = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        let responder_addr = responder_socket.local_addr().unwrap();
        let (_tx, rx) = broadcast::channel(1);
        tokio::spawn(run_responder(responder_socket, rx));

        let client = TokioUdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(ACK_REQUEST, responder_addr).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], ACK_REPLY);
    }
}
