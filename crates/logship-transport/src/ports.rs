//! Shared port-probing policy for gRPC/TCP/UDP (spec §4.4.5): try
//! `base_port`, increment on bind failure, fatal past 65535.

use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};

use socket2::{Domain, Socket, Type};

/// Spec §4.4.4: the UDP receiver keeps a 2 MB kernel read buffer so a burst
/// of datagrams doesn't get dropped at the socket layer before it even
/// reaches the application-level channel.
const UDP_RECV_BUFFER_BYTES: usize = 2 * 1024 * 1024;

pub fn probe_tcp(base_port: u16) -> io::Result<(TcpListener, u16)> {
    let mut port = base_port;
    loop {
        match TcpListener::bind(("0.0.0.0", port)) {
            Ok(listener) => return Ok((listener, port)),
            Err(err) if port < 65535 => {
                tracing::debug!(port, error = %err, "tcp port busy, trying next");
                port += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

pub fn probe_udp(base_port: u16) -> io::Result<(UdpSocket, u16)> {
    let mut port = base_port;
    loop {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        match bind_udp_with_recv_buffer(addr) {
            Ok(socket) => return Ok((socket, port)),
            Err(err) if port < 65535 => {
                tracing::debug!(port, error = %err, "udp port busy, trying next");
                port += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn bind_udp_with_recv_buffer(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, None)?;
    socket.bind(&addr.into())?;
    if let Err(err) = socket.set_recv_buffer_size(UDP_RECV_BUFFER_BYTES) {
        tracing::warn!(error = %err, "udp: failed to widen kernel receive buffer");
    }
    Ok(socket.into())
}
