use anyhow::{Context, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

/// Receive poll interval; bounds how long a stop request waits on a blocked read
pub const RECV_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Create the session's UDP socket.
///
/// Probes are sent from and replies received on this one socket, so the echo
/// endpoint can answer to the probe's source address. Port 0 picks an
/// ephemeral port.
pub fn create_probe_socket(ipv6: bool, local_port: u16) -> Result<UdpSocket> {
    let domain = if ipv6 { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .context("Failed to create UDP socket")?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(false)?;
    socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;

    let bind_addr = if ipv6 {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), local_port)
    } else {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), local_port)
    };
    socket
        .bind(&SockAddr::from(bind_addr))
        .with_context(|| format!("Failed to bind UDP socket to {}", bind_addr))?;

    Ok(socket.into())
}

/// Send a probe payload to the echo endpoint
pub fn send_probe(socket: &UdpSocket, payload: &[u8], dest: SocketAddr) -> std::io::Result<usize> {
    socket.send_to(payload, dest)
}

/// True for the errors a read timeout produces (no datagram this poll)
pub fn is_poll_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Blocking datagram source the receiver reads replies from
pub trait ReplySocket: Send {
    fn recv_reply(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)>;
}

impl ReplySocket for UdpSocket {
    fn recv_reply(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.recv_from(buf)
    }
}

/// Resolve "host:port" (or host plus default port) to a socket address,
/// preferring IPv4 like most echo deployments
pub fn resolve_endpoint(host: &str, default_port: u16) -> Result<SocketAddr> {
    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }

    let with_port = if host.contains(':') {
        host.to_string()
    } else {
        format!("{}:{}", host, default_port)
    };

    let addrs: Vec<SocketAddr> = with_port
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve {}", host))?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| anyhow::anyhow!("No addresses found for {}", host))
}
