use crate::error::ProbeError;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Raw ICMP socket that receives the replies to one round's probe.
/// Closed when dropped, like the sender.
pub fn create_receiver(port: u16, timeout_ms: u64) -> Result<Socket, ProbeError> {
    log::trace!("[probe::socket] create_receiver: port={} timeout={}ms", port, timeout_ms);

    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
        .map_err(|e| ProbeError::socket("open raw icmp socket", e))?;

    // A zero timeout would mean "block forever" to the OS
    let timeout = Duration::from_millis(timeout_ms.max(1));
    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| ProbeError::socket("set receive timeout", e))?;

    let local = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port);
    socket.bind(&SockAddr::from(local)).map_err(|e| {
        log::error!("[probe::socket] bind_failed: port={} error={}", port, e);
        ProbeError::socket("bind receiver", e)
    })?;

    Ok(socket)
}

/// UDP socket that sends one probe with the given time-to-live.
pub fn create_sender(ttl: u8) -> Result<Socket, ProbeError> {
    log::trace!("[probe::socket] create_sender: ttl={}", ttl);

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| ProbeError::socket("open udp socket", e))?;
    socket
        .set_ttl(u32::from(ttl))
        .map_err(|e| ProbeError::socket("set ttl", e))?;

    Ok(socket)
}
