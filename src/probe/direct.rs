use super::{HopResult, ProbeSession, ProbeStrategy, socket};
use crate::error::ProbeError;
use crate::target::Target;
use socket2::{SockAddr, Socket};
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

const RECV_BUFFER_SIZE: usize = 1024;
const IPV4_MIN_HEADER_LEN: usize = 20;
const ICMP_HEADER_LEN: usize = 8;
const ICMP_DEST_UNREACHABLE: u8 = 3;
const ICMP_TIME_EXCEEDED: u8 = 11;
const IPPROTO_UDP: u8 = 17;
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Probes with a raw ICMP receiver and a UDP sender, one socket pair per round.
#[derive(Debug, Default)]
pub struct DirectProber;

impl DirectProber {
    pub fn new() -> Self {
        Self
    }
}

impl ProbeStrategy for DirectProber {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn prepare(&mut self, session: &mut ProbeSession) -> Result<(), ProbeError> {
        let target = Target::parse(&session.destination);
        let ip = target.resolve()?;
        log::debug!("[probe::direct] prepare: target={} ip={} port={}", target.display_name(), ip, session.port);
        session.destination_ip = Some(ip);
        Ok(())
    }

    fn probe(&mut self, session: &ProbeSession) -> Result<HopResult, ProbeError> {
        let destination_ip = session.destination_ip.ok_or_else(|| ProbeError::Resolution {
            destination: session.destination.clone(),
            reason: "destination was not resolved before probing".to_string(),
        })?;

        // Both sockets drop at the end of this call, whichever way it returns
        let receiver = socket::create_receiver(session.port, session.timeout_ms)?;
        let sender = socket::create_sender(session.ttl)?;

        let probe_addr = SockAddr::from(SocketAddrV4::new(destination_ip, session.port));
        sender
            .send_to(&[], &probe_addr)
            .map_err(|e| ProbeError::socket("send probe", e))?;

        log::trace!("[probe::direct] probe_sent: ttl={} destination={}:{}",
            session.ttl, destination_ip, session.port);

        let deadline = Instant::now() + session.timeout();
        round_result(session, await_reply(&receiver, session.port, deadline))
    }
}

/// Map the outcome of waiting for a reply onto the round's result.
/// Non-timeout receive errors count as a miss.
fn round_result(session: &ProbeSession, received: io::Result<Option<IcmpReply>>) -> Result<HopResult, ProbeError> {
    match received {
        Ok(Some(reply)) => {
            log::trace!("[probe::direct] reply_received: ttl={} source={} icmp_type={} icmp_code={}",
                session.ttl, reply.source, reply.icmp_type, reply.icmp_code);
            Ok(HopResult::responded(session.ttl, reply.source))
        }
        Ok(None) => {
            log::debug!("[probe::direct] round_timeout: ttl={} timeout={}ms", session.ttl, session.timeout_ms);
            Err(ProbeError::Timeout { ttl: session.ttl, timeout_ms: session.timeout_ms })
        }
        Err(e) => {
            log::warn!("[probe::direct] receive_failed: ttl={} error={}", session.ttl, e);
            Ok(HopResult::miss(session.ttl))
        }
    }
}

/// An ICMP error message answering one of our UDP probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpReply {
    pub source: Ipv4Addr,
    pub icmp_type: u8,
    pub icmp_code: u8,
    /// Destination port of the quoted UDP header, when the quote is complete.
    pub probe_port: Option<u16>,
}

impl IcmpReply {
    /// Whether this reply answers a probe sent to `port`.
    pub fn answers(&self, port: u16) -> bool {
        let kind_matches = matches!(self.icmp_type, ICMP_TIME_EXCEEDED | ICMP_DEST_UNREACHABLE);
        kind_matches && self.probe_port.is_none_or(|p| p == port)
    }
}

/// Read from `receiver` until a matching reply arrives or `deadline` passes.
/// `Ok(None)` means the deadline passed.
fn await_reply(receiver: &Socket, port: u16, deadline: Instant) -> io::Result<Option<IcmpReply>> {
    let mut buf = [0u8; RECV_BUFFER_SIZE];

    loop {
        // Sub-microsecond timeouts become a zero timeval, which blocks forever
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining < MIN_READ_TIMEOUT {
            return Ok(None);
        }
        receiver.set_read_timeout(Some(remaining))?;

        match (&*receiver).read(&mut buf) {
            Ok(len) => match parse_icmp_reply(&buf[..len]) {
                Some(reply) if reply.answers(port) => return Ok(Some(reply)),
                Some(reply) => {
                    log::trace!("[probe::direct] reply_ignored: source={} icmp_type={} probe_port={:?}",
                        reply.source, reply.icmp_type, reply.probe_port);
                }
                None => {
                    log::trace!("[probe::direct] packet_unparsable: len={}", len);
                }
            },
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Ok(None);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Parse an IPv4 packet as delivered by a raw ICMP socket.
pub fn parse_icmp_reply(packet: &[u8]) -> Option<IcmpReply> {
    let header_len = ipv4_header_len(packet)?;
    if packet.len() < header_len + ICMP_HEADER_LEN {
        return None;
    }

    let source = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let icmp_type = packet[header_len];
    let icmp_code = packet[header_len + 1];

    let probe_port = match icmp_type {
        ICMP_TIME_EXCEEDED | ICMP_DEST_UNREACHABLE => {
            quoted_udp_dest_port(&packet[header_len + ICMP_HEADER_LEN..])
        }
        _ => None,
    };

    Some(IcmpReply {
        source,
        icmp_type,
        icmp_code,
        probe_port,
    })
}

fn ipv4_header_len(packet: &[u8]) -> Option<usize> {
    let first = *packet.first()?;
    if first >> 4 != 4 {
        return None;
    }
    let len = usize::from(first & 0x0f) * 4;
    if len < IPV4_MIN_HEADER_LEN || packet.len() < len {
        return None;
    }
    Some(len)
}

fn quoted_udp_dest_port(quoted: &[u8]) -> Option<u16> {
    let header_len = ipv4_header_len(quoted)?;
    if quoted[9] != IPPROTO_UDP || quoted.len() < header_len + 4 {
        return None;
    }
    Some(u16::from_be_bytes([quoted[header_len + 2], quoted[header_len + 3]]))
}
