//! Raw-socket prober for ICMP echo and TCP SYN probes.
//!
//! Every probe opens its own layer 4 channel, sends a single packet and
//! reads the channel until a matching answer shows up or the timeout
//! passes. Raw sockets see all inbound traffic of their protocol, so
//! answers are matched on source address (and ports / ICMP identifier).
//!
//! Opening the channels needs root or `CAP_NET_RAW`.
use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::tcp::TcpPacket;
use pnet::transport::{
    self, icmp_packet_iter, tcp_packet_iter, TransportChannelType, TransportProtocol,
    TransportReceiver, TransportSender,
};

use super::packet::{self, TcpEndpoints};
use super::{classify_tcp_flags, ProbeError, ProbeKind, ProbeOutcome, ProbeRequest, ProbeResult, Prober};

const TRANSPORT_BUFFER_SIZE: usize = 4096;
const CHANNEL_TYPE_ICMP: TransportChannelType =
    TransportChannelType::Layer4(TransportProtocol::Ipv4(IpNextHeaderProtocols::Icmp));
const CHANNEL_TYPE_TCP: TransportChannelType =
    TransportChannelType::Layer4(TransportProtocol::Ipv4(IpNextHeaderProtocols::Tcp));
const EPHEMERAL_PORTS: RangeInclusive<u16> = 49_152..=65_535;
const ECHO_SEQUENCE: u16 = 1;

/// Sends [`ProbeKind::IcmpEcho`] and [`ProbeKind::TcpSyn`] probes.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawProber;

impl RawProber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Prober for RawProber {
    async fn probe(&self, request: ProbeRequest) -> Result<ProbeResult, ProbeError> {
        let probe: fn(ProbeRequest) -> Result<ProbeResult, ProbeError> = match request.kind {
            ProbeKind::IcmpEcho => ping,
            ProbeKind::TcpSyn => syn,
            kind => return Err(ProbeError::Unsupported(kind)),
        };
        run_blocking(move || probe(request)).await
    }

    async fn preflight(&self, kind: ProbeKind) -> Result<(), ProbeError> {
        let channel = Channel::for_kind(kind)?;
        run_blocking(move || channel.open().map(drop)).await
    }
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Icmp,
    Tcp,
}

impl Channel {
    fn for_kind(kind: ProbeKind) -> Result<Self, ProbeError> {
        match kind {
            ProbeKind::IcmpEcho => Ok(Channel::Icmp),
            ProbeKind::TcpSyn => Ok(Channel::Tcp),
            kind => Err(ProbeError::Unsupported(kind)),
        }
    }

    fn open(self) -> Result<(TransportSender, TransportReceiver), ProbeError> {
        let (channel_type, socket) = match self {
            Channel::Icmp => (CHANNEL_TYPE_ICMP, "raw ICMP"),
            Channel::Tcp => (CHANNEL_TYPE_TCP, "raw TCP"),
        };
        transport::transport_channel(TRANSPORT_BUFFER_SIZE, channel_type)
            .map_err(|source| ProbeError::Socket { socket, source })
    }
}

/// Pnet's receive iterators block, so every probe runs on the blocking pool.
async fn run_blocking<T, F>(task: F) -> Result<T, ProbeError>
where
    F: FnOnce() -> Result<T, ProbeError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(ProbeError::Cancelled),
    }
}

fn ping(request: ProbeRequest) -> Result<ProbeResult, ProbeError> {
    let (mut tx, mut rx) = Channel::Icmp.open()?;
    let target = IpAddr::V4(request.host);
    let identifier: u16 = rand::random();

    let bytes = packet::build_echo_request(identifier, ECHO_SEQUENCE)
        .map_err(|e| packet_error(&request, e))?;
    let echo = IcmpPacket::new(&bytes).ok_or_else(|| ProbeError::Packet {
        host: request.host,
        reason: "truncated ICMP echo request".to_owned(),
    })?;
    tx.send_to(echo, target)
        .map_err(|source| io_error(&request, source))?;

    let deadline = Instant::now() + request.timeout;
    let mut messages = icmp_packet_iter(&mut rx);
    while let Some(wait) = remaining(deadline) {
        match messages.next_with_timeout(wait) {
            Ok(Some((message, source))) => {
                if source == target && packet::answers_echo(&message, identifier) {
                    debug!("{} answered ICMP echo", request.host);
                    return Ok(ProbeResult::new(&request, ProbeOutcome::Responded));
                }
            }
            Ok(None) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(io_error(&request, source)),
        }
    }

    debug!("No ICMP answer from {} within {:?}", request.host, request.timeout);
    Ok(ProbeResult::new(&request, ProbeOutcome::NoResponse))
}

fn syn(request: ProbeRequest) -> Result<ProbeResult, ProbeError> {
    let port = request.require_port()?;
    let source = route_source(request.host)?;
    let (mut tx, mut rx) = Channel::Tcp.open()?;
    let target = IpAddr::V4(request.host);

    let endpoints = TcpEndpoints {
        source,
        destination: request.host,
        source_port: rand::random_range(EPHEMERAL_PORTS),
        destination_port: port.get(),
    };
    let sequence: u32 = rand::random();

    let bytes = packet::build_syn(endpoints, sequence).map_err(|e| packet_error(&request, e))?;
    let segment = TcpPacket::new(&bytes).ok_or_else(|| ProbeError::Packet {
        host: request.host,
        reason: "truncated TCP SYN".to_owned(),
    })?;
    tx.send_to(segment, target)
        .map_err(|source| io_error(&request, source))?;

    let deadline = Instant::now() + request.timeout;
    let mut segments = tcp_packet_iter(&mut rx);
    while let Some(wait) = remaining(deadline) {
        match segments.next_with_timeout(wait) {
            Ok(Some((reply, from))) => {
                let ours = from == target
                    && reply.get_source() == endpoints.destination_port
                    && reply.get_destination() == endpoints.source_port;
                if !ours {
                    continue;
                }

                match classify_tcp_flags(reply.get_flags()) {
                    ProbeOutcome::Responded => {
                        debug!("{}:{} answered SYN+ACK", request.host, port);
                        reset(&mut tx, &reply, endpoints);
                        return Ok(ProbeResult::new(&request, ProbeOutcome::Responded));
                    }
                    ProbeOutcome::Rejected => {
                        return Ok(ProbeResult::new(&request, ProbeOutcome::Rejected));
                    }
                    ProbeOutcome::NoResponse => continue,
                }
            }
            Ok(None) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(io_error(&request, source)),
        }
    }

    Ok(ProbeResult::new(&request, ProbeOutcome::NoResponse))
}

/// Answers a SYN+ACK with a RST so the target drops the half-open connection.
fn reset(tx: &mut TransportSender, reply: &TcpPacket, endpoints: TcpEndpoints) {
    let target = IpAddr::V4(endpoints.destination);
    let sent = packet::build_reset_for(reply, endpoints.source, endpoints.destination)
        .map_err(|e| io::Error::other(format!("{e:#}")))
        .and_then(|bytes| {
            let segment = TcpPacket::new(&bytes)
                .ok_or_else(|| io::Error::other("truncated TCP RST"))?;
            tx.send_to(segment, target)
        });

    if let Err(e) = sent {
        debug!(
            "Could not reset {}:{}: {}",
            endpoints.destination, endpoints.destination_port, e
        );
    }
}

/// The local address the kernel would use to reach `host`. Needed for the
/// TCP pseudo header checksum. Connecting a UDP socket sends nothing.
fn route_source(host: Ipv4Addr) -> Result<Ipv4Addr, ProbeError> {
    let no_route = |source| ProbeError::NoRoute { host, source };

    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(no_route)?;
    socket.connect((host, 53)).map_err(no_route)?;

    match socket.local_addr().map_err(no_route)?.ip() {
        IpAddr::V4(source) => Ok(source),
        IpAddr::V6(_) => Err(no_route(io::Error::other("no IPv4 source address"))),
    }
}

fn remaining(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|wait| !wait.is_zero())
}

fn io_error(request: &ProbeRequest, source: io::Error) -> ProbeError {
    ProbeError::Io {
        kind: request.kind,
        host: request.host,
        source,
    }
}

fn packet_error(request: &ProbeRequest, error: anyhow::Error) -> ProbeError {
    ProbeError::Packet {
        host: request.host,
        reason: format!("{error:#}"),
    }
}
