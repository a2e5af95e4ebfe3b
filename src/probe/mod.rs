//! Single-target probes: ICMP echo, TCP SYN and TCP connect.
//!
//! A probe sends one request to one target, waits at most its timeout and
//! classifies what came back. Silence is an outcome
//! ([`ProbeOutcome::NoResponse`]), never an error; errors are reserved for
//! things going wrong on our side, see [`ProbeError`].
use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use pnet::packet::tcp::TcpFlags;
use thiserror::Error;

use crate::port_strategy::Port;

pub mod connect;
pub mod packet;
pub mod raw;

pub use connect::ConnectProber;
pub use raw::RawProber;

/// How long a single probe waits for an answer unless told otherwise.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// The kind of request a probe sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    /// One ICMP echo request; any ICMP answer from the host counts.
    IcmpEcho,
    /// One TCP SYN segment; the handshake is never completed.
    TcpSyn,
    /// A full TCP connect, closed straight away.
    TcpConnect,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::IcmpEcho => write!(f, "ICMP echo"),
            ProbeKind::TcpSyn => write!(f, "TCP SYN"),
            ProbeKind::TcpConnect => write!(f, "TCP connect"),
        }
    }
}

/// What to probe, how, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRequest {
    pub host: Ipv4Addr,
    pub port: Option<Port>,
    pub kind: ProbeKind,
    pub timeout: Duration,
}

impl ProbeRequest {
    pub fn echo(host: Ipv4Addr, timeout: Duration) -> Self {
        Self {
            host,
            port: None,
            kind: ProbeKind::IcmpEcho,
            timeout,
        }
    }

    pub fn syn(host: Ipv4Addr, port: Port, timeout: Duration) -> Self {
        Self {
            host,
            port: Some(port),
            kind: ProbeKind::TcpSyn,
            timeout,
        }
    }

    pub fn connect(host: Ipv4Addr, port: Port, timeout: Duration) -> Self {
        Self {
            host,
            port: Some(port),
            kind: ProbeKind::TcpConnect,
            timeout,
        }
    }

    /// Same request with a different kind, used to pick SYN or connect for port discovery.
    pub fn with_kind(mut self, kind: ProbeKind) -> Self {
        self.kind = kind;
        self
    }

    /// The port, for the kinds that need one.
    pub fn require_port(&self) -> Result<Port, ProbeError> {
        self.port.ok_or(ProbeError::MissingPort {
            kind: self.kind,
            host: self.host,
        })
    }
}

/// How a target answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeOutcome {
    /// Echo reply, SYN+ACK, or an accepted connection.
    Responded,
    /// Nothing before the timeout. Down, filtered or dropped; we can't tell.
    NoResponse,
    /// RST to a SYN, or a refused connection: the port is closed.
    Rejected,
}

/// The answer to a single [`ProbeRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub host: Ipv4Addr,
    pub port: Option<Port>,
    pub outcome: ProbeOutcome,
    /// Raw bytes read back, only filled by banner grabs.
    pub banner: Option<Vec<u8>>,
}

impl ProbeResult {
    pub fn new(request: &ProbeRequest, outcome: ProbeOutcome) -> Self {
        Self {
            host: request.host,
            port: request.port,
            outcome,
            banner: None,
        }
    }

    pub fn with_banner(mut self, banner: Vec<u8>) -> Self {
        self.banner = Some(banner);
        self
    }

    pub fn is_responded(&self) -> bool {
        self.outcome == ProbeOutcome::Responded
    }
}

/// Things that went wrong on our side while probing.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The socket a probe needs could not be opened. Usually missing
    /// root / `CAP_NET_RAW`, or the open file limit.
    #[error("could not open a {socket} socket: {source} (raw sockets need root or CAP_NET_RAW)")]
    Socket {
        socket: &'static str,
        #[source]
        source: io::Error,
    },

    /// The prober can't send this kind of probe at all.
    #[error("{0} probes are not supported by this prober")]
    Unsupported(ProbeKind),

    #[error("{kind} probe of {host} needs a port")]
    MissingPort { kind: ProbeKind, host: Ipv4Addr },

    /// No local address routes to the target.
    #[error("no local route to {host}: {source}")]
    NoRoute {
        host: Ipv4Addr,
        #[source]
        source: io::Error,
    },

    #[error("could not build the probe packet for {host}: {reason}")]
    Packet { host: Ipv4Addr, reason: String },

    /// Sending or receiving failed for this one target.
    #[error("{kind} probe of {host} failed: {source}")]
    Io {
        kind: ProbeKind,
        host: Ipv4Addr,
        #[source]
        source: io::Error,
    },

    /// The runtime dropped the probe before it finished, usually on shutdown.
    #[error("probe was cancelled")]
    Cancelled,
}

impl ProbeError {
    /// Fatal errors abort the whole scan; the rest only concern one target.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProbeError::Socket { .. } | ProbeError::Unsupported(_) | ProbeError::MissingPort { .. }
        )
    }
}

/// Sends probes and classifies the answers.
///
/// Implementations touch the network only; they hold no state shared
/// between probes, so one prober can serve every worker at once.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Sends one probe and waits at most `request.timeout` for the answer.
    async fn probe(&self, request: ProbeRequest) -> Result<ProbeResult, ProbeError>;

    /// Checks that probes of `kind` can be sent at all, before any work is
    /// dispatched. Environmental problems surface here instead of per item.
    async fn preflight(&self, _kind: ProbeKind) -> Result<(), ProbeError> {
        Ok(())
    }
}

/// Classifies the flags of a TCP segment sent back in answer to a SYN.
///
/// RST (with or without ACK) means closed, SYN+ACK means open, anything
/// else tells us nothing.
///
/// ```rust
/// # use sweepscan::probe::{classify_tcp_flags, ProbeOutcome};
/// use pnet::packet::tcp::TcpFlags;
///
/// assert_eq!(classify_tcp_flags(TcpFlags::SYN | TcpFlags::ACK), ProbeOutcome::Responded);
/// assert_eq!(classify_tcp_flags(TcpFlags::RST | TcpFlags::ACK), ProbeOutcome::Rejected);
/// ```
pub fn classify_tcp_flags(flags: u8) -> ProbeOutcome {
    let syn_ack = TcpFlags::SYN | TcpFlags::ACK;

    if flags & TcpFlags::RST != 0 {
        ProbeOutcome::Rejected
    } else if flags & syn_ack == syn_ack {
        ProbeOutcome::Responded
    } else {
        ProbeOutcome::NoResponse
    }
}

/// Sends ICMP and SYN probes over raw sockets and connect probes over
/// ordinary ones. What the binaries use.
#[derive(Debug, Default)]
pub struct SystemProber {
    raw: RawProber,
    connect: ConnectProber,
}

impl SystemProber {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Prober for SystemProber {
    async fn probe(&self, request: ProbeRequest) -> Result<ProbeResult, ProbeError> {
        match request.kind {
            ProbeKind::IcmpEcho | ProbeKind::TcpSyn => self.raw.probe(request).await,
            ProbeKind::TcpConnect => self.connect.probe(request).await,
        }
    }

    async fn preflight(&self, kind: ProbeKind) -> Result<(), ProbeError> {
        match kind {
            ProbeKind::IcmpEcho | ProbeKind::TcpSyn => self.raw.preflight(kind).await,
            ProbeKind::TcpConnect => self.connect.preflight(kind).await,
        }
    }
}
