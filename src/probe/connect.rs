//! Connect prober: a full TCP handshake through an ordinary socket.
//!
//! Needs no privileges, so it stands in for SYN probes when raw sockets are
//! not available.
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time;

use super::{ProbeError, ProbeKind, ProbeOutcome, ProbeRequest, ProbeResult, Prober};

/// Sends [`ProbeKind::TcpConnect`] probes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectProber;

impl ConnectProber {
    pub fn new() -> Self {
        Self
    }
}

/// Opens a connection to `socket`, giving up after `timeout`.
pub(crate) async fn connect(socket: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    time::timeout(timeout, async move { TcpStream::connect(socket).await }).await?
}

#[async_trait]
impl Prober for ConnectProber {
    async fn probe(&self, request: ProbeRequest) -> Result<ProbeResult, ProbeError> {
        if request.kind != ProbeKind::TcpConnect {
            return Err(ProbeError::Unsupported(request.kind));
        }

        let port = request.require_port()?;
        let socket = SocketAddr::from((request.host, port.get()));

        match connect(socket, request.timeout).await {
            Ok(mut stream) => {
                debug!("Connection was successful, shutting down stream {socket}");
                if let Err(e) = stream.shutdown().await {
                    debug!("Shutdown stream error {e}");
                }
                Ok(ProbeResult::new(&request, ProbeOutcome::Responded))
            }
            Err(e) => classify_connect_error(&request, e),
        }
    }

    async fn preflight(&self, kind: ProbeKind) -> Result<(), ProbeError> {
        match kind {
            ProbeKind::TcpConnect => Ok(()),
            kind => Err(ProbeError::Unsupported(kind)),
        }
    }
}

fn classify_connect_error(
    request: &ProbeRequest,
    error: io::Error,
) -> Result<ProbeResult, ProbeError> {
    match error.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => {
            Ok(ProbeResult::new(request, ProbeOutcome::Rejected))
        }
        // `time::timeout` elapsing converts into TimedOut.
        io::ErrorKind::TimedOut => Ok(ProbeResult::new(request, ProbeOutcome::NoResponse)),
        _ if error.to_string().to_lowercase().contains("too many open files") => {
            Err(ProbeError::Socket {
                socket: "TCP",
                source: error,
            })
        }
        _ => Err(ProbeError::Io {
            kind: request.kind,
            host: request.host,
            source: error,
        }),
    }
}
