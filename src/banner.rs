//! Best-effort service banner grabbing.
//!
//! A grab opens a fresh TCP connection, sends a minimal HTTP request and
//! reads whatever comes back in a single read. Nothing here is an error to
//! the caller: a service that refuses, resets or stays silent simply has no
//! banner.
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time;

use crate::port_strategy::Port;
use crate::probe::connect::connect;
use crate::probe::{ProbeOutcome, ProbeRequest, ProbeResult};

/// How long connecting, sending and reading may each take.
pub const DEFAULT_BANNER_TIMEOUT: Duration = Duration::from_secs(3);
/// Most bytes a single grab reads.
pub const DEFAULT_BANNER_MAX_BYTES: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct BannerGrabber {
    timeout: Duration,
    max_bytes: usize,
}

impl Default for BannerGrabber {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_BANNER_TIMEOUT,
            max_bytes: DEFAULT_BANNER_MAX_BYTES,
        }
    }
}

impl BannerGrabber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The banner of `host:port` as text, or `None` when there is nothing to show.
    ///
    /// Invalid UTF-8 is replaced, never rejected.
    pub async fn grab(&self, host: Ipv4Addr, port: Port) -> Option<String> {
        self.grab_result(host, port)
            .await
            .banner
            .map(|bytes| decode(&bytes))
            .filter(|text| !text.is_empty())
    }

    /// Grabs and reports the raw bytes as a [`ProbeResult`].
    ///
    /// A connection that was accepted is `Responded`, with a banner when the
    /// service wrote anything back. Refused connections are `Rejected`,
    /// everything else is `NoResponse`.
    pub async fn grab_result(&self, host: Ipv4Addr, port: Port) -> ProbeResult {
        let request = ProbeRequest::connect(host, port, self.timeout);

        match self.fetch(SocketAddr::from((host, port.get()))).await {
            Ok(bytes) if bytes.is_empty() => ProbeResult::new(&request, ProbeOutcome::Responded),
            Ok(bytes) => ProbeResult::new(&request, ProbeOutcome::Responded).with_banner(bytes),
            Err(Fetch::Connect(e)) => {
                debug!("No banner from {host}:{port}, connect failed: {e}");
                let outcome = if e.kind() == io::ErrorKind::ConnectionRefused {
                    ProbeOutcome::Rejected
                } else {
                    ProbeOutcome::NoResponse
                };
                ProbeResult::new(&request, outcome)
            }
            Err(Fetch::Exchange(e)) => {
                debug!("No banner from {host}:{port}: {e}");
                ProbeResult::new(&request, ProbeOutcome::Responded)
            }
        }
    }

    async fn fetch(&self, socket: SocketAddr) -> Result<Vec<u8>, Fetch> {
        let mut stream = connect(socket, self.timeout).await.map_err(Fetch::Connect)?;

        let request = http_request(socket.ip().to_string().as_str());
        time::timeout(self.timeout, stream.write_all(request.as_bytes()))
            .await
            .map_err(io::Error::from)
            .and_then(|written| written)
            .map_err(Fetch::Exchange)?;

        let mut buffer = vec![0u8; self.max_bytes];
        let read = time::timeout(self.timeout, stream.read(&mut buffer))
            .await
            .map_err(io::Error::from)
            .and_then(|read| read)
            .map_err(Fetch::Exchange)?;
        buffer.truncate(read);

        if let Err(e) = stream.shutdown().await {
            debug!("Shutdown stream error {e}");
        }
        Ok(buffer)
    }
}

/// Where a grab failed: before the connection existed, or after.
#[derive(Debug)]
enum Fetch {
    Connect(io::Error),
    Exchange(io::Error),
}

fn http_request(host: &str) -> String {
    format!("GET / HTTP/1.1\r\nHost: {host}\r\n\r\n")
}

/// Text form of a banner, with invalid sequences replaced by U+FFFD.
pub fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_names_the_host() {
        assert_eq!(
            http_request("10.0.0.1"),
            "GET / HTTP/1.1\r\nHost: 10.0.0.1\r\n\r\n"
        );
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let text = decode(b"SSH-2.0-\xff\xfeOpenSSH");
        assert!(text.starts_with("SSH-2.0-"));
        assert!(text.ends_with("OpenSSH"));
        assert!(text.contains('\u{FFFD}'));
    }

    #[test]
    fn builder_overrides_defaults() {
        let grabber = BannerGrabber::new()
            .with_timeout(Duration::from_millis(250))
            .with_max_bytes(16);

        assert_eq!(grabber.timeout(), Duration::from_millis(250));
        assert_eq!(grabber.max_bytes, 16);
        assert_eq!(BannerGrabber::default().timeout(), DEFAULT_BANNER_TIMEOUT);
    }
}
