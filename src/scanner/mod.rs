//! Core functionality for actual scanning behaviour.
//!
//! A full scan runs in stages, each finishing before the next starts:
//! a ping sweep over the target range, a port scan of every live host (one
//! host at a time, its ports concurrently) and, if asked for, a banner grab
//! of every open port.
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use log::debug;
use thiserror::Error;

use crate::address::{InputError, TargetRange};
use crate::banner::{BannerGrabber, DEFAULT_BANNER_TIMEOUT};
use crate::dispatcher::{default_workers, DispatchError, Dispatcher, FaultPolicy, Progress, StopSignal};
use crate::port_strategy::{well_known_ports, Port};
use crate::probe::{ProbeError, ProbeKind, ProbeRequest, Prober, DEFAULT_PROBE_TIMEOUT};

mod report;
pub use report::{HostReport, ScanReport};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Input(#[from] InputError),

    /// Probes of a kind could not be sent at all.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Runtime settings of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Concurrent probes per stage.
    pub workers: usize,
    pub probe_timeout: Duration,
    pub banner_timeout: Duration,
    /// Candidate ports, probed in this order.
    pub ports: Vec<Port>,
    /// [`ProbeKind::TcpSyn`] or [`ProbeKind::TcpConnect`].
    pub port_probe: ProbeKind,
    pub fault_policy: FaultPolicy,
    /// Grab a banner from every open port once ports are known.
    pub banners: bool,
    pub greppable: bool,
    pub accessible: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            banner_timeout: DEFAULT_BANNER_TIMEOUT,
            ports: well_known_ports(),
            port_probe: ProbeKind::TcpSyn,
            fault_policy: FaultPolicy::Isolate,
            banners: false,
            greppable: false,
            accessible: false,
        }
    }
}

/// Runs ping sweeps, port scans and banner grabs through one [`Prober`].
pub struct Scanner {
    prober: Arc<dyn Prober>,
    grabber: BannerGrabber,
    config: ScanConfig,
    stop: StopSignal,
}

impl Scanner {
    pub fn new(prober: Arc<dyn Prober>, config: ScanConfig) -> Self {
        Self {
            prober,
            grabber: BannerGrabber::new().with_timeout(config.banner_timeout),
            config,
            stop: StopSignal::new(),
        }
    }

    /// Shares a stop flag with the scanner; once set, no new probes start.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.config.workers)
            .with_policy(self.config.fault_policy)
            .with_stop_signal(self.stop.clone())
    }

    fn progress<R>(
        &self,
        label: String,
        describe: impl Fn(&R) -> String + Send + Sync + 'static,
    ) -> Progress<R> {
        if self.config.greppable {
            Progress::silent()
        } else {
            Progress::stdout(label).describe(describe)
        }
    }

    /// Returns the hosts of `range` that answered an ICMP echo, in the
    /// order they answered.
    pub async fn ping_sweep(&self, range: &TargetRange) -> Result<Vec<Ipv4Addr>, ScanError> {
        self.prober.preflight(ProbeKind::IcmpEcho).await?;

        let hosts = range.hosts().collect::<Vec<_>>();
        debug!("Sweeping {} hosts of {} with {} workers", hosts.len(), range, self.config.workers);

        let timeout = self.config.probe_timeout;
        let prober = Arc::clone(&self.prober);
        let worker = move |host: Ipv4Addr| {
            let prober = Arc::clone(&prober);
            async move {
                let result = prober.probe(ProbeRequest::echo(host, timeout)).await?;
                Ok::<_, ProbeError>(result.is_responded().then_some(host))
            }
        };

        let accessible = self.config.accessible;
        let progress = self.progress("Scanning".to_owned(), move |host: &Ipv4Addr| {
            if accessible {
                format!("Host {host} is online.")
            } else {
                format!("Host {} is online.", host.to_string().green())
            }
        });

        let live = self.dispatcher().run_all(hosts, worker, progress).await?;
        Ok(live)
    }

    /// Returns the ports of `host` that answered, in the order they answered.
    ///
    /// Only call this for hosts a sweep found alive.
    pub async fn port_scan(&self, host: Ipv4Addr, ports: &[Port]) -> Result<Vec<Port>, ScanError> {
        let kind = self.config.port_probe;
        if kind == ProbeKind::IcmpEcho {
            return Err(ProbeError::Unsupported(kind).into());
        }
        self.prober.preflight(kind).await?;

        let timeout = self.config.probe_timeout;
        let prober = Arc::clone(&self.prober);
        let worker = move |port: Port| {
            let prober = Arc::clone(&prober);
            async move {
                let request = ProbeRequest::syn(host, port, timeout).with_kind(kind);
                let result = prober.probe(request).await?;
                Ok::<_, ProbeError>(result.is_responded().then_some(port))
            }
        };

        let accessible = self.config.accessible;
        let progress = self.progress(format!("Scanning {host}:"), move |port: &Port| {
            if accessible {
                format!("Port {port} is open on host {host}")
            } else {
                format!("Port {} is open on host {}", port.to_string().purple(), host)
            }
        });

        let open = self.dispatcher().run_all(ports.to_vec(), worker, progress).await?;
        Ok(open)
    }

    /// Sweeps `range`, then scans the configured ports of every live host.
    ///
    /// Hosts that did not answer the sweep are never port scanned. With
    /// banners enabled, every open port is grabbed afterwards. A triggered
    /// stop signal ends the scan early with what was found so far.
    pub async fn get_live_hosts_and_ports(
        &self,
        range: &TargetRange,
    ) -> Result<ScanReport, ScanError> {
        let live = self.ping_sweep(range).await?;
        let mut report = ScanReport::new();

        for host in live {
            if self.stop.is_set() {
                break;
            }
            let open = self.port_scan(host, &self.config.ports).await?;
            report.insert(host, open);
        }

        if self.config.banners && !self.stop.is_set() {
            self.attach_banners(&mut report).await?;
        }

        if self.stop.is_set() {
            report.mark_interrupted();
        }
        Ok(report)
    }

    /// Same as [`get_live_hosts_and_ports`](Self::get_live_hosts_and_ports)
    /// for a network and netmask given as text.
    pub async fn scan_network(&self, network: &str, netmask: &str) -> Result<ScanReport, ScanError> {
        let range = TargetRange::parse(network, netmask)?;
        self.get_live_hosts_and_ports(&range).await
    }

    /// The banner of `host:port`, if the service sent one.
    pub async fn get_service_banner(&self, host: Ipv4Addr, port: Port) -> Option<String> {
        self.grabber.grab(host, port).await
    }

    /// Grabs a banner from every open port in `report` and attaches those found.
    pub async fn attach_banners(&self, report: &mut ScanReport) -> Result<(), ScanError> {
        let sockets = report.open_sockets().collect::<Vec<_>>();
        if sockets.is_empty() {
            return Ok(());
        }

        let grabber = self.grabber;
        let worker = move |(host, port): (Ipv4Addr, Port)| async move {
            let banner = grabber.grab(host, port).await;
            Ok::<_, ProbeError>(banner.map(|banner| (host, port, banner)))
        };

        let progress = self.progress(
            "Grabbing banners".to_owned(),
            |(host, port, _): &(Ipv4Addr, Port, String)| format!("Found a banner on {host}:{port}"),
        );

        for (host, port, banner) in self.dispatcher().run_all(sockets, worker, progress).await? {
            report.set_banner(host, port, banner);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeOutcome, ProbeResult};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::io;
    use std::sync::Mutex;

    /// Answers echo for `live` hosts and SYN for `open` ports on them.
    #[derive(Default)]
    struct Responder {
        live: HashSet<Ipv4Addr>,
        open: HashSet<u16>,
        probed: Mutex<Vec<ProbeRequest>>,
        deny: Option<ProbeKind>,
    }

    #[async_trait]
    impl Prober for Responder {
        async fn probe(&self, request: ProbeRequest) -> Result<ProbeResult, ProbeError> {
            self.probed.lock().unwrap().push(request);

            let outcome = match request.port {
                None if self.live.contains(&request.host) => ProbeOutcome::Responded,
                None => ProbeOutcome::NoResponse,
                Some(port) if self.open.contains(&port.get()) => ProbeOutcome::Responded,
                Some(_) => ProbeOutcome::Rejected,
            };
            Ok(ProbeResult::new(&request, outcome))
        }

        async fn preflight(&self, kind: ProbeKind) -> Result<(), ProbeError> {
            match self.deny {
                Some(denied) if denied == kind => Err(ProbeError::Socket {
                    socket: "raw ICMP",
                    source: io::Error::from(io::ErrorKind::PermissionDenied),
                }),
                _ => Ok(()),
            }
        }
    }

    fn config(ports: &[u16]) -> ScanConfig {
        ScanConfig {
            workers: 4,
            ports: ports.iter().filter_map(|&p| Port::new(p)).collect(),
            greppable: true,
            ..ScanConfig::default()
        }
    }

    #[tokio::test]
    async fn sweep_then_scan_live_hosts_only() {
        let responder = Arc::new(Responder {
            live: HashSet::from([Ipv4Addr::new(192, 168, 1, 3)]),
            open: HashSet::from([80]),
            ..Responder::default()
        });
        let scanner = Scanner::new(responder.clone(), config(&[22, 80, 443]));

        let report = scanner.scan_network("192.168.1.0", "29").await.unwrap();

        assert_eq!(report.len(), 1);
        assert_eq!(
            report.get(Ipv4Addr::new(192, 168, 1, 3)).unwrap().open_ports,
            [Port::new(80).unwrap()]
        );
        assert!(!report.is_interrupted());

        let probed = responder.probed.lock().unwrap();
        assert_eq!(probed.iter().filter(|r| r.kind == ProbeKind::IcmpEcho).count(), 6);
        assert!(probed
            .iter()
            .filter(|r| r.kind == ProbeKind::TcpSyn)
            .all(|r| r.host == Ipv4Addr::new(192, 168, 1, 3)));
    }

    #[tokio::test]
    async fn connect_probes_when_configured() {
        let responder = Arc::new(Responder {
            live: HashSet::from([Ipv4Addr::new(10, 0, 0, 1)]),
            open: HashSet::from([22]),
            ..Responder::default()
        });
        let mut config = config(&[22, 23]);
        config.port_probe = ProbeKind::TcpConnect;
        let scanner = Scanner::new(responder.clone(), config);

        let ports = scanner.config().ports.clone();
        let open = scanner
            .port_scan(Ipv4Addr::new(10, 0, 0, 1), &ports)
            .await
            .unwrap();

        assert_eq!(open, [Port::new(22).unwrap()]);
        assert!(responder
            .probed
            .lock()
            .unwrap()
            .iter()
            .all(|r| r.kind == ProbeKind::TcpConnect));
    }

    #[tokio::test]
    async fn failed_preflight_aborts_before_probing() {
        let responder = Arc::new(Responder {
            deny: Some(ProbeKind::IcmpEcho),
            ..Responder::default()
        });
        let scanner = Scanner::new(responder.clone(), config(&[22]));

        let result = scanner.scan_network("10.0.0.0", "24").await;

        assert!(matches!(result, Err(ScanError::Probe(ProbeError::Socket { .. }))));
        assert!(responder.probed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_input_is_rejected() {
        let scanner = Scanner::new(Arc::new(Responder::default()), config(&[22]));
        let result = scanner.scan_network("10.0.0.1", "24").await;

        assert!(matches!(
            result,
            Err(ScanError::Input(InputError::HostBitsSet { .. }))
        ));
    }

    #[tokio::test]
    async fn echo_is_not_a_port_probe() {
        let mut config = config(&[22]);
        config.port_probe = ProbeKind::IcmpEcho;
        let scanner = Scanner::new(Arc::new(Responder::default()), config);

        let result = scanner.port_scan(Ipv4Addr::LOCALHOST, &[Port::new(22).unwrap()]).await;
        assert!(matches!(
            result,
            Err(ScanError::Probe(ProbeError::Unsupported(ProbeKind::IcmpEcho)))
        ));
    }

    #[tokio::test]
    async fn stopped_scan_is_marked_interrupted() {
        let stop = StopSignal::new();
        stop.trigger();
        let responder = Arc::new(Responder {
            live: HashSet::from([Ipv4Addr::new(10, 0, 0, 1)]),
            ..Responder::default()
        });
        let scanner = Scanner::new(responder, config(&[22])).with_stop_signal(stop);

        let report = scanner.scan_network("10.0.0.0", "30").await.unwrap();

        assert!(report.is_empty());
        assert!(report.is_interrupted());
    }

    #[test]
    fn default_config() {
        let config = ScanConfig::default();
        assert_eq!(config.probe_timeout, Duration::from_secs(1));
        assert_eq!(config.banner_timeout, Duration::from_secs(3));
        assert_eq!(config.ports.len(), 1023);
        assert_eq!(config.port_probe, ProbeKind::TcpSyn);
        assert_eq!(config.fault_policy, FaultPolicy::Isolate);
        assert!(config.workers >= 1);
    }
}
