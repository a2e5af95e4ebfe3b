//! The result of a full scan: live hosts, their open ports and banners.
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

use crate::port_strategy::Port;

/// Everything found on one live host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostReport {
    pub host: Ipv4Addr,
    /// Open ports in the order they were discovered.
    pub open_ports: Vec<Port>,
    pub banners: BTreeMap<Port, String>,
}

impl HostReport {
    pub fn new(host: Ipv4Addr) -> Self {
        Self {
            host,
            open_ports: Vec::new(),
            banners: BTreeMap::new(),
        }
    }

    pub fn banner(&self, port: Port) -> Option<&str> {
        self.banners.get(&port).map(String::as_str)
    }

    /// `[22, 80]`, the port list as printed in reports.
    pub fn port_list(&self) -> String {
        let ports = self
            .open_ports
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        format!("[{}]", ports.join(", "))
    }
}

/// Live hosts mapped to their open ports, in discovery order.
///
/// Hosts only enter the report once they answered the discovery probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    hosts: Vec<HostReport>,
    interrupted: bool,
}

impl ScanReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the open ports of `host`. Ports already known are not repeated.
    pub fn insert(&mut self, host: Ipv4Addr, open_ports: impl IntoIterator<Item = Port>) {
        let index = match self.hosts.iter().position(|entry| entry.host == host) {
            Some(index) => index,
            None => {
                self.hosts.push(HostReport::new(host));
                self.hosts.len() - 1
            }
        };

        let entry = &mut self.hosts[index];
        for port in open_ports {
            if !entry.open_ports.contains(&port) {
                entry.open_ports.push(port);
            }
        }
    }

    /// Attaches a banner to an open port. Returns false if the port is not
    /// in the report.
    pub fn set_banner(&mut self, host: Ipv4Addr, port: Port, banner: String) -> bool {
        match self.hosts.iter_mut().find(|entry| entry.host == host) {
            Some(entry) if entry.open_ports.contains(&port) => {
                entry.banners.insert(port, banner);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, host: Ipv4Addr) -> Option<&HostReport> {
        self.hosts.iter().find(|entry| entry.host == host)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostReport> {
        self.hosts.iter()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Every (host, open port) pair, host by host.
    pub fn open_sockets(&self) -> impl Iterator<Item = (Ipv4Addr, Port)> + '_ {
        self.hosts
            .iter()
            .flat_map(|entry| entry.open_ports.iter().map(move |&port| (entry.host, port)))
    }

    /// The plain host to ports mapping.
    pub fn to_map(&self) -> HashMap<Ipv4Addr, Vec<Port>> {
        self.hosts
            .iter()
            .map(|entry| (entry.host, entry.open_ports.clone()))
            .collect()
    }

    /// Set when the scan was stopped before every host was scanned.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub(crate) fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }
}

impl<'a> IntoIterator for &'a ScanReport {
    type Item = &'a HostReport;
    type IntoIter = std::slice::Iter<'a, HostReport>;

    fn into_iter(self) -> Self::IntoIter {
        self.hosts.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(n: u16) -> Port {
        Port::new(n).unwrap()
    }

    const HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    #[test]
    fn keeps_discovery_order() {
        let mut report = ScanReport::new();
        report.insert(HOST, [port(443), port(22), port(80)]);
        report.insert(Ipv4Addr::new(10, 0, 0, 2), Vec::<Port>::new());

        let first = report.get(HOST).unwrap();
        assert_eq!(first.open_ports, [port(443), port(22), port(80)]);
        assert_eq!(first.port_list(), "[443, 22, 80]");
        assert_eq!(report.len(), 2);
        assert_eq!(
            report.iter().map(|h| h.host).collect::<Vec<_>>(),
            [HOST, Ipv4Addr::new(10, 0, 0, 2)]
        );
    }

    #[test]
    fn reinserting_merges_ports() {
        let mut report = ScanReport::new();
        report.insert(HOST, [port(22)]);
        report.insert(HOST, [port(22), port(80)]);

        assert_eq!(report.len(), 1);
        assert_eq!(report.to_map()[&HOST], [port(22), port(80)]);
    }

    #[test]
    fn banners_only_for_open_ports() {
        let mut report = ScanReport::new();
        report.insert(HOST, [port(80)]);

        assert!(report.set_banner(HOST, port(80), "HTTP/1.1 200 OK".to_owned()));
        assert!(!report.set_banner(HOST, port(81), "nope".to_owned()));
        assert!(!report.set_banner(Ipv4Addr::new(10, 0, 0, 9), port(80), "nope".to_owned()));

        let entry = report.get(HOST).unwrap();
        assert_eq!(entry.banner(port(80)), Some("HTTP/1.1 200 OK"));
        assert_eq!(entry.banner(port(81)), None);
    }

    #[test]
    fn open_sockets_walks_every_pair() {
        let mut report = ScanReport::new();
        report.insert(HOST, [port(22), port(80)]);
        report.insert(Ipv4Addr::new(10, 0, 0, 2), [port(443)]);

        let sockets = report.open_sockets().collect::<Vec<_>>();
        assert_eq!(
            sockets,
            [
                (HOST, port(22)),
                (HOST, port(80)),
                (Ipv4Addr::new(10, 0, 0, 2), port(443)),
            ]
        );
    }
}
