//! Provides the target range a sweep runs over: a network address plus a mask.
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use cidr_utils::cidr::{IpCidr, Ipv4Cidr};
use thiserror::Error;

/// Raised when user input can not be turned into something the core accepts.
///
/// These are always fatal: the run does not start.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    /// The network part is not an IPv4 address.
    #[error("'{0}' is not a valid IPv4 network address")]
    Network(String),

    /// The mask is neither a prefix length nor a dotted netmask.
    #[error("'{0}' is not a valid netmask (expected a prefix length such as 24 or /24, or a mask such as 255.255.255.0)")]
    Netmask(String),

    /// The network address has bits set outside the mask.
    #[error("{network}/{prefix} has host bits set")]
    HostBitsSet { network: Ipv4Addr, prefix: u8 },

    /// IPv6 targets are not swept.
    #[error("'{0}' is an IPv6 network, only IPv4 is supported")]
    Ipv6(String),

    /// A port that is not a number between 1 and 65535.
    #[error("{0}")]
    Port(String),
}

/// A network address plus a prefix length.
///
/// Expands deterministically to its usable host addresses, in ascending
/// order. The network and broadcast addresses are left out unless the
/// prefix is /31 or /32, where every address is a host.
///
/// ```rust
/// # use sweepscan::address::TargetRange;
/// let range = TargetRange::parse("10.0.0.0", "/30").unwrap();
/// let hosts: Vec<_> = range.hosts().map(|h| h.to_string()).collect();
///
/// assert_eq!(hosts, ["10.0.0.1", "10.0.0.2"]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetRange {
    cidr: Ipv4Cidr,
}

impl TargetRange {
    /// Builds a range from the two positionals the sweep binary takes.
    ///
    /// `netmask` may be a prefix length (`24`, `/24`) or a dotted mask
    /// (`255.255.255.0`).
    pub fn parse(network: &str, netmask: &str) -> Result<Self, InputError> {
        let network = network.trim();
        let address = match IpAddr::from_str(network) {
            Ok(IpAddr::V4(v4)) => v4,
            Ok(IpAddr::V6(_)) => return Err(InputError::Ipv6(network.to_owned())),
            Err(_) => return Err(InputError::Network(network.to_owned())),
        };

        let prefix = parse_netmask(netmask)?;
        Self::new(address, prefix)
    }

    /// Builds a range, rejecting networks with host bits set.
    pub fn new(network: Ipv4Addr, prefix: u8) -> Result<Self, InputError> {
        if prefix > 32 {
            return Err(InputError::Netmask(prefix.to_string()));
        }

        let cidr = Ipv4Cidr::new(network, prefix)
            .map_err(|_| InputError::HostBitsSet { network, prefix })?;

        Ok(Self { cidr })
    }

    /// The network address.
    pub fn network(&self) -> Ipv4Addr {
        self.cidr.first_address()
    }

    /// The prefix length.
    pub fn prefix(&self) -> u8 {
        self.cidr.network_length()
    }

    /// Number of hosts [`hosts`](Self::hosts) yields.
    pub fn len(&self) -> usize {
        let (first, last) = self.host_bounds();
        (last - first) as usize + 1
    }

    /// Always false, every valid range holds at least one host.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The usable hosts of the range, in ascending order.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let (first, last) = self.host_bounds();
        (first..=last).map(Ipv4Addr::from)
    }

    fn host_bounds(&self) -> (u32, u32) {
        let first = u32::from(self.cidr.first_address());
        let last = u32::from(self.cidr.last_address());

        if self.prefix() >= 31 {
            (first, last)
        } else {
            (first + 1, last - 1)
        }
    }
}

impl FromStr for TargetRange {
    type Err = InputError;

    /// Parses `network/prefix` notation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((network, mask)) => Self::parse(network, mask),
            None => match IpCidr::from_str(s.trim()) {
                Ok(IpCidr::V4(cidr)) => Ok(Self { cidr }),
                Ok(IpCidr::V6(_)) => Err(InputError::Ipv6(s.to_owned())),
                Err(_) => Err(InputError::Network(s.to_owned())),
            },
        }
    }
}

impl fmt::Display for TargetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix())
    }
}

/// Turns a prefix length or a dotted netmask into a prefix length.
fn parse_netmask(netmask: &str) -> Result<u8, InputError> {
    let trimmed = netmask.trim();
    let bare = trimmed.strip_prefix('/').unwrap_or(trimmed);

    if let Ok(prefix) = bare.parse::<u8>() {
        if prefix <= 32 {
            return Ok(prefix);
        }
        return Err(InputError::Netmask(netmask.to_owned()));
    }

    let mask = Ipv4Addr::from_str(bare)
        .map(u32::from)
        .map_err(|_| InputError::Netmask(netmask.to_owned()))?;

    // Contiguous ones followed by zeros only.
    if mask.leading_ones() + mask.trailing_zeros() != 32 {
        return Err(InputError::Netmask(netmask.to_owned()));
    }

    Ok(mask.leading_ones() as u8)
}

#[cfg(test)]
mod tests {
    use super::{parse_netmask, InputError, TargetRange};
    use parameterized::parameterized;
    use std::net::Ipv4Addr;

    #[test]
    fn slash_30_has_two_hosts() {
        let range = TargetRange::parse("10.0.0.0", "/30").unwrap();
        let hosts = range.hosts().collect::<Vec<_>>();

        assert_eq!(
            hosts,
            [Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
        );
        assert_eq!(range.len(), 2);
    }

    #[parameterized(prefix = { 8, 16, 22, 24, 27, 29, 30 })]
    fn host_count_excludes_network_and_broadcast(prefix: u8) {
        let range = TargetRange::new(Ipv4Addr::new(10, 0, 0, 0), prefix).unwrap();
        let expected = (1usize << (32 - prefix)) - 2;

        assert_eq!(range.len(), expected);
        assert_eq!(range.hosts().count(), expected);
        assert!(!range.hosts().any(|h| h == range.network()));
        assert!(!range
            .hosts()
            .any(|h| h == Ipv4Addr::from(u32::from(range.network()) + (1 << (32 - prefix)) - 1)));
    }

    #[test]
    fn slash_31_and_32_keep_every_address() {
        let pair = TargetRange::parse("192.168.1.4", "31").unwrap();
        assert_eq!(
            pair.hosts().collect::<Vec<_>>(),
            [Ipv4Addr::new(192, 168, 1, 4), Ipv4Addr::new(192, 168, 1, 5)]
        );

        let single = TargetRange::parse("192.168.1.4", "32").unwrap();
        assert_eq!(
            single.hosts().collect::<Vec<_>>(),
            [Ipv4Addr::new(192, 168, 1, 4)]
        );
    }

    #[test]
    fn hosts_are_ascending_and_unique() {
        let range = TargetRange::parse("172.16.0.0", "255.255.255.0").unwrap();
        let hosts = range.hosts().collect::<Vec<_>>();

        assert!(hosts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(hosts.first(), Some(&Ipv4Addr::new(172, 16, 0, 1)));
        assert_eq!(hosts.last(), Some(&Ipv4Addr::new(172, 16, 0, 254)));
    }

    #[parameterized(input = { "24", "/24", " 24 ", "255.255.255.0", "/255.255.255.0" })]
    fn netmask_forms(input: &str) {
        assert_eq!(parse_netmask(input), Ok(24));
    }

    #[parameterized(input = { "33", "abc", "255.0.255.0", "", "/" })]
    fn bad_netmasks(input: &str) {
        assert!(matches!(parse_netmask(input), Err(InputError::Netmask(_))));
    }

    #[test]
    fn host_bits_are_rejected() {
        assert_eq!(
            TargetRange::parse("10.0.0.1", "24"),
            Err(InputError::HostBitsSet {
                network: Ipv4Addr::new(10, 0, 0, 1),
                prefix: 24
            })
        );
    }

    #[test]
    fn bad_networks() {
        assert!(matches!(
            TargetRange::parse("10.0.0", "24"),
            Err(InputError::Network(_))
        ));
        assert!(matches!(
            TargetRange::parse("::1", "128"),
            Err(InputError::Ipv6(_))
        ));
    }

    #[test]
    fn parses_slash_notation() {
        let range: TargetRange = "192.168.0.0/30".parse().unwrap();
        assert_eq!(range.to_string(), "192.168.0.0/30");
        assert_eq!(range.len(), 2);
    }
}
