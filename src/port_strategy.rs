//! Provides the validated [`Port`] type and the order candidate ports are probed in.
use crate::address::InputError;
use crate::input::{PortRange, ScanOrder};
use rand::seq::SliceRandom;
use serde_derive::Deserialize;
use std::fmt;
use std::num::NonZeroU16;
use std::str::FromStr;

/// Lowest port a probe may target.
pub const LOWEST_PORT_NUMBER: u16 = 1;
/// Highest port a probe may target.
pub const TOP_PORT_NUMBER: u16 = 65535;
/// Last port of the default candidate range, `1..=1023`.
pub const TOP_WELL_KNOWN_PORT: u16 = 1023;

/// A TCP port between 1 and 65535.
///
/// Validated once where input enters the program; the core only ever sees
/// this type, never raw strings.
///
/// ```rust
/// # use sweepscan::port_strategy::Port;
/// let port: Port = "443".parse().unwrap();
/// assert_eq!(port.get(), 443);
/// assert!("0".parse::<Port>().is_err());
/// assert!("http".parse::<Port>().is_err());
/// ```
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "u16")]
pub struct Port(NonZeroU16);

impl Port {
    pub const MIN: Port = Port(NonZeroU16::MIN);
    pub const MAX: Port = Port(NonZeroU16::MAX);
    /// The last port of the default candidate range.
    pub const LAST_WELL_KNOWN: Port = match Port::new(TOP_WELL_KNOWN_PORT) {
        Some(port) => port,
        None => Port::MAX,
    };

    /// Returns `None` for port 0.
    pub const fn new(port: u16) -> Option<Self> {
        match NonZeroU16::new(port) {
            Some(p) => Some(Self(p)),
            None => None,
        }
    }

    /// The port number.
    pub const fn get(self) -> u16 {
        self.0.get()
    }
}

impl TryFrom<u16> for Port {
    type Error = InputError;

    fn try_from(port: u16) -> Result<Self, Self::Error> {
        Port::new(port).ok_or_else(|| {
            InputError::Port(format!(
                "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}"
            ))
        })
    }
}

impl FromStr for Port {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let port: u16 = s
            .parse()
            .map_err(|_| InputError::Port(format!("Invalid port number '{s}'")))?;
        Port::try_from(port)
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> Self {
        port.get()
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Every port in `start..=end`.
pub fn port_range(start: Port, end: Port) -> impl Iterator<Item = Port> {
    (start.get()..=end.get()).filter_map(Port::new)
}

/// The default candidate ports, 1 through 1023.
pub fn well_known_ports() -> Vec<Port> {
    (LOWEST_PORT_NUMBER..=TOP_WELL_KNOWN_PORT)
        .filter_map(Port::new)
        .collect()
}

/// Where the candidate ports come from and in which order they are probed.
#[derive(Debug)]
pub enum PortStrategy {
    Manual(Vec<Port>),
    Serial(SerialRange),
    Random(RandomRange),
}

impl PortStrategy {
    /// Chooses a strategy. An explicit port list wins over a range; with
    /// neither, the well-known range is used.
    pub fn pick(range: Option<PortRange>, ports: Option<Vec<Port>>, order: ScanOrder) -> Self {
        let range = range.unwrap_or_default();
        match (order, ports) {
            (ScanOrder::Serial, None) => PortStrategy::Serial(SerialRange {
                start: range.start,
                end: range.end,
            }),
            (ScanOrder::Random, None) => PortStrategy::Random(RandomRange {
                start: range.start,
                end: range.end,
            }),
            (ScanOrder::Serial, Some(ports)) => PortStrategy::Manual(ports),
            (ScanOrder::Random, Some(mut ports)) => {
                ports.shuffle(&mut rand::rng());
                PortStrategy::Manual(ports)
            }
        }
    }

    /// The candidate ports, in the order they should be probed.
    pub fn order(&self) -> Vec<Port> {
        match self {
            PortStrategy::Manual(ports) => ports.clone(),
            PortStrategy::Serial(range) => range.generate(),
            PortStrategy::Random(range) => range.generate(),
        }
    }
}

/// A port range that knows the order to probe its ports in.
trait RangeOrder {
    fn generate(&self) -> Vec<Port>;
}

/// Ascending order.
#[derive(Debug)]
pub struct SerialRange {
    start: Port,
    end: Port,
}

impl RangeOrder for SerialRange {
    fn generate(&self) -> Vec<Port> {
        port_range(self.start, self.end).collect()
    }
}

/// Shuffled anew on every call.
#[derive(Debug)]
pub struct RandomRange {
    start: Port,
    end: Port,
}

impl RangeOrder for RandomRange {
    fn generate(&self) -> Vec<Port> {
        let mut ports = port_range(self.start, self.end).collect::<Vec<_>>();
        ports.shuffle(&mut rand::rng());
        ports
    }
}
