//! Provides a means to read, parse and hold configuration options for scans.
use std::fs;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use serde_derive::Deserialize;

use crate::address::{InputError, TargetRange};
use crate::dispatcher::{default_workers, FaultPolicy};
use crate::port_strategy::{Port, PortStrategy};
use crate::probe::ProbeKind;
use crate::scanner::ScanConfig;

const DEFAULT_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_BANNER_TIMEOUT_MS: u64 = 3_000;
const CONFIG_FILE_NAME: &str = ".sweepscan.toml";

/// Represents the strategy in which the port scanning will run.
///   - Serial will run from start to end, for example 1 to 1_023.
///   - Random will randomize the order in which ports will be scanned.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanOrder {
    #[default]
    Serial,
    Random,
}

/// An inclusive range of candidate ports. Defaults to the well-known ports.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: Port,
    pub end: Port,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: Port::MIN,
            end: Port::LAST_WELL_KNOWN,
        }
    }
}

pub type Ports = Vec<Port>;

/// Parses `80,443,1-1000` style lists into sorted, unique ports.
pub fn parse_ports_and_ranges(input: &str) -> Result<Ports, String> {
    let mut ports = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('-') {
            ports.extend(parse_port_range(part)?);
        } else {
            ports.push(parse_single_port(part)?);
        }
    }

    if ports.is_empty() {
        return Err(String::from("No valid ports or ranges provided"));
    }

    ports.sort_unstable();
    ports.dedup();

    Ok(ports)
}

/// Parses a `start-end` range such as `1-1000`.
pub fn parse_range(range_str: &str) -> Result<PortRange, String> {
    let Some((start, end)) = range_str.split_once('-').filter(|(_, end)| !end.contains('-'))
    else {
        return Err(format!(
            "Invalid range format '{range_str}'. Expected 'start-end'. Example: 1-1000.",
        ));
    };

    let start: Port = start
        .trim()
        .parse()
        .map_err(|_| format!("Invalid start port '{start}' in range '{range_str}'"))?;
    let end: Port = end
        .trim()
        .parse()
        .map_err(|_| format!("Invalid end port '{end}' in range '{range_str}'"))?;

    if start > end {
        return Err(format!(
            "Start port {start} is greater than end port {end} in range '{range_str}'",
        ));
    }

    Ok(PortRange { start, end })
}

fn parse_port_range(range_str: &str) -> Result<Vec<Port>, String> {
    let range = parse_range(range_str)?;
    Ok(crate::port_strategy::port_range(range.start, range.end).collect())
}

fn parse_single_port(port_str: &str) -> Result<Port, String> {
    port_str.parse().map_err(|e: InputError| e.to_string())
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sweepscan",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nARGS:\n{positionals}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Ping sweeps a network, then SYN scans every host that answered.
/// Raw sockets need root or CAP_NET_RAW; --connect scans ports without them.
pub struct Opts {
    /// Network address of the range, e.g. 192.168.1.0.
    pub network: String,

    /// Netmask of the range, as a prefix length (24 or /24) or a dotted mask (255.255.255.0).
    pub netmask: String,

    /// A list of ports and/or port ranges to be scanned on live hosts. Examples: 80,443,8080 or 1-1000 or 1-1000,8080
    #[arg(short, long, value_parser = parse_ports_and_ranges)]
    pub ports: Option<Ports>,

    /// A range of ports to scan on live hosts, as start-end. Example: 1-1000.
    /// Ignored when --ports is given. [default: 1-1023]
    #[arg(short, long, value_parser = parse_range)]
    pub range: Option<PortRange>,

    /// Number of probes in flight at once. Defaults to the number of CPUs.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// The timeout in milliseconds before a probe counts as unanswered. [default: 1000]
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// The timeout in milliseconds for each step of a banner grab. [default: 3000]
    #[arg(long)]
    pub banner_timeout: Option<u64>,

    /// The order of scanning to be performed. The "serial" option will
    /// scan ports in ascending order while the "random" option will scan
    /// ports randomly. [default: serial]
    #[arg(long, value_enum, ignore_case = true)]
    pub scan_order: Option<ScanOrder>,

    /// Grab a service banner from every open port.
    #[arg(long)]
    pub banners: bool,

    /// Find open ports with full TCP connects instead of SYN probes.
    #[arg(long)]
    pub connect: bool,

    /// Abort the whole scan on the first failing probe instead of skipping it.
    #[arg(long)]
    pub strict: bool,

    /// Greppable mode. Only output the hosts and their ports. Useful for grep or outputting to a file.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,
}

impl Opts {
    pub fn read() -> Self {
        Opts::parse()
    }

    /// Fills in what the command line left unset from the user
    /// configuration file, unless `--no-config` was given.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    /// Switches are off unless given, so the file can only turn them on.
    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = config.$field {
                        self.$field |= e;
                    }
                )+
            }
        }

        merge_required!(banners, connect, strict, greppable, accessible);
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if self.$field.is_none() && config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(ports, range, workers, timeout, banner_timeout, scan_order);
    }

    /// The range named by the two positionals.
    pub fn target(&self) -> Result<TargetRange, InputError> {
        TargetRange::parse(&self.network, &self.netmask)
    }

    /// Runtime settings for the scanner, with defaults for anything unset.
    pub fn scan_config(&self) -> ScanConfig {
        let order = self.scan_order.unwrap_or_default();
        let ports = PortStrategy::pick(self.range, self.ports.clone(), order).order();

        ScanConfig {
            workers: self.workers.unwrap_or_else(default_workers),
            probe_timeout: Duration::from_millis(self.timeout.unwrap_or(DEFAULT_TIMEOUT_MS)),
            banner_timeout: Duration::from_millis(
                self.banner_timeout.unwrap_or(DEFAULT_BANNER_TIMEOUT_MS),
            ),
            ports,
            port_probe: if self.connect {
                ProbeKind::TcpConnect
            } else {
                ProbeKind::TcpSyn
            },
            fault_policy: if self.strict {
                FaultPolicy::Propagate
            } else {
                FaultPolicy::Isolate
            },
            banners: self.banners,
            greppable: self.greppable,
            accessible: self.accessible,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "bannergrab",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
)]
/// Service Banner Scanner. Connects to each port, sends an HTTP GET and
/// prints whatever the service answers.
pub struct BannerOpts {
    /// IP address to scan
    pub ip: Ipv4Addr,

    /// Ports to scan (comma-separated)
    #[arg(short, long, required = true, value_delimiter = ',')]
    pub ports: Vec<Port>,

    /// Timeout in milliseconds for connecting, sending and reading.
    #[arg(short, long, default_value_t = DEFAULT_BANNER_TIMEOUT_MS)]
    pub timeout: u64,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,
}

impl BannerOpts {
    pub fn read() -> Self {
        BannerOpts::parse()
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    ports: Option<Ports>,
    range: Option<PortRange>,
    workers: Option<usize>,
    timeout: Option<u64>,
    banner_timeout: Option<u64>,
    scan_order: Option<ScanOrder>,
    banners: Option<bool>,
    connect: Option<bool>,
    strict: Option<bool>,
    greppable: Option<bool>,
    accessible: Option<bool>,
}

impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing default file is an empty config; a missing
    /// custom file or a malformed one is an error.
    ///
    /// # Format
    ///
    /// ports = [22, 80, 443]
    /// range = { start = 1, end = 1000 }
    /// workers = 64
    /// timeout = 500
    /// scan_order = "Random"
    /// banners = true
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_path = match custom_config_path {
            Some(path) if !path.exists() => {
                bail!("Configuration file {} does not exist", path.display())
            }
            Some(path) => path,
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Could not read {}", config_path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Found an error in configuration file {}", config_path.display()))
    }

    /// Parses configuration file content.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Constructs default path to config toml, `~/.sweepscan.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    let mut config_path = dirs::home_dir()?;
    config_path.push(CONFIG_FILE_NAME);
    Some(config_path)
}
