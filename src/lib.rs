//! This crate exposes the internal functionality of the sweepscan network
//! scanner.
//!
//! sweepscan finds live hosts in an IPv4 range with ICMP echo probes, then
//! finds the open TCP ports of every live host with SYN probes, and can
//! grab a service banner from each open port.
//!
//! ## Architecture Overview
//!
//! The scan is driven by [`Scanner`](crate::scanner::Scanner), which sends
//! every probe through a [`Prober`](crate::probe::Prober) and runs them on a
//! bounded [`Dispatcher`](crate::dispatcher::Dispatcher):
//!
//! 1. **Input Processing**: the network and netmask become a
//!    [`TargetRange`](crate::address::TargetRange), port lists become
//!    validated [`Port`](crate::port_strategy::Port)s
//! 2. **Ping Sweep**: every host of the range gets one ICMP echo
//! 3. **Port Scan**: every live host, one at a time, gets one SYN per
//!    candidate port (1-1023 unless told otherwise)
//! 4. **Banners**: optionally, every open port is asked for a banner
//!
//! Hosts that do not answer the sweep are never port scanned.
//!
//! ## Basic Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sweepscan::address::TargetRange;
//! use sweepscan::probe::SystemProber;
//! use sweepscan::scanner::{ScanConfig, Scanner};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let range = TargetRange::parse("192.168.1.0", "24")?;
//! let scanner = Scanner::new(Arc::new(SystemProber::new()), ScanConfig::default());
//!
//! // Raw sockets: needs root or CAP_NET_RAW.
//! let report = scanner.get_live_hosts_and_ports(&range).await?;
//! for host in &report {
//!     println!("{} -> {}", host.host, host.port_list());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! A probe that gets no answer is not an error, it is
//! [`ProbeOutcome::NoResponse`](crate::probe::ProbeOutcome). Errors are
//! split by reach: a socket that cannot be opened aborts the scan, while a
//! single failing probe is logged and skipped, see
//! [`FaultPolicy`](crate::dispatcher::FaultPolicy).

pub mod tui;

pub mod input;

pub mod address;

pub mod port_strategy;

pub mod probe;

pub mod banner;

pub mod dispatcher;

pub mod scanner;
