#![deny(clippy::all)]
#![warn(clippy::pedantic)]

use std::sync::Arc;

use log::debug;
use sweepscan::dispatcher::StopSignal;
use sweepscan::input::{Config, Opts};
use sweepscan::probe::SystemProber;
use sweepscan::scanner::Scanner;
use sweepscan::{detail, host_ports, output, warning};

/// Exit code of a process ended by SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut opts = Opts::read();
    if !opts.no_config {
        let config = Config::read(opts.config_path.clone())?;
        opts.merge(&config);
    }
    debug!("Main() `opts` arguments are {opts:?}");

    let range = opts.target()?;
    let config = opts.scan_config();
    let (greppable, accessible) = (config.greppable, config.accessible);

    detail!(
        format!(
            "Sweeping {} ({} hosts) with {} workers",
            range,
            range.len(),
            config.workers
        ),
        greppable,
        accessible
    );

    let stop = StopSignal::new();
    watch_ctrl_c(stop.clone(), greppable, accessible);

    let scanner = Scanner::new(Arc::new(SystemProber::new()), config).with_stop_signal(stop);
    let report = scanner.get_live_hosts_and_ports(&range).await?;

    if !greppable {
        println!();
    }
    if report.is_interrupted() {
        warning!("Scan interrupted, results are partial.", greppable, accessible);
    }
    if report.is_empty() {
        warning!(
            format!("No live hosts found in {range}."),
            greppable,
            accessible
        );
    }

    for host in &report {
        host_ports!(host.host, host.port_list(), greppable, accessible);
        for (port, banner) in &host.banners {
            output!(
                format!("Service banner for port {port} on IP {}:\n{banner}\n", host.host),
                greppable,
                accessible
            );
        }
    }

    Ok(())
}

/// The first Ctrl-C stops new probes and lets the scan report what it has;
/// the second one exits straight away.
fn watch_ctrl_c(stop: StopSignal, greppable: bool, accessible: bool) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        stop.trigger();
        warning!(
            "\nStopping, waiting for probes in flight. Press Ctrl-C again to quit.",
            greppable,
            accessible
        );

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });
}
