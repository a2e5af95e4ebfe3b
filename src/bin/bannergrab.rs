#![deny(clippy::all)]
#![warn(clippy::pedantic)]

use std::time::Duration;

use log::debug;
use sweepscan::banner::BannerGrabber;
use sweepscan::input::BannerOpts;
use sweepscan::{detail, output, warning};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = BannerOpts::read();
    debug!("Main() `opts` arguments are {opts:?}");

    let grabber = BannerGrabber::new().with_timeout(Duration::from_millis(opts.timeout));
    let (ip, accessible) = (opts.ip, opts.accessible);

    detail!(format!("Scanning IP: {ip}"), false, accessible);
    for &port in &opts.ports {
        detail!(format!("Scanning port {port} on IP {ip}"), false, accessible);

        match grabber.grab(ip, port).await {
            Some(banner) => output!(
                format!("Service banner for port {port} on IP {ip}:\n{banner}\n"),
                false,
                accessible
            ),
            None => warning!(
                format!("No service banner found for port {port} on IP: {ip}\n"),
                false,
                accessible
            ),
        }
    }

    Ok(())
}
