use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use mediagate_service::config::Config;

/// Probes the `/healthcheck` endpoint of a running instance.
///
/// The address defaults to the configured bind address, with unspecified IPs replaced by localhost.
pub fn healthcheck(config: Config, addr: Option<SocketAddr>, timeout: u64) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()?;

    let addr = match addr {
        Some(addr) => addr,
        None => probe_addr(&config.bind)?,
    };

    let url = format!("http://{addr}/healthcheck");
    tracing::debug!("Sending request to: {url}");

    match client.get(url).send() {
        Ok(response) if response.status().is_success() => {
            println!("OK");
            Ok(())
        }
        Ok(response) => {
            println!("ERROR");
            anyhow::bail!("mediagate ({addr}) is unhealthy. Status: {}", response.status())
        }
        Err(error) => {
            println!("ERROR");
            anyhow::bail!("Failed to check mediagate ({addr}) health: {error}")
        }
    }
}

fn probe_addr(bind: &str) -> anyhow::Result<SocketAddr> {
    let mut addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address: {bind}"))?;
    if addr.ip().is_unspecified() {
        let localhost = match addr {
            SocketAddr::V4(_) => [127, 0, 0, 1].into(),
            SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
        };
        addr.set_ip(localhost);
    }
    Ok(addr)
}
