use std::collections::HashSet;
use std::net::IpAddr;

use anyhow::{Context, bail};

/// Resolve the relay allow-list hostnames to IPv4 addresses once, at
/// startup. A host that resolves to no IPv4 address is a configuration
/// error, not silently ignored: a relay fleet member that can never be
/// recognized would make its clients starve for `NotEnoughRelays`.
pub async fn resolve(hosts: &[String]) -> anyhow::Result<HashSet<IpAddr>> {
    let mut resolved = HashSet::new();

    for host in hosts {
        let addrs = tokio::net::lookup_host((host.as_str(), 0))
            .await
            .with_context(|| format!("resolving relay allow-list host {host:?}"))?;

        let mut found = false;
        for addr in addrs {
            if addr.ip().is_ipv4() {
                resolved.insert(addr.ip());
                found = true;
            }
        }

        if !found {
            bail!("relay allow-list host {host:?} has no IPv4 address");
        }
    }

    Ok(resolved)
}
