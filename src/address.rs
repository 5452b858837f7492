//! Provides functions to parse target ranges and resolve host names.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use cidr_utils::cidr::{IpCidr, IpInet};
use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use itertools::Itertools;
use log::debug;
use tokio::time;

use crate::error::{Error, Result};

/// Largest number of candidates a single discovery range may expand to.
pub const MAX_RANGE_SIZE: usize = 65_536;

/// Parses a discovery range into candidate addresses.
///
/// Accepts a single address, a CIDR, a dash range such as
/// `192.168.1.10-192.168.1.20`, or a comma-separated list of those. IPv4
/// networks with a prefix shorter than 31 lose their network and broadcast
/// addresses. Input order is kept and duplicates are dropped.
///
/// ```rust
/// # use rustaudit::address::parse_range;
/// let ips = parse_range("192.168.0.0/30").unwrap();
/// assert_eq!(ips.len(), 2);
/// ```
pub fn parse_range(range: &str) -> Result<Vec<IpAddr>> {
    let fail = |reason: String| Error::Discovery {
        range: range.to_owned(),
        reason,
    };

    if range.trim().is_empty() {
        return Err(fail("empty range".to_owned()));
    }

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for part in range.split(',') {
        let part = part.trim();
        let expanded = parse_range_part(part).map_err(fail)?;
        for ip in expanded {
            if seen.insert(ip) {
                candidates.push(ip);
            }
        }
        if candidates.len() > MAX_RANGE_SIZE {
            return Err(fail(format!(
                "range expands to more than {MAX_RANGE_SIZE} addresses"
            )));
        }
    }

    Ok(candidates)
}

fn parse_range_part(part: &str) -> std::result::Result<Vec<IpAddr>, String> {
    if part.is_empty() {
        return Err("empty entry in range list".to_owned());
    }

    if let Ok(ip) = IpAddr::from_str(part) {
        return Ok(vec![ip]);
    }

    if part.contains('/') {
        let inet = IpInet::from_str(part).map_err(|_| format!("invalid CIDR '{part}'"))?;
        return expand_cidr(&inet.network());
    }

    if let Some((start, end)) = part.split_once('-') {
        return expand_dash_range(start.trim(), end.trim());
    }

    Err(format!("'{part}' is not an address, CIDR or range"))
}

fn expand_cidr(cidr: &IpCidr) -> std::result::Result<Vec<IpAddr>, String> {
    let is_v4 = cidr.is_ipv4();
    let host_bits = if is_v4 { 32 } else { 128 } - u32::from(cidr.network_length());
    if host_bits > 16 {
        return Err(format!(
            "network /{} is too large to sweep",
            cidr.network_length()
        ));
    }

    let mut ips = cidr.iter().map(|c| c.address()).collect_vec();
    if is_v4 && cidr.network_length() < 31 && ips.len() > 2 {
        ips.remove(0);
        ips.pop();
    }
    Ok(ips)
}

fn expand_dash_range(start: &str, end: &str) -> std::result::Result<Vec<IpAddr>, String> {
    let start: Ipv4Addr = start
        .parse()
        .map_err(|_| format!("invalid start address '{start}'"))?;
    let end: Ipv4Addr = end
        .parse()
        .map_err(|_| format!("invalid end address '{end}'"))?;

    let (start, end) = (u32::from(start), u32::from(end));
    if start > end {
        return Err("start address must not be greater than end address".to_owned());
    }
    if (end - start) as usize >= MAX_RANGE_SIZE {
        return Err(format!("range spans more than {MAX_RANGE_SIZE} addresses"));
    }

    Ok((start..=end)
        .map(|n| IpAddr::V4(Ipv4Addr::from(n)))
        .collect())
}

/// Resolves a scan target to one address.
///
/// Literal addresses are returned as is. Names go to the system resolver
/// first and to a DNS resolver second; IPv4 answers are preferred. Returns
/// `None` when nothing answers within `timeout`.
pub async fn resolve_host(host: &str, timeout: Duration) -> Option<IpAddr> {
    if let Ok(ip) = IpAddr::from_str(host) {
        return Some(ip);
    }

    match time::timeout(timeout, lookup(host)).await {
        Ok(found) => found,
        Err(_) => {
            debug!("Resolution of {host} timed out after {timeout:?}");
            None
        }
    }
}

async fn lookup(host: &str) -> Option<IpAddr> {
    if let Ok(addrs) = tokio::net::lookup_host((host, 80)).await {
        let ips = addrs.map(|a| a.ip()).collect_vec();
        if let Some(ip) = pick_preferred(&ips) {
            return Some(ip);
        }
    }

    let resolver = get_resolver();
    match resolver.lookup_ip(host).await {
        Ok(answer) => pick_preferred(&answer.iter().collect_vec()),
        Err(e) => {
            debug!("DNS lookup for {host} failed: {e}");
            None
        }
    }
}

fn pick_preferred(ips: &[IpAddr]) -> Option<IpAddr> {
    ips.iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| ips.first())
        .copied()
}

/// Best-effort reverse lookup of an address.
pub async fn reverse_lookup(ip: IpAddr, timeout: Duration) -> Option<String> {
    let resolver = get_resolver();
    let answer = time::timeout(timeout, resolver.reverse_lookup(ip))
        .await
        .ok()?
        .ok()?;
    answer
        .iter()
        .next()
        .map(|name| name.to_utf8().trim_end_matches('.').to_owned())
}

/// Derive a DNS resolver from the system configuration (e.g.
/// `/etc/resolv.conf` on *nix), falling back to a CloudFlare-based resolver.
fn get_resolver() -> TokioAsyncResolver {
    TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
        TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_address() {
        let ips = parse_range("10.0.0.5").unwrap();
        assert_eq!(ips, [IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))]);
    }

    #[test]
    fn parse_cidr_drops_network_and_broadcast() {
        let ips = parse_range("192.168.1.0/24").unwrap();
        assert_eq!(ips.len(), 254);
        assert_eq!(ips[0], IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(ips[253], IpAddr::V4(Ipv4Addr::new(192, 168, 1, 254)));
    }

    #[test]
    fn parse_cidr_with_host_bits_set() {
        let ips = parse_range("192.168.1.77/30").unwrap();
        assert_eq!(
            ips,
            [
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 77)),
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 78)),
            ]
        );
    }

    #[test]
    fn parse_point_to_point_cidr_keeps_both() {
        let ips = parse_range("10.0.0.0/31").unwrap();
        assert_eq!(ips.len(), 2);
    }

    #[test]
    fn parse_dash_range() {
        let ips = parse_range("192.168.1.1-192.168.1.10").unwrap();
        assert_eq!(ips.len(), 10);
        assert_eq!(ips[9], IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)));
    }

    #[test]
    fn parse_list_keeps_order_and_dedups() {
        let ips = parse_range("10.0.0.9, 10.0.0.1, 10.0.0.9").unwrap();
        assert_eq!(
            ips,
            [
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)),
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            ]
        );
    }

    #[test]
    fn malformed_ranges_are_discovery_errors() {
        for bad in ["", "10.0.0.0/33", "im_wrong", "10.0.0.9-10.0.0.1", "10.0.0.1,,10.0.0.2"] {
            let err = parse_range(bad).unwrap_err();
            assert!(matches!(err, Error::Discovery { .. }), "{bad:?} gave {err}");
        }
    }

    #[test]
    fn oversized_cidr_is_rejected() {
        assert!(parse_range("10.0.0.0/8").is_err());
    }

    #[tokio::test]
    async fn literal_addresses_resolve_without_lookup() {
        let ip = resolve_host("127.0.0.1", Duration::from_millis(10)).await;
        assert_eq!(ip, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[tokio::test]
    async fn unresolvable_name_gives_none() {
        let ip = resolve_host("no-such-host.invalid", Duration::from_secs(2)).await;
        assert_eq!(ip, None);
    }
}
