//! Client identity used as the rate-limit key.
//!
//! The peer address is trusted as-is unless the proxy sits behind a local reverse proxy
//! (`127.0.0.1` / `::1`). In that case the last `X-Forwarded-For` member is used, and if that
//! member is itself a trusted edge (Cloudflare), the one before it.

use arc_swap::ArcSwap;
use ipnetwork::IpNetwork;
use std::{net::IpAddr, sync::Arc};

pub const CLOUDFLARE_IPV4_URL: &str = "https://www.cloudflare.com/ips-v4";
pub const CLOUDFLARE_IPV6_URL: &str = "https://www.cloudflare.com/ips-v6";

/// CIDR set of reverse proxies allowed to forward one more hop of client identity.
///
/// The set is swapped atomically on refresh so lookups never block.
pub struct TrustedProxies {
    ranges: ArcSwap<Vec<IpNetwork>>,
    extra: Vec<IpNetwork>,
}

impl TrustedProxies {
    #[must_use]
    pub fn new(extra: Vec<IpNetwork>) -> Self {
        Self { ranges: ArcSwap::from_pointee(extra.clone()), extra }
    }

    /// Parses configured CIDR strings, skipping (and logging) invalid entries.
    #[must_use]
    pub fn from_cidrs(cidrs: &[String]) -> Self {
        Self::new(parse_cidr_list(&cidrs.join("\n")))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.load().is_empty()
    }

    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.ranges.load().iter().any(|range| range.contains(ip))
    }

    /// Replaces the fetched ranges, keeping the configured extras.
    pub fn replace(&self, fetched: Vec<IpNetwork>) {
        let mut ranges = fetched;
        ranges.extend(self.extra.iter().copied());
        self.ranges.store(Arc::new(ranges));
    }

    /// Fetches the Cloudflare IPv4 and IPv6 lists and installs them.
    ///
    /// # Errors
    /// Returns the transport error if either list cannot be downloaded; the previous set stays.
    pub async fn refresh_cloudflare(
        &self,
        client: &reqwest::Client,
    ) -> Result<usize, reqwest::Error> {
        self.refresh_from(client, &[CLOUDFLARE_IPV4_URL, CLOUDFLARE_IPV6_URL]).await
    }

    /// Fetches newline-separated CIDR lists from `urls` and installs their union.
    ///
    /// # Errors
    /// Returns the transport error if any list cannot be downloaded; the previous set stays.
    pub async fn refresh_from(
        &self,
        client: &reqwest::Client,
        urls: &[&str],
    ) -> Result<usize, reqwest::Error> {
        let bodies = futures::future::try_join_all(urls.iter().map(|url| async move {
            client.get(*url).send().await?.error_for_status()?.text().await
        }))
        .await?;

        let fetched: Vec<IpNetwork> = bodies.iter().flat_map(|body| parse_cidr_list(body)).collect();
        let count = fetched.len();
        self.replace(fetched);
        tracing::info!(ranges = count, "loaded trusted proxy ranges");
        Ok(count)
    }

    /// Resolves the client key for a connection.
    ///
    /// `forwarded_for` is the raw `X-Forwarded-For` header value, if present.
    #[must_use]
    pub fn resolve(&self, peer: IpAddr, forwarded_for: Option<&str>) -> String {
        let peer = peer.to_canonical();
        let Some(header) = forwarded_for.filter(|_| is_local_proxy(peer)) else {
            return peer.to_string();
        };

        let members: Vec<&str> = header.split(',').map(str::trim).collect();
        let Some(last) = members.last().copied() else {
            return peer.to_string();
        };

        let last_is_edge = last.parse::<IpAddr>().is_ok_and(|ip| self.contains(ip));
        if last_is_edge && members.len() > 1 {
            return members[members.len() - 2].to_string();
        }
        last.to_string()
    }
}

impl Default for TrustedProxies {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Only the two canonical loopback addresses count as a local reverse proxy.
fn is_local_proxy(peer: IpAddr) -> bool {
    match peer {
        IpAddr::V4(v4) => v4.octets() == [127, 0, 0, 1],
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Parses one CIDR per line, ignoring blank lines and skipping invalid ones.
#[must_use]
pub fn parse_cidr_list(text: &str) -> Vec<IpNetwork> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match line.parse::<IpNetwork>() {
            Ok(range) => Some(range),
            Err(e) => {
                tracing::warn!(cidr = %line, error = %e, "skipping invalid CIDR");
                None
            }
        })
        .collect()
}
