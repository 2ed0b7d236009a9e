use std::net::{IpAddr, SocketAddr};

use anyhow::{anyhow, bail, Result};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::SharedState;

/// One allowed range, either a CIDR block or a single address.
#[derive(Debug, Clone, Copy)]
struct Network {
    addr: IpAddr,
    prefix_len: u8,
}

impl Network {
    fn parse(spec: &str) -> Result<Self> {
        let (addr_str, prefix_str) = match spec.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (spec, None),
        };

        let addr: IpAddr = addr_str
            .parse()
            .map_err(|_| anyhow!("invalid network address in {:?}", spec))?;

        let max_prefix = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix_len = match prefix_str {
            Some(p) => p
                .parse::<u8>()
                .map_err(|_| anyhow!("invalid prefix length in {:?}", spec))?,
            // Bare address means exactly that host.
            None => max_prefix,
        };

        if prefix_len > max_prefix {
            bail!("prefix length {} too large in {:?}", prefix_len, spec);
        }

        Ok(Network { addr, prefix_len })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_v4(self.prefix_len);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_v6(self.prefix_len);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_v4(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len)
    }
}

fn prefix_mask_v6(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        u128::MAX << (128 - prefix_len)
    }
}

/// The set of networks requests may come from. An empty set disables
/// filtering entirely.
#[derive(Debug, Default)]
pub struct AllowedNetworks {
    networks: Vec<Network>,
}

impl AllowedNetworks {
    pub fn parse(specs: &[String]) -> Result<Self> {
        let networks = specs
            .iter()
            .map(|s| Network::parse(s))
            .collect::<Result<Vec<_>>>()?;
        Ok(AllowedNetworks { networks })
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        self.is_empty() || self.networks.iter().any(|n| n.contains(ip))
    }
}

/// Middleware wrapping the whole router: rejects requests from outside the
/// allow-list before any handler can run.
pub async fn gate(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    if state.networks.is_empty() {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    match peer {
        Some(ip) if state.networks.allows(ip) => next.run(request).await,
        Some(ip) => {
            warn!("rejected request from non-allowed address {}", ip);
            (StatusCode::FORBIDDEN, "forbidden: requests from your address aren't allowed")
                .into_response()
        }
        None => {
            warn!("rejected request with no peer address while allow-list is configured");
            (StatusCode::FORBIDDEN, "forbidden: peer address unknown").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nets(specs: &[&str]) -> AllowedNetworks {
        let specs: Vec<String> = specs.iter().map(|s| s.to_string()).collect();
        AllowedNetworks::parse(&specs).unwrap()
    }

    #[test]
    fn cidr_membership() {
        let allowed = nets(&["10.0.0.0/24"]);
        assert!(allowed.allows("10.0.0.5".parse().unwrap()));
        assert!(!allowed.allows("10.0.1.5".parse().unwrap()));
    }

    #[test]
    fn bare_address_matches_only_itself() {
        let allowed = nets(&["192.168.1.7"]);
        assert!(allowed.allows("192.168.1.7".parse().unwrap()));
        assert!(!allowed.allows("192.168.1.8".parse().unwrap()));
    }

    #[test]
    fn empty_list_allows_everything() {
        let allowed = AllowedNetworks::default();
        assert!(allowed.allows("203.0.113.9".parse().unwrap()));
        assert!(allowed.allows("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn ipv6_ranges() {
        let allowed = nets(&["2001:db8::/32"]);
        assert!(allowed.allows("2001:db8::1".parse().unwrap()));
        assert!(!allowed.allows("2001:db9::1".parse().unwrap()));
        // Address family mismatch is never a match.
        assert!(!allowed.allows("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn zero_prefix_matches_all_of_family() {
        let allowed = nets(&["0.0.0.0/0"]);
        assert!(allowed.allows("8.8.8.8".parse().unwrap()));
        assert!(!allowed.allows("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn malformed_specs_are_rejected() {
        assert!(Network::parse("not-an-ip").is_err());
        assert!(Network::parse("10.0.0.0/33").is_err());
        assert!(Network::parse("10.0.0.0/abc").is_err());
    }
}
