//! Utility module, a grab-bag of functionality

use crate::constants::{header, IP_SEPARATOR};
use crate::error::Error;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;

/// Request or response headers, keys lowercased.
///
/// Both transports carry the same headers. HTTP puts them on the request,
/// RPC puts them into call metadata.
pub type Headers = BTreeMap<String, String>;

/// Build a `Headers` from arbitrary-case pairs.
pub fn headers<I, K, V>(pairs: I) -> Headers
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_lowercase(), v.into()))
        .collect()
}

/// True if the header `name` is present and contains `needle`.
pub fn header_contains(headers: &Headers, name: &str, needle: &str) -> bool {
    headers
        .get(name)
        .map(|v| v.to_lowercase().contains(needle))
        .unwrap_or(false)
}

/// An IPv4 or IPv6 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: IpAddr,
    prefix: u8,
}

impl FromStr for Subnet {
    type Err = String;

    fn from_str(s: &str) -> Result<Subnet, String> {
        let mut parts = s.trim().splitn(2, '/');
        let addr = parts.next().unwrap_or("");
        let network = IpAddr::from_str(addr)
            .map_err(|e| format!("invalid subnet address {:?}: {}", addr, e))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match parts.next() {
            Some(p) => p
                .parse::<u8>()
                .map_err(|e| format!("invalid subnet prefix {:?}: {}", p, e))?,
            None => max,
        };
        if prefix > max {
            return Err(format!("subnet prefix {} exceeds {}", prefix, max));
        }
        Ok(Subnet { network, prefix })
    }
}

impl Subnet {
    /// Does this network contain `ip`?
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::max_value() << (32 - u32::from(self.prefix))
                };
                (u32::from(net) & mask) == (u32::from(*ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::max_value() << (128 - u32::from(self.prefix))
                };
                (u128::from(net) & mask) == (u128::from(*ip) & mask)
            }
            _ => false,
        }
    }
}

fn is_local(ip: &IpAddr) -> bool {
    match *ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// Reject callers whose `X-Real-IP` lies outside `subnet`.
///
/// Requests without the header pass, as does everything when no subnet is
/// configured.
pub fn check_real_ip(subnet: Option<&Subnet>, headers: &Headers) -> Result<(), Error> {
    let subnet = match subnet {
        Some(s) => s,
        None => return Ok(()),
    };
    let raw = match headers.get(header::REAL_IP) {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(()),
    };
    let allowed = raw
        .split(IP_SEPARATOR)
        .filter_map(|ip| IpAddr::from_str(ip.trim()).ok())
        .any(|ip| !is_local(&ip) && subnet.contains(&ip));
    if allowed {
        Ok(())
    } else {
        Err(Error::Forbidden(raw.clone()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck::{QuickCheck, TestResult};
    use std::net::Ipv4Addr;

    #[test]
    fn subnet_contains() {
        let net: Subnet = "192.168.1.0/24".parse().unwrap();
        assert!(net.contains(&"192.168.1.77".parse().unwrap()));
        assert!(!net.contains(&"192.168.2.1".parse().unwrap()));
        assert!(!net.contains(&"::1".parse().unwrap()));

        let v6: Subnet = "fd00::/8".parse().unwrap();
        assert!(v6.contains(&"fd12::1".parse().unwrap()));
    }

    #[test]
    fn subnet_rejects_garbage() {
        assert!("not-an-ip/8".parse::<Subnet>().is_err());
        assert!("10.0.0.0/33".parse::<Subnet>().is_err());
    }

    #[test]
    fn zero_prefix_contains_every_v4() {
        fn inner(a: u32) -> TestResult {
            let net: Subnet = "0.0.0.0/0".parse().unwrap();
            TestResult::from_bool(net.contains(&IpAddr::V4(Ipv4Addr::from(a))))
        }
        QuickCheck::new()
            .tests(1000)
            .quickcheck(inner as fn(u32) -> TestResult);
    }

    #[test]
    fn real_ip_checks() {
        let net: Subnet = "10.0.0.0/8".parse().unwrap();
        let allowed = headers(vec![("X-Real-IP", "127.0.0.1;10.1.2.3")]);
        let denied = headers(vec![("X-Real-IP", "192.168.0.4")]);
        let loopback_only = headers(vec![("X-Real-IP", "127.0.0.1")]);
        let absent = Headers::new();

        assert!(check_real_ip(Some(&net), &allowed).is_ok());
        assert!(check_real_ip(Some(&net), &absent).is_ok());
        assert!(check_real_ip(None, &denied).is_ok());
        match check_real_ip(Some(&net), &denied) {
            Err(Error::Forbidden(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(check_real_ip(Some(&net), &loopback_only).is_err());
    }

    #[test]
    fn header_lookup_is_case_insensitive_on_keys() {
        let h = headers(vec![("Content-Encoding", "GZIP")]);
        assert!(header_contains(&h, "content-encoding", "gzip"));
        assert!(!header_contains(&h, "content-encryption", "sha512"));
    }
}
