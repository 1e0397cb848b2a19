//! CIDR network predicates.
//!
//! Parses `10.0.0.0/24`, `2001:db8::/32` or a bare address (a host route)
//! and tests whether a peer address falls inside the network. The network
//! is masked at parse time, so `10.0.0.7/24` behaves like `10.0.0.0/24`.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Error returned for unparsable CIDR strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CidrError {
    #[error("invalid network address '{0}'")]
    Address(String),
    #[error("invalid prefix length '{0}'")]
    PrefixLength(String),
}

/// An IPv4 or IPv6 network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cidr {
    V4 { network: u32, mask: u32 },
    V6 { network: u128, mask: u128 },
}

impl Cidr {
    /// Returns true if `addr` is inside this network.
    ///
    /// IPv4-mapped IPv6 peers (`::ffff:a.b.c.d`), as reported by dual-stack
    /// sockets, are compared as IPv4.
    pub fn contains(&self, addr: IpAddr) -> bool {
        let addr = match addr {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => IpAddr::V6(v6),
            },
            v4 => v4,
        };
        match (self, addr) {
            (Cidr::V4 { network, mask }, IpAddr::V4(a)) => u32::from(a) & mask == *network,
            (Cidr::V6 { network, mask }, IpAddr::V6(a)) => u128::from(a) & mask == *network,
            _ => false,
        }
    }
}

fn mask_v4(len: u32) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - len)
    }
}

fn mask_v6(len: u32) -> u128 {
    if len == 0 {
        0
    } else {
        u128::MAX << (128 - len)
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => (addr, Some(len)),
            None => (s, None),
        };
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| CidrError::Address(addr.to_string()))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let len = match len {
            Some(len) => len
                .parse::<u32>()
                .ok()
                .filter(|l| *l <= max)
                .ok_or_else(|| CidrError::PrefixLength(len.to_string()))?,
            None => max,
        };
        Ok(match addr {
            IpAddr::V4(a) => {
                let mask = mask_v4(len);
                Cidr::V4 { network: u32::from(a) & mask, mask }
            }
            IpAddr::V6(a) => {
                let mask = mask_v6(len);
                Cidr::V6 { network: u128::from(a) & mask, mask }
            }
        })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cidr::V4 { network, mask } => {
                write!(f, "{}/{}", Ipv4Addr::from(*network), mask.count_ones())
            }
            Cidr::V6 { network, mask } => {
                write!(f, "{}/{}", Ipv6Addr::from(*network), mask.count_ones())
            }
        }
    }
}
