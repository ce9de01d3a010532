//! Node Addresses
//!
//! A node's identity is its network address. The bytewise total order
//! over addresses is the election tie-break key: the highest address in
//! a connected set always wins candidacy.

use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::str::FromStr;

use crate::error::Error;

/// Node address wrapper type
///
/// Ordering is bytewise over the 16 address octets, equality is address
/// equality. The canonical string form is the wire payload on the
/// announce channel and the register endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeAddr(pub Ipv6Addr);

impl NodeAddr {
    /// Get the inner address
    pub fn ip(&self) -> Ipv6Addr {
        self.0
    }
}

impl std::fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<Ipv6Addr>()
            .map(NodeAddr)
            .map_err(|_| Error::InvalidAddress(s.to_string()))
    }
}

impl From<Ipv6Addr> for NodeAddr {
    fn from(addr: Ipv6Addr) -> Self {
        Self(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_bytewise() {
        let low: NodeAddr = "fe80::1".parse().unwrap();
        let mid: NodeAddr = "fe80::2".parse().unwrap();
        let high: NodeAddr = "fe80::1:0".parse().unwrap();

        assert!(low < mid);
        assert!(mid < high);
        assert_eq!(low.max(mid).max(high), high);
    }

    #[test]
    fn test_display_parse_round_trip() {
        let addr: NodeAddr = "fe80::3a:7b".parse().unwrap();
        let parsed: NodeAddr = addr.to_string().parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let addr: NodeAddr = " fe80::1\n".parse().unwrap();
        assert_eq!(addr, "fe80::1".parse().unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-an-address".parse::<NodeAddr>().is_err());
        assert!("".parse::<NodeAddr>().is_err());
    }
}
