//! net/peer_address.rs
//!
//! Lookup key for a remote endpoint. Two addresses are the same peer when
//! their canonical address bytes and port match, however they were built.
//! IPv4-mapped IPv6 addresses fold to their IPv4 form; IPv6 flow info and
//! scope id never take part in equality.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

// -----------------------------------------------------------------------------
// ----- PeerAddress -----------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress {
    ip: IpAddr,
    port: u16,
}

// -----------------------------------------------------------------------------
// ----- PeerAddress: Static ---------------------------------------------------

impl PeerAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            ip: ip.to_canonical(),
            port,
        }
    }

    pub fn v4(ip: Ipv4Addr, port: u16) -> Self {
        Self::new(IpAddr::V4(ip), port)
    }

    pub fn v6(ip: Ipv6Addr, port: u16) -> Self {
        Self::new(IpAddr::V6(ip), port)
    }

    /// The limited-broadcast destination (255.255.255.255) on `port`.
    pub fn broadcast(port: u16) -> Self {
        Self::v4(Ipv4Addr::BROADCAST, port)
    }
}

// -----------------------------------------------------------------------------
// ----- PeerAddress: Public ---------------------------------------------------

impl PeerAddress {
    #[inline]
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[inline]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self.ip, IpAddr::V4(v4) if v4.is_broadcast())
    }

    /// A usable unicast/broadcast target: concrete address and non-zero port.
    pub fn is_routable(&self) -> bool {
        self.port != 0 && !self.ip.is_unspecified()
    }
}

// -----------------------------------------------------------------------------
// ----- PeerAddress: Conversions ----------------------------------------------

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl From<(IpAddr, u16)> for PeerAddress {
    fn from((ip, port): (IpAddr, u16)) -> Self {
        Self::new(ip, port)
    }
}

impl From<(Ipv4Addr, u16)> for PeerAddress {
    fn from((ip, port): (Ipv4Addr, u16)) -> Self {
        Self::v4(ip, port)
    }
}

impl From<&PeerAddress> for PeerAddress {
    fn from(addr: &PeerAddress) -> Self {
        *addr
    }
}

impl From<PeerAddress> for SocketAddr {
    fn from(addr: PeerAddress) -> Self {
        addr.socket_addr()
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.socket_addr(), f)
    }
}

// -----------------------------------------------------------------------------
// ----- Helpers ---------------------------------------------------------------

/// Wildcard local address in the same family as `remote`.
pub(crate) fn wildcard_for(remote: &SocketAddr, port: u16) -> SocketAddr {
    match remote {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::SocketAddrV6;

    #[test]
    fn independently_built_addresses_are_equal() {
        let a = PeerAddress::from(SocketAddr::from(([192, 168, 1, 20], 10241)));
        let b = PeerAddress::new("192.168.1.20".parse().unwrap(), 10241);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn port_participates_in_equality() {
        let a = PeerAddress::v4(Ipv4Addr::LOCALHOST, 1);
        let b = PeerAddress::v4(Ipv4Addr::LOCALHOST, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn v4_mapped_v6_folds_to_v4() {
        let mapped: Ipv6Addr = "::ffff:10.1.2.3".parse().unwrap();
        let a = PeerAddress::v6(mapped, 80);
        let b = PeerAddress::v4(Ipv4Addr::new(10, 1, 2, 3), 80);
        assert_eq!(a, b);
        assert!(a.ip().is_ipv4());
    }

    #[test]
    fn scope_id_is_ignored() {
        let ip: Ipv6Addr = "fe80::1".parse().unwrap();
        let a = PeerAddress::from(SocketAddr::V6(SocketAddrV6::new(ip, 9, 0, 3)));
        let b = PeerAddress::from(SocketAddr::V6(SocketAddrV6::new(ip, 9, 7, 0)));
        assert_eq!(a, b);
    }

    #[test]
    fn broadcast_and_routable() {
        assert!(PeerAddress::broadcast(81).is_broadcast());
        assert!(!PeerAddress::v4(Ipv4Addr::LOCALHOST, 81).is_broadcast());
        assert!(!PeerAddress::v4(Ipv4Addr::UNSPECIFIED, 81).is_routable());
        assert!(!PeerAddress::v4(Ipv4Addr::LOCALHOST, 0).is_routable());
        assert!(PeerAddress::v4(Ipv4Addr::LOCALHOST, 81).is_routable());
    }

    #[test]
    fn wildcard_follows_remote_family() {
        let v4 = SocketAddr::from(([127, 0, 0, 1], 1));
        let v6 = SocketAddr::from((Ipv6Addr::LOCALHOST, 1));
        assert_eq!(wildcard_for(&v4, 81).to_string(), "0.0.0.0:81");
        assert_eq!(wildcard_for(&v6, 81).to_string(), "[::]:81");
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
