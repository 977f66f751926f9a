//! Unified endpoint representation: every address the proxy core deals with
//! is carried internally as an IPv6 socket address, with IPv4 addresses
//! encoded as V4-mapped (`::ffff:a.b.c.d`). This lets a single dual-stack
//! listener and a single reply-encoding path serve both families.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6};

/// An address + port, always stored as IPv6 (V4-mapped when the origin was
/// IPv4). Use [`Endpoint::is_v4_mapped`] to recover which wire `ATYP` to
/// use when re-encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint(SocketAddrV6);

impl Endpoint {
    pub fn from_v4(addr: Ipv4Addr, port: u16) -> Self {
        Endpoint(SocketAddrV6::new(addr.to_ipv6_mapped(), port, 0, 0))
    }

    pub fn from_v6(addr: Ipv6Addr, port: u16) -> Self {
        Endpoint(SocketAddrV6::new(addr, port, 0, 0))
    }

    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Endpoint::from_v4(*v4.ip(), v4.port()),
            SocketAddr::V6(v6) => Endpoint::from_v6(*v6.ip(), v6.port()),
        }
    }

    /// Best-effort literal parse: accepts a dotted-quad or bracket-free IPv6
    /// literal plus a port. Used when a SOCKS5 domain name turns out to be a
    /// textual IP literal, taking this shortcut rather than round-tripping
    /// through DNS for an address already in hand.
    pub fn parse_literal(host: &str, port: u16) -> Option<Self> {
        if let Ok(v4) = host.parse::<Ipv4Addr>() {
            return Some(Endpoint::from_v4(v4, port));
        }
        if let Ok(v6) = host.parse::<Ipv6Addr>() {
            return Some(Endpoint::from_v6(v6, port));
        }
        None
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn is_v4_mapped(&self) -> bool {
        self.0.ip().to_ipv4_mapped().is_some()
    }

    /// Returns the IPv4 octets when this endpoint is V4-mapped.
    pub fn to_ipv4(&self) -> Option<Ipv4Addr> {
        self.0.ip().to_ipv4_mapped()
    }

    pub fn to_ipv6(&self) -> Ipv6Addr {
        *self.0.ip()
    }

    /// The representation to hand to `std`/`tokio` socket APIs: IPv4-mapped
    /// endpoints are unwrapped back to a plain `V4` address so that
    /// `connect`/`bind` negotiate the expected family on dual-stack-off
    /// systems.
    pub fn to_socket_addr(&self) -> SocketAddr {
        match self.to_ipv4() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), self.port()),
            None => SocketAddr::new(IpAddr::V6(self.to_ipv6()), self.port()),
        }
    }

    /// The V6-domain form of this address, suitable for `bind()`/`connect()`
    /// on the V6 stream/datagram sockets this proxy always creates: IPv4
    /// destinations stay V4-mapped rather than being unwrapped, since the
    /// socket's address family is always `AF_INET6`.
    pub fn to_v6_sockaddr(&self) -> SocketAddr {
        SocketAddr::V6(self.0)
    }

    /// `ATYP` to use when encoding this endpoint into a SOCKS5 reply or UDP
    /// header: `0x01` for V4-mapped, `0x04` for true V6.
    pub fn atyp(&self) -> u8 {
        if self.is_v4_mapped() {
            0x01
        } else {
            0x04
        }
    }

    /// Encode `BND.ADDR BND.PORT` per `atyp()` (4+2 or 16+2 bytes).
    pub fn encode_bnd(&self, out: &mut Vec<u8>) {
        match self.to_ipv4() {
            Some(v4) => out.extend_from_slice(&v4.octets()),
            None => out.extend_from_slice(&self.to_ipv6().octets()),
        }
        out.extend_from_slice(&self.port().to_be_bytes());
    }

    pub fn is_unspecified(&self) -> bool {
        match self.to_ipv4() {
            Some(v4) => v4.is_unspecified(),
            None => self.to_ipv6().is_unspecified(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_socket_addr())
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::from_socket_addr(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_round_trips_through_mapped_form() {
        let ep = Endpoint::from_v4(Ipv4Addr::new(192, 168, 1, 1), 80);
        assert!(ep.is_v4_mapped());
        assert_eq!(ep.atyp(), 0x01);
        assert_eq!(
            ep.to_socket_addr(),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), 80)
        );
    }

    #[test]
    fn v6_stays_v6() {
        let ep = Endpoint::from_v6(Ipv6Addr::LOCALHOST, 443);
        assert!(!ep.is_v4_mapped());
        assert_eq!(ep.atyp(), 0x04);
    }

    #[test]
    fn literal_parse_prefers_v4() {
        let ep = Endpoint::parse_literal("10.0.0.1", 53).expect("valid literal");
        assert!(ep.is_v4_mapped());
    }

    #[test]
    fn literal_parse_rejects_domain() {
        assert!(Endpoint::parse_literal("example.com", 80).is_none());
    }

    #[test]
    fn encode_bnd_matches_atyp_length() {
        let mut buf = Vec::new();
        Endpoint::from_v4(Ipv4Addr::new(1, 2, 3, 4), 9).encode_bnd(&mut buf);
        assert_eq!(buf.len(), 6);

        let mut buf = Vec::new();
        Endpoint::from_v6(Ipv6Addr::LOCALHOST, 9).encode_bnd(&mut buf);
        assert_eq!(buf.len(), 18);
    }
}
