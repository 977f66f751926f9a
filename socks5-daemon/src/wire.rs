//! RFC 1928 wire codec plus the vendor `cmd=0x04` "DNS forward" extension.
//! Kept free of socket/runtime concerns so it can be unit tested against
//! in-memory duplex streams.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use socks5_core::endpoint::Endpoint;
use socks5_core::error::{ProxyError, Result, SocksReplyCode};

pub const VERSION: u8 = 0x05;
pub const AUTH_VERSION: u8 = 0x01;

pub const METHOD_NONE: u8 = 0x00;
pub const METHOD_USERPASS: u8 = 0x02;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xff;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;
pub const CMD_DNS_FORWARD: u8 = 0x04;

const ATYP_V4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_V6: u8 = 0x04;

/// Client's method greeting: `{ver, nmethods, methods[nmethods]}`.
pub struct Greeting {
    pub methods: Vec<u8>,
}

pub async fn read_greeting<R: AsyncRead + Unpin>(r: &mut R) -> Result<Greeting> {
    let mut hdr = [0u8; 2];
    r.read_exact(&mut hdr).await?;
    if hdr[0] != VERSION {
        return Err(ProxyError::MalformedGreeting);
    }
    let nmethods = hdr[1] as usize;
    let mut methods = vec![0u8; nmethods];
    r.read_exact(&mut methods).await?;
    Ok(Greeting { methods })
}

pub async fn write_method_select<W: AsyncWrite + Unpin>(w: &mut W, method: u8) -> Result<()> {
    w.write_all(&[VERSION, method]).await?;
    w.flush().await?;
    Ok(())
}

/// `{ver=0x01, ulen, username, plen, password}`.
pub struct AuthRequest {
    pub username: String,
    pub password: String,
}

pub async fn read_auth_request<R: AsyncRead + Unpin>(r: &mut R) -> Result<AuthRequest> {
    let mut ver = [0u8; 1];
    r.read_exact(&mut ver).await?;
    if ver[0] != AUTH_VERSION {
        return Err(ProxyError::MalformedGreeting);
    }
    let username = read_length_prefixed_str(r).await?;
    let password = read_length_prefixed_str(r).await?;
    Ok(AuthRequest { username, password })
}

pub async fn write_auth_result<W: AsyncWrite + Unpin>(w: &mut W, ok: bool) -> Result<()> {
    w.write_all(&[AUTH_VERSION, if ok { 0x00 } else { 0xff }]).await?;
    w.flush().await?;
    Ok(())
}

/// The request's address field before it has been resolved: either a
/// directly-usable [`Endpoint`] (`ATYP` v4/v6) or a domain name plus port
/// awaiting DNS resolution or literal-IP shortcutting.
pub enum AddressRequest {
    Direct(Endpoint),
    Domain(String, u16),
}

pub struct SocksRequest {
    pub cmd: u8,
    pub address: AddressRequest,
}

/// `{ver=0x05, cmd, rsv, atype}` followed by the type-dependent address.
///
/// `cmd=0x04` (DNS forward) carries no meaningful address field: its
/// `atype`/address/port bytes are a fixed-size placeholder that exists only
/// to keep the request the same shape as `CONNECT`/`UDP ASSOCIATE`, so it is
/// drained as a flat 7-byte body rather than parsed per `atype`.
pub async fn read_request<R: AsyncRead + Unpin>(r: &mut R) -> Result<SocksRequest> {
    let mut hdr = [0u8; 3];
    r.read_exact(&mut hdr).await?;
    if hdr[0] != VERSION {
        return Err(ProxyError::MalformedGreeting);
    }
    let cmd = hdr[1];

    if cmd == CMD_DNS_FORWARD {
        let mut placeholder = [0u8; 7];
        r.read_exact(&mut placeholder).await?;
        return Ok(SocksRequest {
            cmd,
            address: AddressRequest::Direct(Endpoint::from_v4(std::net::Ipv4Addr::UNSPECIFIED, 0)),
        });
    }

    let mut atyp_buf = [0u8; 1];
    r.read_exact(&mut atyp_buf).await?;
    let atyp = atyp_buf[0];
    let address = match atyp {
        ATYP_V4 => {
            let mut buf = [0u8; 6];
            r.read_exact(&mut buf).await?;
            let ip = std::net::Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
            let port = u16::from_be_bytes([buf[4], buf[5]]);
            AddressRequest::Direct(Endpoint::from_v4(ip, port))
        }
        ATYP_V6 => {
            let mut buf = [0u8; 18];
            r.read_exact(&mut buf).await?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[0..16]);
            let ip = std::net::Ipv6Addr::from(octets);
            let port = u16::from_be_bytes([buf[16], buf[17]]);
            AddressRequest::Direct(Endpoint::from_v6(ip, port))
        }
        ATYP_DOMAIN => {
            let name = read_length_prefixed_str(r).await?;
            let mut port_buf = [0u8; 2];
            r.read_exact(&mut port_buf).await?;
            let port = u16::from_be_bytes(port_buf);
            match Endpoint::parse_literal(&name, port) {
                Some(ep) => AddressRequest::Direct(ep),
                None => AddressRequest::Domain(name, port),
            }
        }
        other => return Err(ProxyError::UnsupportedAddressType(other)),
    };
    Ok(SocksRequest { cmd, address })
}

/// `{ver, rep, rsv, atyp, bnd.addr, bnd.port}`.
pub async fn write_reply<W: AsyncWrite + Unpin>(
    w: &mut W,
    code: SocksReplyCode,
    bnd: Endpoint,
) -> Result<()> {
    let mut out = vec![VERSION, code as u8, 0x00, bnd.atyp()];
    bnd.encode_bnd(&mut out);
    w.write_all(&out).await?;
    w.flush().await?;
    Ok(())
}

/// Parses the `{RSV RSV FRAG ATYPE DST.ADDR DST.PORT}` header each UDP
/// relay datagram carries (RFC 1928 §7). Returns the address and the
/// number of header bytes consumed; the caller slices the remaining
/// payload off the original buffer. Fragmented datagrams (`FRAG != 0`)
/// are rejected rather than reassembled.
pub fn parse_udp_datagram(buf: &[u8]) -> Result<(AddressRequest, usize)> {
    if buf.len() < 4 {
        return Err(ProxyError::MalformedGreeting);
    }
    if buf[2] != 0x00 {
        return Err(ProxyError::config("fragmented UDP datagrams are not supported"));
    }
    match buf[3] {
        ATYP_V4 => {
            if buf.len() < 10 {
                return Err(ProxyError::MalformedGreeting);
            }
            let ip = std::net::Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);
            let port = u16::from_be_bytes([buf[8], buf[9]]);
            Ok((AddressRequest::Direct(Endpoint::from_v4(ip, port)), 10))
        }
        ATYP_V6 => {
            if buf.len() < 22 {
                return Err(ProxyError::MalformedGreeting);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[4..20]);
            let ip = std::net::Ipv6Addr::from(octets);
            let port = u16::from_be_bytes([buf[20], buf[21]]);
            Ok((AddressRequest::Direct(Endpoint::from_v6(ip, port)), 22))
        }
        ATYP_DOMAIN => {
            if buf.len() < 5 {
                return Err(ProxyError::MalformedGreeting);
            }
            let len = buf[4] as usize;
            if buf.len() < 5 + len + 2 {
                return Err(ProxyError::MalformedGreeting);
            }
            let name = String::from_utf8(buf[5..5 + len].to_vec())
                .map_err(|_| ProxyError::MalformedGreeting)?;
            let port = u16::from_be_bytes([buf[5 + len], buf[5 + len + 1]]);
            let header_len = 5 + len + 2;
            match Endpoint::parse_literal(&name, port) {
                Some(ep) => Ok((AddressRequest::Direct(ep), header_len)),
                None => Ok((AddressRequest::Domain(name, port), header_len)),
            }
        }
        other => Err(ProxyError::UnsupportedAddressType(other)),
    }
}

/// Encodes the `{RSV RSV FRAG ATYPE DST.ADDR DST.PORT}` header for a
/// datagram being relayed back to the client; `FRAG` is always `0x00`.
pub fn encode_udp_datagram_header(out: &mut Vec<u8>, from: Endpoint) {
    out.extend_from_slice(&[0x00, 0x00, 0x00]);
    out.push(from.atyp());
    from.encode_bnd(out);
}

async fn read_length_prefixed_str<R: AsyncRead + Unpin>(r: &mut R) -> Result<String> {
    let mut len_buf = [0u8; 1];
    r.read_exact(&mut len_buf).await?;
    let mut buf = vec![0u8; len_buf[0] as usize];
    r.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| ProxyError::MalformedGreeting)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::duplex;

    #[tokio::test]
    async fn greeting_round_trip() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&[0x05, 0x02, 0x00, 0x02]).await.unwrap();
        let greeting = read_greeting(&mut b).await.unwrap();
        assert_eq!(greeting.methods, vec![0x00, 0x02]);
    }

    #[tokio::test]
    async fn greeting_rejects_wrong_version() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&[0x04, 0x01, 0x00]).await.unwrap();
        assert!(read_greeting(&mut b).await.is_err());
    }

    #[tokio::test]
    async fn auth_request_round_trip() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&[0x01, 0x04, b'u', b's', b'e', b'r', 0x04, b'p', b'a', b's', b's'])
            .await
            .unwrap();
        let req = read_auth_request(&mut b).await.unwrap();
        assert_eq!(req.username, "user");
        assert_eq!(req.password, "pass");
    }

    #[tokio::test]
    async fn request_ipv4_connect() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&[0x05, 0x01, 0x00, 0x01, 192, 168, 1, 1, 0x00, 0x50])
            .await
            .unwrap();
        let req = read_request(&mut b).await.unwrap();
        assert_eq!(req.cmd, CMD_CONNECT);
        match req.address {
            AddressRequest::Direct(ep) => {
                assert_eq!(ep.to_ipv4(), Some(Ipv4Addr::new(192, 168, 1, 1)));
                assert_eq!(ep.port(), 80);
            }
            AddressRequest::Domain(..) => panic!("expected direct address"),
        }
    }

    #[tokio::test]
    async fn request_domain_name() {
        let (mut a, mut b) = duplex(64);
        let domain = b"example.com";
        let mut packet = vec![0x05, 0x01, 0x00, 0x03, domain.len() as u8];
        packet.extend_from_slice(domain);
        packet.extend_from_slice(&80u16.to_be_bytes());
        a.write_all(&packet).await.unwrap();
        let req = read_request(&mut b).await.unwrap();
        match req.address {
            AddressRequest::Domain(name, port) => {
                assert_eq!(name, "example.com");
                assert_eq!(port, 80);
            }
            AddressRequest::Direct(_) => panic!("expected domain"),
        }
    }

    #[tokio::test]
    async fn request_dns_forward_drains_fixed_placeholder_body() {
        let (mut a, mut b) = duplex(64);
        // S6's minimal DNS-forward request: header plus a 7-byte placeholder
        // body, followed immediately by the length-prefixed query the
        // caller reads next.
        a.write_all(&[0x05, 0x04, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])
            .await
            .unwrap();
        a.write_all(&[0x00, 0x01, 0xAB]).await.unwrap();

        let req = read_request(&mut b).await.unwrap();
        assert_eq!(req.cmd, CMD_DNS_FORWARD);

        let mut len_buf = [0u8; 2];
        b.read_exact(&mut len_buf).await.unwrap();
        assert_eq!(len_buf, [0x00, 0x01]);
        let mut query = [0u8; 1];
        b.read_exact(&mut query).await.unwrap();
        assert_eq!(query, [0xAB]);
    }

    #[tokio::test]
    async fn request_domain_literal_ip_bypasses_dns() {
        let (mut a, mut b) = duplex(64);
        let domain = b"127.0.0.1";
        let mut packet = vec![0x05, 0x01, 0x00, 0x03, domain.len() as u8];
        packet.extend_from_slice(domain);
        packet.extend_from_slice(&80u16.to_be_bytes());
        a.write_all(&packet).await.unwrap();
        let req = read_request(&mut b).await.unwrap();
        assert!(matches!(req.address, AddressRequest::Direct(_)));
    }

    #[test]
    fn udp_datagram_header_round_trips() {
        let mut packet = vec![0x00, 0x00, 0x00, 0x01];
        packet.extend_from_slice(&[10, 0, 0, 1]);
        packet.extend_from_slice(&53u16.to_be_bytes());
        packet.extend_from_slice(b"payload");
        let (addr, header_len) = parse_udp_datagram(&packet).unwrap();
        assert_eq!(header_len, 10);
        match addr {
            AddressRequest::Direct(ep) => assert_eq!(ep.port(), 53),
            AddressRequest::Domain(..) => panic!("expected direct address"),
        }
        assert_eq!(&packet[header_len..], b"payload");

        let mut out = Vec::new();
        encode_udp_datagram_header(&mut out, Endpoint::from_v4(Ipv4Addr::new(10, 0, 0, 1), 53));
        assert_eq!(&out, &packet[..10]);
    }

    #[test]
    fn udp_datagram_rejects_fragmentation() {
        let packet = [0x00, 0x00, 0x01, 0x01, 1, 2, 3, 4, 0, 80];
        assert!(parse_udp_datagram(&packet).is_err());
    }

    #[tokio::test]
    async fn reply_encodes_v4_mapped_as_atyp_one() {
        let (mut a, mut b) = duplex(64);
        write_reply(
            &mut a,
            SocksReplyCode::Succeeded,
            Endpoint::from_v4(Ipv4Addr::new(10, 0, 0, 1), 1234),
        )
        .await
        .unwrap();
        let mut buf = [0u8; 10];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], VERSION);
        assert_eq!(buf[1], 0x00);
        assert_eq!(buf[3], ATYP_V4);
    }
}
