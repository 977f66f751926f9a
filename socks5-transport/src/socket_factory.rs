//! Builds the shared TCP listener(s). Prefers `SO_REUSEPORT`
//! so every worker gets its own kernel accept queue; falls back to a
//! single cached, `dup`-shared fd when the platform doesn't support it.
//! The outward behaviour — `get()` returns a valid, already-bound-and-
//! listening socket — is identical either way.

use std::net::TcpListener as StdTcpListener;
use std::sync::Mutex;

use socket2::{Domain, Protocol, Socket, Type};
use socks5_core::endpoint::Endpoint;
use socks5_core::error::{ProxyError, Result};

const LISTEN_BACKLOG: i32 = 100;

pub struct SocketFactory {
    endpoint: Endpoint,
    ipv6_only: bool,
    /// Set once the first `get()` discovers that `SO_REUSEPORT` is
    /// unsupported: every subsequent caller receives a `try_clone()` of
    /// this same bound-and-listening socket instead of a fresh one.
    shared: Mutex<Option<Socket>>,
}

impl SocketFactory {
    pub fn new(endpoint: Endpoint, ipv6_only: bool) -> Self {
        Self {
            endpoint,
            ipv6_only,
            shared: Mutex::new(None),
        }
    }

    /// Returns a bound, listening TCP socket. Call once per worker.
    pub fn get(&self) -> Result<StdTcpListener> {
        let mut shared = self.shared.lock().expect("socket factory mutex poisoned");
        if let Some(sock) = shared.as_ref() {
            let dup = sock
                .try_clone()
                .map_err(|e| ProxyError::SocketCreate(e.to_string()))?;
            return Ok(dup.into());
        }

        let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ProxyError::SocketCreate(e.to_string()))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| ProxyError::SocketCreate(e.to_string()))?;
        let port_reuse_supported = set_reuse_port(&socket);
        socket
            .set_only_v6(self.ipv6_only)
            .map_err(|e| ProxyError::SocketCreate(e.to_string()))?;
        // The listener socket is always IPv6-domain; bind using the
        // V4-mapped form (rather than unwrapping to a plain V4 address) so
        // the address family matches the socket domain.
        socket
            .bind(&self.endpoint.to_v6_sockaddr().into())
            .map_err(|e| ProxyError::SocketCreate(e.to_string()))?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| ProxyError::SocketCreate(e.to_string()))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| ProxyError::SocketCreate(e.to_string()))?;

        if port_reuse_supported {
            tracing::debug!(endpoint = %self.endpoint, "bound listener with SO_REUSEPORT");
            Ok(socket.into())
        } else {
            tracing::debug!(
                endpoint = %self.endpoint,
                "SO_REUSEPORT unsupported, falling back to a shared dup'd listener fd"
            );
            let dup_for_caller = socket
                .try_clone()
                .map_err(|e| ProxyError::SocketCreate(e.to_string()))?;
            *shared = Some(socket);
            Ok(dup_for_caller.into())
        }
    }
}

#[cfg(unix)]
fn set_reuse_port(socket: &Socket) -> bool {
    socket.set_reuse_port(true).is_ok()
}

#[cfg(not(unix))]
fn set_reuse_port(_socket: &Socket) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn get_returns_usable_listener_each_call() {
        let ep = Endpoint::from_v4(Ipv4Addr::LOCALHOST, 0);
        let factory = SocketFactory::new(ep, false);
        let first = factory.get().expect("first listener");
        assert!(first.local_addr().unwrap().port() > 0);
        let second = factory.get().expect("second listener (dup or reuseport)");
        assert!(second.local_addr().unwrap().port() > 0);
    }
}
