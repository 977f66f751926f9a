//! Replaces a `Session extends Server extends Socks5` virtual-binder
//! inheritance chain with a single policy object implementing a narrow
//! [`Binder`] trait. The protocol driver in
//! [`crate::session`] never applies bind/interface/mark policy itself —
//! it only calls through this trait, so the driver stays independent of
//! deployment policy.

use std::net::{IpAddr, SocketAddr, SocketAddrV6};
use std::sync::Arc;

use socket2::Socket;
use socks5_core::config::ProxyConfig;
use socks5_core::endpoint::Endpoint;
use socks5_core::error::{ProxyError, Result};
use socks5_core::User;

pub trait Binder: Send + Sync {
    /// Apply bind-address/bind-interface/mark policy to a freshly created
    /// TCP socket before `connect()`.
    fn bind_tcp(&self, socket: &Socket, dst: &Endpoint) -> Result<()>;

    /// Apply the same policy to a UDP relay socket before `bind()`. Returns
    /// nothing; the bound local address is read back by the caller after
    /// `bind()`.
    fn bind_udp(&self, socket: &Socket) -> Result<()>;
}

/// Concrete binder driven by [`ProxyConfig`] and the session's
/// authenticated user, if any.
pub struct PolicyBinder {
    config: Arc<ProxyConfig>,
    user: Option<Arc<User>>,
}

impl PolicyBinder {
    pub fn new(config: Arc<ProxyConfig>, user: Option<Arc<User>>) -> Self {
        Self { config, user }
    }

    fn mark(&self) -> Result<Option<u32>> {
        if let Some(m) = self.user.as_ref().and_then(|u| u.mark) {
            return Ok(Some(m));
        }
        self.config.main.mark_value()
    }

    fn apply_mark(&self, socket: &Socket) -> Result<()> {
        if let Some(mark) = self.mark()? {
            if let Err(e) = apply_socket_mark(socket, mark) {
                tracing::warn!(error = %e, mark, "failed to apply firewall mark");
            }
        }
        Ok(())
    }

    fn apply_interface(&self, socket: &Socket) -> Result<()> {
        if let Some(iface) = &self.config.main.bind_interface {
            if let Err(e) = apply_bind_interface(socket, iface) {
                tracing::warn!(error = %e, interface = %iface, "failed to bind to interface");
            }
        }
        Ok(())
    }
}

impl Binder for PolicyBinder {
    fn bind_tcp(&self, socket: &Socket, dst: &Endpoint) -> Result<()> {
        let bind_addr = if dst.is_v4_mapped() {
            self.config.main.bind_address_v4.or(self.config.main.bind_address)
        } else {
            self.config.main.bind_address_v6.or(self.config.main.bind_address)
        };
        if let Some(addr) = bind_addr {
            socket
                .bind(&dual_stack_addr(addr, 0).into())
                .map_err(|e| ProxyError::SocketCreate(e.to_string()))?;
        }
        self.apply_interface(socket)?;
        self.apply_mark(socket)?;
        Ok(())
    }

    fn bind_udp(&self, socket: &Socket) -> Result<()> {
        self.apply_interface(socket)?;
        self.apply_mark(socket)?;
        Ok(())
    }
}

/// The sockets this proxy creates are always `AF_INET6`; a plain V4 bind
/// address must be lifted to its V4-mapped form to match.
fn dual_stack_addr(ip: IpAddr, port: u16) -> SocketAddr {
    match ip {
        IpAddr::V4(v4) => SocketAddr::V6(SocketAddrV6::new(v4.to_ipv6_mapped(), port, 0, 0)),
        IpAddr::V6(v6) => SocketAddr::V6(SocketAddrV6::new(v6, port, 0, 0)),
    }
}

#[cfg(target_os = "linux")]
fn apply_socket_mark(socket: &Socket, mark: u32) -> std::io::Result<()> {
    socket.set_mark(mark)
}

#[cfg(not(target_os = "linux"))]
fn apply_socket_mark(_socket: &Socket, _mark: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "SO_MARK is only supported on Linux",
    ))
}

#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
fn apply_bind_interface(socket: &Socket, iface: &str) -> std::io::Result<()> {
    socket.bind_device(Some(iface.as_bytes()))
}

#[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
fn apply_bind_interface(_socket: &Socket, _iface: &str) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "bind-to-interface is only supported on Linux-family targets",
    ))
}
