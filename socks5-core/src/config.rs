#![allow(clippy::too_many_arguments)]

//! Proxy configuration. Parsed from TOML into a strongly-typed
//! structure; the auth file portion supports hot-reload via the `notify`
//! crate.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tokio::sync::watch;

use crate::auth::{parse_auth_file, single_user_store, UserStore};
use crate::error::{ProxyError, Result};

/// Preferred address family for domain resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DomainAddressType {
    #[default]
    Unspecified,
    Ipv4,
    Ipv6,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MainConfig {
    pub workers: usize,
    pub port: String,
    pub listen_address: String,
    pub udp_port: Option<String>,
    pub udp_listen_address: Option<String>,
    pub listen_ipv6_only: bool,
    pub bind_address: Option<IpAddr>,
    pub bind_address_v4: Option<IpAddr>,
    pub bind_address_v6: Option<IpAddr>,
    pub bind_interface: Option<String>,
    pub domain_address_type: DomainAddressType,
    pub mark: Option<String>,
    pub udp_public_address_v4: Option<IpAddr>,
    pub udp_public_address_v6: Option<IpAddr>,
    pub dns_address: Option<String>,
    pub dns_port: Option<u16>,
}

fn default_workers() -> usize {
    1
}

fn default_port() -> String {
    "1080".into()
}

fn default_listen_address() -> String {
    "::".into()
}

impl MainConfig {
    /// Parse `mark` as a hex string (`"0x..."` or bare hex)
    pub fn mark_value(&self) -> Result<Option<u32>> {
        match &self.mark {
            None => Ok(None),
            Some(s) => u32::from_str_radix(s.trim_start_matches("0x"), 16)
                .map(Some)
                .map_err(|_| ProxyError::config(format!("invalid mark: {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MiscConfig {
    pub task_stack_size: usize,
    pub udp_recv_buffer_size: usize,
    pub connect_timeout_ms: u64,
    pub read_write_timeout_ms: u64,
    pub pid_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub log_level: String,
    pub limit_nofile: Option<u64>,
}

/// Defaults chosen to match the most common upstream deployments: a 60s
/// idle timeout, a 3s connect timeout, and an 8 KiB splice buffer.
impl Default for MiscConfig {
    fn default() -> Self {
        Self {
            task_stack_size: 8192,
            udp_recv_buffer_size: 65507,
            connect_timeout_ms: 3000,
            read_write_timeout_ms: 60_000,
            pid_file: None,
            log_file: None,
            log_level: "info".to_string(),
            limit_nofile: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub main: MainConfig,
    pub auth: AuthConfig,
    pub misc: MiscConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            main: MainConfig {
                workers: default_workers(),
                port: default_port(),
                listen_address: default_listen_address(),
                udp_port: None,
                udp_listen_address: None,
                listen_ipv6_only: false,
                bind_address: None,
                bind_address_v4: None,
                bind_address_v6: None,
                bind_interface: None,
                domain_address_type: DomainAddressType::Unspecified,
                mark: None,
                udp_public_address_v4: None,
                udp_public_address_v6: None,
                dns_address: None,
                dns_port: None,
            },
            auth: AuthConfig::default(),
            misc: MiscConfig::default(),
        }
    }
}

impl ProxyConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(&path)?;
        let cfg: ProxyConfig = toml::from_str(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.main.workers == 0 {
            return Err(ProxyError::config("main.workers must be >= 1"));
        }
        self.main.mark_value()?;
        if self.auth.file.is_some() && (self.auth.username.is_some() || self.auth.password.is_some())
        {
            return Err(ProxyError::config(
                "auth.file and auth.username/password are mutually exclusive",
            ));
        }
        Ok(())
    }

    /// Build the initial [`UserStore`] from either the inline credential
    /// pair or the auth file. `None` means "no auth" (method
    /// `0x00`); `Some` means username/password auth (method `0x02`).
    pub fn load_initial_user_store(&self) -> Result<Option<Arc<UserStore>>> {
        if let (Some(user), Some(pass)) = (&self.auth.username, &self.auth.password) {
            return Ok(Some(Arc::new(single_user_store(
                user,
                pass,
                self.main.mark_value()?,
            )?)));
        }
        if let Some(path) = &self.auth.file {
            let content = std::fs::read_to_string(path)?;
            return Ok(Some(Arc::new(parse_auth_file(&content)?)));
        }
        Ok(None)
    }

    pub fn auth_required(&self) -> bool {
        self.auth.username.is_some() || self.auth.file.is_some()
    }

    /// Watch `auth.file` for modifications and deliver newly-parsed stores
    /// over a `watch` channel. The watcher is intentionally leaked so it
    /// lives for the process lifetime instead of forcing callers to hold
    /// a guard.
    pub fn watch_auth_file(&self) -> Result<Option<watch::Receiver<Arc<UserStore>>>> {
        let Some(path) = self.auth.file.clone() else {
            return Ok(None);
        };
        let initial = {
            let content = std::fs::read_to_string(&path)?;
            Arc::new(parse_auth_file(&content)?)
        };
        let (tx, rx) = watch::channel(initial);
        let watch_path = path.clone();
        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        match std::fs::read_to_string(&watch_path)
                            .map_err(ProxyError::from)
                            .and_then(|content| parse_auth_file(&content))
                        {
                            Ok(store) => {
                                let _ = tx.send(Arc::new(store));
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "auth file reload failed, keeping previous store");
                            }
                        }
                    }
                }
            })
            .map_err(|e| ProxyError::config(e.to_string()))?;
        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| ProxyError::config(e.to_string()))?;
        std::mem::forget(watcher);
        Ok(Some(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let cfg = ProxyConfig::default();
        assert_eq!(cfg.main.workers, 1);
        assert_eq!(cfg.misc.connect_timeout_ms, 3000);
        assert_eq!(cfg.misc.read_write_timeout_ms, 60_000);
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_str = r#"
            [main]
            workers = 4
            port = "1080"
            listen_address = "0.0.0.0"
        "#;
        let cfg: ProxyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.main.workers, 4);
        assert_eq!(cfg.main.port, "1080");
    }

    #[test]
    fn rejects_zero_workers() {
        let mut cfg = ProxyConfig::default();
        cfg.main.workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_conflicting_auth_sources() {
        let mut cfg = ProxyConfig::default();
        cfg.auth.username = Some("a".into());
        cfg.auth.password = Some("b".into());
        cfg.auth.file = Some(PathBuf::from("/nonexistent"));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_auth_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alice secret").unwrap();
        let mut cfg = ProxyConfig::default();
        cfg.auth.file = Some(file.path().to_path_buf());
        let store = cfg.load_initial_user_store().unwrap().unwrap();
        assert!(store.verify("alice", "secret").is_some());
    }
}
