//! Core, I/O-light types shared across the SOCKS5 proxy: configuration,
//! the error taxonomy, the unified [`Endpoint`] representation, and the
//! hot-reloadable user/auth store.

pub mod auth;
pub mod config;
pub mod endpoint;
pub mod error;

pub use auth::{User, UserStore, UserStoreBuilder};
pub use config::ProxyConfig;
pub use endpoint::Endpoint;
pub use error::{ProxyError, Result, SocksReplyCode};
