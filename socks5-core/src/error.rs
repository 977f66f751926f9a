use thiserror::Error;

pub type Result<T, E = ProxyError> = core::result::Result<T, E>;

/// Error taxonomy for the proxy core, mapped to SOCKS5 reply codes in
/// [`SocksReplyCode`] where applicable.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config: {0}")]
    Config(String),
    #[error("malformed greeting")]
    MalformedGreeting,
    #[error("no mutually acceptable auth method")]
    NoAcceptableMethod,
    #[error("bad credentials")]
    BadCredentials,
    #[error("unsupported command: {0:#x}")]
    UnsupportedCommand(u8),
    #[error("unsupported address type: {0:#x}")]
    UnsupportedAddressType(u8),
    #[error("address resolution failed: {0}")]
    Resolution(String),
    #[error("socket creation failed: {0}")]
    SocketCreate(String),
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("session cancelled")]
    Cancelled,
    #[error("duplicate user: {0}")]
    DuplicateUser(String),
}

impl From<toml::de::Error> for ProxyError {
    fn from(e: toml::de::Error) -> Self {
        ProxyError::Config(e.to_string())
    }
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// SOCKS5 reply codes (RFC 1928 §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocksReplyCode {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    CommandNotSupported = 0x07,
    HostUnreachable = 0x04,
    AddressTypeNotSupported = 0x08,
}

impl From<&ProxyError> for SocksReplyCode {
    fn from(e: &ProxyError) -> Self {
        match e {
            ProxyError::UnsupportedCommand(_) => SocksReplyCode::CommandNotSupported,
            ProxyError::Resolution(_) | ProxyError::UnsupportedAddressType(_) => {
                SocksReplyCode::AddressTypeNotSupported
            }
            ProxyError::SocketCreate(_) => SocksReplyCode::GeneralFailure,
            ProxyError::ConnectFailed(_) | ProxyError::ConnectTimeout => {
                SocksReplyCode::HostUnreachable
            }
            _ => SocksReplyCode::GeneralFailure,
        }
    }
}
