//! Server error types.

use relaygate_auth::AuthError;
use relaygate_store::StoreError;

/// Proxy error taxonomy.
///
/// Each variant maps to the wire response the client receives, where one is
/// still possible. `Tunnel` happens after the tunnel opened — there is
/// nothing left to send, the connection just closes.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("client protocol: {0}")]
    ClientProtocol(&'static str),
    #[error("auth: {0}")]
    Auth(#[from] AuthError),
    #[error("rate limited: {0}")]
    RateLimited(&'static str),
    #[error("no upstream node available")]
    NoUpstream,
    #[error("upstream connect failed after {attempts} attempts: {last}")]
    ConnectFailed {
        attempts: u32,
        #[source]
        last: std::io::Error,
    },
    #[error("tunnel: {0}")]
    Tunnel(std::io::Error),
    #[error("gateway: {0}")]
    Gateway(&'static str),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("config: {0}")]
    Config(String),
}

impl ProxyError {
    /// The raw response owed to the client, if the connection is still in a
    /// state where one can be written.
    pub fn response(&self) -> Option<&'static [u8]> {
        match self {
            ProxyError::ClientProtocol(_) => Some(crate::http::RESPONSE_400),
            ProxyError::Auth(AuthError::Malformed(_)) => Some(crate::http::RESPONSE_400),
            ProxyError::Auth(_) => Some(crate::http::RESPONSE_403),
            ProxyError::RateLimited(_) => Some(crate::http::RESPONSE_429),
            ProxyError::NoUpstream => Some(crate::http::RESPONSE_502_NO_NODES),
            ProxyError::ConnectFailed { .. } => Some(crate::http::RESPONSE_502_CONNECT),
            ProxyError::Gateway(_) => Some(crate::http::RESPONSE_502_GATEWAY),
            ProxyError::Tunnel(_) => None,
            ProxyError::Io(_) | ProxyError::Store(_) | ProxyError::Config(_) => {
                Some(crate::http::RESPONSE_500)
            }
        }
    }

    /// Short classification for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::ClientProtocol(_) => "client_protocol",
            ProxyError::Auth(_) => "auth",
            ProxyError::RateLimited(_) => "rate_limited",
            ProxyError::NoUpstream => "no_upstream",
            ProxyError::ConnectFailed { .. } => "connect_failed",
            ProxyError::Tunnel(_) => "tunnel",
            ProxyError::Gateway(_) => "gateway",
            ProxyError::Io(_) => "io",
            ProxyError::Store(_) => "store",
            ProxyError::Config(_) => "config",
        }
    }
}
