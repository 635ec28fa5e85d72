//! Authentication error type.

/// Authentication failure reasons.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    /// No token was presented in any recognized header.
    #[error("no token presented")]
    Missing,
    /// A Proxy-Authorization header was present but could not be decoded.
    #[error("malformed proxy authorization: {0}")]
    Malformed(&'static str),
    /// The token is not in the current allow-set.
    #[error("token not recognized")]
    Unknown,
}
