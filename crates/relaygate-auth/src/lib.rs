//! Token authentication for relaygate.
//!
//! Tokens are opaque bearer strings. The proxy never consults the store on
//! the hot path: it checks an in-memory allow-set snapshot that a
//! background task refreshes periodically.
//!
//! # Example
//!
//! ```
//! use relaygate_auth::{AllowSet, ReloadableTokens};
//!
//! let tokens = ReloadableTokens::new(AllowSet::from_tokens(["TEST-TOKEN-123"]));
//! assert!(tokens.contains("TEST-TOKEN-123"));
//!
//! // Later, swap in a freshly loaded set
//! tokens.reload(AllowSet::from_tokens(["NEW-TOKEN"]));
//! assert!(!tokens.contains("TEST-TOKEN-123"));
//! ```

mod allowset;
mod error;
mod extract;
mod reloadable;

pub use allowset::AllowSet;
pub use error::AuthError;
pub use extract::{extract_token, Credentials};
pub use reloadable::ReloadableTokens;
