//! Core types and constants shared across relaygate crates.
//!
//! This crate provides:
//! - Default configuration values
//! - The `RelayNode` domain type
//! - The bidirectional tunnel byte pump with transfer accounting

pub mod defaults;
pub mod io;
pub mod node;
pub mod strategy;

pub use node::RelayNode;
pub use strategy::Strategy;

/// Project name.
pub const PROJECT_NAME: &str = "relaygate";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current wall-clock time as unix epoch seconds.
///
/// All persisted timestamps (node heartbeats, session start/end) use this
/// representation so the store contract stays database-agnostic.
pub fn epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
