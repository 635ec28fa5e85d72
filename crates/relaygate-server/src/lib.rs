//! Relaygate server library.
//!
//! This module exposes the server implementation for use by integration
//! tests and potential embedding scenarios.

mod admin;
mod error;
mod gateway;
mod handler;
mod health;
mod http;
mod pool;
mod rate_limit;
mod session;
mod state;
mod util;

pub mod cli;
mod server;

pub use cli::ServerArgs;
pub use error::ProxyError;
pub use gateway::{Frame, Gateway, JobOutcome};
pub use pool::{NodePool, SelectionFilter};
pub use rate_limit::BurstGuard;
pub use session::{ActiveTokenState, SessionTracker};
pub use server::{run, run_with_shutdown, DEFAULT_SHUTDOWN_TIMEOUT};
pub use tokio_util::sync::CancellationToken;
