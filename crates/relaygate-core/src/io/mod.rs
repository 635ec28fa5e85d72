//! Tunnel I/O primitives.

mod relay;

pub use relay::{pump_until_first_close, NoCount, PumpCause, PumpEnd, TransferCounter};
