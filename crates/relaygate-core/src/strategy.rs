//! Upstream selection strategy.

use serde::{Deserialize, Serialize};

/// Node selection strategy identifier, used in configuration files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum Strategy {
    #[default]
    RoundRobin,
    Random,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::RoundRobin => f.write_str("RoundRobin"),
            Strategy::Random => f.write_str("Random"),
        }
    }
}
