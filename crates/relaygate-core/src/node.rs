//! Relay node domain type.

use serde::{Deserialize, Serialize};

/// A remote relay node that performs the outbound leg of proxied requests.
///
/// Identity is `(host, port)`; re-registering an existing pair upserts the
/// record. Timestamps are unix epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayNode {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub residential: bool,
    #[serde(default = "default_online")]
    pub online: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub last_checked: i64,
}

fn default_online() -> bool {
    true
}

impl RelayNode {
    /// Create a node that is online as of `now`.
    pub fn new(host: impl Into<String>, port: u16, residential: bool, now: i64) -> Self {
        Self {
            host: host.into(),
            port,
            residential,
            online: true,
            created_at: now,
            last_checked: now,
        }
    }

    /// `host:port` dial target.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether `other` refers to the same node.
    pub fn same_endpoint(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }
}

impl std::fmt::Display for RelayNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_and_identity() {
        let node = RelayNode::new("relay-1.example.net", 9001, true, 1_700_000_000);
        assert_eq!(node.addr(), "relay-1.example.net:9001");
        assert!(node.same_endpoint("relay-1.example.net", 9001));
        assert!(!node.same_endpoint("relay-1.example.net", 9002));
        assert!(node.online);
    }

    #[test]
    fn deserialize_defaults_online() {
        let node: RelayNode =
            serde_json::from_str(r#"{"host":"h1","port":9001,"residential":true}"#).unwrap();
        assert!(node.online);
        assert_eq!(node.created_at, 0);
    }
}
