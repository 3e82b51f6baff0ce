//! Configuration module
//!
//! This module handles application configuration: the `SniffConfig` type,
//! its defaults, layered loading from a JSON file and environment variables,
//! and validation.

// Submodules
pub mod defaults;
mod loader;
mod validator;

pub use self::defaults::ENV_PREFIX;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sniffer configuration
///
/// Every field has a default, so an empty JSON object is a valid
/// configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SniffConfig {
    /// Listen URLs, `network://address`
    pub listen: Vec<String>,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,

    /// Per matcher read deadline in milliseconds
    pub match_timeout_ms: u64,

    /// Capacity of the shared channel of sniffed connections
    pub accept_backlog: usize,

    /// Backlog passed to `listen(2)` for TCP listeners
    pub listen_backlog: u32,

    /// Maximum usage tag extension length
    pub usage_ext_max: usize,

    /// Maximum buffered bytes while looking for an HTTP/1 request head
    pub http1_max_head: usize,

    /// Maximum inspected HTTP/2 frame payload
    pub http2_max_frame: usize,

    /// Maximum assembled HTTP/2 header block
    pub http2_max_header_block: usize,
}

impl Default for SniffConfig {
    fn default() -> Self {
        Self {
            listen: Vec::new(),
            log_level: defaults::log_level(),
            match_timeout_ms: defaults::MATCH_TIMEOUT_MS,
            accept_backlog: defaults::ACCEPT_BACKLOG,
            listen_backlog: defaults::LISTEN_BACKLOG,
            usage_ext_max: defaults::USAGE_EXT_MAX,
            http1_max_head: defaults::HTTP1_MAX_HEAD,
            http2_max_frame: defaults::HTTP2_MAX_FRAME,
            http2_max_header_block: defaults::HTTP2_MAX_HEADER_BLOCK,
        }
    }
}

impl SniffConfig {
    /// Per matcher read deadline
    pub fn match_timeout(&self) -> Duration {
        Duration::from_millis(self.match_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SniffConfig::default();
        assert!(config.listen.is_empty());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.match_timeout(), Duration::from_millis(20));
        assert_eq!(config.accept_backlog, 4096);
        assert_eq!(config.usage_ext_max, 1024);
    }

    #[test]
    fn test_partial_json() {
        let config: SniffConfig = serde_json::from_str(
            r#"{"listen": ["tcp://127.0.0.1:0"], "match_timeout_ms": 50}"#,
        ).unwrap();
        assert_eq!(config.listen, vec!["tcp://127.0.0.1:0".to_string()]);
        assert_eq!(config.match_timeout_ms, 50);
        assert_eq!(config.http2_max_frame, defaults::HTTP2_MAX_FRAME);

        let unknown = serde_json::from_str::<SniffConfig>(r#"{"target": "x"}"#);
        assert!(unknown.is_err(), "Unknown fields should be rejected");
    }
}
