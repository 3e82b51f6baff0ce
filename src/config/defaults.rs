//! Default configuration values
//!
//! This module provides default values for configuration options.
//! It is the single source of truth for defaults, shared by the serde
//! defaults of `SniffConfig`, the matchers and the command line tool.

use std::time::Duration;

/// Environment variable prefix for all configuration options
///
/// `PROTOCOL_SNIFFER_MATCH_TIMEOUT_MS=50` overrides `match_timeout_ms`.
pub const ENV_PREFIX: &str = "PROTOCOL_SNIFFER";

/// Default log level
pub const LOG_LEVEL: &str = "info";

/// Per matcher read deadline in milliseconds
pub const MATCH_TIMEOUT_MS: u64 = 20;

/// Capacity of the shared channel of sniffed connections
pub const ACCEPT_BACKLOG: usize = 4096;

/// Backlog passed to `listen(2)`
pub const LISTEN_BACKLOG: u32 = 1024;

/// Maximum length of a usage tag extension line
pub const USAGE_EXT_MAX: usize = 1024;

/// Maximum number of bytes buffered while looking for an HTTP/1 request head
pub const HTTP1_MAX_HEAD: usize = 8192;

/// Maximum HTTP/2 frame payload inspected while sniffing
pub const HTTP2_MAX_FRAME: usize = 16384;

/// Maximum size of an assembled HTTP/2 header block
pub const HTTP2_MAX_HEADER_BLOCK: usize = 65536;

/// Default log level
pub fn log_level() -> String {
    LOG_LEVEL.to_string()
}

/// Default per matcher deadline
pub fn match_timeout() -> Duration {
    Duration::from_millis(MATCH_TIMEOUT_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(log_level(), "info");
        assert_eq!(match_timeout(), Duration::from_millis(20));
        assert!(USAGE_EXT_MAX <= HTTP1_MAX_HEAD);
        assert!(HTTP2_MAX_FRAME <= HTTP2_MAX_HEADER_BLOCK);
    }
}
