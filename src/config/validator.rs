//! Configuration validator

use log::warn;

use crate::common::{parse_listen_url, SniffError, Result};
use super::SniffConfig;

impl SniffConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Validate listen URLs
        for url in &self.listen {
            parse_listen_url(url)?;
        }

        // Validate limits
        let limits = [
            ("match_timeout_ms", self.match_timeout_ms as usize),
            ("accept_backlog", self.accept_backlog),
            ("listen_backlog", self.listen_backlog as usize),
            ("usage_ext_max", self.usage_ext_max),
            ("http1_max_head", self.http1_max_head),
            ("http2_max_frame", self.http2_max_frame),
            ("http2_max_header_block", self.http2_max_header_block),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(SniffError::Config(format!("{} must be greater than 0", name)));
            }
        }

        if self.http2_max_header_block < self.http2_max_frame {
            return Err(SniffError::Config(
                "http2_max_header_block must not be smaller than http2_max_frame".to_string()
            ));
        }

        // Validate log level
        match self.log_level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            level => {
                warn!("Invalid log level: {}. Using default: info", level);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default() {
        assert!(SniffConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = SniffConfig {
            match_timeout_ms: 0,
            ..SniffConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SniffConfig {
            accept_backlog: 0,
            ..SniffConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_listen_urls() {
        let config = SniffConfig {
            listen: vec!["tcp://127.0.0.1:0".to_string(), "unix:///tmp/a.sock".to_string()],
            ..SniffConfig::default()
        };
        assert!(config.validate().is_ok());

        let config = SniffConfig {
            listen: vec!["udp://127.0.0.1:53".to_string()],
            ..SniffConfig::default()
        };
        assert!(matches!(config.validate(), Err(SniffError::UnsupportedNetwork(_))));
    }
}
