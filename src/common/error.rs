//! Error handling module
//!
//! This module defines the error types and result type aliases used in the crate.

use thiserror::Error;
use std::io;

/// Protocol sniffer error type
#[derive(Error, Debug)]
pub enum SniffError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed usage tag
    #[error("Invalid usage tag: {0}")]
    InvalidUsage(String),

    /// A matcher hit a condition that aborts the whole matcher chain
    #[error("Matcher {matcher} failed: {reason}")]
    Matcher {
        /// Name of the failing matcher
        matcher: &'static str,
        /// Human readable reason
        reason: String,
    },

    /// Raw accept failed, the listener is considered broken
    #[error("Accept failed on {network}://{addr}: {source}")]
    Accept {
        /// Listening network
        network: String,
        /// Listening address
        addr: String,
        /// Underlying accept error
        #[source]
        source: io::Error,
    },

    /// Sniffing an accepted connection failed
    #[error("Sniffing failed on {network}://{addr}: {source}")]
    Sniff {
        /// Listening network
        network: String,
        /// Listening address
        addr: String,
        /// Underlying pipeline error
        #[source]
        source: Box<SniffError>,
    },

    /// Network type not supported by `listen_any` / `dial`
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// No registered listener matches the given network and address
    #[error("Listener not found: {0}")]
    ListenerNotFound(String),

    /// The multi listener has been closed
    #[error("Listener closed")]
    Closed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// One or more accept tasks did not shut down cleanly
    #[error("Failed to close listeners: {}", .0.join("; "))]
    Close(Vec<String>),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

impl SniffError {
    /// Create a matcher hard failure
    pub fn matcher<S: Into<String>>(matcher: &'static str, reason: S) -> Self {
        Self::Matcher {
            matcher,
            reason: reason.into(),
        }
    }

    /// Check whether this error is a read deadline expiry
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            Self::Sniff { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

impl From<config::ConfigError> for SniffError {
    fn from(err: config::ConfigError) -> Self {
        SniffError::Config(err.to_string())
    }
}

/// Result type alias
///
/// This is a `Result` type alias that uses our custom `SniffError`.
pub type Result<T> = std::result::Result<T, SniffError>;
