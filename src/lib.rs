//! Protocol Sniffer: connection-level protocol detection and listener multiplexing
//!
//! This library accepts raw byte-stream connections on any number of
//! listeners, inspects the first bytes of every connection to find out which
//! protocol the peer speaks, and hands the connection over still readable
//! from its first byte, tagged with what was found.
//!
//! # Main Features
//!
//! - Rewindable buffer: look at the start of a stream without consuming it
//! - Usage tags: an 8 byte `@xxxxxx` preamble naming the target service,
//!   stripped before the connection reaches the caller
//! - SOCKS5, HTTP/1 (with WebSocket upgrade) and HTTP/2 (with HPACK decoding
//!   for WebSocket and gRPC) detection
//! - One `accept()` over many TCP and unix listeners
//!
//! # Example
//!
//! ```no_run
//! use protocol_sniffer::{MultiListener, MatcherChain, Protocol, Result};
//! use protocol_sniffer::config::SniffConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let listener = MultiListener::new();
//!     let chain = MatcherChain::default_chain(&SniffConfig::default());
//!     listener.add_listen("tcp", "0.0.0.0:8080", chain).await?;
//!
//!     while let Some(result) = listener.accept().await {
//!         let conn = result?;
//!         if conn.sniffed_info().has(Protocol::Socks5) {
//!             // hand over to the SOCKS5 server
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

// Public modules
pub mod common;
pub mod config;
pub mod listener;
pub mod protocol;

// Re-export commonly used structures and functions for convenience
pub use common::{SniffError, Result, SniffBuf};
pub use listener::{dial, sniff, write_usage, MultiListener, SniffedConn};
pub use protocol::{Matcher, MatcherChain, Protocol, SniffedInfo, Usage};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
