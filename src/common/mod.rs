//! Common module
//!
//! This module contains shared errors, logging setup, address helpers and the
//! rewindable buffer used throughout the crate.

pub mod error;
pub mod log;
pub mod net;
pub mod sniff_buf;

// Re-export commonly used types and functions
pub use error::{SniffError, Result};
pub use log::init_logger;
pub use net::{resolve_addr, parse_listen_url, format_listen_url};
pub use sniff_buf::{SniffBuf, RewindReader, NormalReader};
