//! Protocol detection module
//!
//! This module identifies the protocol of a connection by examining its first
//! bytes through a chain of matchers, without consuming them. Matchers share
//! one `SniffedInfo` record per connection and are ordered by `MatchPhase`,
//! so preamble matchers such as the usage tag always run first.

pub mod http1;
pub mod http2;
mod info;
mod matcher;
pub mod socks5;
pub mod usage;

pub use http1::Http1Matcher;
pub use http2::Http2Matcher;
pub use info::{Protocol, SniffedInfo};
pub use matcher::{is_soft_read_error, MatchPhase, Matcher, MatcherChain, TimedReader};
pub use socks5::Socks5Matcher;
pub use usage::{Usage, UsageMatcher};
