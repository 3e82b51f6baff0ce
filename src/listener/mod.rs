//! Listener module
//!
//! This module turns raw listeners into a stream of sniffed connections:
//! the raw transport seam, the sniff pipeline, the multi listener that fans
//! many listeners into one `accept()`, and the client side dialer that
//! writes usage tags.

mod conn;
mod dialer;
mod multi;
mod raw;

pub use conn::{sniff, SniffedConn};
pub use dialer::{dial, write_usage};
pub use multi::{Conn, MultiListener};
pub use raw::{listen_any, BoxedStream, RawListener, RawStream};
