//! SOCKS5 greeting matcher
//!
//! Recognises the client method selection message of RFC 1928:
//!
//! ```text
//! +-----+----------+----------+
//! | VER | NMETHODS | METHODS  |
//! +-----+----------+----------+
//! |  1  |    1     | 1 to 255 |
//! +-----+----------+----------+
//! ```
//!
//! Nothing is discarded; the SOCKS5 server needs the full greeting.

use futures::future::BoxFuture;
use log::trace;

use crate::common::{SniffError, Result};
use super::info::{Protocol, SniffedInfo};
use super::matcher::{soft_fail, Matcher, TimedReader};

/// Protocol version byte
pub const SOCKS5_VERSION: u8 = 0x05;

/// No authentication required
pub const METHOD_NO_AUTH: u8 = 0x00;
/// GSSAPI
pub const METHOD_GSSAPI: u8 = 0x01;
/// Username/password
pub const METHOD_USER_PASS: u8 = 0x02;

const MAX_METHODS: u8 = 3;

/// SOCKS5 greeting matcher
#[derive(Debug, Clone, Copy, Default)]
pub struct Socks5Matcher;

impl Socks5Matcher {
    pub const NAME: &'static str = "socks5";

    async fn run(&self, r: &mut TimedReader<'_>, info: &mut SniffedInfo) -> Result<usize> {
        let mut head = [0u8; 2];
        if let Err(e) = r.read_full(&mut head[..1]).await {
            return soft_fail(info, Self::NAME, "short read", e);
        }
        if head[0] != SOCKS5_VERSION {
            info.set_reason(Self::NAME, format!("unexpected version 0x{:02x}", head[0]));
            return Ok(0);
        }
        if let Err(e) = r.read_full(&mut head[1..]).await {
            return soft_fail(info, Self::NAME, "short read", e);
        }

        let nmethods = head[1];
        if nmethods == 0 || nmethods > MAX_METHODS {
            return Err(SniffError::matcher(
                Self::NAME,
                format!("invalid auth method count {}", nmethods),
            ));
        }

        let mut methods = [0u8; MAX_METHODS as usize];
        let methods = &mut methods[..nmethods as usize];
        if let Err(e) = r.read_full(methods).await {
            return soft_fail(info, Self::NAME, "short read", e);
        }
        if let Some(m) = methods
            .iter()
            .find(|m| !matches!(**m, METHOD_NO_AUTH | METHOD_GSSAPI | METHOD_USER_PASS))
        {
            info.set_reason(Self::NAME, format!("unsupported auth method 0x{:02x}", m));
            return Ok(0);
        }

        trace!("SOCKS5 greeting with methods {:?}", methods);
        info.push_protocol(Protocol::Socks5);
        Ok(0)
    }
}

impl Matcher for Socks5Matcher {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn matches<'a, 'r: 'a>(
        &'a self,
        reader: &'a mut TimedReader<'r>,
        info: &'a mut SniffedInfo,
    ) -> BoxFuture<'a, Result<usize>> {
        Box::pin(self.run(reader, info))
    }
}
