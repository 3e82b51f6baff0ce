//! Usage tag
//!
//! A usage tag is an 8 byte ASCII preamble a client writes before its real
//! payload to say which logical service the connection is for:
//!
//! ```text
//! @rpcapi!            tag only
//! @aystrc:extra\n     tag followed by an extension line
//! ```
//!
//! Byte 0 is `@`, bytes 1..=6 are printable ASCII. The last byte is `\n`,
//! `:` or any other printable ASCII byte; `:` announces an extension line of
//! at most 1024 bytes terminated by `\n`. The tag (and its extension line) is
//! stripped from the stream before the connection reaches the caller.

use std::fmt;
use std::str::FromStr;

use futures::future::BoxFuture;
use log::trace;

use crate::common::{SniffError, Result};
use crate::config::defaults;
use super::info::SniffedInfo;
use super::matcher::{soft_fail, MatchPhase, Matcher, TimedReader};

/// 8 byte usage tag
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Usage([u8; Usage::LEN]);

impl Usage {
    /// Length of every tag
    pub const LEN: usize = 8;

    /// Tag for connections that do not carry a real usage
    pub const NONE: Usage = Usage::must(b"@nonono\n");

    /// Build a tag from a literal, panicking if it is not a valid tag
    ///
    /// Meant for constants, where the panic happens at compile time.
    pub const fn must(bytes: &[u8; Usage::LEN]) -> Self {
        if !Self::is_valid(bytes) {
            panic!("invalid usage tag literal");
        }
        Usage(*bytes)
    }

    /// Check the tag format
    pub const fn is_valid(bytes: &[u8; Usage::LEN]) -> bool {
        if bytes[0] != b'@' {
            return false;
        }
        let mut i = 1;
        while i < Usage::LEN - 1 {
            if !bytes[i].is_ascii_graphic() {
                return false;
            }
            i += 1;
        }
        bytes[Usage::LEN - 1] == b'\n' || bytes[Usage::LEN - 1].is_ascii_graphic()
    }

    /// Parse a tag from a string such as `"@rpcapi!"`
    pub fn new(tag: &str) -> Result<Self> {
        Self::try_from(tag.as_bytes())
    }

    /// Raw tag bytes
    pub fn as_bytes(&self) -> &[u8; Usage::LEN] {
        &self.0
    }

    /// Whether an extension line follows the tag
    pub fn has_ext(&self) -> bool {
        self.0[Usage::LEN - 1] == b':'
    }

    /// The six name bytes between `@` and the final byte
    pub fn name(&self) -> &str {
        // Validated as printable ASCII on construction.
        std::str::from_utf8(&self.0[1..Usage::LEN - 1]).unwrap_or_default()
    }
}

impl TryFrom<&[u8]> for Usage {
    type Error = SniffError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; Usage::LEN] = bytes.try_into().map_err(|_| {
            SniffError::InvalidUsage(format!(
                "expected {} bytes, got {}", Usage::LEN, bytes.len()
            ))
        })?;
        if !Self::is_valid(&bytes) {
            return Err(SniffError::InvalidUsage(bytes.escape_ascii().to_string()));
        }
        Ok(Usage(bytes))
    }
}

impl FromStr for Usage {
    type Err = SniffError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.escape_ascii())
    }
}

impl fmt::Debug for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Usage(\"{}\")", self.0.escape_ascii())
    }
}

/// Strips a leading usage tag
#[derive(Debug, Clone)]
pub struct UsageMatcher {
    /// Maximum extension line length
    ext_max: usize,
}

impl Default for UsageMatcher {
    fn default() -> Self {
        Self::new(defaults::USAGE_EXT_MAX)
    }
}

impl UsageMatcher {
    pub const NAME: &'static str = "usage";

    pub fn new(ext_max: usize) -> Self {
        Self { ext_max }
    }

    async fn run(&self, r: &mut TimedReader<'_>, info: &mut SniffedInfo) -> Result<usize> {
        let mut tag = [0u8; Usage::LEN];

        // Fail fast on anything that does not even start like a tag.
        if let Err(e) = r.read_full(&mut tag[..1]).await {
            return soft_fail(info, Self::NAME, "short read", e);
        }
        if tag[0] != b'@' {
            info.set_reason(Self::NAME, format!("unexpected first byte 0x{:02x}", tag[0]));
            return Ok(0);
        }
        if let Err(e) = r.read_full(&mut tag[1..]).await {
            return soft_fail(info, Self::NAME, "short read", e);
        }

        let usage = match Usage::try_from(&tag[..]) {
            Ok(usage) => usage,
            Err(e) => {
                info.set_reason(Self::NAME, e.to_string());
                return Ok(0);
            }
        };

        if !usage.has_ext() {
            trace!("Usage tag {} found", usage);
            info.usage = Some(usage);
            return Ok(Usage::LEN);
        }

        let ext = match r.read_line(self.ext_max).await {
            Ok(ext) => ext,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                info.set_reason(
                    Self::NAME,
                    format!("extension of {} exceeds {} bytes", usage, self.ext_max),
                );
                return Ok(0);
            }
            Err(e) => return soft_fail(info, Self::NAME, "unterminated extension", e),
        };

        trace!("Usage tag {} found with {} byte extension", usage, ext.len());
        let discard = Usage::LEN + ext.len() + 1;
        info.usage = Some(usage);
        info.usage_ext = Some(String::from_utf8_lossy(&ext).into_owned());
        Ok(discard)
    }
}

impl Matcher for UsageMatcher {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn phase(&self) -> MatchPhase {
        MatchPhase::Preamble
    }

    fn matches<'a, 'r: 'a>(
        &'a self,
        reader: &'a mut TimedReader<'r>,
        info: &'a mut SniffedInfo,
    ) -> BoxFuture<'a, Result<usize>> {
        Box::pin(self.run(reader, info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    async fn run_matcher(data: &[u8]) -> (Result<usize>, SniffedInfo) {
        let mut src = data;
        let mut reader = TimedReader::new(&mut src, Instant::now() + Duration::from_millis(50));
        let mut info = SniffedInfo::new("tcp", "127.0.0.1:0", None);
        let result = UsageMatcher::default().matches(&mut reader, &mut info).await;
        (result, info)
    }

    #[test]
    fn test_usage_parse() {
        let usage: Usage = "@rpcapi!".parse().unwrap();
        assert_eq!(usage.name(), "rpcapi");
        assert!(!usage.has_ext());
        assert_eq!(usage.to_string(), "@rpcapi!");

        assert!(Usage::new("@aystrc:").unwrap().has_ext());
        assert_eq!(Usage::NONE.to_string(), "@nonono\\n");

        assert!(Usage::new("rpcapi!!").is_err());
        assert!(Usage::new("@rpc api").is_err());
        assert!(Usage::new("@short").is_err());
        assert!(Usage::try_from(&b"@rpcapi\0"[..]).is_err());
    }

    #[tokio::test]
    async fn test_match_plain_tag() {
        let (result, info) = run_matcher(b"@rpcapi!payload").await;
        assert_eq!(result.unwrap(), 8);
        assert_eq!(info.usage, Some(Usage::must(b"@rpcapi!")));
        assert!(info.usage_ext.is_none());
        assert!(info.protocols.is_empty());
    }

    #[tokio::test]
    async fn test_match_extended_tag() {
        let (result, info) = run_matcher(b"@aystrc:extra-line\npayload").await;
        assert_eq!(result.unwrap(), 8 + "extra-line".len() + 1);
        assert_eq!(info.usage, Some(Usage::must(b"@aystrc:")));
        assert_eq!(info.usage_ext.as_deref(), Some("extra-line"));
    }

    #[tokio::test]
    async fn test_soft_failures() {
        let (result, info) = run_matcher(b"GET / HTTP/1.1\r\n").await;
        assert_eq!(result.unwrap(), 0);
        assert!(info.reasons.contains_key("usage"));
        assert!(info.usage.is_none());

        let (result, info) = run_matcher(b"@rp").await;
        assert_eq!(result.unwrap(), 0);
        assert!(info.reasons["usage"].contains("short read"));

        let (result, info) = run_matcher(b"@aystrc:no newline").await;
        assert_eq!(result.unwrap(), 0);
        assert!(info.usage.is_none(), "usage is only recorded on full success");

        let mut long = b"@aystrc:".to_vec();
        long.extend(std::iter::repeat(b'x').take(2000));
        long.push(b'\n');
        let (result, info) = run_matcher(&long).await;
        assert_eq!(result.unwrap(), 0);
        assert!(info.reasons["usage"].contains("exceeds"));
    }
}
