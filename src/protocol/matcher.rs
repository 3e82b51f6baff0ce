//! Matcher contract and matcher chain
//!
//! A matcher inspects the replayable prefix of a connection and either
//! records a protocol tag in the shared `SniffedInfo` or gives up softly by
//! recording a reason. Only hard failures (real I/O errors, broken
//! invariants) are returned as errors.

use std::fmt;
use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{timeout_at, Instant};

use crate::common::Result;
use crate::config::SniffConfig;
use super::http1::Http1Matcher;
use super::http2::Http2Matcher;
use super::info::SniffedInfo;
use super::socks5::Socks5Matcher;
use super::usage::UsageMatcher;

/// When a matcher runs relative to the others
///
/// Preamble matchers strip application framing (the usage tag) that protocol
/// matchers would otherwise misread, so they always run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchPhase {
    /// Application framing in front of the real protocol
    Preamble,
    /// Wire protocol identification
    Protocol,
}

/// Replayable reader bounded by a deadline
///
/// Every read fails with `io::ErrorKind::TimedOut` once the deadline passes.
pub struct TimedReader<'r> {
    inner: &'r mut (dyn AsyncRead + Unpin + Send + 'r),
    deadline: Instant,
}

impl<'r> TimedReader<'r> {
    /// Wrap a reader with an absolute deadline
    pub fn new(inner: &'r mut (dyn AsyncRead + Unpin + Send + 'r), deadline: Instant) -> Self {
        Self { inner, deadline }
    }

    /// The deadline applied to every read
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Read whatever is available, `Ok(0)` means EOF
    pub async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match timeout_at(self.deadline, self.inner.read(buf)).await {
            Ok(result) => result,
            Err(_) => Err(deadline_exceeded()),
        }
    }

    /// Fill `buf` completely
    ///
    /// EOF before `buf` is full is `io::ErrorKind::UnexpectedEof`.
    pub async fn read_full(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match timeout_at(self.deadline, self.inner.read_exact(buf)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(deadline_exceeded()),
        }
    }

    /// Read one `\n` terminated line of at most `max` bytes
    ///
    /// The newline is consumed but not returned. A longer line is
    /// `io::ErrorKind::InvalidData`.
    pub async fn read_line(&mut self, max: usize) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.read_full(&mut byte).await?;
            if byte[0] == b'\n' {
                return Ok(line);
            }
            if line.len() == max {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line exceeds {} bytes", max),
                ));
            }
            line.push(byte[0]);
        }
    }
}

fn deadline_exceeded() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "read deadline exceeded")
}

/// Whether a read error is an expected sniffing outcome rather than a failure
///
/// Deadline expiry and a short stream only mean "not this protocol".
pub fn is_soft_read_error(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::UnexpectedEof)
}

/// Record a soft read failure as a reason, propagate anything else
pub(crate) fn soft_fail(
    info: &mut SniffedInfo,
    matcher: &'static str,
    context: &str,
    err: io::Error,
) -> Result<usize> {
    if is_soft_read_error(&err) {
        info.set_reason(matcher, format!("{}: {}", context, err));
        Ok(0)
    } else {
        Err(err.into())
    }
}

/// Protocol matcher
///
/// `matches` receives the replayable view, already rewound to the first byte
/// and bounded by this matcher's deadline. It returns the number of leading
/// bytes to drop permanently before the connection is handed to the caller.
pub trait Matcher: Send + Sync {
    /// Name used as the key in `SniffedInfo::reasons`
    fn name(&self) -> &'static str;

    /// Ordering phase
    fn phase(&self) -> MatchPhase {
        MatchPhase::Protocol
    }

    /// Try to identify the protocol
    fn matches<'a, 'r: 'a>(
        &'a self,
        reader: &'a mut TimedReader<'r>,
        info: &'a mut SniffedInfo,
    ) -> BoxFuture<'a, Result<usize>>;
}

/// Ordered set of matchers run against every connection of one listener
#[derive(Clone, Default)]
pub struct MatcherChain {
    matchers: Vec<Arc<dyn Matcher>>,
}

impl MatcherChain {
    /// Chain without matchers; connections pass through untouched
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a chain, ordering the matchers by phase
    ///
    /// Matchers within one phase keep the order they were given in.
    pub fn new(matchers: Vec<Arc<dyn Matcher>>) -> Self {
        let mut chain = Self { matchers };
        chain.matchers.sort_by_key(|m| m.phase());
        chain
    }

    /// Usage tag, SOCKS5, HTTP/1 and HTTP/2, configured from `config`
    pub fn default_chain(config: &SniffConfig) -> Self {
        let matchers: Vec<Arc<dyn Matcher>> = vec![
            Arc::new(UsageMatcher::new(config.usage_ext_max)),
            Arc::new(Socks5Matcher),
            Arc::new(Http1Matcher::new(config.http1_max_head)),
            Arc::new(Http2Matcher::new(config.http2_max_frame, config.http2_max_header_block)),
        ];
        Self::new(matchers)
    }

    /// Add a matcher, keeping the phase order
    pub fn with(mut self, matcher: Arc<dyn Matcher>) -> Self {
        self.matchers.push(matcher);
        self.matchers.sort_by_key(|m| m.phase());
        self
    }

    /// Matchers in execution order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Matcher>> {
        self.matchers.iter()
    }

    /// Matcher names in execution order
    pub fn names(&self) -> Vec<&'static str> {
        self.matchers.iter().map(|m| m.name()).collect()
    }

    /// Number of matchers in the chain
    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    /// Whether the chain sniffs nothing
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl fmt::Debug for MatcherChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
