//! Sniffed connections
//!
//! `sniff` runs a matcher chain over a raw stream and returns a
//! `SniffedConn`: the same stream, readable from its first byte (minus any
//! stripped preamble), together with the detection record.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;

use crate::common::{SniffBuf, SniffError, Result};
use crate::protocol::{MatcherChain, SniffedInfo, TimedReader};
use super::raw::RawStream;

/// A connection that went through the matcher chain
///
/// Reads continue from the consuming view of the sniff buffer, so nothing
/// the matchers looked at is lost. Writes go straight to the raw stream.
#[derive(Debug)]
pub struct SniffedConn<S> {
    buf: SniffBuf<S>,
    info: SniffedInfo,
}

impl<S> SniffedConn<S> {
    /// What the matcher chain found out
    pub fn sniffed_info(&self) -> &SniffedInfo {
        &self.info
    }

    /// Drop the connection, keeping the detection record
    pub fn into_info(self) -> SniffedInfo {
        self.info
    }

    /// Reference to the raw stream
    pub fn get_ref(&self) -> &S {
        self.buf.get_ref()
    }

    /// Mutable reference to the raw stream
    ///
    /// Reading from it directly skips bytes still held by the sniff buffer.
    pub fn get_mut(&mut self) -> &mut S {
        self.buf.get_mut()
    }

    /// Number of sniffed bytes not yet read back
    pub fn buffered(&self) -> usize {
        self.buf.buffered()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for SniffedConn<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().buf.poll_read_normal(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for SniffedConn<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(self.get_mut().buf.get_mut()).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(self.get_mut().buf.get_mut()).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(self.get_mut().buf.get_mut()).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(self.get_mut().buf.get_mut()).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.buf.get_ref().is_write_vectored()
    }
}

/// Run `chain` against a raw stream
///
/// Every matcher starts from the first byte not yet discarded and gets
/// `timeout` for all of its reads. The chain stops at the first matcher
/// that records a protocol. A matcher error aborts the whole chain.
///
/// # Parameters
///
/// * `conn` - Raw stream, nothing read from it yet
/// * `chain` - Matchers to run, an empty chain passes the stream through
/// * `timeout` - Per matcher read deadline
/// * `network`, `addr` - Listener the stream was accepted on
/// * `peer` - Remote address, when known
pub async fn sniff<S: RawStream>(
    conn: S,
    chain: &MatcherChain,
    timeout: Duration,
    network: &str,
    addr: &str,
    peer: Option<String>,
) -> Result<SniffedConn<S>> {
    let mut buf = SniffBuf::new(conn);
    let mut info = SniffedInfo::new(network, addr, peer);

    for matcher in chain.iter() {
        buf.rewind();
        let deadline = Instant::now() + timeout;

        let discard = {
            let mut rewind = buf.rewind_reader();
            let mut reader = TimedReader::new(&mut rewind, deadline);
            matcher.matches(&mut reader, &mut info).await?
        };

        if discard > 0 {
            trace!("Matcher {} discards {} bytes", matcher.name(), discard);
            buf.discard(discard)
                .map_err(|e| SniffError::matcher(matcher.name(), e.to_string()))?;
        }

        if let Some(reason) = info.reasons.get(matcher.name()) {
            debug!("Matcher {} did not match: {}", matcher.name(), reason);
        }

        if info.is_identified() {
            break;
        }
    }

    debug!(
        "Sniffed {}://{} peer={:?} usage={:?} protocols={:?}",
        info.network,
        info.addr,
        info.peer,
        info.usage,
        info.protocol_names()
    );

    Ok(SniffedConn { buf, info })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SniffConfig;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_empty_chain_passes_through() {
        let (mut client, server) = duplex(64);
        client.write_all(b"hello").await.unwrap();
        drop(client);

        let mut conn = sniff(
            server,
            &MatcherChain::empty(),
            Duration::from_millis(20),
            "tcp",
            "127.0.0.1:1",
            None,
        ).await.unwrap();

        let info = conn.sniffed_info();
        assert_eq!(info.network, "tcp");
        assert!(info.protocols.is_empty());
        assert!(info.reasons.is_empty());

        let mut out = Vec::new();
        conn.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_writes_reach_peer() {
        let (mut client, server) = duplex(64);
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();

        let chain = MatcherChain::default_chain(&SniffConfig::default());
        let mut conn = sniff(server, &chain, Duration::from_millis(20), "tcp", "x", None)
            .await
            .unwrap();
        assert_eq!(conn.sniffed_info().protocol_names(), vec!["socks5"]);

        conn.write_all(&[0x05, 0x00]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00]);

        let mut greeting = [0u8; 3];
        conn.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, [0x05, 0x01, 0x00]);
    }

    #[tokio::test]
    async fn test_hard_failure_aborts_chain() {
        let (mut client, server) = duplex(64);
        client.write_all(&[0x05, 0x09]).await.unwrap();

        let chain = MatcherChain::default_chain(&SniffConfig::default());
        let result = sniff(server, &chain, Duration::from_millis(20), "tcp", "x", None).await;
        assert!(matches!(result, Err(SniffError::Matcher { matcher: "socks5", .. })));
    }
}
