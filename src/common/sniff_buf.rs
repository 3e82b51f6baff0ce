//! Rewindable byte buffer
//!
//! A byte stream can only be read once. `SniffBuf` wraps one raw stream and
//! hands out two read views over it:
//!
//! - [`RewindReader`] tees every byte pulled from the raw stream into an
//!   internal buffer, so after [`RewindReader::rewind`] the same bytes are
//!   delivered again, in the same order.
//! - [`NormalReader`] drains the buffer first and then reads the raw stream
//!   directly. Bytes it delivers are gone for good, including for the
//!   rewind view.
//!
//! Do all the sniffing through the rewind view first, then switch to the
//! normal view. Whoever reads exclusively through the normal view from then
//! on observes exactly the original stream.

use bytes::{Buf, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Buffer holding everything read through the rewind view that the normal
/// view has not consumed yet
#[derive(Debug)]
pub struct SniffBuf<S> {
    /// Data source
    src: S,
    /// Bytes pulled from `src` and not yet consumed
    buffer: BytesMut,
    /// Replay cursor into `buffer`
    off: usize,
}

impl<S> SniffBuf<S> {
    /// Wrap a raw stream
    pub fn new(src: S) -> Self {
        Self {
            src,
            buffer: BytesMut::new(),
            off: 0,
        }
    }

    /// Borrow the replayable view
    pub fn rewind_reader(&mut self) -> RewindReader<'_, S> {
        RewindReader { buf: self }
    }

    /// Borrow the consuming view
    pub fn normal_reader(&mut self) -> NormalReader<'_, S> {
        NormalReader { buf: self }
    }

    /// Reset the replay cursor to the first buffered byte
    pub fn rewind(&mut self) {
        self.off = 0;
    }

    /// Number of buffered bytes not yet consumed by the normal view
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Buffered bytes not yet consumed by the normal view
    pub fn buffered_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Permanently drop `n` buffered bytes through the consuming side
    ///
    /// Only bytes that were already read through the rewind view can be
    /// discarded; asking for more is an error and leaves the buffer intact.
    pub fn discard(&mut self, n: usize) -> io::Result<()> {
        if n > self.buffer.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot discard {} bytes, only {} buffered", n, self.buffer.len()),
            ));
        }
        self.buffer.advance(n);
        self.off = self.off.saturating_sub(n);
        Ok(())
    }

    /// Reference to the raw stream
    pub fn get_ref(&self) -> &S {
        &self.src
    }

    /// Mutable reference to the raw stream
    ///
    /// Reading from it directly bypasses the buffer.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.src
    }

    /// Split into the raw stream and the bytes still buffered
    pub fn into_parts(self) -> (S, BytesMut) {
        (self.src, self.buffer)
    }
}

impl<S: AsyncRead + Unpin> SniffBuf<S> {
    /// Replayable read
    pub fn poll_read_rewind(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if self.off < self.buffer.len() {
            let n = buf.remaining().min(self.buffer.len() - self.off);
            buf.put_slice(&self.buffer[self.off..self.off + n]);
            self.off += n;
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut self.src).poll_read(cx, buf))?;
        let fresh = &buf.filled()[before..];
        self.buffer.extend_from_slice(fresh);
        self.off = self.buffer.len();
        Poll::Ready(Ok(()))
    }

    /// Consuming read
    pub fn poll_read_normal(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.buffer.is_empty() {
            return Pin::new(&mut self.src).poll_read(cx, buf);
        }

        let n = buf.remaining().min(self.buffer.len());
        buf.put_slice(&self.buffer[..n]);
        self.buffer.advance(n);
        self.off = self.off.saturating_sub(n);
        Poll::Ready(Ok(()))
    }
}

/// Replayable read view
#[derive(Debug)]
pub struct RewindReader<'a, S> {
    buf: &'a mut SniffBuf<S>,
}

impl<S> RewindReader<'_, S> {
    /// Reset the replay cursor to the first buffered byte
    pub fn rewind(&mut self) {
        self.buf.rewind();
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for RewindReader<'_, S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().buf.poll_read_rewind(cx, buf)
    }
}

/// Consuming, single pass read view
#[derive(Debug)]
pub struct NormalReader<'a, S> {
    buf: &'a mut SniffBuf<S>,
}

impl<S: AsyncRead + Unpin> AsyncRead for NormalReader<'_, S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.get_mut().buf.poll_read_normal(cx, buf)
    }
}
