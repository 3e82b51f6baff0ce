//! Raw transports
//!
//! `RawStream` and `RawListener` are the seam between the sniffer and the
//! transports it runs over. TCP and unix sockets are supported out of the
//! box; other transports implement both traits themselves.

use std::io;
use std::net::SocketAddr;

use futures::future::BoxFuture;
use log::debug;
use socket2::{Domain, Socket, Type};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

use crate::common::{resolve_addr, SniffError, Result};

/// A raw, not yet sniffed, byte stream
///
/// `SniffedConn` deliberately does not implement this trait, so a
/// connection can never be sniffed or usage-tagged twice.
pub trait RawStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased raw stream produced by a `RawListener`
pub type BoxedStream = Box<dyn RawStream>;

impl RawStream for TcpStream {}
#[cfg(unix)]
impl RawStream for UnixStream {}
impl RawStream for DuplexStream {}
impl RawStream for BoxedStream {}

/// A listener producing raw streams
pub trait RawListener: Send + Sync + 'static {
    /// Network name, e.g. `tcp` or `unix`
    fn network(&self) -> &str;

    /// Address the listener is bound to
    fn local_addr(&self) -> io::Result<String>;

    /// Accept the next stream and the peer address, when known
    ///
    /// Must be cancel safe: a dropped future must not lose a connection.
    fn accept(&self) -> BoxFuture<'_, io::Result<(BoxedStream, Option<String>)>>;
}

impl RawListener for TcpListener {
    fn network(&self) -> &str {
        "tcp"
    }

    fn local_addr(&self) -> io::Result<String> {
        TcpListener::local_addr(self).map(|addr| addr.to_string())
    }

    fn accept(&self) -> BoxFuture<'_, io::Result<(BoxedStream, Option<String>)>> {
        Box::pin(async move {
            let (stream, peer) = TcpListener::accept(self).await?;
            Ok((Box::new(stream) as BoxedStream, Some(peer.to_string())))
        })
    }
}

#[cfg(unix)]
impl RawListener for UnixListener {
    fn network(&self) -> &str {
        "unix"
    }

    fn local_addr(&self) -> io::Result<String> {
        let addr = UnixListener::local_addr(self)?;
        Ok(addr
            .as_pathname()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "(unnamed)".to_string()))
    }

    fn accept(&self) -> BoxFuture<'_, io::Result<(BoxedStream, Option<String>)>> {
        Box::pin(async move {
            let (stream, peer) = UnixListener::accept(self).await?;
            let peer = peer.as_pathname().map(|path| path.display().to_string());
            Ok((Box::new(stream) as BoxedStream, peer))
        })
    }
}

/// Open a listener on `network://addr`
///
/// TCP listeners are created through socket2 so the OS backlog can be set
/// explicitly. `tcp4` and `tcp6` restrict the address family.
pub async fn listen_any(network: &str, addr: &str, backlog: u32) -> Result<Box<dyn RawListener>> {
    match network {
        "tcp" | "tcp4" | "tcp6" => {
            let sock_addr = resolve_addr(network, addr).await?;
            let listener = bind_tcp(sock_addr, backlog)?;
            debug!("Bound {} listener on {}", network, sock_addr);
            Ok(Box::new(listener))
        }
        #[cfg(unix)]
        "unix" => {
            let listener = UnixListener::bind(addr)?;
            debug!("Bound unix listener on {}", addr);
            Ok(Box::new(listener))
        }
        other => Err(SniffError::UnsupportedNetwork(other.to_string())),
    }
}

/// Create a non-blocking TCP listener with an explicit backlog
fn bind_tcp(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(socket2::Protocol::TCP))?;
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_listen_tcp() {
        let listener = listen_any("tcp", "127.0.0.1:0", 16).await.unwrap();
        assert_eq!(listener.network(), "tcp");
        let addr = listener.local_addr().unwrap();
        assert!(!addr.ends_with(":0"));

        let mut client = TcpStream::connect(&addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();

        let (mut stream, peer) = listener.accept().await.unwrap();
        assert!(peer.is_some());
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_listen_family_mismatch() {
        assert!(listen_any("tcp6", "127.0.0.1:0", 16).await.is_err());
        assert!(matches!(
            listen_any("udp", "127.0.0.1:0", 16).await,
            Err(SniffError::UnsupportedNetwork(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_listen_unix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sniff.sock");
        let path = path.to_str().unwrap();

        let listener = listen_any("unix", path, 16).await.unwrap();
        assert_eq!(listener.network(), "unix");
        assert_eq!(listener.local_addr().unwrap(), path);

        let _client = UnixStream::connect(path).await.unwrap();
        let (_stream, peer) = listener.accept().await.unwrap();
        assert!(peer.is_none());
    }
}
