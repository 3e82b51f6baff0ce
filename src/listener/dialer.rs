//! Client side of the usage tag convention

use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::common::{resolve_addr, SniffError, Result};
use crate::config::defaults;
use crate::protocol::Usage;
use super::raw::{BoxedStream, RawStream};

/// Write a usage tag, and its extension line for `:` tags
///
/// Only raw streams can be tagged; a connection that has already been
/// sniffed is not a `RawStream`.
///
/// # Parameters
///
/// * `conn` - Freshly opened stream, nothing written yet
/// * `usage` - Tag to write
/// * `ext` - Extension line, required for `:` tags and rejected otherwise
pub async fn write_usage<S: RawStream + ?Sized>(
    conn: &mut S,
    usage: &Usage,
    ext: Option<&str>,
) -> Result<()> {
    let mut frame = Vec::with_capacity(Usage::LEN + ext.map_or(0, |e| e.len() + 1));
    frame.extend_from_slice(usage.as_bytes());

    match (usage.has_ext(), ext) {
        (true, Some(ext)) => {
            if ext.contains('\n') {
                return Err(SniffError::InvalidUsage("extension must not contain a newline".to_string()));
            }
            if ext.len() > defaults::USAGE_EXT_MAX {
                return Err(SniffError::InvalidUsage(format!(
                    "extension exceeds {} bytes", defaults::USAGE_EXT_MAX
                )));
            }
            frame.extend_from_slice(ext.as_bytes());
            frame.push(b'\n');
        }
        (true, None) => {
            return Err(SniffError::InvalidUsage(format!("tag {} requires an extension", usage)));
        }
        (false, Some(_)) => {
            return Err(SniffError::InvalidUsage(format!("tag {} takes no extension", usage)));
        }
        (false, None) => {}
    }

    conn.write_all(&frame).await?;
    Ok(())
}

/// Connect to `network://addr` and write the usage tag
pub async fn dial(network: &str, addr: &str, usage: &Usage, ext: Option<&str>) -> Result<BoxedStream> {
    let mut conn: BoxedStream = match network {
        "tcp" | "tcp4" | "tcp6" => {
            let sock_addr = resolve_addr(network, addr).await?;
            Box::new(TcpStream::connect(sock_addr).await?)
        }
        #[cfg(unix)]
        "unix" => Box::new(UnixStream::connect(addr).await?),
        other => return Err(SniffError::UnsupportedNetwork(other.to_string())),
    };

    write_usage(&mut conn, usage, ext).await?;
    debug!("Dialed {}://{} with usage {}", network, addr, usage);
    Ok(conn)
}
