//! HTTP/1 request matcher
//!
//! Buffers the start of the stream until `httparse` accepts a complete
//! request head, then records it as an `http::Request<()>`.

use futures::future::BoxFuture;
use log::trace;

use crate::common::Result;
use crate::config::defaults;
use super::info::{Protocol, SniffedInfo};
use super::matcher::{is_soft_read_error, Matcher, TimedReader};

/// Maximum number of request headers
const MAX_HEADERS: usize = 64;

const READ_CHUNK: usize = 1024;

/// HTTP/1 request matcher
#[derive(Debug, Clone)]
pub struct Http1Matcher {
    /// Give up once this many bytes are buffered without a complete head
    max_head: usize,
}

impl Default for Http1Matcher {
    fn default() -> Self {
        Self::new(defaults::HTTP1_MAX_HEAD)
    }
}

impl Http1Matcher {
    pub const NAME: &'static str = "http1";

    pub fn new(max_head: usize) -> Self {
        Self { max_head }
    }

    async fn run(&self, r: &mut TimedReader<'_>, info: &mut SniffedInfo) -> Result<usize> {
        let mut head = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if head.len() >= self.max_head {
                info.set_reason(
                    Self::NAME,
                    format!("no complete request head within {} bytes", self.max_head),
                );
                return Ok(0);
            }

            let want = READ_CHUNK.min(self.max_head - head.len());
            match r.read_some(&mut chunk[..want]).await {
                Ok(0) if head.is_empty() => {
                    info.set_reason(Self::NAME, "no data read at all");
                    return Ok(0);
                }
                Ok(0) => {
                    info.set_reason(Self::NAME, "connection closed inside request head");
                    return Ok(0);
                }
                Ok(n) => head.extend_from_slice(&chunk[..n]),
                Err(e) if is_soft_read_error(&e) => {
                    let reason = if head.is_empty() {
                        format!("no data read at all: {}", e)
                    } else {
                        format!("incomplete request head after {} bytes: {}", head.len(), e)
                    };
                    info.set_reason(Self::NAME, reason);
                    return Ok(0);
                }
                Err(e) => return Err(e.into()),
            }

            match parse_request_head(&head) {
                Ok(Some(request)) => {
                    trace!("HTTP/1 request {} {}", request.method(), request.uri());
                    info.push_protocol(Protocol::Http1);
                    if is_websocket_upgrade(&request) {
                        info.push_protocol(Protocol::WebSocket);
                    }
                    info.http1_request = Some(request);
                    return Ok(0);
                }
                Ok(None) => continue,
                Err(reason) => {
                    info.set_reason(Self::NAME, reason);
                    return Ok(0);
                }
            }
        }
    }
}

impl Matcher for Http1Matcher {
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

/// Parse a request head
///
/// `Ok(None)` means the head is valid so far but incomplete.
fn parse_request_head(buf: &[u8]) -> std::result::Result<Option<http::Request<()>>, String> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(format!("malformed request head: {}", e)),
    }

    let method = req.method.ok_or_else(|| "missing method".to_string())?;
    let path = req.path.ok_or_else(|| "missing request target".to_string())?;
    let version = match req.version {
        Some(0) => http::Version::HTTP_10,
        _ => http::Version::HTTP_11,
    };

    let mut builder = http::Request::builder()
        .method(method)
        .uri(path)
        .version(version);
    for header in req.headers.iter() {
        builder = builder.header(header.name, header.value);
    }

    builder
        .body(())
        .map(Some)
        .map_err(|e| format!("invalid request: {}", e))
}

/// `Upgrade: websocket`, compared case-insensitively
fn is_websocket_upgrade(request: &http::Request<()>) -> bool {
    request
        .headers()
        .get_all(http::header::UPGRADE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case("websocket"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    async fn run_matcher(data: &[u8], max_head: usize) -> (Result<usize>, SniffedInfo) {
        let mut src = data;
        let mut reader = TimedReader::new(&mut src, Instant::now() + Duration::from_millis(50));
        let mut info = SniffedInfo::new("tcp", "127.0.0.1:0", None);
        let result = Http1Matcher::new(max_head).matches(&mut reader, &mut info).await;
        (result, info)
    }

    #[tokio::test]
    async fn test_plain_request() {
        let (result, info) = run_matcher(
            b"POST /submit?x=1 HTTP/1.0\r\nHost: example.com\r\nContent-Length: 0\r\n\r\n",
            8192,
        ).await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(info.protocol_names(), vec!["http1"]);

        let request = info.http1_request.unwrap();
        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(request.uri().path(), "/submit");
        assert_eq!(request.uri().query(), Some("x=1"));
        assert_eq!(request.version(), http::Version::HTTP_10);
        assert_eq!(request.headers()["host"], "example.com");
    }

    #[tokio::test]
    async fn test_websocket_upgrade() {
        let (result, info) = run_matcher(
            b"GET /chat HTTP/1.1\r\nHost: a\r\nConnection: Upgrade\r\nUpgrade: WebSocket\r\n\r\n",
            8192,
        ).await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(info.protocol_names(), vec!["http1", "websocket"]);
    }

    #[tokio::test]
    async fn test_failures_record_reasons() {
        let (result, info) = run_matcher(b"", 8192).await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(info.reasons["http1"], "no data read at all");

        let (_, info) = run_matcher(b"\x16\x03\x01\x00\xa5\x01\x00\x00", 8192).await;
        assert!(info.reasons["http1"].contains("malformed"));
        assert!(info.protocols.is_empty());

        let (_, info) = run_matcher(b"GET / HTTP/1.1\r\nHost: a\r\n", 8192).await;
        assert!(info.reasons["http1"].contains("closed"));

        let (_, info) = run_matcher(b"GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaa\r\n", 16).await;
        assert!(info.reasons["http1"].contains("within 16 bytes"));
    }
}
