//! HTTP/2 prior knowledge matcher
//!
//! Compares the client connection preface, then walks the frames that follow
//! until the first complete header block (HEADERS plus any CONTINUATION
//! frames) and decodes it with HPACK to spot WebSocket and gRPC.
//!
//! Frame layout (RFC 7540 section 4.1):
//!
//! ```text
//! +-----------------------------------------------+
//! |                 Length (24)                   |
//! +---------------+---------------+---------------+
//! |   Type (8)    |   Flags (8)   |
//! +-+-------------+---------------+-------------------------------+
//! |R|                 Stream Identifier (31)                      |
//! +=+=============================================================+
//! |                   Frame Payload (0...)                      ...
//! +---------------------------------------------------------------+
//! ```

use std::io;

use futures::future::BoxFuture;
use log::trace;

use crate::common::Result;
use crate::config::defaults;
use super::info::{Protocol, SniffedInfo};
use super::matcher::{is_soft_read_error, soft_fail, Matcher, TimedReader};

/// Client connection preface
pub const CLIENT_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const FRAME_HEADER_LEN: usize = 9;

const FRAME_HEADERS: u8 = 0x1;
const FRAME_CONTINUATION: u8 = 0x9;

const FLAG_END_HEADERS: u8 = 0x4;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;

/// Stream dependency (4) + weight (1)
const PRIORITY_LEN: usize = 5;

/// HTTP/2 matcher
#[derive(Debug, Clone)]
pub struct Http2Matcher {
    /// Largest frame payload inspected
    max_frame: usize,
    /// Largest assembled header block
    max_header_block: usize,
}

impl Default for Http2Matcher {
    fn default() -> Self {
        Self::new(defaults::HTTP2_MAX_FRAME, defaults::HTTP2_MAX_HEADER_BLOCK)
    }
}

impl Http2Matcher {
    pub const NAME: &'static str = "http2";

    pub fn new(max_frame: usize, max_header_block: usize) -> Self {
        Self {
            max_frame,
            max_header_block,
        }
    }

    async fn run(&self, r: &mut TimedReader<'_>, info: &mut SniffedInfo) -> Result<usize> {
        let mut preface = [0u8; CLIENT_PREFACE.len()];
        let mut got = 0;
        while got < preface.len() {
            match r.read_some(&mut preface[got..]).await {
                Ok(0) => {
                    info.set_reason(
                        Self::NAME,
                        format!("connection closed after {} preface bytes", got),
                    );
                    return Ok(0);
                }
                Ok(n) => {
                    if preface[got..got + n] != CLIENT_PREFACE[got..got + n] {
                        info.set_reason(Self::NAME, "client preface mismatch");
                        return Ok(0);
                    }
                    got += n;
                }
                Err(e) => return soft_fail(info, Self::NAME, "incomplete client preface", e),
            }
        }

        trace!("HTTP/2 client preface found");
        info.push_protocol(Protocol::Http2);
        self.scan_frames(r, info).await
    }

    /// Read frames up to the end of the first header block
    async fn scan_frames(&self, r: &mut TimedReader<'_>, info: &mut SniffedInfo) -> Result<usize> {
        // Header block under assembly, while CONTINUATION frames are expected
        let mut block: Option<Vec<u8>> = None;

        loop {
            let mut header = [0u8; FRAME_HEADER_LEN];
            if let Err(e) = r.read_full(&mut header).await {
                return end_scan(e);
            }
            let len = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
            let kind = header[3];
            let flags = header[4];

            if len > self.max_frame {
                info.set_reason(
                    Self::NAME,
                    format!("frame payload of {} bytes exceeds {}", len, self.max_frame),
                );
                return Ok(0);
            }

            let mut payload = vec![0u8; len];
            if let Err(e) = r.read_full(&mut payload).await {
                return end_scan(e);
            }

            if let Some(acc) = block.as_mut() {
                if kind != FRAME_CONTINUATION {
                    info.set_reason(
                        Self::NAME,
                        format!("frame type 0x{:x} inside a header block", kind),
                    );
                    return Ok(0);
                }
                if acc.len() + payload.len() > self.max_header_block {
                    info.set_reason(
                        Self::NAME,
                        format!("header block exceeds {} bytes", self.max_header_block),
                    );
                    return Ok(0);
                }
                acc.extend_from_slice(&payload);
                if flags & FLAG_END_HEADERS != 0 {
                    decode_header_block(acc, info);
                    return Ok(0);
                }
                continue;
            }

            match kind {
                FRAME_CONTINUATION => {
                    info.set_reason(Self::NAME, "CONTINUATION frame without HEADERS");
                    return Ok(0);
                }
                FRAME_HEADERS => {
                    let fragment = match header_block_fragment(flags, &payload) {
                        Ok(fragment) => fragment,
                        Err(reason) => {
                            info.set_reason(Self::NAME, reason);
                            return Ok(0);
                        }
                    };
                    if flags & FLAG_END_HEADERS != 0 {
                        decode_header_block(fragment, info);
                        return Ok(0);
                    }
                    block = Some(fragment.to_vec());
                }
                // SETTINGS, WINDOW_UPDATE and friends
                _ => trace!("Skipping HTTP/2 frame type 0x{:x}", kind),
            }
        }
    }
}

impl Matcher for Http2Matcher {
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

/// Deadline or EOF while walking frames ends the scan, the preface already matched
fn end_scan(err: io::Error) -> Result<usize> {
    if is_soft_read_error(&err) {
        trace!("HTTP/2 frame scan stopped: {}", err);
        Ok(0)
    } else {
        Err(err.into())
    }
}

/// Strip padding and priority fields from a HEADERS payload
fn header_block_fragment(flags: u8, payload: &[u8]) -> std::result::Result<&[u8], String> {
    let mut start = 0;
    let mut end = payload.len();

    if flags & FLAG_PADDED != 0 {
        let pad = *payload
            .first()
            .ok_or_else(|| "PADDED HEADERS frame without pad length".to_string())?
            as usize;
        start += 1;
        end = end
            .checked_sub(pad)
            .ok_or_else(|| "HEADERS padding exceeds payload".to_string())?;
    }
    if flags & FLAG_PRIORITY != 0 {
        start += PRIORITY_LEN;
    }
    if start > end {
        return Err("HEADERS frame too short".to_string());
    }

    Ok(&payload[start..end])
}

/// HPACK-decode a header block and record what it reveals
fn decode_header_block(block: &[u8], info: &mut SniffedInfo) {
    let mut decoder = fluke_hpack::Decoder::new();
    let fields = match decoder.decode(block) {
        Ok(fields) => fields,
        Err(e) => {
            info.set_reason(Http2Matcher::NAME, format!("HPACK decoding failed: {:?}", e));
            return;
        }
    };

    for (name, value) in fields {
        let name = String::from_utf8_lossy(&name).into_owned();
        let value = String::from_utf8_lossy(&value).into_owned();

        let websocket = (name.eq_ignore_ascii_case("upgrade") || name == ":protocol")
            && value.eq_ignore_ascii_case("websocket");
        if websocket {
            info.push_protocol(Protocol::WebSocket);
        }
        if name.eq_ignore_ascii_case("content-type") && value.starts_with("application/grpc") {
            info.push_protocol(Protocol::Grpc);
        }

        info.http2_fields.push((name, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    fn frame(kind: u8, flags: u8, stream: u32, payload: &[u8]) -> Vec<u8> {
        let len = (payload.len() as u32).to_be_bytes();
        let mut out = vec![len[1], len[2], len[3], kind, flags];
        out.extend_from_slice(&stream.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn encode(fields: &[(&str, &str)]) -> Vec<u8> {
        let mut encoder = fluke_hpack::Encoder::new();
        encoder.encode(fields.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())))
    }

    fn grpc_block() -> Vec<u8> {
        encode(&[
            (":method", "POST"),
            (":scheme", "http"),
            (":path", "/helloworld.Greeter/SayHello"),
            (":authority", "localhost"),
            ("content-type", "application/grpc+proto"),
            ("te", "trailers"),
        ])
    }

    async fn run_matcher(data: &[u8]) -> (Result<usize>, SniffedInfo) {
        let mut src = data;
        let mut reader = TimedReader::new(&mut src, Instant::now() + Duration::from_millis(50));
        let mut info = SniffedInfo::new("tcp", "127.0.0.1:0", None);
        let result = Http2Matcher::default().matches(&mut reader, &mut info).await;
        (result, info)
    }

    #[tokio::test]
    async fn test_grpc_request() {
        let mut data = CLIENT_PREFACE.to_vec();
        data.extend(frame(0x4, 0, 0, &[])); // SETTINGS
        data.extend(frame(FRAME_HEADERS, FLAG_END_HEADERS, 1, &grpc_block()));

        let (result, info) = run_matcher(&data).await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(info.protocol_names(), vec!["http2", "grpc"]);
        assert!(info
            .http2_fields
            .contains(&(":path".to_string(), "/helloworld.Greeter/SayHello".to_string())));
    }

    #[tokio::test]
    async fn test_continuation_frames() {
        let block = encode(&[
            (":method", "CONNECT"),
            (":protocol", "websocket"),
            (":scheme", "https"),
            (":path", "/chat"),
            (":authority", "localhost"),
        ]);
        let (first, rest) = block.split_at(block.len() / 2);

        // Padded + priority HEADERS carrying half the block
        let mut payload = vec![3u8];
        payload.extend_from_slice(&[0, 0, 0, 0, 16]);
        payload.extend_from_slice(first);
        payload.extend_from_slice(&[0, 0, 0]);

        let mut data = CLIENT_PREFACE.to_vec();
        data.extend(frame(FRAME_HEADERS, FLAG_PADDED | FLAG_PRIORITY, 1, &payload));
        data.extend(frame(FRAME_CONTINUATION, FLAG_END_HEADERS, 1, rest));

        let (result, info) = run_matcher(&data).await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(info.protocol_names(), vec!["http2", "websocket"]);
        assert_eq!(info.http2_fields.len(), 5);
        assert!(info.reasons.is_empty());
    }

    #[tokio::test]
    async fn test_preface_only() {
        let (result, info) = run_matcher(CLIENT_PREFACE).await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(info.protocol_names(), vec!["http2"]);
    }

    #[tokio::test]
    async fn test_preface_mismatch() {
        let (result, info) = run_matcher(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").await;
        assert_eq!(result.unwrap(), 0);
        assert!(info.protocols.is_empty());
        assert_eq!(info.reasons["http2"], "client preface mismatch");
    }

    #[tokio::test]
    async fn test_upgrade_header_websocket() {
        let block = encode(&[
            (":method", "GET"),
            (":scheme", "http"),
            (":path", "/ws"),
            (":authority", "localhost"),
            ("upgrade", "websocket"),
        ]);
        let mut data = CLIENT_PREFACE.to_vec();
        data.extend(frame(FRAME_HEADERS, FLAG_END_HEADERS, 1, &block));

        let (result, info) = run_matcher(&data).await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(info.protocol_names(), vec!["http2", "websocket"]);
        assert!(info
            .http2_fields
            .contains(&("upgrade".to_string(), "websocket".to_string())));
    }

    #[tokio::test]
    async fn test_bad_block_keeps_http2_tag() {
        let mut data = CLIENT_PREFACE.to_vec();
        data.extend(frame(FRAME_HEADERS, FLAG_END_HEADERS, 1, &[0xff, 0xff, 0xff, 0xff]));

        let (result, info) = run_matcher(&data).await;
        assert_eq!(result.unwrap(), 0);
        assert_eq!(info.protocol_names(), vec!["http2"]);
        assert!(info.reasons["http2"].contains("HPACK"));
    }

    #[test]
    fn test_header_block_fragment() {
        assert_eq!(header_block_fragment(0, b"abc").unwrap(), b"abc");
        assert_eq!(header_block_fragment(FLAG_PADDED, b"\x01abcX").unwrap(), b"abc");
        assert!(header_block_fragment(FLAG_PADDED, b"\x09ab").is_err());
        assert!(header_block_fragment(FLAG_PRIORITY, b"abc").is_err());
    }
}
