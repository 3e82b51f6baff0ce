//! Detection record
//!
//! `SniffedInfo` is what the matcher chain learned about one accepted
//! connection. It is created empty by the pipeline, filled in by matchers and
//! becomes read-only once the connection is handed to the caller.

use std::collections::BTreeMap;
use std::fmt;

use super::usage::Usage;

/// Protocol tag recorded by a matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// SOCKS5 proxy handshake
    Socks5,
    /// HTTP/1.x request
    Http1,
    /// HTTP/2 with prior knowledge
    Http2,
    /// WebSocket upgrade over HTTP/1 or HTTP/2
    WebSocket,
    /// gRPC over HTTP/2
    Grpc,
    /// Tag recorded by a user supplied matcher
    Custom(&'static str),
}

impl Protocol {
    /// Wire name of the tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Socks5 => "socks5",
            Protocol::Http1 => "http1",
            Protocol::Http2 => "http2",
            Protocol::WebSocket => "websocket",
            Protocol::Grpc => "grpc",
            Protocol::Custom(name) => name,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything learned about a connection while sniffing
#[derive(Debug, Default)]
pub struct SniffedInfo {
    /// Network of the listener that accepted the connection
    pub network: String,
    /// Address of the listener that accepted the connection
    pub addr: String,
    /// Remote address, when the transport knows it
    pub peer: Option<String>,

    /// Usage tag, if one was stripped
    pub usage: Option<Usage>,
    /// Extension line that followed a `:` usage tag
    pub usage_ext: Option<String>,

    /// Recognised protocols, most specific last
    pub protocols: Vec<Protocol>,
    /// Parsed HTTP/1 request head
    pub http1_request: Option<http::Request<()>>,
    /// Decoded fields of the first HTTP/2 header block
    pub http2_fields: Vec<(String, String)>,

    /// Why each matcher that gave up did so, keyed by matcher name
    pub reasons: BTreeMap<&'static str, String>,
}

impl SniffedInfo {
    /// Create an empty record for a connection accepted on `network://addr`
    pub fn new(network: &str, addr: &str, peer: Option<String>) -> Self {
        Self {
            network: network.to_string(),
            addr: addr.to_string(),
            peer,
            ..Self::default()
        }
    }

    /// Check whether a protocol tag was recorded
    pub fn has(&self, protocol: Protocol) -> bool {
        self.protocols.contains(&protocol)
    }

    /// Record a protocol tag once
    pub fn push_protocol(&mut self, protocol: Protocol) {
        if !self.has(protocol) {
            self.protocols.push(protocol);
        }
    }

    /// Record why a matcher did not match
    pub fn set_reason<S: Into<String>>(&mut self, matcher: &'static str, reason: S) {
        self.reasons.insert(matcher, reason.into());
    }

    /// Wire names of the recorded protocols
    pub fn protocol_names(&self) -> Vec<&'static str> {
        self.protocols.iter().map(Protocol::as_str).collect()
    }

    /// Whether any protocol matcher recognised the connection
    pub fn is_identified(&self) -> bool {
        !self.protocols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_names() {
        let mut info = SniffedInfo::new("tcp", "127.0.0.1:80", None);
        assert!(!info.is_identified());

        info.push_protocol(Protocol::Http2);
        info.push_protocol(Protocol::Grpc);
        info.push_protocol(Protocol::Http2);
        assert_eq!(info.protocol_names(), vec!["http2", "grpc"]);
        assert!(info.has(Protocol::Grpc));
        assert!(!info.has(Protocol::WebSocket));
        assert!(info.is_identified());
    }

    #[test]
    fn test_custom_protocol() {
        let p = Protocol::Custom("kcp");
        assert_eq!(p.to_string(), "kcp");
    }
}
