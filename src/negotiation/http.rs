//! HTTP version and WebSocket upgrade detection.
//!
//! Without a TLS session there is no ALPN result, so the HTTP negotiator only
//! ever resolves HTTP/1.1; HTTP/2 requires `h2` to have been agreed during the
//! TLS handshake.

use super::{Detection, Framing, Negotiator, Outcome, Sniff, Stage};
use crate::transport::WEBSOCKET_RELATIVE_PATH;

pub const ALPN_HTTP2: &[u8] = b"h2";
pub const ALPN_HTTP11: &[u8] = b"http/1.1";
pub const ALPN_HTTP10: &[u8] = b"http/1.0";

const METHODS: [&[u8]; 9] = [
    b"GET ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"HEAD ",
    b"OPTIONS ",
    b"PATCH ",
    b"TRACE ",
    b"CONNECT ",
];

const HEADER_END: &[u8] = b"\r\n\r\n";

/// Classify `bytes` as the start of an HTTP/1.x request.
fn looks_like_http1(bytes: &[u8]) -> Detection {
    let mut partial = false;
    for method in METHODS {
        let available = bytes.len().min(method.len());
        if bytes[..available] == method[..available] {
            if available == method.len() {
                return Detection::Matched(Outcome::Framing(Framing::Http1));
            }
            partial = true;
        }
    }
    if partial {
        Detection::Pending
    } else {
        Detection::Pass
    }
}

pub struct HttpNegotiator;

pub static HTTP_NEGOTIATOR: HttpNegotiator = HttpNegotiator;

impl Negotiator for HttpNegotiator {
    fn name(&self) -> &'static str {
        "http"
    }

    fn stage(&self) -> Stage {
        Stage::Protocol
    }

    fn inspect(&self, input: &Sniff<'_>) -> Detection {
        let Some(tls) = input.tls else {
            return looks_like_http1(input.bytes);
        };
        match tls.alpn.as_deref() {
            Some(ALPN_HTTP2) => Detection::Matched(Outcome::Framing(Framing::Http2)),
            Some(ALPN_HTTP11) | Some(ALPN_HTTP10) => Detection::Matched(Outcome::Framing(Framing::Http1)),
            // unknown or absent protocol name falls back to HTTP/1.1
            _ => looks_like_http1(input.bytes),
        }
    }
}

/// Upgrades an HTTP/1.1 connection whose first request targets the
/// WebSocket path with `Upgrade: websocket`.
pub struct WebSocketNegotiator;

pub static WEBSOCKET_NEGOTIATOR: WebSocketNegotiator = WebSocketNegotiator;

fn is_websocket_upgrade(head: &str) -> bool {
    let mut lines = head.split("\r\n");
    let path = lines
        .next()
        .and_then(|request_line| request_line.split(' ').nth(1))
        .map(|target| target.split('?').next().unwrap_or(target));
    if path != Some(WEBSOCKET_RELATIVE_PATH) {
        return false;
    }
    lines.any(|line| {
        line.split_once(':').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade") && value.trim().eq_ignore_ascii_case("websocket")
        })
    })
}

impl Negotiator for WebSocketNegotiator {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn stage(&self) -> Stage {
        Stage::Upgrade
    }

    fn inspect(&self, input: &Sniff<'_>) -> Detection {
        if input.framing != Some(Framing::Http1) {
            return Detection::Pass;
        }
        let Some(end) = input.bytes.windows(HEADER_END.len()).position(|w| w == HEADER_END) else {
            return Detection::Pending;
        };
        match std::str::from_utf8(&input.bytes[..end]) {
            Ok(head) if is_websocket_upgrade(head) => Detection::Matched(Outcome::Framing(Framing::WebSocket)),
            _ => Detection::Pass,
        }
    }
}
