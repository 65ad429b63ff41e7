//! TLS record detection.

use super::{Detection, Negotiator, Outcome, Sniff, Stage};

/// TLS record content type for handshake messages
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const MAJOR_VERSION: u8 = 0x03;
/// Highest record-layer minor version seen in the wild (TLS 1.3 uses 0x03 0x03 or 0x01)
const MAX_MINOR_VERSION: u8 = 0x04;

/// Recognises the first record of a TLS ClientHello.
pub struct TlsNegotiator;

pub static TLS_NEGOTIATOR: TlsNegotiator = TlsNegotiator;

impl Negotiator for TlsNegotiator {
    fn name(&self) -> &'static str {
        "tls"
    }

    fn stage(&self) -> Stage {
        Stage::Security
    }

    fn inspect(&self, input: &Sniff<'_>) -> Detection {
        match input.bytes {
            [] => Detection::Pending,
            [CONTENT_TYPE_HANDSHAKE] => Detection::Pending,
            [CONTENT_TYPE_HANDSHAKE, MAJOR_VERSION] => Detection::Pending,
            [CONTENT_TYPE_HANDSHAKE, MAJOR_VERSION, minor, ..] if *minor <= MAX_MINOR_VERSION => {
                Detection::Matched(Outcome::Tls)
            }
            _ => Detection::Pass,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sniff(bytes: &[u8]) -> Detection {
        TLS_NEGOTIATOR.inspect(&Sniff {
            bytes,
            tls: None,
            framing: None,
        })
    }

    #[test]
    fn test_client_hello_record() {
        assert_eq!(sniff(&[0x16, 0x03, 0x01, 0x02, 0x00]), Detection::Matched(Outcome::Tls));
        assert_eq!(sniff(&[0x16, 0x03]), Detection::Pending);
        assert_eq!(sniff(&[0x16, 0x03, 0x09]), Detection::Pass);
        assert_eq!(sniff(b"GET /"), Detection::Pass);
    }
}
