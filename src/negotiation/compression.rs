//! Stream compression detection by signature.

use super::{Detection, Negotiator, Outcome, Sniff, Stage};
use crate::utils::compression::{CompressionKind, GZIP_SIGNATURE, SNAPPY_SIGNATURE};

pub struct SignatureNegotiator {
    kind: CompressionKind,
    signature: &'static [u8],
}

pub static GZIP_NEGOTIATOR: SignatureNegotiator = SignatureNegotiator {
    kind: CompressionKind::Gzip,
    signature: &GZIP_SIGNATURE,
};

pub static SNAPPY_NEGOTIATOR: SignatureNegotiator = SignatureNegotiator {
    kind: CompressionKind::Snappy,
    signature: &SNAPPY_SIGNATURE,
};

impl Negotiator for SignatureNegotiator {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn stage(&self) -> Stage {
        Stage::Compression
    }

    fn inspect(&self, input: &Sniff<'_>) -> Detection {
        let available = input.bytes.len().min(self.signature.len());
        if input.bytes[..available] != self.signature[..available] {
            Detection::Pass
        } else if available < self.signature.len() {
            Detection::Pending
        } else {
            Detection::Matched(Outcome::Compression(self.kind))
        }
    }
}
