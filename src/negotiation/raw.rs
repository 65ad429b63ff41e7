//! Raw streaming detection by magic header.

use super::{Detection, Framing, Negotiator, Outcome, Sniff, Stage};
use crate::protocol::handshake::check_magic;

pub struct MagicNegotiator;

pub static MAGIC_NEGOTIATOR: MagicNegotiator = MagicNegotiator;

impl Negotiator for MagicNegotiator {
    fn name(&self) -> &'static str {
        "magic"
    }

    fn stage(&self) -> Stage {
        Stage::Protocol
    }

    fn inspect(&self, input: &Sniff<'_>) -> Detection {
        match check_magic(input.bytes) {
            Ok(true) => Detection::Matched(Outcome::Framing(Framing::RawStreaming)),
            Ok(false) => Detection::Pending,
            Err(_) => Detection::Pass,
        }
    }
}
