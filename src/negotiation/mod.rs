//! # Transport Negotiation
//!
//! Classifies a freshly accepted physical connection from its first bytes and
//! its TLS outcome, before any application frame is read.
//!
//! ## States
//! ```text
//! AwaitingFirstBytes ──(TLS record)──▶ TlsHandshaking ──▶ AwaitingFirstBytes (plaintext)
//!         │
//!         ├─ compression signature ─▶ (inflate, keep detecting)
//!         └─▶ { Http1, Http2, WebSocket, RawStreaming }
//! ```
//!
//! Each negotiator is a stateless detector answering `Pending`, `Pass` or
//! `Matched`. [`NegotiationPipeline`] runs them stage by stage over the bytes
//! buffered so far; [`driver::negotiate`] feeds it from a socket and performs
//! the TLS handshake when asked to.

pub mod compression;
pub mod driver;
pub mod http;
pub mod raw;
pub mod tls;

use crate::error::{constants::ERR_UNCLASSIFIED, ProtocolError, Result};
use crate::utils::compression::{CompressionKind, StreamDecompressor};
use bytes::BytesMut;
use tracing::{debug, trace};

pub use compression::{GZIP_NEGOTIATOR, SNAPPY_NEGOTIATOR};
pub use driver::{negotiate, BoxedIo, NegotiatedStream};
pub use http::{HTTP_NEGOTIATOR, WEBSOCKET_NEGOTIATOR};
pub use raw::MAGIC_NEGOTIATOR;
pub use tls::TLS_NEGOTIATOR;

/// Order in which negotiators run, regardless of the order they are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Security,
    Compression,
    Protocol,
    Upgrade,
}

/// Terminal framing of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Framing {
    Http1,
    Http2,
    WebSocket,
    RawStreaming,
}

impl Framing {
    pub fn is_streaming(&self) -> bool {
        !matches!(self, Framing::Http1)
    }
}

/// Result of a completed TLS handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOutcome {
    /// Application protocol agreed through ALPN, if any
    pub alpn: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Tls,
    Compression(CompressionKind),
    Framing(Framing),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// Input so far is consistent with this negotiator; more bytes needed
    Pending,
    /// Not this negotiator's input
    Pass,
    Matched(Outcome),
}

/// What a negotiator gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct Sniff<'a> {
    /// Buffered bytes, decrypted and inflated where earlier stages matched
    pub bytes: &'a [u8],
    /// `None` when no TLS handler is in the pipeline
    pub tls: Option<&'a TlsOutcome>,
    /// Framing chosen by the protocol stage, visible to upgrade negotiators
    pub framing: Option<Framing>,
}

pub trait Negotiator: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn stage(&self) -> Stage;

    fn inspect(&self, input: &Sniff<'_>) -> Detection;
}

/// Final pipeline configuration for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub framing: Framing,
    pub compression: Option<CompressionKind>,
    pub tls: Option<TlsOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    NeedMore,
    /// A TLS record was seen; run the handshake, report it through
    /// [`NegotiationPipeline::tls_established`] and restart on plaintext
    StartTls,
    Resolved(Resolution),
}

/// Pure classification over buffered input.
pub struct NegotiationPipeline {
    negotiators: Vec<&'static dyn Negotiator>,
    tls: Option<TlsOutcome>,
}

/// Run one stage. `Ok(None)` when every negotiator passed.
fn run_stage(
    negotiators: &[&'static dyn Negotiator],
    stage: Stage,
    input: &Sniff<'_>,
    at_window_limit: bool,
) -> Option<Result<Outcome>> {
    for negotiator in negotiators.iter().filter(|n| n.stage() == stage) {
        match negotiator.inspect(input) {
            Detection::Matched(outcome) => {
                debug!(negotiator = negotiator.name(), outcome = ?outcome, "Negotiator matched");
                return Some(Ok(outcome));
            }
            // an undecided earlier negotiator keeps later ones from claiming the bytes
            Detection::Pending if !at_window_limit => {
                trace!(negotiator = negotiator.name(), buffered = input.bytes.len(), "Negotiator pending");
                return Some(Err(ProtocolError::Incomplete));
            }
            Detection::Pending | Detection::Pass => continue,
        }
    }
    None
}

fn inflate(kind: CompressionKind, bytes: &[u8]) -> Result<BytesMut> {
    let mut decompressor = StreamDecompressor::new(kind);
    let mut input = BytesMut::from(bytes);
    let mut plain = BytesMut::new();
    decompressor.decompress(&mut input, &mut plain)?;
    Ok(plain)
}

impl NegotiationPipeline {
    pub fn new(negotiators: &[&'static dyn Negotiator]) -> Self {
        let mut negotiators = negotiators.to_vec();
        negotiators.sort_by_key(|n| n.stage());
        Self { negotiators, tls: None }
    }

    pub fn tls_established(&mut self, outcome: TlsOutcome) {
        debug!(alpn = ?outcome.alpn.as_deref().map(String::from_utf8_lossy), "TLS established");
        self.tls = Some(outcome);
    }

    pub fn tls(&self) -> Option<&TlsOutcome> {
        self.tls.as_ref()
    }

    /// Classify `bytes`, everything read since the connection (or its TLS
    /// session) started. At the window limit pending negotiators count as
    /// passing and the pipeline must decide.
    pub fn advance(&self, bytes: &[u8], at_window_limit: bool) -> Result<Step> {
        let mut input = Sniff {
            bytes,
            tls: self.tls.as_ref(),
            framing: None,
        };

        if self.tls.is_none() {
            match run_stage(&self.negotiators, Stage::Security, &input, at_window_limit) {
                Some(Ok(Outcome::Tls)) => return Ok(Step::StartTls),
                Some(Err(ProtocolError::Incomplete)) => return Ok(Step::NeedMore),
                _ => {}
            }
        }

        let mut compression = None;
        let inflated;
        match run_stage(&self.negotiators, Stage::Compression, &input, at_window_limit) {
            Some(Ok(Outcome::Compression(kind))) => {
                compression = Some(kind);
                inflated = inflate(kind, bytes)?;
                input.bytes = &inflated;
            }
            Some(Err(ProtocolError::Incomplete)) => return Ok(Step::NeedMore),
            _ => {}
        }

        let framing = match run_stage(&self.negotiators, Stage::Protocol, &input, at_window_limit) {
            Some(Ok(Outcome::Framing(framing))) => framing,
            Some(Err(ProtocolError::Incomplete)) => return Ok(Step::NeedMore),
            _ => return Err(ProtocolError::NegotiationFailed(ERR_UNCLASSIFIED.to_string())),
        };

        input.framing = Some(framing);
        let framing = match run_stage(&self.negotiators, Stage::Upgrade, &input, at_window_limit) {
            Some(Ok(Outcome::Framing(upgraded))) => upgraded,
            Some(Err(ProtocolError::Incomplete)) => return Ok(Step::NeedMore),
            _ => framing,
        };

        if compression.is_some() && !framing.is_streaming() {
            return Err(ProtocolError::NegotiationFailed(format!(
                "{} compression requires a streaming framing, got {:?}",
                compression.map(|k| k.name()).unwrap_or_default(),
                framing
            )));
        }

        Ok(Step::Resolved(Resolution {
            framing,
            compression,
            tls: self.tls.clone(),
        }))
    }
}
