//! Drives a [`NegotiationPipeline`] from a live socket.

use super::{NegotiationPipeline, Negotiator, Resolution, Step, TlsOutcome};
use crate::error::{
    constants::{ERR_TLS_UNAVAILABLE, ERR_WINDOW_EXCEEDED},
    ProtocolError, Result,
};
use crate::transport::prefixed::PrefixedIo;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, instrument};

/// Byte stream a connection context can run on.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedIo = Box<dyn AsyncStream>;

/// A classified connection. `io` yields the sniffed bytes again, decrypted
/// when TLS was negotiated but still compressed.
pub struct NegotiatedStream {
    pub io: BoxedIo,
    pub resolution: Resolution,
}

/// Read from `io` until the pipeline resolves, running the TLS handshake when
/// a TLS record is detected.
///
/// # Errors
/// - `ConnectionClosed` if the peer leaves before classification
/// - `TlsError` if TLS is detected without an acceptor, or the handshake fails
/// - `NegotiationFailed` if nothing matches within `window` bytes
#[instrument(level = "debug", skip_all, fields(negotiators = negotiators.len(), window = window))]
pub async fn negotiate(
    io: BoxedIo,
    negotiators: &[&'static dyn Negotiator],
    tls: Option<&TlsAcceptor>,
    window: usize,
) -> Result<NegotiatedStream> {
    let mut pipeline = NegotiationPipeline::new(negotiators);
    let mut io = io;
    let mut buffer = BytesMut::with_capacity(window.min(1024));

    loop {
        let n = io.read_buf(&mut buffer).await?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        let at_window_limit = buffer.len() >= window;

        match pipeline.advance(&buffer, at_window_limit)? {
            Step::NeedMore if at_window_limit => {
                return Err(ProtocolError::NegotiationFailed(ERR_WINDOW_EXCEEDED.to_string()));
            }
            Step::NeedMore => {}
            Step::StartTls => {
                let acceptor = tls.ok_or_else(|| ProtocolError::TlsError(ERR_TLS_UNAVAILABLE.to_string()))?;
                let replay = PrefixedIo::new(buffer.split().freeze(), io);
                let stream = acceptor
                    .accept(replay)
                    .await
                    .map_err(|e| ProtocolError::TlsError(e.to_string()))?;
                let alpn = stream.get_ref().1.alpn_protocol().map(<[u8]>::to_vec);
                pipeline.tls_established(TlsOutcome { alpn });
                io = Box::new(stream);
            }
            Step::Resolved(resolution) => {
                debug!(
                    framing = ?resolution.framing,
                    compression = ?resolution.compression,
                    tls = resolution.tls.is_some(),
                    "Connection classified"
                );
                return Ok(NegotiatedStream {
                    io: Box::new(PrefixedIo::new(buffer.freeze(), io)),
                    resolution,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAGIC_HEADER;
    use crate::negotiation::{Framing, HTTP_NEGOTIATOR, MAGIC_NEGOTIATOR, TLS_NEGOTIATOR};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_sniffed_bytes_are_replayed() {
        let (client, mut peer) = tokio::io::duplex(256);
        peer.write_all(&MAGIC_HEADER[..1]).await.unwrap();
        let task = tokio::spawn(async move {
            negotiate(Box::new(client), &[&HTTP_NEGOTIATOR, &MAGIC_NEGOTIATOR], None, 64).await
        });
        tokio::task::yield_now().await;
        peer.write_all(&MAGIC_HEADER[1..]).await.unwrap();
        peer.write_all(b"tail").await.unwrap();

        let mut negotiated = task.await.unwrap().unwrap();
        assert_eq!(negotiated.resolution.framing, Framing::RawStreaming);

        let mut head = [0u8; 4];
        negotiated.io.read_exact(&mut head).await.unwrap();
        assert_eq!(head, MAGIC_HEADER);
    }

    #[tokio::test]
    async fn test_tls_without_acceptor_fails() {
        let (client, mut peer) = tokio::io::duplex(64);
        peer.write_all(&[0x16, 0x03, 0x01, 0x00, 0x10]).await.unwrap();
        let result = negotiate(Box::new(client), &[&TLS_NEGOTIATOR, &MAGIC_NEGOTIATOR], None, 64).await;
        assert!(matches!(result, Err(ProtocolError::TlsError(_))));
    }

    #[tokio::test]
    async fn test_peer_leaving_early() {
        let (client, peer) = tokio::io::duplex(64);
        drop(peer);
        let result = negotiate(Box::new(client), &[&MAGIC_NEGOTIATOR], None, 64).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}
