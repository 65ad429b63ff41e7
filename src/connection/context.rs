//! Per-transport connection contexts.
//!
//! A context owns one physical channel and knows how to put frames on it.
//! Streaming contexts write each frame as it is produced; request/response
//! contexts queue frames until the peer polls for them.

use crate::core::buffer::Encoder;
use crate::core::frame::{encode_message_frame, encode_raw_frame};
use crate::error::{constants::ERR_NOT_POLLABLE, ProtocolError, Result};
use crate::protocol::message::Message;
use crate::serialization::{Protocol, Value};
use crate::transport::Transport;
use crate::utils::buffer_pool::BufferPool;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

/// Completion of a write or close, resolved once the bytes reach the channel.
pub type WriteFuture = BoxFuture<'static, Result<()>>;

pub trait ConnectionContext: Send + Sync + 'static {
    fn transport(&self) -> Transport;

    fn write_message(&self, message: Message) -> WriteFuture;

    fn write_raw(&self, payload: Bytes, metadata: Option<Arc<dyn Value>>) -> WriteFuture;

    /// Release the channel. A second call resolves immediately.
    fn close(&self) -> WriteFuture;

    fn is_closed(&self) -> bool;

    /// Park or answer a poll arriving on `channel`. Only request/response
    /// transports support this.
    fn process_polling_request(&self, channel: &Channel, message: &Message) -> Result<()> {
        let _ = (channel, message);
        Err(ProtocolError::Unsupported(ERR_NOT_POLLABLE.to_string()))
    }
}

/// Where an inbound frame came from.
pub enum Channel {
    /// A long-lived stream; replies go through the connection context
    Stream,
    /// One HTTP request; a poll may claim its response
    Request(PollResponder),
}

/// Response slot of a single request, claimable once.
pub struct PollResponder {
    sender: Mutex<Option<oneshot::Sender<Bytes>>>,
}

impl PollResponder {
    pub fn new() -> (Self, oneshot::Receiver<Bytes>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    pub fn claim(&self) -> Option<oneshot::Sender<Bytes>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Encode one MESSAGE frame into a pooled buffer.
pub fn message_frame(protocol: &Protocol, pool: &BufferPool, message: &Message) -> Result<Bytes> {
    let mut buffer = pool.acquire();
    encode_message_frame(protocol, message, &mut Encoder::new(buffer.as_mut()))?;
    Ok(buffer.to_bytes())
}

/// Encode one RAW frame into a pooled buffer.
pub fn raw_frame(
    protocol: &Protocol,
    pool: &BufferPool,
    payload: &[u8],
    metadata: Option<&dyn Value>,
) -> Result<Bytes> {
    let mut buffer = pool.acquire();
    encode_raw_frame(protocol, payload, metadata, &mut Encoder::new(buffer.as_mut()))?;
    Ok(buffer.to_bytes())
}
