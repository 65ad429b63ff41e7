//! # Connections
//!
//! A [`Connection`] is the logical peer: an identity, the transport it arrived
//! on, the context that frames writes for that transport, and the listeners
//! interested in what it receives.
//!
//! Listener sets may be modified while a dispatch is in progress; every
//! dispatch works from a snapshot taken when it starts.

pub mod context;
pub mod manager;

pub use context::{Channel, ConnectionContext, PollResponder, WriteFuture};
pub use manager::ConnectionManager;

use crate::error::{ProtocolError, Result};
use crate::protocol::message::{Identifier, Message};
use crate::serialization::Value;
use crate::transport::Transport;
use bytes::Bytes;
use futures::future::{self, FutureExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, instrument};

pub type MessageListener = Arc<dyn Fn(&Connection, &Message) + Send + Sync>;
pub type RawListener = Arc<dyn Fn(&Connection, Option<&dyn Value>, &Bytes) + Send + Sync>;
pub type ExceptionListener = Arc<dyn Fn(&Connection, &ProtocolError) + Send + Sync>;
pub type CloseListener = Arc<dyn Fn(&Connection) + Send + Sync>;

/// Copy of a listener set, taken without holding the lock during dispatch.
pub(crate) fn snapshot<T: Clone>(listeners: &RwLock<Vec<T>>) -> Vec<T> {
    listeners.read().unwrap_or_else(PoisonError::into_inner).clone()
}

pub(crate) fn push<T>(listeners: &RwLock<Vec<T>>, listener: T) {
    listeners.write().unwrap_or_else(PoisonError::into_inner).push(listener);
}

#[derive(Default)]
struct Listeners {
    message: RwLock<Vec<MessageListener>>,
    raw: RwLock<Vec<RawListener>>,
    exception: RwLock<Vec<ExceptionListener>>,
    close: RwLock<Vec<CloseListener>>,
}

pub struct Connection {
    identity: Identifier,
    transport: Transport,
    context: Arc<dyn ConnectionContext>,
    closed: AtomicBool,
    listeners: Listeners,
}

impl Connection {
    pub fn new(identity: Identifier, transport: Transport, context: Arc<dyn ConnectionContext>) -> Self {
        Self {
            identity,
            transport,
            context,
            closed: AtomicBool::new(false),
            listeners: Listeners::default(),
        }
    }

    pub fn identity(&self) -> Identifier {
        self.identity
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn context(&self) -> &Arc<dyn ConnectionContext> {
        &self.context
    }

    /// Whether `context` is the one this connection writes through.
    pub fn uses_context(&self, context: &Arc<dyn ConnectionContext>) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.context) as *const (),
            Arc::as_ptr(context) as *const (),
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn add_message_listener<F>(&self, listener: F)
    where
        F: Fn(&Connection, &Message) + Send + Sync + 'static,
    {
        push(&self.listeners.message, Arc::new(listener) as MessageListener);
    }

    pub fn add_raw_listener<F>(&self, listener: F)
    where
        F: Fn(&Connection, Option<&dyn Value>, &Bytes) + Send + Sync + 'static,
    {
        push(&self.listeners.raw, Arc::new(listener) as RawListener);
    }

    pub fn add_exception_listener<F>(&self, listener: F)
    where
        F: Fn(&Connection, &ProtocolError) + Send + Sync + 'static,
    {
        push(&self.listeners.exception, Arc::new(listener) as ExceptionListener);
    }

    pub fn add_close_listener<F>(&self, listener: F)
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        push(&self.listeners.close, Arc::new(listener) as CloseListener);
    }

    pub fn write_message(&self, message: Message) -> WriteFuture {
        if self.is_closed() {
            return future::ready(Err(ProtocolError::ConnectionClosed)).boxed();
        }
        self.context.write_message(message)
    }

    /// Wrap `body` in a new [`Message`] and write it.
    pub fn send<T: Value>(&self, body: T) -> WriteFuture {
        self.write_message(Message::new(body))
    }

    pub fn write_raw(&self, payload: Bytes, metadata: Option<Arc<dyn Value>>) -> WriteFuture {
        if self.is_closed() {
            return future::ready(Err(ProtocolError::ConnectionClosed)).boxed();
        }
        self.context.write_raw(payload, metadata)
    }

    /// Close the connection. Only the first call releases the channel and
    /// notifies close listeners; later calls succeed without effect.
    #[instrument(level = "debug", skip(self), fields(identity = %self.identity))]
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.context.close().await;
        debug!(transport = %self.transport, "Connection closed");
        for listener in snapshot(&self.listeners.close) {
            listener(self);
        }
        result
    }

    pub(crate) fn notify_message(&self, message: &Message) {
        for listener in snapshot(&self.listeners.message) {
            listener(self, message);
        }
    }

    pub(crate) fn notify_raw(&self, metadata: Option<&dyn Value>, payload: &Bytes) {
        for listener in snapshot(&self.listeners.raw) {
            listener(self, metadata, payload);
        }
    }

    pub(crate) fn notify_exception(&self, error: &ProtocolError) {
        for listener in snapshot(&self.listeners.exception) {
            listener(self, error);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("identity", &self.identity)
            .field("transport", &self.transport)
            .field("closed", &self.is_closed())
            .finish()
    }
}
