//! # Buffer Pool
//!
//! Scratch buffers that connection contexts encode outbound frames into.
//!
//! A frame is encoded into a pooled buffer and copied out as [`Bytes`] for the
//! writer channel. Dropping the [`PooledBuffer`] hands the cleared buffer back,
//! so steady traffic on a connection stops allocating once the pool is warm.
//!
//! ## Usage
//! ```rust,no_run
//! use wirelink::utils::buffer_pool::BufferPool;
//!
//! let pool = BufferPool::new(16);
//! let mut buffer = pool.acquire();
//! buffer.extend_from_slice(b"frame");
//! let frame = buffer.to_bytes();
//! ```

use bytes::{Bytes, BytesMut};
use std::sync::{Arc, Mutex, PoisonError};

/// Buffers that grew past this while encoding a large frame are freed
/// instead of kept (64KB)
const MAX_RETAINED_CAPACITY: usize = 64 * 1024;

/// Capacity of a fresh buffer; most frames fit
const FRAME_BUFFER_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Shelf {
    buffers: Mutex<Vec<BytesMut>>,
    /// Upper bound on idle buffers kept
    limit: usize,
}

impl Shelf {
    fn take(&self) -> Option<BytesMut> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner).pop()
    }

    fn put_back(&self, mut buffer: BytesMut) {
        if buffer.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buffer.clear();
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.len() < self.limit {
            buffers.push(buffer);
        }
    }
}

/// Buffer on loan from a [`BufferPool`].
pub struct PooledBuffer {
    buffer: BytesMut,
    shelf: Arc<Shelf>,
}

impl PooledBuffer {
    /// The buffer itself, for APIs that take `&mut BytesMut`
    #[allow(clippy::should_implement_trait)]
    pub fn as_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Copy of the encoded bytes; the buffer stays on loan until dropped
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buffer)
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.shelf.put_back(std::mem::take(&mut self.buffer));
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buffer
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }
}

/// Bounded pool of frame buffers, shared by clones.
#[derive(Debug, Clone)]
pub struct BufferPool {
    shelf: Arc<Shelf>,
}

impl BufferPool {
    /// Pool pre-filled with `size` buffers; it never keeps more than that idle.
    pub fn new(size: usize) -> Self {
        let buffers = (0..size).map(|_| BytesMut::with_capacity(FRAME_BUFFER_CAPACITY)).collect();
        Self {
            shelf: Arc::new(Shelf {
                buffers: Mutex::new(buffers),
                limit: size,
            }),
        }
    }

    /// Borrow a buffer, allocating when every pooled one is on loan.
    pub fn acquire(&self) -> PooledBuffer {
        let buffer = self
            .shelf
            .take()
            .unwrap_or_else(|| BytesMut::with_capacity(FRAME_BUFFER_CAPACITY));
        PooledBuffer {
            buffer,
            shelf: Arc::clone(&self.shelf),
        }
    }

    /// Idle buffers ready to lend
    pub fn available(&self) -> usize {
        self.shelf.buffers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(16)
    }
}
