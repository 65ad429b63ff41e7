//! # Utility Modules
//!
//! Supporting utilities shared by the codec and the transports.
//!
//! ## Components
//! - **Buffer Pool**: reusable encode buffers for outbound frames
//! - **Compression**: gzip and snappy stream decompression for negotiated streams
//! - **Logging**: tracing subscriber configuration
//!
//! ## Security
//! - Decompression output is bounded before it is buffered

pub mod buffer_pool;
pub mod compression;
pub mod logging;

pub use logging::init_logging;
