//! # Core Protocol Components
//!
//! Low-level wire handling: typed buffers, frame tags and the stream codec.
//!
//! ## Components
//! - **Buffer**: big-endian and compressed-integer primitives
//! - **Frame**: MESSAGE / RAW tagged frames
//! - **Codec**: Tokio codec for handshake + length-prefixed units over byte streams
//!
//! ## Wire Format
//! ```text
//! [Length(4)] [FrameType(1)] [Payload(N)]
//! ```
//!
//! ## Security
//! - Maximum unit size bounded by configuration (default 16MB)
//! - Magic bytes reject foreign peers before anything is decoded
//! - Length validation before allocation

pub mod buffer;
pub mod codec;
pub mod frame;
