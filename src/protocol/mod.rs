//! # Protocol Messages
//!
//! The message model carried in MESSAGE frames and the handshake exchanged
//! when a connection opens.

pub mod handshake;
pub mod message;
