//! # Service Layer
//!
//! Server bootstrap over the negotiation pipeline and the client entry points.

pub mod client;
pub mod server;

pub use client::{connect, resume};
pub use server::Server;
