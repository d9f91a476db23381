//! HTTP gateway and server-sent events transport for the operator console.

pub mod client;
pub mod sse;
pub mod transport;

pub use client::HttpGateway;
pub use sse::SseDecoder;
pub use transport::SseTransport;
