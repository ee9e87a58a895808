//! HTTP and realtime socket transports.
//!
//! Provides:
//! - `ReqwestTransport` - HTTP transport with a fixed request timeout
//!   (feature: http)
//! - `TungsteniteTransport` - realtime socket client (feature: socket)
//! - `SocketRealtimeStore` - per-path document subscriptions multiplexed
//!   over one socket connection

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "socket")]
pub mod socket;

pub mod realtime;

#[cfg(feature = "http")]
pub use http::ReqwestTransport;

#[cfg(feature = "socket")]
pub use socket::TungsteniteTransport;

pub use realtime::SocketRealtimeStore;
