//! Core abstractions for the cloud-actions SDK.
//!
//! This crate provides the fundamental building blocks:
//! - `Credential` - access/refresh token pair with derived expiry
//! - `TokenClaims` - decoded (unverified) claims of a token
//! - `Action` - a named remote operation plus payload and routing hints
//! - `SessionState` - coarse authentication status derived from the credential
//! - `CloudObjectHandle` - address of a server-managed stateful instance
//! - Storage and transport traits the host environment implements

pub mod action;
pub mod claims;
pub mod credential;
pub mod events;
pub mod object;
pub mod session;
pub mod traits;

pub use action::Action;
pub use claims::TokenClaims;
pub use credential::{CREDENTIAL_STORE_KEY, Credential};
pub use events::SocketEvent;
pub use object::CloudObjectHandle;
pub use session::{SessionState, SessionStatus};
pub use traits::{
    HttpTransport, KeyValueStore, RealtimeStore, SocketConnection, SocketTransport, StoreError,
    TransportError,
};
