//! TERRA Command Channel
//!
//! One long-lived, framed-JSON, bidirectional stream per session over TCP.
//!
//! - [`cert`] - minimal mutual-attestation certificates (HMAC-SHA256 under a
//!   shared CA key; no production TLS CA).
//! - [`envelope`] - command envelope signing and verification.
//! - [`replay`] - the time-bounded `(id, timestamp)` seen-set.
//! - [`session`] - session tokens, TTL, second-factor state.
//! - [`verify`] - the server-side admission pipeline (structure →
//!   freshness → replay → signature → dispatch).
//! - [`server`] / [`client`] - the two ends of the link.
//! - [`offline`] - the client-side persisted offline command queue.

pub mod cert;
pub mod client;
pub mod envelope;
pub mod error;
pub mod offline;
pub mod protocol;
pub mod replay;
pub mod server;
pub mod session;
pub mod verify;

pub use cert::{CaKey, Certificate, TrustedClients};
pub use client::LinkClient;
pub use error::LinkError;
pub use server::spawn_link_server;
