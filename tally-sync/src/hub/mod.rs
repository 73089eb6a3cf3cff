//! Realtime channel: hub protocol and the reconnecting client.

pub mod client;
pub mod protocol;

pub use client::{ConnectionState, HubClient, Subscription};
pub use protocol::HubMessage;
