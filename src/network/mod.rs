//! P2P Networking module
//!
//! Connection management for a Bitcoin-style peer network.
//!
//! # Features
//! - Framed channels with per-message subscriptions
//! - Version handshake with self-connection detection
//! - Ping keep-alive and address discovery protocols
//! - Seed, inbound, outbound and manual sessions
//! - Bounded, persisted host pool

pub mod acceptor;
pub mod authority;
pub mod channel;
pub mod connections;
pub mod connector;
pub mod hosts;
pub mod message_subscriber;
pub mod p2p;
pub mod pending;
pub mod protocol;
pub mod session;
pub mod socket;

#[cfg(test)]
pub(crate) mod testing;

pub use authority::{Authority, Endpoint};
pub use channel::Channel;
pub use connections::Connections;
pub use hosts::Hosts;
pub use p2p::{Network, P2p};
pub use pending::{Pendable, Pending};
