//! Mini-Network: the peer-to-peer engine of a Bitcoin-style node
//!
//! This crate provides:
//! - A tokio-backed execution context with ordered, unordered and
//!   synchronized dispatch, deadlines and subscriber fan-out
//! - The wire codec for the handshake, keep-alive and discovery messages
//! - Channels that frame a socket and route decoded messages to protocols
//! - Handshake, ping, address and seed protocols
//! - Seed, inbound, outbound and manual sessions under one coordinator
//!
//! # Example
//!
//! ```rust,no_run
//! use mini_network::concurrency::Threadpool;
//! use mini_network::network::P2p;
//! use mini_network::settings::Settings;
//!
//! let settings = Settings::testnet();
//! let pool = Threadpool::new(settings.threads).unwrap();
//! pool.block_on(async {
//!     let p2p = P2p::new(settings, pool.context());
//!     p2p.start().await.unwrap();
//!     p2p.run().await.unwrap();
//!     println!("Known addresses: {}", p2p.address_count());
//!     p2p.stop().unwrap();
//! });
//! ```

pub mod cli;
pub mod concurrency;
pub mod crypto;
pub mod error;
pub mod message;
pub mod network;
pub mod settings;

// Re-export commonly used types
pub use concurrency::{ExecutionContext, Threadpool};
pub use error::{Error, ErrorKind, Result};
pub use message::{Message, ServiceFlags};
pub use network::{Authority, Channel, Endpoint, P2p};
pub use settings::Settings;
