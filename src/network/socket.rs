//! Byte stream abstraction
//!
//! Channels run over any async stream so tests can drive them with in-memory
//! pipes instead of TCP.

use tokio::io::{AsyncRead, AsyncWrite};

pub trait Socket: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Socket for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedSocket = Box<dyn Socket>;
