//! The set of handshaken channels owned by the node

use super::authority::Authority;
use super::channel::Channel;
use crate::error::{Error, Result};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
pub struct Connections {
    channels: RwLock<Vec<Arc<Channel>>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel; fails with `AddressInUse` if its authority or nonce is
    /// already connected.
    pub fn store(&self, channel: Arc<Channel>) -> Result<()> {
        let mut channels = self.write();
        if channels
            .iter()
            .any(|c| c.authority() == channel.authority() || c.nonce() == channel.nonce())
        {
            return Err(Error::AddressInUse);
        }
        channels.push(channel);
        Ok(())
    }

    pub fn remove(&self, channel: &Channel) -> Result<()> {
        let mut channels = self.write();
        let index = channels
            .iter()
            .position(|c| c.id() == channel.id())
            .ok_or(Error::NotFound)?;
        channels.swap_remove(index);
        Ok(())
    }

    pub fn exists(&self, authority: &Authority) -> bool {
        self.read().iter().any(|c| c.authority() == *authority)
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    pub fn inbound_count(&self) -> usize {
        self.read().iter().filter(|c| c.is_inbound()).count()
    }

    pub fn snapshot(&self) -> Vec<Arc<Channel>> {
        self.read().clone()
    }

    /// Remove and stop every channel.
    pub fn stop_all(&self, code: Error) {
        let channels = std::mem::take(&mut *self.write());
        for channel in channels {
            channel.stop(code.clone());
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Channel>>> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Channel>>> {
        self.channels.write().unwrap_or_else(PoisonError::into_inner)
    }
}
