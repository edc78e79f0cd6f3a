//! Sessions
//!
//! A session drives one class of connection activity on behalf of the node.
//! Every channel a session produces passes through [`Session::register_channel`]:
//! it is pended by nonce, handshaken, unpended, and then tracked in the
//! node's connections until it stops.

pub mod inbound;
pub mod manual;
pub mod outbound;
pub mod seed;

pub use inbound::SessionInbound;
pub use manual::SessionManual;
pub use outbound::SessionOutbound;
pub use seed::SessionSeed;

use super::authority::{Authority, Endpoint};
use super::channel::Channel;
use super::connector::Connector;
use super::p2p::Network;
use super::protocol::{Protocol, ProtocolAddress, ProtocolPing, ProtocolVersion};
use crate::error::{Error, Result};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

/// Shortest wait between failed connection attempts.
pub const RETRY_MINIMUM: Duration = Duration::from_secs(1);

/// Longest wait between failed connection attempts.
pub const RETRY_MAXIMUM: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Session {
    network: Arc<Network>,
    name: &'static str,
    notify: bool,
}

impl Session {
    /// `notify` publishes each registered channel to the node's channel
    /// subscribers.
    pub fn new(network: Arc<Network>, name: &'static str, notify: bool) -> Self {
        Self {
            network,
            name,
            notify,
        }
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stopped(&self) -> bool {
        self.network.stopped()
    }

    pub fn connector(&self) -> Connector {
        Connector::new(
            self.network.settings().connect_timeout(),
            self.network.pending_sockets().clone(),
            self.network.shutdown().clone(),
        )
    }

    pub fn blacklisted(&self, authority: &Authority) -> bool {
        self.network.settings().blacklisted(authority)
    }

    /// Handshake `channel` and add it to the node's connections. On any
    /// failure the channel is stopped.
    pub async fn register_channel(&self, channel: &Arc<Channel>) -> Result<()> {
        if self.stopped() {
            channel.stop(Error::ServiceStopped);
            return Err(Error::ServiceStopped);
        }

        let network = &self.network;
        if let Err(e) = network.pending_channels().insert(channel.clone()) {
            channel.stop(e.clone());
            return Err(e);
        }

        let handshake = self.handshake(channel).await;
        let _ = network.pending_channels().remove(&channel.nonce());
        if let Err(e) = handshake {
            log::debug!(
                "Handshake with [{}] failed ({}): {}",
                channel.authority(),
                self.name,
                e
            );
            channel.stop(e.clone());
            return Err(e);
        }

        if let Err(e) = network.connections().store(channel.clone()) {
            log::debug!("Dropping duplicate channel [{}]: {}", channel.authority(), e);
            channel.stop(e.clone());
            return Err(e);
        }

        let weak: Weak<Network> = Arc::downgrade(network);
        let stopped = channel.clone();
        channel.subscribe_stop(move |code| {
            log::debug!("Channel [{}] stopped: {}", stopped.authority(), code);
            if let Some(network) = weak.upgrade() {
                let _ = network.connections().remove(&stopped);
            }
        });

        // Shutdown may have drained connections while we were storing.
        if self.stopped() {
            channel.stop(Error::ServiceStopped);
            return Err(Error::ServiceStopped);
        }

        log::info!(
            "Connected {} channel [{}] ({})",
            if channel.is_inbound() { "inbound" } else { "outbound" },
            channel.authority(),
            self.name
        );

        if self.notify {
            network.channel_subscriber().relay(Ok(channel.clone()));
        }
        Ok(())
    }

    async fn handshake(&self, channel: &Arc<Channel>) -> Result<()> {
        let network = &self.network;
        let (tx, rx) = oneshot::channel();
        let protocol = ProtocolVersion::new(
            channel,
            network.settings(),
            network.height(),
            network.pending_channels().clone(),
        );
        protocol.start(Box::new(move |code| {
            let _ = tx.send(code);
        }));
        channel.start()?;

        tokio::select! {
            _ = network.shutdown().cancelled() => Err(Error::ServiceStopped),
            code = rx => code.unwrap_or(Err(Error::ChannelStopped)),
        }
    }

    /// Attach the protocols every established channel runs.
    pub fn attach_protocols(&self, channel: &Arc<Channel>) {
        let network = &self.network;
        let settings = network.settings();
        ProtocolPing::new(channel, settings.channel_heartbeat()).start(Box::new(|_| {}));
        ProtocolAddress::new(channel, network.hosts().clone(), settings).start(Box::new(|_| {}));
    }

    /// Connect to `endpoint`, handshake, and attach protocols.
    pub async fn connect_endpoint(&self, endpoint: &Endpoint) -> Result<Arc<Channel>> {
        let connection = self.connector().connect(endpoint).await?;
        if self.blacklisted(&connection.remote) {
            return Err(Error::AddressBlocked);
        }

        let network = &self.network;
        let channel = Channel::outbound(connection, network.settings(), network.context().clone());
        self.register_channel(&channel).await?;
        self.attach_protocols(&channel);
        Ok(channel)
    }

    /// Wait for `channel` to stop, or for shutdown.
    pub async fn wait_stop(&self, channel: &Arc<Channel>) -> Error {
        let (tx, rx) = oneshot::channel();
        channel.subscribe_stop(move |code| {
            let _ = tx.send(code);
        });

        tokio::select! {
            _ = self.network.shutdown().cancelled() => Error::ServiceStopped,
            code = rx => code.unwrap_or(Error::ChannelStopped),
        }
    }

    /// Sleep for `delay` unless shut down first. Returns false on shutdown.
    pub async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.network.shutdown().cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Double `delay`, bounded by [`RETRY_MAXIMUM`].
pub fn back_off(delay: Duration) -> Duration {
    (delay * 2).min(RETRY_MAXIMUM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_back_off_is_bounded() {
        let mut delay = RETRY_MINIMUM;
        for _ in 0..10 {
            delay = back_off(delay);
        }
        assert_eq!(delay, RETRY_MAXIMUM);
        assert_eq!(back_off(RETRY_MINIMUM), Duration::from_secs(2));
    }
}
