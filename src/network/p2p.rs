//! Node coordinator
//!
//! [`Network`] is the state shared by all sessions: settings, host pool,
//! pending registries, established connections and the channel subscriber.
//! [`P2p`] owns it and sequences the sessions:
//!
//! - `start` loads the host pool, starts manual peers and seeds the pool.
//! - `run` starts the inbound listener and the outbound slots.
//! - `stop` cancels everything in flight and saves the host pool.
//!
//! A stopped node cannot be restarted.

use super::authority::{Authority, Endpoint};
use super::channel::Channel;
use super::connections::Connections;
use super::connector::PendingSocket;
use super::hosts::Hosts;
use super::pending::Pending;
use super::session::{SessionInbound, SessionManual, SessionOutbound, SessionSeed};
use crate::concurrency::{ExecutionContext, Resubscriber};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::settings::Settings;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

pub struct Network {
    settings: Settings,
    context: ExecutionContext,
    hosts: Arc<Hosts>,
    pending_sockets: Arc<Pending<PendingSocket>>,
    pending_channels: Arc<Pending<Channel>>,
    connections: Connections,
    channel_subscriber: Arc<Resubscriber<Result<Arc<Channel>>>>,
    height: AtomicU32,
    shutdown: CancellationToken,
}

impl Network {
    pub fn new(settings: Settings, context: ExecutionContext) -> Arc<Self> {
        let hosts = Hosts::new(settings.host_pool_capacity, settings.hosts_file.clone());
        Arc::new(Self {
            hosts: Arc::new(hosts),
            pending_sockets: Arc::new(Pending::new("sockets")),
            pending_channels: Arc::new(Pending::new("channels")),
            connections: Connections::new(),
            channel_subscriber: Arc::new(Resubscriber::new(context.clone(), "channels")),
            height: AtomicU32::new(0),
            shutdown: CancellationToken::new(),
            settings,
            context,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn hosts(&self) -> &Arc<Hosts> {
        &self.hosts
    }

    pub fn pending_sockets(&self) -> &Arc<Pending<PendingSocket>> {
        &self.pending_sockets
    }

    pub fn pending_channels(&self) -> &Arc<Pending<Channel>> {
        &self.pending_channels
    }

    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    pub fn channel_subscriber(&self) -> &Arc<Resubscriber<Result<Arc<Channel>>>> {
        &self.channel_subscriber
    }

    /// Best known block height, advertised in version messages.
    pub fn height(&self) -> u32 {
        self.height.load(Ordering::Acquire)
    }

    pub fn set_height(&self, height: u32) {
        self.height.store(height, Ordering::Release);
    }

    /// Canceled once when the node stops.
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Started,
    Running,
    Stopped,
}

pub struct P2p {
    network: Arc<Network>,
    state: Mutex<State>,
}

impl P2p {
    pub fn new(settings: Settings, context: ExecutionContext) -> Self {
        Self {
            network: Network::new(settings, context),
            state: Mutex::new(State::Idle),
        }
    }

    pub fn settings(&self) -> &Settings {
        self.network.settings()
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn stopped(&self) -> bool {
        self.network.stopped()
    }

    fn transition(&self, from: State, to: State) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            log::warn!("Invalid node transition {:?} -> {:?} (at {:?})", from, to, *state);
            return Err(Error::OperationFailed);
        }
        *state = to;
        Ok(())
    }

    /// Load the host pool, start manual connections and seed the pool if it
    /// is empty.
    pub async fn start(&self) -> Result<()> {
        self.transition(State::Idle, State::Started)?;

        self.network.hosts().load()?;
        log::info!("Loaded {} addresses", self.network.hosts().count());

        let manual = SessionManual::new(self.network.clone());
        for peer in &self.settings().peers {
            manual.start_connect(peer.clone());
        }

        SessionSeed::new(self.network.clone()).run().await
    }

    /// Accept inbound connections and maintain outbound ones.
    pub async fn run(&self) -> Result<()> {
        self.transition(State::Started, State::Running)?;

        SessionInbound::new(self.network.clone()).start().await?;
        SessionOutbound::new(self.network.clone()).start();
        Ok(())
    }

    /// Stop all sessions and channels, then save the host pool. Only the
    /// first call does anything.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == State::Stopped {
                return Ok(());
            }
            *state = State::Stopped;
        }

        log::info!("Stopping network");
        let network = &self.network;
        network.shutdown().cancel();
        network.channel_subscriber().stop(Err(Error::ServiceStopped));
        network.pending_sockets().stop_all(Error::ServiceStopped);
        network.pending_channels().stop_all(Error::ServiceStopped);
        network.connections().stop_all(Error::ServiceStopped);

        network.hosts().save().map_err(|e| {
            log::error!("Failed to save hosts: {}", e);
            e
        })?;
        log::info!("Saved {} addresses", network.hosts().count());
        Ok(())
    }

    /// Maintain a connection to `endpoint`, returning the first outcome.
    pub async fn connect(&self, endpoint: Endpoint) -> Result<Arc<Channel>> {
        if self.stopped() {
            return Err(Error::ServiceStopped);
        }
        SessionManual::new(self.network.clone()).connect(endpoint).await
    }

    /// Be told of every newly established channel while `handler` returns
    /// true, and finally with `ServiceStopped`.
    pub fn subscribe<H>(&self, handler: H)
    where
        H: FnMut(Result<Arc<Channel>>) -> bool + Send + 'static,
    {
        self.network.channel_subscriber().subscribe(handler);
    }

    /// Send `message` to every established channel.
    pub async fn broadcast<M: Message>(&self, message: &M) -> Vec<(Authority, Result<()>)> {
        let channels = self.network.connections().snapshot();
        let sends = channels.iter().map(|channel| async move {
            (channel.authority(), channel.send_async(message).await)
        });
        futures::future::join_all(sends).await
    }

    pub fn connected_count(&self) -> usize {
        self.network.connections().count()
    }

    pub fn address_count(&self) -> usize {
        self.network.hosts().count()
    }

    pub fn height(&self) -> u32 {
        self.network.height()
    }

    pub fn set_height(&self, height: u32) {
        self.network.set_height(height);
    }
}

impl Drop for P2p {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Ping;
    use crate::network::testing;
    use std::time::Duration;
    use tempfile::TempDir;

    fn node(settings: Settings) -> P2p {
        P2p::new(settings, ExecutionContext::current())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_seeding_scenario() {
        let directory = TempDir::new().unwrap();
        let mut settings = testing::settings();
        settings.hosts_file = directory.path().join("hosts.cache");
        let seed = testing::fake_peer(settings.identifier, testing::addresses(3)).await;
        settings.seeds = vec![
            format!("127.0.0.1:{}", testing::free_port()).parse().unwrap(),
            Endpoint::from(seed),
        ];

        let p2p = node(settings);
        assert_eq!(p2p.start().await, Ok(()));
        assert_eq!(p2p.address_count(), 3);

        p2p.stop().unwrap();
        let saved = std::fs::read_to_string(directory.path().join("hosts.cache")).unwrap();
        assert_eq!(saved.lines().count(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_inbound_limit_zero_rejects() {
        let mut settings = testing::settings();
        settings.host_pool_capacity = 0;
        settings.inbound_port = testing::free_port();
        settings.inbound_connections = 0;
        let port = settings.inbound_port;

        let p2p = node(settings);
        p2p.start().await.unwrap();
        p2p.run().await.unwrap();

        let _client = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(p2p.connected_count(), 0);
        assert_eq!(p2p.network().pending_channels().count(), 0);
        p2p.stop().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lifecycle_is_not_restartable() {
        let mut settings = testing::settings();
        settings.host_pool_capacity = 0;

        let p2p = node(settings);
        assert_eq!(p2p.run().await, Err(Error::OperationFailed));
        p2p.start().await.unwrap();
        p2p.run().await.unwrap();
        p2p.stop().unwrap();
        p2p.stop().unwrap();
        assert!(p2p.stopped());
        assert_eq!(p2p.start().await, Err(Error::OperationFailed));
        assert!(matches!(
            p2p.connect(Endpoint::new("127.0.0.1", 1)).await,
            Err(Error::ServiceStopped)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_subscribe_and_broadcast() {
        let mut settings = testing::settings();
        settings.host_pool_capacity = 0;
        let magic = settings.identifier;
        let p2p = node(settings);
        p2p.set_height(7);
        assert_eq!(p2p.height(), 7);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        p2p.subscribe(move |result| {
            let _ = tx.send(result.map(|channel| channel.authority()));
            true
        });

        p2p.start().await.unwrap();
        let peer = testing::fake_peer(magic, vec![]).await;
        let channel = p2p.connect(Endpoint::from(peer)).await.unwrap();
        assert_eq!(rx.recv().await, Some(Ok(peer)));
        assert_eq!(p2p.connected_count(), 1);

        let results = p2p.broadcast(&Ping { nonce: 3 }).await;
        assert_eq!(results, vec![(peer, Ok(()))]);

        p2p.stop().unwrap();
        assert_eq!(rx.recv().await, Some(Err(Error::ServiceStopped)));
        assert!(channel.stopped());
        assert_eq!(p2p.connected_count(), 0);
    }
}
