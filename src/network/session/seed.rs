//! Initial population of the host pool
//!
//! Runs only when the pool is enabled and empty. Every configured seed is
//! tried, at most `connect_batch_size` at a time. The session succeeds as soon
//! as the pool grows and fails only when every seed has been tried without
//! that happening. Individual seed failures are logged and absorbed.

use super::Session;
use crate::error::{Error, Result};
use crate::network::authority::Endpoint;
use crate::network::channel::Channel;
use crate::network::p2p::Network;
use crate::network::protocol::{Protocol, ProtocolPing, ProtocolSeed};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};

pub struct SessionSeed {
    session: Session,
}

impl SessionSeed {
    pub fn new(network: Arc<Network>) -> Self {
        Self {
            session: Session::new(network, "seed", false),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let network = self.session.network();
        let settings = network.settings();
        let hosts = network.hosts();

        if hosts.capacity() == 0 {
            log::info!("Host pool disabled, not seeding");
            return Ok(());
        }
        if !hosts.is_empty() {
            log::info!("Host pool has {} addresses, not seeding", hosts.count());
            return Ok(());
        }
        if settings.seeds.is_empty() {
            log::error!("Host pool is empty and no seeds are configured");
            return Err(Error::SeedingUnsuccessful);
        }

        log::info!("Seeding host pool from {} seeds", settings.seeds.len());
        let start = hosts.count();
        let permits = Arc::new(Semaphore::new(settings.connect_batch_size.max(1)));
        let mut attempts: FuturesUnordered<_> = settings
            .seeds
            .iter()
            .map(|seed| {
                let session = self.session.clone();
                let seed = seed.clone();
                let permits = permits.clone();
                network
                    .context()
                    .spawn(async move { start_seed(session, seed, permits).await })
            })
            .collect();

        // Unfinished attempts keep running in the background and end on
        // their own, by timeout or shutdown.
        while let Some(joined) = attempts.next().await {
            if self.session.stopped() {
                return Err(Error::ServiceStopped);
            }
            if let Ok(Err(e)) = joined {
                log::debug!("Seed attempt failed: {}", e);
            }
            if hosts.count() > start {
                log::info!("Seeding complete with {} addresses", hosts.count());
                return Ok(());
            }
        }

        log::error!("Seeding failed, no addresses received");
        Err(Error::SeedingUnsuccessful)
    }
}

async fn start_seed(session: Session, seed: Endpoint, permits: Arc<Semaphore>) -> Result<()> {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|_| Error::ServiceStopped)?;

    let network = session.network().clone();
    let connection = session.connector().connect(&seed).await.map_err(|e| {
        log::warn!("Seed [{}] unreachable: {}", seed, e);
        e
    })?;

    let channel = Channel::outbound(connection, network.settings(), network.context().clone());
    session.register_channel(&channel).await?;

    let (tx, rx) = oneshot::channel();
    ProtocolPing::new(&channel, network.settings().channel_heartbeat()).start(Box::new(|_| {}));
    ProtocolSeed::new(&channel, network.hosts().clone(), network.settings()).start(Box::new(
        move |code| {
            let _ = tx.send(code);
        },
    ));

    let result = tokio::select! {
        _ = network.shutdown().cancelled() => Err(Error::ServiceStopped),
        code = rx => code.unwrap_or(Err(Error::ChannelStopped)),
    };
    channel.stop(Error::ChannelStopped);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::ExecutionContext;
    use crate::network::testing;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_no_seeds_is_failure() {
        let settings = testing::settings();
        let network = Network::new(settings, ExecutionContext::current());
        let session = SessionSeed::new(network);
        assert_eq!(session.run().await, Err(Error::SeedingUnsuccessful));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disabled_pool_skips_seeding() {
        let mut settings = testing::settings();
        settings.host_pool_capacity = 0;
        let network = Network::new(settings, ExecutionContext::current());
        assert_eq!(SessionSeed::new(network).run().await, Ok(()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unreachable_seed_is_absorbed() {
        let mut settings = testing::settings();
        let reachable = testing::fake_peer(settings.identifier, testing::addresses(3)).await;
        settings.seeds = vec![
            format!("127.0.0.1:{}", testing::free_port()).parse().unwrap(),
            Endpoint::from(reachable),
        ];

        let network = Network::new(settings, ExecutionContext::current());
        let session = SessionSeed::new(network.clone());
        assert_eq!(session.run().await, Ok(()));
        assert_eq!(network.hosts().count(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_all_seeds_unreachable() {
        let mut settings = testing::settings();
        settings.seeds = vec![format!("127.0.0.1:{}", testing::free_port()).parse().unwrap()];
        let network = Network::new(settings, ExecutionContext::current());
        assert_eq!(
            SessionSeed::new(network).run().await,
            Err(Error::SeedingUnsuccessful)
        );
    }
}
