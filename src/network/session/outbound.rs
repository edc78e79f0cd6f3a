//! Maintaining the outbound connection target
//!
//! One slot per configured outbound connection. A slot races a batch of
//! connection attempts to distinct pool addresses, keeps the winner until it
//! stops, then starts over. Failed rounds back off exponentially. An address
//! that fails `manual_attempt_limit` times in a row is dropped from the pool.

use super::{back_off, Session, RETRY_MINIMUM};
use crate::error::{Error, ErrorKind, Result};
use crate::network::authority::Authority;
use crate::network::channel::Channel;
use crate::network::connector::Connection;
use crate::network::p2p::Network;
use futures::future::select_ok;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Consecutive failures per pool address, shared by every slot.
#[derive(Default)]
pub(crate) struct Failures {
    counts: Mutex<HashMap<Authority, usize>>,
}

impl Failures {
    /// Count a failed attempt. Returns true when `limit` is reached, at which
    /// point the count is forgotten.
    fn record(&self, authority: Authority, limit: usize) -> bool {
        if limit == 0 {
            return false;
        }
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = counts.entry(authority).or_insert(0);
        *count += 1;
        if *count < limit {
            return false;
        }
        counts.remove(&authority);
        true
    }

    fn reset(&self, authority: &Authority) {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(authority);
    }
}

pub struct SessionOutbound {
    session: Session,
    failures: Arc<Failures>,
}

impl SessionOutbound {
    pub fn new(network: Arc<Network>) -> Self {
        Self {
            session: Session::new(network, "outbound", true),
            failures: Arc::new(Failures::default()),
        }
    }

    /// Start every slot in the background.
    pub fn start(&self) {
        let network = self.session.network();
        let slots = network.settings().outbound_connections;
        if slots == 0 {
            log::info!("Outbound connections disabled");
            return;
        }

        log::info!("Maintaining {} outbound connections", slots);
        for slot in 0..slots {
            network
                .context()
                .spawn(maintain_slot(self.session.clone(), self.failures.clone(), slot));
        }
    }
}

async fn maintain_slot(session: Session, failures: Arc<Failures>, slot: usize) {
    let mut delay = RETRY_MINIMUM;
    while !session.stopped() {
        match connect_once(&session, &failures).await {
            Ok(channel) => {
                delay = RETRY_MINIMUM;
                let code = session.wait_stop(&channel).await;
                log::debug!("Outbound slot {} lost [{}]: {}", slot, channel.authority(), code);
            }
            Err(Error::ServiceStopped) => break,
            Err(e) => {
                if e.kind() == ErrorKind::Rejected {
                    log::trace!("Outbound slot {} idle: {}", slot, e);
                } else {
                    log::debug!("Outbound slot {} failed: {}", slot, e);
                }
                if !session.pause(delay).await {
                    break;
                }
                delay = back_off(delay);
            }
        }
    }
    log::debug!("Outbound slot {} stopped", slot);
}

async fn connect_once(session: &Session, failures: &Failures) -> Result<Arc<Channel>> {
    let network = session.network();
    let connection = connect_batch(session, failures).await?;
    let authority = connection.remote;
    let channel = Channel::outbound(connection, network.settings(), network.context().clone());
    if let Err(e) = session.register_channel(&channel).await {
        attempt_failed(network, failures, authority, &e);
        return Err(e);
    }
    failures.reset(&authority);
    session.attach_protocols(&channel);
    Ok(channel)
}

/// First successful connection among up to `connect_batch_size` candidates.
async fn connect_batch(session: &Session, failures: &Failures) -> Result<Connection> {
    let network = session.network();
    let batch = network.settings().connect_batch_size.max(1);
    let candidates = candidates(network, batch);
    if candidates.is_empty() {
        return Err(Error::AddressNotFound);
    }

    let connector = session.connector();
    let attempts = candidates.into_iter().map(|authority| {
        let connector = &connector;
        Box::pin(async move {
            let result = connector.connect_to(authority).await;
            if let Err(e) = &result {
                attempt_failed(network, failures, authority, e);
            }
            result
        })
    });
    let (connection, _losers) = select_ok(attempts).await?;
    Ok(connection)
}

/// Charge a transport, timeout or protocol failure to `authority`, dropping
/// it from the pool once the attempt limit is reached.
fn attempt_failed(network: &Network, failures: &Failures, authority: Authority, error: &Error) {
    match error.kind() {
        ErrorKind::Timeout | ErrorKind::Transport | ErrorKind::Protocol => {}
        _ => return,
    }
    if failures.record(authority, network.settings().manual_attempt_limit) {
        log::debug!("Dropping [{}] from the pool after repeated failures", authority);
        let _ = network.hosts().remove(&authority);
    }
}

/// Pool addresses not blacklisted, not ourselves, and not already connected
/// or being connected.
pub(crate) fn candidates(network: &Network, count: usize) -> Vec<Authority> {
    let settings = network.settings();
    network
        .hosts()
        .sample(network.hosts().count())
        .into_iter()
        .map(|address| address.authority())
        .filter(|authority| {
            !settings.blacklisted(authority)
                && settings.self_address != Some(*authority)
                && !network.connections().exists(authority)
                && !network.pending_channels().any(|c| c.authority() == *authority)
                && !network.pending_sockets().any(|s| s.remote() == *authority)
        })
        .take(count)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::ExecutionContext;
    use crate::message::{NetworkAddress, ServiceFlags};
    use crate::network::testing;

    #[tokio::test]
    async fn test_candidates_skip_excluded() {
        let mut settings = testing::settings();
        settings.blacklists = vec!["10.0.0.1:8333".parse().unwrap()];
        settings.self_address = Some("10.0.0.2:8333".parse().unwrap());
        let network = Network::new(settings, ExecutionContext::current());
        network.hosts().store_many(&testing::addresses(5));

        let found = candidates(&network, 10);
        assert_eq!(found.len(), 3);
        assert!(!found.contains(&"10.0.0.1:8333".parse().unwrap()));
        assert!(!found.contains(&"10.0.0.2:8333".parse().unwrap()));
        assert_eq!(candidates(&network, 2).len(), 2);
    }

    #[tokio::test]
    async fn test_empty_pool_has_no_candidates() {
        let network = Network::new(testing::settings(), ExecutionContext::current());
        let session = Session::new(network, "outbound", true);
        assert!(matches!(
            connect_batch(&session, &Failures::default()).await,
            Err(Error::AddressNotFound)
        ));
    }

    #[tokio::test]
    async fn test_refusing_address_dropped_at_attempt_limit() {
        let mut settings = testing::settings();
        settings.manual_attempt_limit = 2;
        let network = Network::new(settings, ExecutionContext::current());
        let dead: Authority = format!("127.0.0.1:{}", testing::free_port())
            .parse()
            .unwrap();
        let address = NetworkAddress::new(&dead, ServiceFlags::NETWORK, 0);
        assert!(network.hosts().store(address));

        let session = Session::new(network.clone(), "outbound", true);
        let failures = Failures::default();

        let first = connect_once(&session, &failures).await;
        assert!(matches!(first, Err(Error::ConnectFailed(_))));
        assert!(candidates(&network, 10).contains(&dead));

        let second = connect_once(&session, &failures).await;
        assert!(matches!(second, Err(Error::ConnectFailed(_))));
        assert!(!candidates(&network, 10).contains(&dead));
        assert!(!network.hosts().exists(&dead));

        assert!(matches!(
            connect_once(&session, &failures).await,
            Err(Error::AddressNotFound)
        ));
    }

    #[test]
    fn test_failures_reset_and_unlimited() {
        let failures = Failures::default();
        let authority: Authority = "10.0.0.1:8333".parse().unwrap();

        assert!(!failures.record(authority, 0));
        assert!(!failures.record(authority, 0));

        assert!(!failures.record(authority, 2));
        failures.reset(&authority);
        assert!(!failures.record(authority, 2));
        assert!(failures.record(authority, 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slot_connects_to_pool_address() {
        let mut settings = testing::settings();
        settings.outbound_connections = 1;
        let magic = settings.identifier;
        let network = Network::new(settings, ExecutionContext::current());

        let peer = testing::fake_peer(magic, vec![]).await;
        let address = NetworkAddress::new(&peer, ServiceFlags::NETWORK, 0);
        assert!(network.hosts().store(address));

        SessionOutbound::new(network.clone()).start();
        for _ in 0..100 {
            if network.connections().count() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(network.connections().count(), 1);
        assert!(network.connections().exists(&peer));

        network.shutdown().cancel();
        network.connections().stop_all(Error::ServiceStopped);
    }
}
