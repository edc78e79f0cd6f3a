//! Accepting connections from peers
//!
//! Each accepted socket is screened before a channel exists for it. Rejected
//! sockets are simply dropped. The accept loop runs until shutdown.

use super::Session;
use crate::error::{Error, Result};
use crate::network::acceptor::Acceptor;
use crate::network::authority::Authority;
use crate::network::channel::Channel;
use crate::network::p2p::Network;
use std::sync::Arc;
use std::time::Duration;

pub struct SessionInbound {
    session: Session,
}

impl SessionInbound {
    pub fn new(network: Arc<Network>) -> Self {
        Self {
            session: Session::new(network, "inbound", true),
        }
    }

    /// Bind the listener and start accepting in the background. A zero
    /// inbound port disables the session.
    pub async fn start(&self) -> Result<()> {
        let port = self.session.network().settings().inbound_port;
        if port == 0 {
            log::info!("Inbound connections disabled");
            return Ok(());
        }

        let acceptor = Acceptor::listen(port).await?;
        let session = self.session.clone();
        self.session
            .network()
            .context()
            .spawn(accept_loop(session, acceptor));
        Ok(())
    }
}

async fn accept_loop(session: Session, acceptor: Acceptor) {
    let network = session.network().clone();
    loop {
        let accepted = tokio::select! {
            _ = network.shutdown().cancelled() => break,
            accepted = acceptor.accept() => accepted,
        };

        let (socket, authority) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                log::warn!("Accept failed: {}", e);
                if !session.pause(Duration::from_millis(100)).await {
                    break;
                }
                continue;
            }
        };

        if let Err(e) = screen(&network, &authority) {
            log::debug!("Rejected inbound [{}]: {}", authority, e);
            continue;
        }

        let channel = Channel::inbound(
            socket,
            authority,
            network.settings(),
            network.context().clone(),
        );
        let session = session.clone();
        network.context().spawn(async move {
            if session.register_channel(&channel).await.is_ok() {
                session.attach_protocols(&channel);
            }
        });
    }
    log::debug!("Inbound session stopped");
}

/// Checks an accepted peer must pass before a channel is created for it.
pub(crate) fn screen(network: &Network, authority: &Authority) -> Result<()> {
    let settings = network.settings();
    let pending = network.pending_channels();

    let inbound = network.connections().inbound_count() + pending.count_where(|c| c.is_inbound());
    if inbound >= settings.inbound_connections {
        return Err(Error::InboundLimit);
    }

    if settings.blacklisted(authority) {
        return Err(Error::AddressBlocked);
    }

    // Our own outbound attempt arriving back at our listener.
    let local = Some(*authority);
    if pending.any(|c| c.local() == local)
        || network.pending_sockets().any(|s| s.local() == local)
    {
        return Err(Error::Loopback);
    }

    if network.connections().exists(authority) || pending.any(|c| c.authority() == *authority) {
        return Err(Error::AddressInUse);
    }

    Ok(())
}
