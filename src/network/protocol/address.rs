//! Address exchange on established channels
//!
//! Announces our own address once, stores addresses the peer sends, and
//! answers the first get-address request with a sample of the host pool.

use super::{Completion, CompletionHandler, Protocol, ProtocolEvents};
use crate::error::{Error, Result};
use crate::message::{Address, GetAddress, NetworkAddress, MAX_ADDRESSES};
use crate::network::channel::Channel;
use crate::network::hosts::Hosts;
use crate::network::message_subscriber::MessageResult;
use crate::settings::Settings;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct ProtocolAddress {
    events: ProtocolEvents,
    hosts: Arc<Hosts>,
    self_address: Option<NetworkAddress>,
    answered: AtomicBool,
    completion: Completion,
}

impl ProtocolAddress {
    pub fn new(channel: &Arc<Channel>, hosts: Arc<Hosts>, settings: &Settings) -> Arc<Self> {
        Arc::new(Self {
            events: ProtocolEvents::new(channel, Self::NAME),
            hosts,
            self_address: self_address(settings),
            answered: AtomicBool::new(false),
            completion: Completion::default(),
        })
    }

    fn handle_event(&self, code: Result<()>) {
        if let Err(e) = code {
            self.completion.complete(Err(e));
        }
    }

    fn handle_receive_address(&self, message: MessageResult<Address>) -> bool {
        match message {
            Ok(message) => {
                log::debug!(
                    "Received {} addresses from [{}]",
                    message.addresses.len(),
                    self.events.authority()
                );
                self.hosts.store_many(&message.addresses);
                true
            }
            Err(Error::ChannelStopped) => false,
            Err(e) => {
                log::debug!("Ignoring addresses from [{}]: {}", self.events.authority(), e);
                true
            }
        }
    }

    fn handle_receive_get_address(&self, message: MessageResult<GetAddress>) -> bool {
        match message {
            Ok(_) => {}
            Err(Error::ChannelStopped) => return false,
            Err(_) => return true,
        }

        if self.answered.swap(true, Ordering::AcqRel) {
            log::debug!("Ignoring repeated get-address from [{}]", self.events.authority());
            return true;
        }

        let Some(channel) = self.channel() else {
            return false;
        };

        let addresses = self.hosts.sample(MAX_ADDRESSES);
        log::debug!(
            "Sending {} addresses to [{}]",
            addresses.len(),
            channel.authority()
        );
        channel.send(&Address { addresses }, |_| {});
        true
    }
}

impl Protocol for ProtocolAddress {
    const NAME: &'static str = "address";

    fn events(&self) -> &ProtocolEvents {
        &self.events
    }

    fn start(self: &Arc<Self>, handler: CompletionHandler) {
        self.completion.set(handler);

        let this = self.clone();
        self.events.start(Arc::new(move |code| this.handle_event(code)));

        let Some(channel) = self.channel() else {
            return;
        };

        if let Some(own) = self.self_address {
            channel.send(
                &Address {
                    addresses: vec![own],
                },
                |_| {},
            );
        }

        let this = self.clone();
        channel.subscribe::<Address, _>(move |message| this.handle_receive_address(message));
        let this = self.clone();
        channel.subscribe::<GetAddress, _>(move |message| this.handle_receive_get_address(message));
    }
}

/// Our announceable address, if configured and usable.
pub(crate) fn self_address(settings: &Settings) -> Option<NetworkAddress> {
    let timestamp = chrono::Utc::now().timestamp() as u32;
    settings
        .self_address
        .filter(|authority| authority.is_valid())
        .map(|authority| NetworkAddress::new(&authority, settings.services, timestamp))
}
