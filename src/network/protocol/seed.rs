//! Address harvesting from a seed node
//!
//! Requests addresses once and completes when the reply arrives, whether or
//! not anything new was learned. Our own address is announced first when
//! configured. The germination timer bounds the wait.

use super::address::self_address;
use super::{Completion, CompletionHandler, Protocol, ProtocolEvents, ProtocolTimer};
use crate::error::{Error, Result};
use crate::message::{Address, GetAddress, NetworkAddress};
use crate::network::channel::Channel;
use crate::network::hosts::Hosts;
use crate::network::message_subscriber::MessageResult;
use crate::settings::Settings;
use std::sync::Arc;

pub struct ProtocolSeed {
    timer: ProtocolTimer,
    hosts: Arc<Hosts>,
    self_address: Option<NetworkAddress>,
    completion: Completion,
}

impl ProtocolSeed {
    pub fn new(channel: &Arc<Channel>, hosts: Arc<Hosts>, settings: &Settings) -> Arc<Self> {
        Arc::new(Self {
            timer: ProtocolTimer::new(channel, Self::NAME, settings.channel_germination(), false),
            hosts,
            self_address: self_address(settings),
            completion: Completion::default(),
        })
    }

    fn handle_event(&self, code: Result<()>) {
        match code {
            Ok(()) => {
                self.completion.complete(Ok(()));
            }
            Err(Error::ChannelStopped) => {
                self.completion.complete(Err(Error::ChannelStopped));
            }
            Err(e) => {
                log::debug!("Seeding from [{}] failed: {}", self.events().authority(), e);
                if self.completion.complete(Err(e.clone())) {
                    self.stop(e);
                }
            }
        }
    }

    fn handle_receive_address(&self, message: MessageResult<Address>) -> bool {
        let message = match message {
            Ok(message) => message,
            Err(Error::ChannelStopped) => return false,
            Err(e) => {
                self.timer.set_event(Err(e));
                return false;
            }
        };

        let before = self.hosts.count();
        self.hosts.store_many(&message.addresses);
        log::info!(
            "Seeded {} of {} addresses from [{}]",
            self.hosts.count().saturating_sub(before),
            message.addresses.len(),
            self.events().authority()
        );

        self.timer.set_event(Ok(()));
        false
    }
}

impl Protocol for ProtocolSeed {
    const NAME: &'static str = "seed";

    fn events(&self) -> &ProtocolEvents {
        self.timer.events()
    }

    fn start(self: &Arc<Self>, handler: CompletionHandler) {
        self.completion.set(handler);

        let this = self.clone();
        self.timer.start(Arc::new(move |code| this.handle_event(code)));

        let Some(channel) = self.channel() else {
            return;
        };

        let this = self.clone();
        channel.subscribe::<Address, _>(move |message| this.handle_receive_address(message));

        if let Some(own) = self.self_address {
            channel.send(
                &Address {
                    addresses: vec![own],
                },
                |_| {},
            );
        }

        let this = self.clone();
        channel.send(&GetAddress, move |result| {
            if let Err(e) = result {
                this.timer.set_event(Err(e));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Frame, ServiceFlags};
    use crate::network::testing;
    use futures::{SinkExt, StreamExt};
    use std::path::PathBuf;
    use tokio::sync::oneshot;

    fn start(protocol: &Arc<ProtocolSeed>) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        protocol.start(Box::new(move |code| {
            let _ = tx.send(code);
        }));
        rx
    }

    #[tokio::test]
    async fn test_seed_stores_reply() {
        let settings = testing::settings();
        let (channel, mut peer) = testing::channel_pair(&settings);
        let hosts = Arc::new(Hosts::new(100, PathBuf::from("unused")));
        let protocol = ProtocolSeed::new(&channel, hosts.clone(), &settings);
        let completion = start(&protocol);
        channel.start().unwrap();

        let frame = peer.next().await.unwrap().unwrap();
        assert_eq!(frame.command(), "getaddr");

        let addresses = (1..=3)
            .map(|i| {
                let authority = format!("10.0.0.{}:8333", i).parse().unwrap();
                NetworkAddress::new(&authority, ServiceFlags::NETWORK, 0)
            })
            .collect();
        peer.send(Frame::from_message(
            settings.identifier,
            &Address { addresses },
            0,
        ))
        .await
        .unwrap();

        assert_eq!(completion.await.unwrap(), Ok(()));
        assert_eq!(hosts.count(), 3);
        assert!(!channel.stopped());
    }

    #[tokio::test]
    async fn test_empty_reply_is_success() {
        let settings = testing::settings();
        let (channel, mut peer) = testing::channel_pair(&settings);
        let hosts = Arc::new(Hosts::new(100, PathBuf::from("unused")));
        let protocol = ProtocolSeed::new(&channel, hosts.clone(), &settings);
        let completion = start(&protocol);
        channel.start().unwrap();

        let _ = peer.next().await;
        peer.send(Frame::from_message(
            settings.identifier,
            &Address { addresses: vec![] },
            0,
        ))
        .await
        .unwrap();

        assert_eq!(completion.await.unwrap(), Ok(()));
        assert!(hosts.is_empty());
    }

    #[tokio::test]
    async fn test_germination_timeout() {
        let mut settings = testing::settings();
        settings.channel_germination_seconds = 1;
        let (channel, _peer) = testing::channel_pair(&settings);
        let hosts = Arc::new(Hosts::new(100, PathBuf::from("unused")));
        let protocol = ProtocolSeed::new(&channel, hosts, &settings);
        let completion = start(&protocol);
        channel.start().unwrap();

        assert_eq!(completion.await.unwrap(), Err(Error::ChannelTimeout));
        assert!(channel.stopped());
    }
}
