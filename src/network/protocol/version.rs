//! Version handshake
//!
//! Sends our version, validates the peer's, acknowledges it, and completes
//! once both the peer's version has been accepted and its verack received.
//! Validation happens before our verack is sent, so a rejected peer never
//! sees one. A single-shot timer bounds the whole exchange.

use super::{Completion, CompletionHandler, Protocol, ProtocolEvents, ProtocolTimer};
use crate::error::{Error, Result};
use crate::message::{NetworkAddress, ServiceFlags, VerAck, Version};
use crate::network::channel::Channel;
use crate::network::message_subscriber::MessageResult;
use crate::network::pending::Pending;
use crate::settings::Settings;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    NotStarted,
    VersionSent,
    VersionReceived,
    VerackExchanged,
    Failed,
}

struct Handshake {
    state: HandshakeState,
    peer_verack: bool,
}

pub struct ProtocolVersion {
    timer: ProtocolTimer,
    own: Version,
    minimum: u32,
    invalid_services: ServiceFlags,
    pending: Arc<Pending<Channel>>,
    handshake: Mutex<Handshake>,
    completion: Completion,
}

impl ProtocolVersion {
    /// `pending` holds every channel still handshaking, used to recognize a
    /// peer echoing one of our own nonces.
    pub fn new(
        channel: &Arc<Channel>,
        settings: &Settings,
        height: u32,
        pending: Arc<Pending<Channel>>,
    ) -> Arc<Self> {
        let address_receiver = NetworkAddress::new(&channel.authority(), ServiceFlags::empty(), 0);
        let address_sender = settings
            .self_address
            .map(|authority| NetworkAddress::new(&authority, settings.services, 0))
            .unwrap_or_default();

        let own = Version {
            value: settings.protocol_maximum,
            services: settings.services,
            timestamp: chrono::Utc::now().timestamp(),
            address_receiver,
            address_sender,
            nonce: channel.nonce(),
            user_agent: settings.user_agent.clone(),
            start_height: height,
            relay: settings.relay_transactions,
        };

        Arc::new(Self {
            timer: ProtocolTimer::new(channel, Self::NAME, settings.channel_handshake(), false),
            own,
            minimum: settings.protocol_minimum,
            invalid_services: settings.invalid_services,
            pending,
            handshake: Mutex::new(Handshake {
                state: HandshakeState::NotStarted,
                peer_verack: false,
            }),
            completion: Completion::default(),
        })
    }

    pub fn state(&self) -> HandshakeState {
        self.handshake().state
    }

    fn handshake(&self) -> MutexGuard<'_, Handshake> {
        self.handshake.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_event(&self, code: Result<()>) {
        match code {
            Ok(()) => {
                log::debug!("Handshake complete [{}]", self.events().authority());
                self.completion.complete(Ok(()));
            }
            Err(Error::ChannelStopped) => {
                self.completion.complete(Err(Error::ChannelStopped));
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&self, code: Error) {
        if !self.completion.pending() {
            return;
        }

        self.handshake().state = HandshakeState::Failed;
        log::debug!("Handshake failed [{}]: {}", self.events().authority(), code);
        self.completion.complete(Err(code.clone()));
        self.stop(code);
    }

    fn validate(&self, version: &Version) -> Result<()> {
        if version.value < self.minimum {
            return Err(Error::PeerVersionTooLow(version.value, self.minimum));
        }

        let invalid = version.services & self.invalid_services;
        if !invalid.is_empty() {
            return Err(Error::InvalidServices(version.services.bits()));
        }

        if self.pending.exists(&version.nonce) {
            return Err(Error::SelfConnection);
        }

        Ok(())
    }

    fn handle_receive_version(self: &Arc<Self>, message: MessageResult<Version>) -> bool {
        let version = match message {
            Ok(version) => version,
            Err(Error::ChannelStopped) => return false,
            Err(e) => {
                self.fail(e);
                return false;
            }
        };

        let Some(channel) = self.channel() else {
            return false;
        };

        log::debug!(
            "Peer [{}] version ({}) services ({:#x}) agent ({})",
            channel.authority(),
            version.value,
            version.services.bits(),
            version.user_agent
        );

        if let Err(e) = self.validate(&version) {
            self.fail(e);
            return false;
        }

        channel.set_negotiated_version(self.own.value.min(version.value));
        channel.set_peer_version(version);
        self.handshake().state = HandshakeState::VersionReceived;

        let this = self.clone();
        channel.send(&VerAck, move |result| {
            if let Err(e) = result {
                this.fail(e);
            }
        });

        self.try_complete();
        false
    }

    fn handle_receive_verack(self: &Arc<Self>, message: MessageResult<VerAck>) -> bool {
        match message {
            Ok(_) => {}
            Err(Error::ChannelStopped) => return false,
            Err(e) => {
                self.fail(e);
                return false;
            }
        }

        self.handshake().peer_verack = true;
        self.try_complete();
        false
    }

    fn try_complete(&self) {
        {
            let mut handshake = self.handshake();
            if handshake.state != HandshakeState::VersionReceived || !handshake.peer_verack {
                return;
            }
            handshake.state = HandshakeState::VerackExchanged;
        }
        self.timer.set_event(Ok(()));
    }
}

impl Protocol for ProtocolVersion {
    const NAME: &'static str = "version";

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
        channel.subscribe::<Version, _>(move |message| this.handle_receive_version(message));
        let this = self.clone();
        channel.subscribe::<VerAck, _>(move |message| this.handle_receive_verack(message));

        self.handshake().state = HandshakeState::VersionSent;
        let this = self.clone();
        channel.send(&self.own, move |result| {
            if let Err(e) = result {
                this.fail(e);
            }
        });
    }
}
