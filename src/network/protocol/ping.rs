//! Keep-alive
//!
//! Sends a ping with a fresh nonce on every heartbeat and answers the peer's
//! pings. A heartbeat that finds the previous ping unanswered times the
//! channel out. Only a pong that does not carry the last sent nonce is a
//! protocol failure; repeats of the matching pong are ignored.

use super::{Completion, CompletionHandler, Protocol, ProtocolEvents, ProtocolTimer};
use crate::error::{Error, Result};
use crate::message::{Ping, Pong};
use crate::network::channel::Channel;
use crate::network::message_subscriber::MessageResult;
use rand::Rng;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct Heartbeat {
    last_sent: Option<u64>,
    answered: bool,
}

pub struct ProtocolPing {
    timer: ProtocolTimer,
    heartbeat: Mutex<Heartbeat>,
    completion: Completion,
}

impl ProtocolPing {
    pub fn new(channel: &Arc<Channel>, heartbeat: Duration) -> Arc<Self> {
        Arc::new(Self {
            timer: ProtocolTimer::new(channel, Self::NAME, heartbeat, true),
            heartbeat: Mutex::new(Heartbeat::default()),
            completion: Completion::default(),
        })
    }

    fn handle_event(self: &Arc<Self>, code: Result<()>) {
        match code {
            Ok(()) => {}
            Err(Error::ChannelTimeout) => {
                if self.outstanding() {
                    log::debug!("Ping timed out [{}]", self.events().authority());
                    self.finish(Error::ChannelTimeout);
                } else {
                    self.send_ping();
                }
            }
            Err(Error::ChannelStopped) => {
                self.completion.complete(Err(Error::ChannelStopped));
            }
            Err(e) => self.finish(e),
        }
    }

    fn finish(&self, code: Error) {
        self.completion.complete(Err(code.clone()));
        self.stop(code);
    }

    fn heartbeat(&self) -> std::sync::MutexGuard<'_, Heartbeat> {
        self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outstanding(&self) -> bool {
        let heartbeat = self.heartbeat();
        heartbeat.last_sent.is_some() && !heartbeat.answered
    }

    fn send_ping(self: &Arc<Self>) {
        let Some(channel) = self.channel() else {
            return;
        };

        let nonce = rand::thread_rng().gen_range(1..=u64::MAX);
        *self.heartbeat() = Heartbeat {
            last_sent: Some(nonce),
            answered: false,
        };

        let this = self.clone();
        channel.send(&Ping { nonce }, move |result| {
            if let Err(e) = result {
                this.finish(e);
            }
        });
    }

    fn handle_receive_ping(self: &Arc<Self>, message: MessageResult<Ping>) -> bool {
        let ping = match message {
            Ok(ping) => ping,
            Err(Error::ChannelStopped) => return false,
            Err(e) => {
                log::debug!("Ignoring ping from [{}]: {}", self.events().authority(), e);
                return true;
            }
        };

        if let Some(channel) = self.channel() {
            let this = self.clone();
            channel.send(&Pong { nonce: ping.nonce }, move |result| {
                if let Err(e) = result {
                    this.finish(e);
                }
            });
        }
        true
    }

    fn handle_receive_pong(&self, message: MessageResult<Pong>) -> bool {
        let pong = match message {
            Ok(pong) => pong,
            Err(Error::ChannelStopped) => return false,
            Err(e) => {
                log::debug!("Ignoring pong from [{}]: {}", self.events().authority(), e);
                return true;
            }
        };

        let mut heartbeat = self.heartbeat();
        if heartbeat.last_sent != Some(pong.nonce) {
            let expected = heartbeat.last_sent;
            drop(heartbeat);
            log::warn!(
                "Invalid pong nonce from [{}]: expected {:?}, got {}",
                self.events().authority(),
                expected,
                pong.nonce
            );
            self.finish(Error::PongMismatch);
            return false;
        }

        if heartbeat.answered {
            log::trace!("Duplicate pong from [{}]", self.events().authority());
        }
        heartbeat.answered = true;
        true
    }
}

impl Protocol for ProtocolPing {
    const NAME: &'static str = "ping";

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
        channel.subscribe::<Ping, _>(move |message| this.handle_receive_ping(message));
        let this = self.clone();
        channel.subscribe::<Pong, _>(move |message| this.handle_receive_pong(message));

        self.send_ping();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Frame, Message};
    use crate::network::testing;
    use futures::{SinkExt, StreamExt};
    use tokio::sync::oneshot;

    fn start(protocol: &Arc<ProtocolPing>) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        protocol.start(Box::new(move |code| {
            let _ = tx.send(code);
        }));
        rx
    }

    #[tokio::test]
    async fn test_answers_peer_ping() {
        let settings = testing::settings();
        let (channel, mut peer) = testing::channel_pair(&settings);
        let protocol = ProtocolPing::new(&channel, Duration::from_secs(60));
        let _completion = start(&protocol);
        channel.start().unwrap();

        // Our own opening ping.
        let frame = peer.next().await.unwrap().unwrap();
        assert_eq!(frame.command(), "ping");

        peer.send(Frame::from_message(settings.identifier, &Ping { nonce: 42 }, 0))
            .await
            .unwrap();
        let frame = peer.next().await.unwrap().unwrap();
        assert_eq!(frame.command(), "pong");
        assert_eq!(Pong::decode(&frame.payload, 0).unwrap().nonce, 42);
    }

    #[tokio::test]
    async fn test_pong_mismatch_fails() {
        let settings = testing::settings();
        let (channel, mut peer) = testing::channel_pair(&settings);
        let protocol = ProtocolPing::new(&channel, Duration::from_secs(60));
        let completion = start(&protocol);
        channel.start().unwrap();

        let frame = peer.next().await.unwrap().unwrap();
        let ping = Ping::decode(&frame.payload, 0).unwrap();
        peer.send(Frame::from_message(
            settings.identifier,
            &Pong {
                nonce: ping.nonce.wrapping_add(1),
            },
            0,
        ))
        .await
        .unwrap();

        assert_eq!(completion.await.unwrap(), Err(Error::PongMismatch));
        assert!(channel.stopped());
    }

    #[tokio::test]
    async fn test_matching_pongs_keep_channel_alive() {
        let settings = testing::settings();
        let (channel, mut peer) = testing::channel_pair(&settings);
        let protocol = ProtocolPing::new(&channel, Duration::from_millis(50));
        let _completion = start(&protocol);
        channel.start().unwrap();

        for _ in 0..3 {
            let frame = peer.next().await.unwrap().unwrap();
            let ping = Ping::decode(&frame.payload, 0).unwrap();
            peer.send(Frame::from_message(
                settings.identifier,
                &Pong { nonce: ping.nonce },
                0,
            ))
            .await
            .unwrap();
        }
        assert!(!channel.stopped());
    }

    #[tokio::test]
    async fn test_repeated_matching_pong_is_ignored() {
        let settings = testing::settings();
        let (channel, mut peer) = testing::channel_pair(&settings);
        let protocol = ProtocolPing::new(&channel, Duration::from_secs(60));
        let mut completion = start(&protocol);
        channel.start().unwrap();

        let frame = peer.next().await.unwrap().unwrap();
        let ping = Ping::decode(&frame.payload, 0).unwrap();
        for _ in 0..2 {
            peer.send(Frame::from_message(
                settings.identifier,
                &Pong { nonce: ping.nonce },
                0,
            ))
            .await
            .unwrap();
        }

        // Prove both pongs were read by round-tripping a peer ping.
        peer.send(Frame::from_message(settings.identifier, &Ping { nonce: 7 }, 0))
            .await
            .unwrap();
        let frame = peer.next().await.unwrap().unwrap();
        assert_eq!(frame.command(), "pong");

        assert!(completion.try_recv().is_err());
        assert!(!protocol.outstanding());
        assert!(!channel.stopped());
    }

    #[tokio::test]
    async fn test_unanswered_ping_times_out() {
        let settings = testing::settings();
        let (channel, _peer) = testing::channel_pair(&settings);
        let protocol = ProtocolPing::new(&channel, Duration::from_millis(50));
        let completion = start(&protocol);
        channel.start().unwrap();

        assert_eq!(completion.await.unwrap(), Err(Error::ChannelTimeout));
        assert!(channel.stopped());
    }
}
