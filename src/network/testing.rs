//! Shared fixtures for network tests

use super::authority::Authority;
use super::channel::Channel;
use crate::concurrency::ExecutionContext;
use crate::message::{
    level, Address, Frame, FrameCodec, NetworkAddress, Pong, Ping, ServiceFlags, VerAck, Version,
    Message,
};
use crate::settings::Settings;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

/// Authority assigned to every in-memory inbound channel.
pub const PEER: &str = "127.0.0.1:18444";

/// Small, quiet settings: no listener, no outbound slots, no seeds.
pub fn settings() -> Settings {
    let file = std::env::temp_dir().join(format!(
        "mini-network-hosts-{}",
        rand::thread_rng().gen::<u64>()
    ));
    Settings {
        threads: 2,
        inbound_port: 0,
        inbound_connections: 0,
        outbound_connections: 0,
        connect_batch_size: 2,
        connect_timeout_seconds: 1,
        channel_handshake_seconds: 5,
        channel_germination_seconds: 5,
        host_pool_capacity: 100,
        hosts_file: file,
        seeds: Vec::new(),
        ..Settings::mainnet()
    }
}

/// An unstarted inbound channel and the framed far end of its transport.
pub fn channel_pair(settings: &Settings) -> (Arc<Channel>, Framed<DuplexStream, FrameCodec>) {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let authority: Authority = PEER.parse().unwrap();
    let channel = Channel::inbound(
        Box::new(near),
        authority,
        settings,
        ExecutionContext::current(),
    );
    let peer = Framed::new(far, FrameCodec::new(settings.identifier, settings.maximum_payload));
    (channel, peer)
}

/// A port nothing is listening on.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Addresses `10.0.0.1` through `10.0.0.count` on port 8333.
pub fn addresses(count: u8) -> Vec<NetworkAddress> {
    (1..=count)
        .map(|i| {
            let authority = format!("10.0.0.{}:8333", i).parse().unwrap();
            NetworkAddress::new(&authority, ServiceFlags::NETWORK, 0)
        })
        .collect()
}

/// A scripted TCP peer: completes the handshake, answers get-address with
/// `addresses` and echoes pings. Returns the authority it listens on.
pub async fn fake_peer(magic: u32, addresses: Vec<NetworkAddress>) -> Authority {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let authority = Authority::from(listener.local_addr().unwrap());

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let addresses = addresses.clone();
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, FrameCodec::new(magic, 1024 * 1024));
                while let Some(Ok(frame)) = framed.next().await {
                    let replies = match frame.command() {
                        "version" => {
                            let version = Version {
                                value: level::MAXIMUM,
                                services: ServiceFlags::NETWORK,
                                timestamp: chrono::Utc::now().timestamp(),
                                nonce: rand::thread_rng().gen_range(1..=u64::MAX),
                                user_agent: "/fake:0.1/".into(),
                                ..Version::default()
                            };
                            vec![
                                Frame::from_message(magic, &version, level::MAXIMUM),
                                Frame::from_message(magic, &VerAck, level::MAXIMUM),
                            ]
                        }
                        "getaddr" => {
                            let message = Address {
                                addresses: addresses.clone(),
                            };
                            vec![Frame::from_message(magic, &message, level::MAXIMUM)]
                        }
                        "ping" => match Ping::decode(&frame.payload, level::MAXIMUM) {
                            Ok(ping) => vec![Frame::from_message(
                                magic,
                                &Pong { nonce: ping.nonce },
                                level::MAXIMUM,
                            )],
                            Err(_) => vec![],
                        },
                        _ => vec![],
                    };
                    for reply in replies {
                        if framed.send(reply).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });

    authority
}
