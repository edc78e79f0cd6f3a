//! Per-message-type routing of decoded payloads to channel subscribers

use crate::concurrency::{ExecutionContext, Resubscriber};
use crate::error::{Error, Result};
use crate::message::{Address, GetAddress, Message, Ping, Pong, VerAck, Version};
use std::sync::Arc;

/// What a message handler receives: a decoded message, a decode failure for
/// that message type, or `ChannelStopped` once the channel stops.
pub type MessageResult<M> = Result<Arc<M>>;

type Route<M> = Resubscriber<MessageResult<M>>;

/// A message type with its own subscriber list.
pub trait Routed: Message {
    fn route(messages: &MessageSubscriber) -> &Route<Self>;
}

pub struct MessageSubscriber {
    version: Route<Version>,
    verack: Route<VerAck>,
    ping: Route<Ping>,
    pong: Route<Pong>,
    get_address: Route<GetAddress>,
    address: Route<Address>,
}

impl MessageSubscriber {
    pub fn new(context: &ExecutionContext) -> Self {
        Self {
            version: Resubscriber::new(context.clone(), Version::COMMAND),
            verack: Resubscriber::new(context.clone(), VerAck::COMMAND),
            ping: Resubscriber::new(context.clone(), Ping::COMMAND),
            pong: Resubscriber::new(context.clone(), Pong::COMMAND),
            get_address: Resubscriber::new(context.clone(), GetAddress::COMMAND),
            address: Resubscriber::new(context.clone(), Address::COMMAND),
        }
    }

    pub fn subscribe<M, H>(&self, handler: H)
    where
        M: Routed,
        H: FnMut(MessageResult<M>) -> bool + Send + 'static,
    {
        M::route(self).subscribe(handler);
    }

    /// Decode `payload` by command and deliver it on the calling thread.
    /// A decode failure is delivered to that type's subscribers and returned.
    pub fn load(&self, command: &str, payload: &[u8], version: u32) -> Result<()> {
        if command == Version::COMMAND {
            self.deliver::<Version>(payload, version)
        } else if command == VerAck::COMMAND {
            self.deliver::<VerAck>(payload, version)
        } else if command == Ping::COMMAND {
            self.deliver::<Ping>(payload, version)
        } else if command == Pong::COMMAND {
            self.deliver::<Pong>(payload, version)
        } else if command == GetAddress::COMMAND {
            self.deliver::<GetAddress>(payload, version)
        } else if command == Address::COMMAND {
            self.deliver::<Address>(payload, version)
        } else {
            Err(Error::UnknownMessage(command.to_string()))
        }
    }

    /// Stop every route, delivering `code` to all current and future handlers.
    pub fn stop(&self, code: Error) {
        self.version.stop(Err(code.clone()));
        self.verack.stop(Err(code.clone()));
        self.ping.stop(Err(code.clone()));
        self.pong.stop(Err(code.clone()));
        self.get_address.stop(Err(code.clone()));
        self.address.stop(Err(code));
    }

    fn deliver<M: Routed>(&self, payload: &[u8], version: u32) -> Result<()> {
        match M::decode(payload, version) {
            Ok(message) => {
                M::route(self).invoke(Ok(Arc::new(message)));
                Ok(())
            }
            Err(e) => {
                M::route(self).invoke(Err(e.clone()));
                Err(e)
            }
        }
    }
}

macro_rules! routed {
    ($message:ty, $field:ident) => {
        impl Routed for $message {
            fn route(messages: &MessageSubscriber) -> &Route<Self> {
                &messages.$field
            }
        }
    };
}

routed!(Version, version);
routed!(VerAck, verack);
routed!(Ping, ping);
routed!(Pong, pong);
routed!(GetAddress, get_address);
routed!(Address, address);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_routes_by_command() {
        let messages = MessageSubscriber::new(&ExecutionContext::current());
        let pings = Arc::new(Mutex::new(Vec::new()));

        let seen = pings.clone();
        messages.subscribe::<Ping, _>(move |result| {
            seen.lock().unwrap().push(result.map(|ping| ping.nonce));
            true
        });

        messages.load("ping", &7u64.to_le_bytes(), 0).unwrap();
        messages.load("pong", &8u64.to_le_bytes(), 0).unwrap();
        assert_eq!(
            messages.load("ping", &[1, 2], 0),
            Err(Error::BadMessage("ping".into()))
        );
        messages.load("ping", &9u64.to_le_bytes(), 0).unwrap();

        assert_eq!(
            *pings.lock().unwrap(),
            vec![Ok(7), Err(Error::BadMessage("ping".into())), Ok(9)]
        );
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let messages = MessageSubscriber::new(&ExecutionContext::current());
        assert_eq!(
            messages.load("inv", &[], 0),
            Err(Error::UnknownMessage("inv".into()))
        );
    }

    #[tokio::test]
    async fn test_stop_reaches_late_subscribers() {
        let messages = MessageSubscriber::new(&ExecutionContext::current());
        messages.stop(Error::ChannelStopped);

        let (tx, rx) = std::sync::mpsc::channel();
        messages.subscribe::<Version, _>(move |result| {
            tx.send(result.err()).unwrap();
            false
        });
        assert_eq!(rx.recv().unwrap(), Some(Error::ChannelStopped));
    }
}
