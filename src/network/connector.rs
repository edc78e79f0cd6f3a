//! Outbound TCP connections
//!
//! Every attempt is registered as a pending socket until the TCP handshake
//! completes, fails, times out, or is canceled by shutdown.

use super::authority::{Authority, Endpoint};
use super::pending::{Pendable, Pending};
use super::socket::BoxedSocket;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

static NEXT_SOCKET: AtomicU64 = AtomicU64::new(1);

/// A connect attempt in flight.
pub struct PendingSocket {
    id: u64,
    remote: Authority,
    local: Mutex<Option<Authority>>,
    token: CancellationToken,
}

impl PendingSocket {
    fn new(remote: Authority) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SOCKET.fetch_add(1, Ordering::Relaxed),
            remote,
            local: Mutex::new(None),
            token: CancellationToken::new(),
        })
    }

    pub fn remote(&self) -> Authority {
        self.remote
    }

    /// Local end of the socket, once bound.
    pub fn local(&self) -> Option<Authority> {
        *self.local.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_local(&self, local: Authority) {
        *self.local.lock().unwrap_or_else(PoisonError::into_inner) = Some(local);
    }
}

impl Pendable for PendingSocket {
    type Key = u64;

    fn key(&self) -> u64 {
        self.id
    }

    fn cancel(&self, _code: Error) {
        self.token.cancel();
    }
}

// Unregisters the attempt however the connect future ends, including drop.
struct Registration<'a> {
    pending: &'a Pending<PendingSocket>,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let _ = self.pending.remove(&self.id);
    }
}

/// A connected socket with both ends identified.
pub struct Connection {
    pub socket: BoxedSocket,
    pub remote: Authority,
    pub local: Option<Authority>,
}

pub struct Connector {
    timeout: Duration,
    pending: Arc<Pending<PendingSocket>>,
    stop: CancellationToken,
}

impl Connector {
    pub fn new(
        timeout: Duration,
        pending: Arc<Pending<PendingSocket>>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            timeout,
            pending,
            stop,
        }
    }

    /// Resolve `endpoint` and connect to the first address that answers.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<Connection> {
        let mut last = Error::ConnectFailed(endpoint.to_string());
        for authority in endpoint.resolve().await? {
            match self.connect_to(authority).await {
                Ok(connection) => return Ok(connection),
                Err(Error::ServiceStopped) => return Err(Error::ServiceStopped),
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    pub async fn connect_to(&self, authority: Authority) -> Result<Connection> {
        if self.stop.is_cancelled() {
            return Err(Error::ServiceStopped);
        }

        let attempt = PendingSocket::new(authority);
        self.pending.insert(attempt.clone())?;
        let _registration = Registration {
            pending: &self.pending,
            id: attempt.id,
        };

        log::debug!("Connecting to [{}]", authority);
        let connect =
            tokio::time::timeout(self.timeout, TcpStream::connect(authority.socket_addr()));
        let result = tokio::select! {
            _ = self.stop.cancelled() => return Err(Error::ServiceStopped),
            _ = attempt.token.cancelled() => return Err(Error::ServiceStopped),
            result = connect => result,
        };

        let stream = match result {
            Err(_) => return Err(Error::ChannelTimeout),
            Ok(Err(e)) => return Err(Error::ConnectFailed(format!("{}: {}", authority, e))),
            Ok(Ok(stream)) => stream,
        };

        let local = stream.local_addr().ok().map(Authority::from);
        if let Some(local) = local {
            attempt.set_local(local);
        }
        let _ = stream.set_nodelay(true);

        Ok(Connection {
            socket: Box::new(stream),
            remote: authority,
            local,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn connector(timeout: Duration) -> (Connector, Arc<Pending<PendingSocket>>, CancellationToken) {
        let pending = Arc::new(Pending::new("sockets"));
        let stop = CancellationToken::new();
        (Connector::new(timeout, pending.clone(), stop.clone()), pending, stop)
    }

    #[tokio::test]
    async fn test_connect_unregisters_on_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = Authority::from(listener.local_addr().unwrap());
        let (connector, pending, _stop) = connector(Duration::from_secs(2));

        let connection = connector.connect_to(target).await.unwrap();
        assert_eq!(connection.remote, target);
        assert!(connection.local.is_some());
        assert_eq!(pending.count(), 0);
    }

    #[tokio::test]
    async fn test_refused_connect_fails() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let target: Authority = format!("127.0.0.1:{}", port).parse().unwrap();
        let (connector, pending, _stop) = connector(Duration::from_secs(2));

        let result = connector.connect_to(target).await;
        assert!(matches!(result, Err(Error::ConnectFailed(_))));
        assert_eq!(pending.count(), 0);
    }

    #[tokio::test]
    async fn test_stopped_connector_refuses() {
        let (connector, _pending, stop) = connector(Duration::from_secs(2));
        stop.cancel();
        let result = connector.connect_to("127.0.0.1:1".parse().unwrap()).await;
        assert!(matches!(result, Err(Error::ServiceStopped)));
    }
}
