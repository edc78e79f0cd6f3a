//! Inbound TCP listener

use super::authority::Authority;
use super::socket::BoxedSocket;
use crate::error::{Error, Result};
use tokio::net::TcpListener;

pub struct Acceptor {
    listener: TcpListener,
    local: Authority,
}

impl Acceptor {
    /// Bind to `port` on all interfaces.
    pub async fn listen(port: u16) -> Result<Self> {
        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::ListenFailed(format!("{}: {}", addr, e)))?;
        let local = listener
            .local_addr()
            .map_err(|e| Error::ListenFailed(e.to_string()))?
            .into();

        log::info!("Listening for peers on {}", addr);
        Ok(Self { listener, local })
    }

    pub fn local(&self) -> Authority {
        self.local
    }

    /// Wait for the next incoming connection.
    pub async fn accept(&self) -> Result<(BoxedSocket, Authority)> {
        let (stream, remote) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::AcceptFailed(e.to_string()))?;
        let _ = stream.set_nodelay(true);
        Ok((Box::new(stream), remote.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_accept_reports_remote() {
        let acceptor = Acceptor::listen(0).await.unwrap();
        let port = acceptor.local().port();
        assert_ne!(port, 0);

        let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (_socket, remote) = acceptor.accept().await.unwrap();
        assert_eq!(remote, Authority::from(client.local_addr().unwrap()));
    }

    #[tokio::test]
    async fn test_port_in_use() {
        let first = Acceptor::listen(0).await.unwrap();
        let second = Acceptor::listen(first.local().port()).await;
        assert!(matches!(second, Err(Error::ListenFailed(_))));
    }
}
