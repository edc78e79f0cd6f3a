//! Operator-requested connections
//!
//! A manual connection is kept up for the life of the node: whenever the
//! channel stops it is re-established. Consecutive failures are retried with
//! back-off until `manual_attempt_limit` is reached (zero retries forever).

use super::{back_off, Session, RETRY_MINIMUM};
use crate::error::{Error, Result};
use crate::network::authority::Endpoint;
use crate::network::channel::Channel;
use crate::network::p2p::Network;
use std::sync::Arc;
use tokio::sync::oneshot;

type FirstResult = oneshot::Sender<Result<Arc<Channel>>>;

pub struct SessionManual {
    session: Session,
}

impl SessionManual {
    pub fn new(network: Arc<Network>) -> Self {
        Self {
            session: Session::new(network, "manual", true),
        }
    }

    /// Maintain a connection to `endpoint` in the background.
    pub fn start_connect(&self, endpoint: Endpoint) {
        self.session
            .network()
            .context()
            .spawn(maintain(self.session.clone(), endpoint, None));
    }

    /// Maintain a connection to `endpoint` and return the outcome of the
    /// first attempt. Maintenance continues regardless.
    pub async fn connect(&self, endpoint: Endpoint) -> Result<Arc<Channel>> {
        let (tx, rx) = oneshot::channel();
        self.session
            .network()
            .context()
            .spawn(maintain(self.session.clone(), endpoint, Some(tx)));
        rx.await.unwrap_or(Err(Error::ServiceStopped))
    }
}

fn report(first: &mut Option<FirstResult>, result: Result<Arc<Channel>>) {
    if let Some(sender) = first.take() {
        let _ = sender.send(result);
    }
}

async fn maintain(session: Session, endpoint: Endpoint, mut first: Option<FirstResult>) {
    let limit = session.network().settings().manual_attempt_limit;
    let mut failures = 0usize;
    let mut delay = RETRY_MINIMUM;

    loop {
        if session.stopped() {
            report(&mut first, Err(Error::ServiceStopped));
            break;
        }

        match session.connect_endpoint(&endpoint).await {
            Ok(channel) => {
                failures = 0;
                delay = RETRY_MINIMUM;
                report(&mut first, Ok(channel.clone()));

                let code = session.wait_stop(&channel).await;
                if code == Error::ServiceStopped || session.stopped() {
                    break;
                }
                log::info!("Manual channel [{}] stopped ({}), reconnecting", endpoint, code);
            }
            Err(Error::ServiceStopped) => {
                report(&mut first, Err(Error::ServiceStopped));
                break;
            }
            Err(e) => {
                failures += 1;
                log::warn!("Manual connection to [{}] failed: {}", endpoint, e);
                report(&mut first, Err(e));
                if limit != 0 && failures >= limit {
                    log::warn!("Giving up on [{}] after {} attempts", endpoint, failures);
                    break;
                }
                if !session.pause(delay).await {
                    break;
                }
                delay = back_off(delay);
            }
        }
    }
}
