//! Async driver: runs a [`Link`] on its own task
//!
//! Transport callbacks and caller requests are serialized through one
//! `select!` loop, so the state machine never sees two of them at once.

use starcom_proto::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::digest::DigestEngine;
use crate::link::{ConnectionState, Link};
use crate::transport::{GattService, Transport, TransportEvent};
use crate::LinkError;

enum Request {
    Connect { address: String, reply: oneshot::Sender<Result<(), LinkError>> },
    Disconnect { reply: oneshot::Sender<()> },
    Close { reply: oneshot::Sender<()> },
    SendCommand { command: Command, reply: oneshot::Sender<Result<(), LinkError>> },
    SupportedServices { reply: oneshot::Sender<Option<Vec<GattService>>> },
    State { reply: oneshot::Sender<ConnectionState> },
}

/// Handle for issuing requests to a running link
#[derive(Clone)]
pub struct LinkClient {
    requests: mpsc::Sender<Request>,
}

impl LinkClient {
    /// `Ok` means the request was accepted, not that the link is up
    pub async fn connect(&self, address: &str) -> Result<(), LinkError> {
        let address = address.to_string();
        self.call(|reply| Request::Connect { address, reply }).await?
    }

    pub async fn disconnect(&self) -> Result<(), LinkError> {
        self.call(|reply| Request::Disconnect { reply }).await
    }

    pub async fn close(&self) -> Result<(), LinkError> {
        self.call(|reply| Request::Close { reply }).await
    }

    pub async fn send_command(&self, command: Command) -> Result<(), LinkError> {
        self.call(|reply| Request::SendCommand { command, reply }).await?
    }

    pub async fn supported_services(&self) -> Result<Option<Vec<GattService>>, LinkError> {
        self.call(|reply| Request::SupportedServices { reply }).await
    }

    pub async fn state(&self) -> Result<ConnectionState, LinkError> {
        self.call(|reply| Request::State { reply }).await
    }

    async fn call<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Request) -> Result<R, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(make(tx))
            .await
            .map_err(|_| LinkError::TransportUnavailable)?;
        rx.await.map_err(|_| LinkError::TransportUnavailable)
    }
}

pub struct LinkService;

impl LinkService {
    /// Spawn the driver loop. It runs until every [`LinkClient`] is dropped,
    /// then closes the link.
    pub fn spawn<T, D>(
        link: Link<T, D>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (LinkClient, JoinHandle<()>)
    where
        T: Transport + Send + 'static,
        D: DigestEngine + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(32);
        let handle = tokio::spawn(run(link, transport_events, rx));
        (LinkClient { requests: tx }, handle)
    }
}

async fn run<T: Transport, D: DigestEngine>(
    mut link: Link<T, D>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    mut requests: mpsc::Receiver<Request>,
) {
    loop {
        tokio::select! {
            Some(event) = transport_events.recv() => {
                link.handle_event(event);
            }

            request = requests.recv() => {
                match request {
                    Some(request) => handle_request(&mut link, request),
                    None => break,
                }
            }
        }
    }

    log::debug!("all clients gone, closing link");
    link.close();
}

fn handle_request<T: Transport, D: DigestEngine>(link: &mut Link<T, D>, request: Request) {
    // A dropped reply receiver just means the caller stopped waiting.
    match request {
        Request::Connect { address, reply } => {
            let _ = reply.send(link.connect(&address));
        }
        Request::Disconnect { reply } => {
            link.disconnect();
            let _ = reply.send(());
        }
        Request::Close { reply } => {
            link.close();
            let _ = reply.send(());
        }
        Request::SendCommand { command, reply } => {
            let _ = reply.send(link.send_command(command));
        }
        Request::SupportedServices { reply } => {
            let _ = reply.send(link.supported_services());
        }
        Request::State { reply } => {
            let _ = reply.send(link.state());
        }
    }
}
