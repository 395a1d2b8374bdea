// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, trace, warn};

use crate::network::{CloseReason, Connection, ConnectionHandler};
use crate::service::{Shutdown, ShutdownTrigger};
use crate::AppError::IllegalStateError;
use crate::AppResult;

const INITIAL_ACCEPT_BACKOFF: Duration = Duration::from_millis(10);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Where an [`Acceptor`] listens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenEndpoint {
    /// any interface, port picked by the OS
    #[default]
    Any,
    /// any interface, given port
    Port(u16),
    Addr(SocketAddr),
}

impl ListenEndpoint {
    pub fn socket_addr(&self) -> SocketAddr {
        let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        match *self {
            ListenEndpoint::Any => SocketAddr::new(any, 0),
            ListenEndpoint::Port(port) => SocketAddr::new(any, port),
            ListenEndpoint::Addr(addr) => addr,
        }
    }
}

impl From<u16> for ListenEndpoint {
    fn from(port: u16) -> Self {
        ListenEndpoint::Port(port)
    }
}

impl From<SocketAddr> for ListenEndpoint {
    fn from(addr: SocketAddr) -> Self {
        ListenEndpoint::Addr(addr)
    }
}

impl From<(IpAddr, u16)> for ListenEndpoint {
    fn from((ip, port): (IpAddr, u16)) -> Self {
        ListenEndpoint::Addr(SocketAddr::new(ip, port))
    }
}

#[derive(Debug)]
pub enum AcceptorEvent {
    /// accepted, registered and receiving
    Accepted(Connection),
    /// refused by the connection checker and closed
    Rejected(SocketAddr),
    /// an accept or connection setup failed; the loop keeps accepting
    AcceptFailed(String),
}

type ConnectionChecker = Arc<dyn Fn(&Connection) -> bool + Send + Sync>;

/// Listens on a TCP endpoint and runs one session per accepted peer.
///
/// `factory` builds the [`ConnectionHandler`] of each accepted connection.
/// Live connections are kept in a registry until their close listener fires,
/// whatever the close reason.
pub struct Acceptor<F> {
    factory: Arc<F>,
    checker: Option<ConnectionChecker>,
    max_connections: Option<usize>,
    connections: Arc<DashMap<u64, Connection>>,
    events: Option<mpsc::UnboundedSender<AcceptorEvent>>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<ShutdownTrigger>,
    accept_task: Option<JoinHandle<()>>,
}

impl<F, H> Acceptor<F>
where
    F: Fn(&Connection) -> H + Send + Sync + 'static,
    H: ConnectionHandler,
{
    pub fn new(factory: F) -> Self {
        Acceptor {
            factory: Arc::new(factory),
            checker: None,
            max_connections: None,
            connections: Arc::new(DashMap::new()),
            events: None,
            local_addr: None,
            shutdown: None,
            accept_task: None,
        }
    }

    /// Run `checker` on every accepted connection before it starts receiving;
    /// returning `false` closes it as [`CloseReason::Rejected`].
    pub fn with_connection_checker<C>(mut self, checker: C) -> Self
    where
        C: Fn(&Connection) -> bool + Send + Sync + 'static,
    {
        self.checker = Some(Arc::new(checker));
        self
    }

    /// Stop accepting while `max_connections` connections are live.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    /// Stream of accept events. Subscribe before [`Acceptor::listen`]; a later
    /// subscription only sees the events of the next `listen`. Without a
    /// subscriber events are not recorded.
    pub fn subscribe_events(&mut self) -> mpsc::UnboundedReceiver<AcceptorEvent> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.events = Some(events_tx);
        events_rx
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_listening(&self) -> bool {
        self.accept_task.is_some()
    }

    pub async fn listen(&mut self, endpoint: impl Into<ListenEndpoint>) -> AppResult<SocketAddr> {
        if self.is_listening() {
            return Err(IllegalStateError(format!(
                "acceptor is already listening on {:?}",
                self.local_addr
            )));
        }
        let listener = TcpListener::bind(endpoint.into().socket_addr()).await?;
        let local_addr = listener.local_addr()?;

        let trigger = ShutdownTrigger::new();
        let shutdown = trigger.subscribe();
        let context = AcceptContext {
            factory: self.factory.clone(),
            checker: self.checker.clone(),
            connections: self.connections.clone(),
            events: self.events.clone(),
            limit_connections: self.max_connections.map(|n| Arc::new(Semaphore::new(n))),
        };
        self.accept_task = Some(tokio::spawn(accept_loop(listener, context, shutdown)));
        self.shutdown = Some(trigger);
        self.local_addr = Some(local_addr);
        info!("listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Stop listening. Live connections stay open; see [`Acceptor::close_all`].
    pub async fn stop(&mut self) {
        if let Some(trigger) = self.shutdown.take() {
            trigger.trigger();
        }
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                error!("accept loop ended abnormally: {}", e);
            }
            info!("stopped listening on {:?}", self.local_addr);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection(&self, id: u64) -> Option<Connection> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub async fn close_all(&self) {
        // snapshot first: close listeners remove entries from the registry
        for connection in self.connections() {
            connection.close().await;
        }
    }
}

impl<F> Drop for Acceptor<F> {
    fn drop(&mut self) {
        if let Some(trigger) = self.shutdown.take() {
            trigger.trigger();
        }
        debug!("acceptor dropped");
    }
}

struct AcceptContext<F> {
    factory: Arc<F>,
    checker: Option<ConnectionChecker>,
    connections: Arc<DashMap<u64, Connection>>,
    events: Option<mpsc::UnboundedSender<AcceptorEvent>>,
    limit_connections: Option<Arc<Semaphore>>,
}

impl<F, H> AcceptContext<F>
where
    F: Fn(&Connection) -> H + Send + Sync + 'static,
    H: ConnectionHandler,
{
    async fn on_accepted(
        &self,
        socket: TcpStream,
        permit: Option<OwnedSemaphorePermit>,
    ) -> AppResult<()> {
        let connection = Connection::new(socket)?;

        if let Some(checker) = &self.checker {
            if !checker(&connection) {
                info!(
                    "connection {} from {} rejected",
                    connection.id(),
                    connection.remote_addr()
                );
                connection.close_with(CloseReason::Rejected).await;
                self.report(AcceptorEvent::Rejected(connection.remote_addr()));
                return Ok(());
            }
        }

        self.connections.insert(connection.id(), connection.clone());
        let connections = self.connections.clone();
        connection.on_closed(move |connection, reason| {
            connections.remove(&connection.id());
            // whether gracefully or unexpectedly closed, release the slot
            drop(permit);
            trace!("connection {} unregistered ({})", connection.id(), reason);
        });

        let handler = (self.factory)(&connection);
        if let Err(e) = connection.begin_receive(handler) {
            connection.close().await;
            return Err(e);
        }
        debug!(
            "accepted connection {} from {}",
            connection.id(),
            connection.remote_addr()
        );
        self.report(AcceptorEvent::Accepted(connection));
        Ok(())
    }

    fn report(&self, event: AcceptorEvent) {
        if let Some(events) = &self.events {
            if let Err(e) = events.send(event) {
                trace!("acceptor event dropped: {:?}", e.0);
            }
        }
    }
}

/// Accepts until shut down. A failed accept is reported and retried after a
/// capped backoff; it never ends the loop.
async fn accept_loop<F, H>(listener: TcpListener, context: AcceptContext<F>, mut shutdown: Shutdown)
where
    F: Fn(&Connection) -> H + Send + Sync + 'static,
    H: ConnectionHandler,
{
    let mut backoff = INITIAL_ACCEPT_BACKOFF;
    loop {
        let permit = match &context.limit_connections {
            Some(limit) => tokio::select! {
                _ = shutdown.recv() => break,
                permit = limit.clone().acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
            },
            None => None,
        };

        let accepted = tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((socket, addr)) => {
                backoff = INITIAL_ACCEPT_BACKOFF;
                trace!("accepted socket from {}", addr);
                if let Err(e) = context.on_accepted(socket, permit).await {
                    warn!("failed to set up connection from {}: {}", addr, e);
                    context.report(AcceptorEvent::AcceptFailed(e.to_string()));
                }
            }
            Err(e) => {
                error!("accept tcp connection error: {}", e);
                context.report(AcceptorEvent::AcceptFailed(e.to_string()));
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_ACCEPT_BACKOFF);
            }
        }
    }
    debug!(
        "accept loop on {:?} exited",
        listener.local_addr().ok()
    );
}
