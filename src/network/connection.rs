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

use std::fmt;
use std::future::Future;
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::AppError::{DetailedIoError, IllegalStateError};
use crate::{AppError, AppResult};

/// Size of the scratch buffer each receive fills.
pub const RECEIVE_BUFFER_SIZE: usize = 4 * 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// closed locally through [`Connection::close`], or after a processing error
    Closed,
    /// the peer shut its side down gracefully
    Disconnected,
    /// the socket failed
    Lost,
    /// refused by the acceptor's connection checker
    Rejected,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::Closed => "closed",
            CloseReason::Disconnected => "disconnected",
            CloseReason::Lost => "lost",
            CloseReason::Rejected => "rejected",
        };
        f.write_str(reason)
    }
}

/// Per-connection protocol logic driven by the receive loop.
///
/// `on_data` is awaited before the next read is issued, so a handler only ever
/// sees one chunk at a time, in arrival order.
pub trait ConnectionHandler: Send + 'static {
    /// Handle one received chunk. An error closes the connection.
    fn on_data(
        &mut self,
        connection: &Connection,
        data: &[u8],
    ) -> impl Future<Output = AppResult<()>> + Send;

    /// Called with the error that made `on_data` fail, right before the
    /// connection is closed.
    fn on_receive_error(&mut self, _connection: &Connection, _error: &AppError) {}

    /// Called once when the receive loop ends.
    fn on_closed(&mut self, _connection: &Connection, _reason: CloseReason) {}
}

type ClosedListener = Box<dyn FnOnce(&Connection, CloseReason) + Send>;

struct ConnectionState {
    status: Status,
    close_reason: Option<CloseReason>,
    closed_listeners: Vec<ClosedListener>,
}

struct ConnectionInner {
    id: u64,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    state: Mutex<ConnectionState>,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: tokio::sync::Mutex<Option<BufWriter<OwnedWriteHalf>>>,
    cancel: CancellationToken,
}

/// A live TCP connection.
///
/// The handle is cheap to clone; every clone refers to the same socket. Sends
/// may come from any task while the receive loop runs.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub fn new(socket: TcpStream) -> AppResult<Connection> {
        let remote_addr = socket.peer_addr()?;
        let local_addr = socket.local_addr()?;
        if let Err(e) = socket.set_nodelay(true) {
            debug!("failed to set TCP_NODELAY for {}: {}", remote_addr, e);
        }
        let (reader, writer) = socket.into_split();
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        trace!("connection {} from {} initialized", id, remote_addr);

        Ok(Connection {
            inner: Arc::new(ConnectionInner {
                id,
                remote_addr,
                local_addr,
                state: Mutex::new(ConnectionState {
                    status: Status::Open,
                    close_reason: None,
                    closed_listeners: Vec::new(),
                }),
                reader: Mutex::new(Some(reader)),
                writer: tokio::sync::Mutex::new(Some(BufWriter::new(writer))),
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn status(&self) -> Status {
        self.inner.state.lock().status
    }

    pub fn is_open(&self) -> bool {
        self.status() == Status::Open
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.state.lock().close_reason
    }

    /// Register a listener for the close transition. Listeners run exactly
    /// once; registering on an already closed connection runs it immediately.
    pub fn on_closed<F>(&self, listener: F)
    where
        F: FnOnce(&Connection, CloseReason) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        let close_reason = state.close_reason;
        match close_reason {
            Some(reason) => {
                drop(state);
                listener(self, reason);
            }
            None => state.closed_listeners.push(Box::new(listener)),
        }
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await
    }

    /// Start the receive loop on its own task.
    ///
    /// Exactly one read is outstanding at a time: the next read is issued only
    /// after `handler` has finished with the current chunk. Can be called once.
    pub fn begin_receive<H: ConnectionHandler>(&self, handler: H) -> AppResult<()> {
        let reader = self.inner.reader.lock().take().ok_or_else(|| {
            IllegalStateError(format!(
                "connection {} is already receiving or closed",
                self.id()
            ))
        })?;
        tokio::spawn(receive_loop(self.clone(), reader, handler));
        Ok(())
    }

    /// Write `data` to the peer, waiting until it has been flushed to the
    /// socket. Does nothing once the connection is closed.
    pub async fn send(&self, data: &[u8]) -> AppResult<()> {
        if !self.is_open() {
            trace!("dropping {} bytes sent to closed connection {}", data.len(), self.id());
            return Ok(());
        }
        let mut writer = self.inner.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Ok(());
        };
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Ok(()),
            result = async {
                writer.write_all(data).await?;
                writer.flush().await
            } => result.map_err(|e| {
                DetailedIoError(format!("send to {} failed: {}", self.remote_addr(), e))
            }),
        }
    }

    /// Close the connection. Idempotent: only the first call (or the first
    /// close detected by the receive loop) fires the close listeners.
    pub async fn close(&self) {
        self.close_with(CloseReason::Closed).await;
    }

    /// Returns `false` when the connection was already closed.
    pub(crate) async fn close_with(&self, reason: CloseReason) -> bool {
        let listeners = {
            let mut state = self.inner.state.lock();
            if state.status == Status::Closed {
                return false;
            }
            state.status = Status::Closed;
            state.close_reason = Some(reason);
            mem::take(&mut state.closed_listeners)
        };
        debug!(
            "connection {} from {} {}",
            self.id(),
            self.remote_addr(),
            reason
        );
        for listener in listeners {
            listener(self, reason);
        }

        // stops the receive loop and any in-flight send
        self.inner.cancel.cancel();
        drop(self.inner.reader.lock().take());
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                trace!("shutdown of connection {} failed: {}", self.id(), e);
            }
        }
        true
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("status", &self.status())
            .finish()
    }
}

async fn receive_loop<H: ConnectionHandler>(
    connection: Connection,
    mut reader: OwnedReadHalf,
    mut handler: H,
) {
    let cancel = connection.inner.cancel.clone();
    let mut buffer = vec![0u8; RECEIVE_BUFFER_SIZE];
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = reader.read(&mut buffer) => read,
        };
        match read {
            Ok(0) => {
                connection.close_with(CloseReason::Disconnected).await;
                break;
            }
            Ok(n) => {
                trace!("connection {} received {} bytes", connection.id(), n);
                if let Err(e) = handler.on_data(&connection, &buffer[..n]).await {
                    if !connection.is_open() {
                        // closed underneath the handler
                        break;
                    }
                    if e.is_framing_error() {
                        warn!(
                            "closing connection {} from {}, stream rejected: {}",
                            connection.id(),
                            connection.remote_addr(),
                            e
                        );
                    } else {
                        warn!(
                            "closing connection {} from {}: {}",
                            connection.id(),
                            connection.remote_addr(),
                            e
                        );
                    }
                    handler.on_receive_error(&connection, &e);
                    connection.close_with(CloseReason::Closed).await;
                    break;
                }
            }
            Err(e) => {
                debug!("connection {} lost: {}", connection.id(), e);
                connection.close_with(CloseReason::Lost).await;
                break;
            }
        }
    }
    drop(reader);

    let reason = connection.close_reason().unwrap_or(CloseReason::Closed);
    handler.on_closed(&connection, reason);
    trace!("receive loop of connection {} exited", connection.id());
}
