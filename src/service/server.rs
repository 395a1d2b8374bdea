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

use std::future::Future;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::framing::{Framer, FramerKind};
use crate::network::{
    Acceptor, AcceptorEvent, Connection, ConnectionHandler, FramedSession, MessageHandler,
};
use crate::websocket::{MessageType, WebSocketConnection, WebSocketHandler, WebSocketSession};
use crate::AppResult;

use super::ServerConfig;

/// Sends every message back in the framing it arrived in.
#[derive(Debug)]
struct FramedEcho {
    framer: Framer,
}

impl MessageHandler for FramedEcho {
    fn on_message(
        &mut self,
        connection: &Connection,
        message: BytesMut,
    ) -> impl Future<Output = AppResult<()>> + Send {
        let reply = self.framer.frame(&message);
        async move { connection.send(&reply?).await }
    }
}

#[derive(Debug)]
struct WebSocketEcho;

impl WebSocketHandler for WebSocketEcho {
    fn on_message(
        &mut self,
        connection: &WebSocketConnection,
        message_type: MessageType,
        message: Bytes,
    ) -> impl Future<Output = AppResult<()>> + Send {
        async move { connection.send(message_type, &message).await }
    }
}

/// Echo server over the configured framer.
///
/// With the `web_socket` framer connections first go through the opening
/// handshake and echo reassembled messages; every other framer echoes raw
/// framed messages.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Server { config }
    }

    /// Serve until `shutdown` resolves, then stop listening and close every
    /// live connection.
    ///
    /// `on_listening` is called with the bound address once the listener is up.
    pub async fn run<S, L>(&self, shutdown: S, on_listening: L) -> AppResult<()>
    where
        S: Future<Output = ()>,
        L: FnOnce(SocketAddr),
    {
        let addr = self.config.network.socket_addr()?;
        let max_message_size = self.config.framing.max_message_size;
        match self.config.framing.framer {
            FramerKind::WebSocket => {
                let websocket = self.config.websocket.clone();
                let acceptor = Acceptor::new(move |connection: &Connection| {
                    WebSocketSession::new(connection, WebSocketEcho, &websocket)
                });
                self.serve(acceptor, addr, shutdown, on_listening).await
            }
            kind => {
                let acceptor = Acceptor::new(move |_: &Connection| {
                    let echo = FramedEcho {
                        framer: kind.build(max_message_size),
                    };
                    FramedSession::new(kind.build(max_message_size), echo)
                });
                self.serve(acceptor, addr, shutdown, on_listening).await
            }
        }
    }

    async fn serve<F, H, S, L>(
        &self,
        mut acceptor: Acceptor<F>,
        addr: SocketAddr,
        shutdown: S,
        on_listening: L,
    ) -> AppResult<()>
    where
        F: Fn(&Connection) -> H + Send + Sync + 'static,
        H: ConnectionHandler,
        S: Future<Output = ()>,
        L: FnOnce(SocketAddr),
    {
        if self.config.network.max_connection > 0 {
            acceptor = acceptor.with_max_connections(self.config.network.max_connection);
        }
        let mut events = acceptor.subscribe_events();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    AcceptorEvent::Accepted(connection) => {
                        debug!("serving {:?}", connection)
                    }
                    AcceptorEvent::Rejected(addr) => debug!("rejected {}", addr),
                    AcceptorEvent::AcceptFailed(cause) => warn!("accept failed: {}", cause),
                }
            }
        });

        let local_addr = acceptor.listen(addr).await?;
        info!(
            "{:?} echo server listening on {}",
            self.config.framing.framer, local_addr
        );
        on_listening(local_addr);

        shutdown.await;
        info!("get shutdown signal");
        acceptor.stop().await;
        let live = acceptor.connection_count();
        acceptor.close_all().await;
        info!("echo server stopped, closed {} connections", live);
        Ok(())
    }
}
