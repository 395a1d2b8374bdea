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

use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::info;

use crate::network::{Connection, ConnectionHandler};
use crate::AppError::IllegalStateError;
use crate::AppResult;

/// The dialing side of a connection.
///
/// Received bytes go through the same receive loop as accepted connections;
/// the handler learns about receive errors and the disconnect through
/// [`ConnectionHandler::on_receive_error`] and [`ConnectionHandler::on_closed`].
#[derive(Debug, Default)]
pub struct Client {
    connection: Option<Connection>,
}

impl Client {
    pub fn new() -> Self {
        Client::default()
    }

    /// Dial `addr` and start receiving into `handler`.
    ///
    /// A client can be reconnected after its previous connection closed.
    pub async fn connect<A, H>(&mut self, addr: A, handler: H) -> AppResult<()>
    where
        A: ToSocketAddrs,
        H: ConnectionHandler,
    {
        if self.is_connected() {
            return Err(IllegalStateError("client is already connected".to_string()));
        }
        let socket = TcpStream::connect(addr).await?;
        let connection = Connection::new(socket)?;
        connection.begin_receive(handler)?;
        info!(
            "connection {} established to {}",
            connection.id(),
            connection.remote_addr()
        );
        self.connection = Some(connection);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_open)
    }

    pub fn connection(&self) -> AppResult<&Connection> {
        self.connection
            .as_ref()
            .ok_or_else(|| IllegalStateError("client is not connected".to_string()))
    }

    pub async fn send(&self, data: &[u8]) -> AppResult<()> {
        self.connection()?.send(data).await
    }

    pub async fn disconnect(&self) -> AppResult<()> {
        self.connection()?.close().await;
        Ok(())
    }
}
