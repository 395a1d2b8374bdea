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

use bytes::BytesMut;
use tokio::sync::mpsc;
use tracing::trace;

use crate::framing::Framer;
use crate::network::{CloseReason, Connection, ConnectionHandler};
use crate::{AppError, AppResult};

/// Receives the messages a [`FramedSession`] cuts out of the byte stream.
pub trait MessageHandler: Send + 'static {
    fn on_message(
        &mut self,
        connection: &Connection,
        message: BytesMut,
    ) -> impl Future<Output = AppResult<()>> + Send;

    fn on_receive_error(&mut self, _connection: &Connection, _error: &AppError) {}

    fn on_closed(&mut self, _connection: &Connection, _reason: CloseReason) {}
}

/// Delivers every message into a channel; a dropped receiver is not an error.
impl MessageHandler for mpsc::UnboundedSender<BytesMut> {
    fn on_message(
        &mut self,
        connection: &Connection,
        message: BytesMut,
    ) -> impl Future<Output = AppResult<()>> + Send {
        if self.send(message).is_err() {
            trace!("message receiver of connection {} dropped", connection.id());
        }
        async { Ok::<(), AppError>(()) }
    }
}

/// Drives a [`Framer`] from a connection's raw bytes.
///
/// Messages completed by a chunk are delivered in order before any framing
/// error from the same chunk is reported, so nothing that arrived intact is
/// lost; the error then closes the connection.
#[derive(Debug)]
pub struct FramedSession<H> {
    framer: Framer,
    handler: H,
}

impl<H: MessageHandler> FramedSession<H> {
    pub fn new(framer: Framer, handler: H) -> Self {
        FramedSession { framer, handler }
    }

    pub fn framer(&self) -> &Framer {
        &self.framer
    }
}

impl<H: MessageHandler> ConnectionHandler for FramedSession<H> {
    fn on_data(
        &mut self,
        connection: &Connection,
        data: &[u8],
    ) -> impl Future<Output = AppResult<()>> + Send {
        let mut messages = Vec::new();
        let framed = self.framer.receive_data(data, |m| messages.push(m));
        let handler = &mut self.handler;
        async move {
            for message in messages {
                handler.on_message(connection, message).await?;
            }
            framed
        }
    }

    fn on_receive_error(&mut self, connection: &Connection, error: &AppError) {
        self.handler.on_receive_error(connection, error);
    }

    fn on_closed(&mut self, connection: &Connection, reason: CloseReason) {
        self.handler.on_closed(connection, reason);
    }
}
