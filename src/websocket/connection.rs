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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use super::handshake::{self, HandshakeOutcome};
use super::{MessageType, WebSocketConfig};
use crate::framing::{frame_message, DoubleNewLineFramer, OpCode, WebSocketFrame, WebSocketFramer};
use crate::http::HttpRequest;
use crate::network::{CloseReason, Connection, ConnectionHandler};
use crate::AppError::{IllegalStateError, MalformedFrame, OversizeMessage};
use crate::{AppError, AppResult};

/// Application side of a WebSocket connection.
pub trait WebSocketHandler: Send + 'static {
    /// A reassembled data message, in arrival order.
    fn on_message(
        &mut self,
        connection: &WebSocketConnection,
        message_type: MessageType,
        message: Bytes,
    ) -> impl Future<Output = AppResult<()>> + Send;

    /// The `101` response has been sent.
    fn on_upgraded(&mut self, _connection: &WebSocketConnection, _request: &HttpRequest) {}

    fn on_receive_error(&mut self, _connection: &WebSocketConnection, _error: &AppError) {}

    fn on_closed(&mut self, _connection: &WebSocketConnection, _reason: CloseReason) {}
}

impl WebSocketHandler for mpsc::UnboundedSender<(MessageType, Bytes)> {
    fn on_message(
        &mut self,
        connection: &WebSocketConnection,
        message_type: MessageType,
        message: Bytes,
    ) -> impl Future<Output = AppResult<()>> + Send {
        if self.send((message_type, message)).is_err() {
            trace!(
                "message receiver of websocket connection {} dropped",
                connection.id()
            );
        }
        async { Ok::<(), AppError>(()) }
    }
}

/// Send side of a WebSocket connection. Clones share the upgrade state.
#[derive(Debug, Clone)]
pub struct WebSocketConnection {
    connection: Connection,
    upgraded: Arc<AtomicBool>,
    max_message_size: usize,
}

impl WebSocketConnection {
    pub fn new(connection: Connection, max_message_size: usize) -> Self {
        WebSocketConnection {
            connection,
            upgraded: Arc::new(AtomicBool::new(false)),
            max_message_size,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn id(&self) -> u64 {
        self.connection.id()
    }

    pub fn is_upgraded(&self) -> bool {
        self.upgraded.load(Ordering::Acquire)
    }

    fn mark_upgraded(&self) {
        self.upgraded.store(true, Ordering::Release);
    }

    /// Send one unmasked final frame carrying `payload`.
    pub async fn send(&self, message_type: MessageType, payload: &[u8]) -> AppResult<()> {
        let opcode = match message_type {
            MessageType::Text => OpCode::Text,
            MessageType::Binary => OpCode::Binary,
        };
        self.send_checked(opcode, payload).await
    }

    pub async fn send_text(&self, text: &str) -> AppResult<()> {
        self.send(MessageType::Text, text.as_bytes()).await
    }

    pub async fn send_binary(&self, data: &[u8]) -> AppResult<()> {
        self.send(MessageType::Binary, data).await
    }

    /// Send an empty `Ping`. The peer's `Pong` is consumed silently.
    pub async fn ping(&self) -> AppResult<()> {
        self.send_checked(OpCode::Ping, &[]).await
    }

    /// Send a `Close` frame, then close the TCP connection. Before the
    /// upgrade only the TCP connection is closed.
    pub async fn close(&self) {
        if self.is_upgraded() {
            let frame = WebSocketFrame::new(true, OpCode::Close, Bytes::new());
            if let Err(e) = self.send_frame(&frame).await {
                debug!("close frame to connection {} not sent: {}", self.id(), e);
            }
        }
        self.connection.close().await;
    }

    async fn send_checked(&self, opcode: OpCode, payload: &[u8]) -> AppResult<()> {
        if !self.is_upgraded() {
            return Err(IllegalStateError(format!(
                "websocket connection {} is not upgraded yet",
                self.id()
            )));
        }
        let frame = frame_message(payload, false, opcode, self.max_message_size)?;
        self.connection.send(&frame).await
    }

    async fn send_frame(&self, frame: &WebSocketFrame) -> AppResult<()> {
        self.connection.send(&frame.encode(None)).await
    }
}

/// Receive side state machine of a server WebSocket connection.
///
/// While the connection speaks HTTP every received chunk goes to the
/// handshake framer, afterwards every chunk goes to the frame framer. The
/// choice is made once per chunk.
#[derive(Debug)]
pub struct WebSocketSession<H> {
    connection: WebSocketConnection,
    http_framer: DoubleNewLineFramer,
    ws_framer: WebSocketFramer,
    /// frames of the message being reassembled, in arrival order
    pending: Vec<WebSocketFrame>,
    pending_len: usize,
    handler: H,
}

impl<H: WebSocketHandler> WebSocketSession<H> {
    pub fn new(connection: &Connection, handler: H, config: &WebSocketConfig) -> Self {
        WebSocketSession {
            connection: WebSocketConnection::new(connection.clone(), config.max_message_size),
            http_framer: DoubleNewLineFramer::new(config.max_handshake_size),
            ws_framer: WebSocketFramer::new(config.max_message_size),
            pending: Vec::new(),
            pending_len: 0,
            handler,
        }
    }

    /// A handle for sending on this connection, e.g. from another task.
    pub fn connection(&self) -> &WebSocketConnection {
        &self.connection
    }

    async fn receive_http(&mut self, data: &[u8]) -> AppResult<()> {
        let mut heads = Vec::new();
        let framed = self.http_framer.receive_data(data, |head| heads.push(head));
        for head in heads {
            if self.connection.is_upgraded() || !self.connection.connection().is_open() {
                trace!(
                    "dropping {} bytes of http after the handshake on connection {}",
                    head.len(),
                    self.connection.id()
                );
                break;
            }
            self.on_handshake(head).await?;
        }
        framed
    }

    async fn on_handshake(&mut self, head: BytesMut) -> AppResult<()> {
        let request = HttpRequest::parse(&head)?;
        match handshake::respond(&request) {
            HandshakeOutcome::Upgrade(response) => {
                self.connection
                    .connection()
                    .send(&response.encode())
                    .await?;
                self.connection.mark_upgraded();
                info!(
                    "connection {} from {} upgraded to websocket on {}",
                    self.connection.id(),
                    self.connection.connection().remote_addr(),
                    request.request_uri
                );
                self.handler.on_upgraded(&self.connection, &request);
            }
            HandshakeOutcome::Reject(response) => {
                debug!(
                    "connection {} handshake rejected: {} {}",
                    self.connection.id(),
                    response.status_code,
                    request.request_uri
                );
                self.connection
                    .connection()
                    .send(&response.encode())
                    .await?;
                self.connection.connection().close().await;
            }
        }
        Ok(())
    }

    async fn receive_frames(&mut self, data: &[u8]) -> AppResult<()> {
        let mut frames = Vec::new();
        let framed = self.ws_framer.receive_data(data, |frame| frames.push(frame));
        for raw in frames {
            if !self.connection.connection().is_open() {
                break;
            }
            self.on_frame(WebSocketFrame::parse(raw)?).await?;
        }
        framed
    }

    async fn on_frame(&mut self, frame: WebSocketFrame) -> AppResult<()> {
        match frame.opcode {
            OpCode::Close => {
                trace!("close frame on connection {}", self.connection.id());
                // echo the status code, if any
                self.connection
                    .send_frame(&WebSocketFrame::new(true, OpCode::Close, frame.payload))
                    .await?;
                self.connection.connection().close().await;
            }
            OpCode::Ping => {
                self.connection
                    .send_frame(&WebSocketFrame::new(true, OpCode::Pong, frame.payload))
                    .await?;
            }
            OpCode::Pong => {}
            OpCode::Continuation if self.pending.is_empty() => {
                return Err(MalformedFrame(
                    "continuation frame without an opening frame".to_string(),
                ));
            }
            OpCode::Continuation | OpCode::Text | OpCode::Binary => {
                self.pending_len += frame.payload.len();
                let max = self.ws_framer.max_message_size();
                if self.pending_len > max {
                    return Err(OversizeMessage {
                        size: self.pending_len as u64,
                        max,
                    });
                }
                let fin = frame.fin;
                self.pending.push(frame);
                if fin {
                    let (message_type, message) = self.take_message();
                    self.handler
                        .on_message(&self.connection, message_type, message)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Concatenate and clear the pending frames.
    fn take_message(&mut self) -> (MessageType, Bytes) {
        let message_type = match self.pending.first().map(|frame| frame.opcode) {
            Some(OpCode::Text) => MessageType::Text,
            _ => MessageType::Binary,
        };
        let message = if self.pending.len() == 1 {
            self.pending.remove(0).payload
        } else {
            let mut message = BytesMut::with_capacity(self.pending_len);
            for frame in self.pending.drain(..) {
                message.extend_from_slice(&frame.payload);
            }
            message.freeze()
        };
        self.pending.clear();
        self.pending_len = 0;
        (message_type, message)
    }
}

impl<H: WebSocketHandler> ConnectionHandler for WebSocketSession<H> {
    fn on_data(
        &mut self,
        _connection: &Connection,
        data: &[u8],
    ) -> impl Future<Output = AppResult<()>> + Send {
        async move {
            if self.connection.is_upgraded() {
                self.receive_frames(data).await
            } else {
                self.receive_http(data).await
            }
        }
    }

    fn on_receive_error(&mut self, _connection: &Connection, error: &AppError) {
        self.handler.on_receive_error(&self.connection, error);
    }

    fn on_closed(&mut self, _connection: &Connection, reason: CloseReason) {
        self.pending.clear();
        self.handler.on_closed(&self.connection, reason);
    }
}
