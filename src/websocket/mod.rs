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

//! WebSocket Module Implementation
//!
//! Server side of RFC 6455 on top of a [`Connection`](crate::network::Connection).
//!
//! # States
//!
//! A connection starts in `Http`: received bytes go through a
//! `DoubleNewLineFramer` and every head is treated as an opening handshake.
//! A valid handshake answers `101 Switching Protocols` and moves the
//! connection to `Upgraded` for good; from then on bytes go through a
//! `WebSocketFramer`. Any other request is answered with `400 Bad Request`
//! and the connection is closed.
//!
//! # Components
//!
//! - `handshake`: accept key computation, request validation and the
//!   responses, plus the client side helpers
//! - `WebSocketSession`: the receive side state machine, plugged into a
//!   connection's receive loop
//! - `WebSocketConnection`: the send side handle shared with the application

use serde::{Deserialize, Serialize};

pub use connection::{WebSocketConnection, WebSocketHandler, WebSocketSession};

mod connection;
pub mod handshake;

/// Kind of a reassembled application message, taken from the opcode of its
/// first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Binary,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WebSocketConfig {
    /// largest handshake head accepted while still speaking HTTP
    pub max_handshake_size: usize,
    /// largest frame payload, and largest reassembled message
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_handshake_size: 8 * 1024,
            max_message_size: 1024 * 1024,
        }
    }
}
