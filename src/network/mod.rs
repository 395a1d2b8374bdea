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

//! Network Module Implementation
//!
//! TCP transport: connections, the dialing client and the listening acceptor.
//!
//! # Architecture
//!
//! Built on tokio's async I/O, one task per connection:
//! - each connection runs a receive loop with exactly one read outstanding; the
//!   next read is issued only after the handler is done with the current chunk
//! - sends come from any task and are serialized per connection
//! - the acceptor runs its own accept loop task and keeps a registry of live
//!   connections
//!
//! # Components
//!
//! - `Connection`: one TCP connection, its receive loop and close state
//! - `FramedSession`: plugs a `Framer` into a connection's receive loop
//! - `Client`: dials out
//! - `Acceptor`: listens, checks and registers inbound connections
//!
//! # Features
//!
//! - Close reasons (closed, disconnected, lost, rejected) reported exactly once
//! - Idempotent close, safe against concurrent sends
//! - Accept loop that survives accept errors
//! - Optional connection checker and connection limit

pub use acceptor::{Acceptor, AcceptorEvent, ListenEndpoint};
pub use client::Client;
pub use connection::{CloseReason, Connection, ConnectionHandler, Status, RECEIVE_BUFFER_SIZE};
pub use session::{FramedSession, MessageHandler};

mod acceptor;
mod client;
mod connection;
mod session;
