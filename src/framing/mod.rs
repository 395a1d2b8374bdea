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

//! Framing Module Implementation
//!
//! Turns an arbitrarily fragmented byte stream into discrete messages and back.
//!
//! # Contract
//!
//! Every framer offers the same two operations:
//! - `frame(message)`: encode one message into its wire format, failing with
//!   `OversizeMessage` when the message exceeds the configured maximum
//! - `receive_data(data, on_message)`: consume a chunk of any size and emit
//!   zero or more complete messages synchronously, in arrival order
//!
//! Feeding a framed stream one byte at a time yields exactly the same messages
//! as feeding it in a single call.
//!
//! Once a framer has rejected its input (declared or accumulated length over
//! the maximum, corrupt header) it is poisoned: every later call fails and no
//! further message is ever emitted. The owner is expected to close the stream.
//!
//! # Components
//!
//! - `LengthPrefixFramer`: `[i32 LE total length][payload]`
//! - `NullTerminationFramer`: `[payload][0x00]`
//! - `DoubleNewLineFramer`: `[payload]\r\n\r\n`
//! - `WebSocketFramer`: RFC 6455 frames, decoded with `WebSocketFrame::parse`

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::AppError::IllegalStateError;
use crate::AppResult;

pub use double_newline::DoubleNewLineFramer;
pub use length_prefix::LengthPrefixFramer;
pub use mask::{apply_mask, FIXED_MASK_KEY};
pub use null_termination::NullTerminationFramer;
pub use websocket::{frame_message, OpCode, WebSocketFrame, WebSocketFramer};

mod double_newline;
mod length_prefix;
mod mask;
mod null_termination;
mod websocket;

/// Selects a framer implementation, e.g. from a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramerKind {
    #[default]
    LengthPrefix,
    NullTermination,
    DoubleNewLine,
    WebSocket,
}

impl FramerKind {
    pub fn build(self, max_message_size: usize) -> Framer {
        match self {
            FramerKind::LengthPrefix => {
                Framer::LengthPrefix(LengthPrefixFramer::new(max_message_size))
            }
            FramerKind::NullTermination => {
                Framer::NullTermination(NullTerminationFramer::new(max_message_size))
            }
            FramerKind::DoubleNewLine => {
                Framer::DoubleNewLine(DoubleNewLineFramer::new(max_message_size))
            }
            FramerKind::WebSocket => Framer::WebSocket(WebSocketFramer::new(max_message_size)),
        }
    }
}

/// One of the four stream framers. Each instance owns the reassembly state of
/// a single stream and must not be shared between connections.
#[derive(Debug)]
pub enum Framer {
    LengthPrefix(LengthPrefixFramer),
    NullTermination(NullTerminationFramer),
    DoubleNewLine(DoubleNewLineFramer),
    WebSocket(WebSocketFramer),
}

impl Framer {
    pub fn kind(&self) -> FramerKind {
        match self {
            Framer::LengthPrefix(_) => FramerKind::LengthPrefix,
            Framer::NullTermination(_) => FramerKind::NullTermination,
            Framer::DoubleNewLine(_) => FramerKind::DoubleNewLine,
            Framer::WebSocket(_) => FramerKind::WebSocket,
        }
    }

    pub fn max_message_size(&self) -> usize {
        match self {
            Framer::LengthPrefix(framer) => framer.max_message_size(),
            Framer::NullTermination(framer) => framer.max_message_size(),
            Framer::DoubleNewLine(framer) => framer.max_message_size(),
            Framer::WebSocket(framer) => framer.max_message_size(),
        }
    }

    /// Encode `message` into the wire format. The WebSocket variant produces a
    /// single unmasked final `Binary` frame.
    pub fn frame(&self, message: &[u8]) -> AppResult<BytesMut> {
        match self {
            Framer::LengthPrefix(framer) => framer.frame(message),
            Framer::NullTermination(framer) => framer.frame(message),
            Framer::DoubleNewLine(framer) => framer.frame(message),
            Framer::WebSocket(framer) => framer.frame(message, false, OpCode::Binary),
        }
    }

    /// Feed a chunk of received bytes. The WebSocket variant emits raw frames,
    /// header included.
    pub fn receive_data<F>(&mut self, data: &[u8], on_message: F) -> AppResult<()>
    where
        F: FnMut(BytesMut),
    {
        match self {
            Framer::LengthPrefix(framer) => framer.receive_data(data, on_message),
            Framer::NullTermination(framer) => framer.receive_data(data, on_message),
            Framer::DoubleNewLine(framer) => framer.receive_data(data, on_message),
            Framer::WebSocket(framer) => framer.receive_data(data, on_message),
        }
    }
}

fn check_not_poisoned(poisoned: bool) -> AppResult<()> {
    if poisoned {
        return Err(IllegalStateError(
            "framer already rejected its input stream".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppError;
    use rstest::rstest;

    fn messages() -> Vec<Vec<u8>> {
        vec![
            b"first".to_vec(),
            Vec::new(),
            (1..=200u8).collect(),
            b"x".to_vec(),
            vec![0x7f; 1000],
        ]
    }

    fn unwrap_payload(kind: FramerKind, raw: BytesMut) -> Vec<u8> {
        match kind {
            FramerKind::WebSocket => WebSocketFrame::parse(raw).unwrap().payload.to_vec(),
            _ => raw.to_vec(),
        }
    }

    #[rstest]
    fn test_fragmentation_invariance(
        #[values(
            FramerKind::LengthPrefix,
            FramerKind::NullTermination,
            FramerKind::DoubleNewLine,
            FramerKind::WebSocket
        )]
        kind: FramerKind,
        #[values(1, 2, 3, 7, 64, 4096)] chunk_size: usize,
    ) {
        let sender = kind.build(1024);
        let mut wire = BytesMut::new();
        for message in messages() {
            wire.extend_from_slice(&sender.frame(&message).unwrap());
        }

        let mut receiver = kind.build(1024);
        let mut received = Vec::new();
        for chunk in wire.chunks(chunk_size) {
            receiver
                .receive_data(chunk, |m| received.push(unwrap_payload(kind, m)))
                .unwrap();
        }
        assert_eq!(received, messages());
    }

    #[rstest]
    fn test_oversize_rejection(
        #[values(
            FramerKind::LengthPrefix,
            FramerKind::NullTermination,
            FramerKind::DoubleNewLine,
            FramerKind::WebSocket
        )]
        kind: FramerKind,
    ) {
        let small = kind.build(8);
        assert!(matches!(
            small.frame(&[1; 9]),
            Err(AppError::OversizeMessage { size: 9, max: 8 })
        ));

        // framed by a peer with a larger limit
        let large = kind.build(64);
        let mut wire = large.frame(&[1; 4]).unwrap();
        wire.extend_from_slice(&large.frame(&[2; 9]).unwrap());
        wire.extend_from_slice(&large.frame(&[3; 4]).unwrap());

        let mut receiver = kind.build(8);
        let mut received = Vec::new();
        let err = receiver
            .receive_data(&wire, |m| received.push(unwrap_payload(kind, m)))
            .unwrap_err();
        assert!(matches!(err, AppError::OversizeMessage { .. }));
        assert_eq!(received, vec![vec![1; 4]]);
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            FramerKind::LengthPrefix,
            FramerKind::NullTermination,
            FramerKind::DoubleNewLine,
            FramerKind::WebSocket,
        ] {
            let framer = kind.build(16);
            assert_eq!(framer.kind(), kind);
            assert_eq!(framer.max_message_size(), 16);
        }
    }
}
