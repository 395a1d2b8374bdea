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

use bytes::{BufMut, BytesMut};

use crate::AppError::OversizeMessage;
use crate::AppResult;

use super::check_not_poisoned;

pub const DELIMITER: &[u8; 4] = b"\r\n\r\n";

/// Frames messages as `[payload]\r\n\r\n`, the way HTTP terminates a head.
///
/// Framing is purely delimiter based: `Content-Length` is not consulted, so a
/// payload must never contain the delimiter itself. This is enough for the
/// WebSocket handshake, whose requests carry no body.
#[derive(Debug)]
pub struct DoubleNewLineFramer {
    max_message_size: usize,
    buffer: BytesMut,
    /// number of delimiter bytes matched at the tail of `buffer`
    matched: usize,
    poisoned: bool,
}

impl DoubleNewLineFramer {
    pub fn new(max_message_size: usize) -> Self {
        DoubleNewLineFramer {
            max_message_size,
            buffer: BytesMut::new(),
            matched: 0,
            poisoned: false,
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn frame(&self, message: &[u8]) -> AppResult<BytesMut> {
        if message.len() > self.max_message_size {
            return Err(OversizeMessage {
                size: message.len() as u64,
                max: self.max_message_size,
            });
        }
        let mut wire = BytesMut::with_capacity(message.len() + DELIMITER.len());
        wire.put_slice(message);
        wire.put_slice(DELIMITER);
        Ok(wire)
    }

    pub fn receive_data<F>(&mut self, data: &[u8], mut on_message: F) -> AppResult<()>
    where
        F: FnMut(BytesMut),
    {
        check_not_poisoned(self.poisoned)?;
        let mut start = 0;
        for (i, &byte) in data.iter().enumerate() {
            self.matched = next_match_state(self.matched, byte);
            if self.matched < DELIMITER.len() {
                continue;
            }
            self.matched = 0;
            self.buffer.extend_from_slice(&data[start..=i]);
            start = i + 1;

            let payload_len = self.buffer.len() - DELIMITER.len();
            self.check_size(payload_len)?;
            self.buffer.truncate(payload_len);
            on_message(self.buffer.split());
        }

        let rest = &data[start..];
        // the partially matched delimiter is not part of the payload (yet)
        self.check_size(self.buffer.len() + rest.len() - self.matched)?;
        self.buffer.extend_from_slice(rest);
        Ok(())
    }

    fn check_size(&mut self, payload_len: usize) -> AppResult<()> {
        if payload_len > self.max_message_size {
            self.poisoned = true;
            self.buffer.clear();
            return Err(OversizeMessage {
                size: payload_len as u64,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

/// Advance the delimiter matcher by one byte. `\r\n\r\n` only overlaps
/// itself on `\r`, so any mismatch restarts at 1 or 0.
fn next_match_state(matched: usize, byte: u8) -> usize {
    if byte == DELIMITER[matched] {
        matched + 1
    } else if byte == b'\r' {
        1
    } else {
        0
    }
}
