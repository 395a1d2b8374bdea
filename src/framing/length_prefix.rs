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

use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use crate::AppError::{MalformedFrame, OversizeMessage};
use crate::AppResult;

use super::check_not_poisoned;

/// Length of the little-endian total-length prefix.
pub const PREFIX_LEN: usize = 4;

/// Frames messages as `[total_len: i32 LE][payload]`, where `total_len`
/// counts the prefix itself.
#[derive(Debug)]
pub struct LengthPrefixFramer {
    max_message_size: usize,
    buffer: BytesMut,
    /// total frame length, known once the prefix has been read
    expected: Option<usize>,
    poisoned: bool,
}

impl LengthPrefixFramer {
    pub fn new(max_message_size: usize) -> Self {
        LengthPrefixFramer {
            max_message_size,
            buffer: BytesMut::with_capacity(PREFIX_LEN),
            expected: None,
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
        let total = PREFIX_LEN + message.len();
        let total_prefix = i32::try_from(total).map_err(|_| OversizeMessage {
            size: message.len() as u64,
            max: self.max_message_size,
        })?;
        let mut wire = BytesMut::with_capacity(total);
        wire.put_i32_le(total_prefix);
        wire.put_slice(message);
        Ok(wire)
    }

    /// Consume `data`, handing every completed payload to `on_message` in
    /// arrival order. Only the bytes the current stage needs are copied, so the
    /// buffer never holds more than one frame.
    pub fn receive_data<F>(&mut self, mut data: &[u8], mut on_message: F) -> AppResult<()>
    where
        F: FnMut(BytesMut),
    {
        check_not_poisoned(self.poisoned)?;
        while !data.is_empty() {
            let wanted = self.expected.unwrap_or(PREFIX_LEN) - self.buffer.len();
            let take = wanted.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.expected.is_none() {
                if self.buffer.len() < PREFIX_LEN {
                    continue;
                }
                let total = self.declared_total()?;
                self.buffer.reserve(total - PREFIX_LEN);
                self.expected = Some(total);
            }

            if let Some(total) = self.expected {
                if self.buffer.len() == total {
                    self.buffer.advance(PREFIX_LEN);
                    let message = self.buffer.split();
                    self.expected = None;
                    trace!("length prefix frame of {} bytes completed", total);
                    on_message(message);
                }
            }
        }
        Ok(())
    }

    fn declared_total(&mut self) -> AppResult<usize> {
        let declared = i32::from_le_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]);
        if declared < PREFIX_LEN as i32 {
            self.poisoned = true;
            return Err(MalformedFrame(format!(
                "declared frame length {} is shorter than its prefix",
                declared
            )));
        }
        let total = declared as usize;
        if total > PREFIX_LEN + self.max_message_size {
            self.poisoned = true;
            return Err(OversizeMessage {
                size: (total - PREFIX_LEN) as u64,
                max: self.max_message_size,
            });
        }
        Ok(total)
    }
}
