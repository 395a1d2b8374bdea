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

use crate::AppError::{InvalidValue, OversizeMessage};
use crate::AppResult;

use super::check_not_poisoned;

const TERMINATOR: u8 = 0x00;

/// Frames messages as `[payload][0x00]`.
#[derive(Debug)]
pub struct NullTerminationFramer {
    max_message_size: usize,
    buffer: BytesMut,
    poisoned: bool,
}

impl NullTerminationFramer {
    pub fn new(max_message_size: usize) -> Self {
        NullTerminationFramer {
            max_message_size,
            buffer: BytesMut::new(),
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
        if message.contains(&TERMINATOR) {
            return Err(InvalidValue(
                "null terminated message must not contain a zero byte".to_string(),
            ));
        }
        let mut wire = BytesMut::with_capacity(message.len() + 1);
        wire.put_slice(message);
        wire.put_u8(TERMINATOR);
        Ok(wire)
    }

    pub fn receive_data<F>(&mut self, mut data: &[u8], mut on_message: F) -> AppResult<()>
    where
        F: FnMut(BytesMut),
    {
        check_not_poisoned(self.poisoned)?;
        while let Some(pos) = data.iter().position(|&b| b == TERMINATOR) {
            self.accumulate(&data[..pos])?;
            on_message(self.buffer.split());
            data = &data[pos + 1..];
        }
        self.accumulate(data)
    }

    fn accumulate(&mut self, bytes: &[u8]) -> AppResult<()> {
        let size = self.buffer.len() + bytes.len();
        if size > self.max_message_size {
            self.poisoned = true;
            self.buffer.clear();
            return Err(OversizeMessage {
                size: size as u64,
                max: self.max_message_size,
            });
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }
}
