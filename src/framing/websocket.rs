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

//! RFC 6455 frame codec.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Masking-key, if MASK set  |          Payload Data         |
//! +-------------------------------+ - - - - - - - - - - - - - - - +
//! ```
//!
//! [`WebSocketFramer`] only finds frame boundaries in the byte stream and
//! hands out whole raw frames; [`WebSocketFrame::parse`] decodes one of them.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::AppError::{self, InvalidValue, MalformedFrame, OversizeMessage};
use crate::AppResult;

use super::check_not_poisoned;
use super::mask::{apply_mask, FIXED_MASK_KEY};

pub const MIN_HEADER_LEN: usize = 2;
pub const MAX_CONTROL_PAYLOAD_LEN: usize = 125;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;
const LEN_CODE_16: u8 = 126;
const LEN_CODE_64: u8 = 127;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Close, Ping and Pong manage the connection and never carry
    /// application data.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = AppError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(MalformedFrame(format!("unknown opcode 0x{:X}", value))),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> Self {
        match value {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A decoded frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketFrame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Bytes,
}

impl WebSocketFrame {
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        WebSocketFrame {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    /// Decode one complete raw frame, as emitted by [`WebSocketFramer`].
    ///
    /// A masked payload is unmasked in place with the 4 key bytes that
    /// immediately precede it, so the returned payload shares `buffer`'s
    /// allocation.
    pub fn parse(mut buffer: BytesMut) -> AppResult<WebSocketFrame> {
        if buffer.len() < MIN_HEADER_LEN {
            return Err(MalformedFrame(format!(
                "frame of {} bytes is shorter than a header",
                buffer.len()
            )));
        }
        let (first, second) = (buffer[0], buffer[1]);
        if first & RSV_BITS != 0 {
            return Err(MalformedFrame(
                "reserved bits set without a negotiated extension".to_string(),
            ));
        }
        let fin = first & FIN_BIT != 0;
        let opcode = OpCode::try_from(first & OPCODE_BITS)?;

        let header_len = header_len(second);
        if buffer.len() < header_len {
            return Err(MalformedFrame(format!(
                "frame header needs {} bytes, got {}",
                header_len,
                buffer.len()
            )));
        }
        let payload_len = declared_payload_len(&buffer[..header_len]);
        if (buffer.len() - header_len) as u64 != payload_len {
            return Err(MalformedFrame(format!(
                "frame declares {} payload bytes but carries {}",
                payload_len,
                buffer.len() - header_len
            )));
        }
        if opcode.is_control() && (!fin || payload_len > MAX_CONTROL_PAYLOAD_LEN as u64) {
            return Err(MalformedFrame(format!(
                "invalid {:?} control frame (fin: {}, length: {})",
                opcode, fin, payload_len
            )));
        }

        let mask = if second & MASK_BIT != 0 {
            let key = &buffer[header_len - 4..header_len];
            Some([key[0], key[1], key[2], key[3]])
        } else {
            None
        };
        buffer.advance(header_len);
        if let Some(key) = mask {
            apply_mask(&mut buffer, key);
        }

        Ok(WebSocketFrame {
            fin,
            opcode,
            payload: buffer.freeze(),
        })
    }

    /// Encode without any size or opcode policy; see [`WebSocketFramer::frame`]
    /// for the checked path.
    pub fn encode(&self, mask: Option<[u8; 4]>) -> BytesMut {
        encode_frame(self.fin, self.opcode, &self.payload, mask)
    }
}

/// Frame a complete (`Fin = true`) message.
///
/// Only data opcodes may carry a payload, and the payload must fit within
/// `max_message_size`. Masked frames use [`FIXED_MASK_KEY`].
pub fn frame_message(
    payload: &[u8],
    use_mask: bool,
    opcode: OpCode,
    max_message_size: usize,
) -> AppResult<BytesMut> {
    if opcode.is_control() && !payload.is_empty() {
        return Err(InvalidValue(format!(
            "{:?} frames cannot carry a payload",
            opcode
        )));
    }
    if payload.len() > max_message_size {
        return Err(OversizeMessage {
            size: payload.len() as u64,
            max: max_message_size,
        });
    }
    let mask = use_mask.then_some(FIXED_MASK_KEY);
    Ok(encode_frame(true, opcode, payload, mask))
}

fn encode_frame(fin: bool, opcode: OpCode, payload: &[u8], mask: Option<[u8; 4]>) -> BytesMut {
    let len = payload.len();
    let mut wire = BytesMut::with_capacity(14 + len);

    let fin_bit = if fin { FIN_BIT } else { 0 };
    wire.put_u8(fin_bit | u8::from(opcode));

    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    if len <= MAX_CONTROL_PAYLOAD_LEN {
        wire.put_u8(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        wire.put_u8(mask_bit | LEN_CODE_16);
        wire.put_u16(len as u16);
    } else {
        wire.put_u8(mask_bit | LEN_CODE_64);
        wire.put_u64(len as u64);
    }

    match mask {
        Some(key) => {
            wire.put_slice(&key);
            let start = wire.len();
            wire.put_slice(payload);
            apply_mask(&mut wire[start..], key);
        }
        None => wire.put_slice(payload),
    }
    wire
}

/// Header length implied by the second header byte.
fn header_len(second: u8) -> usize {
    let extended = match second & LEN_BITS {
        LEN_CODE_16 => 2,
        LEN_CODE_64 => 8,
        _ => 0,
    };
    let mask = if second & MASK_BIT != 0 { 4 } else { 0 };
    MIN_HEADER_LEN + extended + mask
}

/// Payload length declared by a complete header.
fn declared_payload_len(header: &[u8]) -> u64 {
    match header[1] & LEN_BITS {
        LEN_CODE_16 => u16::from_be_bytes([header[2], header[3]]) as u64,
        LEN_CODE_64 => u64::from_be_bytes([
            header[2], header[3], header[4], header[5], header[6], header[7], header[8],
            header[9],
        ]),
        code => code as u64,
    }
}

/// Splits a byte stream into raw WebSocket frames.
#[derive(Debug)]
pub struct WebSocketFramer {
    max_message_size: usize,
    buffer: BytesMut,
    /// bytes the current stage needs in `buffer`
    expected: usize,
    header_parsed: bool,
    poisoned: bool,
}

impl WebSocketFramer {
    pub fn new(max_message_size: usize) -> Self {
        WebSocketFramer {
            max_message_size,
            buffer: BytesMut::with_capacity(MIN_HEADER_LEN),
            expected: MIN_HEADER_LEN,
            header_parsed: false,
            poisoned: false,
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn frame(&self, payload: &[u8], use_mask: bool, opcode: OpCode) -> AppResult<BytesMut> {
        frame_message(payload, use_mask, opcode, self.max_message_size)
    }

    /// Consume `data`, emitting every completed raw frame (header included)
    /// in arrival order.
    pub fn receive_data<F>(&mut self, mut data: &[u8], mut on_message: F) -> AppResult<()>
    where
        F: FnMut(BytesMut),
    {
        check_not_poisoned(self.poisoned)?;
        loop {
            let take = (self.expected - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() < self.expected {
                return Ok(());
            }

            if !self.header_parsed {
                let header_len = header_len(self.buffer[1]);
                if self.buffer.len() < header_len {
                    self.expected = header_len;
                    continue;
                }
                let payload_len = declared_payload_len(&self.buffer[..header_len]);
                if payload_len > self.max_message_size as u64 {
                    self.poisoned = true;
                    self.buffer.clear();
                    return Err(OversizeMessage {
                        size: payload_len,
                        max: self.max_message_size,
                    });
                }
                self.expected = header_len + payload_len as usize;
                self.buffer.reserve(payload_len as usize);
                self.header_parsed = true;
                continue;
            }

            trace!("websocket frame of {} bytes completed", self.buffer.len());
            on_message(self.buffer.split());
            self.expected = MIN_HEADER_LEN;
            self.header_parsed = false;
            if data.is_empty() {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const MAX: usize = 70_000;

    fn raw_frames(framer: &mut WebSocketFramer, data: &[u8]) -> Vec<BytesMut> {
        let mut frames = Vec::new();
        framer.receive_data(data, |f| frames.push(f)).unwrap();
        frames
    }

    #[rstest]
    fn test_round_trip(
        #[values(0, 1, 125, 126, 65535, 65546)] len: usize,
        #[values(OpCode::Text, OpCode::Binary)] opcode: OpCode,
        #[values(false, true)] use_mask: bool,
    ) {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut framer = WebSocketFramer::new(MAX);
        let wire = framer.frame(&payload, use_mask, opcode).unwrap();

        let frames = raw_frames(&mut framer, &wire);
        assert_eq!(frames.len(), 1);
        let frame = WebSocketFrame::parse(frames.into_iter().next().unwrap()).unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, opcode);
        assert_eq!(&frame.payload[..], &payload[..]);
    }

    #[rstest]
    #[case(125, 2)]
    #[case(126, 4)]
    #[case(65535, 4)]
    #[case(65536, 10)]
    fn test_length_encoding_boundaries(#[case] len: usize, #[case] header: usize) {
        let wire = frame_message(&vec![0u8; len], false, OpCode::Binary, MAX).unwrap();
        assert_eq!(wire.len(), header + len);
    }

    #[test]
    fn test_rfc_masked_hello() {
        let wire = frame_message(b"Hello", true, OpCode::Text, MAX).unwrap();
        assert_eq!(
            &wire[..],
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
        let frame = WebSocketFrame::parse(wire).unwrap();
        assert_eq!(&frame.payload[..], b"Hello");
    }

    #[test]
    fn test_control_payload_rejected() {
        for opcode in [OpCode::Close, OpCode::Ping, OpCode::Pong] {
            assert!(matches!(
                frame_message(b"x", false, opcode, MAX),
                Err(AppError::InvalidValue(_))
            ));
            assert!(frame_message(b"", false, opcode, MAX).is_ok());
        }
        assert!(frame_message(b"x", false, OpCode::Continuation, MAX).is_ok());
    }

    #[test]
    fn test_frame_oversize() {
        let framer = WebSocketFramer::new(4);
        assert!(matches!(
            framer.frame(&[0; 5], false, OpCode::Binary),
            Err(AppError::OversizeMessage { size: 5, max: 4 })
        ));
    }

    #[test]
    fn test_declared_oversize_poisons() {
        let mut framer = WebSocketFramer::new(100);
        // 16-bit length code declaring 300 bytes
        let err = framer
            .receive_data(&[0x82, 126, 0x01, 0x2C], |_| {})
            .unwrap_err();
        assert!(matches!(err, AppError::OversizeMessage { size: 300, .. }));

        let ok = frame_message(b"a", false, OpCode::Text, 100).unwrap();
        assert!(framer.receive_data(&ok, |_| {}).is_err());
    }

    #[test]
    fn test_byte_at_a_time_with_empty_frames() {
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&frame_message(b"", true, OpCode::Ping, MAX).unwrap());
        wire.extend_from_slice(&frame_message(&[9; 300], true, OpCode::Binary, MAX).unwrap());
        wire.extend_from_slice(&frame_message(b"", false, OpCode::Text, MAX).unwrap());

        let mut framer = WebSocketFramer::new(MAX);
        let mut frames = Vec::new();
        for byte in wire.iter() {
            framer
                .receive_data(std::slice::from_ref(byte), |f| frames.push(f))
                .unwrap();
        }
        let frames: Vec<WebSocketFrame> = frames
            .into_iter()
            .map(|f| WebSocketFrame::parse(f).unwrap())
            .collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].opcode, OpCode::Ping);
        assert_eq!(&frames[1].payload[..], &[9; 300][..]);
        assert_eq!(frames[2].opcode, OpCode::Text);
        assert!(frames[2].payload.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_headers() {
        // reserved bit
        assert!(WebSocketFrame::parse(BytesMut::from(&[0xC1, 0x00][..])).is_err());
        // unknown opcode
        assert!(WebSocketFrame::parse(BytesMut::from(&[0x83, 0x00][..])).is_err());
        // fragmented ping
        assert!(WebSocketFrame::parse(BytesMut::from(&[0x09, 0x00][..])).is_err());
        // length mismatch
        assert!(WebSocketFrame::parse(BytesMut::from(&[0x82, 0x02, 0x01][..])).is_err());
    }

    #[test]
    fn test_encode_allows_control_payload() {
        let pong = WebSocketFrame::new(true, OpCode::Pong, Bytes::from_static(b"beat"));
        let parsed = WebSocketFrame::parse(pong.encode(None)).unwrap();
        assert_eq!(parsed, pong);
    }
}
