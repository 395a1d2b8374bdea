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

/// Mask key used for every outbound masked frame.
///
/// Kept constant for wire compatibility with existing peers and test vectors,
/// this is the key of the RFC 6455 section 5.7 examples.
pub const FIXED_MASK_KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

/// XOR `buf` with the 4-byte `mask`, cycling the key every 4 bytes.
///
/// Masking is an involution: applying the same key twice restores the input.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}
