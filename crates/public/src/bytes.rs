/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

// Readers assert on short input, callers decoding untrusted payloads check the length first.

pub fn read_u16_be(bs: &[u8]) -> u16 {
    assert!(bs.len() >= 2);
    u16::from_be_bytes([bs[0], bs[1]])
}

pub fn read_u16_le(bs: &[u8]) -> u16 {
    assert!(bs.len() >= 2);
    u16::from_le_bytes([bs[0], bs[1]])
}

pub fn read_u24_le(bs: &[u8]) -> u32 {
    assert!(bs.len() >= 3);
    bs[0] as u32 | (bs[1] as u32) << 8 | (bs[2] as u32) << 16
}

pub fn read_u32_be(bs: &[u8]) -> u32 {
    assert!(bs.len() >= 4);
    u32::from_be_bytes([bs[0], bs[1], bs[2], bs[3]])
}

pub fn read_u32_le(bs: &[u8]) -> u32 {
    assert!(bs.len() >= 4);
    u32::from_le_bytes([bs[0], bs[1], bs[2], bs[3]])
}

pub fn read_i32_be(bs: &[u8]) -> i32 {
    read_u32_be(bs) as i32
}

pub fn read_u64_le(bs: &[u8]) -> u64 {
    assert!(bs.len() >= 8);
    let mut b = [0u8; 8];
    b.copy_from_slice(&bs[..8]);
    u64::from_le_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_widths() {
        let bs = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_u16_le(&bs), 0x0201);
        assert_eq!(read_u24_le(&bs), 0x030201);
        assert_eq!(read_u32_le(&bs), 0x04030201);
        assert_eq!(read_u64_le(&bs), 0x0807060504030201);
        assert_eq!(read_u24_le(&[0xff, 0xff, 0xff, 0x01]), 0xffffff);
    }

    #[test]
    fn big_endian_widths() {
        assert_eq!(read_u16_be(&[0x12, 0x34]), 0x1234);
        assert_eq!(read_u32_be(&[0xde, 0xad, 0xbe, 0xef]), 0xdeadbeef);
        assert_eq!(read_i32_be(&[0xff, 0xff, 0xff, 0xfe]), -2);
    }

    #[test]
    #[should_panic]
    fn short_input_panics() {
        read_u32_le(&[1, 2, 3]);
    }
}
