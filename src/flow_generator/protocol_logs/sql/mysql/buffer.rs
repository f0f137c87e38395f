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

use public::bytes::{read_u16_be, read_u16_le, read_u24_le, read_u32_le, read_u64_le};

use super::consts::*;
use crate::flow_generator::error::{Error, Result};

/// Read cursor over the payload of one MySQL packet.
///
/// Every read either returns exactly the bytes it asked for and advances the cursor, or
/// fails with `Error::Truncated` and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct Buffer<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Buffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(Error::Truncated { need: n, remaining });
        }
        let bs = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(bs)
    }

    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.offset).copied()
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.take(2).map(read_u16_le)
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        self.take(2).map(read_u16_be)
    }

    pub fn read_u24_le(&mut self) -> Result<u32> {
        self.take(3).map(read_u24_le)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.take(4).map(read_u32_le)
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        self.take(8).map(read_u64_le)
    }

    pub fn read_str(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Bytes before the next NUL, the NUL itself is consumed too.
    pub fn read_cstr(&mut self) -> Result<&'a [u8]> {
        let rest = &self.data[self.offset..];
        match rest.iter().position(|&b| b == 0) {
            Some(pos) => {
                self.offset += pos + 1;
                Ok(&rest[..pos])
            }
            None => Err(Error::Truncated {
                need: rest.len() + 1,
                remaining: rest.len(),
            }),
        }
    }

    /// Like `read_cstr` but accepts a string running to the end of the packet.
    ///
    /// Some servers leave the terminator off the last field of a packet.
    pub fn read_cstr_or_rest(&mut self) -> &'a [u8] {
        match self.read_cstr() {
            Ok(s) => s,
            Err(_) => self.rest(),
        }
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let bs = &self.data[self.offset..];
        self.offset = self.data.len();
        bs
    }

    /// Length-encoded integer. `Ok(None)` is the 0xfb NULL marker.
    pub fn read_lenenc_int(&mut self) -> Result<Option<u64>> {
        let start = self.offset;
        let value = match self.read_u8()? {
            INT_FLAGS_NULL => return Ok(None),
            INT_FLAGS_2 => self.read_u16_le().map(|v| v as u64),
            INT_FLAGS_3 => self.read_u24_le().map(|v| v as u64),
            INT_FLAGS_8 => self.read_u64_le(),
            b => Ok(b as u64),
        };
        if value.is_err() {
            self.offset = start;
        }
        value.map(Some)
    }

    /// Width in bytes of the length-encoded integer at the cursor, nothing is consumed.
    pub fn peek_lenenc_len(&self) -> Result<usize> {
        match self.peek_u8() {
            Some(INT_FLAGS_2) => Ok(3),
            Some(INT_FLAGS_3) => Ok(4),
            Some(INT_FLAGS_8) => Ok(9),
            Some(_) => Ok(1),
            None => Err(Error::Truncated {
                need: 1,
                remaining: 0,
            }),
        }
    }

    /// Length-encoded string. `Ok(None)` is the 0xfb NULL marker.
    pub fn read_lenenc_str(&mut self) -> Result<Option<&'a [u8]>> {
        let start = self.offset;
        let Some(len) = self.read_lenenc_int()? else {
            return Ok(None);
        };
        if len > self.remaining() as u64 {
            let remaining = self.remaining();
            self.offset = start;
            return Err(Error::Truncated {
                need: len as usize,
                remaining,
            });
        }
        self.take(len as usize).map(Some)
    }

    /// Length prefix of a string typed execute parameter.
    ///
    /// Only 0xfc and 0xfd are markers here, 0xfb and 0xfe are plain one byte lengths.
    pub fn read_param_len(&mut self) -> Result<usize> {
        let start = self.offset;
        let len = match self.read_u8()? {
            INT_FLAGS_2 => self.read_u16_le().map(|v| v as usize),
            INT_FLAGS_3 => self.read_u24_le().map(|v| v as usize),
            b => Ok(b as usize),
        };
        if len.is_err() {
            self.offset = start;
        }
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_reads() {
        let data = [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
            0x0f, 0x10, 0x11, 0x12,
        ];
        let mut buf = Buffer::new(&data);
        assert_eq!(buf.read_u8().unwrap(), 0x01);
        assert_eq!(buf.read_u16_le().unwrap(), 0x0302);
        assert_eq!(buf.read_u24_le().unwrap(), 0x060504);
        assert_eq!(buf.read_u32_le().unwrap(), 0x0a090807);
        assert_eq!(buf.read_u64_le().unwrap(), 0x1211100f0e0d0c0b);
        assert_eq!(buf.remaining(), 0);
        assert_eq!(buf.offset(), data.len());
    }

    #[test]
    fn truncated_read_keeps_cursor() {
        let data = [0x01, 0x02];
        let mut buf = Buffer::new(&data);
        assert_eq!(
            buf.read_u32_le(),
            Err(Error::Truncated {
                need: 4,
                remaining: 2
            })
        );
        assert_eq!(buf.remaining(), 2);
        assert_eq!(buf.skip(3), Err(Error::Truncated { need: 3, remaining: 2 }));
        assert_eq!(buf.read_u16_le().unwrap(), 0x0201);
        assert!(buf.read_u8().is_err());
        assert_eq!(buf.peek_u8(), None);
    }

    #[test]
    fn cstr() {
        let data = b"root\0test";
        let mut buf = Buffer::new(data);
        assert_eq!(buf.read_cstr().unwrap(), b"root");
        assert_eq!(buf.remaining(), 4);
        assert!(matches!(buf.read_cstr(), Err(Error::Truncated { .. })));
        assert_eq!(buf.remaining(), 4);
        assert_eq!(buf.read_cstr_or_rest(), b"test");
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn lenenc_int_single_byte() {
        for b in 0x00..=0xfau8 {
            let data = [b, 0xff];
            let mut buf = Buffer::new(&data);
            assert_eq!(buf.read_lenenc_int().unwrap(), Some(b as u64));
            assert_eq!(buf.offset(), 1);
        }
    }

    #[test]
    fn lenenc_int_wide() {
        let mut buf = Buffer::new(&[0xfc, 0x34, 0x12]);
        assert_eq!(buf.read_lenenc_int().unwrap(), Some(0x1234));
        assert_eq!(buf.offset(), 3);

        let mut buf = Buffer::new(&[0xfd, 0x56, 0x34, 0x12]);
        assert_eq!(buf.read_lenenc_int().unwrap(), Some(0x123456));
        assert_eq!(buf.offset(), 4);

        let mut buf = Buffer::new(&[0xfe, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(buf.read_lenenc_int().unwrap(), Some(0x0807060504030201));
        assert_eq!(buf.offset(), 9);

        let mut buf = Buffer::new(&[0xfb]);
        assert_eq!(buf.read_lenenc_int().unwrap(), None);
        assert_eq!(buf.offset(), 1);

        let mut buf = Buffer::new(&[0xfd, 0x01]);
        assert!(buf.read_lenenc_int().is_err());
        assert_eq!(buf.offset(), 0);
    }

    #[test]
    fn peek_lenenc_len() {
        assert_eq!(Buffer::new(&[0x05]).peek_lenenc_len().unwrap(), 1);
        assert_eq!(Buffer::new(&[0xfb]).peek_lenenc_len().unwrap(), 1);
        assert_eq!(Buffer::new(&[0xfc]).peek_lenenc_len().unwrap(), 3);
        assert_eq!(Buffer::new(&[0xfd]).peek_lenenc_len().unwrap(), 4);
        assert_eq!(Buffer::new(&[0xfe]).peek_lenenc_len().unwrap(), 9);
        assert!(Buffer::new(&[]).peek_lenenc_len().is_err());
    }

    #[test]
    fn lenenc_str() {
        let mut buf = Buffer::new(&[0x02, b'a', b'b', 0xfb, 0x03, b'c']);
        assert_eq!(buf.read_lenenc_str().unwrap(), Some(&b"ab"[..]));
        assert_eq!(buf.read_lenenc_str().unwrap(), None);
        assert_eq!(
            buf.read_lenenc_str(),
            Err(Error::Truncated {
                need: 3,
                remaining: 1
            })
        );
        assert_eq!(buf.remaining(), 2);
    }

    #[test]
    fn param_len_differs_from_lenenc() {
        // 0xfb is a NULL marker for the general encoding but a length here
        let data = [0xfb];
        assert_eq!(Buffer::new(&data).read_param_len().unwrap(), 0xfb);
        assert_eq!(Buffer::new(&data).read_lenenc_int().unwrap(), None);

        // 0xfe is a one byte length here, not an 8 byte prefix
        let data = [0xfe, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut buf = Buffer::new(&data);
        assert_eq!(buf.read_param_len().unwrap(), 0xfe);
        assert_eq!(buf.offset(), 1);
        let mut buf = Buffer::new(&data);
        assert_eq!(buf.read_lenenc_int().unwrap(), Some(1));
        assert_eq!(buf.offset(), 9);

        let mut buf = Buffer::new(&[0xfc, 0x00, 0x01]);
        assert_eq!(buf.read_param_len().unwrap(), 0x100);
        assert_eq!(buf.offset(), 3);
        let mut buf = Buffer::new(&[0xfd, 0x00, 0x00, 0x01]);
        assert_eq!(buf.read_param_len().unwrap(), 0x10000);
        assert_eq!(buf.offset(), 4);
        let mut buf = Buffer::new(&[0x10]);
        assert_eq!(buf.read_param_len().unwrap(), 0x10);
    }
}
