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

//! Hessian 2.0 scalar values used by dubbo payloads: null, 32-bit int and string.
//!
//! Encoders append to a flat output buffer and return the number of bytes written.
//! Decoders look at the start of `buf` and return the value together with the
//! number of bytes it occupied, or `None` when the bytes are not a complete value
//! of the requested type.
//!
//! ref: http://hessian.caucho.com/doc/hessian-serialization.html

use std::fmt::{self, Display};

use crate::bytes::{read_i32_be, read_u16_be};
use consts::*;

#[derive(Debug, Clone, PartialEq)]
pub enum HessianValue {
    Null,
    Int(i32),
    String(String),
}

impl Display for HessianValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HessianValue::Null => write!(f, ""),
            HessianValue::Int(i) => write!(f, "{}", i),
            HessianValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl HessianValue {
    pub fn encode(&self, out: &mut Vec<u8>) -> usize {
        match self {
            HessianValue::Null => encode_null(out),
            HessianValue::Int(i) => encode_int(*i, out),
            HessianValue::String(s) => encode_string(s, out),
        }
    }

    pub fn decode(buf: &[u8]) -> Option<(HessianValue, usize)> {
        let tag = *buf.first()?;
        match tag {
            BC_NULL => Some((HessianValue::Null, 1)),
            0x80..=0xd7 | BC_INT => decode_int(buf).map(|(v, n)| (HessianValue::Int(v), n)),
            BC_STRING_DIRECT..=STRING_DIRECT_MAX
            | BC_STRING_SHORT..=BC_STRING_SHORT_MAX
            | BC_STRING_CHUNK
            | BC_STRING => decode_string(buf).map(|(v, n)| (HessianValue::String(v), n)),
            _ => None,
        }
    }
}

pub fn encode_null(out: &mut Vec<u8>) -> usize {
    out.push(BC_NULL);
    1
}

pub fn decode_null(buf: &[u8]) -> bool {
    buf.first() == Some(&BC_NULL)
}

pub fn encode_int(val: i32, out: &mut Vec<u8>) -> usize {
    if INT_DIRECT_MIN <= val && val <= INT_DIRECT_MAX {
        out.push((val + BC_INT_ZERO as i32) as u8);
        1
    } else if INT_BYTE_MIN <= val && val <= INT_BYTE_MAX {
        out.push(((val >> 8) + BC_INT_BYTE_ZERO as i32) as u8);
        out.push(val as u8);
        2
    } else if INT_SHORT_MIN <= val && val <= INT_SHORT_MAX {
        out.push(((val >> 16) + BC_INT_SHORT_ZERO as i32) as u8);
        out.push((val >> 8) as u8);
        out.push(val as u8);
        3
    } else {
        out.push(BC_INT);
        out.extend_from_slice(&val.to_be_bytes());
        5
    }
}

// https://github.com/apache/dubbo-go-hessian2/blob/master/int.go#L60
pub fn decode_int(buf: &[u8]) -> Option<(i32, usize)> {
    let tag = *buf.first()?;
    match tag {
        0x80..=0xbf => Some((tag as i32 - BC_INT_ZERO as i32, 1)),
        0xc0..=0xcf => {
            let b0 = *buf.get(1)? as i32;
            Some((((tag as i32 - BC_INT_BYTE_ZERO as i32) << 8) | b0, 2))
        }
        0xd0..=0xd7 => {
            let b0 = *buf.get(1)? as i32;
            let b1 = *buf.get(2)? as i32;
            Some((
                ((tag as i32 - BC_INT_SHORT_ZERO as i32) << 16) | (b0 << 8) | b1,
                3,
            ))
        }
        BC_INT => Some((read_i32_be(buf.get(1..5)?), 5)),
        _ => None,
    }
}

// Lengths count UTF-16 code units, as the Java side does.
fn utf16_len(s: &str) -> usize {
    s.chars().map(char::len_utf16).sum()
}

pub fn encode_string(s: &str, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    let total = utf16_len(s);
    if total <= STRING_DIRECT_MAX_LEN {
        out.push(BC_STRING_DIRECT + total as u8);
        out.extend_from_slice(s.as_bytes());
        return out.len() - start;
    }
    if total <= STRING_SHORT_MAX_LEN {
        out.push(BC_STRING_SHORT + (total >> 8) as u8);
        out.push(total as u8);
        out.extend_from_slice(s.as_bytes());
        return out.len() - start;
    }

    let mut rest = s;
    loop {
        // split on char boundaries so a chunk never exceeds STRING_MAX_LEN units
        let mut units = 0;
        let mut split = rest.len();
        for (i, c) in rest.char_indices() {
            if units + c.len_utf16() > STRING_MAX_LEN {
                split = i;
                break;
            }
            units += c.len_utf16();
        }
        let (chunk, tail) = rest.split_at(split);
        out.push(if tail.is_empty() {
            BC_STRING
        } else {
            BC_STRING_CHUNK
        });
        out.extend_from_slice(&(units as u16).to_be_bytes());
        out.extend_from_slice(chunk.as_bytes());
        if tail.is_empty() {
            break;
        }
        rest = tail;
    }
    out.len() - start
}

// Reads `units` UTF-16 code units worth of UTF-8 text, returns the text and its byte length.
fn read_utf8_units(buf: &[u8], units: usize) -> Option<(&str, usize)> {
    let mut offset = 0;
    let mut counted = 0;
    while counted < units {
        let lead = *buf.get(offset)?;
        let width = match lead {
            0x00..=0x7f => 1,
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => return None,
        };
        let c = std::str::from_utf8(buf.get(offset..offset + width)?).ok()?;
        counted += c.chars().next()?.len_utf16();
        offset += width;
    }
    if counted != units {
        return None;
    }
    let text = std::str::from_utf8(&buf[..offset]).ok()?;
    Some((text, offset))
}

// https://github.com/apache/dubbo-go-hessian2/blob/master/string.go#L204
pub fn decode_string(buf: &[u8]) -> Option<(String, usize)> {
    let mut result = String::new();
    let mut offset = 0;
    loop {
        let tag = *buf.get(offset)?;
        let (units, header) = match tag {
            BC_STRING_DIRECT..=STRING_DIRECT_MAX => ((tag - BC_STRING_DIRECT) as usize, 1),
            BC_STRING_SHORT..=BC_STRING_SHORT_MAX => {
                let low = *buf.get(offset + 1)? as usize;
                ((((tag - BC_STRING_SHORT) as usize) << 8) + low, 2)
            }
            BC_STRING_CHUNK | BC_STRING => {
                (read_u16_be(buf.get(offset + 1..offset + 3)?) as usize, 3)
            }
            _ => return None,
        };
        offset += header;
        let (text, len) = read_utf8_units(buf.get(offset..)?, units)?;
        result.push_str(text);
        offset += len;
        if tag != BC_STRING_CHUNK {
            break;
        }
    }
    Some((result, offset))
}

pub mod consts {
    pub const BC_NULL: u8 = b'N'; // x4e

    pub const BC_STRING: u8 = b'S'; // final string
    pub const BC_STRING_CHUNK: u8 = b'R'; // non-final string
    pub const BC_STRING_DIRECT: u8 = 0x00;
    pub const STRING_DIRECT_MAX: u8 = 0x1f;
    pub const BC_STRING_SHORT: u8 = 0x30;
    pub const BC_STRING_SHORT_MAX: u8 = 0x33; // STRING_SHORT_MAX >> 8 | BC_STRING_SHORT

    pub const STRING_DIRECT_MAX_LEN: usize = 0x1f;
    pub const STRING_SHORT_MAX_LEN: usize = 0x3ff;
    pub const STRING_MAX_LEN: usize = 0xffff;

    pub const BC_INT: u8 = b'I'; // 32-bit int
    pub const BC_INT_ZERO: u8 = 0x90;
    pub const BC_INT_BYTE_ZERO: u8 = 0xc8;
    pub const BC_INT_SHORT_ZERO: u8 = 0xd4;
    pub const INT_DIRECT_MIN: i32 = -0x10;
    pub const INT_DIRECT_MAX: i32 = 0x2f;
    pub const INT_BYTE_MIN: i32 = -0x800;
    pub const INT_BYTE_MAX: i32 = 0x7ff;
    pub const INT_SHORT_MIN: i32 = -0x40000;
    pub const INT_SHORT_MAX: i32 = 0x3ffff;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null() {
        let mut out = vec![];
        assert_eq!(encode_null(&mut out), 1);
        assert_eq!(out, vec![b'N']);
        assert!(decode_null(&out));
        assert!(!decode_null(&[]));
        assert!(!decode_null(&[0x90]));
    }

    #[test]
    fn int_encoding_widths() {
        let cases: Vec<(i32, Vec<u8>)> = vec![
            (0, vec![0x90]),
            (-16, vec![0x80]),
            (47, vec![0xbf]),
            (48, vec![0xc8, 0x30]),
            (-2048, vec![0xc0, 0x00]),
            (2047, vec![0xcf, 0xff]),
            (-256, vec![0xc7, 0x00]),
            (262143, vec![0xd7, 0xff, 0xff]),
            (-262144, vec![0xd0, 0x00, 0x00]),
            (262144, vec![b'I', 0x00, 0x04, 0x00, 0x00]),
            (i32::MIN, vec![b'I', 0x80, 0x00, 0x00, 0x00]),
        ];
        for (value, expected) in cases {
            let mut out = vec![];
            let n = encode_int(value, &mut out);
            assert_eq!(out, expected, "encoding {}", value);
            assert_eq!(n, expected.len());
            assert_eq!(decode_int(&out), Some((value, n)), "decoding {}", value);
        }
    }

    #[test]
    fn int_decode_truncated() {
        assert_eq!(decode_int(&[]), None);
        assert_eq!(decode_int(&[0xc8]), None);
        assert_eq!(decode_int(&[0xd4, 0x01]), None);
        assert_eq!(decode_int(&[b'I', 0, 0, 0]), None);
        assert_eq!(decode_int(&[b'N']), None);
    }

    #[test]
    fn strings() {
        let mut out = vec![];
        assert_eq!(encode_string("hello", &mut out), 6);
        assert_eq!(out[0], 0x05);
        assert_eq!(decode_string(&out), Some(("hello".to_owned(), 6)));

        let medium = "a".repeat(300);
        out.clear();
        let n = encode_string(&medium, &mut out);
        assert_eq!(&out[..2], &[0x31, 0x2c]);
        assert_eq!(decode_string(&out), Some((medium, n)));

        let long = "b".repeat(70000);
        out.clear();
        let n = encode_string(&long, &mut out);
        assert_eq!(out[0], BC_STRING_CHUNK);
        assert_eq!(decode_string(&out), Some((long, n)));

        let unicode = "数据库";
        out.clear();
        let n = encode_string(unicode, &mut out);
        assert_eq!(out[0], 0x03);
        assert_eq!(decode_string(&out), Some((unicode.to_owned(), n)));
    }

    #[test]
    fn string_decode_rejects_short_payload() {
        assert_eq!(decode_string(&[0x05, b'a', b'b']), None);
        assert_eq!(decode_string(&[b'S', 0x00]), None);
        assert_eq!(decode_string(&[b'R', 0x00, 0x01, b'a']), None);
    }

    #[test]
    fn tagged_values() {
        let mut out = vec![];
        HessianValue::Null.encode(&mut out);
        HessianValue::Int(-300).encode(&mut out);
        HessianValue::String("dubbo".to_owned()).encode(&mut out);

        let mut offset = 0;
        let mut values = vec![];
        while let Some((v, n)) = HessianValue::decode(&out[offset..]) {
            values.push(v);
            offset += n;
        }
        assert_eq!(offset, out.len());
        assert_eq!(
            values,
            vec![
                HessianValue::Null,
                HessianValue::Int(-300),
                HessianValue::String("dubbo".to_owned())
            ]
        );
        assert_eq!(values[2].to_string(), "dubbo");
    }
}
