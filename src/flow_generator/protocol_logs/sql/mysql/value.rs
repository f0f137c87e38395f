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

use std::fmt;

use serde::Serialize;

use super::buffer::Buffer;
use super::consts::FieldType;
use crate::flow_generator::error::Result;

#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MysqlDateTime {
    // declared length, decides which fields were on the wire
    pub len: u8,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

impl fmt::Display for MysqlDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.len {
            0 => write!(f, "datetime 0000-00-00 00:00:00.000000"),
            1..=6 => write!(
                f,
                "datetime {:04}-{:02}-{:02}",
                self.year, self.month, self.day
            ),
            7..=10 => write!(
                f,
                "datetime {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                self.year, self.month, self.day, self.hour, self.minute, self.second
            ),
            _ => write!(
                f,
                "datetime {:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
                self.year,
                self.month,
                self.day,
                self.hour,
                self.minute,
                self.second,
                self.microsecond
            ),
        }
    }
}

#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MysqlTime {
    pub len: u8,
    pub negative: bool,
    pub days: u32,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

impl fmt::Display for MysqlTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.negative { "-" } else { "" };
        if (8..12).contains(&self.len) {
            write!(
                f,
                "time {}{}d {:02}:{:02}:{:02}",
                sign, self.days, self.hour, self.minute, self.second
            )
        } else {
            write!(
                f,
                "time {}{}d {:02}:{:02}:{:02}.{:06}",
                sign, self.days, self.hour, self.minute, self.second, self.microsecond
            )
        }
    }
}

/// Decoded value of one binary protocol parameter.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Tiny(i8),
    UnsignedTiny(u8),
    Short(i16),
    UnsignedShort(u16),
    Year(u16),
    Long(i32),
    UnsignedLong(u32),
    Int24(i32),
    UnsignedInt24(u32),
    LongLong(i64),
    UnsignedLongLong(u64),
    Float(f32),
    Double(f64),
    DateTime(MysqlDateTime),
    Time(MysqlTime),
    Bytes(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Tiny(n) => write!(f, "Tiny({})", n),
            Self::UnsignedTiny(n) => write!(f, "UnsignedTiny({})", n),
            Self::Short(n) => write!(f, "Short({})", n),
            Self::UnsignedShort(n) => write!(f, "UnsignedShort({})", n),
            Self::Year(n) => write!(f, "Years({})", n),
            Self::Long(n) => write!(f, "Long({})", n),
            Self::UnsignedLong(n) => write!(f, "UnsignedLong({})", n),
            Self::Int24(n) => write!(f, "Int24({})", n),
            Self::UnsignedInt24(n) => write!(f, "UnsignedInt24({})", n),
            Self::LongLong(n) => write!(f, "LongLong({})", n),
            Self::UnsignedLongLong(n) => write!(f, "UnsignedLongLong({})", n),
            Self::Float(n) => write!(f, "Float({})", n),
            Self::Double(n) => write!(f, "Double({})", n),
            Self::DateTime(d) => write!(f, "{}", d),
            Self::Time(t) => write!(f, "{}", t),
            Self::Bytes(s) => write!(f, "{}", s),
        }
    }
}

/// Decodes one value of wire type `field_type`.
///
/// `Ok(None)` means the type has no decoder, the caller can not know how many bytes
/// the value spans and must stop.
pub fn decode_param(
    buf: &mut Buffer,
    field_type: u8,
    unsigned: bool,
) -> Result<Option<ParamValue>> {
    let Ok(field_type) = FieldType::try_from(field_type) else {
        return Ok(None);
    };
    let value = match (field_type, unsigned) {
        (FieldType::Null, _) => ParamValue::Null,
        (FieldType::Tiny, false) => ParamValue::Tiny(buf.read_u8()? as i8),
        (FieldType::Tiny, true) => ParamValue::UnsignedTiny(buf.read_u8()?),
        (FieldType::Short, false) => ParamValue::Short(buf.read_u16_le()? as i16),
        (FieldType::Short, true) => ParamValue::UnsignedShort(buf.read_u16_le()?),
        (FieldType::Year, _) => ParamValue::Year(buf.read_u16_le()?),
        (FieldType::Long, false) => ParamValue::Long(buf.read_u32_le()? as i32),
        (FieldType::Long, true) => ParamValue::UnsignedLong(buf.read_u32_le()?),
        // int24 is sent in a 4 byte slot
        (FieldType::Int24, false) => ParamValue::Int24(buf.read_u32_le()? as i32),
        (FieldType::Int24, true) => ParamValue::UnsignedInt24(buf.read_u32_le()?),
        (FieldType::LongLong, false) => ParamValue::LongLong(buf.read_u64_le()? as i64),
        (FieldType::LongLong, true) => ParamValue::UnsignedLongLong(buf.read_u64_le()?),
        (FieldType::Float, _) => ParamValue::Float(f32::from_bits(buf.read_u32_le()?)),
        (FieldType::Double, _) => ParamValue::Double(f64::from_bits(buf.read_u64_le()?)),
        (FieldType::Date | FieldType::Datetime | FieldType::Timestamp, _) => {
            ParamValue::DateTime(decode_datetime(buf)?)
        }
        (FieldType::Time, _) => ParamValue::Time(decode_time(buf)?),
        (
            FieldType::Decimal
            | FieldType::NewDecimal
            | FieldType::Varchar
            | FieldType::Bit
            | FieldType::Json
            | FieldType::Enum
            | FieldType::Set
            | FieldType::TinyBlob
            | FieldType::MediumBlob
            | FieldType::LongBlob
            | FieldType::Blob
            | FieldType::VarString
            | FieldType::String
            | FieldType::Geometry,
            _,
        ) => {
            let mut scan = buf.clone();
            let len = scan.read_param_len()?;
            let s = scan.read_str(len)?;
            *buf = scan;
            ParamValue::Bytes(String::from_utf8_lossy(s).into_owned())
        }
        (FieldType::NewDate, _) => return Ok(None),
    };
    Ok(Some(value))
}

// Fields present for each declared length:
//   >= 2 year, >= 4 month and day, >= 7 hour minute second, >= 11 microsecond
pub fn decode_datetime(buf: &mut Buffer) -> Result<MysqlDateTime> {
    let mut scan = buf.clone();
    let len = scan.read_u8()?;
    let mut dt = MysqlDateTime {
        len,
        ..Default::default()
    };
    let mut consumed = 0usize;
    if len >= 2 {
        dt.year = scan.read_u16_le()?;
        consumed += 2;
    }
    if len >= 4 {
        dt.month = scan.read_u8()?;
        dt.day = scan.read_u8()?;
        consumed += 2;
    }
    if len >= 7 {
        dt.hour = scan.read_u8()?;
        dt.minute = scan.read_u8()?;
        dt.second = scan.read_u8()?;
        consumed += 3;
    }
    if len >= 11 {
        dt.microsecond = scan.read_u32_le()?;
        consumed += 4;
    }
    // consumed never exceeds len, the rest of the declared bytes are skipped
    scan.skip(len as usize - consumed)?;
    *buf = scan;
    Ok(dt)
}

// Fields present for each declared length:
//   >= 1 sign, >= 5 days, >= 8 hour minute second, >= 12 microsecond
pub fn decode_time(buf: &mut Buffer) -> Result<MysqlTime> {
    let mut scan = buf.clone();
    let len = scan.read_u8()?;
    let mut t = MysqlTime {
        len,
        ..Default::default()
    };
    let mut consumed = 0usize;
    if len >= 1 {
        t.negative = scan.read_u8()? == 1;
        consumed += 1;
    }
    if len >= 5 {
        t.days = scan.read_u32_le()?;
        consumed += 4;
    }
    if len >= 8 {
        t.hour = scan.read_u8()?;
        t.minute = scan.read_u8()?;
        t.second = scan.read_u8()?;
        consumed += 3;
    }
    if len >= 12 {
        t.microsecond = scan.read_u32_le()?;
        consumed += 4;
    }
    scan.skip(len as usize - consumed)?;
    *buf = scan;
    Ok(t)
}
