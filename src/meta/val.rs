//! Typed values projected out of on-disk column bytes.

use std::fmt;

use chrono::DateTime;
use log::debug;

use crate::meta::def::{ColumnDef, DataTypes, MysqlTypes};
use crate::util;

/// MySQL 5.6 packs TIME into hour/minute/second bit fields; older
/// servers store a second counter.
const MYSQL56_TIME_LAYOUT: bool = true;

/// A decoded column value. The SQL formatter pattern-matches this
/// instead of downcasting untyped boxes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Str(String),
    Date(String),
    Time(String),
    DateTime(String),
    Timestamp(String),
    /// Lowercase hex of the raw bytes; rendered through unhex().
    HexBlob(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Str(s)
            | Value::Date(s)
            | Value::Time(s)
            | Value::DateTime(s)
            | Value::Timestamp(s)
            | Value::HexBlob(s) => write!(f, "{}", s),
        }
    }
}

impl ColumnDef {
    /// Decode one field slice into a typed value following the
    /// column's main and precise types. `data` is exactly the field
    /// bytes cut out by the offsets vector or the undo parser.
    pub fn parse_value(&self, data: &[u8]) -> Value {
        let fixed = self.fixed_length() as usize;
        match self.main_type {
            DataTypes::VARCHAR | DataTypes::CHAR | DataTypes::VARMYSQL => str_value(data),
            DataTypes::MYSQL => {
                // fixed char, strip the space padding
                let s = String::from_utf8_lossy(data);
                Value::Str(s.trim_end_matches(' ').to_string())
            }
            DataTypes::INT => match self.mysql_type {
                MysqlTypes::DATE => parse_date(data),
                MysqlTypes::YEAR => match data.first() {
                    Some(b) => Value::UInt(*b as u64 + 1900),
                    None => Value::Null,
                },
                _ => {
                    if self.is_unsigned {
                        parse_uint(data, fixed)
                    } else {
                        parse_int(data, fixed)
                    }
                }
            },
            DataTypes::FLOAT => parse_float(data),
            DataTypes::DOUBLE => parse_double(data),
            DataTypes::FIXBINARY => match self.mysql_type {
                MysqlTypes::TIME => parse_time(data),
                MysqlTypes::TIMESTAMP => parse_timestamp(data),
                MysqlTypes::DATETIME => parse_datetime(data),
                MysqlTypes::BIT => parse_uint(data, fixed),
                MysqlTypes::STRING => Value::HexBlob(hex::encode(data)),
                // NEWDECIMAL and the rest fall back to the raw string
                _ => str_value(data),
            },
            DataTypes::BINARY => match self.mysql_type {
                MysqlTypes::VARCHAR => Value::HexBlob(hex::encode(data)),
                _ => {
                    if fixed != 0 {
                        parse_uint(data, fixed)
                    } else {
                        str_value(data)
                    }
                }
            },
            DataTypes::BLOB => {
                if self.is_binary {
                    Value::HexBlob(hex::encode(data))
                } else {
                    str_value(data)
                }
            }
            DataTypes::DECIMAL => {
                debug!("decimal column {} is not decoded", self.col_name);
                Value::Null
            }
            // MISSING and the system types carry no SQL value
            _ => Value::Null,
        }
    }
}

fn str_value(data: &[u8]) -> Value {
    Value::Str(String::from_utf8_lossy(data).into_owned())
}

/// Signed integer stored with the sign bit flipped so that the byte
/// order collates numerically.
fn parse_int(data: &[u8], width: usize) -> Value {
    if width == 0 || data.len() < width {
        return Value::Null;
    }
    match width {
        1 => Value::Int((data[0] ^ 0x80) as i8 as i64),
        2 => Value::Int((util::u16_val(data, 0) ^ 0x8000) as i16 as i64),
        3 => {
            let v = util::u24_val(data, 0);
            if v >> 23 == 1 {
                Value::Int((v & 0x007F_FFFF) as i64)
            } else {
                Value::Int((v as i64) ^ (-1i64 << 23))
            }
        }
        4 => Value::Int((util::u32_val(data, 0) ^ 0x8000_0000) as i32 as i64),
        8 => Value::Int((util::u64_val(data, 0) ^ 0x8000_0000_0000_0000) as i64),
        _ => Value::Int(0),
    }
}

fn parse_uint(data: &[u8], width: usize) -> Value {
    if width == 0 || data.len() < width {
        return Value::Null;
    }
    let mut v = 0u64;
    for b in &data[..width.min(8)] {
        v = (v << 8) | *b as u64;
    }
    Value::UInt(v)
}

/// 3 byte DATE: day in the low 5 bits, month in the next 4, year
/// above.
fn parse_date(data: &[u8]) -> Value {
    if data.len() < 3 {
        return Value::Null;
    }
    let mut v = util::u24_val(data, 0) & !(1 << 23);
    let day = v % 32;
    v /= 32;
    let month = v % 16;
    v /= 16;
    Value::Date(format!("{:04}-{:02}-{:02}", v, month, day))
}

/// 3 byte TIME biased by 0x800000 for the sign.
fn parse_time(data: &[u8]) -> Value {
    if data.len() < 3 {
        return Value::Null;
    }
    let mut t = util::u24_val(data, 0) as i64 - 0x80_0000;
    let negative = t < 0;
    if negative {
        t = -t;
    }
    let (hour, min, sec) = if MYSQL56_TIME_LAYOUT {
        ((t >> 12) & 0x3FF, (t >> 6) & 0x3F, t & 0x3F)
    } else {
        ((t / 3600) % 24, (t / 60) % 60, t % 60)
    };
    let text = format!("{:02}:{:02}:{:02}", hour, min, sec);
    Value::Time(if negative { format!("-{}", text) } else { text })
}

/// 4 byte TIMESTAMP, seconds since the UNIX epoch.
fn parse_timestamp(data: &[u8]) -> Value {
    if data.len() < 4 {
        return Value::Null;
    }
    let secs = util::u32_val(data, 0) as i64;
    match DateTime::from_timestamp(secs, 0) {
        Some(dt) => Value::Timestamp(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        None => Value::Null,
    }
}

fn in_datetime_range(year: u64, month: u64, day: u64, hour: u64, min: u64, sec: u64) -> bool {
    year > 1990
        && year < 2100
        && (1..=12).contains(&month)
        && (1..=31).contains(&day)
        && hour <= 23
        && min <= 59
        && sec <= 59
}

/// 8 byte DATETIME. Two encodings exist in the wild: packed decimal
/// digits, and the 5.6 bit-packed layout flagged by the sign bit.
/// Both are tried with sanity-checked field ranges.
fn parse_datetime(data: &[u8]) -> Value {
    if data.len() < 8 {
        return Value::Null;
    }
    let d = util::u64_val(data, 0);

    let mut r = d & !(1 << 63);
    let sec = r % 100;
    r /= 100;
    let min = r % 100;
    r /= 100;
    let hour = r % 100;
    r /= 100;
    let day = r % 100;
    r /= 100;
    let month = r % 100;
    r /= 100;
    let year = r % 10000;
    let decimal = format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year, month, day, hour, min, sec
    );
    if in_datetime_range(year, month, day, hour, min, sec) {
        return Value::DateTime(decimal);
    }

    if d >> 63 == 1 {
        let yd = (d & 0x7FFF_C000_0000_0000) >> 46;
        let year = yd / 13;
        let month = yd - year * 13;
        let day = (d & 0x0000_3E00_0000_0000) >> 41;
        let hour = (d & 0x0000_01F0_0000_0000) >> 36;
        let min = (d & 0x0000_000F_C000_0000) >> 30;
        let sec = (d & 0x0000_0000_3F00_0000) >> 24;
        if in_datetime_range(year, month, day, hour, min, sec) {
            return Value::DateTime(format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, min, sec
            ));
        }
    }

    Value::DateTime(decimal)
}

fn parse_float(data: &[u8]) -> Value {
    if data.len() < 4 {
        return Value::Null;
    }
    let bits: [u8; 4] = data[..4].try_into().expect("ERR_READ_F32");
    Value::Float(f32::from_le_bytes(bits))
}

fn parse_double(data: &[u8]) -> Value {
    if data.len() < 8 {
        return Value::Null;
    }
    let bits: [u8; 8] = data[..8].try_into().expect("ERR_READ_F64");
    Value::Double(f64::from_le_bytes(bits))
}
