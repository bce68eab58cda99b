use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Once;

use chrono::Local;
use log::LevelFilter;

use crate::error::{RecoveryError, Result};

static INIT_LOGGER_ONCE: Once = Once::new();

/// Map a LogLevel flag value to a level filter. The fatal level has
/// no counterpart in the log crate and maps to error.
fn level_filter(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" | "fatal" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

/// Initialize the logger once. When a log path is given the sink is
/// `<path>/db-recovery.log`, otherwise stderr. RUST_LOG wins over the
/// LogLevel flag when set.
pub fn init_logs(path: Option<&Path>, level: &str) {
    INIT_LOGGER_ONCE.call_once(|| {
        dotenv::dotenv().ok();

        let mut builder = env_logger::builder();
        builder.format(|buf, record| {
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.module_path().unwrap_or("unknown"),
                record.args()
            )
        });
        if std::env::var("RUST_LOG").is_err() {
            builder.filter_level(level_filter(level));
        }
        if let Some(dir) = path {
            if let Ok(file) = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("db-recovery.log"))
            {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
        }
        builder.init();
    })
}

pub fn init() {
    init_logs(None, "info")
}

/// Null flag bitmap size in bytes for `num` nullable columns.
pub fn align8(num: usize) -> usize {
    (num >> 3) + if (num & 0x7) > 0 { 1 } else { 0 }
}

pub fn u8_val(buf: &[u8], addr: usize) -> u8 {
    buf[addr]
}

pub fn u16_val(buf: &[u8], addr: usize) -> u16 {
    u16::from_be_bytes(buf[addr..addr + 2].try_into().expect("ERR_READ_VALUE_u16"))
}

pub fn u24_val(buf: &[u8], addr: usize) -> u32 {
    let arr = [0u8, buf[addr], buf[addr + 1], buf[addr + 2]];
    u32::from_be_bytes(arr)
}

pub fn u32_val(buf: &[u8], addr: usize) -> u32 {
    u32::from_be_bytes(buf[addr..addr + 4].try_into().expect("ERR_READ_VALUE_u32"))
}

/// 7 byte value, high 3 bytes shifted over the low 4.
pub fn u56_val(buf: &[u8], addr: usize) -> u64 {
    ((u24_val(buf, addr) as u64) << 32) | u32_val(buf, addr + 3) as u64
}

pub fn u64_val(buf: &[u8], addr: usize) -> u64 {
    u64::from_be_bytes(buf[addr..addr + 8].try_into().expect("ERR_READ_VALUE_u64"))
}

fn ensure(data: &[u8], pos: usize, need: usize) -> Result<()> {
    if pos + need > data.len() {
        return Err(RecoveryError::ShortBuffer {
            at: pos,
            need,
            have: data.len().saturating_sub(pos),
        });
    }
    Ok(())
}

pub fn read_u8(data: &[u8], pos: usize) -> Result<u64> {
    ensure(data, pos, 1)?;
    Ok(data[pos] as u64)
}

pub fn read_u16(data: &[u8], pos: usize) -> Result<u64> {
    ensure(data, pos, 2)?;
    Ok(u16_val(data, pos) as u64)
}

pub fn read_u24(data: &[u8], pos: usize) -> Result<u64> {
    ensure(data, pos, 3)?;
    Ok(u24_val(data, pos) as u64)
}

pub fn read_u32(data: &[u8], pos: usize) -> Result<u64> {
    ensure(data, pos, 4)?;
    Ok(u32_val(data, pos) as u64)
}

pub fn read_u56(data: &[u8], pos: usize) -> Result<u64> {
    ensure(data, pos, 7)?;
    Ok(u56_val(data, pos))
}

pub fn read_u64(data: &[u8], pos: usize) -> Result<u64> {
    ensure(data, pos, 8)?;
    Ok(u64_val(data, pos))
}

/// InnoDB compressed integer, see mach_read_compressed. Returns the
/// value and the number of bytes it occupied.
pub fn parse_compressed(data: &[u8], pos: usize) -> Result<(u64, usize)> {
    let flag = read_u8(data, pos)?;
    if flag < 0x80 {
        Ok((flag, 1))
    } else if flag < 0xC0 {
        Ok((read_u16(data, pos)? & 0x7FFF, 2))
    } else if flag < 0xE0 {
        Ok((read_u24(data, pos)? & 0x3FFFFF, 3))
    } else if flag < 0xF0 {
        Ok((read_u32(data, pos)? & 0x1FFFFFFF, 4))
    } else {
        Ok((read_u32(data, pos + 1)?, 5))
    }
}

/// Encoded width of `n`, the inverse of parse_compressed.
pub fn compressed_size(n: u64) -> usize {
    if n < 0x80 {
        1
    } else if n < 0x4000 {
        2
    } else if n < 0x200000 {
        3
    } else if n < 0x10000000 {
        4
    } else {
        5
    }
}

/// Encode `n` in the compressed format. Only 32 bit values fit.
pub fn encode_compressed(n: u64) -> Vec<u8> {
    match compressed_size(n) {
        1 => vec![n as u8],
        2 => (0x8000u16 | n as u16).to_be_bytes().to_vec(),
        3 => {
            let v = 0xC00000u32 | n as u32;
            v.to_be_bytes()[1..].to_vec()
        }
        4 => (0xE0000000u32 | n as u32).to_be_bytes().to_vec(),
        _ => {
            let mut out = vec![0xF0u8];
            out.extend_from_slice(&(n as u32).to_be_bytes());
            out
        }
    }
}

/// 64 bit much-compressed integer, see mach_u64_read_much_compressed:
/// a leading 0xFF marks a compressed high half followed by the
/// compressed low half.
pub fn parse_much_compressed(data: &[u8], pos: usize) -> Result<(u64, usize)> {
    if read_u8(data, pos)? != 0xFF {
        return parse_compressed(data, pos);
    }
    let (hi, hi_size) = parse_compressed(data, pos + 1)?;
    let (lo, lo_size) = parse_compressed(data, pos + 1 + hi_size)?;
    Ok(((hi << 32) | lo, 1 + hi_size + lo_size))
}

/// 64 bit compressed integer, see mach_u64_read_compressed: a
/// compressed high half followed by 4 plain bytes.
pub fn parse_u64_compressed(data: &[u8], pos: usize) -> Result<(u64, usize)> {
    let (hi, hi_size) = parse_compressed(data, pos)?;
    let lo = read_u32(data, pos + hi_size)?;
    Ok(((hi << 32) | lo, hi_size + 4))
}

/// Read exactly `n` bytes of a fixed-size unit (a page or a log
/// block).
pub fn read_exact_bytes(r: &mut impl Read, n: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)?;
    Ok(buf)
}
