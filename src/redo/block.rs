//! Redo log file framing: a 512 byte file header, two checkpoint
//! blocks, one reserved slot, then 512 byte log blocks whose bodies
//! are concatenated into a single continuous record stream.

use std::fs::File;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use derivative::Derivative;
use log::{debug, warn};

use crate::error::Result;
use crate::util;

/// Redo log unit size, see os0file.h.
pub const OS_FILE_LOG_BLOCK_SIZE: usize = 512;
/// Block header: no(4) + data_len(2) + first_rec(2) + checkpoint_no(4).
pub const LOG_BLOCK_HDR_SIZE: usize = 12;
/// Checksum trailer of a full block.
pub const LOG_BLOCK_TRL_SIZE: usize = 4;

/// Log file header, the first 512 bytes.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct LogFileHeader {
    /// (4 bytes) header format identifier
    pub format: u32,

    /// (8 bytes) LSN of the start of data in this file
    pub start_lsn: u64,

    /// (32 bytes) creator, 'MySQL x.y.z' or 'MEB'
    #[derivative(Debug = "ignore")]
    pub creator: Bytes,
}

impl LogFileHeader {
    pub fn new(buf: &[u8]) -> Self {
        Self {
            format: util::u32_val(buf, 0),
            start_lsn: util::u64_val(buf, 8),
            creator: Bytes::copy_from_slice(&buf[16..48]),
        }
    }
}

/// Checkpoint block contents; read for diagnostics only.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Checkpoint {
    /// (8 bytes) checkpoint number
    pub number: u64,

    /// (8 bytes) checkpoint LSN
    pub lsn: u64,

    /// (4 bytes) offset to the log entry within the group
    pub offset: u32,

    /// (4 bytes) log buffer size
    pub buffer_size: u32,

    /// (8 bytes) archived LSN, all ones when archiving is off
    pub archived_lsn: u64,

    /// (4 bytes at 0x120) checksum over the leading fields
    pub checksum1: u32,

    /// (4 bytes at 0x124) checksum without the LSN
    pub checksum2: u32,

    /// (4 bytes at 0x128) fsp free limit of space 0, in MiB
    pub current_fsp: u32,

    /// (4 bytes at 0x12C) magic marking the field above as valid
    pub magic: u32,
}

impl Checkpoint {
    pub fn new(buf: &[u8]) -> Self {
        Self {
            number: util::u64_val(buf, 0),
            lsn: util::u64_val(buf, 8),
            offset: util::u32_val(buf, 16),
            buffer_size: util::u32_val(buf, 20),
            archived_lsn: util::u64_val(buf, 24),
            checksum1: util::u32_val(buf, 0x120),
            checksum2: util::u32_val(buf, 0x124),
            current_fsp: util::u32_val(buf, 0x128),
            magic: util::u32_val(buf, 0x12C),
        }
    }
}

/// Log block header fields.
#[derive(Debug, Clone)]
pub struct LogBlockHeader {
    /// (4 bytes) block number; the high bit is the flush marker
    pub block_no: u32,

    /// (2 bytes) bytes written to this block, header included
    pub data_len: u16,

    /// (2 bytes) offset of the first record group starting in this
    /// block, 0 if none does
    pub first_rec: u16,

    /// (4 bytes) checkpoint number
    pub checkpoint_no: u32,
}

impl LogBlockHeader {
    pub fn new(buf: &[u8]) -> Self {
        Self {
            block_no: util::u32_val(buf, 0) & 0x7FFF_FFFF,
            data_len: util::u16_val(buf, 4),
            first_rec: util::u16_val(buf, 6),
            checkpoint_no: util::u32_val(buf, 8),
        }
    }
}

/// Read every log file in order and append the block bodies into one
/// continuous stream. A file that cannot be read is logged and
/// skipped; the stream keeps whatever was assembled before it.
pub fn assemble_stream(files: &[PathBuf]) -> Result<Vec<u8>> {
    let mut stream = Vec::new();
    for path in files {
        if let Err(e) = append_log_file(path, &mut stream) {
            warn!("read redo file {:?} failed: {}", path, e);
        }
    }
    Ok(stream)
}

fn append_log_file(path: &Path, stream: &mut Vec<u8>) -> Result<()> {
    let mut file = File::open(path)?;

    let hdr = LogFileHeader::new(&util::read_exact_bytes(
        &mut file,
        OS_FILE_LOG_BLOCK_SIZE,
    )?);
    debug!("log file {:?}: {:?}", path, hdr);
    for i in 0..2 {
        let cp = Checkpoint::new(&util::read_exact_bytes(&mut file, OS_FILE_LOG_BLOCK_SIZE)?);
        debug!("checkpoint {}: {:?}", i + 1, cp);
    }
    // the reserved fourth slot
    let _ = util::read_exact_bytes(&mut file, OS_FILE_LOG_BLOCK_SIZE)?;

    loop {
        let block = match util::read_exact_bytes(&mut file, OS_FILE_LOG_BLOCK_SIZE) {
            Ok(b) => b,
            Err(_) => break, // EOF
        };
        let hdr = LogBlockHeader::new(&block);
        if hdr.data_len == 0 {
            break;
        }

        let mut data_len = (hdr.data_len as usize).min(OS_FILE_LOG_BLOCK_SIZE);
        if hdr.data_len as usize >= OS_FILE_LOG_BLOCK_SIZE {
            data_len -= LOG_BLOCK_TRL_SIZE;
        }

        // The first block of the assembled stream may open with the
        // tail of a record written before this file: first_rec == 0
        // means the whole block belongs to it, otherwise the copy
        // starts at the first record boundary.
        let mut body_start = LOG_BLOCK_HDR_SIZE;
        if stream.is_empty() {
            if hdr.first_rec == 0 {
                continue;
            }
            if hdr.first_rec as usize > LOG_BLOCK_HDR_SIZE {
                body_start = hdr.first_rec as usize;
            }
        }
        if body_start >= data_len {
            continue;
        }
        stream.extend_from_slice(&block[body_start..data_len]);
    }
    Ok(())
}
