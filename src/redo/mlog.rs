//! Mini-transaction record dispatch over the assembled redo stream.
//!
//! Every record is self-describing: a type byte, the compressed
//! space id and page number, then a type-specific body. The only
//! variant that yields SQL is MLOG_UNDO_INSERT; everything else is
//! parsed solely to advance the cursor by the record's wire width.
//! An unknown tag rewinds to just past the type byte, so a mis-parse
//! recovers by single-byte slip.

use log::{debug, trace};
use num_enum::FromPrimitive;
use strum::{Display, EnumString};

use crate::error::{RecoveryError, Result};
use crate::meta::dict::Dictionary;
use crate::redo::undo;
use crate::util;

/// Flag ORed into the type byte of a single-record mini-transaction.
pub const MLOG_SINGLE_REC_FLAG: u8 = 0x80;

/// Redo record types, see mtr0types.h.
#[repr(u8)]
#[derive(Debug, Display, EnumString, FromPrimitive, Default, Clone, Copy, Eq, PartialEq)]
pub enum LogRecordTypes {
    MLOG_1BYTE = 1,
    MLOG_2BYTES = 2,
    MLOG_4BYTES = 4,
    MLOG_8BYTES = 8,
    MLOG_REC_INSERT = 9,
    MLOG_REC_CLUST_DELETE_MARK = 10,
    MLOG_REC_SEC_DELETE_MARK = 11,
    MLOG_REC_UPDATE_IN_PLACE = 13,
    MLOG_REC_DELETE = 14,
    MLOG_LIST_END_DELETE = 15,
    MLOG_LIST_START_DELETE = 16,
    MLOG_LIST_END_COPY_CREATED = 17,
    MLOG_PAGE_REORGANIZE = 18,
    MLOG_PAGE_CREATE = 19,
    MLOG_UNDO_INSERT = 20,
    MLOG_UNDO_ERASE_END = 21,
    MLOG_UNDO_INIT = 22,
    MLOG_UNDO_HDR_DISCARD = 23,
    MLOG_UNDO_HDR_REUSE = 24,
    MLOG_UNDO_HDR_CREATE = 25,
    MLOG_REC_MIN_MARK = 26,
    MLOG_IBUF_BITMAP_INIT = 27,
    MLOG_INIT_FILE_PAGE = 29,
    MLOG_WRITE_STRING = 30,
    MLOG_MULTI_REC_END = 31,
    MLOG_DUMMY_RECORD = 32,
    MLOG_FILE_CREATE = 33,
    MLOG_FILE_RENAME = 34,
    MLOG_FILE_DELETE = 35,
    MLOG_COMP_REC_MIN_MARK = 36,
    MLOG_COMP_PAGE_CREATE = 37,
    MLOG_COMP_REC_INSERT = 38,
    MLOG_COMP_REC_CLUST_DELETE_MARK = 39,
    MLOG_COMP_REC_SEC_DELETE_MARK = 40,
    MLOG_COMP_REC_UPDATE_IN_PLACE = 41,
    MLOG_COMP_REC_DELETE = 42,
    MLOG_COMP_LIST_END_DELETE = 43,
    MLOG_COMP_LIST_START_DELETE = 44,
    MLOG_COMP_LIST_END_COPY_CREATED = 45,
    MLOG_COMP_PAGE_REORGANIZE = 46,
    MLOG_FILE_CREATE2 = 47,
    MLOG_ZIP_WRITE_NODE_PTR = 48,
    MLOG_ZIP_WRITE_BLOB_PTR = 49,
    MLOG_ZIP_WRITE_HEADER = 50,
    MLOG_ZIP_PAGE_COMPRESS = 51,
    MLOG_ZIP_PAGE_COMPRESS_NO_DATA = 52,
    MLOG_ZIP_PAGE_REORGANIZE = 53,
    MLOG_FILE_RENAME2 = 54,
    MLOG_FILE_NAME = 55,
    MLOG_CHECKPOINT = 56,
    MLOG_PAGE_CREATE_RTREE = 57,
    MLOG_COMP_PAGE_CREATE_RTREE = 58,
    MLOG_INIT_FILE_PAGE2 = 59,
    MLOG_TRUNCATE = 60,
    MLOG_INDEX_LOAD = 61,
    #[default]
    UNDEF = 0,
}

/// Walks the assembled redo stream and mines MLOG_UNDO_INSERT
/// records for prior row images.
pub struct RedoParser<'a> {
    dict: &'a Dictionary,
    db_name: String,
    table_name: String,
}

impl<'a> RedoParser<'a> {
    pub fn new(dict: &'a Dictionary, db_name: &str, table_name: &str) -> Self {
        Self {
            dict,
            db_name: db_name.to_string(),
            table_name: table_name.to_string(),
        }
    }

    /// Scan the stream left to right and return the reconstructed
    /// statements in stream order.
    pub fn parse_stream(&self, data: &[u8]) -> Result<Vec<String>> {
        use LogRecordTypes::*;

        let mut statements = Vec::new();
        let mut pos: usize = 0;
        while data.len().saturating_sub(pos) >= 5 {
            let type_byte = data[pos];
            pos += 1;
            let start_pos = pos;

            // a multi-record group terminator carries nothing else
            if type_byte == MLOG_MULTI_REC_END as u8 {
                continue;
            }
            let log_type = LogRecordTypes::from(type_byte & !MLOG_SINGLE_REC_FLAG);
            if log_type == UNDEF {
                trace!("unknown log type {} at {}, slip one byte", type_byte, pos);
                continue;
            }

            if log_type != MLOG_CHECKPOINT {
                let Ok((space_id, n)) = util::parse_compressed(data, pos) else {
                    break;
                };
                pos += n;
                let Ok((page_no, n)) = util::parse_compressed(data, pos) else {
                    break;
                };
                pos += n;
                trace!(
                    "log_type={}, space_id={}, page_no={}",
                    log_type,
                    space_id,
                    page_no
                );
            }

            pos = match self.dispatch(log_type, data, pos, &mut statements) {
                Ok(next) => next,
                Err(e) => {
                    debug!("{} at {} failed: {}, slip one byte", log_type, start_pos, e);
                    start_pos
                }
            };
        }
        Ok(statements)
    }

    /// Advance the cursor by exactly the record's wire width,
    /// emitting SQL for the undo-insert variant.
    fn dispatch(
        &self,
        log_type: LogRecordTypes,
        data: &[u8],
        pos: usize,
        out: &mut Vec<String>,
    ) -> Result<usize> {
        use LogRecordTypes::*;

        match log_type {
            MLOG_1BYTE | MLOG_2BYTES | MLOG_4BYTES | MLOG_8BYTES => {
                parse_nbytes(data, pos, log_type)
            }

            // value byte + record page offset
            MLOG_REC_SEC_DELETE_MARK => Ok(pos + 3),

            MLOG_UNDO_INSERT => {
                let data_len = util::read_u16(data, pos)? as usize;
                let start = pos + 2;
                let end = start + data_len;
                if end > data.len() {
                    return Err(RecoveryError::MalformedRecord(format!(
                        "undo record length {} overruns the stream",
                        data_len
                    )));
                }
                match undo::parse_undo_record(
                    self.dict,
                    &self.db_name,
                    &self.table_name,
                    &data[..end],
                    start,
                ) {
                    Ok(Some(stmt)) => out.push(stmt),
                    Ok(None) => {}
                    Err(e) => debug!("skip undo record at {}: {}", start, e),
                }
                // the cursor lands on the record end no matter how
                // far the body parse came
                Ok(end)
            }

            MLOG_UNDO_INIT => {
                let (_, n) = util::parse_compressed(data, pos)?;
                Ok(pos + n)
            }
            MLOG_UNDO_HDR_REUSE | MLOG_UNDO_HDR_CREATE => {
                let (_, n) = util::parse_u64_compressed(data, pos)?;
                Ok(pos + n)
            }

            MLOG_WRITE_STRING => {
                let len = util::read_u16(data, pos + 2)? as usize;
                Ok(pos + 4 + len)
            }

            MLOG_FILE_CREATE | MLOG_FILE_RENAME | MLOG_FILE_DELETE | MLOG_FILE_CREATE2
            | MLOG_FILE_RENAME2 | MLOG_FILE_NAME => parse_file_op(data, pos, log_type),

            MLOG_REC_MIN_MARK | MLOG_COMP_REC_MIN_MARK => Ok(pos + 2),

            MLOG_REC_INSERT | MLOG_COMP_REC_INSERT => {
                let p = parse_index(data, pos, log_type == MLOG_COMP_REC_INSERT)?;
                parse_insert_record(data, p, false)
            }

            MLOG_REC_CLUST_DELETE_MARK | MLOG_COMP_REC_CLUST_DELETE_MARK => {
                parse_clust_delete_mark(data, pos, log_type == MLOG_COMP_REC_CLUST_DELETE_MARK)
            }

            MLOG_COMP_REC_SEC_DELETE_MARK => parse_index(data, pos, true),

            MLOG_REC_UPDATE_IN_PLACE | MLOG_COMP_REC_UPDATE_IN_PLACE => {
                parse_update_in_place(data, pos, log_type == MLOG_COMP_REC_UPDATE_IN_PLACE)
            }

            MLOG_REC_DELETE | MLOG_COMP_REC_DELETE => {
                let p = parse_index(data, pos, log_type == MLOG_COMP_REC_DELETE)?;
                Ok(p + 2)
            }

            MLOG_LIST_END_DELETE | MLOG_COMP_LIST_END_DELETE | MLOG_LIST_START_DELETE
            | MLOG_COMP_LIST_START_DELETE => {
                let comp = log_type == MLOG_COMP_LIST_END_DELETE
                    || log_type == MLOG_COMP_LIST_START_DELETE;
                let p = parse_index(data, pos, comp)?;
                Ok(p + 2)
            }

            MLOG_LIST_END_COPY_CREATED | MLOG_COMP_LIST_END_COPY_CREATED => {
                parse_list_end_copy_created(
                    data,
                    pos,
                    log_type == MLOG_COMP_LIST_END_COPY_CREATED,
                )
            }

            MLOG_PAGE_REORGANIZE | MLOG_COMP_PAGE_REORGANIZE | MLOG_ZIP_PAGE_REORGANIZE => {
                let p = parse_index(data, pos, log_type != MLOG_PAGE_REORGANIZE)?;
                if log_type == MLOG_ZIP_PAGE_REORGANIZE {
                    Ok(p + 1)
                } else {
                    Ok(p)
                }
            }

            MLOG_ZIP_WRITE_NODE_PTR => Ok(pos + 8),
            MLOG_ZIP_WRITE_BLOB_PTR => Ok(pos + 24),
            MLOG_ZIP_WRITE_HEADER => {
                let len = util::read_u8(data, pos + 1)? as usize;
                Ok(pos + 2 + len)
            }
            MLOG_ZIP_PAGE_COMPRESS => {
                let size = util::read_u16(data, pos)? as usize;
                let trailer = util::read_u16(data, pos + 2)? as usize;
                Ok(pos + 4 + 8 + size + trailer)
            }
            MLOG_ZIP_PAGE_COMPRESS_NO_DATA => {
                let p = parse_index(data, pos, true)?;
                Ok(p + 1)
            }

            MLOG_CHECKPOINT | MLOG_TRUNCATE | MLOG_INDEX_LOAD => Ok(pos + 8),

            // page initializations carry no body
            _ => Ok(pos),
        }
    }
}

fn parse_nbytes(data: &[u8], pos: usize, log_type: LogRecordTypes) -> Result<usize> {
    let offset = util::read_u16(data, pos)?;
    let mut p = pos + 2;
    if log_type == LogRecordTypes::MLOG_8BYTES {
        let (_, n) = util::parse_u64_compressed(data, p)?;
        p += n;
    } else {
        let (_, n) = util::parse_compressed(data, p)?;
        p += n;
    }
    trace!("nbytes write at page offset {}", offset);
    Ok(p)
}

/// Skip the index descriptor in front of compact-format record
/// bodies: n_fields(2) + n_uniq(2) + n_fields column lengths.
fn parse_index(data: &[u8], pos: usize, comp: bool) -> Result<usize> {
    if !comp {
        return Ok(pos);
    }
    let n = util::read_u16(data, pos)? as usize;
    let uniq = util::read_u16(data, pos + 2)?;
    let end = pos + 4 + n * 2;
    if end > data.len() {
        return Err(RecoveryError::ShortBuffer {
            at: pos + 4,
            need: n * 2,
            have: data.len().saturating_sub(pos + 4),
        });
    }
    trace!("index descriptor: n_fields={}, n_uniq={}", n, uniq);
    Ok(end)
}

/// Skip a record-insert body, see page_cur_parse_insert_rec.
fn parse_insert_record(data: &[u8], pos: usize, is_short: bool) -> Result<usize> {
    let mut p = pos;
    if !is_short {
        let _offset = util::read_u16(data, p)?;
        p += 2;
    }
    let (end_seg_len, n) = util::parse_compressed(data, p)?;
    p += n;
    if end_seg_len & 0x1 != 0 {
        let _info_and_status = util::read_u8(data, p)?;
        p += 1;
        let (_origin_offset, n) = util::parse_compressed(data, p)?;
        p += n;
        let (_mismatch_index, n) = util::parse_compressed(data, p)?;
        p += n;
    }
    let p = p + (end_seg_len >> 1) as usize;
    if p > data.len() {
        return Err(RecoveryError::ShortBuffer {
            at: pos,
            need: (end_seg_len >> 1) as usize,
            have: 0,
        });
    }
    Ok(p)
}

/// See btr_cur_parse_del_mark_set_clust_rec.
fn parse_clust_delete_mark(data: &[u8], pos: usize, comp: bool) -> Result<usize> {
    let mut p = parse_index(data, pos, comp)?;
    let _flags = util::read_u8(data, p)?;
    let _value = util::read_u8(data, p + 1)?;
    p += 2;
    let (_sys_pos, n) = util::parse_compressed(data, p)?;
    p += n;
    let roll_ptr = util::read_u56(data, p)?;
    p += 7;
    let (trx_id, n) = util::parse_u64_compressed(data, p)?;
    p += n;
    let offset = util::read_u16(data, p)?;
    p += 2;
    trace!(
        "clust delete mark: roll_ptr={}, trx_id={}, offset={}",
        roll_ptr,
        trx_id,
        offset
    );
    Ok(p)
}

/// See row_upd_index_parse; the update vector is skipped field by
/// field.
fn parse_update_in_place(data: &[u8], pos: usize, comp: bool) -> Result<usize> {
    let mut p = parse_index(data, pos, comp)?;
    let _flags = util::read_u8(data, p)?;
    p += 1;
    let (_sys_pos, n) = util::parse_compressed(data, p)?;
    p += n;
    let _roll_ptr = util::read_u56(data, p)?;
    p += 7;
    let (_trx_id, n) = util::parse_u64_compressed(data, p)?;
    p += n;
    let _rec_offset = util::read_u16(data, p)?;
    p += 2;
    let _info_bits = util::read_u8(data, p)?;
    p += 1;
    let (n_fields, n) = util::parse_compressed(data, p)?;
    p += n;
    for _ in 0..n_fields {
        let (_field_no, n) = util::parse_compressed(data, p)?;
        p += n;
        let (field_len, n) = util::parse_compressed(data, p)?;
        p += n + field_len as usize;
        if p > data.len() {
            return Err(RecoveryError::ShortBuffer {
                at: p,
                need: 0,
                have: 0,
            });
        }
    }
    Ok(p)
}

fn parse_list_end_copy_created(data: &[u8], pos: usize, comp: bool) -> Result<usize> {
    let mut p = parse_index(data, pos, comp)?;
    let log_data_len = util::read_u32(data, p)? as usize;
    p += 4;
    let rec_end = p + log_data_len;
    if rec_end > data.len() {
        return Err(RecoveryError::ShortBuffer {
            at: p,
            need: log_data_len,
            have: data.len().saturating_sub(p),
        });
    }
    while p < rec_end {
        p = parse_insert_record(data, p, true)?;
    }
    Ok(p)
}

fn parse_file_op(data: &[u8], pos: usize, log_type: LogRecordTypes) -> Result<usize> {
    let mut p = pos;
    if log_type == LogRecordTypes::MLOG_FILE_CREATE2 {
        let _flags = util::read_u32(data, p)?;
        p += 4;
    }
    let name_len = util::read_u16(data, p)? as usize;
    p += 2;
    if p + name_len > data.len() {
        return Err(RecoveryError::ShortBuffer {
            at: p,
            need: name_len,
            have: data.len().saturating_sub(p),
        });
    }
    Ok(p + name_len)
}

#[cfg(test)]
mod mlog_tests {
    use super::*;
    use crate::util::encode_compressed;

    fn record_header(log_type: LogRecordTypes, space_id: u64, page_no: u64) -> Vec<u8> {
        let mut out = vec![log_type as u8 | MLOG_SINGLE_REC_FLAG];
        out.extend(encode_compressed(space_id));
        out.extend(encode_compressed(page_no));
        out
    }

    fn empty_dict() -> Dictionary {
        Dictionary::default()
    }

    #[test]
    fn nbytes_records_advance_by_wire_width() {
        let dict = empty_dict();
        let parser = RedoParser::new(&dict, "", "");

        let mut stream = record_header(LogRecordTypes::MLOG_1BYTE, 3, 4);
        stream.extend([0x00, 0x10]); // page offset
        stream.extend(encode_compressed(0x42)); // value
        // second record proves the cursor landed right
        stream.extend(record_header(LogRecordTypes::MLOG_REC_MIN_MARK, 3, 4));
        stream.extend([0x00, 0x20]);
        // trailing noise shorter than a record header
        stream.extend([0u8; 4]);

        assert!(parser.parse_stream(&stream).unwrap().is_empty());
    }

    #[test]
    fn write_string_skips_its_payload() {
        let dict = empty_dict();
        let parser = RedoParser::new(&dict, "", "");

        let mut stream = record_header(LogRecordTypes::MLOG_WRITE_STRING, 1, 2);
        stream.extend([0x00, 0x08]); // page offset
        stream.extend([0x00, 0x03]); // length
        stream.extend([0xAA, 0xBB, 0xCC]);
        stream.extend([0u8; 4]);
        assert!(parser.parse_stream(&stream).unwrap().is_empty());
    }

    #[test]
    fn comp_rec_insert_consumes_index_and_body() {
        let dict = empty_dict();
        let parser = RedoParser::new(&dict, "", "");

        let mut stream = record_header(LogRecordTypes::MLOG_COMP_REC_INSERT, 1, 2);
        stream.extend([0x00, 0x02]); // n_fields
        stream.extend([0x00, 0x01]); // n_uniq
        stream.extend([0x00, 0x04, 0x00, 0x06]); // field lengths
        stream.extend([0x00, 0x30]); // page offset
        stream.extend(encode_compressed(6 << 1)); // end_seg_len, low bit clear
        stream.extend([1, 2, 3, 4, 5, 6]); // record body
        stream.extend([0u8; 4]);
        assert!(parser.parse_stream(&stream).unwrap().is_empty());
    }

    #[test]
    fn unknown_type_recovers_by_single_byte_slip() {
        let dict = empty_dict();
        let parser = RedoParser::new(&dict, "", "");

        // 0x3F = 63 is not on the whitelist
        let mut stream = vec![0x3F, 0x00];
        stream.extend(record_header(LogRecordTypes::MLOG_REC_MIN_MARK, 1, 2));
        stream.extend([0x00, 0x05]);
        stream.extend([0u8; 4]);
        assert!(parser.parse_stream(&stream).unwrap().is_empty());
    }

    #[test]
    fn checkpoint_record_has_no_space_and_page() {
        let dict = empty_dict();
        let parser = RedoParser::new(&dict, "", "");

        let mut stream = vec![LogRecordTypes::MLOG_CHECKPOINT as u8];
        stream.extend(1234u64.to_be_bytes()); // checkpoint lsn
        stream.extend([0u8; 4]);
        assert!(parser.parse_stream(&stream).unwrap().is_empty());
    }
}
