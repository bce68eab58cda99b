//! Undo record mining out of MLOG_UNDO_INSERT bodies, see
//! trx0rec.cc. An update undo record carries the primary key and the
//! prior image of every updated column, which is exactly an UPDATE
//! statement read backwards.

use log::trace;
use num_enum::FromPrimitive;
use strum::Display;

use crate::error::{RecoveryError, Result};
use crate::meta::def::TableDef;
use crate::meta::dict::Dictionary;
use crate::meta::val::Value;
use crate::sql;
use crate::util;

/// Undo record types, see trx0rec.h.
#[repr(u8)]
#[derive(Debug, Display, FromPrimitive, Default, Clone, Copy, Eq, PartialEq)]
pub enum UndoTypes {
    /// fresh insert into the clustered index
    TRX_UNDO_INSERT_REC = 11,
    /// update of a record that was not delete marked
    TRX_UNDO_UPD_EXIST_REC = 12,
    /// update of a delete marked record
    TRX_UNDO_UPD_DEL_REC = 13,
    /// delete marking, fields do not change
    TRX_UNDO_DEL_MARK_REC = 14,
    #[default]
    UNDEF = 0,
}

/// Compilation info is multiplied by this and ORed into the type.
pub const TRX_UNDO_CMPL_INFO_MULT: u8 = 16;
/// Set when the update touched externally stored fields.
pub const TRX_UNDO_UPD_EXTERN: u8 = 128;

/// Parse one undo record. `data` is already cut at the record end,
/// `pos` points past the 2 byte length field. Returns the UPDATE
/// statement for an update-existing record that passes the caller's
/// db/table filters, None otherwise.
pub fn parse_undo_record(
    dict: &Dictionary,
    db_filter: &str,
    table_filter: &str,
    data: &[u8],
    pos: usize,
) -> Result<Option<String>> {
    let mut p = pos;

    let type_cmpl = util::read_u8(data, p)? as u8 & !TRX_UNDO_UPD_EXTERN;
    p += 1;
    let undo_type = UndoTypes::from(type_cmpl & (TRX_UNDO_CMPL_INFO_MULT - 1));
    let cmpl_info = type_cmpl / TRX_UNDO_CMPL_INFO_MULT;
    trace!("undo_type={}, cmpl_info={}", undo_type, cmpl_info);

    let (undo_no, n) = util::parse_much_compressed(data, p)?;
    p += n;
    let (table_id, n) = util::parse_much_compressed(data, p)?;
    p += n;
    trace!("undo_no={}, table_id={}", undo_no, table_id);

    if undo_type != UndoTypes::TRX_UNDO_INSERT_REC {
        let _info_bits = util::read_u8(data, p)?;
        p += 1;
        let (trx_id, n) = util::parse_u64_compressed(data, p)?;
        p += n;
        let (roll_ptr, n) = util::parse_u64_compressed(data, p)?;
        p += n;
        trace!("trx_id={}, roll_ptr={}", trx_id, roll_ptr);
    }

    let table = dict
        .table_by_id(table_id)
        .ok_or_else(|| RecoveryError::UnknownTable(format!("table id {}", table_id)))?;

    // the unique key of the record the undo entry applies to
    let mut keys = Vec::new();
    for field in table.clustered_fields() {
        let col = table.column_by_name(&field.col_name).ok_or_else(|| {
            RecoveryError::UnknownField {
                table: table.tab_name.clone(),
                pos: field.col_pos,
            }
        })?;
        let (field_len, n) = util::parse_compressed(data, p)?;
        p += n;
        let field_len = field_len as usize;
        if p + field_len > data.len() {
            return Err(RecoveryError::ShortBuffer {
                at: p,
                need: field_len,
                have: data.len().saturating_sub(p),
            });
        }
        let value = col.parse_value(&data[p..p + field_len]);
        p += field_len;
        keys.push((field.col_name.clone(), value));
    }

    if undo_type != UndoTypes::TRX_UNDO_UPD_EXIST_REC {
        // insert / delete-mark images carry no update vector
        return Ok(None);
    }

    let (n_updated, n) = util::parse_compressed(data, p)?;
    p += n;
    let mut sets = Vec::new();
    for _ in 0..n_updated {
        let (col_pos, n) = util::parse_compressed(data, p)?;
        p += n;
        let col = table
            .columns
            .get(col_pos as usize)
            .ok_or(RecoveryError::UnknownField {
                table: table.tab_name.clone(),
                pos: col_pos,
            })?;
        let (field_len, n) = util::parse_compressed(data, p)?;
        p += n;
        let field_len = field_len as usize;
        // NULL prior values are stored with an out-of-range length
        let value = if p + field_len > data.len() {
            Value::Null
        } else {
            let v = col.parse_value(&data[p..p + field_len]);
            p += field_len;
            v
        };
        sets.push((col.col_name.clone(), value));
    }

    if !filters_match(db_filter, table_filter, table) {
        return Ok(None);
    }
    Ok(Some(sql::update(
        &table.db_name,
        &table.tab_name,
        &sets,
        &keys,
    )))
}

fn filters_match(db_filter: &str, table_filter: &str, table: &TableDef) -> bool {
    (db_filter.is_empty() || table.db_name == db_filter)
        && (table_filter.is_empty() || table.tab_name == table_filter)
}

#[cfg(test)]
mod undo_tests {
    use super::*;
    use crate::meta::def::{ColumnDef, DataTypes, IndexDef, IndexFieldDef, MysqlTypes};
    use crate::redo::mlog::{LogRecordTypes, RedoParser, MLOG_SINGLE_REC_FLAG};
    use crate::util::encode_compressed;
    use std::collections::BTreeMap;

    const TABLE_ID: u64 = 0x123;

    fn users_table() -> TableDef {
        let mut indexes = BTreeMap::new();
        indexes.insert(
            0x30,
            IndexDef {
                id: 0x30,
                name: "PRIMARY".into(),
                field_count: 1,
                fields: vec![IndexFieldDef {
                    col_pos: 0,
                    col_name: "id".into(),
                }],
                ..IndexDef::default()
            },
        );
        TableDef {
            db_name: "test".into(),
            tab_name: "users".into(),
            table_id: TABLE_ID,
            space_id: 5,
            columns: vec![
                ColumnDef {
                    col_name: "id".into(),
                    main_type: DataTypes::INT,
                    mysql_type: MysqlTypes::LONG,
                    data_len: 4,
                    is_unsigned: true,
                    ..ColumnDef::default()
                },
                ColumnDef {
                    col_name: "DB_TRX_ID".into(),
                    main_type: DataTypes::MISSING,
                    data_len: 6,
                    ..ColumnDef::default()
                },
                ColumnDef {
                    col_name: "DB_ROLL_PTR".into(),
                    main_type: DataTypes::MISSING,
                    data_len: 7,
                    ..ColumnDef::default()
                },
                ColumnDef {
                    col_name: "name".into(),
                    main_type: DataTypes::VARMYSQL,
                    mysql_type: MysqlTypes::VARCHAR,
                    data_len: 30,
                    is_nullable: true,
                    ..ColumnDef::default()
                },
            ],
            indexes,
            null_count: 1,
        }
    }

    fn test_dict() -> Dictionary {
        let mut dict = Dictionary::default();
        dict.tables.insert(TABLE_ID, users_table());
        dict
    }

    /// An UPD_EXIST undo body: pk id=5, prior image name='bob'.
    fn upd_exist_body() -> Vec<u8> {
        let mut body = Vec::new();
        body.push(UndoTypes::TRX_UNDO_UPD_EXIST_REC as u8);
        body.extend(encode_compressed(0)); // undo_no
        body.extend(encode_compressed(TABLE_ID)); // table id
        body.push(0); // info bits
        body.extend(encode_compressed(9)); // trx id, high half
        body.extend([0, 0, 0, 1]); // trx id, low half
        body.extend(encode_compressed(0)); // roll ptr, high half
        body.extend([0, 0, 0, 2]); // roll ptr, low half
        body.extend(encode_compressed(4)); // pk field length
        body.extend([0, 0, 0, 5]); // id = 5
        body.extend(encode_compressed(1)); // updated column count
        body.extend(encode_compressed(3)); // column position of `name`
        body.extend(encode_compressed(3)); // field length
        body.extend(b"bob");
        body
    }

    fn undo_insert_record(body: &[u8]) -> Vec<u8> {
        let mut rec = vec![LogRecordTypes::MLOG_UNDO_INSERT as u8 | MLOG_SINGLE_REC_FLAG];
        rec.extend(encode_compressed(5)); // space id
        rec.extend(encode_compressed(3)); // page no
        rec.extend((body.len() as u16).to_be_bytes());
        rec.extend_from_slice(body);
        rec
    }

    #[test]
    fn update_statement_is_rebuilt_from_the_prior_image() {
        let dict = test_dict();
        let parser = RedoParser::new(&dict, "", "");
        let mut stream = undo_insert_record(&upd_exist_body());
        stream.extend([0u8; 4]);

        let statements = parser.parse_stream(&stream).unwrap();
        assert_eq!(
            statements,
            vec!["UPDATE `test`.`users` SET `name`='bob' WHERE `id`='5';"]
        );
    }

    #[test]
    fn cursor_lands_on_record_end_for_consecutive_records() {
        let dict = test_dict();
        let parser = RedoParser::new(&dict, "", "");
        let mut stream = undo_insert_record(&upd_exist_body());
        stream.extend(undo_insert_record(&upd_exist_body()));
        stream.extend([0u8; 4]);

        let statements = parser.parse_stream(&stream).unwrap();
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn delete_mark_records_emit_nothing() {
        let mut body = upd_exist_body();
        body[0] = UndoTypes::TRX_UNDO_DEL_MARK_REC as u8;
        let dict = test_dict();
        let parser = RedoParser::new(&dict, "", "");
        let mut stream = undo_insert_record(&body);
        stream.extend([0u8; 4]);
        assert!(parser.parse_stream(&stream).unwrap().is_empty());
    }

    #[test]
    fn unknown_table_skips_the_record_but_not_the_stream() {
        let dict = Dictionary::default();
        let parser = RedoParser::new(&dict, "", "");
        let mut stream = undo_insert_record(&upd_exist_body());
        stream.extend([0u8; 4]);
        assert!(parser.parse_stream(&stream).unwrap().is_empty());
    }

    #[test]
    fn filters_limit_the_emitted_tables() {
        let dict = test_dict();
        let mut stream = undo_insert_record(&upd_exist_body());
        stream.extend([0u8; 4]);

        let parser = RedoParser::new(&dict, "test", "users");
        assert_eq!(parser.parse_stream(&stream).unwrap().len(), 1);

        let parser = RedoParser::new(&dict, "other", "");
        assert!(parser.parse_stream(&stream).unwrap().is_empty());

        let parser = RedoParser::new(&dict, "", "nope");
        assert!(parser.parse_stream(&stream).unwrap().is_empty());
    }

    #[test]
    fn overlong_data_len_slips_one_byte() {
        let dict = test_dict();
        let parser = RedoParser::new(&dict, "", "");
        let mut stream = vec![LogRecordTypes::MLOG_UNDO_INSERT as u8];
        stream.extend(encode_compressed(5));
        stream.extend(encode_compressed(3));
        stream.extend(0xFFFFu16.to_be_bytes()); // data_len far past the end
        stream.extend([0u8; 8]);
        // no panic, nothing emitted
        assert!(parser.parse_stream(&stream).unwrap().is_empty());
    }

    #[test]
    fn null_prior_value_renders_unquoted() {
        let mut body = Vec::new();
        body.push(UndoTypes::TRX_UNDO_UPD_EXIST_REC as u8);
        body.extend(encode_compressed(0));
        body.extend(encode_compressed(TABLE_ID));
        body.push(0);
        body.extend(encode_compressed(0));
        body.extend([0, 0, 0, 1]);
        body.extend(encode_compressed(0));
        body.extend([0, 0, 0, 2]);
        body.extend(encode_compressed(4));
        body.extend([0, 0, 0, 7]);
        body.extend(encode_compressed(1)); // one updated column
        body.extend(encode_compressed(3)); // `name`
        body.extend(encode_compressed(0xFFFF_FFFF)); // NULL length
        let dict = test_dict();
        let parser = RedoParser::new(&dict, "", "");
        let mut stream = undo_insert_record(&body);
        stream.extend([0u8; 4]);
        assert_eq!(
            parser.parse_stream(&stream).unwrap(),
            vec!["UPDATE `test`.`users` SET `name`=NULL WHERE `id`='7';"]
        );
    }
}
