//! Per-record field offset vectors for the two row formats, see
//! rec_init_offsets in rem0rec.cc.

use log::trace;

use crate::error::{RecoveryError, Result};
use crate::meta::def::{ColumnDef, DataTypes, TableDef};
use crate::util;

/// SQL NULL flag on a field end offset.
pub const REC_OFFS_SQL_NULL: u32 = 1 << 31;
/// Externally stored (off-page) flag.
pub const REC_OFFS_EXTERNAL: u32 = 1 << 30;
/// Mask selecting the real end offset.
pub const REC_OFFS_MASK: u32 = REC_OFFS_EXTERNAL - 1;

/// Extra header bytes in front of a REDUNDANT record origin.
pub const REC_N_OLD_EXTRA_BYTES: usize = 6;
/// Extra header bytes in front of a COMPACT record origin.
pub const REC_N_NEW_EXTRA_BYTES: usize = 5;

/// Field end offsets of one record: the on-disk encoding keeps
/// `[extra_size, n_fields, off_0 .. off_n-1]` with the flag bits
/// above; this is that array as a typed vector.
#[derive(Debug, Default, Clone)]
pub struct RecordOffsets {
    extra_size: u32,
    ends: Vec<u32>,
}

impl RecordOffsets {
    pub fn n_fields(&self) -> usize {
        self.ends.len()
    }

    /// Bytes of record header in front of the origin.
    pub fn extra_size(&self) -> usize {
        self.extra_size as usize
    }

    /// End offset of the whole data area relative to the origin.
    pub fn data_size(&self) -> usize {
        self.ends
            .last()
            .map(|e| (e & REC_OFFS_MASK) as usize)
            .unwrap_or(0)
    }

    pub fn is_null(&self, i: usize) -> bool {
        self.ends[i] & REC_OFFS_SQL_NULL != 0
    }

    pub fn is_external(&self, i: usize) -> bool {
        self.ends[i] & REC_OFFS_EXTERNAL != 0
    }

    fn start_of(&self, i: usize) -> usize {
        if i == 0 {
            0
        } else {
            (self.ends[i - 1] & REC_OFFS_MASK) as usize
        }
    }

    /// Measured size of field i; 0 for SQL NULL.
    pub fn nth_size(&self, i: usize) -> usize {
        let end = (self.ends[i] & REC_OFFS_MASK) as usize;
        end.saturating_sub(self.start_of(i))
    }

    /// Start offset and length of field i relative to the origin,
    /// None for SQL NULL.
    pub fn nth_field(&self, i: usize) -> Option<(usize, usize)> {
        if self.is_null(i) {
            return None;
        }
        let start = self.start_of(i);
        let end = (self.ends[i] & REC_OFFS_MASK) as usize;
        Some((start, end.saturating_sub(start)))
    }
}

/// Offsets of a REDUNDANT record. The record's extra header carries
/// one end-info entry per field, one byte each when the short flag
/// at origin-3 is set, two bytes otherwise.
pub fn offsets_redundant(d: &[u8], origin: usize, n_fields: usize) -> Result<RecordOffsets> {
    let one_byte = origin >= 3 && d[origin - 3] & 0x1 != 0;
    let extra = REC_N_OLD_EXTRA_BYTES + if one_byte { n_fields } else { 2 * n_fields };
    if origin < extra {
        return Err(RecoveryError::MalformedRecord(format!(
            "redundant record at {} has no room for {} end infos",
            origin, n_fields
        )));
    }

    let mut ends = Vec::with_capacity(n_fields);
    for i in 0..n_fields {
        if one_byte {
            let mut offs = d[origin - (REC_N_OLD_EXTRA_BYTES + i + 1)] as u32;
            if offs & 0x80 != 0 {
                offs = (offs & !0x80) | REC_OFFS_SQL_NULL;
            }
            ends.push(offs);
        } else {
            let mut offs = util::u16_val(d, origin - (REC_N_OLD_EXTRA_BYTES + 2 * i + 2)) as u32;
            if offs & 0x8000 != 0 {
                offs = (offs & !0x8000) | REC_OFFS_SQL_NULL;
            }
            if offs & 0x4000 != 0 {
                offs = (offs & !0x4000) | REC_OFFS_EXTERNAL;
            }
            ends.push(offs);
        }
    }
    Ok(RecordOffsets {
        extra_size: extra as u32,
        ends,
    })
}

/// Offsets of a COMPACT record. The null bitmap sits behind the 5
/// byte extra header, one bit per nullable column; the
/// variable-length length bytes follow, both growing backward from
/// the origin.
pub fn offsets_compact(d: &[u8], origin: usize, table: &TableDef) -> Result<RecordOffsets> {
    let null_bytes = util::align8(table.null_count);
    let underflow = || {
        RecoveryError::MalformedRecord(format!(
            "compact record at {} has no room for its extra header",
            origin
        ))
    };

    let mut null_addr = origin
        .checked_sub(REC_N_NEW_EXTRA_BYTES + 1)
        .ok_or_else(underflow)?;
    let len_start = origin
        .checked_sub(REC_N_NEW_EXTRA_BYTES + 1 + null_bytes)
        .ok_or_else(underflow)?;
    let mut len_addr = len_start;

    let mut ends = Vec::with_capacity(table.columns.len());
    let mut offs: u32 = 0;
    let mut null_mask: u32 = 1;
    for col in &table.columns {
        if col.is_nullable {
            if null_mask > 0x80 {
                null_addr = null_addr.checked_sub(1).ok_or_else(underflow)?;
                null_mask = 1;
            }
            let bits = *d.get(null_addr).ok_or_else(underflow)?;
            let is_null = bits & null_mask as u8 != 0;
            null_mask <<= 1;
            if is_null {
                ends.push(offs | REC_OFFS_SQL_NULL);
                continue;
            }
        }

        let fixed = col.fixed_length();
        if fixed != 0 {
            offs = (offs + fixed as u32) & 0xFFFF;
            ends.push(offs);
            continue;
        }

        // variable-length field: read the length
        let mut length = *d.get(len_addr).ok_or_else(underflow)? as u32;
        len_addr = len_addr.checked_sub(1).ok_or_else(underflow)?;
        if (col.data_len > 255 || col.main_type == DataTypes::BLOB) && length & 0x80 != 0 {
            // 1exxxxxxx xxxxxxxx: 14 bits of length plus the
            // external storage flag
            length = (length << 8) | *d.get(len_addr).ok_or_else(underflow)? as u32;
            len_addr = len_addr.checked_sub(1).ok_or_else(underflow)?;
            offs = (offs + (length & 0x3FFF)) & 0xFFFF;
            ends.push(if length & 0x4000 != 0 {
                offs | REC_OFFS_EXTERNAL
            } else {
                offs
            });
            continue;
        }
        offs = (offs + length) & 0xFFFF;
        ends.push(offs);
    }

    let consumed_len_bytes = len_start - len_addr;
    trace!(
        "compact offsets at {}: null_bytes={}, len_bytes={}",
        origin,
        null_bytes,
        consumed_len_bytes
    );
    Ok(RecordOffsets {
        extra_size: (REC_N_NEW_EXTRA_BYTES + null_bytes + consumed_len_bytes) as u32,
        ends,
    })
}

/// For every fixed-length column the measured field size must equal
/// the declared length, unless the column is nullable and measured
/// empty.
pub fn check_field_sizes(offsets: &RecordOffsets, columns: &[ColumnDef]) -> Result<()> {
    for (i, col) in columns.iter().enumerate() {
        let fixed = col.fixed_length();
        if fixed == 0 {
            continue;
        }
        let measured = offsets.nth_size(i) as u64;
        if measured == 0 && col.is_nullable {
            continue;
        }
        if col.data_len != 0 && measured != fixed {
            return Err(RecoveryError::MalformedRecord(format!(
                "field {} measured {} bytes, declared {}",
                col.col_name, measured, fixed
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod record_tests {
    use super::*;
    use crate::meta::def::MysqlTypes;

    fn col(name: &str, main_type: DataTypes, len: u64, nullable: bool) -> ColumnDef {
        ColumnDef {
            col_name: name.into(),
            main_type,
            mysql_type: MysqlTypes::LONG,
            data_len: len,
            is_nullable: nullable,
            ..ColumnDef::default()
        }
    }

    fn test_table() -> TableDef {
        TableDef {
            columns: vec![
                col("id", DataTypes::INT, 4, false),
                col("DB_TRX_ID", DataTypes::MISSING, 6, false),
                col("DB_ROLL_PTR", DataTypes::MISSING, 7, false),
                col("v", DataTypes::INT, 4, true),
            ],
            null_count: 1,
            ..TableDef::default()
        }
    }

    #[test]
    fn compact_offsets_fixed_row() {
        // origin 32, null byte clear at 26
        let mut d = vec![0u8; 64];
        d[26] = 0x00;
        let offsets = offsets_compact(&d, 32, &test_table()).unwrap();
        assert_eq!(offsets.n_fields(), 4);
        assert_eq!(offsets.nth_field(0), Some((0, 4)));
        assert_eq!(offsets.nth_field(1), Some((4, 6)));
        assert_eq!(offsets.nth_field(2), Some((10, 7)));
        assert_eq!(offsets.nth_field(3), Some((17, 4)));
        assert_eq!(offsets.data_size(), 21);
        // 5 header bytes + 1 null byte, no variable lengths
        assert_eq!(offsets.extra_size(), 6);
        assert!(check_field_sizes(&offsets, &test_table().columns).is_ok());
    }

    #[test]
    fn compact_offsets_null_column() {
        let mut d = vec![0u8; 64];
        d[26] = 0x01; // first nullable column is NULL
        let offsets = offsets_compact(&d, 32, &test_table()).unwrap();
        assert!(offsets.is_null(3));
        assert_eq!(offsets.nth_field(3), None);
        assert_eq!(offsets.nth_size(3), 0);
        assert_eq!(offsets.data_size(), 17);
        assert!(check_field_sizes(&offsets, &test_table().columns).is_ok());
    }

    #[test]
    fn compact_offsets_variable_column() {
        let table = TableDef {
            columns: vec![
                col("id", DataTypes::INT, 4, false),
                col("name", DataTypes::VARMYSQL, 30, true),
            ],
            null_count: 1,
            ..TableDef::default()
        };
        let mut d = vec![0u8; 64];
        d[26] = 0x00; // not null
        d[25] = 3; // varlen byte for `name`
        let offsets = offsets_compact(&d, 32, &table).unwrap();
        assert_eq!(offsets.nth_field(0), Some((0, 4)));
        assert_eq!(offsets.nth_field(1), Some((4, 3)));
        // 5 header + 1 null + 1 length byte
        assert_eq!(offsets.extra_size(), 7);
    }

    #[test]
    fn compact_null_bitmap_spills_to_second_byte() {
        // nine nullable columns need two bitmap bytes
        let mut columns = Vec::new();
        for i in 0..9 {
            columns.push(col(&format!("c{}", i), DataTypes::INT, 4, true));
        }
        let table = TableDef {
            columns,
            null_count: 9,
            ..TableDef::default()
        };
        let mut d = vec![0u8; 64];
        d[26] = 0x00; // bits 0..7 clear
        d[25] = 0x01; // bit 8 set -> c8 is NULL
        let offsets = offsets_compact(&d, 32, &table).unwrap();
        for i in 0..8 {
            assert!(!offsets.is_null(i));
        }
        assert!(offsets.is_null(8));
    }

    #[test]
    fn redundant_offsets_one_byte() {
        // record with three fields of sizes 4, 6, 2; ends 4, 10, 12
        let origin = 32;
        let mut d = vec![0u8; 64];
        d[origin - 3] = 0x01; // one byte offsets flag
        d[origin - 7] = 4;
        d[origin - 8] = 10;
        d[origin - 9] = 12;
        let offsets = offsets_redundant(&d, origin, 3).unwrap();
        assert_eq!(offsets.nth_field(0), Some((0, 4)));
        assert_eq!(offsets.nth_field(1), Some((4, 6)));
        assert_eq!(offsets.nth_field(2), Some((10, 2)));
        assert_eq!(offsets.extra_size(), 9);
    }

    #[test]
    fn redundant_one_byte_null_flag() {
        let origin = 32;
        let mut d = vec![0u8; 64];
        d[origin - 3] = 0x01;
        d[origin - 7] = 4;
        d[origin - 8] = 0x80 | 4; // second field NULL, end unchanged
        let offsets = offsets_redundant(&d, origin, 2).unwrap();
        assert!(!offsets.is_null(0));
        assert!(offsets.is_null(1));
        assert_eq!(offsets.nth_field(1), None);
        assert_eq!(offsets.nth_size(1), 0);
    }

    #[test]
    fn redundant_offsets_two_byte_flags() {
        let origin = 32;
        let mut d = vec![0u8; 64];
        d[origin - 3] = 0x00; // two byte offsets
        d[origin - 8..origin - 6].copy_from_slice(&100u16.to_be_bytes());
        d[origin - 10..origin - 8].copy_from_slice(&(0x8000u16 | 100).to_be_bytes());
        d[origin - 12..origin - 10].copy_from_slice(&(0x4000u16 | 120).to_be_bytes());
        let offsets = offsets_redundant(&d, origin, 3).unwrap();
        assert_eq!(offsets.nth_field(0), Some((0, 100)));
        assert!(offsets.is_null(1));
        assert!(offsets.is_external(2));
        assert_eq!(offsets.nth_field(2), Some((100, 20)));
        assert_eq!(offsets.extra_size(), 12);
    }

    #[test]
    fn fixed_size_mismatch_is_malformed() {
        let mut d = vec![0u8; 64];
        d[26] = 0x00;
        let mut table = test_table();
        table.columns[0].data_len = 8; // declared 8, measured will be 8
        let offsets = offsets_compact(&d, 32, &table).unwrap();
        // now lie about the declared length
        table.columns[0].data_len = 4;
        assert!(check_field_sizes(&offsets, &table.columns).is_err());
    }
}
