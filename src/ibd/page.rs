use bytes::Bytes;
use derivative::Derivative;
use log::{error, trace};
use num_enum::FromPrimitive;
use strum::Display;

use crate::error::{RecoveryError, Result};
use crate::ibd::record::{self, RecordOffsets};
use crate::meta::def::TableDef;
use crate::meta::val::Value;
use crate::util;

pub const PAGE_SIZE: usize = 16 * 1024;

pub const FIL_HEADER_SIZE: usize = 38;
pub const FIL_TRAILER_SIZE: usize = 8;

/// Page number of the data dictionary header page in the system
/// tablespace.
pub const DICT_HDR_PAGE_NO: u32 = 7;

/// Record anchors, see page0page.h. PAGE_DATA is 38 + 36 + 2 * 10.
pub const PAGE_OLD_INFIMUM: usize = 38 + 36 + 2 * 10 + 1 + 6;
pub const PAGE_OLD_SUPREMUM: usize = 38 + 36 + 2 * 10 + 2 + 2 * 6 + 8;
pub const PAGE_NEW_INFIMUM: usize = 38 + 36 + 2 * 10 + 5;
pub const PAGE_NEW_SUPREMUM: usize = 38 + 36 + 2 * 10 + 2 * 5 + 8;

/// The compact row format flag in PAGE_N_HEAP.
const PAGE_COMPACT_FLAG: u16 = 0x8000;

/// More records than fit in a page; the walk is cyclic past this.
const MAX_PAGE_RECORDS: usize = PAGE_SIZE / 5;

/// Page types, see fil0fil.h.
#[repr(u16)]
#[derive(Debug, Display, FromPrimitive, Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub enum PageTypes {
    ALLOCATED = 0,
    UNDO_LOG = 2,
    INODE = 3,
    IBUF_FREE_LIST = 4,
    IBUF_BITMAP = 5,
    SYS = 6,
    TRX_SYS = 7,
    FSP_HDR = 8,
    XDES = 9,
    BLOB = 10,
    COMPRESSED = 14,
    RTREE = 17854,
    INDEX = 17855,
    #[default]
    UNDEF = 1,
}

/// FIL header, the 38 byte wrapper every page carries.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct FilPageHeader {
    /// (4 bytes) space id slot; doubles as the checksum on newer
    /// servers
    pub space_id: u32,

    /// (4 bytes) page number
    pub page_no: u32,

    /// (4 bytes) previous page in the same level
    pub prev_page: u32,

    /// (4 bytes) next page in the same level
    pub next_page: u32,

    /// (8 bytes) LSN of the last page modification
    pub lsn: u64,

    /// (2 bytes) page type
    pub page_type: PageTypes,

    /// (8 bytes) flush LSN, only meaningful on page 0
    pub flush_lsn: u64,

    /// (4 bytes) archive log number
    pub arch_log_no: u32,

    /// (8 bytes) index id, read out of the page header area at
    /// offset 66; keyed on for dictionary page grouping
    pub index_id: u64,
}

impl FilPageHeader {
    pub fn new(buf: &[u8]) -> Self {
        Self {
            space_id: util::u32_val(buf, 0),
            page_no: util::u32_val(buf, 4),
            prev_page: util::u32_val(buf, 8),
            next_page: util::u32_val(buf, 12),
            lsn: util::u64_val(buf, 16),
            page_type: PageTypes::from(util::u16_val(buf, 24)),
            flush_lsn: util::u64_val(buf, 26),
            arch_log_no: util::u32_val(buf, 34),
            index_id: util::u64_val(buf, 66),
        }
    }
}

/// Index page header, the 56 bytes behind the FIL header.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct IndexPageHeader {
    /// (2 bytes) number of page directory slots
    pub n_dir_slots: u16,

    /// (2 bytes) record heap top
    pub heap_top: u16,

    /// (2 bytes) number of heap records; the high bit marks the
    /// compact row format
    pub n_heap: u16,

    /// (2 bytes) offset of the first freed record, 0 if none
    pub free: u16,

    /// (2 bytes) bytes in deleted records
    pub garbage: u16,

    /// (2 bytes) last insert position
    pub last_insert: u16,

    /// (2 bytes) insert direction
    pub direction: u16,

    /// (2 bytes) consecutive inserts in the same direction
    pub n_direction: u16,

    /// (2 bytes) number of user records
    pub n_recs: u16,

    /// (8 bytes) highest transaction id, only set on secondary index
    /// leaf pages
    pub max_trx_id: u64,

    /// (2 bytes) b-tree level, 0 for leaves
    pub level: u16,

    /// (8 bytes) index id
    pub index_id: u64,

    /// (10 bytes) leaf file segment header
    #[derivative(Debug = "ignore")]
    pub btr_seg_leaf: Bytes,

    /// (10 bytes) internal file segment header
    #[derivative(Debug = "ignore")]
    pub btr_seg_top: Bytes,
}

impl IndexPageHeader {
    pub fn new(buf: &Bytes) -> Self {
        let base = FIL_HEADER_SIZE;
        Self {
            n_dir_slots: util::u16_val(buf, base),
            heap_top: util::u16_val(buf, base + 2),
            n_heap: util::u16_val(buf, base + 4),
            free: util::u16_val(buf, base + 6),
            garbage: util::u16_val(buf, base + 8),
            last_insert: util::u16_val(buf, base + 10),
            direction: util::u16_val(buf, base + 12),
            n_direction: util::u16_val(buf, base + 14),
            n_recs: util::u16_val(buf, base + 16),
            max_trx_id: util::u64_val(buf, base + 18),
            level: util::u16_val(buf, base + 26),
            index_id: util::u64_val(buf, base + 28),
            btr_seg_leaf: buf.slice(base + 36..base + 46),
            btr_seg_top: buf.slice(base + 46..base + 56),
        }
    }
}

/// Data dictionary header on page 7 of the system tablespace, see
/// dict0boot.h. The four root page numbers anchor the dictionary
/// index page groups.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct DictPageHeader {
    /// (8 bytes) latest assigned row id
    pub row_id: u64,

    /// (8 bytes) latest assigned table id
    pub table_id: u64,

    /// (8 bytes) latest assigned index id
    pub index_id: u64,

    /// (4 bytes) highest space id in use
    pub max_space_id: u32,

    /// (4 bytes) mix id low; unused by modern servers
    pub mix_id_low: u32,

    /// (4 bytes) root page of the SYS_TABLES clustered index
    pub tables_root: u32,

    /// (4 bytes) root page of SYS_TABLE_IDS
    pub table_ids_root: u32,

    /// (4 bytes) root page of SYS_COLUMNS
    pub columns_root: u32,

    /// (4 bytes) root page of SYS_INDEXES
    pub indexes_root: u32,

    /// (4 bytes) root page of SYS_FIELDS
    pub fields_root: u32,
}

impl DictPageHeader {
    pub fn new(buf: &[u8]) -> Self {
        let base = FIL_HEADER_SIZE;
        Self {
            row_id: util::u64_val(buf, base),
            table_id: util::u64_val(buf, base + 8),
            index_id: util::u64_val(buf, base + 16),
            max_space_id: util::u32_val(buf, base + 24),
            mix_id_low: util::u32_val(buf, base + 28),
            tables_root: util::u32_val(buf, base + 32),
            table_ids_root: util::u32_val(buf, base + 36),
            columns_root: util::u32_val(buf, base + 40),
            indexes_root: util::u32_val(buf, base + 44),
            fields_root: util::u32_val(buf, base + 48),
        }
    }
}

/// One 16 KiB page. Immutable after construction; the raw buffer
/// stays the canonical source for the record walks.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Page {
    /// raw page bytes
    #[derivative(Debug = "ignore")]
    pub buf: Bytes,

    pub fil_hdr: FilPageHeader,
    pub page_hdr: IndexPageHeader,

    /// dictionary header, only present on the system page
    pub dict_hdr: Option<DictPageHeader>,
}

impl Page {
    pub fn new(buf: Bytes) -> Result<Self> {
        if buf.len() != PAGE_SIZE {
            return Err(RecoveryError::ShortBuffer {
                at: 0,
                need: PAGE_SIZE,
                have: buf.len(),
            });
        }
        let fil_hdr = FilPageHeader::new(&buf);
        let page_hdr = IndexPageHeader::new(&buf);
        let dict_hdr = if fil_hdr.page_no == DICT_HDR_PAGE_NO {
            Some(DictPageHeader::new(&buf))
        } else {
            None
        };
        Ok(Self {
            buf,
            fil_hdr,
            page_hdr,
            dict_hdr,
        })
    }

    /// The compact flag lives in the high bit of PAGE_N_HEAP.
    pub fn is_compact(&self) -> bool {
        self.page_hdr.n_heap & PAGE_COMPACT_FLAG != 0
    }

    pub fn infimum(&self) -> usize {
        if self.is_compact() {
            PAGE_NEW_INFIMUM
        } else {
            PAGE_OLD_INFIMUM
        }
    }

    pub fn supremum(&self) -> usize {
        if self.is_compact() {
            PAGE_NEW_SUPREMUM
        } else {
            PAGE_OLD_SUPREMUM
        }
    }

    /// Walk the live record list from infimum's next pointer and
    /// project each record onto the table's columns.
    pub fn read_user_records(&self, table: &TableDef) -> Vec<Vec<Value>> {
        let next = util::u16_val(&self.buf, self.infimum() - 2) as usize;
        let start = if self.is_compact() {
            self.infimum() + next
        } else {
            next
        };
        self.walk_records(start, table)
    }

    /// Walk the freed record list from PAGE_FREE. Deleted rows keep
    /// their data until the space is reused.
    pub fn read_free_records(&self, table: &TableDef) -> Vec<Vec<Value>> {
        self.walk_records(self.page_hdr.free as usize, table)
    }

    fn walk_records(&self, start: usize, table: &TableDef) -> Vec<Vec<Value>> {
        let d = &self.buf;
        let supremum = self.supremum();
        let mut rows = Vec::new();
        let mut offset = start;
        let mut steps = 0;

        while offset > FIL_HEADER_SIZE + 56 && offset < PAGE_SIZE - 6 && offset != supremum {
            if steps >= MAX_PAGE_RECORDS {
                error!(
                    "record walk on page {} did not terminate, breaking",
                    self.fil_hdr.page_no
                );
                break;
            }
            steps += 1;

            let offsets = if self.is_compact() {
                record::offsets_compact(d, offset, table)
            } else {
                record::offsets_redundant(d, offset, table.columns.len())
            };
            let offsets = match offsets {
                Ok(o) => o,
                Err(e) => {
                    error!("record at offset {} unreadable: {}", offset, e);
                    break;
                }
            };
            if let Err(e) = record::check_field_sizes(&offsets, &table.columns) {
                error!("page {}: {}", self.fil_hdr.page_no, e);
                break;
            }
            rows.push(self.project_row(offset, &offsets, table));

            // the last 2 extra header bytes point at the next record
            let mut next = util::u16_val(d, offset - 2) as i64;
            if next == 0 {
                break;
            }
            if next > 32768 {
                next -= 65536;
            }
            if self.is_compact() {
                offset = (offset as i64 + next) as usize;
            } else {
                if next <= 0 {
                    break;
                }
                offset = next as usize;
            }
        }
        trace!(
            "page {}: walked {} records from {}",
            self.fil_hdr.page_no,
            rows.len(),
            start
        );
        rows
    }

    fn project_row(&self, origin: usize, offsets: &RecordOffsets, table: &TableDef) -> Vec<Value> {
        let d = &self.buf;
        let mut row = Vec::with_capacity(table.columns.len());
        for (i, col) in table.columns.iter().enumerate() {
            let value = match offsets.nth_field(i) {
                None => Value::Null,
                Some((start, len)) => {
                    let from = origin + start;
                    if from + len > d.len() {
                        error!(
                            "field {} of record at {} runs off the page",
                            col.col_name, origin
                        );
                        Value::Null
                    } else {
                        col.parse_value(&d[from..from + len])
                    }
                }
            };
            row.push(value);
        }
        row
    }
}

#[cfg(test)]
mod page_tests {
    use super::*;
    use crate::meta::def::{ColumnDef, DataTypes, MysqlTypes};

    fn fixture_table() -> TableDef {
        TableDef {
            db_name: "test".into(),
            tab_name: "test_int".into(),
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
                    col_name: "v".into(),
                    main_type: DataTypes::INT,
                    mysql_type: MysqlTypes::LONG,
                    data_len: 4,
                    is_nullable: true,
                    ..ColumnDef::default()
                },
            ],
            null_count: 1,
            ..TableDef::default()
        }
    }

    fn put2(d: &mut [u8], addr: usize, v: u16) {
        d[addr..addr + 2].copy_from_slice(&v.to_be_bytes());
    }

    /// Build a COMPACT leaf page with two live rows (1, 10) and
    /// (2, NULL).
    fn compact_fixture_page() -> Page {
        let mut d = vec![0u8; PAGE_SIZE];
        put2(&mut d, 24, PageTypes::INDEX as u16); // FIL page type
        put2(&mut d, 42, 0x8000 | 4); // n_heap with the compact flag
        put2(&mut d, 54, 2); // n_recs

        // infimum/supremum markers
        d[PAGE_NEW_INFIMUM..PAGE_NEW_INFIMUM + 8].copy_from_slice(b"infimum\0");
        d[PAGE_NEW_SUPREMUM..PAGE_NEW_SUPREMUM + 8].copy_from_slice(b"supremum");

        // row (1, 10) at origin 128
        let r1 = 128;
        d[r1 - 6] = 0x00; // null bitmap
        put2(&mut d, r1 - 2, 32); // next: 160 - 128
        d[r1..r1 + 4].copy_from_slice(&1u32.to_be_bytes());
        d[r1 + 4..r1 + 10].copy_from_slice(&[0; 6]);
        d[r1 + 10..r1 + 17].copy_from_slice(&[0; 7]);
        d[r1 + 17..r1 + 21].copy_from_slice(&0x8000_000Au32.to_be_bytes());

        // row (2, NULL) at origin 160
        let r2 = 160;
        d[r2 - 6] = 0x01; // v is NULL
        put2(&mut d, r2 - 2, (PAGE_NEW_SUPREMUM as i64 - r2 as i64) as u16);
        d[r2..r2 + 4].copy_from_slice(&2u32.to_be_bytes());
        d[r2 + 4..r2 + 10].copy_from_slice(&[0; 6]);
        d[r2 + 10..r2 + 17].copy_from_slice(&[0; 7]);

        // infimum points at the first user record
        put2(
            &mut d,
            PAGE_NEW_INFIMUM - 2,
            (r1 - PAGE_NEW_INFIMUM) as u16,
        );

        Page::new(Bytes::from(d)).unwrap()
    }

    #[test]
    fn compact_page_walk_projects_rows() {
        let page = compact_fixture_page();
        assert!(page.is_compact());
        let rows = page.read_user_records(&fixture_table());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Value::UInt(1));
        assert_eq!(rows[0][3], Value::Int(10));
        assert_eq!(rows[1][0], Value::UInt(2));
        assert_eq!(rows[1][3], Value::Null);
    }

    #[test]
    fn empty_page_yields_no_rows() {
        let mut d = vec![0u8; PAGE_SIZE];
        put2(&mut d, 42, 0x8000 | 2);
        // infimum points straight at supremum
        put2(
            &mut d,
            PAGE_NEW_INFIMUM - 2,
            (PAGE_NEW_SUPREMUM - PAGE_NEW_INFIMUM) as u16,
        );
        let page = Page::new(Bytes::from(d)).unwrap();
        assert!(page.read_user_records(&fixture_table()).is_empty());
    }

    #[test]
    fn free_walk_starts_at_page_free() {
        let mut page = compact_fixture_page();
        // mark the first row as the freed list head with no successor
        let mut d = page.buf.to_vec();
        put2(&mut d, 44, 128); // PAGE_FREE
        put2(&mut d, 46, 21); // PAGE_GARBAGE
        put2(&mut d, 128 - 2, 0); // freed record has no next
        page = Page::new(Bytes::from(d)).unwrap();

        let rows = page.read_free_records(&fixture_table());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Value::UInt(1));
        assert_eq!(rows[0][3], Value::Int(10));
    }
}
