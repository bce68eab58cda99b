use std::collections::BTreeMap;

use num_enum::FromPrimitive;
use strum::{Display, EnumString};

/// InnoDB column main type, see data0type.h.
#[repr(u8)]
#[derive(Debug, Display, EnumString, FromPrimitive, Default, Clone, Copy, Eq, PartialEq)]
pub enum DataTypes {
    MISSING = 0,
    VARCHAR = 1,
    CHAR = 2,
    FIXBINARY = 3,
    BINARY = 4,
    BLOB = 5,
    INT = 6,
    SYS_CHILD = 7,
    SYS = 8,
    FLOAT = 9,
    DOUBLE = 10,
    DECIMAL = 11,
    VARMYSQL = 12,
    MYSQL = 13,
    #[default]
    UNDEF = 14,
}

/// MySQL server column type code, the low byte of
/// SYS_COLUMNS.PRTYPE. See enum_field_types.
#[repr(u8)]
#[derive(Debug, Display, EnumString, FromPrimitive, Default, Clone, Copy, Eq, PartialEq)]
pub enum MysqlTypes {
    DECIMAL = 0,
    TINY = 1,
    SHORT = 2,
    LONG = 3,
    FLOAT = 4,
    DOUBLE = 5,
    NULL = 6,
    TIMESTAMP = 7,
    LONGLONG = 8,
    INT24 = 9,
    DATE = 10,
    TIME = 11,
    DATETIME = 12,
    YEAR = 13,
    NEWDATE = 14,
    VARCHAR = 15,
    BIT = 16,
    TIMESTAMP2 = 17,
    DATETIME2 = 18,
    TIME2 = 19,
    NEWDECIMAL = 246,
    ENUM = 247,
    SET = 248,
    TINY_BLOB = 249,
    MEDIUM_BLOB = 250,
    LONG_BLOB = 251,
    BLOB = 252,
    VAR_STRING = 253,
    STRING = 254,
    GEOMETRY = 255,
    #[default]
    UNDEF = 244,
}

/// PRTYPE flag: column declared NOT NULL.
pub const DATA_NOT_NULL: u64 = 256;
/// PRTYPE flag: column is unsigned.
pub const DATA_UNSIGNED: u64 = 512;
/// PRTYPE flag: binary (as opposed to TEXT) storage of a BLOB.
pub const DATA_BINARY_TYPE: u64 = 1024;

/// Column definition. After the normalize pass the table's column
/// vector is in clustered-index leaf record order.
#[derive(Debug, Default, Clone)]
pub struct ColumnDef {
    pub col_name: String,       // column name
    pub main_type: DataTypes,   // InnoDB main type, SYS_COLUMNS.MTYPE
    pub mysql_type: MysqlTypes, // server type code, PRTYPE & 0xFF
    pub pos: u64,               // declared ordinal position
    pub data_len: u64,          // declared length in bytes
    pub is_nullable: bool,      // PRTYPE & 256 == 0
    pub is_unsigned: bool,      // PRTYPE & 512 != 0
    pub is_binary: bool,        // BLOB column with PRTYPE & 1024
    pub table_id: u64,          // owning table id
}

impl ColumnDef {
    /// Fixed on-disk width of the column, 0 when variable-length.
    pub fn fixed_length(&self) -> u64 {
        match self.main_type {
            DataTypes::BLOB | DataTypes::VARMYSQL | DataTypes::MYSQL => 0,
            _ => self.data_len,
        }
    }

    /// One of the three hidden row columns.
    pub fn is_internal(&self) -> bool {
        matches!(
            self.col_name.as_str(),
            "DB_ROW_ID" | "DB_TRX_ID" | "DB_ROLL_PTR"
        )
    }
}

/// Index definition from SYS_INDEXES.
#[derive(Debug, Default, Clone)]
pub struct IndexDef {
    pub id: u64,                     // index id
    pub name: String,                // index name
    pub index_type: u64,             // SYS_INDEXES.TYPE flags
    pub field_count: u64,            // SYS_INDEXES.N_FIELDS
    pub fields: Vec<IndexFieldDef>,  // bound from SYS_FIELDS
}

/// A field of an index; a weak reference into the owning table's
/// column vector.
#[derive(Debug, Default, Clone)]
pub struct IndexFieldDef {
    pub col_pos: u64,     // position within the index
    pub col_name: String, // referenced column name
}

/// Table definition from SYS_TABLES, mutated while the dictionary
/// scans run and frozen after normalization.
#[derive(Debug, Default, Clone)]
pub struct TableDef {
    pub db_name: String,
    pub tab_name: String,
    pub table_id: u64,
    pub space_id: u64,
    pub columns: Vec<ColumnDef>,
    pub indexes: BTreeMap<u64, IndexDef>,
    pub null_count: usize, // number of nullable columns
}

impl TableDef {
    pub fn column_by_name(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.col_name == name)
    }

    /// Fields of the clustered index: PRIMARY when the table has one,
    /// otherwise the synthetic DB_ROW_ID key of GEN_CLUST_INDEX.
    pub fn clustered_fields(&self) -> Vec<IndexFieldDef> {
        for idx in self.indexes.values() {
            if idx.name.trim() == "PRIMARY" {
                return idx.fields.clone();
            }
        }
        for idx in self.indexes.values() {
            if idx.name.trim() == "GEN_CLUST_INDEX" {
                return vec![IndexFieldDef {
                    col_pos: 0,
                    col_name: "DB_ROW_ID".into(),
                }];
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod def_tests {
    use super::*;

    #[test]
    fn type_codes_from_raw_values() {
        assert_eq!(DataTypes::from(6u8), DataTypes::INT);
        assert_eq!(DataTypes::from(12u8), DataTypes::VARMYSQL);
        assert_eq!(DataTypes::from(200u8), DataTypes::UNDEF);
        assert_eq!(MysqlTypes::from(3u8), MysqlTypes::LONG);
        assert_eq!(MysqlTypes::from(252u8), MysqlTypes::BLOB);
        assert_eq!(MysqlTypes::from(244u8), MysqlTypes::UNDEF);
    }

    #[test]
    fn fixed_length_pivots_on_main_type() {
        let mut col = ColumnDef {
            main_type: DataTypes::INT,
            data_len: 4,
            ..ColumnDef::default()
        };
        assert_eq!(col.fixed_length(), 4);
        col.main_type = DataTypes::VARMYSQL;
        assert_eq!(col.fixed_length(), 0);
        col.main_type = DataTypes::BLOB;
        assert_eq!(col.fixed_length(), 0);
    }
}
