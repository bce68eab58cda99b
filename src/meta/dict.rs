//! Data dictionary bootstrap from the system tablespace.
//!
//! The dictionary tables (SYS_TABLES, SYS_COLUMNS, SYS_INDEXES,
//! SYS_FIELDS) are ordinary REDUNDANT-format clustered indexes whose
//! root page numbers sit in the dictionary header on page 7. Their
//! column shapes are fixed by the server, so the rows can be decoded
//! before any dictionary exists.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use lazy_static::lazy_static;
use log::{debug, info, warn};

use crate::error::{RecoveryError, Result};
use crate::ibd::factory::DatafileFactory;
use crate::ibd::page::{Page, DICT_HDR_PAGE_NO};
use crate::meta::def::{
    ColumnDef, DataTypes, IndexDef, IndexFieldDef, MysqlTypes, TableDef, DATA_BINARY_TYPE,
    DATA_NOT_NULL, DATA_UNSIGNED,
};
use crate::meta::val::Value;

/// Clustered index ids of the dictionary tables, see dict0boot.h.
pub const DICT_TABLES_ID: u64 = 1;
pub const DICT_COLUMNS_ID: u64 = 2;
pub const DICT_INDEXES_ID: u64 = 3;
pub const DICT_FIELDS_ID: u64 = 4;

fn sys_col(name: &str, main_type: DataTypes, pos: u64, len: u64, unsigned: bool) -> ColumnDef {
    ColumnDef {
        col_name: name.into(),
        main_type,
        mysql_type: MysqlTypes::DECIMAL,
        pos,
        data_len: len,
        is_unsigned: unsigned,
        ..ColumnDef::default()
    }
}

fn sys_shape(columns: Vec<ColumnDef>) -> TableDef {
    TableDef {
        columns,
        null_count: 0,
        ..TableDef::default()
    }
}

lazy_static! {
    /// Column shapes of the dictionary tables, see dict0boot.cc.
    static ref SYS_TABLES_SHAPE: TableDef = sys_shape(vec![
        sys_col("NAME", DataTypes::BINARY, 0, 0, false),
        sys_col("DB_TRX_ID", DataTypes::VARCHAR, 1, 6, false),
        sys_col("DB_ROLL_PTR", DataTypes::VARCHAR, 2, 7, false),
        sys_col("ID", DataTypes::BINARY, 3, 8, false),
        sys_col("N_COLS", DataTypes::INT, 4, 4, false),
        sys_col("TYPE", DataTypes::INT, 5, 4, true),
        sys_col("MIX_ID", DataTypes::BINARY, 6, 0, false),
        sys_col("MIX_LEN", DataTypes::INT, 7, 4, true),
        sys_col("CLUSTER_NAME", DataTypes::BINARY, 8, 0, false),
        sys_col("SPACE", DataTypes::INT, 9, 4, true),
    ]);
    static ref SYS_COLUMNS_SHAPE: TableDef = sys_shape(vec![
        sys_col("TABLE_ID", DataTypes::BINARY, 0, 8, false),
        sys_col("POS", DataTypes::INT, 1, 4, true),
        sys_col("DB_TRX_ID", DataTypes::VARCHAR, 2, 6, false),
        sys_col("DB_ROLL_PTR", DataTypes::VARCHAR, 3, 7, false),
        sys_col("NAME", DataTypes::BINARY, 4, 0, false),
        sys_col("MTYPE", DataTypes::INT, 5, 4, true),
        sys_col("PRTYPE", DataTypes::INT, 6, 4, true),
        sys_col("LEN", DataTypes::INT, 7, 4, true),
        sys_col("PREC", DataTypes::INT, 8, 4, true),
    ]);
    static ref SYS_INDEXES_SHAPE: TableDef = sys_shape(vec![
        sys_col("TABLE_ID", DataTypes::BINARY, 0, 8, false),
        sys_col("ID", DataTypes::BINARY, 1, 8, false),
        sys_col("DB_TRX_ID", DataTypes::VARCHAR, 2, 6, false),
        sys_col("DB_ROLL_PTR", DataTypes::VARCHAR, 3, 7, false),
        sys_col("NAME", DataTypes::BINARY, 4, 0, false),
        sys_col("N_FIELDS", DataTypes::INT, 5, 4, true),
        sys_col("TYPE", DataTypes::INT, 6, 4, true),
        sys_col("SPACE", DataTypes::INT, 7, 4, true),
        sys_col("PAGE_NO", DataTypes::INT, 8, 4, true),
    ]);
    static ref SYS_FIELDS_SHAPE: TableDef = sys_shape(vec![
        sys_col("INDEX_ID", DataTypes::BINARY, 0, 8, false),
        sys_col("POS", DataTypes::INT, 1, 4, true),
        sys_col("DB_TRX_ID", DataTypes::VARCHAR, 2, 6, false),
        sys_col("DB_ROLL_PTR", DataTypes::VARCHAR, 3, 7, false),
        sys_col("COL_NAME", DataTypes::BINARY, 4, 0, false),
    ]);
}

/// The table registry. Built once per run, read-only afterwards.
#[derive(Debug, Default)]
pub struct Dictionary {
    pub tables: BTreeMap<u64, TableDef>,
    space_index: HashMap<u64, u64>, // space id -> table id
}

impl Dictionary {
    /// Bootstrap the registry out of a system tablespace file.
    pub fn load(path: &Path) -> Result<Dictionary> {
        let mut dict = Dictionary::default();

        let pages = read_all_pages(path)?;
        let groups = group_dict_pages(&pages)?;

        dict.scan_sys_tables(group(&groups, DICT_TABLES_ID, "SYS_TABLES")?)?;
        dict.scan_sys_columns(group(&groups, DICT_COLUMNS_ID, "SYS_COLUMNS")?)?;
        dict.scan_sys_indexes(group(&groups, DICT_INDEXES_ID, "SYS_INDEXES")?)?;
        dict.scan_sys_fields(group(&groups, DICT_FIELDS_ID, "SYS_FIELDS")?)?;
        dict.normalize();

        dict.space_index = dict
            .tables
            .iter()
            .map(|(id, t)| (t.space_id, *id))
            .collect();
        info!("loaded {} tables from the data dictionary", dict.tables.len());
        Ok(dict)
    }

    pub fn table_by_id(&self, table_id: u64) -> Option<&TableDef> {
        self.tables.get(&table_id)
    }

    pub fn table_by_space(&self, space_id: u64) -> Option<&TableDef> {
        self.space_index
            .get(&space_id)
            .and_then(|id| self.tables.get(id))
    }

    pub fn table_by_name(&self, db_name: &str, tab_name: &str) -> Option<&TableDef> {
        self.tables
            .values()
            .find(|t| t.db_name == db_name && t.tab_name == tab_name)
    }

    fn scan_sys_tables(&mut self, pages: &[&Page]) -> Result<()> {
        debug!("start parse SYS_TABLES");
        for page in pages {
            for row in page.read_user_records(&SYS_TABLES_SHAPE) {
                let (Some(table_id), Some(space_id)) = (row_u64(&row, 3), row_u64(&row, 9)) else {
                    continue;
                };
                let name = row[0].to_string();
                // the name is db/table; names without a slash carry
                // a blank db
                let (db_name, tab_name) = match name.split_once('/') {
                    Some((db, tab)) => (db.to_string(), tab.to_string()),
                    None => (String::new(), name),
                };
                self.tables.insert(
                    table_id,
                    TableDef {
                        db_name,
                        tab_name,
                        table_id,
                        space_id,
                        ..TableDef::default()
                    },
                );
            }
        }
        Ok(())
    }

    fn scan_sys_columns(&mut self, pages: &[&Page]) -> Result<()> {
        debug!("start parse SYS_COLUMNS");
        for page in pages {
            for row in page.read_user_records(&SYS_COLUMNS_SHAPE) {
                let (Some(table_id), Some(pos), Some(mtype), Some(prtype), Some(len)) = (
                    row_u64(&row, 0),
                    row_u64(&row, 1),
                    row_u64(&row, 5),
                    row_u64(&row, 6),
                    row_u64(&row, 7),
                ) else {
                    continue;
                };
                let Some(table) = self.tables.get_mut(&table_id) else {
                    debug!("SYS_COLUMNS row for unknown table id {}", table_id);
                    continue;
                };

                let main_type = DataTypes::from(mtype as u8);
                let is_nullable = prtype & DATA_NOT_NULL == 0;
                if is_nullable {
                    table.null_count += 1;
                }
                table.columns.push(ColumnDef {
                    col_name: row[4].to_string(),
                    main_type,
                    mysql_type: MysqlTypes::from((prtype & 0xFF) as u8),
                    pos,
                    // binary columns carry no usable length
                    data_len: if main_type == DataTypes::BINARY { 0 } else { len },
                    is_nullable,
                    is_unsigned: prtype & DATA_UNSIGNED != 0,
                    is_binary: main_type == DataTypes::BLOB && prtype & DATA_BINARY_TYPE != 0,
                    table_id,
                });
            }
        }
        Ok(())
    }

    fn scan_sys_indexes(&mut self, pages: &[&Page]) -> Result<()> {
        debug!("start parse SYS_INDEXES");
        for page in pages {
            for row in page.read_user_records(&SYS_INDEXES_SHAPE) {
                let (Some(table_id), Some(index_id), Some(field_count), Some(index_type)) = (
                    row_u64(&row, 0),
                    row_u64(&row, 1),
                    row_u64(&row, 5),
                    row_u64(&row, 6),
                ) else {
                    continue;
                };
                let Some(table) = self.tables.get_mut(&table_id) else {
                    debug!("SYS_INDEXES row for unknown table id {}", table_id);
                    continue;
                };
                table.indexes.insert(
                    index_id,
                    IndexDef {
                        id: index_id,
                        name: row[4].to_string(),
                        index_type,
                        field_count,
                        fields: Vec::new(),
                    },
                );
            }
        }
        Ok(())
    }

    fn scan_sys_fields(&mut self, pages: &[&Page]) -> Result<()> {
        debug!("start parse SYS_FIELDS");
        let mut fields_by_index: HashMap<u64, Vec<IndexFieldDef>> = HashMap::new();
        for page in pages {
            for row in page.read_user_records(&SYS_FIELDS_SHAPE) {
                let (Some(index_id), Some(col_pos)) = (row_u64(&row, 0), row_u64(&row, 1)) else {
                    continue;
                };
                fields_by_index
                    .entry(index_id)
                    .or_default()
                    .push(IndexFieldDef {
                        col_pos,
                        col_name: row[4].to_string(),
                    });
            }
        }
        for table in self.tables.values_mut() {
            for (index_id, index) in table.indexes.iter_mut() {
                if let Some(fields) = fields_by_index.get(index_id) {
                    index.fields = fields.clone();
                }
            }
        }
        Ok(())
    }

    /// Finalize every table: order columns by declared position, move
    /// the primary key to the front and splice in the hidden columns.
    /// Afterwards the column vector matches the physical order of the
    /// clustered-index leaf record.
    fn normalize(&mut self) {
        for table in self.tables.values_mut() {
            table.columns.sort_by_key(|c| c.pos);
            let cols = std::mem::take(&mut table.columns);
            for col in cols {
                if col.pos == table.columns.len() as u64 {
                    table.columns.push(col);
                } else {
                    warn!(
                        "table {} drops column {} at out-of-order position {}",
                        table.tab_name, col.col_name, col.pos
                    );
                }
            }

            let primary = table
                .indexes
                .values()
                .find(|i| i.name.trim() == "PRIMARY")
                .cloned();
            if let Some(pk) = primary {
                let mut rest = std::mem::take(&mut table.columns);
                let mut front = Vec::with_capacity(rest.len());
                for field in &pk.fields {
                    if let Some(i) = rest.iter().position(|c| c.col_name == field.col_name) {
                        front.push(rest.remove(i));
                    }
                }
                front.extend(rest);
                table.columns = front;

                let n = (pk.field_count as usize).min(table.columns.len());
                table
                    .columns
                    .insert(n, internal_column("DB_TRX_ID", 6, table.table_id));
                table
                    .columns
                    .insert(n + 1, internal_column("DB_ROLL_PTR", 7, table.table_id));
            } else if table
                .indexes
                .values()
                .any(|i| i.name.trim() == "GEN_CLUST_INDEX")
            {
                table
                    .columns
                    .insert(0, internal_column("DB_ROW_ID", 6, table.table_id));
                table
                    .columns
                    .insert(1, internal_column("DB_TRX_ID", 6, table.table_id));
                table
                    .columns
                    .insert(2, internal_column("DB_ROLL_PTR", 7, table.table_id));
            }
        }
    }
}

fn internal_column(name: &str, len: u64, table_id: u64) -> ColumnDef {
    ColumnDef {
        col_name: name.into(),
        main_type: DataTypes::MISSING,
        data_len: len,
        table_id,
        ..ColumnDef::default()
    }
}

fn row_u64(row: &[Value], i: usize) -> Option<u64> {
    match row.get(i) {
        Some(Value::UInt(v)) => Some(*v),
        Some(Value::Int(v)) => Some(*v as u64),
        _ => None,
    }
}

fn read_all_pages(path: &Path) -> Result<Vec<Page>> {
    let mut fact = DatafileFactory::from_file(path.to_path_buf())?;
    let mut pages = Vec::with_capacity(fact.page_count());
    let mut seen = HashSet::new();
    for page_no in 0..fact.page_count() {
        let page = Page::new(fact.read_page(page_no)?)?;
        // duplicated page images are kept first-wins
        if seen.insert(page.fil_hdr.page_no) {
            pages.push(page);
        }
    }
    Ok(pages)
}

/// Group the dictionary pages by index id. A page whose number is one
/// of the four dictionary roots anchors its group; later pages with
/// the same index id join it.
fn group_dict_pages(pages: &[Page]) -> Result<HashMap<u64, Vec<&Page>>> {
    let system_page = pages
        .iter()
        .find(|p| p.fil_hdr.page_no == DICT_HDR_PAGE_NO)
        .ok_or(RecoveryError::MissingDictionary("system header page"))?;
    let hdr = system_page
        .dict_hdr
        .as_ref()
        .ok_or(RecoveryError::MissingDictionary("dictionary header"))?;
    let roots = [
        hdr.tables_root,
        hdr.columns_root,
        hdr.indexes_root,
        hdr.fields_root,
    ];
    debug!(
        "dictionary roots: tables={}, columns={}, indexes={}, fields={}",
        hdr.tables_root, hdr.columns_root, hdr.indexes_root, hdr.fields_root
    );

    let mut groups: HashMap<u64, Vec<&Page>> = HashMap::new();
    for page in pages {
        let index_id = page.fil_hdr.index_id;
        if roots.contains(&page.fil_hdr.page_no) {
            groups.entry(index_id).or_default().push(page);
        } else if let Some(group) = groups.get_mut(&index_id) {
            group.push(page);
        }
    }
    Ok(groups)
}

fn group<'a>(
    groups: &'a HashMap<u64, Vec<&'a Page>>,
    index_id: u64,
    what: &'static str,
) -> Result<&'a [&'a Page]> {
    groups
        .get(&index_id)
        .map(|v| v.as_slice())
        .ok_or(RecoveryError::MissingDictionary(what))
}
