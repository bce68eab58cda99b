//! SQL statement text for recovered rows.

use crate::meta::def::{MysqlTypes, TableDef};
use crate::meta::val::Value;

/// Backslash-escape the characters MySQL string literals cannot
/// carry raw: NUL, newline, carriage return, backslash, both quotes
/// and ctrl-Z.
pub fn escape_value(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\x1a' => out.push_str("\\Z"),
            _ => out.push(c),
        }
    }
    out
}

/// REPLACE INTO statement for one recovered row. `row` is aligned
/// with the table's normalized column vector; the hidden columns are
/// skipped, BIT values get the b prefix and binary values go through
/// unhex().
pub fn replace_into(table: &TableDef, row: &[Value]) -> String {
    let mut buf = String::new();
    buf.push_str(&format!(
        "REPLACE INTO `{}`.`{}` VALUES (",
        table.db_name, table.tab_name
    ));
    let mut first = true;
    for (col, value) in table.columns.iter().zip(row.iter()) {
        if col.is_internal() {
            continue;
        }
        if first {
            first = false;
        } else {
            buf.push(',');
        }
        if col.mysql_type == MysqlTypes::BIT {
            buf.push('b');
        }
        match value {
            Value::Null => buf.push_str("NULL"),
            Value::HexBlob(h) => {
                buf.push_str("unhex('");
                buf.push_str(h);
                buf.push_str("')");
            }
            v => {
                buf.push('\'');
                buf.push_str(&escape_value(&v.to_string()));
                buf.push('\'');
            }
        }
    }
    buf.push_str(");");
    buf
}

/// UPDATE statement rebuilt from an undo prior image. The WHERE side
/// is the primary key, joined with ` and `.
pub fn update(
    db_name: &str,
    tab_name: &str,
    sets: &[(String, Value)],
    keys: &[(String, Value)],
) -> String {
    let set_clause = sets
        .iter()
        .map(|(name, v)| assign(name, v))
        .collect::<Vec<_>>()
        .join(", ");
    let where_clause = keys
        .iter()
        .map(|(name, v)| assign(name, v))
        .collect::<Vec<_>>()
        .join(" and ");
    format!(
        "UPDATE `{}`.`{}` SET {} WHERE {};",
        db_name, tab_name, set_clause, where_clause
    )
}

fn assign(name: &str, value: &Value) -> String {
    match value {
        Value::Null => format!("`{}`=NULL", name),
        v => format!("`{}`='{}'", name, escape_value(&v.to_string())),
    }
}
