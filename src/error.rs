use thiserror::Error;

/// Error kinds of the recovery core. The driver layer wraps these
/// with anyhow context; the parsing loops branch on the kind to
/// decide between skipping a record, breaking a page walk, and
/// failing the run.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Ran off the end of a slice while reading a fixed-width field.
    #[error("buffer too short: need {need} bytes at {at}, have {have}")]
    ShortBuffer { at: usize, need: usize, have: usize },

    /// A dictionary index (SYS_TABLES, SYS_COLUMNS, SYS_INDEXES,
    /// SYS_FIELDS) was not found in the system tablespace.
    #[error("dictionary index not found: {0}")]
    MissingDictionary(&'static str),

    /// A table id or space id has no entry in the dictionary.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A field position has no column in the table definition.
    #[error("unknown field: table {table}, position {pos}")]
    UnknownField { table: String, pos: u64 },

    /// A length or offset invariant of the on-disk format was
    /// violated.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RecoveryError>;
