use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use log::{debug, info, warn};
use strum::{Display, EnumString};

use crate::error::RecoveryError;
use crate::ibd::factory::DatafileFactory;
use crate::ibd::page::{Page, PageTypes, PAGE_SIZE};
use crate::meta::dict::Dictionary;
use crate::redo::block;
use crate::redo::mlog::RedoParser;
use crate::sql;

// http://patorjk.com/software/taag/#p=display&f=Slant&t=db-recovery
const LOGO: &str = r#"
       ____
  ____/ / /_        ________  _________ _   _____  _______  __
 / __  / __ \______/ ___/ _ \/ ___/ __ \ | / / _ \/ ___/ / / /
/ /_/ / /_/ /_____/ /  /  __/ /__/ /_/ / |/ /  __/ /  / /_/ /
\__,_/_.___/     /_/   \___/\___/\____/|___/\___/_/   \__, /
                                                     /____/
"#;

#[derive(Debug, Parser)]
#[command(name = "db-recovery", about = "Recover MySQL/InnoDB row data from data files and redo logs", long_about = None)]
pub struct Args {
    /// Directory for the log file.
    #[arg(long = "LogPath", global = true, default_value = "/tmp")]
    pub log_path: PathBuf,

    /// Log level: trace, debug, info, warn, error, fatal.
    #[arg(long = "LogLevel", global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Recovery related commands.
    Recovery {
        #[command(subcommand)]
        source: RecoverySources,
    },

    /// Print version info.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum RecoverySources {
    /// Emit REPLACE INTO statements for rows found in a table
    /// tablespace file.
    #[command(name = "FromDataFile")]
    FromDataFile {
        /// The path of the system tablespace data file.
        #[arg(long = "SysDataFile")]
        sys_data_file: PathBuf,

        /// The path of the table tablespace file.
        #[arg(long = "TableDataFile")]
        table_data_file: PathBuf,

        /// The database name.
        #[arg(long = "DBName")]
        db_name: String,

        /// The table name.
        #[arg(long = "TableName")]
        table_name: String,

        /// RecoveryData also walks the freed record lists.
        #[arg(long = "OpType", default_value = "PrintData")]
        op_type: OpTypes,
    },

    /// Emit UPDATE statements rebuilt from undo images in redo log
    /// files.
    #[command(name = "FromRedoFile")]
    FromRedoFile {
        /// The path of the system tablespace data file.
        #[arg(long = "SysDataFile")]
        sys_data_file: PathBuf,

        /// Comma separated redo log paths, in log order.
        #[arg(long = "RedoFile", value_delimiter = ',')]
        redo_file: Vec<PathBuf>,

        /// Only emit statements for this database.
        #[arg(long = "DBName", default_value = "")]
        db_name: String,

        /// Only emit statements for this table.
        #[arg(long = "TableName", default_value = "")]
        table_name: String,
    },
}

#[derive(Debug, Display, EnumString, Clone, Copy, Eq, PartialEq)]
pub enum OpTypes {
    RecoveryData,
    RecoveryStruct,
    PrintData,
}

#[derive(Debug)]
pub struct App {
    pub timer: Instant,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            timer: Instant::now(),
        }
    }

    pub fn time_costs(&self) -> Duration {
        self.timer.elapsed()
    }

    pub fn run(&mut self, command: Commands) -> Result<()> {
        debug!("{:?}", command);

        match command {
            Commands::Recovery { source } => match source {
                RecoverySources::FromDataFile {
                    sys_data_file,
                    table_data_file,
                    db_name,
                    table_name,
                    op_type,
                } => self.do_from_data_file(
                    &sys_data_file,
                    &table_data_file,
                    &db_name,
                    &table_name,
                    op_type,
                )?,
                RecoverySources::FromRedoFile {
                    sys_data_file,
                    redo_file,
                    db_name,
                    table_name,
                } => self.do_from_redo_file(&sys_data_file, &redo_file, &db_name, &table_name)?,
            },
            Commands::Version => self.do_version(),
        }

        Ok(())
    }

    fn do_from_data_file(
        &mut self,
        sys_path: &Path,
        data_path: &Path,
        db_name: &str,
        table_name: &str,
        op_type: OpTypes,
    ) -> Result<()> {
        let dict = Dictionary::load(sys_path)?;
        let table = dict.table_by_name(db_name, table_name).ok_or_else(|| {
            RecoveryError::UnknownTable(format!("`{}`.`{}`", db_name, table_name))
        })?;
        if op_type == OpTypes::RecoveryStruct {
            warn!("RecoveryStruct is not supported, printing row data instead");
        }
        let recovery = op_type == OpTypes::RecoveryData;

        let mut fact = DatafileFactory::from_file(data_path.to_path_buf())?;
        let mut seen = HashSet::new();
        for page_no in 0..fact.page_count() {
            let page = match Page::new(fact.read_page(page_no)?) {
                Ok(p) => p,
                Err(e) => {
                    warn!("page {} unreadable: {}", page_no, e);
                    continue;
                }
            };
            if !seen.insert(page.fil_hdr.page_no) {
                continue;
            }

            // only clustered index leaf pages hold full rows
            if page.fil_hdr.page_type != PageTypes::INDEX
                || page.page_hdr.level != 0
                || page.page_hdr.max_trx_id != 0
            {
                continue;
            }

            let mut rows = page.read_user_records(table);
            if recovery {
                let ph = &page.page_hdr;
                if ph.free > 0 && ph.garbage > 0 && (ph.free as usize) <= PAGE_SIZE {
                    rows.extend(page.read_free_records(table));
                } else if ph.free > 0 {
                    debug!(
                        "skip free list of page {}: free={}, garbage={}",
                        page_no, ph.free, ph.garbage
                    );
                }
            }
            if rows.is_empty() {
                continue;
            }
            for row in &rows {
                println!("{}", sql::replace_into(table, row));
            }
        }
        Ok(())
    }

    fn do_from_redo_file(
        &mut self,
        sys_path: &Path,
        redo_files: &[PathBuf],
        db_name: &str,
        table_name: &str,
    ) -> Result<()> {
        let dict = Dictionary::load(sys_path)?;
        let stream = block::assemble_stream(redo_files)?;
        info!(
            "assembled {} bytes of redo records from {} files",
            stream.len(),
            redo_files.len()
        );

        let parser = RedoParser::new(&dict, db_name, table_name);
        for statement in parser.parse_stream(&stream)? {
            println!("{}", statement);
        }
        Ok(())
    }

    fn do_version(&self) {
        println!("{}", LOGO);
        println!("{:>12} => {}", "project".green(), env!("CARGO_PKG_NAME").blue());
        println!(
            "{:>12} => {}",
            "version".green(),
            env!("CARGO_PKG_VERSION").blue()
        );
        println!(
            "{:>12} => {}",
            "git sha".green(),
            option_env!("GIT_SHA").unwrap_or("Not provided").blue()
        );
        println!(
            "{:>12} => {}",
            "build time".green(),
            option_env!("BUILD_TIME").unwrap_or("Not provided").blue()
        );
        println!(
            "{:>12} => {}",
            "os/arch".green(),
            format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH).blue()
        );
    }
}
