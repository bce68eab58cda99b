use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use bytes::Bytes;
use log::info;

use crate::error::Result;
use crate::ibd::page::PAGE_SIZE;

/// Page-unit access to a tablespace file.
#[derive(Debug)]
pub struct DatafileFactory {
    pub target: PathBuf, // target datafile
    file: File,          // tablespace file descriptor
    pub size: usize,     // file size
}

impl DatafileFactory {
    pub fn from_file(target: PathBuf) -> Result<Self> {
        let file = File::open(&target)?;
        let size = file.metadata()?.len() as usize;
        info!("load {:?}, size = {}", &target, size);
        Ok(Self { target, file, size })
    }

    pub fn page_count(&self) -> usize {
        self.size / PAGE_SIZE
    }

    pub fn read_page(&mut self, page_no: usize) -> Result<Bytes> {
        self.file
            .seek(SeekFrom::Start((page_no * PAGE_SIZE) as u64))?;
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}
