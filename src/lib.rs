#![allow(dead_code)]
#![allow(non_camel_case_types)]
#![allow(clippy::upper_case_acronyms)]

pub mod app;
pub mod error;
pub mod ibd;
pub mod meta;
pub mod redo;
pub mod sql;
pub mod util;
