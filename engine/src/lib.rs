//! Reference record and index stores used by the system manager.

pub mod heap_file;
pub mod index_file;
