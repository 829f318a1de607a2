//! Store module - interfaces of the record and index storage the system manager coordinates.
//!
//! Every call receives the directory of the open database explicitly, implementations must not
//! rely on the current working directory.

use std::{fmt, io, path::Path};

use thiserror::Error;

use crate::catalog::ColumnMetadata;
use crate::consts::INDEX_FILE_EXTENSION;
use crate::lock::TransactionId;

/// Locator of a single record inside of a record file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub page_no: u64,
    pub slot_no: u32,
}

impl RecordId {
    pub fn new(page_no: u64, slot_no: u32) -> Self {
        RecordId { page_no, slot_no }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_no, self.slot_no)
    }
}

/// Error returned by record and index stores
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying IO module returned error
    #[error("io error occurred: {0}")]
    IoError(#[from] io::Error),
    /// File used for loading a store has invalid format
    #[error("file has invalid format: {0}")]
    InvalidFileFormat(String),
    /// There is no live record with provided id
    #[error("record {0} not found")]
    RecordNotFound(RecordId),
    /// Record passed to (or read from) a record file has a different size than the file's records
    #[error("record has {got} bytes, expected {expected}")]
    InvalidRecordSize { expected: usize, got: usize },
    /// Record is too large to fit into a single page
    #[error("record of {0} bytes does not fit into a page")]
    RecordTooLarge(usize),
    /// Key passed to an index has a different length than the index key
    #[error("key has {got} bytes, expected {expected}")]
    InvalidKeyLength { expected: usize, got: usize },
}

/// Forward, single-pass iterator over live records of a record file.
pub type RecordScan<'a> = Box<dyn Iterator<Item = Result<(RecordId, Vec<u8>), StoreError>> + 'a>;

/// Manages record files - one file of fixed-size records per table.
pub trait RecordStore {
    type Handle: RecordFile;

    /// Creates new, empty record file `name` inside of `dir` for records of `record_size` bytes.
    fn create_file(&self, dir: &Path, name: &str, record_size: usize) -> Result<(), StoreError>;
    /// Opens existing record file `name` inside of `dir`.
    fn open_file(&self, dir: &Path, name: &str) -> Result<Self::Handle, StoreError>;
    /// Flushes and closes record file.
    fn close_file(&self, handle: Self::Handle) -> Result<(), StoreError>;
    /// Removes record file `name` from `dir`. The file must be closed beforehand.
    fn destroy_file(&self, dir: &Path, name: &str) -> Result<(), StoreError>;
}

/// Handle to an open record file.
pub trait RecordFile {
    /// Size of every record stored in the file.
    fn record_size(&self) -> usize;
    /// Returns iterator over all live records. Each call starts a new scan from the beginning of the file.
    fn scan(&self) -> Result<RecordScan<'_>, StoreError>;
    /// Returns content of record `rid`.
    fn get_record(&self, rid: RecordId) -> Result<Vec<u8>, StoreError>;
}

/// Outcome of inserting a single entry into an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Index already contains the key, nothing was inserted.
    DuplicateKey,
}

/// Manages secondary index structures - one per (table, ordered key columns).
pub trait IndexStore {
    type Handle: IndexHandle;

    /// Returns canonical name of the index file for `table_name` with `column_names` key columns.
    /// The name is used to check whether the index exists on disk.
    fn index_name(&self, table_name: &str, column_names: &[String]) -> String {
        let mut name = table_name.to_string();
        for column in column_names {
            name.push('_');
            name.push_str(column);
        }
        name.push_str(INDEX_FILE_EXTENSION);
        name
    }

    /// Creates new, empty index on `columns` of `table_name` inside of `dir`.
    fn create_index(
        &self,
        dir: &Path,
        table_name: &str,
        columns: &[ColumnMetadata],
    ) -> Result<(), StoreError>;
    /// Opens existing index.
    fn open_index(
        &self,
        dir: &Path,
        table_name: &str,
        column_names: &[String],
    ) -> Result<Self::Handle, StoreError>;
    /// Flushes and closes index.
    fn close_index(&self, handle: Self::Handle) -> Result<(), StoreError>;
    /// Removes index from `dir`. The index must be closed beforehand.
    fn destroy_index(
        &self,
        dir: &Path,
        table_name: &str,
        column_names: &[String],
    ) -> Result<(), StoreError>;
}

/// Handle to an open index.
pub trait IndexHandle {
    /// Inserts `key` pointing at `rid` on behalf of transaction `txn`.
    /// Keys are unique, inserting already present key returns [`InsertOutcome::DuplicateKey`].
    fn insert_entry(
        &mut self,
        key: &[u8],
        rid: RecordId,
        txn: TransactionId,
    ) -> Result<InsertOutcome, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamesOnly;

    impl IndexStore for NamesOnly {
        type Handle = NoIndex;

        fn create_index(&self, _: &Path, _: &str, _: &[ColumnMetadata]) -> Result<(), StoreError> {
            Ok(())
        }

        fn open_index(&self, _: &Path, _: &str, _: &[String]) -> Result<NoIndex, StoreError> {
            Ok(NoIndex)
        }

        fn close_index(&self, _: NoIndex) -> Result<(), StoreError> {
            Ok(())
        }

        fn destroy_index(&self, _: &Path, _: &str, _: &[String]) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct NoIndex;

    impl IndexHandle for NoIndex {
        fn insert_entry(
            &mut self,
            _: &[u8],
            _: RecordId,
            _: TransactionId,
        ) -> Result<InsertOutcome, StoreError> {
            Ok(InsertOutcome::Inserted)
        }
    }

    #[test]
    fn default_index_name_joins_table_and_columns() {
        let name = NamesOnly.index_name("orders", &["customer".into(), "id".into()]);

        assert_eq!(name, "orders_customer_id.idx");
    }

    #[test]
    fn index_name_depends_on_column_order() {
        let a = NamesOnly.index_name("t", &["a".into(), "b".into()]);
        let b = NamesOnly.index_name("t", &["b".into(), "a".into()]);

        assert_ne!(a, b);
    }

    #[test]
    fn record_id_display() {
        assert_eq!(RecordId::new(3, 14).to_string(), "(3, 14)");
    }
}
