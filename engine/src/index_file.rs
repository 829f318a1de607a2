//! IndexFile module - unique index mapping fixed-length keys to record ids.
//!
//! The whole index is kept in memory as a sorted map. It is read when the index is opened and
//! written back on [`IndexFile::flush`] (and when the store closes it).

use std::{
    collections::{BTreeMap, btree_map::Entry},
    fs,
    io::{self, BufReader, BufWriter, ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use metadata::{
    catalog::ColumnMetadata,
    lock::TransactionId,
    store::{IndexHandle, IndexStore, InsertOutcome, RecordId, StoreError},
};

/// [`IndexStore`] keeping every index in its own [`IndexFile`] named
/// `{TABLE_NAME}_{COLUMN_1}_..._{COLUMN_N}.idx`.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexFileStore;

impl IndexFileStore {
    pub fn new() -> Self {
        IndexFileStore
    }
}

impl IndexStore for IndexFileStore {
    type Handle = IndexFile;

    fn create_index(
        &self,
        dir: &Path,
        table_name: &str,
        columns: &[ColumnMetadata],
    ) -> Result<(), StoreError> {
        let column_names: Vec<String> = columns.iter().map(|c| c.name().to_string()).collect();
        let path = dir.join(self.index_name(table_name, &column_names));
        let column_lens = columns.iter().map(ColumnMetadata::len).collect();
        IndexFile::create(path, column_lens)?;
        Ok(())
    }

    fn open_index(
        &self,
        dir: &Path,
        table_name: &str,
        column_names: &[String],
    ) -> Result<IndexFile, StoreError> {
        IndexFile::open(dir.join(self.index_name(table_name, column_names)))
    }

    fn close_index(&self, mut handle: IndexFile) -> Result<(), StoreError> {
        handle.flush()
    }

    fn destroy_index(
        &self,
        dir: &Path,
        table_name: &str,
        column_names: &[String],
    ) -> Result<(), StoreError> {
        let path = dir.join(self.index_name(table_name, column_names));
        fs::remove_file(&path)?;
        debug!("Removed index file {}", path.display());
        Ok(())
    }
}

/// Unique index over keys made of one or more columns.
///
/// Format of the file is as follows:
/// - `magic_number` (4 bytes)
/// - `column_count` (4 bytes)
/// - `column_lens` (`column_count` * 4 bytes) - length of each key column, key length is their sum
/// - `entry_count` (8 bytes)
/// - entries (`entry_count` * (key length + 12) bytes) - key, page number (8 bytes) and
///   slot number (4 bytes), sorted by key
#[derive(Debug)]
pub struct IndexFile {
    path: PathBuf,
    column_lens: Vec<usize>,
    key_len: usize,
    entries: BTreeMap<Vec<u8>, RecordId>,
    /// Set when in-memory entries differ from the file.
    dirty: bool,
}

impl IndexFile {
    /// Magic number - used for checking if file is (has high chances to be) an index file.
    const MAGIC_NUMBER: [u8; 4] = *b"TBIX";

    /// Creates new, empty index file at `path`. Fails if the file already exists.
    pub fn create(
        path: impl AsRef<Path>,
        column_lens: Vec<usize>,
    ) -> Result<IndexFile, StoreError> {
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;
        let index = IndexFile {
            path: path.as_ref().to_path_buf(),
            key_len: column_lens.iter().sum(),
            column_lens,
            entries: BTreeMap::new(),
            dirty: false,
        };
        index.write_to(file)?;
        debug!(
            "Created index file {} with {} bytes long keys",
            path.as_ref().display(),
            index.key_len
        );
        Ok(index)
    }

    /// Opens existing index file at `path` and loads all of its entries.
    pub fn open(path: impl AsRef<Path>) -> Result<IndexFile, StoreError> {
        let file = fs::File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        Self::read_from(path.as_ref(), &mut reader).map_err(|e| match e {
            StoreError::IoError(e) if e.kind() == ErrorKind::UnexpectedEof => {
                StoreError::InvalidFileFormat("file is truncated".into())
            }
            e => e,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// Lengths of key columns in key order.
    pub fn column_lens(&self) -> &[usize] {
        &self.column_lens
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns record id stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<RecordId> {
        self.entries.get(key).copied()
    }

    /// Removes entry with `key` and returns record id it pointed at.
    pub fn delete_entry(&mut self, key: &[u8]) -> Result<Option<RecordId>, StoreError> {
        self.check_key_len(key)?;
        let removed = self.entries.remove(key);
        self.dirty |= removed.is_some();
        Ok(removed)
    }

    /// Writes entries to disk if they changed since the file was read or last flushed.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        let file = fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.write_to(file)?;
        self.dirty = false;
        debug!(
            "Flushed {} entries to index file {}",
            self.entries.len(),
            self.path.display()
        );
        Ok(())
    }

    fn check_key_len(&self, key: &[u8]) -> Result<(), StoreError> {
        if key.len() != self.key_len {
            return Err(StoreError::InvalidKeyLength {
                expected: self.key_len,
                got: key.len(),
            });
        }
        Ok(())
    }

    fn write_to(&self, file: fs::File) -> Result<(), StoreError> {
        let mut writer = BufWriter::new(file);
        writer.write_all(&Self::MAGIC_NUMBER)?;
        writer.write_u32::<BigEndian>(self.column_lens.len() as u32)?;
        for len in &self.column_lens {
            writer.write_u32::<BigEndian>(*len as u32)?;
        }
        writer.write_u64::<BigEndian>(self.entries.len() as u64)?;
        for (key, rid) in &self.entries {
            writer.write_all(key)?;
            writer.write_u64::<BigEndian>(rid.page_no)?;
            writer.write_u32::<BigEndian>(rid.slot_no)?;
        }
        let file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.sync_data()?;
        Ok(())
    }

    fn read_from(path: &Path, reader: &mut impl Read) -> Result<IndexFile, StoreError> {
        let mut magic_number = [0u8; 4];
        reader.read_exact(&mut magic_number)?;
        if magic_number != Self::MAGIC_NUMBER {
            return Err(StoreError::InvalidFileFormat("invalid magic number".into()));
        }
        let column_count = reader.read_u32::<BigEndian>()?;
        let column_lens = (0..column_count)
            .map(|_| Ok(reader.read_u32::<BigEndian>()? as usize))
            .collect::<Result<Vec<_>, io::Error>>()?;
        let key_len = column_lens
            .iter()
            .try_fold(0usize, |sum, len| sum.checked_add(*len))
            .ok_or_else(|| StoreError::InvalidFileFormat("key length out of range".into()))?;

        let entry_count = reader.read_u64::<BigEndian>()?;
        let mut entries = BTreeMap::new();
        for _ in 0..entry_count {
            // key length comes from the file, buffer grows only as data is actually read
            let mut key = Vec::new();
            reader.by_ref().take(key_len as u64).read_to_end(&mut key)?;
            if key.len() != key_len {
                return Err(StoreError::InvalidFileFormat("file is truncated".into()));
            }
            let page_no = reader.read_u64::<BigEndian>()?;
            let slot_no = reader.read_u32::<BigEndian>()?;
            if entries.insert(key, RecordId::new(page_no, slot_no)).is_some() {
                return Err(StoreError::InvalidFileFormat("duplicated key".into()));
            }
        }
        if reader.read(&mut [0u8; 1])? != 0 {
            return Err(StoreError::InvalidFileFormat(
                "unexpected data after last entry".into(),
            ));
        }

        Ok(IndexFile {
            path: path.to_path_buf(),
            column_lens,
            key_len,
            entries,
            dirty: false,
        })
    }
}

impl IndexHandle for IndexFile {
    fn insert_entry(
        &mut self,
        key: &[u8],
        rid: RecordId,
        _txn: TransactionId,
    ) -> Result<InsertOutcome, StoreError> {
        self.check_key_len(key)?;
        match self.entries.entry(key.to_vec()) {
            Entry::Occupied(_) => Ok(InsertOutcome::DuplicateKey),
            Entry::Vacant(entry) => {
                entry.insert(rid);
                self.dirty = true;
                Ok(InsertOutcome::Inserted)
            }
        }
    }
}
