//! Small stores used by the system manager tests. Files are created on disk (so existence
//! checks work), while records and index entries live in memory shared with the test.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, HashSet},
    fs, io,
    path::Path,
    rc::Rc,
};

use parking_lot::{Mutex, MutexGuard};

use crate::catalog::ColumnMetadata;
use crate::lock::TransactionId;
use crate::store::{
    IndexHandle, IndexStore, InsertOutcome, RecordFile, RecordId, RecordScan, RecordStore,
    StoreError,
};

#[derive(Debug, Default)]
pub(crate) struct MemoryState {
    /// Records of every table, in scan order.
    pub(crate) records: HashMap<String, Vec<Vec<u8>>>,
    /// Entries of every index, keyed by index file name.
    pub(crate) entries: HashMap<String, BTreeMap<Vec<u8>, RecordId>>,
    /// Names of files whose opening fails.
    pub(crate) broken: HashSet<String>,
    /// Names of currently open files.
    pub(crate) open: HashSet<String>,
    /// Names of files whose removal fails.
    pub(crate) undeletable: HashSet<String>,
}

static SERIAL: Mutex<()> = parking_lot::const_mutex(());

/// Only one database can be open in the process at a time, so tests opening databases take turns.
pub(crate) fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock()
}

pub(crate) type SharedState = Rc<RefCell<MemoryState>>;

pub(crate) fn stores() -> (MemoryRecordStore, MemoryIndexStore, SharedState) {
    let state = SharedState::default();
    (
        MemoryRecordStore {
            state: state.clone(),
        },
        MemoryIndexStore {
            state: state.clone(),
        },
        state,
    )
}

fn remove_checked(state: &SharedState, dir: &Path, name: &str) -> Result<(), StoreError> {
    if state.borrow().undeletable.contains(name) {
        return Err(io::Error::new(io::ErrorKind::PermissionDenied, name.to_string()).into());
    }
    fs::remove_file(dir.join(name))?;
    Ok(())
}

fn open_checked(state: &SharedState, dir: &Path, name: &str) -> Result<(), StoreError> {
    if !dir.join(name).try_exists()? {
        return Err(io::Error::new(io::ErrorKind::NotFound, name.to_string()).into());
    }
    let mut state = state.borrow_mut();
    if state.broken.contains(name) {
        return Err(StoreError::InvalidFileFormat(name.into()));
    }
    state.open.insert(name.into());
    Ok(())
}

pub(crate) struct MemoryRecordStore {
    state: SharedState,
}

#[derive(Debug)]
pub(crate) struct MemoryRecordFile {
    state: SharedState,
    name: String,
    record_size: usize,
}

impl RecordStore for MemoryRecordStore {
    type Handle = MemoryRecordFile;

    fn create_file(&self, dir: &Path, name: &str, record_size: usize) -> Result<(), StoreError> {
        fs::write(dir.join(name), record_size.to_string())?;
        self.state
            .borrow_mut()
            .records
            .insert(name.into(), Vec::new());
        Ok(())
    }

    fn open_file(&self, dir: &Path, name: &str) -> Result<MemoryRecordFile, StoreError> {
        open_checked(&self.state, dir, name)?;
        let content = fs::read_to_string(dir.join(name))?;
        let record_size = content
            .parse()
            .map_err(|_| StoreError::InvalidFileFormat(name.into()))?;
        Ok(MemoryRecordFile {
            state: self.state.clone(),
            name: name.into(),
            record_size,
        })
    }

    fn close_file(&self, handle: MemoryRecordFile) -> Result<(), StoreError> {
        self.state.borrow_mut().open.remove(&handle.name);
        Ok(())
    }

    fn destroy_file(&self, dir: &Path, name: &str) -> Result<(), StoreError> {
        remove_checked(&self.state, dir, name)?;
        self.state.borrow_mut().records.remove(name);
        Ok(())
    }
}

impl RecordFile for MemoryRecordFile {
    fn record_size(&self) -> usize {
        self.record_size
    }

    fn scan(&self) -> Result<RecordScan<'_>, StoreError> {
        let records = self
            .state
            .borrow()
            .records
            .get(&self.name)
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(records.into_iter().enumerate().map(|(slot, record)| {
            Ok((RecordId::new(1, slot as u32), record))
        })))
    }

    fn get_record(&self, rid: RecordId) -> Result<Vec<u8>, StoreError> {
        self.state
            .borrow()
            .records
            .get(&self.name)
            .and_then(|records| records.get(rid.slot_no as usize))
            .cloned()
            .ok_or(StoreError::RecordNotFound(rid))
    }
}

pub(crate) struct MemoryIndexStore {
    state: SharedState,
}

#[derive(Debug)]
pub(crate) struct MemoryIndex {
    state: SharedState,
    name: String,
}

impl IndexStore for MemoryIndexStore {
    type Handle = MemoryIndex;

    fn create_index(
        &self,
        dir: &Path,
        table_name: &str,
        columns: &[ColumnMetadata],
    ) -> Result<(), StoreError> {
        let names: Vec<String> = columns.iter().map(|c| c.name().to_string()).collect();
        let name = self.index_name(table_name, &names);
        fs::write(dir.join(&name), "")?;
        self.state
            .borrow_mut()
            .entries
            .insert(name, BTreeMap::new());
        Ok(())
    }

    fn open_index(
        &self,
        dir: &Path,
        table_name: &str,
        column_names: &[String],
    ) -> Result<MemoryIndex, StoreError> {
        let name = self.index_name(table_name, column_names);
        open_checked(&self.state, dir, &name)?;
        Ok(MemoryIndex {
            state: self.state.clone(),
            name,
        })
    }

    fn close_index(&self, handle: MemoryIndex) -> Result<(), StoreError> {
        self.state.borrow_mut().open.remove(&handle.name);
        Ok(())
    }

    fn destroy_index(
        &self,
        dir: &Path,
        table_name: &str,
        column_names: &[String],
    ) -> Result<(), StoreError> {
        let name = self.index_name(table_name, column_names);
        remove_checked(&self.state, dir, &name)?;
        self.state.borrow_mut().entries.remove(&name);
        Ok(())
    }
}

impl IndexHandle for MemoryIndex {
    fn insert_entry(
        &mut self,
        key: &[u8],
        rid: RecordId,
        _txn: TransactionId,
    ) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.borrow_mut();
        let entries = state.entries.entry(self.name.clone()).or_default();
        if entries.contains_key(key) {
            return Ok(InsertOutcome::DuplicateKey);
        }
        entries.insert(key.to_vec(), rid);
        Ok(InsertOutcome::Inserted)
    }
}
