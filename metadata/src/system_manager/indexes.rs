use std::path::Path;

use log::{debug, info, warn};

use super::{SystemManager, SystemManagerError, require_lock};
use crate::catalog::{CatalogError, ColumnMetadata, IndexMetadata};
use crate::lock::{LockMode, TableGuard, TransactionId};
use crate::store::{IndexHandle, IndexStore, InsertOutcome, RecordFile, RecordStore, StoreError};

/// Anything that identifies a key column by name: plain names or column metadata.
pub trait IndexColumn {
    fn column_name(&self) -> &str;
}

impl IndexColumn for str {
    fn column_name(&self) -> &str {
        self
    }
}

impl IndexColumn for String {
    fn column_name(&self) -> &str {
        self
    }
}

impl IndexColumn for ColumnMetadata {
    fn column_name(&self) -> &str {
        self.name()
    }
}

impl<T: IndexColumn + ?Sized> IndexColumn for &T {
    fn column_name(&self) -> &str {
        (**self).column_name()
    }
}

fn names_of<C: IndexColumn>(columns: &[C]) -> Vec<String> {
    columns.iter().map(|c| c.column_name().to_string()).collect()
}

impl<R: RecordStore, I: IndexStore> SystemManager<R, I> {
    /// Creates unique index on `columns` of table `table_name` and fills it with all records
    /// of the table. Requires at least shared lock on the table.
    ///
    /// If two records share the same key the index is removed and
    /// [`SystemManagerError::DuplicateKey`] is returned, the catalog is left unchanged.
    pub fn create_index<C: IndexColumn>(
        &mut self,
        table_name: &str,
        columns: &[C],
        guard: &TableGuard,
    ) -> Result<(), SystemManagerError> {
        let db = self.db.as_mut().ok_or(SystemManagerError::NoDatabaseOpen)?;
        require_lock(guard, table_name, LockMode::Shared)?;
        let column_names = names_of(columns);
        let table = db.meta.table(table_name)?;
        let key_columns = table.resolve_columns(&column_names)?;

        let index_name = self.index_store.index_name(table_name, &column_names);
        if db.dir.join(&index_name).try_exists()? || table.index(&column_names).is_some() {
            return Err(CatalogError::IndexAlreadyExists {
                table: table_name.into(),
                columns: column_names,
            }
            .into());
        }
        let index = IndexMetadata::new(table_name, key_columns)?;
        let record_file = db
            .record_files
            .get(table_name)
            .ok_or_else(|| SystemManagerError::HandleNotOpen(table_name.into()))?;

        self.index_store
            .create_index(&db.dir, table_name, index.columns())?;
        let mut handle = match self
            .index_store
            .open_index(&db.dir, table_name, &column_names)
        {
            Ok(handle) => handle,
            Err(e) => {
                discard_index(&self.index_store, None, &db.dir, table_name, &column_names);
                return Err(e.into());
            }
        };

        match build_index(record_file, &mut handle, &index, guard.txn()) {
            Ok(entries) => debug!("Inserted {entries} entries into index '{index_name}'"),
            Err(e) => {
                discard_index(
                    &self.index_store,
                    Some(handle),
                    &db.dir,
                    table_name,
                    &column_names,
                );
                return Err(e);
            }
        }

        if let Err(e) = db.meta.add_index(index) {
            discard_index(
                &self.index_store,
                Some(handle),
                &db.dir,
                table_name,
                &column_names,
            );
            return Err(e.into());
        }
        db.indexes.insert(index_name.clone(), handle);
        info!("Created index '{index_name}'");
        db.persist()
    }

    /// Drops index on `columns` of table `table_name`.
    /// Requires at least shared lock on the table. If removing the index file fails, the index
    /// stays in the catalog with its handle closed, calling this again finishes the drop.
    pub fn drop_index<C: IndexColumn>(
        &mut self,
        table_name: &str,
        columns: &[C],
        guard: &TableGuard,
    ) -> Result<(), SystemManagerError> {
        let db = self.db.as_mut().ok_or(SystemManagerError::NoDatabaseOpen)?;
        require_lock(guard, table_name, LockMode::Shared)?;
        let column_names = names_of(columns);
        let table = db.meta.table(table_name)?;

        let index_name = self.index_store.index_name(table_name, &column_names);
        if table.index(&column_names).is_none() || !db.dir.join(&index_name).try_exists()? {
            return Err(CatalogError::IndexNotFound {
                table: table_name.into(),
                columns: column_names,
            }
            .into());
        }
        let key_columns = table.resolve_columns(&column_names)?;

        if let Some(handle) = db.indexes.remove(&index_name) {
            self.index_store.close_index(handle)?;
        }
        self.index_store
            .destroy_index(&db.dir, table_name, &column_names)?;
        db.meta.remove_index(table_name, &key_columns)?;
        info!("Dropped index '{index_name}'");
        db.persist()
    }
}

/// Inserts key of every record of `record_file` into `handle`. Returns number of inserted entries.
fn build_index<F: RecordFile, H: IndexHandle>(
    record_file: &F,
    handle: &mut H,
    index: &IndexMetadata,
    txn: TransactionId,
) -> Result<usize, SystemManagerError> {
    let mut key = Vec::with_capacity(index.key_len());
    let mut entries = 0;
    for item in record_file.scan()? {
        let (rid, record) = item?;
        key.clear();
        for column in index.columns() {
            let field = record
                .get(column.offset()..)
                .and_then(|rest| rest.get(..column.len()))
                .ok_or(StoreError::InvalidRecordSize {
                    expected: record_file.record_size(),
                    got: record.len(),
                })?;
            key.extend_from_slice(field);
        }

        match handle.insert_entry(&key, rid, txn)? {
            InsertOutcome::Inserted => entries += 1,
            InsertOutcome::DuplicateKey => {
                debug!("Duplicate key found at record {rid}");
                return Err(SystemManagerError::DuplicateKey {
                    table: index.table_name().into(),
                    columns: index.column_names(),
                });
            }
        }
    }
    Ok(entries)
}

/// Closes (if open) and removes index that could not be created. Failures are only logged,
/// the caller returns the error that caused the removal.
fn discard_index<I: IndexStore>(
    index_store: &I,
    handle: Option<I::Handle>,
    dir: &Path,
    table_name: &str,
    column_names: &[String],
) {
    if let Some(handle) = handle {
        if let Err(e) = index_store.close_index(handle) {
            warn!("Failed to close discarded index on table '{table_name}': {e}");
        }
    }
    if let Err(e) = index_store.destroy_index(dir, table_name, column_names) {
        warn!("Failed to remove discarded index on table '{table_name}': {e}");
    }
}
