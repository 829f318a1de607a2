use log::{debug, info, warn};

use super::{SystemManager, SystemManagerError, require_lock};
use crate::catalog::{CatalogError, ColumnDef, IndexMetadata, TableMetadataFactory};
use crate::lock::{LockMode, TableGuard};
use crate::store::{IndexStore, RecordStore};

impl<R: RecordStore, I: IndexStore> SystemManager<R, I> {
    /// Creates table `table_name` with columns laid out in the order of `column_defs`.
    /// Requires exclusive lock on the table. No index is created.
    pub fn create_table(
        &mut self,
        table_name: &str,
        column_defs: Vec<ColumnDef>,
        guard: &TableGuard,
    ) -> Result<(), SystemManagerError> {
        let db = self.db.as_mut().ok_or(SystemManagerError::NoDatabaseOpen)?;
        require_lock(guard, table_name, LockMode::Exclusive)?;
        if db.meta.contains_table(table_name) {
            return Err(CatalogError::TableAlreadyExists(table_name.into()).into());
        }
        let table = TableMetadataFactory::new(table_name, column_defs).create_table_metadata()?;

        self.record_store
            .create_file(&db.dir, table_name, table.record_size())?;
        let handle = match self.record_store.open_file(&db.dir, table_name) {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(cleanup) = self.record_store.destroy_file(&db.dir, table_name) {
                    warn!("Failed to remove record file of table '{table_name}': {cleanup}");
                }
                return Err(e.into());
            }
        };
        debug!(
            "Created record file of table '{table_name}' with records of {} bytes",
            table.record_size()
        );

        db.meta.add_table(table)?;
        db.record_files.insert(table_name.into(), handle);
        info!("Created table '{table_name}'");
        db.persist()
    }

    /// Drops table `table_name` together with all of its indexes.
    /// Requires exclusive lock on the table.
    ///
    /// Handles are closed before their files are removed. If closing or removing some file
    /// fails, the table stays in the catalog while the files handled so far are already closed
    /// or gone, calling this again finishes the drop.
    pub fn drop_table(
        &mut self,
        table_name: &str,
        guard: &TableGuard,
    ) -> Result<(), SystemManagerError> {
        let db = self.db.as_mut().ok_or(SystemManagerError::NoDatabaseOpen)?;
        require_lock(guard, table_name, LockMode::Exclusive)?;
        let index_columns: Vec<Vec<String>> = db
            .meta
            .table(table_name)?
            .indexes()
            .iter()
            .map(IndexMetadata::column_names)
            .collect();

        if let Some(handle) = db.record_files.remove(table_name) {
            self.record_store.close_file(handle)?;
        }
        if db.dir.join(table_name).try_exists()? {
            self.record_store.destroy_file(&db.dir, table_name)?;
            debug!("Removed record file of table '{table_name}'");
        }

        for column_names in index_columns {
            let index_name = self.index_store.index_name(table_name, &column_names);
            if let Some(handle) = db.indexes.remove(&index_name) {
                self.index_store.close_index(handle)?;
            }
            if db.dir.join(&index_name).try_exists()? {
                self.index_store
                    .destroy_index(&db.dir, table_name, &column_names)?;
                debug!("Removed index '{index_name}'");
            }
        }

        db.meta.remove_table(table_name)?;
        info!("Dropped table '{table_name}'");
        db.persist()
    }
}
