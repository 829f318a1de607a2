//! System manager module - owns the catalog of the open database and coordinates the record and
//! index stores whenever the schema changes.
//!
//! Every database is a directory `{BASE_DIR}/{DATABASE_NAME}` holding the catalog file
//! ([`crate::consts::METADATA_FILE_NAME`]), the log placeholder ([`LOG_FILE_NAME`]) and the
//! table and index files created by the stores.

mod describe;
mod error;
mod indexes;
mod tables;
#[cfg(test)]
pub(crate) mod test_stores;

pub use error::{ErrorKind, SystemManagerError};
pub use indexes::IndexColumn;

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::catalog::{self, CatalogError, DatabaseMetadata};
use crate::consts::{DATA_DIR_APPLICATION, LOG_FILE_NAME};
use crate::lock::{LockMode, TableGuard};
use crate::printer::OutputFile;
use crate::store::{IndexStore, RecordStore};

/// Directory of the database open in this process, shared by every [`SystemManager`].
static ACTIVE_DATABASE: Mutex<Option<PathBuf>> = parking_lot::const_mutex(None);

/// Claim on the process-wide active database slot, the slot is freed when the claim is dropped.
struct ActiveDatabase;

impl ActiveDatabase {
    /// Fails if any manager of this process already has a database open.
    fn claim(db_dir: &Path) -> Result<Self, SystemManagerError> {
        let mut active = ACTIVE_DATABASE.lock();
        if let Some(dir) = active.as_deref() {
            let name = dir
                .file_name()
                .map_or_else(|| dir.display().to_string(), |n| n.to_string_lossy().into());
            return Err(SystemManagerError::DatabaseAlreadyOpen(name));
        }
        *active = Some(db_dir.to_path_buf());
        Ok(ActiveDatabase)
    }

    fn is(db_dir: &Path) -> bool {
        ACTIVE_DATABASE.lock().as_deref() == Some(db_dir)
    }
}

impl Drop for ActiveDatabase {
    fn drop(&mut self) {
        *ACTIVE_DATABASE.lock() = None;
    }
}

/// Manages databases stored under a single base directory. At most one database is open in the
/// whole process, no matter how many managers there are.
///
/// The manager does not lock tables on its own - operations touching a table take a
/// [`TableGuard`] acquired by the caller.
pub struct SystemManager<R: RecordStore, I: IndexStore> {
    base_dir: PathBuf,
    record_store: R,
    index_store: I,
    db: Option<OpenDatabase<R::Handle, I::Handle>>,
}

/// Catalog of the open database together with handles of all of its files.
struct OpenDatabase<F, H> {
    dir: PathBuf,
    meta: DatabaseMetadata,
    /// Maps table name to its open record file.
    record_files: HashMap<String, F>,
    /// Maps index file name to the open index.
    indexes: HashMap<String, H>,
    _active: ActiveDatabase,
}

impl<F, H> OpenDatabase<F, H> {
    fn new(dir: PathBuf, meta: DatabaseMetadata, active: ActiveDatabase) -> Self {
        OpenDatabase {
            dir,
            meta,
            record_files: HashMap::new(),
            indexes: HashMap::new(),
            _active: active,
        }
    }

    /// Writes the catalog to disk, the in-memory catalog is kept when writing fails.
    fn persist(&self) -> Result<(), SystemManagerError> {
        self.meta.flush(&self.dir).map_err(|e| {
            error!(
                "Failed to persist catalog of database '{}': {e}",
                self.meta.name()
            );
            SystemManagerError::Persist(e)
        })
    }
}

impl<R: RecordStore, I: IndexStore> SystemManager<R, I> {
    /// Creates manager of databases stored in `base_dir`. The directory must exist.
    pub fn new(base_dir: impl Into<PathBuf>, record_store: R, index_store: I) -> Self {
        SystemManager {
            base_dir: base_dir.into(),
            record_store,
            index_store,
            db: None,
        }
    }

    /// Creates manager of databases stored in the platform's local data directory,
    /// creating the directory when it does not exist.
    pub fn with_default_dir(record_store: R, index_store: I) -> Result<Self, SystemManagerError> {
        let project_dir = ProjectDirs::from("", "", DATA_DIR_APPLICATION)
            .ok_or(SystemManagerError::DirectoryNotFound)?;
        let base_dir = project_dir.data_local_dir().to_path_buf();
        fs::create_dir_all(&base_dir)?;
        Ok(Self::new(base_dir, record_store, index_store))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn is_open(&self) -> bool {
        self.db.is_some()
    }

    /// Creates new, empty database `name`. The database is not opened.
    pub fn create_database(&mut self, name: &str) -> Result<(), SystemManagerError> {
        let db_dir = self.database_path(name)?;
        if db_dir.try_exists()? {
            return Err(SystemManagerError::DatabaseAlreadyExists(name.into()));
        }
        fs::create_dir(&db_dir)?;

        if let Err(e) = initialize_database(name, &db_dir) {
            if let Err(cleanup) = fs::remove_dir_all(&db_dir) {
                warn!("Failed to remove partially created database '{name}': {cleanup}");
            }
            return Err(e);
        }

        info!("Created database '{name}' in {}", db_dir.display());
        Ok(())
    }

    /// Opens database `name`: loads its catalog and opens every record file and index.
    /// When any file cannot be opened, files opened so far are closed and no database is open.
    pub fn open_database(&mut self, name: &str) -> Result<(), SystemManagerError> {
        let db_dir = self.database_path(name)?;
        if !db_dir.try_exists()? {
            return Err(SystemManagerError::DatabaseNotFound(name.into()));
        }
        if let Some(db) = &self.db {
            return Err(SystemManagerError::DatabaseAlreadyOpen(db.meta.name().into()));
        }
        let active = ActiveDatabase::claim(&db_dir)?;

        let meta = DatabaseMetadata::load(&db_dir)?;
        let mut db = OpenDatabase::new(db_dir, meta, active);
        if let Err(e) = self.open_files(&mut db) {
            if let Err(cleanup) = self.close_files(&mut db) {
                warn!("Failed to close files of database '{name}' after failed open: {cleanup}");
            }
            return Err(e);
        }

        info!(
            "Opened database '{name}' with {} tables and {} indexes",
            db.record_files.len(),
            db.indexes.len()
        );
        self.db = Some(db);
        Ok(())
    }

    /// Persists the catalog and closes all files of the open database.
    /// If persisting fails the database stays open.
    pub fn close_database(&mut self) -> Result<(), SystemManagerError> {
        self.open_db()?.persist()?;
        let Some(mut db) = self.db.take() else {
            return Err(SystemManagerError::NoDatabaseOpen);
        };
        self.close_files(&mut db)?;
        info!("Closed database '{}'", db.meta.name());
        Ok(())
    }

    /// Removes database `name` with all of its files. The database must not be open,
    /// neither by this manager nor by any other manager of the process.
    pub fn drop_database(&mut self, name: &str) -> Result<(), SystemManagerError> {
        let db_dir = self.database_path(name)?;
        if ActiveDatabase::is(&db_dir) {
            return Err(SystemManagerError::DatabaseInUse(name.into()));
        }
        if !db_dir.try_exists()? {
            return Err(SystemManagerError::DatabaseNotFound(name.into()));
        }
        fs::remove_dir_all(&db_dir)?;
        info!("Dropped database '{name}'");
        Ok(())
    }

    /// Writes the catalog of the open database to disk.
    /// Used to retry after an operation failed with [`SystemManagerError::Persist`].
    pub fn flush_meta(&self) -> Result<(), SystemManagerError> {
        self.open_db()?.persist()
    }

    /// Returns catalog of the open database.
    pub fn database(&self) -> Result<&DatabaseMetadata, SystemManagerError> {
        Ok(&self.open_db()?.meta)
    }

    /// Returns directory of the open database.
    pub fn database_dir(&self) -> Result<&Path, SystemManagerError> {
        Ok(&self.open_db()?.dir)
    }

    /// Returns record file of table `table_name`.
    pub fn record_file(&self, table_name: &str) -> Result<&R::Handle, SystemManagerError> {
        let db = self.open_db()?;
        db.meta.table(table_name)?;
        db.record_files
            .get(table_name)
            .ok_or_else(|| SystemManagerError::HandleNotOpen(table_name.into()))
    }

    pub fn record_file_mut(
        &mut self,
        table_name: &str,
    ) -> Result<&mut R::Handle, SystemManagerError> {
        let db = self.db.as_mut().ok_or(SystemManagerError::NoDatabaseOpen)?;
        db.meta.table(table_name)?;
        db.record_files
            .get_mut(table_name)
            .ok_or_else(|| SystemManagerError::HandleNotOpen(table_name.into()))
    }

    /// Returns open index on `column_names` of table `table_name`.
    pub fn index<S: AsRef<str>>(
        &self,
        table_name: &str,
        column_names: &[S],
    ) -> Result<&I::Handle, SystemManagerError> {
        let index_name = self.index_file_name(table_name, column_names)?;
        self.open_db()?
            .indexes
            .get(&index_name)
            .ok_or(SystemManagerError::HandleNotOpen(index_name))
    }

    pub fn index_mut<S: AsRef<str>>(
        &mut self,
        table_name: &str,
        column_names: &[S],
    ) -> Result<&mut I::Handle, SystemManagerError> {
        let index_name = self.index_file_name(table_name, column_names)?;
        let db = self.db.as_mut().ok_or(SystemManagerError::NoDatabaseOpen)?;
        db.indexes
            .get_mut(&index_name)
            .ok_or(SystemManagerError::HandleNotOpen(index_name))
    }

    /// Returns names of tables with an open record file, sorted.
    pub fn open_record_files(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .db
            .iter()
            .flat_map(|db| db.record_files.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    /// Returns file names of open indexes, sorted.
    pub fn open_indexes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .db
            .iter()
            .flat_map(|db| db.indexes.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    /// Opens the file of the open database that introspection output is appended to.
    pub fn output_file(&self) -> Result<OutputFile, SystemManagerError> {
        Ok(OutputFile::open(&self.open_db()?.dir)?)
    }

    fn open_db(&self) -> Result<&OpenDatabase<R::Handle, I::Handle>, SystemManagerError> {
        self.db.as_ref().ok_or(SystemManagerError::NoDatabaseOpen)
    }

    /// Returns file name of the index on `column_names` of table `table_name` if the catalog has it.
    fn index_file_name<S: AsRef<str>>(
        &self,
        table_name: &str,
        column_names: &[S],
    ) -> Result<String, SystemManagerError> {
        let table = self.open_db()?.meta.table(table_name)?;
        let index = table
            .index(column_names)
            .ok_or_else(|| CatalogError::IndexNotFound {
                table: table_name.into(),
                columns: column_names.iter().map(|c| c.as_ref().to_string()).collect(),
            })?;
        Ok(self.index_store.index_name(table_name, &index.column_names()))
    }

    fn database_path(&self, name: &str) -> Result<PathBuf, SystemManagerError> {
        if !catalog::is_database_name(name) {
            return Err(SystemManagerError::InvalidDatabaseName(name.into()));
        }
        Ok(self.base_dir.join(name))
    }

    fn open_files(
        &self,
        db: &mut OpenDatabase<R::Handle, I::Handle>,
    ) -> Result<(), SystemManagerError> {
        for table in db.meta.tables() {
            let handle = self.record_store.open_file(&db.dir, table.name())?;
            db.record_files.insert(table.name().into(), handle);
            debug!("Opened record file of table '{}'", table.name());

            for index in table.indexes() {
                let column_names = index.column_names();
                let handle = self
                    .index_store
                    .open_index(&db.dir, table.name(), &column_names)?;
                let index_name = self.index_store.index_name(table.name(), &column_names);
                debug!("Opened index '{index_name}'");
                db.indexes.insert(index_name, handle);
            }
        }
        Ok(())
    }

    /// Closes every open file of `db`, even if some of them fail to close.
    /// Returns the first error encountered.
    fn close_files(
        &self,
        db: &mut OpenDatabase<R::Handle, I::Handle>,
    ) -> Result<(), SystemManagerError> {
        let mut result = Ok(());
        for (name, handle) in db.indexes.drain() {
            if let Err(e) = self.index_store.close_index(handle) {
                warn!("Failed to close index '{name}': {e}");
                result = result.and(Err(e.into()));
            }
        }
        for (name, handle) in db.record_files.drain() {
            if let Err(e) = self.record_store.close_file(handle) {
                warn!("Failed to close record file of table '{name}': {e}");
                result = result.and(Err(e.into()));
            }
        }
        result
    }
}

impl<R: RecordStore, I: IndexStore> Drop for SystemManager<R, I> {
    fn drop(&mut self) {
        if let Some(mut db) = self.db.take() {
            if let Err(e) = self.close_files(&mut db) {
                warn!("Failed to close files of database '{}': {e}", db.meta.name());
            }
        }
    }
}

/// Writes empty catalog and log file into freshly created `db_dir`.
fn initialize_database(name: &str, db_dir: &Path) -> Result<(), SystemManagerError> {
    DatabaseMetadata::new(name)
        .flush(db_dir)
        .map_err(SystemManagerError::Persist)?;
    fs::File::create(db_dir.join(LOG_FILE_NAME))?;
    Ok(())
}

/// Checks that `guard` locks `table_name` at least in `required` mode.
fn require_lock(
    guard: &TableGuard,
    table_name: &str,
    required: LockMode,
) -> Result<(), SystemManagerError> {
    if !guard.covers(table_name, required) {
        return Err(SystemManagerError::LockNotHeld {
            table: table_name.into(),
            required,
        });
    }
    Ok(())
}
