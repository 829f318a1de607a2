//! Persistence module - reads and writes [`DatabaseMetadata`] from/to the metadata file of a database.
//!
//! The file is JSON and is always rewritten as a whole:
//!
//! ```json
//! {
//!   "version": 1,
//!   "name": "shop",
//!   "tables": [
//!     {
//!       "name": "orders",
//!       "columns": [ { "name": "id", "ty": "Int", "len": 4, "offset": 0, "indexed": true } ],
//!       "indexes": [
//!         { "column_count": 1, "key_len": 4,
//!           "columns": [ { "name": "id", "ty": "Int", "len": 4, "offset": 0, "indexed": true } ] }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Writing the file is not atomic with creating or removing table and index files, so a crash
//! between the two may leave the catalog describing files that do not exist (or the other way round).

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::schema::Type;

use crate::catalog::{CatalogError, ColumnMetadata, DatabaseMetadata, IndexMetadata, TableMetadata};
use crate::consts::{METADATA_FILE_NAME, METADATA_FORMAT_VERSION};

/// Error for reading and writing the metadata file
#[derive(Error, Debug)]
pub enum CatalogFileError {
    /// Underlying IO module returned error
    #[error("io error occurred: {0}")]
    IoError(#[from] io::Error),
    /// File contains invalid json
    #[error("json error occurred: {0}")]
    JsonError(#[from] serde_json::Error),
    /// File was written with a layout this crate does not understand
    #[error("unsupported metadata format version: {0}")]
    UnsupportedVersion(u32),
    /// File is valid json, but the catalog it describes is not
    #[error("metadata describes invalid catalog: {0}")]
    InvalidCatalog(#[from] CatalogError),
}

impl DatabaseMetadata {
    /// Serializes the whole catalog and overwrites `{db_dir}/{METADATA_FILE_NAME}` with it.
    /// Can fail if io error occurs.
    pub fn flush(&self, db_dir: impl AsRef<Path>) -> Result<(), CatalogFileError> {
        let content = serde_json::to_string_pretty(&CatalogJson::from(self))?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(db_dir.as_ref().join(METADATA_FILE_NAME))?;
        file.write_all(content.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// Loads catalog stored in `{db_dir}/{METADATA_FILE_NAME}`.
    /// Can fail if the file is missing, is not a valid json or describes an invalid catalog.
    pub fn load(db_dir: impl AsRef<Path>) -> Result<Self, CatalogFileError> {
        let content = fs::read_to_string(db_dir.as_ref().join(METADATA_FILE_NAME))?;
        let catalog_json: CatalogJson = serde_json::from_str(&content)?;
        DatabaseMetadata::try_from(catalog_json)
    }
}

/// [`CatalogJson`] is a representation of [`DatabaseMetadata`] on disk. Used only for serializing to/deserializing from JSON file.
#[derive(Serialize, Deserialize)]
struct CatalogJson {
    version: u32,
    name: String,
    tables: Vec<TableJson>,
}

impl From<&DatabaseMetadata> for CatalogJson {
    fn from(value: &DatabaseMetadata) -> Self {
        CatalogJson {
            version: METADATA_FORMAT_VERSION,
            name: value.name().into(),
            tables: value.tables().map(TableJson::from).collect(),
        }
    }
}

impl TryFrom<CatalogJson> for DatabaseMetadata {
    type Error = CatalogFileError;

    fn try_from(value: CatalogJson) -> Result<Self, Self::Error> {
        if value.version != METADATA_FORMAT_VERSION {
            return Err(CatalogFileError::UnsupportedVersion(value.version));
        }
        let tables = value
            .tables
            .into_iter()
            .map(TableMetadata::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DatabaseMetadata::with_tables(value.name, tables)?)
    }
}

/// [`TableJson`] is a representation of [`TableMetadata`] on disk.
#[derive(Serialize, Deserialize)]
struct TableJson {
    name: String,
    columns: Vec<ColumnJson>,
    indexes: Vec<IndexJson>,
}

impl From<&TableMetadata> for TableJson {
    fn from(value: &TableMetadata) -> Self {
        TableJson {
            name: value.name().into(),
            columns: value.columns().iter().map(ColumnJson::from).collect(),
            indexes: value.indexes().iter().map(IndexJson::from).collect(),
        }
    }
}

impl TryFrom<TableJson> for TableMetadata {
    type Error = CatalogError;

    fn try_from(value: TableJson) -> Result<Self, Self::Error> {
        let columns = value
            .columns
            .into_iter()
            .map(|c| c.into_column(&value.name))
            .collect();
        let indexes = value
            .indexes
            .into_iter()
            .map(|i| i.into_index(&value.name))
            .collect::<Result<Vec<_>, _>>()?;
        TableMetadata::new(value.name, columns, indexes)
    }
}

/// [`ColumnJson`] is a representation of [`ColumnMetadata`] on disk. The owning table is implied by the enclosing table.
#[derive(Serialize, Deserialize)]
struct ColumnJson {
    name: String,
    ty: Type,
    len: usize,
    offset: usize,
    indexed: bool,
}

impl From<&ColumnMetadata> for ColumnJson {
    fn from(value: &ColumnMetadata) -> Self {
        ColumnJson {
            name: value.name().into(),
            ty: value.ty(),
            len: value.len(),
            offset: value.offset(),
            indexed: value.indexed(),
        }
    }
}

impl ColumnJson {
    fn into_column(self, table_name: &str) -> ColumnMetadata {
        ColumnMetadata::new(
            table_name,
            self.name,
            self.ty,
            self.len,
            self.offset,
            self.indexed,
        )
    }
}

/// [`IndexJson`] is a representation of [`IndexMetadata`] on disk.
#[derive(Serialize, Deserialize)]
struct IndexJson {
    column_count: usize,
    key_len: usize,
    columns: Vec<ColumnJson>,
}

impl From<&IndexMetadata> for IndexJson {
    fn from(value: &IndexMetadata) -> Self {
        IndexJson {
            column_count: value.column_count(),
            key_len: value.key_len(),
            columns: value.columns().iter().map(ColumnJson::from).collect(),
        }
    }
}

impl IndexJson {
    fn into_index(self, table_name: &str) -> Result<IndexMetadata, CatalogError> {
        let (column_count, key_len) = (self.column_count, self.key_len);
        let columns = self
            .columns
            .into_iter()
            .map(|c| c.into_column(table_name))
            .collect();
        let index = IndexMetadata::new(table_name, columns)?;
        if index.column_count() != column_count || index.key_len() != key_len {
            return Err(CatalogError::InvalidLayout {
                table: table_name.into(),
                reason: format!(
                    "index {}: declared {} columns and {} bytes, found {} columns and {} bytes",
                    index.column_names().join(", "),
                    column_count,
                    key_len,
                    index.column_count(),
                    index.key_len()
                ),
            });
        }
        Ok(index)
    }
}
