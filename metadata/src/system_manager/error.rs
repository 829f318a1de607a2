use std::io;

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::lock::LockMode;
use crate::persistence::CatalogFileError;
use crate::store::StoreError;

/// Error for [`super::SystemManager`] related operations
#[derive(Error, Debug)]
pub enum SystemManagerError {
    #[error("couldn't find the data directory")]
    DirectoryNotFound,
    #[error("invalid database name: '{0}'")]
    InvalidDatabaseName(String),
    #[error("database '{0}' already exists")]
    DatabaseAlreadyExists(String),
    #[error("database '{0}' not found")]
    DatabaseNotFound(String),
    /// Another database is already open, it holds the name of the open database
    #[error("database '{0}' is already open")]
    DatabaseAlreadyOpen(String),
    #[error("no database is open")]
    NoDatabaseOpen,
    #[error("database '{0}' is open and cannot be dropped")]
    DatabaseInUse(String),
    /// Building index found two records with the same key, the index was not created
    #[error("duplicate key while building index {table}({})", .columns.join(", "))]
    DuplicateKey { table: String, columns: Vec<String> },
    #[error("operation on table '{table}' requires {required} lock")]
    LockNotHeld { table: String, required: LockMode },
    /// Table or index is in the catalog, but its file is not open
    #[error("file '{0}' is not open")]
    HandleNotOpen(String),
    #[error("{0}")]
    CatalogError(#[from] CatalogError),
    #[error("cannot load catalog: {0}")]
    CatalogFileError(#[from] CatalogFileError),
    /// Catalog was changed in memory, but writing it to disk failed.
    /// The change is kept, [`super::SystemManager::flush_meta`] can be used to retry.
    #[error("cannot persist catalog: {0}")]
    Persist(#[source] CatalogFileError),
    #[error("storage error: {0}")]
    StoreError(#[from] StoreError),
    #[error("io error occurred: {0}")]
    IoError(#[from] io::Error),
}

/// Category of [`SystemManagerError`], used by callers that only care about the class of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    AlreadyOpen,
    NoDatabaseOpen,
    DatabaseInUse,
    InvalidDefinition,
    DuplicateKey,
    LockNotHeld,
    FilesystemFailure,
    Corruption,
    Storage,
}

impl SystemManagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SystemManagerError::DirectoryNotFound => ErrorKind::FilesystemFailure,
            SystemManagerError::InvalidDatabaseName(_) => ErrorKind::InvalidDefinition,
            SystemManagerError::DatabaseAlreadyExists(_) => ErrorKind::AlreadyExists,
            SystemManagerError::DatabaseNotFound(_) => ErrorKind::NotFound,
            SystemManagerError::DatabaseAlreadyOpen(_) => ErrorKind::AlreadyOpen,
            SystemManagerError::NoDatabaseOpen => ErrorKind::NoDatabaseOpen,
            SystemManagerError::DatabaseInUse(_) => ErrorKind::DatabaseInUse,
            SystemManagerError::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            SystemManagerError::LockNotHeld { .. } => ErrorKind::LockNotHeld,
            SystemManagerError::HandleNotOpen(_) => ErrorKind::Corruption,
            SystemManagerError::CatalogError(e) => catalog_error_kind(e),
            SystemManagerError::CatalogFileError(e) | SystemManagerError::Persist(e) => match e {
                CatalogFileError::IoError(_) => ErrorKind::FilesystemFailure,
                _ => ErrorKind::Corruption,
            },
            SystemManagerError::StoreError(e) => match e {
                StoreError::IoError(_) => ErrorKind::FilesystemFailure,
                StoreError::InvalidFileFormat(_) => ErrorKind::Corruption,
                _ => ErrorKind::Storage,
            },
            SystemManagerError::IoError(_) => ErrorKind::FilesystemFailure,
        }
    }
}

fn catalog_error_kind(error: &CatalogError) -> ErrorKind {
    match error {
        CatalogError::TableNotFound(_)
        | CatalogError::ColumnNotFound { .. }
        | CatalogError::IndexNotFound { .. } => ErrorKind::NotFound,
        CatalogError::TableAlreadyExists(_) | CatalogError::IndexAlreadyExists { .. } => {
            ErrorKind::AlreadyExists
        }
        CatalogError::InvalidLayout { .. } => ErrorKind::Corruption,
        CatalogError::InvalidTableName(_)
        | CatalogError::InvalidColumnName { .. }
        | CatalogError::RecordTooLarge(_)
        | CatalogError::DuplicatedColumn(_)
        | CatalogError::NoColumns(_)
        | CatalogError::InvalidColumnLength { .. }
        | CatalogError::EmptyIndex(_) => ErrorKind::InvalidDefinition,
    }
}
