//! Catalog module - in-memory description of a database's tables, columns and indexes.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Component, Path},
};

use thiserror::Error;
use types::schema::Type;

use crate::consts::{INDEX_FILE_EXTENSION, RESERVED_FILE_NAMES};

/// [`DatabaseMetadata`] is the root of the catalog of a single database.
/// It maps to the underlying file `{BASE_DIR}/{DATABASE_NAME}/{METADATA_FILE_NAME}`,
/// see [`crate::persistence`] for the on-disk format.
///
/// It is assumed that the number of tables, columns and indexes is small enough that the whole
/// catalog can be kept in memory and rewritten after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseMetadata {
    name: String,
    /// Maps each table name to its metadata.
    tables: BTreeMap<String, TableMetadata>,
}

/// Error for catalog related operations
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Table with provided name does not exist
    #[error("table '{0}' not found")]
    TableNotFound(String),
    /// Table with provided name already exists
    #[error("table '{0}' already exists")]
    TableAlreadyExists(String),
    /// Column with provided name does not exist in the table
    #[error("column '{column}' not found in table '{table}'")]
    ColumnNotFound { table: String, column: String },
    /// There was more than one column with the same name in a table or index definition
    #[error("column '{0}' was defined more than once")]
    DuplicatedColumn(String),
    /// Table name cannot be used as a file name inside of the database directory
    #[error("'{0}' is not a valid table name")]
    InvalidTableName(String),
    /// Column name cannot be used as a part of an index file name
    #[error("'{column}' is not a valid column name in table '{table}'")]
    InvalidColumnName { table: String, column: String },
    /// Sum of column lengths does not fit into memory
    #[error("records of table '{0}' are too large")]
    RecordTooLarge(String),
    /// Table was defined without any column
    #[error("table '{0}' must have at least one column")]
    NoColumns(String),
    /// Declared column length does not fit the column type
    #[error("column '{column}' of type {ty} cannot be {len} bytes long")]
    InvalidColumnLength { column: String, ty: Type, len: usize },
    /// Index was defined without any key column
    #[error("index on table '{0}' must have at least one column")]
    EmptyIndex(String),
    /// Index with provided columns does not exist
    #[error("index {table}({}) not found", .columns.join(", "))]
    IndexNotFound { table: String, columns: Vec<String> },
    /// Index with provided columns already exists
    #[error("index {table}({}) already exists", .columns.join(", "))]
    IndexAlreadyExists { table: String, columns: Vec<String> },
    /// Metadata breaks one of the layout invariants, possible only for catalogs read from disk
    #[error("invalid layout of table '{table}': {reason}")]
    InvalidLayout { table: String, reason: String },
}

impl DatabaseMetadata {
    /// Creates new, empty [`DatabaseMetadata`].
    pub fn new(name: impl Into<String>) -> Self {
        DatabaseMetadata {
            name: name.into(),
            tables: BTreeMap::new(),
        }
    }

    /// Creates [`DatabaseMetadata`] from already validated tables.
    /// Can fail if two tables share the same name.
    pub(crate) fn with_tables(
        name: impl Into<String>,
        tables: Vec<TableMetadata>,
    ) -> Result<Self, CatalogError> {
        let mut metadata = DatabaseMetadata::new(name);
        for table in tables {
            metadata.add_table(table)?;
        }
        Ok(metadata)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns all tables sorted by their names.
    pub fn tables(&self) -> impl Iterator<Item = &TableMetadata> {
        self.tables.values()
    }

    pub fn contains_table(&self, table_name: &str) -> bool {
        self.tables.contains_key(table_name)
    }

    /// Returns table with `table_name` name.
    /// Can fail if table with `table_name` name does not exist.
    pub fn table(&self, table_name: &str) -> Result<&TableMetadata, CatalogError> {
        self.tables
            .get(table_name)
            .ok_or_else(|| CatalogError::TableNotFound(table_name.into()))
    }

    fn table_mut(&mut self, table_name: &str) -> Result<&mut TableMetadata, CatalogError> {
        self.tables
            .get_mut(table_name)
            .ok_or_else(|| CatalogError::TableNotFound(table_name.into()))
    }

    /// Adds `table` to the catalog.
    /// IMPORTANT NOTE: this function only changes the in-memory catalog. It is NOT responsible for managing table files.
    /// Can fail if table with same name already exists.
    pub(crate) fn add_table(&mut self, table: TableMetadata) -> Result<(), CatalogError> {
        if self.tables.contains_key(&table.name) {
            return Err(CatalogError::TableAlreadyExists(table.name));
        }
        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    /// Removes table with `table_name` name from the catalog and returns its metadata.
    /// Can fail if table with `table_name` does not exist.
    pub(crate) fn remove_table(&mut self, table_name: &str) -> Result<TableMetadata, CatalogError> {
        self.tables
            .remove(table_name)
            .ok_or_else(|| CatalogError::TableNotFound(table_name.into()))
    }

    /// Appends `index` to the indexes of its table.
    pub(crate) fn add_index(&mut self, index: IndexMetadata) -> Result<(), CatalogError> {
        let table_name = index.table_name.clone();
        self.table_mut(&table_name)?.add_index(index)
    }

    /// Removes index built on `columns` from table `table_name`.
    pub(crate) fn remove_index(
        &mut self,
        table_name: &str,
        columns: &[ColumnMetadata],
    ) -> Result<IndexMetadata, CatalogError> {
        self.table_mut(table_name)?.remove_index(columns)
    }
}

/// Definition of a single column used when creating a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: Type,
    pub len: usize,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: Type, len: usize) -> Self {
        ColumnDef {
            name: name.into(),
            ty,
            len,
        }
    }

    /// Creates definition of a column whose type has a fixed length.
    /// For [`Type::String`] the length is 0, which makes the definition invalid, use [`ColumnDef::new`] instead.
    pub fn fixed(name: impl Into<String>, ty: Type) -> Self {
        ColumnDef::new(name, ty, ty.fixed_len().unwrap_or(0))
    }
}

/// [`TableMetadata`] stores the metadata for a single table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadata {
    name: String,
    /// All table's columns sorted by their position in the record.
    columns: Vec<ColumnMetadata>,
    /// Maps each column name to its position in `columns`.
    columns_by_name: HashMap<String, usize>,
    indexes: Vec<IndexMetadata>,
}

impl TableMetadata {
    /// Creates new [`TableMetadata`] and checks every layout invariant:
    /// - there is at least one column and column names are unique,
    /// - offsets partition the record in declaration order,
    /// - every index is built on existing columns and index identities are unique,
    /// - `indexed` flag is set exactly on columns that are part of some index.
    ///
    /// Only for internal usage, other modules should use [`TableMetadataFactory`].
    pub(crate) fn new(
        name: impl Into<String>,
        columns: Vec<ColumnMetadata>,
        indexes: Vec<IndexMetadata>,
    ) -> Result<Self, CatalogError> {
        let name = name.into();
        if !is_table_name(&name) {
            return Err(CatalogError::InvalidTableName(name));
        }
        if columns.is_empty() {
            return Err(CatalogError::NoColumns(name));
        }

        let mut columns_by_name = HashMap::with_capacity(columns.len());
        let mut expected_offset = 0;
        for (idx, column) in columns.iter().enumerate() {
            if !is_file_name(&column.name) {
                return Err(CatalogError::InvalidColumnName {
                    table: name,
                    column: column.name.clone(),
                });
            }
            if columns_by_name.insert(column.name.clone(), idx).is_some() {
                return Err(CatalogError::DuplicatedColumn(column.name.clone()));
            }
            if !column.ty.accepts_len(column.len) {
                return Err(CatalogError::InvalidColumnLength {
                    column: column.name.clone(),
                    ty: column.ty,
                    len: column.len,
                });
            }
            if column.offset != expected_offset {
                return Err(invalid_layout(
                    &name,
                    format!(
                        "column '{}' starts at {} instead of {}",
                        column.name, column.offset, expected_offset
                    ),
                ));
            }
            expected_offset = expected_offset
                .checked_add(column.len)
                .ok_or_else(|| CatalogError::RecordTooLarge(name.clone()))?;
        }

        let mut table = TableMetadata {
            name,
            columns,
            columns_by_name,
            indexes: Vec::with_capacity(indexes.len()),
        };
        let declared_flags: Vec<bool> = table.columns.iter().map(|c| c.indexed).collect();
        for index in indexes {
            table.check_index_columns(&index)?;
            table.add_index(index)?;
        }
        table.refresh_indexed_flags();
        let computed_flags = table.columns.iter().map(|c| c.indexed);
        if !declared_flags.into_iter().eq(computed_flags) {
            return Err(invalid_layout(
                &table.name,
                "indexed flags do not match table indexes",
            ));
        }
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns metadata of each column sorted by column position in the record.
    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    /// Returns column metadata for column with `column_name`.
    /// Can fail if column with `column_name` does not exist.
    pub fn column(&self, column_name: &str) -> Result<&ColumnMetadata, CatalogError> {
        self.columns_by_name
            .get(column_name)
            .map(|&idx| &self.columns[idx])
            .ok_or_else(|| CatalogError::ColumnNotFound {
                table: self.name.clone(),
                column: column_name.into(),
            })
    }

    /// Returns size of a single record, which is the sum of all column lengths.
    pub fn record_size(&self) -> usize {
        // offsets partition the record, so the last column ends where the record does
        self.columns
            .last()
            .map_or(0, |column| column.offset + column.len)
    }

    pub fn indexes(&self) -> &[IndexMetadata] {
        &self.indexes
    }

    /// Returns index whose key columns are exactly `column_names` (in that order).
    pub fn index<S: AsRef<str>>(&self, column_names: &[S]) -> Option<&IndexMetadata> {
        self.indexes.iter().find(|index| index.is_on(column_names))
    }

    /// Resolves `column_names` to copies of the table's column metadata, keeping the order of `column_names`.
    /// Can fail if the list is empty, contains the same column twice or references unknown column.
    pub fn resolve_columns<S: AsRef<str>>(
        &self,
        column_names: &[S],
    ) -> Result<Vec<ColumnMetadata>, CatalogError> {
        if column_names.is_empty() {
            return Err(CatalogError::EmptyIndex(self.name.clone()));
        }
        let mut seen = HashSet::with_capacity(column_names.len());
        column_names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                if !seen.insert(name) {
                    return Err(CatalogError::DuplicatedColumn(name.into()));
                }
                self.column(name).cloned()
            })
            .collect()
    }

    /// Adds index to the table and marks its columns as indexed.
    /// Can fail if index on the same columns already exists.
    fn add_index(&mut self, index: IndexMetadata) -> Result<(), CatalogError> {
        let columns = index.column_names();
        if self.index(&columns).is_some() {
            return Err(CatalogError::IndexAlreadyExists {
                table: self.name.clone(),
                columns,
            });
        }
        self.indexes.push(index);
        self.refresh_indexed_flags();
        Ok(())
    }

    /// Removes index built on `columns`, columns are compared by name.
    /// Can fail if there is no such index.
    fn remove_index(&mut self, columns: &[ColumnMetadata]) -> Result<IndexMetadata, CatalogError> {
        let names: Vec<&str> = columns.iter().map(ColumnMetadata::name).collect();
        let pos = self
            .indexes
            .iter()
            .position(|index| index.is_on(&names))
            .ok_or_else(|| CatalogError::IndexNotFound {
                table: self.name.clone(),
                columns: names.iter().map(|n| n.to_string()).collect(),
            })?;
        let index = self.indexes.remove(pos);
        self.refresh_indexed_flags();
        Ok(index)
    }

    /// Checks that each key column of `index` is a copy of one of the table columns.
    fn check_index_columns(&self, index: &IndexMetadata) -> Result<(), CatalogError> {
        if index.table_name != self.name {
            return Err(invalid_layout(
                &self.name,
                format!("index belongs to table '{}'", index.table_name),
            ));
        }
        for key_column in &index.columns {
            let column = self.column(&key_column.name)?;
            let same_layout = column.ty == key_column.ty
                && column.len == key_column.len
                && column.offset == key_column.offset;
            if !same_layout {
                return Err(invalid_layout(
                    &self.name,
                    format!("index column '{}' differs from table column", key_column.name),
                ));
            }
        }
        Ok(())
    }

    /// Sets `indexed` flag on every column used by at least one index and clears it on the rest.
    fn refresh_indexed_flags(&mut self) {
        let indexed: HashSet<&str> = self
            .indexes
            .iter()
            .flat_map(|index| index.columns.iter().map(ColumnMetadata::name))
            .collect();
        for column in self.columns.iter_mut() {
            column.indexed = indexed.contains(column.name.as_str());
        }
    }
}

/// Returns `true` if `name` is a single, plain component of a path.
fn is_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    let plain = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(component)), None) if component == name
    );
    plain && !name.contains(['/', '\\', '\0'])
}

/// Returns `true` if record file named `name` cannot collide with other files of a database.
fn is_table_name(name: &str) -> bool {
    is_file_name(name)
        && !RESERVED_FILE_NAMES.contains(&name)
        && !name.ends_with(INDEX_FILE_EXTENSION)
}

/// Returns `true` if `name` can be used as a name of a database directory.
pub(crate) fn is_database_name(name: &str) -> bool {
    is_file_name(name)
}

fn invalid_layout(table: &str, reason: impl Into<String>) -> CatalogError {
    CatalogError::InvalidLayout {
        table: table.into(),
        reason: reason.into(),
    }
}

/// Structure for creating new [`TableMetadata`] out of column definitions.
/// Columns are laid out in declaration order, each column starts right where the previous one ends.
pub struct TableMetadataFactory {
    name: String,
    column_defs: Vec<ColumnDef>,
}

impl TableMetadataFactory {
    pub fn new(name: impl Into<String>, column_defs: Vec<ColumnDef>) -> Self {
        TableMetadataFactory {
            name: name.into(),
            column_defs,
        }
    }

    pub fn create_table_metadata(self) -> Result<TableMetadata, CatalogError> {
        let mut offset = 0;
        let mut columns = Vec::with_capacity(self.column_defs.len());
        for def in self.column_defs {
            if !def.ty.accepts_len(def.len) {
                return Err(CatalogError::InvalidColumnLength {
                    column: def.name,
                    ty: def.ty,
                    len: def.len,
                });
            }
            let len = def.len;
            columns.push(ColumnMetadata::new(&self.name, def.name, def.ty, len, offset, false));
            offset = offset
                .checked_add(len)
                .ok_or_else(|| CatalogError::RecordTooLarge(self.name.clone()))?;
        }
        TableMetadata::new(self.name, columns, Vec::new())
    }
}

/// [`ColumnMetadata`] stores the metadata for a single column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    table_name: String,
    name: String,
    ty: Type,
    /// Number of bytes the column takes in every record.
    len: usize,
    /// Offset of the column inside of the record.
    ///
    /// For example, for layout:
    /// | int | char(8) | bigint |
    /// offsets of the columns are: 0, 4, 12
    offset: usize,
    /// Whether any index of the table contains this column.
    indexed: bool,
}

impl ColumnMetadata {
    pub(crate) fn new(
        table_name: impl Into<String>,
        name: impl Into<String>,
        ty: Type,
        len: usize,
        offset: usize,
        indexed: bool,
    ) -> Self {
        ColumnMetadata {
            table_name: table_name.into(),
            name: name.into(),
            ty,
            len,
            offset,
            indexed,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn indexed(&self) -> bool {
        self.indexed
    }
}

/// [`IndexMetadata`] describes a secondary index. Its identity is the table name together with
/// the ordered list of key column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    table_name: String,
    /// Sum of key column lengths.
    key_len: usize,
    /// Copies of key columns in key order.
    columns: Vec<ColumnMetadata>,
}

impl IndexMetadata {
    /// Creates index on `columns`, the composite key is the concatenation of the columns in the given order.
    /// Can fail if `columns` is empty.
    pub(crate) fn new(
        table_name: impl Into<String>,
        columns: Vec<ColumnMetadata>,
    ) -> Result<Self, CatalogError> {
        let table_name = table_name.into();
        if columns.is_empty() {
            return Err(CatalogError::EmptyIndex(table_name));
        }
        let key_len = columns
            .iter()
            .try_fold(0usize, |sum, column| sum.checked_add(column.len))
            .ok_or_else(|| CatalogError::RecordTooLarge(table_name.clone()))?;
        let columns = columns
            .into_iter()
            .map(|column| ColumnMetadata {
                indexed: true,
                ..column
            })
            .collect();
        Ok(IndexMetadata {
            table_name,
            key_len,
            columns,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn key_len(&self) -> usize {
        self.key_len
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Returns `true` if key columns of the index are exactly `column_names`.
    pub fn is_on<S: AsRef<str>>(&self, column_names: &[S]) -> bool {
        self.columns.len() == column_names.len()
            && self
                .columns
                .iter()
                .zip(column_names)
                .all(|(column, name)| column.name == name.as_ref())
    }
}
