/// Name of the file (inside a database directory) that stores the database catalog.
pub const METADATA_FILE_NAME: &str = "db.meta";

/// Name of the log placeholder file created together with a database.
pub const LOG_FILE_NAME: &str = "db.log";

/// Name of the file introspection output is appended to.
pub const OUTPUT_FILE_NAME: &str = "output.txt";

/// Extension of index file names, record files are named after their tables without one.
pub const INDEX_FILE_EXTENSION: &str = ".idx";

/// Names of database files that no table may take.
pub const RESERVED_FILE_NAMES: [&str; 3] = [METADATA_FILE_NAME, LOG_FILE_NAME, OUTPUT_FILE_NAME];

/// Version of the metadata file layout written by this crate.
pub const METADATA_FORMAT_VERSION: u32 = 1;

/// Application name used to locate the default data directory.
pub const DATA_DIR_APPLICATION: &str = "Tabula";
