use std::{collections::BTreeMap, fs, path::Path};

use parking_lot::{Mutex, MutexGuard};

use engine::{
    heap_file::{HeapFile, HeapFileStore},
    index_file::{IndexFile, IndexFileStore},
};
use metadata::{
    catalog::{ColumnDef, DatabaseMetadata},
    lock::TableGuard,
    store::{RecordFile, RecordId},
    system_manager::{ErrorKind, SystemManager, SystemManagerError},
};
use tempfile::TempDir;
use types::schema::Type;

type Manager = SystemManager<HeapFileStore, IndexFileStore>;

/// Only one database can be open in the process, tests opening one run one at a time.
static SERIAL: Mutex<()> = parking_lot::const_mutex(());

/// Test fixture with a system manager over a temporary base directory
struct DdlFixture {
    manager: Manager,
    /// Temporary directory - must be kept alive for the duration of the test
    tmp_dir: TempDir,
    _serial: MutexGuard<'static, ()>,
}

impl DdlFixture {
    fn new() -> Self {
        let serial = SERIAL.lock();
        let _ = env_logger::builder().is_test(true).try_init();
        let tmp_dir = tempfile::tempdir().unwrap();
        let manager =
            SystemManager::new(tmp_dir.path(), HeapFileStore::new(), IndexFileStore::new());
        Self {
            manager,
            tmp_dir,
            _serial: serial,
        }
    }

    /// Creates and opens database `shop`
    fn with_shop() -> Self {
        let mut fixture = Self::new();
        fixture.manager.create_database("shop").unwrap();
        fixture.manager.open_database("shop").unwrap();
        fixture
    }

    fn db_path(&self, name: &str) -> std::path::PathBuf {
        self.tmp_dir.path().join(name)
    }

    /// Creates `orders(id INT, customer STRING(8), amount FLOAT)`
    fn create_orders(&mut self) {
        let guard = TableGuard::exclusive(1, "orders");
        self.manager
            .create_table(
                "orders",
                vec![
                    ColumnDef::fixed("id", Type::Int),
                    ColumnDef::new("customer", Type::String, 8),
                    ColumnDef::fixed("amount", Type::Float),
                ],
                &guard,
            )
            .unwrap();
    }

    fn insert_order(&mut self, id: i32, customer: &str, amount: f64) -> RecordId {
        let mut record = id.to_be_bytes().to_vec();
        let mut name = customer.as_bytes().to_vec();
        name.resize(8, 0);
        record.extend_from_slice(&name);
        record.extend_from_slice(&amount.to_be_bytes());
        self.manager
            .record_file_mut("orders")
            .unwrap()
            .insert_record(&record)
            .unwrap()
    }

    fn create_index(&mut self, columns: &[&str]) -> Result<(), SystemManagerError> {
        let guard = TableGuard::shared(2, "orders");
        self.manager.create_index("orders", columns, &guard)
    }

    /// Checks that open record files and indexes are exactly the ones the catalog describes.
    fn assert_registries_match_catalog(&self) {
        let meta = self.manager.database().unwrap();
        let tables: Vec<&str> = meta.tables().map(|t| t.name()).collect();
        assert_eq!(self.manager.open_record_files(), tables);

        let mut indexes: Vec<String> = meta
            .tables()
            .flat_map(|t| t.indexes())
            .map(|i| format!("{}_{}.idx", i.table_name(), i.column_names().join("_")))
            .collect();
        indexes.sort();
        assert_eq!(self.manager.open_indexes(), indexes);
    }
}

fn dir_snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            (
                entry.file_name().to_string_lossy().into_owned(),
                fs::read(entry.path()).unwrap(),
            )
        })
        .collect()
}

#[test]
fn create_table_computes_offsets_and_record_size() {
    // given open database
    let mut fixture = DdlFixture::with_shop();

    // when table (a INT, b CHAR(8)) is created
    let guard = TableGuard::exclusive(1, "t");
    fixture
        .manager
        .create_table(
            "t",
            vec![
                ColumnDef::fixed("a", Type::Int),
                ColumnDef::new("b", Type::String, 8),
            ],
            &guard,
        )
        .unwrap();

    // then columns are packed in declaration order
    let table = fixture.manager.database().unwrap().table("t").unwrap();
    assert_eq!(table.column("a").unwrap().offset(), 0);
    assert_eq!(table.column("b").unwrap().offset(), 4);
    assert_eq!(table.record_size(), 12);
    assert_eq!(fixture.manager.record_file("t").unwrap().record_size(), 12);
}

#[test]
fn catalog_survives_close_and_open() {
    // given database with a table and a composite index
    let mut fixture = DdlFixture::with_shop();
    fixture.create_orders();
    fixture.insert_order(1, "alice", 10.0);
    fixture.create_index(&["customer", "id"]).unwrap();
    let before = fixture.manager.database().unwrap().clone();

    // when it is closed and opened again
    fixture.manager.close_database().unwrap();
    assert!(fixture.manager.open_record_files().is_empty());
    fixture.manager.open_database("shop").unwrap();

    // then tables, columns and indexes are the same as before
    assert_eq!(fixture.manager.database().unwrap(), &before);
    assert_eq!(
        DatabaseMetadata::load(fixture.db_path("shop")).unwrap(),
        before
    );
    let index = fixture.manager.index("orders", &["customer", "id"]).unwrap();
    assert_eq!(index.len(), 1);
    fixture.assert_registries_match_catalog();
}

#[test]
fn create_index_inserts_one_entry_per_record() {
    // given three orders with distinct ids
    let mut fixture = DdlFixture::with_shop();
    fixture.create_orders();
    let rids: Vec<RecordId> = [(3, "carol"), (1, "alice"), (2, "alice")]
        .into_iter()
        .map(|(id, customer)| fixture.insert_order(id, customer, 1.5))
        .collect();

    // when index on id is created
    fixture.create_index(&["id"]).unwrap();

    // then every record is reachable through its key
    let index: &IndexFile = fixture.manager.index("orders", &["id"]).unwrap();
    assert_eq!(index.len(), 3);
    assert_eq!(index.key_len(), 4);
    assert_eq!(index.get(&3i32.to_be_bytes()), Some(rids[0]));
    assert_eq!(index.get(&1i32.to_be_bytes()), Some(rids[1]));
    assert_eq!(index.get(&2i32.to_be_bytes()), Some(rids[2]));
    let table = fixture.manager.database().unwrap().table("orders").unwrap();
    assert!(table.column("id").unwrap().indexed());
    assert!(!table.column("customer").unwrap().indexed());
    fixture.assert_registries_match_catalog();
}

#[test]
fn duplicated_composite_key_leaves_catalog_unchanged() {
    // given two orders with the same (customer, id)
    let mut fixture = DdlFixture::with_shop();
    fixture.create_orders();
    fixture.insert_order(1, "alice", 1.0);
    fixture.insert_order(1, "alice", 2.0);
    let before = fixture.manager.database().unwrap().clone();
    let files_before = dir_snapshot(&fixture.db_path("shop"));

    // when composite index is created
    let result = fixture.create_index(&["customer", "id"]);

    // then the build is aborted without leaving anything behind
    assert_eq!(result.unwrap_err().kind(), ErrorKind::DuplicateKey);
    assert_eq!(fixture.manager.database().unwrap(), &before);
    assert_eq!(dir_snapshot(&fixture.db_path("shop")), files_before);
    fixture.assert_registries_match_catalog();

    // and the index can be built after the duplicate is gone
    let duplicate = RecordId::new(1, 1);
    fixture
        .manager
        .record_file_mut("orders")
        .unwrap()
        .delete_record(duplicate)
        .unwrap();
    fixture.create_index(&["customer", "id"]).unwrap();
    assert_eq!(
        fixture
            .manager
            .index("orders", &["customer", "id"])
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn drop_table_removes_all_of_its_indexes() {
    // given two tables, `orders` with two indexes
    let mut fixture = DdlFixture::with_shop();
    fixture.create_orders();
    fixture.insert_order(1, "alice", 1.0);
    fixture.create_index(&["id"]).unwrap();
    fixture.create_index(&["customer", "amount"]).unwrap();
    let guard = TableGuard::exclusive(1, "users");
    fixture
        .manager
        .create_table("users", vec![ColumnDef::fixed("id", Type::BigInt)], &guard)
        .unwrap();

    // when `orders` is dropped
    let guard = TableGuard::exclusive(1, "orders");
    fixture.manager.drop_table("orders", &guard).unwrap();

    // then neither the table nor its indexes can be looked up
    assert_eq!(
        fixture.manager.index("orders", &["id"]).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        fixture.manager.record_file("orders").unwrap_err().kind(),
        ErrorKind::NotFound
    );

    // and only files of `users` and the database itself are left
    let files: Vec<String> = dir_snapshot(&fixture.db_path("shop")).into_keys().collect();
    assert_eq!(files, vec!["db.log", "db.meta", "users"]);
    fixture.assert_registries_match_catalog();
    let loaded = DatabaseMetadata::load(fixture.db_path("shop")).unwrap();
    assert!(!loaded.contains_table("orders"));
    assert!(loaded.contains_table("users"));
}

#[test]
fn drop_index_removes_file_and_clears_flags() {
    let mut fixture = DdlFixture::with_shop();
    fixture.create_orders();
    fixture.create_index(&["customer"]).unwrap();
    let index_path = fixture.db_path("shop").join("orders_customer.idx");
    assert!(index_path.exists());

    let guard = TableGuard::shared(2, "orders");
    fixture
        .manager
        .drop_index("orders", &["customer"], &guard)
        .unwrap();

    assert!(!index_path.exists());
    let table = fixture.manager.database().unwrap().table("orders").unwrap();
    assert!(table.indexes().is_empty());
    assert!(!table.column("customer").unwrap().indexed());
    assert_eq!(
        fixture
            .manager
            .drop_index("orders", &["customer"], &guard)
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    fixture.assert_registries_match_catalog();
}

#[test]
fn create_existing_database_keeps_it_byte_for_byte() {
    // given closed database with data
    let mut fixture = DdlFixture::with_shop();
    fixture.create_orders();
    fixture.insert_order(7, "bob", 3.0);
    fixture.create_index(&["id"]).unwrap();
    fixture.manager.close_database().unwrap();
    let before = dir_snapshot(&fixture.db_path("shop"));

    // when it is created again
    let result = fixture.manager.create_database("shop");

    // then it fails and nothing changed
    assert_eq!(result.unwrap_err().kind(), ErrorKind::AlreadyExists);
    assert_eq!(dir_snapshot(&fixture.db_path("shop")), before);
}

#[test]
fn open_while_another_database_is_open_fails() {
    // given `shop` open with a table and `archive` created
    let mut fixture = DdlFixture::with_shop();
    fixture.create_orders();
    fixture.manager.create_database("archive").unwrap();
    let before = fixture.manager.database().unwrap().clone();

    // when `archive` is opened
    let result = fixture.manager.open_database("archive");

    // then it fails and `shop` stays open untouched
    assert_eq!(result.unwrap_err().kind(), ErrorKind::AlreadyOpen);
    assert_eq!(fixture.manager.database().unwrap(), &before);
    fixture.assert_registries_match_catalog();

    // and `archive` can be opened after `shop` is closed
    fixture.manager.close_database().unwrap();
    fixture.manager.open_database("archive").unwrap();
    assert_eq!(fixture.manager.database().unwrap().name(), "archive");
}

#[test]
fn registries_follow_catalog_through_ddl_sequence() {
    let mut fixture = DdlFixture::with_shop();
    fixture.assert_registries_match_catalog();

    fixture.create_orders();
    fixture.insert_order(1, "alice", 1.0);
    fixture.assert_registries_match_catalog();

    fixture.create_index(&["id"]).unwrap();
    fixture.create_index(&["customer"]).unwrap();
    fixture.assert_registries_match_catalog();

    let guard = TableGuard::shared(2, "orders");
    fixture.manager.drop_index("orders", &["id"], &guard).unwrap();
    fixture.assert_registries_match_catalog();

    fixture.manager.close_database().unwrap();
    fixture.manager.open_database("shop").unwrap();
    fixture.assert_registries_match_catalog();

    let guard = TableGuard::exclusive(1, "orders");
    fixture.manager.drop_table("orders", &guard).unwrap();
    fixture.assert_registries_match_catalog();
    assert!(fixture.manager.open_indexes().is_empty());
}

#[test]
fn show_tables_appends_to_output_file() {
    let mut fixture = DdlFixture::with_shop();
    fixture.create_orders();

    let mut output = fixture.manager.output_file().unwrap();
    fixture.manager.show_tables(&mut output).unwrap();
    fixture.manager.desc_table("orders", &mut output).unwrap();

    let content = fs::read_to_string(fixture.db_path("shop").join("output.txt")).unwrap();
    assert!(content.contains("|           Tables |"));
    assert!(content.contains("|           orders |"));
    assert!(content.contains("|         customer |           STRING |               NO |"));
}

#[test]
fn heap_file_written_by_manager_can_be_reopened_directly() {
    let mut fixture = DdlFixture::with_shop();
    fixture.create_orders();
    let rid = fixture.insert_order(5, "dave", 2.5);
    fixture.manager.close_database().unwrap();

    let file = HeapFile::open(fixture.db_path("shop").join("orders")).unwrap();

    assert_eq!(file.record_size(), 20);
    assert_eq!(file.get_record(rid).unwrap()[..4], 5i32.to_be_bytes());
}

#[test]
fn open_with_corrupted_table_header_fails() {
    // given closed database whose table file claims an impossible page count
    let mut fixture = DdlFixture::with_shop();
    fixture.create_orders();
    fixture.manager.close_database().unwrap();
    let table_path = fixture.db_path("shop").join("orders");
    let mut bytes = fs::read(&table_path).unwrap();
    bytes[12..20].copy_from_slice(&u64::MAX.to_be_bytes());
    fs::write(&table_path, bytes).unwrap();

    // when it is opened
    let result = fixture.manager.open_database("shop");

    // then the corruption is reported instead of a panic and nothing stays open
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Corruption);
    assert!(fixture.manager.database().is_err());
    assert!(fixture.manager.open_record_files().is_empty());

    // and another database can still be opened
    fixture.manager.create_database("archive").unwrap();
    fixture.manager.open_database("archive").unwrap();
}
