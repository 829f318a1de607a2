//! HeapFile module - stores fixed-size records of a single table in a paged file.

use std::{
    collections::BTreeSet,
    fs,
    io::{self, Cursor, ErrorKind, Read, Seek, Write},
    path::{Path, PathBuf},
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use metadata::store::{RecordFile, RecordId, RecordScan, RecordStore, StoreError};
use parking_lot::Mutex;

/// Size of each page in [`HeapFile`].
const PAGE_SIZE: usize = 4096; // 4 kB

/// Type representing page, should be used instead of bare array of bytes.
type Page = [u8; PAGE_SIZE];

/// [`RecordStore`] keeping every table in its own [`HeapFile`] named after the table.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapFileStore;

impl HeapFileStore {
    pub fn new() -> Self {
        HeapFileStore
    }
}

impl RecordStore for HeapFileStore {
    type Handle = HeapFile;

    fn create_file(&self, dir: &Path, name: &str, record_size: usize) -> Result<(), StoreError> {
        HeapFile::create(dir.join(name), record_size)?;
        Ok(())
    }

    fn open_file(&self, dir: &Path, name: &str) -> Result<HeapFile, StoreError> {
        HeapFile::open(dir.join(name))
    }

    fn close_file(&self, handle: HeapFile) -> Result<(), StoreError> {
        handle.flush()
    }

    fn destroy_file(&self, dir: &Path, name: &str) -> Result<(), StoreError> {
        let path = dir.join(name);
        fs::remove_file(&path)?;
        debug!("Removed heap file {}", path.display());
        Ok(())
    }
}

/// File of fixed-size records.
///
/// Page 0 holds [`HeapFileHeader`]. Every other page starts with an occupancy bitmap
/// (one bit per slot, `ceil(records_per_page / 8)` bytes) followed by `records_per_page` slots
/// of `record_size` bytes each. Records are addressed by [`RecordId`] - data page number
/// (starting from 1) and slot number.
#[derive(Debug)]
pub struct HeapFile {
    path: PathBuf,
    /// Reads need seeking, so even `&self` methods need exclusive access to the handle.
    handle: Mutex<fs::File>,
    header: HeapFileHeader,
    /// Data pages with at least one free slot.
    non_full_pages: BTreeSet<u64>,
}

impl HeapFile {
    /// Creates new, empty heap file at `path`. Fails if the file already exists.
    pub fn create(path: impl AsRef<Path>, record_size: usize) -> Result<HeapFile, StoreError> {
        let header = HeapFileHeader::new(record_size)?;
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;
        file.write_all(&Page::try_from(&header)?)?;
        file.sync_all()?;
        debug!(
            "Created heap file {} ({} records of {record_size} bytes per page)",
            path.as_ref().display(),
            header.records_per_page
        );
        Ok(HeapFile {
            path: path.as_ref().to_path_buf(),
            handle: Mutex::new(file),
            header,
            non_full_pages: BTreeSet::new(),
        })
    }

    /// Opens existing heap file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<HeapFile, StoreError> {
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let mut header_page = [0u8; PAGE_SIZE];
        if let Err(e) = file.read_exact(&mut header_page) {
            return match e.kind() {
                ErrorKind::UnexpectedEof => Err(StoreError::InvalidFileFormat(
                    "file shorter than one page".into(),
                )),
                _ => Err(StoreError::IoError(e)),
            };
        }
        let header = HeapFileHeader::try_from(header_page)?;
        let expected_len = header
            .page_count
            .checked_add(1)
            .and_then(|pages| pages.checked_mul(PAGE_SIZE as u64))
            .ok_or_else(|| {
                StoreError::InvalidFileFormat(format!("invalid page count {}", header.page_count))
            })?;
        if file.metadata()?.len() < expected_len {
            return Err(StoreError::InvalidFileFormat(format!(
                "file shorter than {expected_len} bytes"
            )));
        }

        let mut heap_file = HeapFile {
            path: path.as_ref().to_path_buf(),
            handle: Mutex::new(file),
            header,
            non_full_pages: BTreeSet::new(),
        };
        for page_no in 1..=heap_file.header.page_count {
            let page = heap_file.read_page(page_no)?;
            if heap_file.first_free_slot(&page).is_some() {
                heap_file.non_full_pages.insert(page_no);
            }
        }
        Ok(heap_file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of data pages (the header page is not counted).
    pub fn page_count(&self) -> u64 {
        self.header.page_count
    }

    /// Inserts `record` into the first free slot, allocating new page if every page is full.
    pub fn insert_record(&mut self, record: &[u8]) -> Result<RecordId, StoreError> {
        self.check_record_size(record.len())?;
        let page_no = match self.non_full_pages.first() {
            Some(page_no) => *page_no,
            None => self.allocate_page()?,
        };

        let mut page = self.read_page(page_no)?;
        let slot_no = self
            .first_free_slot(&page)
            .ok_or_else(|| StoreError::InvalidFileFormat(format!("page {page_no} is full")))?;
        set_bit(&mut page, slot_no, true);
        let start = self.slot_offset(slot_no);
        page[start..start + self.header.record_size].copy_from_slice(record);
        self.write_page(page_no, &page)?;

        if self.first_free_slot(&page).is_none() {
            self.non_full_pages.remove(&page_no);
        }
        Ok(RecordId::new(page_no, slot_no as u32))
    }

    /// Removes record `rid`, its slot can be reused by later inserts.
    pub fn delete_record(&mut self, rid: RecordId) -> Result<(), StoreError> {
        let (mut page, slot_no) = self.read_live_slot(rid)?;
        set_bit(&mut page, slot_no, false);
        self.write_page(rid.page_no, &page)?;
        self.non_full_pages.insert(rid.page_no);
        Ok(())
    }

    /// Flushes file content to disk. Can fail if io error occurs.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.handle.lock().sync_all()?;
        Ok(())
    }

    fn check_record_size(&self, size: usize) -> Result<(), StoreError> {
        if size != self.header.record_size {
            return Err(StoreError::InvalidRecordSize {
                expected: self.header.record_size,
                got: size,
            });
        }
        Ok(())
    }

    /// Reads page containing `rid` and checks that the slot holds a record.
    fn read_live_slot(&self, rid: RecordId) -> Result<(Page, usize), StoreError> {
        let slot_no = rid.slot_no as usize;
        if rid.page_no == 0
            || rid.page_no > self.header.page_count
            || slot_no >= self.header.records_per_page
        {
            return Err(StoreError::RecordNotFound(rid));
        }
        let page = self.read_page(rid.page_no)?;
        if !get_bit(&page, slot_no) {
            return Err(StoreError::RecordNotFound(rid));
        }
        Ok((page, slot_no))
    }

    fn record_at(&self, page: &Page, slot_no: usize) -> Vec<u8> {
        let start = self.slot_offset(slot_no);
        page[start..start + self.header.record_size].to_vec()
    }

    fn slot_offset(&self, slot_no: usize) -> usize {
        self.header.bitmap_len() + slot_no * self.header.record_size
    }

    fn first_free_slot(&self, page: &Page) -> Option<usize> {
        (0..self.header.records_per_page).find(|slot_no| !get_bit(page, *slot_no))
    }

    fn allocate_page(&mut self) -> Result<u64, StoreError> {
        let page_no = self.header.page_count + 1;
        self.write_page(page_no, &[0u8; PAGE_SIZE])?;
        self.header.page_count = page_no;
        self.write_page(0, &Page::try_from(&self.header)?)?;
        self.non_full_pages.insert(page_no);
        Ok(page_no)
    }

    fn read_page(&self, page_no: u64) -> Result<Page, StoreError> {
        let mut handle = self.handle.lock();
        handle.seek(io::SeekFrom::Start(page_no * PAGE_SIZE as u64))?;
        let mut page = [0u8; PAGE_SIZE];
        handle.read_exact(&mut page)?;
        Ok(page)
    }

    fn write_page(&self, page_no: u64, page: &Page) -> Result<(), StoreError> {
        let mut handle = self.handle.lock();
        handle.seek(io::SeekFrom::Start(page_no * PAGE_SIZE as u64))?;
        handle.write_all(page)?;
        Ok(())
    }
}

impl RecordFile for HeapFile {
    fn record_size(&self) -> usize {
        self.header.record_size
    }

    fn scan(&self) -> Result<RecordScan<'_>, StoreError> {
        Ok(Box::new(HeapFileScan {
            file: self,
            page_no: 0,
            page: None,
            slot_no: 0,
        }))
    }

    fn get_record(&self, rid: RecordId) -> Result<Vec<u8>, StoreError> {
        let (page, slot_no) = self.read_live_slot(rid)?;
        Ok(self.record_at(&page, slot_no))
    }
}

/// Forward scan over live records of a [`HeapFile`], reads one page at a time.
struct HeapFileScan<'a> {
    file: &'a HeapFile,
    page_no: u64,
    /// Currently scanned page, `None` before the first page is read.
    page: Option<Page>,
    slot_no: usize,
}

impl Iterator for HeapFileScan<'_> {
    type Item = Result<(RecordId, Vec<u8>), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(page) = &self.page {
                while self.slot_no < self.file.header.records_per_page {
                    let slot_no = self.slot_no;
                    self.slot_no += 1;
                    if get_bit(page, slot_no) {
                        let rid = RecordId::new(self.page_no, slot_no as u32);
                        return Some(Ok((rid, self.file.record_at(page, slot_no))));
                    }
                }
            }
            if self.page_no >= self.file.header.page_count {
                return None;
            }
            self.page_no += 1;
            self.slot_no = 0;
            match self.file.read_page(self.page_no) {
                Ok(page) => self.page = Some(page),
                Err(e) => {
                    // stop after the first error
                    self.page_no = self.file.header.page_count;
                    self.page = None;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn get_bit(page: &Page, slot_no: usize) -> bool {
    page[slot_no / 8] & (1 << (slot_no % 8)) != 0
}

fn set_bit(page: &mut Page, slot_no: usize, value: bool) {
    let mask = 1 << (slot_no % 8);
    if value {
        page[slot_no / 8] |= mask;
    } else {
        page[slot_no / 8] &= !mask;
    }
}

/// Content of the first page of [`HeapFile`].
///
/// Format of the first page in the file is as follows:
/// - `magic_number` (4 bytes)
/// - `record_size` (4 bytes)
/// - `records_per_page` (4 bytes)
/// - `page_count` (8 bytes) - number of data pages
#[derive(Debug, Clone, PartialEq)]
struct HeapFileHeader {
    record_size: usize,
    records_per_page: usize,
    page_count: u64,
}

impl HeapFileHeader {
    /// Magic number - used for checking if file is (has high chances to be) a heap file.
    const MAGIC_NUMBER: [u8; 4] = *b"TBHF";

    /// Creates header of an empty file with as many slots per page as fit next to the bitmap.
    fn new(record_size: usize) -> Result<Self, StoreError> {
        if record_size == 0 {
            return Err(StoreError::InvalidRecordSize {
                expected: 1,
                got: 0,
            });
        }
        if record_size > PAGE_SIZE {
            return Err(StoreError::RecordTooLarge(record_size));
        }
        let mut records_per_page = PAGE_SIZE * 8 / (record_size * 8 + 1);
        while records_per_page > 0
            && records_per_page.div_ceil(8) + records_per_page * record_size > PAGE_SIZE
        {
            records_per_page -= 1;
        }
        if records_per_page == 0 {
            return Err(StoreError::RecordTooLarge(record_size));
        }
        Ok(HeapFileHeader {
            record_size,
            records_per_page,
            page_count: 0,
        })
    }

    fn bitmap_len(&self) -> usize {
        self.records_per_page.div_ceil(8)
    }
}

/// Should be used to deserialize [`HeapFileHeader`] from [`Page`].
impl TryFrom<Page> for HeapFileHeader {
    type Error = StoreError;

    fn try_from(value: Page) -> Result<Self, Self::Error> {
        let mut cursor = Cursor::new(value);
        let mut magic_number = [0u8; 4];
        cursor.read_exact(&mut magic_number)?;
        if magic_number != Self::MAGIC_NUMBER {
            return Err(StoreError::InvalidFileFormat("invalid magic number".into()));
        }
        let record_size = cursor.read_u32::<BigEndian>()? as usize;
        let records_per_page = cursor.read_u32::<BigEndian>()? as usize;
        let page_count = cursor.read_u64::<BigEndian>()?;
        let header = HeapFileHeader::new(record_size)?;
        if header.records_per_page != records_per_page {
            return Err(StoreError::InvalidFileFormat(format!(
                "{records_per_page} records per page do not match record size {record_size}"
            )));
        }
        Ok(HeapFileHeader {
            page_count,
            ..header
        })
    }
}

/// Should be used to serialize [`HeapFileHeader`] into [`Page`].
impl TryFrom<&HeapFileHeader> for Page {
    type Error = StoreError;

    fn try_from(value: &HeapFileHeader) -> Result<Self, Self::Error> {
        let mut page = [0u8; PAGE_SIZE];
        let mut cursor = Cursor::new(&mut page[..]);
        cursor.write_all(&HeapFileHeader::MAGIC_NUMBER)?;
        cursor.write_u32::<BigEndian>(value.record_size as u32)?;
        cursor.write_u32::<BigEndian>(value.records_per_page as u32)?;
        cursor.write_u64::<BigEndian>(value.page_count)?;
        Ok(page)
    }
}
