use std::{io, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed size of every page, on disk and in the buffer pool.
pub const PAGE_SIZE: usize = 4096;

/// Data pages tracked by one bitmap page: one bit per page over the
/// `PAGE_SIZE - 8` bytes that follow the bitmap header.
pub const BITMAP_CAPACITY: u32 = 8 * (PAGE_SIZE as u32 - 8);

/// Extent counters the disk meta page can hold after its two fixed fields.
pub const MAX_EXTENTS: u32 = (PAGE_SIZE as u32 - 8) / 4;

/// Index of a frame within the buffer pool.
pub type FrameId = usize;

/// Logical identifier for a page; assigned densely by the disk manager.
/// `PageId(-1)` marks the absence of a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub i32);

impl PageId {
    pub const INVALID: PageId = PageId(-1);

    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }
}

/// Logical identifier for a table registered in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

/// Logical identifier for an index registered in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexId(pub u32);

/// Stable identifier for a tuple: the page holding it and its slot within
/// that page. Survives in-place updates; invalidated by `apply_delete`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u32,
}

impl RecordId {
    pub const INVALID: RecordId = RecordId {
        page_id: PageId::INVALID,
        slot: 0,
    };

    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    pub fn is_valid(&self) -> bool {
        self.page_id.is_valid()
    }
}

/// Logical page that persists the catalog's two metadata maps.
pub const CATALOG_META_PAGE: PageId = PageId(0);

/// Logical page that maps each index id to its current B+-tree root.
pub const INDEX_ROOTS_PAGE: PageId = PageId(1);

/// Canonical error type shared across the engine subsystems.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("buffer pool exhausted: {0}")]
    OutOfMemory(String),
    #[error("corrupt metadata: {0}")]
    CorruptMetadata(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("parse: {0}")]
    Parser(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for a database engine instance.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./my_db"))
///     .buffer_pool_pages(512)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory holding one file per database.
    #[builder(default = PathBuf::from("./minidb_data"))]
    pub data_dir: PathBuf,
    /// Number of pages the buffer pool keeps resident per database.
    #[builder(default = 256)]
    pub buffer_pool_pages: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./minidb_data"),
            buffer_pool_pages: 256,
        }
    }
}
