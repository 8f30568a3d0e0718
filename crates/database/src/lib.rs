//! One database: one file, fronted by a disk manager, a buffer pool, and a
//! catalog.
//!
//! Creation lays out the two reserved pages first (the catalog meta page
//! and the index roots page); opening rehydrates the catalog from them.

use std::path::Path;
use std::sync::Arc;

use log::info;

use buffer::BufferPool;
use catalog::CatalogManager;
use common::{CATALOG_META_PAGE, DbError, DbResult, INDEX_ROOTS_PAGE};
use disk::DiskManager;

pub struct Database {
    name: String,
    pool: Arc<BufferPool>,
    catalog: CatalogManager,
}

impl Database {
    /// Initializes a brand-new database file.
    pub fn create(path: &Path, pool_pages: usize) -> DbResult<Self> {
        let name = db_name(path);
        let disk = DiskManager::open(path)?;
        let pool = Arc::new(BufferPool::new(pool_pages, disk));

        let (meta_page, _meta_guard) = pool.new_page()?;
        if meta_page != CATALOG_META_PAGE {
            return Err(DbError::Storage(format!(
                "expected the catalog meta page first, got {:?}",
                meta_page
            )));
        }
        let (roots_page, _roots_guard) = pool.new_page()?;
        if roots_page != INDEX_ROOTS_PAGE {
            return Err(DbError::Storage(format!(
                "expected the index roots page second, got {:?}",
                roots_page
            )));
        }

        let catalog = CatalogManager::init(Arc::clone(&pool))?;
        pool.flush_all()?;
        info!("created database '{name}' at {}", path.display());
        Ok(Self {
            name,
            pool,
            catalog,
        })
    }

    /// Opens an existing database file and loads its catalog.
    pub fn open(path: &Path, pool_pages: usize) -> DbResult<Self> {
        let name = db_name(path);
        let disk = DiskManager::open(path)?;
        let pool = Arc::new(BufferPool::new(pool_pages, disk));
        let catalog = CatalogManager::open(Arc::clone(&pool))?;
        Ok(Self {
            name,
            pool,
            catalog,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn catalog(&self) -> &CatalogManager {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut CatalogManager {
        &mut self.catalog
    }

    /// Writes every dirty page (catalog meta included) back to the file.
    pub fn flush(&self) -> DbResult<()> {
        self.catalog.flush_meta()?;
        self.pool.flush_all()
    }
}

fn db_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use btree::Index as _;
    use record::{Column, Row, Schema};
    use tempfile::tempdir;
    use types::{SqlType, Value};

    #[test]
    fn create_then_reopen_keeps_catalog_and_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("school.db");

        {
            let mut db = Database::create(&path, 32).unwrap();
            db.catalog_mut()
                .create_table(
                    "student",
                    Schema::new(vec![
                        Column::new("sno", SqlType::Int, 0).not_null().unique(),
                        Column::new("sname", SqlType::Char(16), 1),
                    ]),
                )
                .unwrap();
            db.catalog_mut()
                .create_index("student", "student_pk", &["sno".into()])
                .unwrap();
            let table = db.catalog().get_table("student").unwrap();
            let mut row = Row::new(vec![Value::Int(1), Value::Char("zoe".into())]);
            table.heap.insert(&mut row).unwrap();
            db.flush().unwrap();
        }

        let db = Database::open(&path, 32).unwrap();
        assert_eq!(db.name(), "school");
        let table = db.catalog().get_table("student").unwrap();
        assert_eq!(table.heap.iter().count(), 1);
        let index = db.catalog().get_index("student", "student_pk").unwrap();
        let hits = index
            .index
            .scan_key(&Row::new(vec![Value::Int(1)]))
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn create_refuses_a_dirty_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("used.db");
        {
            Database::create(&path, 16).unwrap();
        }
        // Re-running create on an already-initialized file finds the
        // reserved pages taken.
        assert!(Database::create(&path, 16).is_err());
    }
}
