//! Index roots page: the reserved page mapping each index id to the
//! current root of its B+-tree.
//!
//! Layout: `count u32`, then `(index_id u32, root_page_id i32)` entries.

use bytes::{Buf, BufMut};
use common::{DbError, DbResult, IndexId, PAGE_SIZE, PageId};

const ENTRY_BYTES: usize = 8;
const MAX_ENTRIES: usize = (PAGE_SIZE - 4) / ENTRY_BYTES;

/// Read-side lookup used while loading a tree.
pub fn lookup_root(data: &[u8], index: IndexId) -> Option<PageId> {
    let mut cursor = &data[..];
    let count = cursor.get_u32_le() as usize;
    for _ in 0..count.min(MAX_ENTRIES) {
        let id = cursor.get_u32_le();
        let root = cursor.get_i32_le();
        if id == index.0 {
            return Some(PageId(root));
        }
    }
    None
}

/// Mutable view over the roots page.
pub struct IndexRootsMut<'a> {
    data: &'a mut [u8],
}

impl<'a> IndexRootsMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    fn count(&self) -> usize {
        (&self.data[0..4]).get_u32_le() as usize
    }

    fn set_count(&mut self, count: usize) {
        (&mut self.data[0..4]).put_u32_le(count as u32);
    }

    fn entry(&self, idx: usize) -> (u32, i32) {
        let mut cursor = &self.data[4 + idx * ENTRY_BYTES..];
        (cursor.get_u32_le(), cursor.get_i32_le())
    }

    fn set_entry(&mut self, idx: usize, id: u32, root: i32) {
        let mut cursor = &mut self.data[4 + idx * ENTRY_BYTES..];
        cursor.put_u32_le(id);
        cursor.put_i32_le(root);
    }

    fn position(&self, index: IndexId) -> Option<usize> {
        (0..self.count()).find(|&i| self.entry(i).0 == index.0)
    }

    /// Registers a new index; fails if the id is already present.
    pub fn insert(&mut self, index: IndexId, root: PageId) -> DbResult<()> {
        if self.position(index).is_some() {
            return Err(DbError::AlreadyExists(format!(
                "index {} already has a root entry",
                index.0
            )));
        }
        let count = self.count();
        if count >= MAX_ENTRIES {
            return Err(DbError::Storage("index roots page is full".into()));
        }
        self.set_entry(count, index.0, root.0);
        self.set_count(count + 1);
        Ok(())
    }

    /// Removes an index's entry; fails if the id is absent.
    pub fn delete(&mut self, index: IndexId) -> DbResult<()> {
        let Some(pos) = self.position(index) else {
            return Err(DbError::NotFound(format!(
                "index {} has no root entry",
                index.0
            )));
        };
        let count = self.count();
        for i in pos..count - 1 {
            let (id, root) = self.entry(i + 1);
            self.set_entry(i, id, root);
        }
        self.set_count(count - 1);
        Ok(())
    }

    /// Repoints an index's root; fails if the id is absent.
    pub fn update(&mut self, index: IndexId, root: PageId) -> DbResult<()> {
        let Some(pos) = self.position(index) else {
            return Err(DbError::NotFound(format!(
                "index {} has no root entry",
                index.0
            )));
        };
        let id = self.entry(pos).0;
        self.set_entry(pos, id, root.0);
        Ok(())
    }

    pub fn get_root(&self, index: IndexId) -> Option<PageId> {
        self.position(index).map(|pos| PageId(self.entry(pos).1))
    }

    /// Compacts away entries whose root is the invalid page id.
    pub fn clear_invalid(&mut self) {
        let count = self.count();
        let mut keep = 0;
        for i in 0..count {
            let (id, root) = self.entry(i);
            if PageId(root).is_valid() {
                self.set_entry(keep, id, root);
                keep += 1;
            }
        }
        self.set_count(keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    #[test]
    fn insert_update_lookup_delete() {
        let mut data = page();
        let mut roots = IndexRootsMut::new(&mut data);
        roots.insert(IndexId(1), PageId(10)).unwrap();
        roots.insert(IndexId(2), PageId(20)).unwrap();
        assert!(roots.insert(IndexId(1), PageId(99)).is_err());

        assert_eq!(roots.get_root(IndexId(1)), Some(PageId(10)));
        roots.update(IndexId(1), PageId(11)).unwrap();
        assert_eq!(roots.get_root(IndexId(1)), Some(PageId(11)));
        assert!(roots.update(IndexId(3), PageId(1)).is_err());

        roots.delete(IndexId(1)).unwrap();
        assert!(roots.delete(IndexId(1)).is_err());
        assert_eq!(roots.get_root(IndexId(1)), None);
        assert_eq!(roots.get_root(IndexId(2)), Some(PageId(20)));

        assert_eq!(lookup_root(&data, IndexId(2)), Some(PageId(20)));
        assert_eq!(lookup_root(&data, IndexId(1)), None);
    }

    #[test]
    fn clear_invalid_compacts_live_entries() {
        let mut data = page();
        let mut roots = IndexRootsMut::new(&mut data);
        roots.insert(IndexId(1), PageId(10)).unwrap();
        roots.insert(IndexId(2), PageId::INVALID).unwrap();
        roots.insert(IndexId(3), PageId(30)).unwrap();

        roots.clear_invalid();
        assert_eq!(roots.get_root(IndexId(1)), Some(PageId(10)));
        assert_eq!(roots.get_root(IndexId(2)), None);
        assert_eq!(roots.get_root(IndexId(3)), Some(PageId(30)));
    }
}
