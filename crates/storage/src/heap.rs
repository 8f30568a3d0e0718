//! Table heap: a singly linked list of slotted pages holding one table's
//! tuples.

use std::sync::Arc;

use log::trace;

use buffer::BufferPool;
use common::{DbError, DbResult, PageId, RecordId};
use record::{Row, Schema};

use crate::page::{TablePageMut, TablePageRef, UpdateStatus};

/// Page-linked tuple collection with stable row ids.
pub struct TableHeap {
    pool: Arc<BufferPool>,
    first_page_id: PageId,
    schema: Arc<Schema>,
}

impl TableHeap {
    /// Allocates the first page of a new heap.
    pub fn create(pool: Arc<BufferPool>, schema: Arc<Schema>) -> DbResult<Self> {
        let (first_page_id, page) = pool.new_page()?;
        TablePageMut::new(&mut page.data_mut()[..])
            .init(PageId::INVALID, PageId::INVALID)?;
        drop(page);
        Ok(Self {
            pool,
            first_page_id,
            schema,
        })
    }

    /// Attaches to an existing heap rooted at `first_page_id`.
    pub fn open(pool: Arc<BufferPool>, first_page_id: PageId, schema: Arc<Schema>) -> Self {
        Self {
            pool,
            first_page_id,
            schema,
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Inserts the row, assigning its row id. Walks the page chain from the
    /// head retrying each page; when none accepts, a fresh page is stitched
    /// onto the tail.
    pub fn insert(&self, row: &mut Row) -> DbResult<RecordId> {
        let bytes = row.encode(&self.schema)?;

        let mut pid = self.first_page_id;
        let tail = loop {
            let page = self.pool.fetch(pid)?;
            let (fits, next) = {
                let data = page.data();
                let view = TablePageRef::new(&data[..]);
                (view.can_hold(bytes.len())?, view.next_page_id()?)
            };
            if fits {
                let slot = TablePageMut::new(&mut page.data_mut()[..])
                    .insert_tuple(&bytes)?
                    .ok_or_else(|| DbError::Storage("page refused a sized insert".into()))?;
                let rid = RecordId::new(pid, slot);
                self.stamp_rid(&page, row, rid)?;
                return Ok(rid);
            }
            if !next.is_valid() {
                break pid;
            }
            pid = next;
        };

        // Every existing page refused the tuple: append a new one.
        let (new_pid, new_page) = self.pool.new_page()?;
        trace!("table heap {:?} grows page {:?}", self.first_page_id, new_pid);
        let slot = {
            let mut data = new_page.data_mut();
            let mut view = TablePageMut::new(&mut data[..]);
            view.init(tail, PageId::INVALID)?;
            view.insert_tuple(&bytes)?.ok_or_else(|| {
                DbError::Storage("tuple does not fit an empty page".into())
            })?
        };
        let rid = RecordId::new(new_pid, slot);
        self.stamp_rid(&new_page, row, rid)?;
        drop(new_page);

        let prev = self.pool.fetch(tail)?;
        TablePageMut::new(&mut prev.data_mut()[..]).set_next_page_id(new_pid)?;
        Ok(rid)
    }

    /// Reads the tuple at `rid` back as a row.
    pub fn get(&self, rid: RecordId) -> DbResult<Row> {
        let page = self.pool.fetch(rid.page_id)?;
        let bytes = TablePageRef::new(&page.data()[..]).tuple(rid.slot)?;
        let mut row = Row::decode(&bytes, &self.schema)?;
        row.set_rid(rid);
        Ok(row)
    }

    /// In-place update when the new encoding fits the slot; otherwise the
    /// old tuple is removed and the row re-inserted from the head, so the
    /// returned row id may differ from `rid`.
    pub fn update(&self, row: &mut Row, rid: RecordId) -> DbResult<RecordId> {
        row.set_rid(rid);
        let bytes = row.encode(&self.schema)?;

        let status = {
            let page = self.pool.fetch(rid.page_id)?;
            TablePageMut::new(&mut page.data_mut()[..]).update_tuple(rid.slot, &bytes)?
        };
        match status {
            UpdateStatus::Completed => Ok(rid),
            UpdateStatus::TooMuchData => {
                self.apply_delete(rid)?;
                self.insert(row)
            }
        }
    }

    /// First phase of deletion: reversible tombstone.
    pub fn mark_delete(&self, rid: RecordId) -> DbResult<()> {
        let page = self.pool.fetch(rid.page_id)?;
        TablePageMut::new(&mut page.data_mut()[..]).mark_delete(rid.slot)
    }

    pub fn rollback_delete(&self, rid: RecordId) -> DbResult<()> {
        let page = self.pool.fetch(rid.page_id)?;
        TablePageMut::new(&mut page.data_mut()[..]).rollback_delete(rid.slot)
    }

    /// Second phase of deletion: compacts the page and invalidates `rid`.
    pub fn apply_delete(&self, rid: RecordId) -> DbResult<()> {
        let page = self.pool.fetch(rid.page_id)?;
        TablePageMut::new(&mut page.data_mut()[..]).apply_delete(rid.slot)
    }

    /// Iterator over live rows in page order, then slot order. Holds no
    /// page latch between steps; pages with no live tuples are skipped.
    pub fn iter(&self) -> TableIter {
        TableIter {
            pool: Arc::clone(&self.pool),
            schema: Arc::clone(&self.schema),
            current_page: self.first_page_id,
            last_slot: None,
        }
    }

    /// Deallocates the whole page chain. The heap is unusable afterwards.
    pub fn free_pages(&self) -> DbResult<()> {
        let mut pid = self.first_page_id;
        while pid.is_valid() {
            let next = {
                let page = self.pool.fetch(pid)?;
                TablePageRef::new(&page.data()[..]).next_page_id()?
            };
            if !self.pool.delete(pid)? {
                return Err(DbError::Storage(format!(
                    "heap page {:?} still pinned during drop",
                    pid
                )));
            }
            pid = next;
        }
        Ok(())
    }

    /// Rewrites the stored tuple so that its embedded row id matches the
    /// slot it landed in.
    fn stamp_rid(&self, page: &buffer::PageGuard, row: &mut Row, rid: RecordId) -> DbResult<()> {
        row.set_rid(rid);
        let bytes = row.encode(&self.schema)?;
        let status =
            TablePageMut::new(&mut page.data_mut()[..]).update_tuple(rid.slot, &bytes)?;
        debug_assert_eq!(status, UpdateStatus::Completed);
        Ok(())
    }
}

/// Forward iterator over a table heap.
pub struct TableIter {
    pool: Arc<BufferPool>,
    schema: Arc<Schema>,
    current_page: PageId,
    last_slot: Option<u32>,
}

impl Iterator for TableIter {
    type Item = DbResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.current_page.is_valid() {
                return None;
            }
            let page = match self.pool.fetch(self.current_page) {
                Ok(page) => page,
                Err(e) => {
                    self.current_page = PageId::INVALID;
                    return Some(Err(e));
                }
            };
            let data = page.data();
            let view = TablePageRef::new(&data[..]);

            let probe = match self.last_slot {
                None => view.first_tuple_slot(),
                Some(slot) => view.next_tuple_slot(slot),
            };
            match probe {
                Ok(Some(slot)) => {
                    let rid = RecordId::new(self.current_page, slot);
                    let item = view.tuple(slot).and_then(|bytes| {
                        let mut row = Row::decode(&bytes, &self.schema)?;
                        row.set_rid(rid);
                        Ok(row)
                    });
                    self.last_slot = Some(slot);
                    return Some(item);
                }
                Ok(None) => {
                    // Page exhausted (or entirely dead): move to the next.
                    match view.next_page_id() {
                        Ok(next) => {
                            self.current_page = next;
                            self.last_slot = None;
                        }
                        Err(e) => {
                            self.current_page = PageId::INVALID;
                            return Some(Err(e));
                        }
                    }
                }
                Err(e) => {
                    self.current_page = PageId::INVALID;
                    return Some(Err(e));
                }
            }
        }
    }
}
