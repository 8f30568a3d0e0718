//! Buffer pool: a fixed-capacity cache of pages keyed by logical page id,
//! with pin counts, dirty tracking, and an LRU victim policy.
//!
//! Every page access goes through `fetch`/`new_page`, which pin the frame
//! and hand back a [`PageGuard`]; dropping the guard unpins with the dirty
//! flag accumulated through `data_mut`. Dirty bytes reach disk only at
//! eviction, explicit flush, or shutdown.

mod replacer;


use std::cell::Cell;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::RandomState;
use hashbrown::HashMap;
use log::debug;

use common::{DbError, DbResult, FrameId, PAGE_SIZE, PageId};
use disk::DiskManager;
use replacer::LruReplacer;

/// Raw bytes of one resident page.
pub type PageBuf = [u8; PAGE_SIZE];

struct Frame {
    data: RwLock<PageBuf>,
}

#[derive(Clone, Copy)]
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    dirty: bool,
}

impl FrameMeta {
    const EMPTY: FrameMeta = FrameMeta {
        page_id: PageId::INVALID,
        pin_count: 0,
        dirty: false,
    };
}

struct PoolState {
    metas: Vec<FrameMeta>,
    page_table: HashMap<PageId, FrameId, RandomState>,
    free_list: Vec<FrameId>,
    replacer: LruReplacer,
}

/// Fixed array of frames fronting one disk manager. Guarantees at most one
/// resident frame per logical page id.
pub struct BufferPool {
    frames: Vec<Frame>,
    state: Mutex<PoolState>,
    disk: Mutex<DiskManager>,
}

impl BufferPool {
    pub fn new(pool_size: usize, disk: DiskManager) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");
        Self {
            frames: (0..pool_size)
                .map(|_| Frame {
                    data: RwLock::new([0u8; PAGE_SIZE]),
                })
                .collect(),
            state: Mutex::new(PoolState {
                metas: vec![FrameMeta::EMPTY; pool_size],
                page_table: HashMap::default(),
                free_list: (0..pool_size).rev().collect(),
                replacer: LruReplacer::new(pool_size),
            }),
            disk: Mutex::new(disk),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Pins the page, reading it from disk if it is not resident.
    pub fn fetch(self: &Arc<Self>, pid: PageId) -> DbResult<PageGuard> {
        if !pid.is_valid() {
            return Err(DbError::Storage(format!("fetch of invalid page id {}", pid.0)));
        }
        let mut state = self.state.lock().unwrap();

        if let Some(&frame) = state.page_table.get(&pid) {
            state.metas[frame].pin_count += 1;
            state.replacer.pin(frame);
            return Ok(self.guard(pid, frame));
        }

        let frame = self.acquire_frame(&mut state)?;
        {
            let mut data = self.frames[frame].data.write().unwrap();
            if let Err(e) = self.disk.lock().unwrap().read_page(pid, &mut data) {
                state.free_list.push(frame);
                return Err(e);
            }
        }
        state.metas[frame] = FrameMeta {
            page_id: pid,
            pin_count: 1,
            dirty: false,
        };
        state.page_table.insert(pid, frame);
        Ok(self.guard(pid, frame))
    }

    /// Allocates a fresh page on disk and pins a zeroed frame for it.
    pub fn new_page(self: &Arc<Self>) -> DbResult<(PageId, PageGuard)> {
        let mut state = self.state.lock().unwrap();
        let frame = self.acquire_frame(&mut state)?;
        let pid = match self.disk.lock().unwrap().allocate_page() {
            Ok(pid) => pid,
            Err(e) => {
                state.free_list.push(frame);
                return Err(e);
            }
        };

        self.frames[frame].data.write().unwrap().fill(0);
        state.metas[frame] = FrameMeta {
            page_id: pid,
            pin_count: 1,
            dirty: false,
        };
        state.page_table.insert(pid, frame);
        Ok((pid, self.guard(pid, frame)))
    }

    /// Drops one pin; ORs `dirty` into the frame's dirty bit. Returns false
    /// for a page that is not resident. Unpinning a page whose pin count is
    /// already zero leaves it at zero.
    pub fn unpin(&self, pid: PageId, dirty: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(&frame) = state.page_table.get(&pid) else {
            return false;
        };
        let meta = &mut state.metas[frame];
        meta.dirty |= dirty;
        if meta.pin_count > 0 {
            meta.pin_count -= 1;
        }
        if meta.pin_count == 0 {
            state.replacer.unpin(frame);
        }
        true
    }

    /// Writes one resident page back to disk and clears its dirty bit.
    pub fn flush(&self, pid: PageId) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(&frame) = state.page_table.get(&pid) else {
            return false;
        };
        let data = self.frames[frame].data.read().unwrap();
        if self.disk.lock().unwrap().write_page(pid, &data).is_err() {
            return false;
        }
        state.metas[frame].dirty = false;
        true
    }

    /// Writes every resident page back to disk.
    pub fn flush_all(&self) -> DbResult<()> {
        let mut state = self.state.lock().unwrap();
        let entries: Vec<(PageId, FrameId)> =
            state.page_table.iter().map(|(&p, &f)| (p, f)).collect();
        let mut disk = self.disk.lock().unwrap();
        for (pid, frame) in entries {
            let data = self.frames[frame].data.read().unwrap();
            disk.write_page(pid, &data)?;
            state.metas[frame].dirty = false;
        }
        disk.sync()?;
        Ok(())
    }

    /// Evicts the page from the pool and deallocates it on disk. Returns
    /// false while the page is pinned.
    pub fn delete(&self, pid: PageId) -> DbResult<bool> {
        let mut state = self.state.lock().unwrap();
        if let Some(&frame) = state.page_table.get(&pid) {
            if state.metas[frame].pin_count > 0 {
                return Ok(false);
            }
            state.page_table.remove(&pid);
            state.replacer.pin(frame);
            state.metas[frame] = FrameMeta::EMPTY;
            self.frames[frame].data.write().unwrap().fill(0);
            state.free_list.push(frame);
        }
        self.disk.lock().unwrap().deallocate_page(pid)?;
        Ok(true)
    }

    /// Test hook: whether every frame has pin count zero.
    pub fn all_unpinned(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.metas.iter().all(|meta| meta.pin_count == 0)
    }

    /// Free list first, then the LRU victim (written back when dirty).
    fn acquire_frame(&self, state: &mut PoolState) -> DbResult<FrameId> {
        if let Some(frame) = state.free_list.pop() {
            return Ok(frame);
        }
        let Some(frame) = state.replacer.victim() else {
            return Err(DbError::OutOfMemory(
                "no free frame and every resident page is pinned".into(),
            ));
        };
        let meta = state.metas[frame];
        debug_assert_eq!(meta.pin_count, 0);
        if meta.dirty {
            debug!("evicting dirty page {:?} from frame {frame}", meta.page_id);
            let data = self.frames[frame].data.read().unwrap();
            self.disk.lock().unwrap().write_page(meta.page_id, &data)?;
        }
        state.page_table.remove(&meta.page_id);
        state.metas[frame] = FrameMeta::EMPTY;
        Ok(frame)
    }

    fn guard(self: &Arc<Self>, page_id: PageId, frame: FrameId) -> PageGuard {
        PageGuard {
            pool: Arc::clone(self),
            frame,
            page_id,
            dirty: Cell::new(false),
        }
    }
}

/// RAII pin on one resident page.
///
/// `data` takes the page's read latch, `data_mut` its write latch (and
/// marks the guard dirty); on drop the page is unpinned with the
/// accumulated dirty flag. Guards may be held across further fetches, which
/// is how tree descent crabs from parent to child.
pub struct PageGuard {
    pool: Arc<BufferPool>,
    frame: FrameId,
    page_id: PageId,
    dirty: Cell<bool>,
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("frame", &self.frame)
            .field("page_id", &self.page_id)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl PageGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> RwLockReadGuard<'_, PageBuf> {
        self.pool.frames[self.frame].data.read().unwrap()
    }

    pub fn data_mut(&self) -> RwLockWriteGuard<'_, PageBuf> {
        self.dirty.set(true);
        self.pool.frames[self.frame].data.write().unwrap()
    }

    /// Records dirtiness without taking the write latch.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.pool.unpin(self.page_id, self.dirty.get());
    }
}
