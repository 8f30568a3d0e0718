//! Disk space manager: maps the dense logical page-id space onto a single
//! file using interleaved bitmap allocation pages.
//!
//! Physical layout: page 0 is the meta page; each extent that follows is
//! one bitmap page plus `BITMAP_CAPACITY` data pages. Logical id `L` lives
//! in extent `L / BITMAP_CAPACITY` at offset `L % BITMAP_CAPACITY`.

mod bitmap;
mod meta;


use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use bitmap::Bitmap;
use common::{BITMAP_CAPACITY, DbError, DbResult, MAX_EXTENTS, PAGE_SIZE, PageId};
use meta::DiskFileMeta;

const META_PHYSICAL: u64 = 0;

/// Owns the backing file of one database and its allocation state.
#[derive(Debug)]
pub struct DiskManager {
    file: File,
    path: PathBuf,
    meta: DiskFileMeta,
}

impl DiskManager {
    /// Opens (or creates) the database file and loads the meta page.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut manager = Self {
            file,
            path,
            meta: DiskFileMeta::default(),
        };
        let mut buf = [0u8; PAGE_SIZE];
        manager.read_physical(META_PHYSICAL, &mut buf)?;
        manager.meta = DiskFileMeta::decode(&buf)?;
        Ok(manager)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_allocated_pages(&self) -> u32 {
        self.meta.allocated_pages
    }

    /// Reads the page at a logical id; unwritten tails read as zeroes.
    pub fn read_page(&mut self, pid: PageId, buf: &mut [u8; PAGE_SIZE]) -> DbResult<()> {
        let physical = self.physical_of(pid)?;
        self.read_physical(physical, buf)
    }

    /// Writes the page at a logical id.
    pub fn write_page(&mut self, pid: PageId, buf: &[u8; PAGE_SIZE]) -> DbResult<()> {
        let physical = self.physical_of(pid)?;
        self.write_physical(physical, buf)
    }

    /// Claims the first free logical id, growing the extent list when every
    /// existing extent is full.
    pub fn allocate_page(&mut self) -> DbResult<PageId> {
        let extent = match self.find_extent_with_space()? {
            Some(extent) => extent,
            None => {
                let count = self.meta.extent_used.len() as u32;
                if count >= MAX_EXTENTS {
                    return Err(DbError::Storage(format!(
                        "database file is full ({MAX_EXTENTS} extents in use)"
                    )));
                }
                self.meta.extent_used.push(0);
                debug!("opening extent {count} of {:?}", self.path);
                count
            }
        };

        let mut buf = [0u8; PAGE_SIZE];
        self.read_physical(Self::bitmap_physical(extent), &mut buf)?;
        let offset = Bitmap::new(&mut buf)
            .allocate()
            .ok_or_else(|| DbError::Storage(format!("extent {extent} bitmap out of sync")))?;
        self.write_physical(Self::bitmap_physical(extent), &buf)?;

        self.meta.extent_used[extent as usize] += 1;
        self.meta.allocated_pages += 1;
        self.write_meta()?;

        Ok(PageId((extent * BITMAP_CAPACITY + offset) as i32))
    }

    /// Clears the allocation bit and zeroes the page contents.
    pub fn deallocate_page(&mut self, pid: PageId) -> DbResult<()> {
        let (extent, offset) = Self::locate(pid)?;
        if extent as usize >= self.meta.extent_used.len() {
            warn!("deallocate of {pid:?} beyond the last extent");
            return Ok(());
        }

        let mut buf = [0u8; PAGE_SIZE];
        self.read_physical(Self::bitmap_physical(extent), &mut buf)?;
        if !Bitmap::new(&mut buf).deallocate(offset) {
            warn!("deallocate of already-free page {pid:?}");
            return Ok(());
        }
        self.write_physical(Self::bitmap_physical(extent), &buf)?;

        let zeroes = [0u8; PAGE_SIZE];
        self.write_physical(Self::data_physical(extent, offset), &zeroes)?;

        self.meta.extent_used[extent as usize] -= 1;
        self.meta.allocated_pages -= 1;
        self.write_meta()
    }

    /// Whether the given logical id is currently unallocated.
    pub fn is_page_free(&mut self, pid: PageId) -> DbResult<bool> {
        let (extent, offset) = Self::locate(pid)?;
        if extent as usize >= self.meta.extent_used.len() {
            return Ok(true);
        }
        let mut buf = [0u8; PAGE_SIZE];
        self.read_physical(Self::bitmap_physical(extent), &mut buf)?;
        Ok(Bitmap::new(&mut buf).is_free(offset))
    }

    /// Forces file contents to stable storage.
    pub fn sync(&mut self) -> DbResult<()> {
        self.write_meta()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn find_extent_with_space(&self) -> DbResult<Option<u32>> {
        Ok(self
            .meta
            .extent_used
            .iter()
            .position(|&used| used < BITMAP_CAPACITY)
            .map(|extent| extent as u32))
    }

    fn locate(pid: PageId) -> DbResult<(u32, u32)> {
        if !pid.is_valid() {
            return Err(DbError::Storage(format!("invalid page id {}", pid.0)));
        }
        let logical = pid.0 as u32;
        Ok((logical / BITMAP_CAPACITY, logical % BITMAP_CAPACITY))
    }

    fn physical_of(&self, pid: PageId) -> DbResult<u64> {
        let (extent, offset) = Self::locate(pid)?;
        Ok(Self::data_physical(extent, offset))
    }

    fn bitmap_physical(extent: u32) -> u64 {
        extent as u64 * (BITMAP_CAPACITY as u64 + 1) + 1
    }

    fn data_physical(extent: u32, offset: u32) -> u64 {
        extent as u64 * (BITMAP_CAPACITY as u64 + 1) + offset as u64 + 2
    }

    fn write_meta(&mut self) -> DbResult<()> {
        let mut buf = [0u8; PAGE_SIZE];
        self.meta.encode(&mut buf);
        self.write_physical(META_PHYSICAL, &buf)
    }

    fn read_physical(&mut self, physical: u64, buf: &mut [u8; PAGE_SIZE]) -> DbResult<()> {
        self.file.seek(SeekFrom::Start(physical * PAGE_SIZE as u64))?;
        let mut read = 0;
        while read < PAGE_SIZE {
            match self.file.read(&mut buf[read..])? {
                0 => break,
                n => read += n,
            }
        }
        // Reads past the end of the file yield zeroes.
        buf[read..].fill(0);
        Ok(())
    }

    fn write_physical(&mut self, physical: u64, buf: &[u8; PAGE_SIZE]) -> DbResult<()> {
        self.file.seek(SeekFrom::Start(physical * PAGE_SIZE as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }
}
