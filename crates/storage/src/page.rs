//! Slotted page layout for variable-length tuples.
//!
//! ```text
//! [ header | slot directory -> ... <- tuple bytes ]
//! ```
//!
//! The directory grows from the header toward the end of the page; tuple
//! bytes grow from the end toward the directory. A logically deleted slot
//! keeps its entry with the tombstone bit set so row ids stay stable until
//! `apply_delete` compacts it away.

use std::mem::size_of;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_into_slice};

use common::{DbError, DbResult, PAGE_SIZE, PageId};

fn bincode_config() -> impl Config {
    config::legacy()
}

pub(crate) const HEADER_BYTES: usize = size_of::<PageHeader>();
pub(crate) const SLOT_BYTES: usize = size_of::<Slot>();

/// Tombstone marker in a slot's size field.
const DELETE_MASK: u32 = 1 << 31;

/// Largest tuple a fresh page can accept.
pub const MAX_TUPLE_BYTES: usize = PAGE_SIZE - HEADER_BYTES - SLOT_BYTES;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct PageHeader {
    pub prev_page_id: i32,
    pub next_page_id: i32,
    pub free_space_pointer: u32,
    pub tuple_count: u32,
}

impl Default for PageHeader {
    fn default() -> Self {
        Self {
            prev_page_id: PageId::INVALID.0,
            next_page_id: PageId::INVALID.0,
            free_space_pointer: PAGE_SIZE as u32,
            tuple_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub(crate) struct Slot {
    pub offset: u32,
    pub size: u32,
}

impl Slot {
    fn is_cleared(&self) -> bool {
        self.size == 0 && self.offset == 0
    }

    fn is_tombstoned(&self) -> bool {
        self.size & DELETE_MASK != 0
    }

    fn payload_len(&self) -> u32 {
        self.size & !DELETE_MASK
    }

    fn is_live(&self) -> bool {
        !self.is_cleared() && !self.is_tombstoned()
    }
}

/// Outcome of an in-place tuple update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Completed,
    /// The new tuple does not fit the existing slot; the caller retries as
    /// delete-then-insert.
    TooMuchData,
}

fn read_header(data: &[u8]) -> DbResult<PageHeader> {
    let (header, read) = decode_from_slice(&data[..HEADER_BYTES], bincode_config())
        .map_err(|e| DbError::Storage(format!("read page header failed: {e}")))?;
    debug_assert_eq!(read, HEADER_BYTES);
    Ok(header)
}

fn write_header(data: &mut [u8], header: &PageHeader) -> DbResult<()> {
    let written = encode_into_slice(header, &mut data[..HEADER_BYTES], bincode_config())
        .map_err(|e| DbError::Storage(format!("write page header failed: {e}")))?;
    debug_assert_eq!(written, HEADER_BYTES);
    Ok(())
}

fn slot_range(idx: u32) -> (usize, usize) {
    let start = HEADER_BYTES + idx as usize * SLOT_BYTES;
    (start, start + SLOT_BYTES)
}

fn read_slot(data: &[u8], idx: u32) -> DbResult<Slot> {
    let (start, end) = slot_range(idx);
    if end > PAGE_SIZE {
        return Err(DbError::Storage(format!("slot {idx} out of bounds")));
    }
    let (slot, read) = decode_from_slice(&data[start..end], bincode_config())
        .map_err(|e| DbError::Storage(format!("read slot failed: {e}")))?;
    debug_assert_eq!(read, SLOT_BYTES);
    Ok(slot)
}

fn write_slot(data: &mut [u8], idx: u32, slot: &Slot) -> DbResult<()> {
    let (start, end) = slot_range(idx);
    if end > PAGE_SIZE {
        return Err(DbError::Storage(format!("slot {idx} out of bounds")));
    }
    let written = encode_into_slice(slot, &mut data[start..end], bincode_config())
        .map_err(|e| DbError::Storage(format!("write slot failed: {e}")))?;
    debug_assert_eq!(written, SLOT_BYTES);
    Ok(())
}

fn live_tuple(data: &[u8], idx: u32) -> DbResult<(u32, u32)> {
    let header = read_header(data)?;
    if idx >= header.tuple_count {
        return Err(DbError::NotFound(format!("slot {idx} not present")));
    }
    let slot = read_slot(data, idx)?;
    if !slot.is_live() {
        return Err(DbError::NotFound(format!("slot {idx} holds no tuple")));
    }
    Ok((slot.offset, slot.payload_len()))
}

fn scan_live_slots(data: &[u8], from: u32) -> DbResult<Option<u32>> {
    let header = read_header(data)?;
    for idx in from..header.tuple_count {
        if read_slot(data, idx)?.is_live() {
            return Ok(Some(idx));
        }
    }
    Ok(None)
}

/// Read-only view over the bytes of one table page.
pub struct TablePageRef<'a> {
    data: &'a [u8],
}

impl<'a> TablePageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn prev_page_id(&self) -> DbResult<PageId> {
        Ok(PageId(read_header(self.data)?.prev_page_id))
    }

    pub fn next_page_id(&self) -> DbResult<PageId> {
        Ok(PageId(read_header(self.data)?.next_page_id))
    }

    /// Length of the slot directory, tombstoned and cleared entries
    /// included.
    pub fn slot_count(&self) -> DbResult<u32> {
        Ok(read_header(self.data)?.tuple_count)
    }

    pub fn tuple(&self, slot: u32) -> DbResult<Vec<u8>> {
        let (offset, len) = live_tuple(self.data, slot)?;
        Ok(self.data[offset as usize..(offset + len) as usize].to_vec())
    }

    /// Whether an insert of `len` payload bytes would be accepted.
    pub fn can_hold(&self, len: usize) -> DbResult<bool> {
        let header = read_header(self.data)?;
        let mut has_cleared = false;
        for idx in 0..header.tuple_count {
            if read_slot(self.data, idx)?.is_cleared() {
                has_cleared = true;
                break;
            }
        }
        let directory_end = HEADER_BYTES as u32 + header.tuple_count * SLOT_BYTES as u32;
        let mut needed = len as u32;
        if !has_cleared {
            needed += SLOT_BYTES as u32;
        }
        Ok(header.free_space_pointer - directory_end >= needed)
    }

    pub fn first_tuple_slot(&self) -> DbResult<Option<u32>> {
        scan_live_slots(self.data, 0)
    }

    pub fn next_tuple_slot(&self, slot: u32) -> DbResult<Option<u32>> {
        scan_live_slots(self.data, slot + 1)
    }
}

/// Mutable view over the bytes of one table page.
pub struct TablePageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> TablePageMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn as_ref(&self) -> TablePageRef<'_> {
        TablePageRef::new(self.data)
    }

    pub fn init(&mut self, prev: PageId, next: PageId) -> DbResult<()> {
        self.data.fill(0);
        write_header(
            self.data,
            &PageHeader {
                prev_page_id: prev.0,
                next_page_id: next.0,
                ..PageHeader::default()
            },
        )
    }

    pub fn set_prev_page_id(&mut self, prev: PageId) -> DbResult<()> {
        let mut header = read_header(self.data)?;
        header.prev_page_id = prev.0;
        write_header(self.data, &header)
    }

    pub fn set_next_page_id(&mut self, next: PageId) -> DbResult<()> {
        let mut header = read_header(self.data)?;
        header.next_page_id = next.0;
        write_header(self.data, &header)
    }

    /// Places a tuple, reusing a cleared slot when one exists. Returns the
    /// slot number, or `None` when the free space cannot hold the payload
    /// (plus a directory entry if a new one is needed).
    pub fn insert_tuple(&mut self, bytes: &[u8]) -> DbResult<Option<u32>> {
        if bytes.is_empty() || bytes.len() > MAX_TUPLE_BYTES {
            return Err(DbError::Storage(format!(
                "tuple of {} bytes cannot be stored in a page",
                bytes.len()
            )));
        }
        let mut header = read_header(self.data)?;

        let mut reuse = None;
        for idx in 0..header.tuple_count {
            if read_slot(self.data, idx)?.is_cleared() {
                reuse = Some(idx);
                break;
            }
        }

        let directory_end =
            HEADER_BYTES as u32 + header.tuple_count * SLOT_BYTES as u32;
        let mut needed = bytes.len() as u32;
        if reuse.is_none() {
            needed += SLOT_BYTES as u32;
        }
        if header.free_space_pointer - directory_end < needed {
            return Ok(None);
        }

        let offset = header.free_space_pointer - bytes.len() as u32;
        self.data[offset as usize..header.free_space_pointer as usize].copy_from_slice(bytes);
        header.free_space_pointer = offset;

        let slot_idx = match reuse {
            Some(idx) => idx,
            None => {
                let idx = header.tuple_count;
                header.tuple_count += 1;
                idx
            }
        };
        write_slot(
            self.data,
            slot_idx,
            &Slot {
                offset,
                size: bytes.len() as u32,
            },
        )?;
        write_header(self.data, &header)?;
        Ok(Some(slot_idx))
    }

    /// Sets the tombstone bit; the slot (and the row id) survives until
    /// `apply_delete`. Marking an already-tombstoned tuple is a no-op.
    pub fn mark_delete(&mut self, slot: u32) -> DbResult<()> {
        let header = read_header(self.data)?;
        if slot >= header.tuple_count {
            return Err(DbError::NotFound(format!("slot {slot} not present")));
        }
        let mut entry = read_slot(self.data, slot)?;
        if entry.is_cleared() {
            return Err(DbError::NotFound(format!("slot {slot} holds no tuple")));
        }
        entry.size |= DELETE_MASK;
        write_slot(self.data, slot, &entry)
    }

    pub fn rollback_delete(&mut self, slot: u32) -> DbResult<()> {
        let header = read_header(self.data)?;
        if slot >= header.tuple_count {
            return Err(DbError::NotFound(format!("slot {slot} not present")));
        }
        let mut entry = read_slot(self.data, slot)?;
        if entry.is_cleared() {
            return Err(DbError::NotFound(format!("slot {slot} holds no tuple")));
        }
        entry.size &= !DELETE_MASK;
        write_slot(self.data, slot, &entry)
    }

    /// Physically removes the tuple: compacts the tuple area and clears the
    /// slot entry. The slot number becomes reusable.
    pub fn apply_delete(&mut self, slot: u32) -> DbResult<()> {
        let mut header = read_header(self.data)?;
        if slot >= header.tuple_count {
            return Err(DbError::NotFound(format!("slot {slot} not present")));
        }
        let entry = read_slot(self.data, slot)?;
        if entry.is_cleared() {
            return Err(DbError::NotFound(format!("slot {slot} holds no tuple")));
        }
        let len = entry.payload_len();
        let offset = entry.offset;

        // Slide every tuple below this one up by `len` bytes.
        let fsp = header.free_space_pointer;
        self.data
            .copy_within(fsp as usize..offset as usize, (fsp + len) as usize);
        header.free_space_pointer = fsp + len;

        for idx in 0..header.tuple_count {
            if idx == slot {
                continue;
            }
            let mut other = read_slot(self.data, idx)?;
            if !other.is_cleared() && other.offset < offset {
                other.offset += len;
                write_slot(self.data, idx, &other)?;
            }
        }

        write_slot(self.data, slot, &Slot { offset: 0, size: 0 })?;
        write_header(self.data, &header)
    }

    /// Overwrites the tuple in place when the new payload fits its current
    /// slot; otherwise reports `TooMuchData` and leaves the page untouched.
    pub fn update_tuple(&mut self, slot: u32, bytes: &[u8]) -> DbResult<UpdateStatus> {
        let header = read_header(self.data)?;
        if slot >= header.tuple_count {
            return Err(DbError::NotFound(format!("slot {slot} not present")));
        }
        let entry = read_slot(self.data, slot)?;
        if entry.is_cleared() || entry.is_tombstoned() {
            return Err(DbError::NotFound(format!("slot {slot} holds no tuple")));
        }
        if bytes.len() as u32 > entry.payload_len() {
            return Ok(UpdateStatus::TooMuchData);
        }
        let start = entry.offset as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        write_slot(
            self.data,
            slot,
            &Slot {
                offset: entry.offset,
                size: bytes.len() as u32,
            },
        )?;
        Ok(UpdateStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_page() -> Vec<u8> {
        let mut data = vec![0u8; PAGE_SIZE];
        TablePageMut::new(&mut data)
            .init(PageId::INVALID, PageId::INVALID)
            .unwrap();
        data
    }

    #[test]
    fn insert_and_read_back() {
        let mut data = fresh_page();
        let mut page = TablePageMut::new(&mut data);
        let a = page.insert_tuple(b"hello").unwrap().unwrap();
        let b = page.insert_tuple(b"world!").unwrap().unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);

        let view = TablePageRef::new(&data);
        assert_eq!(view.tuple(0).unwrap(), b"hello");
        assert_eq!(view.tuple(1).unwrap(), b"world!");
    }

    #[test]
    fn rejects_when_free_space_runs_out() {
        let mut data = fresh_page();
        let mut page = TablePageMut::new(&mut data);
        let big = vec![0xAAu8; 2000];
        assert!(page.insert_tuple(&big).unwrap().is_some());
        assert!(page.insert_tuple(&big).unwrap().is_some());
        // A third 2000-byte tuple cannot fit next to two slots + header.
        assert!(page.insert_tuple(&big).unwrap().is_none());
    }

    #[test]
    fn mark_delete_keeps_the_slot_until_apply() {
        let mut data = fresh_page();
        let mut page = TablePageMut::new(&mut data);
        page.insert_tuple(b"aaaa").unwrap().unwrap();
        page.insert_tuple(b"bbbb").unwrap().unwrap();

        page.mark_delete(0).unwrap();
        // Idempotent: a second mark is fine.
        page.mark_delete(0).unwrap();
        assert!(page.as_ref().tuple(0).is_err());
        assert_eq!(page.as_ref().first_tuple_slot().unwrap(), Some(1));

        page.rollback_delete(0).unwrap();
        assert_eq!(page.as_ref().tuple(0).unwrap(), b"aaaa");

        page.mark_delete(0).unwrap();
        page.apply_delete(0).unwrap();
        assert!(page.as_ref().tuple(0).is_err());
        // The surviving tuple is still intact after compaction.
        assert_eq!(page.as_ref().tuple(1).unwrap(), b"bbbb");
    }

    #[test]
    fn apply_delete_compacts_and_frees_space() {
        let mut data = fresh_page();
        let mut page = TablePageMut::new(&mut data);
        page.insert_tuple(b"first").unwrap().unwrap();
        page.insert_tuple(b"second").unwrap().unwrap();
        page.insert_tuple(b"third").unwrap().unwrap();

        page.apply_delete(1).unwrap();
        assert_eq!(page.as_ref().tuple(0).unwrap(), b"first");
        assert_eq!(page.as_ref().tuple(2).unwrap(), b"third");

        // The cleared slot is reused by the next insert.
        let slot = page.insert_tuple(b"fourth").unwrap().unwrap();
        assert_eq!(slot, 1);
        assert_eq!(page.as_ref().tuple(1).unwrap(), b"fourth");
    }

    #[test]
    fn update_in_place_and_overflow() {
        let mut data = fresh_page();
        let mut page = TablePageMut::new(&mut data);
        page.insert_tuple(b"0123456789").unwrap().unwrap();

        assert_eq!(
            page.update_tuple(0, b"abcdef").unwrap(),
            UpdateStatus::Completed
        );
        assert_eq!(page.as_ref().tuple(0).unwrap(), b"abcdef");

        assert_eq!(
            page.update_tuple(0, b"this one is far too long").unwrap(),
            UpdateStatus::TooMuchData
        );
        assert_eq!(page.as_ref().tuple(0).unwrap(), b"abcdef");
    }

    #[test]
    fn slot_iteration_skips_dead_entries() {
        let mut data = fresh_page();
        let mut page = TablePageMut::new(&mut data);
        for payload in [&b"a"[..], b"b", b"c", b"d"] {
            page.insert_tuple(payload).unwrap().unwrap();
        }
        page.mark_delete(0).unwrap();
        page.apply_delete(2).unwrap();

        let view = TablePageRef::new(&data);
        assert_eq!(view.first_tuple_slot().unwrap(), Some(1));
        assert_eq!(view.next_tuple_slot(1).unwrap(), Some(3));
        assert_eq!(view.next_tuple_slot(3).unwrap(), None);
    }
}
