//! Leaf and internal node pages of the B+-tree.
//!
//! Every node begins with a fixed header; leaves additionally carry the id
//! of the next leaf in key order. Entries follow as a dense array. In an
//! internal node, entry 0's key is a dummy whose value is the leftmost
//! child; separator `key[i]` is the smallest key reachable under
//! `child[i]` for `i >= 1`.

use std::mem::size_of;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_into_slice};
use bytes::{Buf, BufMut};

use common::{DbError, DbResult, PAGE_SIZE, PageId, RecordId};

use crate::key::{CmpFn, GenericKey};

pub const PAGE_TYPE_LEAF: u32 = 1;
pub const PAGE_TYPE_INTERNAL: u32 = 2;

fn bincode_config() -> impl Config {
    config::legacy()
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct NodeHeader {
    page_type: u32,
    lsn: u32,
    size: u32,
    max_size: u32,
    parent_page_id: i32,
    page_id: i32,
}

const HEADER_BYTES: usize = size_of::<NodeHeader>();
const LEAF_HEADER_BYTES: usize = HEADER_BYTES + 4;

/// Entries a leaf of key width `N` can hold.
pub fn leaf_capacity(key_width: usize) -> u32 {
    ((PAGE_SIZE - LEAF_HEADER_BYTES) / (key_width + 8)) as u32
}

/// Entries an internal node of key width `N` can hold (dummy included).
pub fn internal_capacity(key_width: usize) -> u32 {
    ((PAGE_SIZE - HEADER_BYTES) / (key_width + 4)) as u32
}

/// Distinguishes leaf from internal pages before a typed view is built.
pub fn page_type(data: &[u8]) -> u32 {
    (&data[0..4]).get_u32_le()
}

/// Parent pointer of any node page, leaf or internal.
pub fn node_parent(data: &[u8]) -> DbResult<PageId> {
    Ok(PageId(read_header(data)?.parent_page_id))
}

/// Repoints the parent of any node page, leaf or internal.
pub fn set_node_parent(data: &mut [u8], parent: PageId) -> DbResult<()> {
    let mut header = read_header(data)?;
    header.parent_page_id = parent.0;
    write_header(data, &header)
}

fn read_header(data: &[u8]) -> DbResult<NodeHeader> {
    let (header, read) = decode_from_slice(&data[..HEADER_BYTES], bincode_config())
        .map_err(|e| DbError::Storage(format!("read node header failed: {e}")))?;
    debug_assert_eq!(read, HEADER_BYTES);
    Ok(header)
}

fn write_header(data: &mut [u8], header: &NodeHeader) -> DbResult<()> {
    let written = encode_into_slice(header, &mut data[..HEADER_BYTES], bincode_config())
        .map_err(|e| DbError::Storage(format!("write node header failed: {e}")))?;
    debug_assert_eq!(written, HEADER_BYTES);
    Ok(())
}

macro_rules! header_reads {
    () => {
        pub fn size(&self) -> DbResult<u32> {
            Ok(read_header(self.data)?.size)
        }

        pub fn max_size(&self) -> DbResult<u32> {
            Ok(read_header(self.data)?.max_size)
        }

        /// Non-root minimum occupancy.
        pub fn min_size(&self) -> DbResult<u32> {
            Ok(read_header(self.data)?.max_size / 2)
        }

        pub fn parent_page_id(&self) -> DbResult<PageId> {
            Ok(PageId(read_header(self.data)?.parent_page_id))
        }

        pub fn page_id(&self) -> DbResult<PageId> {
            Ok(PageId(read_header(self.data)?.page_id))
        }

        pub fn is_root(&self) -> DbResult<bool> {
            Ok(!self.parent_page_id()?.is_valid())
        }
    };
}

macro_rules! header_writes {
    () => {
        pub fn set_parent_page_id(&mut self, parent: PageId) -> DbResult<()> {
            let mut header = read_header(self.data)?;
            header.parent_page_id = parent.0;
            write_header(self.data, &header)
        }

        fn set_size(&mut self, size: u32) -> DbResult<()> {
            let mut header = read_header(self.data)?;
            header.size = size;
            write_header(self.data, &header)
        }
    };
}

// ---------------------------------------------------------------- leaves

pub struct LeafRef<'a, const N: usize> {
    data: &'a [u8],
}

impl<'a, const N: usize> LeafRef<'a, N> {
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(page_type(data), PAGE_TYPE_LEAF);
        Self { data }
    }

    header_reads!();

    pub fn next_page_id(&self) -> PageId {
        PageId((&self.data[HEADER_BYTES..LEAF_HEADER_BYTES]).get_i32_le())
    }

    fn entry_offset(idx: u32) -> usize {
        LEAF_HEADER_BYTES + idx as usize * (N + 8)
    }

    pub fn key_at(&self, idx: u32) -> GenericKey<N> {
        let start = Self::entry_offset(idx);
        GenericKey::from_slice(&self.data[start..start + N])
    }

    pub fn rid_at(&self, idx: u32) -> RecordId {
        let mut cursor = &self.data[Self::entry_offset(idx) + N..];
        let page_id = PageId(cursor.get_i32_le());
        let slot = cursor.get_u32_le();
        RecordId { page_id, slot }
    }

    /// First index whose key is >= `key`; `size` when every key is smaller.
    pub fn key_index(&self, key: &GenericKey<N>, cmp: CmpFn<'_, N>) -> DbResult<u32> {
        let mut lo = 0;
        let mut hi = self.size()?;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp(&self.key_at(mid), key)?.is_lt() {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    pub fn lookup(&self, key: &GenericKey<N>, cmp: CmpFn<'_, N>) -> DbResult<Option<RecordId>> {
        let idx = self.key_index(key, cmp)?;
        if idx < self.size()? && cmp(&self.key_at(idx), key)?.is_eq() {
            return Ok(Some(self.rid_at(idx)));
        }
        Ok(None)
    }
}

pub struct LeafMut<'a, const N: usize> {
    data: &'a mut [u8],
}

impl<'a, const N: usize> LeafMut<'a, N> {
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(page_type(data), PAGE_TYPE_LEAF);
        Self { data }
    }

    /// Formats raw page bytes as an empty leaf.
    pub fn init(data: &'a mut [u8], page_id: PageId, parent: PageId, max_size: u32) -> DbResult<Self> {
        data.fill(0);
        write_header(
            data,
            &NodeHeader {
                page_type: PAGE_TYPE_LEAF,
                lsn: 0,
                size: 0,
                max_size,
                parent_page_id: parent.0,
                page_id: page_id.0,
            },
        )?;
        let mut leaf = Self { data };
        leaf.set_next_page_id(PageId::INVALID);
        Ok(leaf)
    }

    pub fn as_ref(&self) -> LeafRef<'_, N> {
        LeafRef::new(self.data)
    }

    header_reads!();
    header_writes!();

    pub fn next_page_id(&self) -> PageId {
        self.as_ref().next_page_id()
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        (&mut self.data[HEADER_BYTES..LEAF_HEADER_BYTES]).put_i32_le(next.0);
    }

    fn set_entry(&mut self, idx: u32, key: &GenericKey<N>, rid: RecordId) {
        let start = LeafRef::<N>::entry_offset(idx);
        self.data[start..start + N].copy_from_slice(key.as_bytes());
        let mut cursor = &mut self.data[start + N..];
        cursor.put_i32_le(rid.page_id.0);
        cursor.put_u32_le(rid.slot);
    }

    fn shift(&mut self, from: u32, to: u32, count: u32) {
        let src = LeafRef::<N>::entry_offset(from);
        let dst = LeafRef::<N>::entry_offset(to);
        let len = count as usize * (N + 8);
        self.data.copy_within(src..src + len, dst);
    }

    /// Inserts in key order; the caller has already ruled out duplicates
    /// and verified there is room.
    pub fn insert(&mut self, key: &GenericKey<N>, rid: RecordId, cmp: CmpFn<'_, N>) -> DbResult<u32> {
        let size = self.size()?;
        debug_assert!(size < self.max_size()?);
        let idx = self.as_ref().key_index(key, cmp)?;
        self.shift(idx, idx + 1, size - idx);
        self.set_entry(idx, key, rid);
        self.set_size(size + 1)?;
        Ok(size + 1)
    }

    /// Removes `key` if present; returns `(removed_index, new_size)`.
    pub fn remove_record(
        &mut self,
        key: &GenericKey<N>,
        cmp: CmpFn<'_, N>,
    ) -> DbResult<Option<(u32, u32)>> {
        let size = self.size()?;
        let idx = self.as_ref().key_index(key, cmp)?;
        if idx >= size || !cmp(&self.as_ref().key_at(idx), key)?.is_eq() {
            return Ok(None);
        }
        self.shift(idx + 1, idx, size - idx - 1);
        self.set_size(size - 1)?;
        Ok(Some((idx, size - 1)))
    }

    /// Split support: keeps the first `max/2` entries and moves the rest to
    /// the (empty) recipient. Leaf links are spliced by the caller.
    pub fn move_half_to(&mut self, recipient: &mut LeafMut<'_, N>) -> DbResult<()> {
        let size = self.size()?;
        let keep = self.min_size()?;
        let moved = size - keep;
        let src = LeafRef::<N>::entry_offset(keep);
        let dst = LeafRef::<N>::entry_offset(0);
        let len = moved as usize * (N + 8);
        recipient.data[dst..dst + len].copy_from_slice(&self.data[src..src + len]);
        recipient.set_size(moved)?;
        self.set_size(keep)
    }

    /// Merge support: appends everything to the recipient (the left
    /// sibling) and hands over the leaf link.
    pub fn move_all_to(&mut self, recipient: &mut LeafMut<'_, N>) -> DbResult<()> {
        let size = self.size()?;
        let recipient_size = recipient.size()?;
        let src = LeafRef::<N>::entry_offset(0);
        let dst = LeafRef::<N>::entry_offset(recipient_size);
        let len = size as usize * (N + 8);
        recipient.data[dst..dst + len].copy_from_slice(&self.data[src..src + len]);
        recipient.set_size(recipient_size + size)?;
        recipient.set_next_page_id(self.next_page_id());
        self.set_size(0)
    }

    /// Redistribution support: moves this leaf's first entry to the end of
    /// the left sibling.
    pub fn move_first_to_end_of(&mut self, recipient: &mut LeafMut<'_, N>) -> DbResult<()> {
        let size = self.size()?;
        let (key, rid) = (self.as_ref().key_at(0), self.as_ref().rid_at(0));
        let recipient_size = recipient.size()?;
        recipient.set_entry(recipient_size, &key, rid);
        recipient.set_size(recipient_size + 1)?;
        self.shift(1, 0, size - 1);
        self.set_size(size - 1)
    }

    /// Redistribution support: moves this leaf's last entry to the front of
    /// the right sibling.
    pub fn move_last_to_front_of(&mut self, recipient: &mut LeafMut<'_, N>) -> DbResult<()> {
        let size = self.size()?;
        let (key, rid) = (self.as_ref().key_at(size - 1), self.as_ref().rid_at(size - 1));
        let recipient_size = recipient.size()?;
        recipient.shift(0, 1, recipient_size);
        recipient.set_entry(0, &key, rid);
        recipient.set_size(recipient_size + 1)?;
        self.set_size(size - 1)
    }
}

// ------------------------------------------------------------- internals

pub struct InternalRef<'a, const N: usize> {
    data: &'a [u8],
}

impl<'a, const N: usize> InternalRef<'a, N> {
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(page_type(data), PAGE_TYPE_INTERNAL);
        Self { data }
    }

    header_reads!();

    fn entry_offset(idx: u32) -> usize {
        HEADER_BYTES + idx as usize * (N + 4)
    }

    pub fn key_at(&self, idx: u32) -> GenericKey<N> {
        let start = Self::entry_offset(idx);
        GenericKey::from_slice(&self.data[start..start + N])
    }

    pub fn child_at(&self, idx: u32) -> PageId {
        PageId((&self.data[Self::entry_offset(idx) + N..]).get_i32_le())
    }

    /// Child to descend into for `key`: the child of the greatest separator
    /// <= `key` (entry 0 when every separator is greater).
    pub fn lookup(&self, key: &GenericKey<N>, cmp: CmpFn<'_, N>) -> DbResult<PageId> {
        let size = self.size()?;
        let mut lo = 1;
        let mut hi = size;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp(&self.key_at(mid), key)?.is_gt() {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(self.child_at(lo - 1))
    }

    pub fn value_index(&self, child: PageId) -> DbResult<Option<u32>> {
        let size = self.size()?;
        Ok((0..size).find(|&i| self.child_at(i) == child))
    }

    pub fn children(&self) -> DbResult<Vec<PageId>> {
        let size = self.size()?;
        Ok((0..size).map(|i| self.child_at(i)).collect())
    }
}

pub struct InternalMut<'a, const N: usize> {
    data: &'a mut [u8],
}

impl<'a, const N: usize> InternalMut<'a, N> {
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(page_type(data), PAGE_TYPE_INTERNAL);
        Self { data }
    }

    /// Formats raw page bytes as an empty internal node.
    pub fn init(data: &'a mut [u8], page_id: PageId, parent: PageId, max_size: u32) -> DbResult<Self> {
        data.fill(0);
        write_header(
            data,
            &NodeHeader {
                page_type: PAGE_TYPE_INTERNAL,
                lsn: 0,
                size: 0,
                max_size,
                parent_page_id: parent.0,
                page_id: page_id.0,
            },
        )?;
        Ok(Self { data })
    }

    pub fn as_ref(&self) -> InternalRef<'_, N> {
        InternalRef::new(self.data)
    }

    header_reads!();
    header_writes!();

    pub fn key_at(&self, idx: u32) -> GenericKey<N> {
        self.as_ref().key_at(idx)
    }

    pub fn child_at(&self, idx: u32) -> PageId {
        self.as_ref().child_at(idx)
    }

    pub fn set_key_at(&mut self, idx: u32, key: &GenericKey<N>) {
        let start = InternalRef::<N>::entry_offset(idx);
        self.data[start..start + N].copy_from_slice(key.as_bytes());
    }

    fn set_child_at(&mut self, idx: u32, child: PageId) {
        let start = InternalRef::<N>::entry_offset(idx) + N;
        (&mut self.data[start..start + 4]).put_i32_le(child.0);
    }

    fn shift(&mut self, from: u32, to: u32, count: u32) {
        let src = InternalRef::<N>::entry_offset(from);
        let dst = InternalRef::<N>::entry_offset(to);
        let len = count as usize * (N + 4);
        self.data.copy_within(src..src + len, dst);
    }

    /// Roots a fresh level: `[ (dummy, left) (key, right) ]`.
    pub fn populate_new_root(
        &mut self,
        left: PageId,
        key: &GenericKey<N>,
        right: PageId,
    ) -> DbResult<()> {
        self.set_child_at(0, left);
        self.set_key_at(1, key);
        self.set_child_at(1, right);
        self.set_size(2)
    }

    /// Inserts `(key, new_child)` immediately after the entry holding
    /// `old_child`.
    pub fn insert_node_after(
        &mut self,
        old_child: PageId,
        key: &GenericKey<N>,
        new_child: PageId,
    ) -> DbResult<u32> {
        let size = self.size()?;
        debug_assert!(size < self.max_size()?);
        let idx = self.as_ref().value_index(old_child)?.ok_or_else(|| {
            DbError::Storage(format!("child {:?} missing from parent node", old_child))
        })?;
        self.shift(idx + 1, idx + 2, size - idx - 1);
        self.set_key_at(idx + 1, key);
        self.set_child_at(idx + 1, new_child);
        self.set_size(size + 1)?;
        Ok(size + 1)
    }

    /// Removes the entry at `idx`.
    pub fn remove(&mut self, idx: u32) -> DbResult<()> {
        let size = self.size()?;
        self.shift(idx + 1, idx, size - idx - 1);
        self.set_size(size - 1)
    }

    /// Collapse support: empties a single-child root, returning that child.
    pub fn remove_and_return_only_child(&mut self) -> DbResult<PageId> {
        debug_assert_eq!(self.size()?, 1);
        let child = self.child_at(0);
        self.set_size(0)?;
        Ok(child)
    }

    /// Split support: keeps the first `max/2` entries, moves the rest (raw,
    /// separator keys included) to the empty recipient. Returns the moved
    /// children so the caller can repoint their parent ids.
    pub fn move_half_to(&mut self, recipient: &mut InternalMut<'_, N>) -> DbResult<Vec<PageId>> {
        let size = self.size()?;
        let keep = self.min_size()?;
        let moved = size - keep;
        let src = InternalRef::<N>::entry_offset(keep);
        let dst = InternalRef::<N>::entry_offset(0);
        let len = moved as usize * (N + 4);
        recipient.data[dst..dst + len].copy_from_slice(&self.data[src..src + len]);
        recipient.set_size(moved)?;
        self.set_size(keep)?;
        recipient.as_ref().children()
    }

    /// Merge support: appends everything to the left sibling, with the
    /// parent separator standing in for the dummy key. Returns the moved
    /// children.
    pub fn move_all_to(
        &mut self,
        recipient: &mut InternalMut<'_, N>,
        middle_key: &GenericKey<N>,
    ) -> DbResult<Vec<PageId>> {
        self.set_key_at(0, middle_key);
        let size = self.size()?;
        let recipient_size = recipient.size()?;
        let src = InternalRef::<N>::entry_offset(0);
        let dst = InternalRef::<N>::entry_offset(recipient_size);
        let len = size as usize * (N + 4);
        recipient.data[dst..dst + len].copy_from_slice(&self.data[src..src + len]);
        recipient.set_size(recipient_size + size)?;
        let moved = self.as_ref().children()?;
        self.set_size(0)?;
        Ok(moved)
    }

    /// Redistribution support: pops the last entry.
    pub fn pop_last(&mut self) -> DbResult<(GenericKey<N>, PageId)> {
        let size = self.size()?;
        let key = self.key_at(size - 1);
        let child = self.child_at(size - 1);
        self.set_size(size - 1)?;
        Ok((key, child))
    }

    /// Redistribution support: pops the leftmost child; returns it together
    /// with the separator that followed it (the new dummy's old key).
    pub fn pop_front(&mut self) -> DbResult<(PageId, GenericKey<N>)> {
        let size = self.size()?;
        let child = self.child_at(0);
        let key = self.key_at(1);
        self.shift(1, 0, size - 1);
        self.set_size(size - 1)?;
        Ok((child, key))
    }

    /// Redistribution support: pushes a child in front of entry 0. The
    /// displaced entry's key slot must be refreshed by the caller (it was
    /// the dummy).
    pub fn push_front(&mut self, child: PageId) -> DbResult<()> {
        let size = self.size()?;
        self.shift(0, 1, size);
        self.set_child_at(0, child);
        self.set_key_at(0, &GenericKey::from_slice(&[0u8; N]));
        self.set_size(size + 1)
    }

    /// Redistribution support: appends `(key, child)`.
    pub fn push_back(&mut self, key: &GenericKey<N>, child: PageId) -> DbResult<()> {
        let size = self.size()?;
        self.set_key_at(size, key);
        self.set_child_at(size, child);
        self.set_size(size + 1)
    }
}
