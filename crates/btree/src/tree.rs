//! The B+-tree proper: root management, crabbing descent, splits, and
//! coalesce/redistribute rebalancing.
//!
//! Split rule: a full node keeps its first `max/2` entries and moves the
//! rest to a fresh right sibling; the incoming entry then goes to whichever
//! side the comparator dictates. Minimum occupancy for non-root nodes is
//! `max/2`.

use std::sync::Arc;

use log::debug;

use buffer::{BufferPool, PageGuard};
use common::{DbError, DbResult, INDEX_ROOTS_PAGE, IndexId, PageId, RecordId};

use crate::key::{GenericKey, KeyComparator};
use crate::node::{
    self, InternalMut, InternalRef, LeafMut, LeafRef, PAGE_TYPE_INTERNAL, PAGE_TYPE_LEAF,
};
use crate::roots::{self, IndexRootsMut};

/// A persistent, unique-key B+-tree parameterized by key width `N`.
pub struct BPlusTreeIndex<const N: usize> {
    index_id: IndexId,
    pool: Arc<BufferPool>,
    comparator: KeyComparator,
    root_page_id: PageId,
    leaf_max_size: u32,
    internal_max_size: u32,
}

impl<const N: usize> BPlusTreeIndex<N> {
    /// Attaches to the index, loading its root from the index-roots page.
    /// A missing entry means the tree has not been built yet.
    pub fn new(
        index_id: IndexId,
        pool: Arc<BufferPool>,
        comparator: KeyComparator,
    ) -> DbResult<Self> {
        Self::with_max_sizes(
            index_id,
            pool,
            comparator,
            node::leaf_capacity(N),
            node::internal_capacity(N),
        )
    }

    /// Test entry point allowing tiny node capacities.
    pub fn with_max_sizes(
        index_id: IndexId,
        pool: Arc<BufferPool>,
        comparator: KeyComparator,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> DbResult<Self> {
        let root_page_id = {
            let page = pool.fetch(INDEX_ROOTS_PAGE)?;
            let data = page.data();
            roots::lookup_root(&data[..], index_id).unwrap_or(PageId::INVALID)
        };
        Ok(Self {
            index_id,
            pool,
            comparator,
            root_page_id,
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn index_id(&self) -> IndexId {
        self.index_id
    }

    pub fn key_schema(&self) -> &std::sync::Arc<record::Schema> {
        self.comparator.key_schema()
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub fn is_empty(&self) -> bool {
        !self.root_page_id.is_valid()
    }

    /// Point lookup.
    pub fn get_value(&self, key: &GenericKey<N>) -> DbResult<Option<RecordId>> {
        let comparator = self.comparator.clone();
        let cmp = move |a: &GenericKey<N>, b: &GenericKey<N>| comparator.compare(a, b);
        let Some(leaf) = self.find_leaf(key, false)? else {
            return Ok(None);
        };
        let data = leaf.data();
        LeafRef::<N>::new(&data[..]).lookup(key, &cmp)
    }

    /// Inserts a unique key; a duplicate fails with `AlreadyExists`.
    pub fn insert(&mut self, key: &GenericKey<N>, rid: RecordId) -> DbResult<()> {
        if self.is_empty() {
            return self.start_new_tree(key, rid);
        }
        self.insert_into_leaf(key, rid)
    }

    /// Removes a key; `Ok(false)` when the key is absent.
    pub fn remove(&mut self, key: &GenericKey<N>) -> DbResult<bool> {
        if self.is_empty() {
            return Ok(false);
        }
        let comparator = self.comparator.clone();
        let cmp = move |a: &GenericKey<N>, b: &GenericKey<N>| comparator.compare(a, b);

        let leaf = self
            .find_leaf(key, false)?
            .ok_or_else(|| DbError::Storage("non-empty tree without a leaf".into()))?;
        let removed = {
            let mut data = leaf.data_mut();
            LeafMut::<N>::new(&mut data[..]).remove_record(key, &cmp)?
        };
        let Some((removed_idx, new_size)) = removed else {
            return Ok(false);
        };

        let (min_size, parent_pid, leaf_pid, is_root) = {
            let data = leaf.data();
            let view = LeafRef::<N>::new(&data[..]);
            (
                view.min_size()?,
                view.parent_page_id()?,
                view.page_id()?,
                view.is_root()?,
            )
        };

        if !is_root && new_size < min_size {
            self.coalesce_or_redistribute(leaf)?;
            return Ok(true);
        }
        if is_root && new_size == 0 {
            self.adjust_root(leaf)?;
            return Ok(true);
        }

        // The smallest key of the leaf changed: refresh the separator the
        // parent keeps for it.
        if removed_idx == 0 && parent_pid.is_valid() && new_size > 0 {
            let new_first = {
                let data = leaf.data();
                LeafRef::<N>::new(&data[..]).key_at(0)
            };
            let parent = self.pool.fetch(parent_pid)?;
            let mut data = parent.data_mut();
            let mut view = InternalMut::<N>::new(&mut data[..]);
            let idx = view.as_ref().value_index(leaf_pid)?;
            if let Some(idx) = idx
                && idx > 0
            {
                view.set_key_at(idx, &new_first);
            }
        }
        Ok(true)
    }

    /// Ordered iteration from the smallest key.
    pub fn iter(&self) -> DbResult<TreeIter<N>> {
        let leaf = self.find_leaf(&GenericKey::from_slice(&[0u8; N]), true)?;
        Ok(TreeIter {
            pool: Arc::clone(&self.pool),
            leaf,
            idx: 0,
        })
    }

    /// Ordered iteration from the first entry >= `key`.
    pub fn iter_from(&self, key: &GenericKey<N>) -> DbResult<TreeIter<N>> {
        let comparator = self.comparator.clone();
        let cmp = move |a: &GenericKey<N>, b: &GenericKey<N>| comparator.compare(a, b);
        let Some(leaf) = self.find_leaf(key, false)? else {
            return Ok(TreeIter {
                pool: Arc::clone(&self.pool),
                leaf: None,
                idx: 0,
            });
        };
        let idx = {
            let data = leaf.data();
            LeafRef::<N>::new(&data[..]).key_index(key, &cmp)?
        };
        Ok(TreeIter {
            pool: Arc::clone(&self.pool),
            leaf: Some(leaf),
            idx,
        })
    }

    /// Deallocates every node of the tree and retires the roots-page
    /// entry.
    pub fn destroy(&mut self) -> DbResult<()> {
        if self.root_page_id.is_valid() {
            self.destroy_node(self.root_page_id)?;
            self.root_page_id = PageId::INVALID;
        }
        let page = self.pool.fetch(INDEX_ROOTS_PAGE)?;
        let mut data = page.data_mut();
        let mut view = IndexRootsMut::new(&mut data[..]);
        match view.delete(self.index_id) {
            Ok(()) | Err(DbError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------ descent

    /// Descends to the leaf that owns `key` (or the leftmost leaf),
    /// crabbing: the child is pinned before the parent guard is released.
    fn find_leaf(&self, key: &GenericKey<N>, leftmost: bool) -> DbResult<Option<PageGuard>> {
        if self.is_empty() {
            return Ok(None);
        }
        let comparator = self.comparator.clone();
        let cmp = move |a: &GenericKey<N>, b: &GenericKey<N>| comparator.compare(a, b);

        let mut page = self.pool.fetch(self.root_page_id)?;
        loop {
            let next = {
                let data = page.data();
                if node::page_type(&data[..]) == PAGE_TYPE_LEAF {
                    None
                } else {
                    let view = InternalRef::<N>::new(&data[..]);
                    Some(if leftmost {
                        view.child_at(0)
                    } else {
                        view.lookup(key, &cmp)?
                    })
                }
            };
            match next {
                None => return Ok(Some(page)),
                Some(child_pid) => {
                    let child = self.pool.fetch(child_pid)?;
                    page = child;
                }
            }
        }
    }

    // ---------------------------------------------------------- insertion

    fn start_new_tree(&mut self, key: &GenericKey<N>, rid: RecordId) -> DbResult<()> {
        let comparator = self.comparator.clone();
        let cmp = move |a: &GenericKey<N>, b: &GenericKey<N>| comparator.compare(a, b);

        let (root_pid, page) = self.pool.new_page()?;
        {
            let mut data = page.data_mut();
            let mut leaf = LeafMut::<N>::init(
                &mut data[..],
                root_pid,
                PageId::INVALID,
                self.leaf_max_size,
            )?;
            leaf.insert(key, rid, &cmp)?;
        }
        self.root_page_id = root_pid;
        self.publish_root_entry(root_pid)
    }

    fn insert_into_leaf(&mut self, key: &GenericKey<N>, rid: RecordId) -> DbResult<()> {
        let comparator = self.comparator.clone();
        let cmp = move |a: &GenericKey<N>, b: &GenericKey<N>| comparator.compare(a, b);

        let leaf = self
            .find_leaf(key, false)?
            .ok_or_else(|| DbError::Storage("non-empty tree without a leaf".into()))?;

        let (duplicate, size, max_size, parent_pid) = {
            let data = leaf.data();
            let view = LeafRef::<N>::new(&data[..]);
            (
                view.lookup(key, &cmp)?.is_some(),
                view.size()?,
                view.max_size()?,
                view.parent_page_id()?,
            )
        };
        if duplicate {
            return Err(DbError::AlreadyExists("duplicate key in unique index".into()));
        }
        if size < max_size {
            let mut data = leaf.data_mut();
            LeafMut::<N>::new(&mut data[..]).insert(key, rid, &cmp)?;
            return Ok(());
        }

        // Full leaf: split, place the new pair, splice the chain.
        debug!("splitting leaf {:?} of index {}", leaf.page_id(), self.index_id.0);
        let (new_pid, new_page) = self.pool.new_page()?;
        let separator = {
            let mut old_data = leaf.data_mut();
            let mut new_data = new_page.data_mut();
            let mut old = LeafMut::<N>::new(&mut old_data[..]);
            let mut fresh = LeafMut::<N>::init(
                &mut new_data[..],
                new_pid,
                parent_pid,
                self.leaf_max_size,
            )?;
            old.move_half_to(&mut fresh)?;
            if cmp(key, &fresh.as_ref().key_at(0))?.is_lt() {
                old.insert(key, rid, &cmp)?;
            } else {
                fresh.insert(key, rid, &cmp)?;
            }
            // The sibling holds the larger keys, so it becomes the
            // successor in the leaf chain.
            fresh.set_next_page_id(old.next_page_id());
            old.set_next_page_id(new_pid);
            fresh.as_ref().key_at(0)
        };
        self.insert_into_parent(&leaf, separator, &new_page)
    }

    fn insert_into_parent(
        &mut self,
        old: &PageGuard,
        key: GenericKey<N>,
        new: &PageGuard,
    ) -> DbResult<()> {
        let comparator = self.comparator.clone();
        let cmp = move |a: &GenericKey<N>, b: &GenericKey<N>| comparator.compare(a, b);

        let old_pid = old.page_id();
        let new_pid = new.page_id();
        let parent_pid = {
            let data = old.data();
            node::node_parent(&data[..])?
        };

        // The split node was the root: grow the tree by one level.
        if !parent_pid.is_valid() {
            let (root_pid, root_page) = self.pool.new_page()?;
            {
                let mut data = root_page.data_mut();
                let mut root = InternalMut::<N>::init(
                    &mut data[..],
                    root_pid,
                    PageId::INVALID,
                    self.internal_max_size,
                )?;
                root.populate_new_root(old_pid, &key, new_pid)?;
            }
            {
                let mut data = old.data_mut();
                node::set_node_parent(&mut data[..], root_pid)?;
            }
            {
                let mut data = new.data_mut();
                node::set_node_parent(&mut data[..], root_pid)?;
            }
            self.root_page_id = root_pid;
            return self.publish_root_entry(root_pid);
        }

        let parent = self.pool.fetch(parent_pid)?;
        let (size, max_size, grandparent) = {
            let data = parent.data();
            let view = InternalRef::<N>::new(&data[..]);
            (view.size()?, view.max_size()?, view.parent_page_id()?)
        };

        if size < max_size {
            {
                let mut data = parent.data_mut();
                InternalMut::<N>::new(&mut data[..]).insert_node_after(old_pid, &key, new_pid)?;
            }
            let mut data = new.data_mut();
            node::set_node_parent(&mut data[..], parent_pid)?;
            return Ok(());
        }

        // Full parent: split it and recurse.
        debug!("splitting internal {:?} of index {}", parent_pid, self.index_id.0);
        let (sibling_pid, sibling_page) = self.pool.new_page()?;
        let (moved_children, separator, new_goes_left) = {
            let mut parent_data = parent.data_mut();
            let mut sibling_data = sibling_page.data_mut();
            let mut parent_view = InternalMut::<N>::new(&mut parent_data[..]);
            let mut sibling_view = InternalMut::<N>::init(
                &mut sibling_data[..],
                sibling_pid,
                grandparent,
                self.internal_max_size,
            )?;
            let moved = parent_view.move_half_to(&mut sibling_view)?;
            let separator = sibling_view.key_at(0);
            let new_goes_left = cmp(&key, &separator)?.is_lt();
            if new_goes_left {
                parent_view.insert_node_after(old_pid, &key, new_pid)?;
            } else {
                sibling_view.insert_node_after(old_pid, &key, new_pid)?;
            }
            (moved, separator, new_goes_left)
        };

        for child in moved_children {
            let guard = self.pool.fetch(child)?;
            let mut data = guard.data_mut();
            node::set_node_parent(&mut data[..], sibling_pid)?;
        }
        {
            let mut data = new.data_mut();
            node::set_node_parent(
                &mut data[..],
                if new_goes_left { parent_pid } else { sibling_pid },
            )?;
        }
        self.insert_into_parent(&parent, separator, &sibling_page)
    }

    // ----------------------------------------------------------- deletion

    fn coalesce_or_redistribute(&mut self, node: PageGuard) -> DbResult<()> {
        let node_pid = node.page_id();
        let parent_pid = {
            let data = node.data();
            node::node_parent(&data[..])?
        };
        if !parent_pid.is_valid() {
            return self.adjust_root(node);
        }

        let parent = self.pool.fetch(parent_pid)?;
        let (node_index, parent_size) = {
            let data = parent.data();
            let view = InternalRef::<N>::new(&data[..]);
            let idx = view.value_index(node_pid)?.ok_or_else(|| {
                DbError::Storage(format!("node {:?} missing from its parent", node_pid))
            })?;
            (idx, view.size()?)
        };

        // Work with the immediate left sibling when there is one,
        // otherwise the right.
        if node_index > 0 {
            let sibling_pid = {
                let data = parent.data();
                InternalRef::<N>::new(&data[..]).child_at(node_index - 1)
            };
            let sibling = self.pool.fetch(sibling_pid)?;
            let (sibling_size, sibling_min) = {
                let data = sibling.data();
                let view = InternalRef::<N>::new(&data[..]);
                match node::page_type(&data[..]) {
                    PAGE_TYPE_INTERNAL => (view.size()?, view.min_size()?),
                    _ => {
                        let leaf = LeafRef::<N>::new(&data[..]);
                        (leaf.size()?, leaf.min_size()?)
                    }
                }
            };
            if sibling_size > sibling_min {
                return self.redistribute_from_left(&parent, &sibling, &node, node_index);
            }
            return self.coalesce(parent, sibling, node, node_index);
        }

        debug_assert!(parent_size > 1);
        let sibling_pid = {
            let data = parent.data();
            InternalRef::<N>::new(&data[..]).child_at(1)
        };
        let sibling = self.pool.fetch(sibling_pid)?;
        let (sibling_size, sibling_min) = {
            let data = sibling.data();
            match node::page_type(&data[..]) {
                PAGE_TYPE_INTERNAL => {
                    let view = InternalRef::<N>::new(&data[..]);
                    (view.size()?, view.min_size()?)
                }
                _ => {
                    let leaf = LeafRef::<N>::new(&data[..]);
                    (leaf.size()?, leaf.min_size()?)
                }
            }
        };
        if sibling_size > sibling_min {
            return self.redistribute_from_right(&parent, &sibling, &node, node_index);
        }
        self.coalesce(parent, node, sibling, 1)
    }

    /// Merges `right` into `left` (its left sibling), removes the
    /// separator, and rebalances the parent if it underflowed.
    fn coalesce(
        &mut self,
        parent: PageGuard,
        left: PageGuard,
        right: PageGuard,
        right_index: u32,
    ) -> DbResult<()> {
        let right_pid = right.page_id();
        let left_pid = left.page_id();
        debug!("coalescing {:?} into {:?}", right_pid, left_pid);

        let middle_key = {
            let data = parent.data();
            InternalRef::<N>::new(&data[..]).key_at(right_index)
        };
        let moved_children = {
            let mut left_data = left.data_mut();
            let mut right_data = right.data_mut();
            if node::page_type(&left_data[..]) == PAGE_TYPE_LEAF {
                let mut left_view = LeafMut::<N>::new(&mut left_data[..]);
                LeafMut::<N>::new(&mut right_data[..]).move_all_to(&mut left_view)?;
                Vec::new()
            } else {
                let mut left_view = InternalMut::<N>::new(&mut left_data[..]);
                InternalMut::<N>::new(&mut right_data[..])
                    .move_all_to(&mut left_view, &middle_key)?
            }
        };
        for child in moved_children {
            let guard = self.pool.fetch(child)?;
            let mut data = guard.data_mut();
            node::set_node_parent(&mut data[..], left_pid)?;
        }

        drop(right);
        if !self.pool.delete(right_pid)? {
            return Err(DbError::Storage(format!(
                "merged node {:?} still pinned",
                right_pid
            )));
        }
        drop(left);

        let (parent_size, parent_min, parent_is_root) = {
            let mut data = parent.data_mut();
            let mut view = InternalMut::<N>::new(&mut data[..]);
            view.remove(right_index)?;
            let as_ref = view.as_ref();
            (as_ref.size()?, as_ref.min_size()?, as_ref.is_root()?)
        };

        if parent_is_root {
            if parent_size == 1 {
                return self.adjust_root(parent);
            }
        } else if parent_size < parent_min {
            return self.coalesce_or_redistribute(parent);
        }
        Ok(())
    }

    /// Borrows the last entry of the left sibling into the front of
    /// `node`.
    fn redistribute_from_left(
        &mut self,
        parent: &PageGuard,
        sibling: &PageGuard,
        node: &PageGuard,
        node_index: u32,
    ) -> DbResult<()> {
        let node_pid = node.page_id();
        let mut sibling_data = sibling.data_mut();
        let mut node_data = node.data_mut();

        if node::page_type(&sibling_data[..]) == PAGE_TYPE_LEAF {
            let mut sibling_view = LeafMut::<N>::new(&mut sibling_data[..]);
            let mut node_view = LeafMut::<N>::new(&mut node_data[..]);
            sibling_view.move_last_to_front_of(&mut node_view)?;
            let new_first = node_view.as_ref().key_at(0);
            let mut parent_data = parent.data_mut();
            InternalMut::<N>::new(&mut parent_data[..]).set_key_at(node_index, &new_first);
            Ok(())
        } else {
            let middle_key = {
                let parent_data = parent.data();
                InternalRef::<N>::new(&parent_data[..]).key_at(node_index)
            };
            let mut sibling_view = InternalMut::<N>::new(&mut sibling_data[..]);
            let mut node_view = InternalMut::<N>::new(&mut node_data[..]);
            let (moved_key, moved_child) = sibling_view.pop_last()?;
            node_view.push_front(moved_child)?;
            // The old separator becomes the first real key of `node`.
            node_view.set_key_at(1, &middle_key);
            {
                let mut parent_data = parent.data_mut();
                InternalMut::<N>::new(&mut parent_data[..]).set_key_at(node_index, &moved_key);
            }
            drop(sibling_data);
            drop(node_data);
            let guard = self.pool.fetch(moved_child)?;
            let mut data = guard.data_mut();
            node::set_node_parent(&mut data[..], node_pid)
        }
    }

    /// Borrows the first entry of the right sibling onto the end of
    /// `node`.
    fn redistribute_from_right(
        &mut self,
        parent: &PageGuard,
        sibling: &PageGuard,
        node: &PageGuard,
        node_index: u32,
    ) -> DbResult<()> {
        let node_pid = node.page_id();
        let sibling_index = node_index + 1;
        let mut sibling_data = sibling.data_mut();
        let mut node_data = node.data_mut();

        if node::page_type(&sibling_data[..]) == PAGE_TYPE_LEAF {
            let mut sibling_view = LeafMut::<N>::new(&mut sibling_data[..]);
            let mut node_view = LeafMut::<N>::new(&mut node_data[..]);
            sibling_view.move_first_to_end_of(&mut node_view)?;
            let new_first = sibling_view.as_ref().key_at(0);
            let mut parent_data = parent.data_mut();
            InternalMut::<N>::new(&mut parent_data[..]).set_key_at(sibling_index, &new_first);
            Ok(())
        } else {
            let middle_key = {
                let parent_data = parent.data();
                InternalRef::<N>::new(&parent_data[..]).key_at(sibling_index)
            };
            let mut sibling_view = InternalMut::<N>::new(&mut sibling_data[..]);
            let mut node_view = InternalMut::<N>::new(&mut node_data[..]);
            let (moved_child, next_separator) = sibling_view.pop_front()?;
            node_view.push_back(&middle_key, moved_child)?;
            {
                let mut parent_data = parent.data_mut();
                InternalMut::<N>::new(&mut parent_data[..])
                    .set_key_at(sibling_index, &next_separator);
            }
            drop(sibling_data);
            drop(node_data);
            let guard = self.pool.fetch(moved_child)?;
            let mut data = guard.data_mut();
            node::set_node_parent(&mut data[..], node_pid)
        }
    }

    /// Shrinks the tree when deletion emptied the root: a single-child
    /// internal root promotes its child; an empty leaf root publishes the
    /// invalid root id.
    fn adjust_root(&mut self, root: PageGuard) -> DbResult<()> {
        let root_pid = root.page_id();
        let (is_leaf, size) = {
            let data = root.data();
            let is_leaf = node::page_type(&data[..]) == PAGE_TYPE_LEAF;
            let size = if is_leaf {
                LeafRef::<N>::new(&data[..]).size()?
            } else {
                InternalRef::<N>::new(&data[..]).size()?
            };
            (is_leaf, size)
        };

        if is_leaf {
            if size > 0 {
                return Ok(());
            }
            debug!("index {} is now empty", self.index_id.0);
            self.root_page_id = PageId::INVALID;
            self.publish_root_update(PageId::INVALID)?;
            drop(root);
            self.pool.delete(root_pid)?;
            return Ok(());
        }

        if size > 1 {
            return Ok(());
        }
        let child_pid = {
            let mut data = root.data_mut();
            InternalMut::<N>::new(&mut data[..]).remove_and_return_only_child()?
        };
        {
            let child = self.pool.fetch(child_pid)?;
            let mut data = child.data_mut();
            node::set_node_parent(&mut data[..], PageId::INVALID)?;
        }
        self.root_page_id = child_pid;
        self.publish_root_update(child_pid)?;
        drop(root);
        self.pool.delete(root_pid)?;
        Ok(())
    }

    // ------------------------------------------------------------ helpers

    fn destroy_node(&mut self, pid: PageId) -> DbResult<()> {
        let children = {
            let guard = self.pool.fetch(pid)?;
            let data = guard.data();
            if node::page_type(&data[..]) == PAGE_TYPE_INTERNAL {
                InternalRef::<N>::new(&data[..]).children()?
            } else {
                Vec::new()
            }
        };
        for child in children {
            self.destroy_node(child)?;
        }
        if !self.pool.delete(pid)? {
            return Err(DbError::Storage(format!(
                "index node {:?} still pinned during destroy",
                pid
            )));
        }
        Ok(())
    }

    /// Records a brand-new root for this index, or repoints an existing
    /// entry.
    fn publish_root_entry(&self, root: PageId) -> DbResult<()> {
        let index_id = self.index_id;
        let page = self.pool.fetch(INDEX_ROOTS_PAGE)?;
        let mut data = page.data_mut();
        let mut view = IndexRootsMut::new(&mut data[..]);
        match view.insert(index_id, root) {
            Err(DbError::AlreadyExists(_)) => view.update(index_id, root),
            other => other,
        }
    }

    fn publish_root_update(&self, root: PageId) -> DbResult<()> {
        let page = self.pool.fetch(INDEX_ROOTS_PAGE)?;
        let mut data = page.data_mut();
        IndexRootsMut::new(&mut data[..]).update(self.index_id, root)
    }
}

/// Ordered iterator over the leaf chain. Holds the current leaf pinned
/// between steps; the next leaf is pinned before the current one is
/// released.
pub struct TreeIter<const N: usize> {
    pool: Arc<BufferPool>,
    leaf: Option<PageGuard>,
    idx: u32,
}

impl<const N: usize> Iterator for TreeIter<N> {
    type Item = DbResult<(GenericKey<N>, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf = self.leaf.as_ref()?;
            let step = {
                let data = leaf.data();
                let view = LeafRef::<N>::new(&data[..]);
                let size = match view.size() {
                    Ok(size) => size,
                    Err(e) => return Some(Err(e)),
                };
                if self.idx < size {
                    Some((view.key_at(self.idx), view.rid_at(self.idx)))
                } else {
                    None
                }
            };
            match step {
                Some(entry) => {
                    self.idx += 1;
                    return Some(Ok(entry));
                }
                None => {
                    let next_pid = {
                        let data = leaf.data();
                        LeafRef::<N>::new(&data[..]).next_page_id()
                    };
                    if !next_pid.is_valid() {
                        self.leaf = None;
                        return None;
                    }
                    // Pin the successor before releasing the current leaf.
                    match self.pool.fetch(next_pid) {
                        Ok(next) => {
                            self.leaf = Some(next);
                            self.idx = 0;
                        }
                        Err(e) => {
                            self.leaf = None;
                            return Some(Err(e));
                        }
                    }
                }
            }
        }
    }
}
