//! Persistent B+-tree indexes over the buffer pool.
//!
//! Trees are parameterized by a fixed key width; [`open_index`] picks the
//! smallest supported width for a key schema and erases the parameter
//! behind the [`Index`] trait so the catalog can hold indexes of mixed
//! widths.

mod key;
mod node;
mod roots;
mod tree;


use std::sync::Arc;

use buffer::BufferPool;
use common::{DbError, DbResult, IndexId, RecordId};
use record::{Row, Schema};
use types::SqlType;

pub use key::{CmpFn, GenericKey, KeyComparator, SUPPORTED_KEY_SIZES};
pub use node::{internal_capacity, leaf_capacity};
pub use roots::{IndexRootsMut, lookup_root};
pub use tree::{BPlusTreeIndex, TreeIter};

/// Key-schema-driven index operations, independent of the key width.
pub trait Index {
    fn index_id(&self) -> IndexId;

    /// Inserts `(key columns of row, rid)`; duplicates fail with
    /// `AlreadyExists`.
    fn insert_entry(&mut self, key: &Row, rid: RecordId) -> DbResult<()>;

    /// Removes the entry for the key; `Ok(false)` when absent.
    fn remove_entry(&mut self, key: &Row) -> DbResult<bool>;

    /// Point lookup; at most one rid for a unique index.
    fn scan_key(&self, key: &Row) -> DbResult<Vec<RecordId>>;

    /// Deallocates the whole tree.
    fn destroy(&mut self) -> DbResult<()>;
}

impl<const N: usize> Index for BPlusTreeIndex<N> {
    fn index_id(&self) -> IndexId {
        BPlusTreeIndex::index_id(self)
    }

    fn insert_entry(&mut self, key: &Row, rid: RecordId) -> DbResult<()> {
        let key = GenericKey::from_row(key, self.key_schema())?;
        self.insert(&key, rid)
    }

    fn remove_entry(&mut self, key: &Row) -> DbResult<bool> {
        let key = GenericKey::from_row(key, self.key_schema())?;
        self.remove(&key)
    }

    fn scan_key(&self, key: &Row) -> DbResult<Vec<RecordId>> {
        let key = GenericKey::from_row(key, self.key_schema())?;
        Ok(self.get_value(&key)?.into_iter().collect())
    }

    fn destroy(&mut self) -> DbResult<()> {
        BPlusTreeIndex::destroy(self)
    }
}

/// Worst-case encoded size of a key row for this schema: rid and field
/// count, then per column a null byte, a type tag, and the payload (char
/// payloads carry a length prefix).
pub fn required_key_width(key_schema: &Schema) -> usize {
    12 + key_schema
        .columns()
        .iter()
        .map(|col| {
            2 + match col.ty {
                SqlType::Char(n) => 4 + n as usize,
                _ => 4,
            }
        })
        .sum::<usize>()
}

/// Smallest supported key width that can hold every key of the schema.
pub fn select_key_width(key_schema: &Schema) -> DbResult<usize> {
    let required = required_key_width(key_schema);
    SUPPORTED_KEY_SIZES
        .into_iter()
        .find(|&width| width >= required)
        .ok_or_else(|| {
            DbError::Unsupported(format!(
                "index key needs {required} bytes; the widest supported key is 64"
            ))
        })
}

/// Instantiates the tree at the width the key schema requires.
pub fn open_index(
    index_id: IndexId,
    pool: Arc<BufferPool>,
    key_schema: Arc<Schema>,
) -> DbResult<Box<dyn Index>> {
    let width = select_key_width(&key_schema)?;
    let comparator = KeyComparator::new(key_schema);
    Ok(match width {
        4 => Box::new(BPlusTreeIndex::<4>::new(index_id, pool, comparator)?),
        8 => Box::new(BPlusTreeIndex::<8>::new(index_id, pool, comparator)?),
        16 => Box::new(BPlusTreeIndex::<16>::new(index_id, pool, comparator)?),
        32 => Box::new(BPlusTreeIndex::<32>::new(index_id, pool, comparator)?),
        64 => Box::new(BPlusTreeIndex::<64>::new(index_id, pool, comparator)?),
        other => {
            return Err(DbError::Unsupported(format!(
                "unsupported key width {other}"
            )));
        }
    })
}
