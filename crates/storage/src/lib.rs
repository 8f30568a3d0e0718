//! Tuple storage: slotted pages and the page-linked table heap.

mod heap;
mod page;


pub use heap::{TableHeap, TableIter};
pub use page::{MAX_TUPLE_BYTES, TablePageMut, TablePageRef, UpdateStatus};
