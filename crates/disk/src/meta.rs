//! Disk file meta page (physical page 0): allocation counters per extent.

use bytes::{Buf, BufMut};
use common::{DbError, DbResult, MAX_EXTENTS, PAGE_SIZE};

/// In-memory copy of the meta page. `extent_used.len()` is the number of
/// extents in use; each entry counts the allocated data pages of that
/// extent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiskFileMeta {
    pub allocated_pages: u32,
    pub extent_used: Vec<u32>,
}

impl DiskFileMeta {
    pub fn decode(buf: &[u8]) -> DbResult<Self> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let mut cursor = buf;
        let allocated_pages = cursor.get_u32_le();
        let extent_count = cursor.get_u32_le();
        if extent_count > MAX_EXTENTS {
            return Err(DbError::CorruptMetadata(format!(
                "disk meta claims {extent_count} extents (max {MAX_EXTENTS})"
            )));
        }
        let extent_used = (0..extent_count).map(|_| cursor.get_u32_le()).collect();
        Ok(Self {
            allocated_pages,
            extent_used,
        })
    }

    pub fn encode(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        buf.fill(0);
        let mut cursor = &mut buf[..];
        cursor.put_u32_le(self.allocated_pages);
        cursor.put_u32_le(self.extent_used.len() as u32);
        for used in &self.extent_used {
            cursor.put_u32_le(*used);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let meta = DiskFileMeta {
            allocated_pages: 7,
            extent_used: vec![5, 2],
        };
        let mut buf = vec![0u8; PAGE_SIZE];
        meta.encode(&mut buf);
        assert_eq!(DiskFileMeta::decode(&buf).unwrap(), meta);
    }

    #[test]
    fn zeroed_page_decodes_as_empty() {
        let buf = vec![0u8; PAGE_SIZE];
        let meta = DiskFileMeta::decode(&buf).unwrap();
        assert_eq!(meta.allocated_pages, 0);
        assert!(meta.extent_used.is_empty());
    }

    #[test]
    fn rejects_absurd_extent_counts() {
        let mut buf = vec![0u8; PAGE_SIZE];
        (&mut buf[4..8]).copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            DiskFileMeta::decode(&buf),
            Err(DbError::CorruptMetadata(_))
        ));
    }
}
