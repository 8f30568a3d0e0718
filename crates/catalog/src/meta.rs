//! On-disk metadata records of the catalog, all magic-guarded.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut};

use common::{DbError, DbResult, IndexId, PageId, TableId};
use record::Schema;

pub const CATALOG_MAGIC: u32 = 0x4341_544D;
pub const TABLE_META_MAGIC: u32 = 0x5442_4C4D;
pub const INDEX_META_MAGIC: u32 = 0x4958_4D45;

fn check_magic(buf: &mut &[u8], expect: u32, what: &str) -> DbResult<()> {
    if buf.remaining() < 4 {
        return Err(DbError::CorruptMetadata(format!("truncated {what}")));
    }
    let magic = buf.get_u32_le();
    if magic != expect {
        return Err(DbError::CorruptMetadata(format!(
            "{what} magic mismatch: {magic:#010x}"
        )));
    }
    Ok(())
}

fn get_string(buf: &mut &[u8], what: &str) -> DbResult<String> {
    if buf.remaining() < 4 {
        return Err(DbError::CorruptMetadata(format!("truncated {what}")));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(DbError::CorruptMetadata(format!("truncated {what}")));
    }
    let s = String::from_utf8(buf[..len].to_vec())
        .map_err(|_| DbError::CorruptMetadata(format!("{what} is not UTF-8")))?;
    buf.advance(len);
    Ok(s)
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Contents of the catalog meta page: where each table's and index's
/// metadata record lives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatalogMeta {
    pub table_meta_pages: BTreeMap<TableId, PageId>,
    pub index_meta_pages: BTreeMap<IndexId, PageId>,
}

impl CatalogMeta {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(CATALOG_MAGIC);
        buf.put_u32_le(self.table_meta_pages.len() as u32);
        for (table, page) in &self.table_meta_pages {
            buf.put_u32_le(table.0);
            buf.put_i32_le(page.0);
        }
        buf.put_u32_le(self.index_meta_pages.len() as u32);
        for (index, page) in &self.index_meta_pages {
            buf.put_u32_le(index.0);
            buf.put_i32_le(page.0);
        }
    }

    pub fn decode(buf: &mut &[u8]) -> DbResult<Self> {
        check_magic(buf, CATALOG_MAGIC, "catalog meta")?;
        let mut meta = CatalogMeta::default();
        let tables = buf.get_u32_le();
        for _ in 0..tables {
            let table = TableId(buf.get_u32_le());
            let page = PageId(buf.get_i32_le());
            meta.table_meta_pages.insert(table, page);
        }
        let indexes = buf.get_u32_le();
        for _ in 0..indexes {
            let index = IndexId(buf.get_u32_le());
            let page = PageId(buf.get_i32_le());
            meta.index_meta_pages.insert(index, page);
        }
        Ok(meta)
    }
}

/// Durable description of one table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableMetadata {
    pub table_id: TableId,
    pub name: String,
    pub first_page_id: PageId,
    pub schema: Schema,
}

impl TableMetadata {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(TABLE_META_MAGIC);
        buf.put_u32_le(self.table_id.0);
        put_string(buf, &self.name);
        buf.put_i32_le(self.first_page_id.0);
        self.schema.encode(buf);
    }

    pub fn decode(buf: &mut &[u8]) -> DbResult<Self> {
        check_magic(buf, TABLE_META_MAGIC, "table metadata")?;
        let table_id = TableId(buf.get_u32_le());
        let name = get_string(buf, "table name")?;
        let first_page_id = PageId(buf.get_i32_le());
        let schema = Schema::decode(buf)?;
        Ok(Self {
            table_id,
            name,
            first_page_id,
            schema,
        })
    }
}

/// Durable description of one index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexMetadata {
    pub index_id: IndexId,
    pub name: String,
    pub table_id: TableId,
    /// Positions of the key columns within the owning table's schema.
    pub key_map: Vec<u32>,
}

impl IndexMetadata {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(INDEX_META_MAGIC);
        buf.put_u32_le(self.index_id.0);
        put_string(buf, &self.name);
        buf.put_u32_le(self.table_id.0);
        buf.put_u32_le(self.key_map.len() as u32);
        for pos in &self.key_map {
            buf.put_u32_le(*pos);
        }
    }

    pub fn decode(buf: &mut &[u8]) -> DbResult<Self> {
        check_magic(buf, INDEX_META_MAGIC, "index metadata")?;
        let index_id = IndexId(buf.get_u32_le());
        let name = get_string(buf, "index name")?;
        let table_id = TableId(buf.get_u32_le());
        let count = buf.get_u32_le();
        let key_map = (0..count).map(|_| buf.get_u32_le()).collect();
        Ok(Self {
            index_id,
            name,
            table_id,
            key_map,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use record::Column;
    use types::SqlType;

    #[test]
    fn catalog_meta_round_trip() {
        let mut meta = CatalogMeta::default();
        meta.table_meta_pages.insert(TableId(1), PageId(5));
        meta.table_meta_pages.insert(TableId(2), PageId(9));
        meta.index_meta_pages.insert(IndexId(1), PageId(12));

        let mut buf = Vec::new();
        meta.encode(&mut buf);
        assert_eq!(CatalogMeta::decode(&mut buf.as_slice()).unwrap(), meta);
    }

    #[test]
    fn table_metadata_round_trip() {
        let meta = TableMetadata {
            table_id: TableId(3),
            name: "users".into(),
            first_page_id: PageId(17),
            schema: Schema::new(vec![
                Column::new("id", SqlType::Int, 0).not_null().unique(),
                Column::new("name", SqlType::Char(32), 1),
            ]),
        };
        let mut buf = Vec::new();
        meta.encode(&mut buf);
        assert_eq!(TableMetadata::decode(&mut buf.as_slice()).unwrap(), meta);
    }

    #[test]
    fn index_metadata_round_trip() {
        let meta = IndexMetadata {
            index_id: IndexId(4),
            name: "users_pk".into(),
            table_id: TableId(3),
            key_map: vec![0, 2],
        };
        let mut buf = Vec::new();
        meta.encode(&mut buf);
        assert_eq!(IndexMetadata::decode(&mut buf.as_slice()).unwrap(), meta);
    }

    #[test]
    fn magic_mismatch_is_corrupt_metadata() {
        let meta = CatalogMeta::default();
        let mut buf = Vec::new();
        meta.encode(&mut buf);
        buf[1] ^= 0xFF;
        assert!(matches!(
            CatalogMeta::decode(&mut buf.as_slice()),
            Err(DbError::CorruptMetadata(_))
        ));
    }
}
