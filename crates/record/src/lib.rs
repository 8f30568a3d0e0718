//! Column, schema, and row representations plus their on-disk codecs.
//!
//! Every persisted structure opens with a 32-bit magic number; decoding
//! validates it and reports `CorruptMetadata` on mismatch. All integers are
//! little-endian.

use ahash::RandomState;
use bytes::{Buf, BufMut};
use hashbrown::HashMap;

use common::{DbError, DbResult, PageId, RecordId};
use types::{SqlType, Value};

pub const SCHEMA_MAGIC: u32 = 0x5343_484D;
pub const COLUMN_MAGIC: u32 = 0x434F_4C4D;

const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_CHAR: u8 = 3;

fn need(buf: &&[u8], n: usize, what: &str) -> DbResult<()> {
    if buf.remaining() < n {
        return Err(DbError::Storage(format!("truncated {what}")));
    }
    Ok(())
}

/// One column of a table schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: SqlType,
    /// Zero-based position within the owning table's schema. Key schemas
    /// keep the base-table positions of the columns they borrow.
    pub position: u32,
    pub nullable: bool,
    pub unique: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: SqlType, position: u32) -> Self {
        Self {
            name: name.into(),
            ty,
            position,
            nullable: true,
            unique: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// On-disk byte length of a non-null value.
    pub fn byte_len(&self) -> u32 {
        self.ty.byte_len()
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(COLUMN_MAGIC);
        buf.put_u32_le(self.name.len() as u32);
        buf.put_slice(self.name.as_bytes());
        buf.put_u32_le(self.ty.tag() as u32);
        buf.put_u32_le(self.byte_len());
        buf.put_u32_le(self.position);
        buf.put_u32_le(self.nullable as u32);
        buf.put_u32_le(self.unique as u32);
    }

    pub fn decode(buf: &mut &[u8]) -> DbResult<Self> {
        need(buf, 8, "column header")?;
        let magic = buf.get_u32_le();
        if magic != COLUMN_MAGIC {
            return Err(DbError::CorruptMetadata(format!(
                "column magic mismatch: {magic:#010x}"
            )));
        }
        let name_len = buf.get_u32_le() as usize;
        need(buf, name_len, "column name")?;
        let name = String::from_utf8(buf[..name_len].to_vec())
            .map_err(|_| DbError::CorruptMetadata("column name is not UTF-8".into()))?;
        buf.advance(name_len);
        need(buf, 20, "column fields")?;
        let tag = buf.get_u32_le();
        let length = buf.get_u32_le();
        let ty = match tag as u8 {
            TAG_INT => SqlType::Int,
            TAG_FLOAT => SqlType::Float,
            TAG_CHAR => SqlType::Char(length),
            other => {
                return Err(DbError::CorruptMetadata(format!(
                    "unknown column type tag {other}"
                )));
            }
        };
        let position = buf.get_u32_le();
        let nullable = buf.get_u32_le() != 0;
        let unique = buf.get_u32_le() != 0;
        Ok(Self {
            name,
            ty,
            position,
            nullable,
            unique,
        })
    }
}

/// Ordered sequence of columns with a name lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
    by_name: HashMap<String, usize, RandomState>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        let by_name = columns
            .iter()
            .enumerate()
            .map(|(idx, col)| (col.name.clone(), idx))
            .collect();
        Self { columns, by_name }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx)
    }

    /// Index of a column within this schema's ordering.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Shallow projection: a new schema borrowing the selected column
    /// descriptors by value, in the given order. Used for index key
    /// schemas; the columns keep their base-table positions.
    pub fn project(&self, positions: &[u32]) -> DbResult<Schema> {
        let mut columns = Vec::with_capacity(positions.len());
        for &pos in positions {
            let col = self.columns.get(pos as usize).ok_or_else(|| {
                DbError::NotFound(format!("column position {pos} out of range"))
            })?;
            columns.push(col.clone());
        }
        Ok(Schema::new(columns))
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u32_le(SCHEMA_MAGIC);
        buf.put_u32_le(self.columns.len() as u32);
        for col in &self.columns {
            col.encode(buf);
        }
    }

    pub fn decode(buf: &mut &[u8]) -> DbResult<Self> {
        need(buf, 8, "schema header")?;
        let magic = buf.get_u32_le();
        if magic != SCHEMA_MAGIC {
            return Err(DbError::CorruptMetadata(format!(
                "schema magic mismatch: {magic:#010x}"
            )));
        }
        let count = buf.get_u32_le() as usize;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            columns.push(Column::decode(buf)?);
        }
        Ok(Schema::new(columns))
    }
}

/// A row: stable identifier plus one value per schema column.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    rid: RecordId,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            rid: RecordId::INVALID,
            values,
        }
    }

    pub fn with_rid(rid: RecordId, values: Vec<Value>) -> Self {
        Self { rid, values }
    }

    pub fn rid(&self) -> RecordId {
        self.rid
    }

    pub fn set_rid(&mut self, rid: RecordId) {
        self.rid = rid;
    }

    /// Values at the given positions, as a key row for an index. The
    /// original rid is preserved.
    pub fn project(&self, positions: &[u32]) -> DbResult<Row> {
        let mut values = Vec::with_capacity(positions.len());
        for &pos in positions {
            let value = self.values.get(pos as usize).ok_or_else(|| {
                DbError::NotFound(format!("field position {pos} out of range"))
            })?;
            values.push(value.clone());
        }
        Ok(Row::with_rid(self.rid, values))
    }

    /// Wire format: rid, field count, null bitmap (one byte per field),
    /// then a type tag per field followed by the payload of non-null
    /// fields.
    pub fn encode(&self, schema: &Schema) -> DbResult<Vec<u8>> {
        if self.values.len() != schema.len() {
            return Err(DbError::Constraint(format!(
                "row has {} values for a schema of {} columns",
                self.values.len(),
                schema.len()
            )));
        }
        let mut buf = Vec::with_capacity(16 + self.values.len() * 8);
        buf.put_i32_le(self.rid.page_id.0);
        buf.put_u32_le(self.rid.slot);
        buf.put_u32_le(self.values.len() as u32);
        for value in &self.values {
            buf.put_u8(value.is_null() as u8);
        }
        for (value, column) in self.values.iter().zip(schema.columns()) {
            match value {
                Value::Null => buf.put_u8(column.ty.tag()),
                Value::Int(v) => {
                    buf.put_u8(TAG_INT);
                    buf.put_i32_le(*v);
                }
                Value::Float(v) => {
                    buf.put_u8(TAG_FLOAT);
                    buf.put_f32_le(*v);
                }
                Value::Char(s) => {
                    buf.put_u8(TAG_CHAR);
                    buf.put_u32_le(s.len() as u32);
                    buf.put_slice(s.as_bytes());
                }
            }
        }
        Ok(buf)
    }

    pub fn decode(mut buf: &[u8], schema: &Schema) -> DbResult<Row> {
        let buf = &mut buf;
        need(buf, 12, "row header")?;
        let page_id = PageId(buf.get_i32_le());
        let slot = buf.get_u32_le();
        let count = buf.get_u32_le() as usize;
        if count != schema.len() {
            return Err(DbError::Storage(format!(
                "row has {count} fields for a schema of {} columns",
                schema.len()
            )));
        }
        need(buf, count, "row null bitmap")?;
        let nulls: Vec<bool> = (0..count).map(|_| buf.get_u8() != 0).collect();

        let mut values = Vec::with_capacity(count);
        for null in nulls {
            need(buf, 1, "field tag")?;
            let tag = buf.get_u8();
            if null {
                values.push(Value::Null);
                continue;
            }
            let value = match tag {
                TAG_INT => {
                    need(buf, 4, "int field")?;
                    Value::Int(buf.get_i32_le())
                }
                TAG_FLOAT => {
                    need(buf, 4, "float field")?;
                    Value::Float(buf.get_f32_le())
                }
                TAG_CHAR => {
                    need(buf, 4, "char length")?;
                    let len = buf.get_u32_le() as usize;
                    need(buf, len, "char field")?;
                    let s = String::from_utf8(buf[..len].to_vec())
                        .map_err(|_| DbError::Storage("char field is not UTF-8".into()))?;
                    buf.advance(len);
                    Value::Char(s)
                }
                other => {
                    return Err(DbError::Storage(format!("unknown field tag {other}")));
                }
            };
            values.push(value);
        }
        Ok(Row {
            rid: RecordId::new(page_id, slot),
            values,
        })
    }
}

#[cfg(test)]
mod tests;
