//! Fixed-width index keys.
//!
//! A key is the row codec serialization of the index's key columns, padded
//! with zeroes to one of the supported widths. Ordering is defined by the
//! comparator, which decodes both sides with the key schema and compares
//! field by field.

use std::cmp::Ordering;
use std::sync::Arc;

use common::{DbError, DbResult};
use record::{Row, Schema};

/// Key widths a B+-tree can be instantiated with.
pub const SUPPORTED_KEY_SIZES: [usize; 5] = [4, 8, 16, 32, 64];

/// Borrowed comparison callback threaded through the node algorithms.
pub type CmpFn<'a, const N: usize> =
    &'a dyn Fn(&GenericKey<N>, &GenericKey<N>) -> DbResult<Ordering>;

/// A fixed-width, schema-encoded index key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    /// Serializes the key columns of `row` into a fixed buffer. Fails when
    /// the encoding does not fit the key width.
    pub fn from_row(row: &Row, key_schema: &Schema) -> DbResult<Self> {
        let bytes = row.encode(key_schema)?;
        if bytes.len() > N {
            return Err(DbError::Unsupported(format!(
                "key of {} bytes exceeds the {N}-byte key width",
                bytes.len()
            )));
        }
        let mut data = [0u8; N];
        data[..bytes.len()].copy_from_slice(&bytes);
        Ok(Self { data })
    }

    pub fn from_slice(slice: &[u8]) -> Self {
        debug_assert_eq!(slice.len(), N);
        let mut data = [0u8; N];
        data.copy_from_slice(slice);
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Decodes the key back into its column values.
    pub fn to_row(&self, key_schema: &Schema) -> DbResult<Row> {
        Row::decode(&self.data, key_schema)
    }
}

/// Field-wise total order over keys of one key schema.
#[derive(Clone)]
pub struct KeyComparator {
    key_schema: Arc<Schema>,
}

impl KeyComparator {
    pub fn new(key_schema: Arc<Schema>) -> Self {
        Self { key_schema }
    }

    pub fn key_schema(&self) -> &Arc<Schema> {
        &self.key_schema
    }

    pub fn compare<const N: usize>(
        &self,
        a: &GenericKey<N>,
        b: &GenericKey<N>,
    ) -> DbResult<Ordering> {
        let left = a.to_row(&self.key_schema)?;
        let right = b.to_row(&self.key_schema)?;
        for (lv, rv) in left.values.iter().zip(&right.values) {
            let ord = match (lv.is_null(), rv.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => lv.compare(rv).ok_or_else(|| {
                    DbError::Storage("incomparable values in index key".into())
                })?,
            };
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use record::Column;
    use types::{SqlType, Value};

    fn int_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![Column::new("id", SqlType::Int, 0)]))
    }

    fn key(v: i32, schema: &Schema) -> GenericKey<32> {
        GenericKey::from_row(&Row::new(vec![Value::Int(v)]), schema).unwrap()
    }

    #[test]
    fn orders_ints_numerically() {
        let schema = int_schema();
        let cmp = KeyComparator::new(Arc::clone(&schema));
        let a = key(-5, &schema);
        let b = key(3, &schema);
        assert_eq!(cmp.compare(&a, &b).unwrap(), Ordering::Less);
        assert_eq!(cmp.compare(&b, &a).unwrap(), Ordering::Greater);
        assert_eq!(cmp.compare(&a, &a).unwrap(), Ordering::Equal);
    }

    #[test]
    fn composite_keys_compare_lexicographically() {
        let schema = Arc::new(Schema::new(vec![
            Column::new("a", SqlType::Int, 0),
            Column::new("b", SqlType::Char(8), 1),
        ]));
        let cmp = KeyComparator::new(Arc::clone(&schema));
        let mk = |a: i32, b: &str| {
            GenericKey::<32>::from_row(
                &Row::new(vec![Value::Int(a), Value::Char(b.into())]),
                &schema,
            )
            .unwrap()
        };
        assert_eq!(
            cmp.compare(&mk(1, "zz"), &mk(2, "aa")).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            cmp.compare(&mk(2, "aa"), &mk(2, "ab")).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn nulls_sort_first() {
        let schema = int_schema();
        let cmp = KeyComparator::new(Arc::clone(&schema));
        let null_key =
            GenericKey::<32>::from_row(&Row::new(vec![Value::Null]), &schema).unwrap();
        let one = key(1, &schema);
        assert_eq!(cmp.compare(&null_key, &one).unwrap(), Ordering::Less);
    }

    #[test]
    fn oversized_keys_are_rejected() {
        let schema = Arc::new(Schema::new(vec![Column::new(
            "s",
            SqlType::Char(64),
            0,
        )]));
        let row = Row::new(vec![Value::Char("x".repeat(60))]);
        assert!(matches!(
            GenericKey::<16>::from_row(&row, &schema),
            Err(DbError::Unsupported(_))
        ));
    }
}
