use std::cmp::Ordering;
use std::fmt;

/// Column type of the engine: 32-bit integers, 32-bit floats, and
/// fixed-width character strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SqlType {
    Int,
    Float,
    /// Fixed-width character column; the parameter is the declared width in
    /// bytes.
    Char(u32),
}

impl SqlType {
    /// On-disk byte length of a non-null value of this type.
    pub fn byte_len(&self) -> u32 {
        match self {
            SqlType::Int | SqlType::Float => 4,
            SqlType::Char(n) => *n,
        }
    }

    /// One-byte tag used by the row codec.
    pub fn tag(&self) -> u8 {
        match self {
            SqlType::Int => 1,
            SqlType::Float => 2,
            SqlType::Char(_) => 3,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Int => write!(f, "int"),
            SqlType::Float => write!(f, "float"),
            SqlType::Char(n) => write!(f, "char({n})"),
        }
    }
}

/// A typed field value with an explicit null marker.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Int(i32),
    Float(f32),
    Char(String),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value can be stored in a column of type `ty`.
    /// Null is compatible with every type; the nullable flag is checked by
    /// the caller.
    pub fn fits(&self, ty: &SqlType) -> bool {
        match (self, ty) {
            (Value::Null, _) => true,
            (Value::Int(_), SqlType::Int) => true,
            (Value::Float(_), SqlType::Float) => true,
            (Value::Char(s), SqlType::Char(n)) => s.len() <= *n as usize,
            _ => false,
        }
    }

    /// Total order over comparable values. Ints and floats compare
    /// numerically; chars compare lexicographically. Comparisons involving
    /// null or mismatched kinds yield `None` (SQL three-valued logic
    /// collapses to "no match" at the predicate layer).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f32).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f32)),
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "{v}"),
            Value::Null => write!(f, "NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering::{Equal, Greater, Less};

    #[test]
    fn byte_lengths() {
        assert_eq!(SqlType::Int.byte_len(), 4);
        assert_eq!(SqlType::Float.byte_len(), 4);
        assert_eq!(SqlType::Char(64).byte_len(), 64);
    }

    #[test]
    fn comparisons_are_numeric_across_int_and_float() {
        assert_eq!(Value::Int(1).compare(&Value::Int(2)), Some(Less));
        assert_eq!(Value::Int(3).compare(&Value::Float(2.5)), Some(Greater));
        assert_eq!(Value::Float(2.0).compare(&Value::Int(2)), Some(Equal));
        assert_eq!(
            Value::Char("a".into()).compare(&Value::Char("b".into())),
            Some(Less)
        );
    }

    #[test]
    fn null_and_cross_kind_comparisons_are_undefined() {
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
        assert_eq!(Value::Int(1).compare(&Value::Null), None);
        assert_eq!(Value::Int(1).compare(&Value::Char("1".into())), None);
    }

    #[test]
    fn fits_checks_kind_and_char_width() {
        assert!(Value::Int(7).fits(&SqlType::Int));
        assert!(!Value::Int(7).fits(&SqlType::Float));
        assert!(Value::Char("abc".into()).fits(&SqlType::Char(3)));
        assert!(!Value::Char("abcd".into()).fits(&SqlType::Char(3)));
        assert!(Value::Null.fits(&SqlType::Char(1)));
    }

    #[test]
    fn serde_round_trip_stability() {
        let vals = vec![
            Value::Int(-42),
            Value::Float(1.5),
            Value::Char("Ada".into()),
            Value::Null,
        ];

        let json = serde_json::to_string(&vals).unwrap();
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();

        assert_eq!(vals, back);
    }

    proptest! {
        // Order antisymmetry over ints
        #[test]
        fn order_is_antisymmetric(i in any::<i32>(), j in any::<i32>()) {
            let a = Value::Int(i);
            let b = Value::Int(j);
            match (a.compare(&b), b.compare(&a)) {
                (Some(o1), Some(o2)) => prop_assert_eq!(o1, o2.reverse()),
                _ => prop_assert!(false),
            }
        }

        // Char comparisons align with standard string ordering
        #[test]
        fn char_cmp_matches_std(a in ".*", b in ".*") {
            let va = Value::Char(a.clone());
            let vb = Value::Char(b.clone());
            prop_assert_eq!(va.compare(&vb), Some(a.cmp(&b)));
        }
    }
}
