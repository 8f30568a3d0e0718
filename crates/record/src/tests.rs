use super::*;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn sample_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", SqlType::Int, 0).not_null().unique(),
        Column::new("name", SqlType::Char(64), 1),
        Column::new("account", SqlType::Float, 2),
    ])
}

#[test]
fn column_round_trip() {
    let col = Column::new("name", SqlType::Char(64), 1).not_null();
    let mut buf = Vec::new();
    col.encode(&mut buf);
    let back = Column::decode(&mut buf.as_slice()).unwrap();
    assert_eq!(back, col);
}

#[test]
fn schema_round_trip() {
    let schema = sample_schema();
    let mut buf = Vec::new();
    schema.encode(&mut buf);
    let back = Schema::decode(&mut buf.as_slice()).unwrap();
    assert_eq!(back, schema);
}

#[test]
fn schema_decode_rejects_bad_magic() {
    let schema = sample_schema();
    let mut buf = Vec::new();
    schema.encode(&mut buf);
    buf[0] ^= 0xFF;
    assert!(matches!(
        Schema::decode(&mut buf.as_slice()),
        Err(DbError::CorruptMetadata(_))
    ));
}

#[test]
fn column_decode_rejects_bad_magic() {
    let col = Column::new("id", SqlType::Int, 0);
    let mut buf = Vec::new();
    col.encode(&mut buf);
    buf[3] ^= 0x10;
    assert!(matches!(
        Column::decode(&mut buf.as_slice()),
        Err(DbError::CorruptMetadata(_))
    ));
}

#[test]
fn row_round_trip_with_nulls() {
    let schema = sample_schema();
    let row = Row::with_rid(
        RecordId::new(PageId(3), 7),
        vec![Value::Int(42), Value::Null, Value::Float(-1.25)],
    );
    let bytes = row.encode(&schema).unwrap();
    let back = Row::decode(&bytes, &schema).unwrap();
    assert_eq!(back, row);
    assert_eq!(back.rid(), RecordId::new(PageId(3), 7));
}

#[test]
fn row_encode_rejects_arity_mismatch() {
    let schema = sample_schema();
    let row = Row::new(vec![Value::Int(1)]);
    assert!(matches!(
        row.encode(&schema),
        Err(DbError::Constraint(_))
    ));
}

#[test]
fn row_decode_rejects_truncation() {
    let schema = sample_schema();
    let row = Row::new(vec![
        Value::Int(1),
        Value::Char("abc".into()),
        Value::Float(0.5),
    ]);
    let bytes = row.encode(&schema).unwrap();
    assert!(Row::decode(&bytes[..bytes.len() - 2], &schema).is_err());
}

#[test]
fn projection_borrows_columns_and_keeps_positions() {
    let schema = sample_schema();
    let key = schema.project(&[2, 0]).unwrap();
    assert_eq!(key.len(), 2);
    assert_eq!(key.column(0).unwrap().name, "account");
    assert_eq!(key.column(0).unwrap().position, 2);
    assert_eq!(key.column(1).unwrap().position, 0);
    assert!(schema.project(&[9]).is_err());
}

#[test]
fn column_index_lookup() {
    let schema = sample_schema();
    assert_eq!(schema.column_index("account"), Some(2));
    assert_eq!(schema.column_index("missing"), None);
}

proptest! {
    #[test]
    fn row_codec_round_trips(
        id in any::<i32>(),
        name in "[a-zA-Z0-9 ]{0,64}",
        account in any::<f32>().prop_filter("NaN breaks equality", |f| !f.is_nan()),
        null_name in any::<bool>(),
    ) {
        let schema = sample_schema();
        let name_value = if null_name { Value::Null } else { Value::Char(name) };
        let row = Row::with_rid(
            RecordId::new(PageId(1), 0),
            vec![Value::Int(id), name_value, Value::Float(account)],
        );
        let bytes = row.encode(&schema).unwrap();
        prop_assert_eq!(Row::decode(&bytes, &schema).unwrap(), row);
    }
}
