use std::sync::Arc;

use buffer::BufferPool;
use common::{DbError, DbResult, INDEX_ROOTS_PAGE, PageId, RecordId};
use disk::DiskManager;
use record::{Column, Row, Schema};
use tempfile::tempdir;
use types::{SqlType, Value};

use super::*;

fn fresh_pool(path: &std::path::Path) -> Arc<BufferPool> {
    let disk = DiskManager::open(path).unwrap();
    let pool = Arc::new(BufferPool::new(64, disk));
    let (meta, _a) = pool.new_page().unwrap();
    assert_eq!(meta, CATALOG_META_PAGE);
    let (roots, _b) = pool.new_page().unwrap();
    assert_eq!(roots, INDEX_ROOTS_PAGE);
    pool
}

fn reopen_pool(path: &std::path::Path) -> Arc<BufferPool> {
    let disk = DiskManager::open(path).unwrap();
    Arc::new(BufferPool::new(64, disk))
}

fn user_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", SqlType::Int, 0).not_null().unique(),
        Column::new("name", SqlType::Char(24), 1),
        Column::new("balance", SqlType::Float, 2),
    ])
}

fn user_row(id: i32, name: &str) -> Row {
    Row::new(vec![
        Value::Int(id),
        Value::Char(name.into()),
        Value::Float(id as f32 * 1.5),
    ])
}

#[test]
fn create_and_lookup_table() {
    let dir = tempdir().unwrap();
    let pool = fresh_pool(&dir.path().join("db"));
    let mut catalog = CatalogManager::init(Arc::clone(&pool)).unwrap();

    let table_id = catalog.create_table("users", user_schema()).unwrap();
    let table = catalog.get_table("users").unwrap();
    assert_eq!(table.table_id, table_id);
    assert_eq!(table.schema.column_index("name"), Some(1));
    assert_eq!(catalog.get_table_by_id(table_id).unwrap().name, "users");

    let err = catalog.create_table("users", user_schema()).unwrap_err();
    assert!(matches!(err, DbError::AlreadyExists(_)));
    assert!(pool.all_unpinned());
}

#[test]
fn create_index_validates_columns_and_bulk_loads() {
    let dir = tempdir().unwrap();
    let pool = fresh_pool(&dir.path().join("db"));
    let mut catalog = CatalogManager::init(Arc::clone(&pool)).unwrap();
    catalog.create_table("users", user_schema()).unwrap();

    // Seed rows before the index exists.
    let mut rids = Vec::new();
    {
        let table = catalog.get_table("users").unwrap();
        for i in 0..50 {
            let mut row = user_row(i, "ada");
            rids.push(table.heap.insert(&mut row).unwrap());
        }
    }

    let err = catalog
        .create_index("users", "bad", &["missing".into()])
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound(_)));

    catalog
        .create_index("users", "users_pk", &["id".into()])
        .unwrap();
    let info = catalog.get_index("users", "users_pk").unwrap();
    assert_eq!(info.key_map, vec![0]);
    assert_eq!(info.key_schema.len(), 1);

    // The bulk load made every existing row findable.
    for (i, rid) in rids.iter().enumerate() {
        let key = Row::new(vec![Value::Int(i as i32)]);
        assert_eq!(info.index.scan_key(&key).unwrap(), vec![*rid]);
    }

    let err = catalog
        .create_index("users", "users_pk", &["id".into()])
        .unwrap_err();
    assert!(matches!(err, DbError::AlreadyExists(_)));
    assert!(pool.all_unpinned());
}

#[test]
fn duplicate_rows_abort_index_creation() {
    let dir = tempdir().unwrap();
    let pool = fresh_pool(&dir.path().join("db"));
    let mut catalog = CatalogManager::init(Arc::clone(&pool)).unwrap();
    catalog.create_table("users", user_schema()).unwrap();
    {
        let table = catalog.get_table("users").unwrap();
        table.heap.insert(&mut user_row(1, "a")).unwrap();
        table.heap.insert(&mut user_row(1, "b")).unwrap();
    }

    let err = catalog
        .create_index("users", "users_pk", &["id".into()])
        .unwrap_err();
    assert!(matches!(err, DbError::AlreadyExists(_)));
    assert!(catalog.get_index("users", "users_pk").is_err());
    assert!(pool.all_unpinned());
}

#[test]
fn oversized_keys_are_unsupported() {
    let dir = tempdir().unwrap();
    let pool = fresh_pool(&dir.path().join("db"));
    let mut catalog = CatalogManager::init(Arc::clone(&pool)).unwrap();
    catalog
        .create_table(
            "docs",
            Schema::new(vec![Column::new("body", SqlType::Char(128), 0)]),
        )
        .unwrap();

    let err = catalog
        .create_index("docs", "docs_body", &["body".into()])
        .unwrap_err();
    assert!(matches!(err, DbError::Unsupported(_)));
}

#[test]
fn drop_table_cascades_through_indexes() {
    let dir = tempdir().unwrap();
    let pool = fresh_pool(&dir.path().join("db"));
    let mut catalog = CatalogManager::init(Arc::clone(&pool)).unwrap();
    catalog.create_table("users", user_schema()).unwrap();
    catalog
        .create_index("users", "users_pk", &["id".into()])
        .unwrap();
    catalog
        .create_index("users", "users_name", &["name".into()])
        .unwrap();

    catalog.drop_table("users").unwrap();
    assert!(matches!(
        catalog.get_table("users"),
        Err(DbError::NotFound(_))
    ));
    assert!(matches!(
        catalog.get_table_indexes("users"),
        Err(DbError::NotFound(_))
    ));
    assert!(matches!(
        catalog.drop_table("users"),
        Err(DbError::NotFound(_))
    ));
    assert!(pool.all_unpinned());
}

#[test]
fn catalog_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    let rid_of_7: RecordId;
    {
        let pool = fresh_pool(&path);
        let mut catalog = CatalogManager::init(Arc::clone(&pool)).unwrap();
        catalog.create_table("users", user_schema()).unwrap();
        catalog
            .create_table(
                "orders",
                Schema::new(vec![
                    Column::new("order_id", SqlType::Int, 0).not_null().unique(),
                    Column::new("user_id", SqlType::Int, 1),
                ]),
            )
            .unwrap();
        catalog
            .create_index("users", "users_pk", &["id".into()])
            .unwrap();
        catalog
            .create_index("orders", "orders_pk", &["order_id".into()])
            .unwrap();

        let table = catalog.get_table("users").unwrap();
        for i in 0..20 {
            table.heap.insert(&mut user_row(i, "bo")).unwrap();
        }
        let mut row = user_row(777, "persisted");
        rid_of_7 = table.heap.insert(&mut row).unwrap();
        pool.flush_all().unwrap();
    }

    let pool = reopen_pool(&path);
    let catalog = CatalogManager::open(Arc::clone(&pool)).unwrap();

    let names: Vec<&str> = catalog
        .get_tables()
        .iter()
        .map(|t| t.name.as_str())
        .collect();
    assert_eq!(names, vec!["orders", "users"]);

    let info = catalog.get_index("users", "users_pk").unwrap();
    assert_eq!(info.name, "users_pk");
    assert_eq!(info.key_map, vec![0]);

    // Data and index state both survived.
    let table = catalog.get_table("users").unwrap();
    assert_eq!(table.heap.iter().count(), 21);
    let key = Row::new(vec![Value::Int(777)]);
    assert_eq!(info.index.scan_key(&key).unwrap(), vec![rid_of_7]);
    assert_eq!(
        table.heap.get(rid_of_7).unwrap().values[1],
        Value::Char("persisted".into())
    );
}

#[test]
fn new_tables_after_reopen_get_fresh_ids() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    let first_id;
    {
        let pool = fresh_pool(&path);
        let mut catalog = CatalogManager::init(Arc::clone(&pool)).unwrap();
        first_id = catalog.create_table("users", user_schema()).unwrap();
        pool.flush_all().unwrap();
    }

    let pool = reopen_pool(&path);
    let mut catalog = CatalogManager::open(Arc::clone(&pool)).unwrap();
    let second_id = catalog
        .create_table(
            "orders",
            Schema::new(vec![Column::new("id", SqlType::Int, 0)]),
        )
        .unwrap();
    assert!(second_id.0 > first_id.0);
}

#[test]
fn index_maintenance_via_mut_access() {
    let dir = tempdir().unwrap();
    let pool = fresh_pool(&dir.path().join("db"));
    let mut catalog = CatalogManager::init(Arc::clone(&pool)).unwrap();
    catalog.create_table("users", user_schema()).unwrap();
    catalog
        .create_index("users", "users_pk", &["id".into()])
        .unwrap();

    let rid = {
        let (table, mut indexes) = catalog.table_and_indexes_mut("users").unwrap();
        let mut row = user_row(5, "eve");
        let rid = table.heap.insert(&mut row).unwrap();
        for info in &mut indexes {
            let key = info.key_row(&row).unwrap();
            info.index.insert_entry(&key, rid).unwrap();
        }
        rid
    };

    let info = catalog.get_index("users", "users_pk").unwrap();
    let found: DbResult<Vec<RecordId>> = info.index.scan_key(&Row::new(vec![Value::Int(5)]));
    assert_eq!(found.unwrap(), vec![rid]);
    assert_eq!(rid.page_id, PageId(2));
    assert!(pool.all_unpinned());
}
