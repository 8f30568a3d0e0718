use super::*;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn engine(dir: &tempfile::TempDir) -> ExecuteEngine {
    ExecuteEngine::new(dir.path().join("data"), 64).unwrap()
}

fn run(engine: &mut ExecuteEngine, sql: &str) -> DbResult<ExecResult> {
    engine.execute(parser::parse(sql)?)
}

fn ok(engine: &mut ExecuteEngine, sql: &str) -> ExecResult {
    run(engine, sql).unwrap_or_else(|e| panic!("{sql}: {e}"))
}

fn batch_rows(result: ExecResult) -> Vec<Vec<Value>> {
    match result {
        ExecResult::Batch { rows, .. } => rows,
        other => panic!("expected a batch, got {other:?}"),
    }
}

fn setup_accounts(engine: &mut ExecuteEngine) {
    ok(engine, "create database bank;");
    ok(engine, "use bank;");
    ok(
        engine,
        "create table account (id int primary key, name char(24), balance float);",
    );
    for (id, name, balance) in [
        (1, "ada", 10.0),
        (2, "grace", 20.5),
        (3, "edsger", -3.25),
        (4, "barbara", 0.0),
    ] {
        ok(
            engine,
            &format!("insert into account values ({id}, '{name}', {balance});"),
        );
    }
}

#[test]
fn database_lifecycle() {
    let dir = tempdir().unwrap();
    let mut engine = engine(&dir);

    ok(&mut engine, "create database school;");
    ok(&mut engine, "create database bank;");
    let err = run(&mut engine, "create database bank;").unwrap_err();
    assert!(matches!(err, DbError::AlreadyExists(_)));

    let rows = batch_rows(ok(&mut engine, "show databases;"));
    assert_eq!(
        rows,
        vec![
            vec![Value::Char("bank".into())],
            vec![Value::Char("school".into())]
        ]
    );

    ok(&mut engine, "drop database school;");
    assert!(matches!(
        run(&mut engine, "use school;").unwrap_err(),
        DbError::NotFound(_)
    ));
    assert!(matches!(
        run(&mut engine, "show tables;").unwrap_err(),
        DbError::NotFound(_)
    ));
}

#[test]
fn select_with_predicates() {
    let dir = tempdir().unwrap();
    let mut engine = engine(&dir);
    setup_accounts(&mut engine);

    // Point query through the primary-key index.
    let rows = batch_rows(ok(
        &mut engine,
        "select name from account where id = 2;",
    ));
    assert_eq!(rows, vec![vec![Value::Char("grace".into())]]);

    // Range predicates fall back to a scan.
    let rows = batch_rows(ok(
        &mut engine,
        "select id from account where balance >= 0 and id < 4;",
    ));
    assert_eq!(rows, vec![vec![Value::Int(1)], vec![Value::Int(2)]]);

    // OR union keeps (page, slot) order without duplicates.
    let rows = batch_rows(ok(
        &mut engine,
        "select id from account where id = 1 or balance < 0 or id = 1;",
    ));
    assert_eq!(rows, vec![vec![Value::Int(1)], vec![Value::Int(3)]]);

    let rows = batch_rows(ok(&mut engine, "select * from account;"));
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].len(), 3);

    assert!(matches!(
        run(&mut engine, "select nope from account;").unwrap_err(),
        DbError::NotFound(_)
    ));
}

#[test]
fn unique_index_rejects_duplicate_keys() {
    let dir = tempdir().unwrap();
    let mut engine = engine(&dir);
    setup_accounts(&mut engine);

    let err = run(
        &mut engine,
        "insert into account values (2, 'impostor', 1.0);",
    )
    .unwrap_err();
    assert!(matches!(err, DbError::AlreadyExists(_)));

    // The failed insert left no trace: scan and index agree.
    let rows = batch_rows(ok(&mut engine, "select * from account;"));
    assert_eq!(rows.len(), 4);
    let rows = batch_rows(ok(
        &mut engine,
        "select name from account where id = 2;",
    ));
    assert_eq!(rows, vec![vec![Value::Char("grace".into())]]);
}

#[test]
fn hundred_point_lookups_through_the_index() {
    let dir = tempdir().unwrap();
    let mut engine = engine(&dir);
    ok(&mut engine, "create database load;");
    ok(&mut engine, "use load;");
    ok(
        &mut engine,
        "create table nums (n int primary key, twice int);",
    );
    for n in 0..100 {
        ok(
            &mut engine,
            &format!("insert into nums values ({n}, {});", n * 2),
        );
    }
    for n in 0..100 {
        let rows = batch_rows(ok(
            &mut engine,
            &format!("select twice from nums where n = {n};"),
        ));
        assert_eq!(rows, vec![vec![Value::Int(n * 2)]]);
    }
}

#[test]
fn constraint_violations() {
    let dir = tempdir().unwrap();
    let mut engine = engine(&dir);
    setup_accounts(&mut engine);

    // Arity.
    assert!(matches!(
        run(&mut engine, "insert into account values (9);").unwrap_err(),
        DbError::Constraint(_)
    ));
    // Null into the non-nullable primary key.
    assert!(matches!(
        run(
            &mut engine,
            "insert into account values (null, 'x', 0.0);"
        )
        .unwrap_err(),
        DbError::Constraint(_)
    ));
    // Type mismatch.
    assert!(matches!(
        run(
            &mut engine,
            "insert into account values (5, 6, 0.0);"
        )
        .unwrap_err(),
        DbError::Constraint(_)
    ));
    // Char wider than the column.
    assert!(matches!(
        run(
            &mut engine,
            "insert into account values (5, 'this name is far wider than twenty-four bytes', 0.0);"
        )
        .unwrap_err(),
        DbError::Constraint(_)
    ));
}

#[test]
fn delete_maintains_heap_and_indexes() {
    let dir = tempdir().unwrap();
    let mut engine = engine(&dir);
    setup_accounts(&mut engine);

    assert_eq!(
        ok(&mut engine, "delete from account where id = 2;"),
        ExecResult::Affected(1)
    );
    assert_eq!(
        batch_rows(ok(&mut engine, "select id from account where id = 2;")),
        Vec::<Vec<Value>>::new()
    );
    let rows = batch_rows(ok(&mut engine, "select id from account;"));
    assert_eq!(rows.len(), 3);

    // The freed key is insertable again.
    ok(&mut engine, "insert into account values (2, 'back', 7.5);");
    assert_eq!(
        batch_rows(ok(&mut engine, "select name from account where id = 2;")),
        vec![vec![Value::Char("back".into())]]
    );

    assert_eq!(
        ok(&mut engine, "delete from account;"),
        ExecResult::Affected(4)
    );
    assert_eq!(
        batch_rows(ok(&mut engine, "select * from account;")),
        Vec::<Vec<Value>>::new()
    );
}

#[test]
fn update_rewrites_rows_and_index_entries() {
    let dir = tempdir().unwrap();
    let mut engine = engine(&dir);
    setup_accounts(&mut engine);

    // Non-key update.
    assert_eq!(
        ok(
            &mut engine,
            "update account set balance = 99.5 where id = 1;"
        ),
        ExecResult::Affected(1)
    );
    assert_eq!(
        batch_rows(ok(
            &mut engine,
            "select balance from account where id = 1;"
        )),
        vec![vec![Value::Float(99.5)]]
    );

    // Key update moves the index entry.
    ok(&mut engine, "update account set id = 10 where id = 1;");
    assert_eq!(
        batch_rows(ok(&mut engine, "select id from account where id = 10;")),
        vec![vec![Value::Int(10)]]
    );
    assert_eq!(
        batch_rows(ok(&mut engine, "select id from account where id = 1;")),
        Vec::<Vec<Value>>::new()
    );

    // Updating onto an existing key is a unique violation.
    let err = run(&mut engine, "update account set id = 2 where id = 10;").unwrap_err();
    assert!(matches!(err, DbError::AlreadyExists(_)));
}

#[test]
fn index_ddl_and_listing() {
    let dir = tempdir().unwrap();
    let mut engine = engine(&dir);
    setup_accounts(&mut engine);

    ok(&mut engine, "create index account_name on account (name);");
    let rows = batch_rows(ok(&mut engine, "show indexes;"));
    assert_eq!(
        rows,
        vec![
            vec![
                Value::Char("account".into()),
                Value::Char("account_name".into()),
                Value::Char("name".into()),
            ],
            vec![
                Value::Char("account".into()),
                Value::Char("account_pk".into()),
                Value::Char("id".into()),
            ],
        ]
    );

    // The new index serves equality probes.
    let rows = batch_rows(ok(
        &mut engine,
        "select id from account where name = 'edsger';",
    ));
    assert_eq!(rows, vec![vec![Value::Int(3)]]);

    ok(&mut engine, "drop index account_name;");
    assert!(matches!(
        run(&mut engine, "drop index account_name;").unwrap_err(),
        DbError::NotFound(_)
    ));

    ok(&mut engine, "drop table account;");
    assert!(matches!(
        run(&mut engine, "select * from account;").unwrap_err(),
        DbError::NotFound(_)
    ));
}

#[test]
fn catalog_and_rows_survive_restart() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("data");
    {
        let mut engine = ExecuteEngine::new(&root, 64).unwrap();
        ok(&mut engine, "create database shop;");
        ok(&mut engine, "use shop;");
        ok(
            &mut engine,
            "create table items (sku int primary key, label char(16));",
        );
        ok(
            &mut engine,
            "create table orders (oid int primary key, sku int);",
        );
        ok(&mut engine, "create index orders_sku on orders (sku);");
        ok(&mut engine, "insert into items values (7, 'wrench');");
        ok(&mut engine, "insert into orders values (100, 7);");
        engine.shutdown().unwrap();
    }

    let mut engine = ExecuteEngine::new(&root, 64).unwrap();
    ok(&mut engine, "use shop;");

    let tables = batch_rows(ok(&mut engine, "show tables;"));
    assert_eq!(
        tables,
        vec![
            vec![Value::Char("items".into())],
            vec![Value::Char("orders".into())]
        ]
    );

    let indexes = batch_rows(ok(&mut engine, "show indexes;"));
    assert!(indexes.contains(&vec![
        Value::Char("orders".into()),
        Value::Char("orders_sku".into()),
        Value::Char("sku".into()),
    ]));

    // Rows inserted before the restart are visible through both paths.
    assert_eq!(
        batch_rows(ok(&mut engine, "select label from items where sku = 7;")),
        vec![vec![Value::Char("wrench".into())]]
    );
    ok(&mut engine, "insert into items values (8, 'hammer');");
    assert_eq!(
        batch_rows(ok(&mut engine, "select * from items;")).len(),
        2
    );
}
