//! Statement execution: maps parsed statements onto the catalog, table
//! heaps, and indexes of the currently selected database.

mod predicate;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use log::{error, warn};

use btree::Index as _;
use common::{DbError, DbResult};
use database::Database;
use expr::Expr;
use parser::{ColumnDef, Statement};
use record::{Column, Row, Schema};
use types::Value;

use predicate::collect_rids;

const DB_FILE_EXT: &str = "db";

/// Outcome of one executed statement.
#[derive(Debug, PartialEq)]
pub enum ExecResult {
    /// A result set with column labels.
    Batch {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    /// Number of rows a DML statement touched.
    Affected(u64),
    /// DDL acknowledgement.
    Done(String),
}

/// Dispatches statements across the databases of one root directory.
pub struct ExecuteEngine {
    root: PathBuf,
    pool_pages: usize,
    databases: HashMap<String, Database>,
    current: Option<String>,
}

impl ExecuteEngine {
    pub fn new(root: impl Into<PathBuf>, pool_pages: usize) -> DbResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            pool_pages,
            databases: HashMap::new(),
            current: None,
        })
    }

    pub fn current_database(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Flushes every open database; called on `quit` and from `Drop`.
    pub fn shutdown(&mut self) -> DbResult<()> {
        for db in self.databases.values() {
            db.flush()?;
        }
        Ok(())
    }

    pub fn execute(&mut self, statement: Statement) -> DbResult<ExecResult> {
        match statement {
            Statement::CreateDatabase { name } => self.create_database(&name),
            Statement::DropDatabase { name } => self.drop_database(&name),
            Statement::ShowDatabases => self.show_databases(),
            Statement::UseDatabase { name } => self.use_database(&name),
            Statement::ShowTables => self.show_tables(),
            Statement::CreateTable {
                name,
                columns,
                primary_key,
            } => self.create_table(&name, columns, primary_key),
            Statement::DropTable { name } => {
                self.current_db()?.catalog_mut().drop_table(&name)?;
                Ok(ExecResult::Done(format!("table '{name}' dropped")))
            }
            Statement::ShowIndexes => self.show_indexes(),
            Statement::CreateIndex {
                name,
                table,
                columns,
            } => {
                self.current_db()?
                    .catalog_mut()
                    .create_index(&table, &name, &columns)?;
                Ok(ExecResult::Done(format!("index '{name}' created")))
            }
            Statement::DropIndex { name } => self.drop_index(&name),
            Statement::Insert { table, values } => self.insert(&table, values),
            Statement::Select {
                table,
                projection,
                selection,
            } => self.select(&table, projection, selection),
            Statement::Delete { table, selection } => self.delete(&table, selection),
            Statement::Update {
                table,
                assignments,
                selection,
            } => self.update(&table, assignments, selection),
        }
    }

    // -------------------------------------------------------- databases

    fn db_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{DB_FILE_EXT}"))
    }

    fn create_database(&mut self, name: &str) -> DbResult<ExecResult> {
        let path = self.db_path(name);
        if path.exists() {
            return Err(DbError::AlreadyExists(format!("database '{name}'")));
        }
        let db = Database::create(&path, self.pool_pages)?;
        self.databases.insert(name.to_string(), db);
        Ok(ExecResult::Done(format!("database '{name}' created")))
    }

    fn drop_database(&mut self, name: &str) -> DbResult<ExecResult> {
        let path = self.db_path(name);
        if !path.exists() {
            return Err(DbError::NotFound(format!("database '{name}'")));
        }
        self.databases.remove(name);
        if self.current.as_deref() == Some(name) {
            self.current = None;
        }
        fs::remove_file(&path)?;
        Ok(ExecResult::Done(format!("database '{name}' dropped")))
    }

    fn show_databases(&self) -> DbResult<ExecResult> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(DB_FILE_EXT)
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(ExecResult::Batch {
            columns: vec!["database".into()],
            rows: names
                .into_iter()
                .map(|name| vec![Value::Char(name)])
                .collect(),
        })
    }

    fn use_database(&mut self, name: &str) -> DbResult<ExecResult> {
        if !self.databases.contains_key(name) {
            let path = self.db_path(name);
            if !path.exists() {
                return Err(DbError::NotFound(format!("database '{name}'")));
            }
            let db = Database::open(&path, self.pool_pages)?;
            self.databases.insert(name.to_string(), db);
        }
        self.current = Some(name.to_string());
        Ok(ExecResult::Done(format!("using database '{name}'")))
    }

    fn current_db(&mut self) -> DbResult<&mut Database> {
        let name = self
            .current
            .as_ref()
            .ok_or_else(|| DbError::NotFound("no database selected".into()))?;
        self.databases
            .get_mut(name)
            .ok_or_else(|| DbError::NotFound(format!("database '{name}'")))
    }

    // ------------------------------------------------------------- DDL

    fn show_tables(&mut self) -> DbResult<ExecResult> {
        let db = self.current_db()?;
        let rows = db
            .catalog()
            .get_tables()
            .iter()
            .map(|table| vec![Value::Char(table.name.clone())])
            .collect();
        Ok(ExecResult::Batch {
            columns: vec!["table".into()],
            rows,
        })
    }

    fn show_indexes(&mut self) -> DbResult<ExecResult> {
        let db = self.current_db()?;
        let catalog = db.catalog();
        let mut rows = Vec::new();
        for table in catalog.get_tables() {
            for info in catalog.get_table_indexes(&table.name)? {
                let columns: Vec<String> = info
                    .key_schema
                    .columns()
                    .iter()
                    .map(|col| col.name.clone())
                    .collect();
                rows.push(vec![
                    Value::Char(table.name.clone()),
                    Value::Char(info.name.clone()),
                    Value::Char(columns.join(", ")),
                ]);
            }
        }
        Ok(ExecResult::Batch {
            columns: vec!["table".into(), "index".into(), "columns".into()],
            rows,
        })
    }

    fn create_table(
        &mut self,
        name: &str,
        defs: Vec<ColumnDef>,
        primary_key: Vec<String>,
    ) -> DbResult<ExecResult> {
        let mut seen = Vec::new();
        for def in &defs {
            if seen.contains(&def.name) {
                return Err(DbError::Constraint(format!(
                    "duplicate column '{}'",
                    def.name
                )));
            }
            seen.push(def.name.clone());
        }
        for key in &primary_key {
            if !seen.contains(key) {
                return Err(DbError::NotFound(format!(
                    "primary key column '{key}'"
                )));
            }
        }

        let single_pk = (primary_key.len() == 1).then(|| primary_key[0].clone());
        let columns: Vec<Column> = defs
            .iter()
            .enumerate()
            .map(|(position, def)| {
                let mut column = Column::new(&def.name, def.ty, position as u32);
                column.nullable = def.nullable && !primary_key.contains(&def.name);
                column.unique = def.unique || single_pk.as_deref() == Some(&def.name);
                column
            })
            .collect();

        let catalog = self.current_db()?.catalog_mut();
        catalog.create_table(name, Schema::new(columns.clone()))?;

        // Uniqueness is enforced through indexes: one for the primary key,
        // one per additional unique column.
        let mut planned: Vec<(String, Vec<String>)> = Vec::new();
        if !primary_key.is_empty() {
            planned.push((format!("{name}_pk"), primary_key.clone()));
        }
        for column in &columns {
            if column.unique && single_pk.as_deref() != Some(&column.name) {
                planned.push((
                    format!("{name}_{}_uniq", column.name),
                    vec![column.name.clone()],
                ));
            }
        }
        for (index_name, key_columns) in planned {
            if let Err(e) = catalog.create_index(name, &index_name, &key_columns) {
                catalog.drop_table(name)?;
                return Err(e);
            }
        }
        Ok(ExecResult::Done(format!("table '{name}' created")))
    }

    fn drop_index(&mut self, index_name: &str) -> DbResult<ExecResult> {
        let catalog = self.current_db()?.catalog_mut();
        let owner = catalog
            .get_tables()
            .iter()
            .find(|table| catalog.get_index(&table.name, index_name).is_ok())
            .map(|table| table.name.clone())
            .ok_or_else(|| DbError::NotFound(format!("index '{index_name}'")))?;
        catalog.drop_index(&owner, index_name)?;
        Ok(ExecResult::Done(format!("index '{index_name}' dropped")))
    }

    // ------------------------------------------------------------- DML

    fn insert(&mut self, table_name: &str, values: Vec<Value>) -> DbResult<ExecResult> {
        let catalog = self.current_db()?.catalog_mut();
        {
            let table = catalog.get_table(table_name)?;
            validate_row(&values, &table.schema)?;
        }

        let (table, mut indexes) = catalog.table_and_indexes_mut(table_name)?;
        let mut row = Row::new(values);
        let rid = table.heap.insert(&mut row)?;

        for i in 0..indexes.len() {
            let key = indexes[i].key_row(&row)?;
            if let Err(e) = indexes[i].index.insert_entry(&key, rid) {
                // Undo the partial insert before reporting the conflict.
                for done in indexes.iter_mut().take(i) {
                    let key = done.key_row(&row)?;
                    done.index.remove_entry(&key)?;
                }
                table.heap.apply_delete(rid)?;
                return Err(e);
            }
        }
        Ok(ExecResult::Affected(1))
    }

    fn select(
        &mut self,
        table_name: &str,
        projection: Option<Vec<String>>,
        selection: Option<Expr>,
    ) -> DbResult<ExecResult> {
        let catalog = self.current_db()?.catalog();
        let table = catalog.get_table(table_name)?;
        let indexes = catalog.get_table_indexes(table_name)?;

        let positions: Vec<usize> = match &projection {
            None => (0..table.schema.len()).collect(),
            Some(names) => names
                .iter()
                .map(|name| {
                    table
                        .schema
                        .column_index(name)
                        .ok_or_else(|| DbError::NotFound(format!("column '{name}'")))
                })
                .collect::<DbResult<_>>()?,
        };
        let columns = positions
            .iter()
            .map(|&pos| table.schema.columns()[pos].name.clone())
            .collect();

        let rids = collect_rids(selection.as_ref(), table, &indexes)?;
        let mut rows = Vec::with_capacity(rids.len());
        for rid in rids {
            let row = table.heap.get(rid)?;
            rows.push(
                positions
                    .iter()
                    .map(|&pos| row.values[pos].clone())
                    .collect(),
            );
        }
        Ok(ExecResult::Batch { columns, rows })
    }

    fn delete(&mut self, table_name: &str, selection: Option<Expr>) -> DbResult<ExecResult> {
        let catalog = self.current_db()?.catalog_mut();
        let rids = {
            let table = catalog.get_table(table_name)?;
            let indexes = catalog.get_table_indexes(table_name)?;
            collect_rids(selection.as_ref(), table, &indexes)?
        };

        let (table, mut indexes) = catalog.table_and_indexes_mut(table_name)?;
        for rid in &rids {
            let row = table.heap.get(*rid)?;
            table.heap.mark_delete(*rid)?;
            for info in &mut indexes {
                let key = info.key_row(&row)?;
                info.index.remove_entry(&key)?;
            }
            table.heap.apply_delete(*rid)?;
        }
        Ok(ExecResult::Affected(rids.len() as u64))
    }

    fn update(
        &mut self,
        table_name: &str,
        assignments: Vec<(String, Value)>,
        selection: Option<Expr>,
    ) -> DbResult<ExecResult> {
        let catalog = self.current_db()?.catalog_mut();
        let (targets, rids) = {
            let table = catalog.get_table(table_name)?;
            let indexes = catalog.get_table_indexes(table_name)?;

            let mut targets = Vec::with_capacity(assignments.len());
            for (column, value) in &assignments {
                let pos = table.schema.column_index(column).ok_or_else(|| {
                    DbError::NotFound(format!("column '{column}'"))
                })?;
                validate_value(value, &table.schema.columns()[pos])?;
                targets.push((pos, value.clone()));
            }
            (targets, collect_rids(selection.as_ref(), table, &indexes)?)
        };

        let (table, mut indexes) = catalog.table_and_indexes_mut(table_name)?;
        let mut affected = 0u64;
        for rid in rids {
            let old_row = table.heap.get(rid)?;
            let mut new_values = old_row.values.clone();
            for (pos, value) in &targets {
                new_values[*pos] = value.clone();
            }
            let mut new_row = Row::new(new_values);

            // Unique conflicts abort before any mutation of this row.
            for info in indexes.iter() {
                let old_key = old_row.project(&info.key_map)?;
                let new_key = new_row.project(&info.key_map)?;
                if old_key.values != new_key.values
                    && !info.index.scan_key(&new_key)?.is_empty()
                {
                    return Err(DbError::AlreadyExists(format!(
                        "unique key conflict on index '{}'",
                        info.name
                    )));
                }
            }

            // The row id may change when the new tuple no longer fits in
            // place.
            let new_rid = table.heap.update(&mut new_row, rid)?;
            for info in &mut indexes {
                let old_key = old_row.project(&info.key_map)?;
                let new_key = new_row.project(&info.key_map)?;
                if old_key.values != new_key.values || new_rid != rid {
                    info.index.remove_entry(&old_key)?;
                    info.index.insert_entry(&new_key, new_rid)?;
                }
            }
            affected += 1;
        }
        Ok(ExecResult::Affected(affected))
    }
}

impl Drop for ExecuteEngine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("flush on shutdown failed: {e}");
        }
    }
}

fn validate_row(values: &[Value], schema: &Schema) -> DbResult<()> {
    if values.len() != schema.len() {
        return Err(DbError::Constraint(format!(
            "expected {} values, got {}",
            schema.len(),
            values.len()
        )));
    }
    for (value, column) in values.iter().zip(schema.columns()) {
        validate_value(value, column)?;
    }
    Ok(())
}

fn validate_value(value: &Value, column: &Column) -> DbResult<()> {
    if value.is_null() {
        if !column.nullable {
            return Err(DbError::Constraint(format!(
                "column '{}' is not nullable",
                column.name
            )));
        }
        return Ok(());
    }
    if !value.fits(&column.ty) {
        warn!("value {value} rejected for column {}", column.name);
        return Err(DbError::Constraint(format!(
            "value {value} does not fit column '{}' of type {}",
            column.name, column.ty
        )));
    }
    Ok(())
}
