//! SQL text to internal statements.
//!
//! Database-level and SHOW statements are recognized with a thin keyword
//! screen; everything else goes through `sqlparser` (generic dialect) and
//! is mapped onto the internal AST.

mod ast;


pub use ast::{ColumnDef, Statement};

use common::{DbError, DbResult};
use expr::{BinaryOp, Expr, UnaryOp};
use sqlparser::ast as sqlast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;
use types::{SqlType, Value};

/// Parses one statement of SQL text.
pub fn parse(sql: &str) -> DbResult<Statement> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(DbError::Parser("empty statement".into()));
    }
    if let Some(statement) = screen_shell_statement(trimmed)? {
        return Ok(statement);
    }

    let dialect = GenericDialect {};
    let mut statements = SqlParser::parse_sql(&dialect, trimmed)
        .map_err(|e| DbError::Parser(format!("SQL parse error: {e}")))?;
    if statements.len() != 1 {
        return Err(DbError::Parser(format!(
            "expected one statement, got {}",
            statements.len()
        )));
    }
    map_statement(statements.remove(0))
}

/// Database-level and SHOW forms handled without the SQL grammar.
fn screen_shell_statement(sql: &str) -> DbResult<Option<Statement>> {
    let upper = sql.to_ascii_uppercase();
    let statement = match upper.as_str() {
        "SHOW DATABASES" => Some(Statement::ShowDatabases),
        "SHOW TABLES" => Some(Statement::ShowTables),
        "SHOW INDEXES" | "SHOW INDEX" => Some(Statement::ShowIndexes),
        _ => {
            if let Some(rest) = strip_keyword_prefix(sql, &["CREATE", "DATABASE"]) {
                Some(Statement::CreateDatabase {
                    name: parse_ident(rest)?,
                })
            } else if let Some(rest) = strip_keyword_prefix(sql, &["DROP", "DATABASE"]) {
                Some(Statement::DropDatabase {
                    name: parse_ident(rest)?,
                })
            } else if let Some(rest) = strip_keyword_prefix(sql, &["USE"]) {
                Some(Statement::UseDatabase {
                    name: parse_ident(rest)?,
                })
            } else {
                None
            }
        }
    };
    Ok(statement)
}

fn strip_keyword_prefix<'a>(sql: &'a str, keywords: &[&str]) -> Option<&'a str> {
    let mut rest = sql;
    for keyword in keywords {
        let trimmed = rest.trim_start();
        if trimmed.len() < keyword.len()
            || !trimmed[..keyword.len()].eq_ignore_ascii_case(keyword)
        {
            return None;
        }
        let after = &trimmed[keyword.len()..];
        if !after.is_empty() && !after.starts_with(char::is_whitespace) {
            return None;
        }
        rest = after;
    }
    Some(rest.trim())
}

fn parse_ident(text: &str) -> DbResult<String> {
    let name = text.trim();
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if !valid {
        return Err(DbError::Parser(format!("invalid identifier '{name}'")));
    }
    Ok(name.to_ascii_lowercase())
}

fn map_statement(stmt: sqlast::Statement) -> DbResult<Statement> {
    use sqlast::Statement as SqlStatement;

    match stmt {
        SqlStatement::CreateTable {
            name,
            columns,
            constraints,
            ..
        } => {
            let table = object_name(&name)?;
            let mut primary_key = Vec::new();

            let mut mapped = Vec::with_capacity(columns.len());
            for column in &columns {
                let mut def = ColumnDef {
                    name: normalize_ident(&column.name),
                    ty: map_data_type(&column.data_type)?,
                    nullable: true,
                    unique: false,
                };
                for option in &column.options {
                    match &option.option {
                        sqlast::ColumnOption::NotNull => def.nullable = false,
                        sqlast::ColumnOption::Unique { is_primary, .. } => {
                            def.unique = true;
                            if *is_primary {
                                def.nullable = false;
                                primary_key.push(def.name.clone());
                            }
                        }
                        _ => {}
                    }
                }
                mapped.push(def);
            }

            for constraint in &constraints {
                if let sqlast::TableConstraint::Unique {
                    columns: key_columns,
                    is_primary: true,
                    ..
                } = constraint
                {
                    for ident in key_columns {
                        let key = normalize_ident(ident);
                        if let Some(def) = mapped.iter_mut().find(|d| d.name == key) {
                            def.nullable = false;
                        }
                        primary_key.push(key);
                    }
                }
            }

            Ok(Statement::CreateTable {
                name: table,
                columns: mapped,
                primary_key,
            })
        }
        SqlStatement::Drop {
            object_type, names, ..
        } => match object_type {
            sqlast::ObjectType::Table => Ok(Statement::DropTable {
                name: first_name(names)?,
            }),
            sqlast::ObjectType::Index => Ok(Statement::DropIndex {
                name: first_name(names)?,
            }),
            other => Err(DbError::Parser(format!(
                "unsupported DROP type: {other:?}"
            ))),
        },
        SqlStatement::CreateIndex {
            name,
            table_name,
            columns,
            ..
        } => {
            let index = name
                .ok_or_else(|| DbError::Parser("index name required".into()))
                .and_then(|n| object_name(&n))?;
            let table = object_name(&table_name)?;
            let columns = columns
                .iter()
                .map(|order_by| match &order_by.expr {
                    sqlast::Expr::Identifier(ident) => Ok(normalize_ident(ident)),
                    other => Err(DbError::Parser(format!(
                        "unsupported index column expression: {other}"
                    ))),
                })
                .collect::<DbResult<Vec<_>>>()?;
            if columns.is_empty() {
                return Err(DbError::Parser("index needs at least one column".into()));
            }
            Ok(Statement::CreateIndex {
                name: index,
                table,
                columns,
            })
        }
        SqlStatement::Insert {
            table_name, source, ..
        } => {
            let table = object_name(&table_name)?;
            let source =
                source.ok_or_else(|| DbError::Parser("INSERT requires VALUES".into()))?;
            let values = extract_values(*source)?;
            Ok(Statement::Insert { table, values })
        }
        SqlStatement::Query(query) => map_select(*query),
        SqlStatement::Update {
            table,
            assignments,
            selection,
            ..
        } => {
            let table = table_name_from_factor(&table.relation)?;
            let assignments = assignments
                .into_iter()
                .map(|assign| {
                    let ident = assign
                        .id
                        .last()
                        .ok_or_else(|| DbError::Parser("invalid assignment target".into()))?;
                    Ok((normalize_ident(ident), literal_value(&assign.value)?))
                })
                .collect::<DbResult<Vec<_>>>()?;
            let selection = selection.map(map_expr).transpose()?;
            Ok(Statement::Update {
                table,
                assignments,
                selection,
            })
        }
        SqlStatement::Delete {
            from, selection, ..
        } => {
            let with_joins = from
                .first()
                .ok_or_else(|| DbError::Parser("DELETE requires a table".into()))?;
            let table = table_name_from_factor(&with_joins.relation)?;
            let selection = selection.map(map_expr).transpose()?;
            Ok(Statement::Delete { table, selection })
        }
        other => Err(DbError::Parser(format!("unsupported statement: {other}"))),
    }
}

fn map_select(query: sqlast::Query) -> DbResult<Statement> {
    let sqlast::SetExpr::Select(select) = *query.body else {
        return Err(DbError::Parser("unsupported query form".into()));
    };
    let with_joins = select
        .from
        .first()
        .ok_or_else(|| DbError::Parser("SELECT requires FROM".into()))?;
    if select.from.len() > 1 || !with_joins.joins.is_empty() {
        return Err(DbError::Parser("joins are not supported".into()));
    }
    let table = table_name_from_factor(&with_joins.relation)?;

    let mut projection = Vec::new();
    let mut wildcard = false;
    for item in &select.projection {
        match item {
            sqlast::SelectItem::Wildcard(_) => wildcard = true,
            sqlast::SelectItem::UnnamedExpr(sqlast::Expr::Identifier(ident)) => {
                projection.push(normalize_ident(ident));
            }
            other => {
                return Err(DbError::Parser(format!(
                    "unsupported projection item: {other}"
                )));
            }
        }
    }

    let selection = select.selection.map(map_expr).transpose()?;
    Ok(Statement::Select {
        table,
        projection: (!wildcard).then_some(projection),
        selection,
    })
}

fn map_expr(expr: sqlast::Expr) -> DbResult<Expr> {
    match expr {
        sqlast::Expr::Identifier(ident) => Ok(Expr::Column(normalize_ident(&ident))),
        sqlast::Expr::CompoundIdentifier(parts) => {
            let ident = parts
                .last()
                .ok_or_else(|| DbError::Parser("empty identifier".into()))?;
            Ok(Expr::Column(normalize_ident(ident)))
        }
        sqlast::Expr::Value(value) => Ok(Expr::Literal(map_value(&value)?)),
        sqlast::Expr::Nested(inner) => map_expr(*inner),
        sqlast::Expr::UnaryOp {
            op: sqlast::UnaryOperator::Not,
            expr,
        } => Ok(Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(map_expr(*expr)?),
        }),
        sqlast::Expr::UnaryOp {
            op: sqlast::UnaryOperator::Minus,
            expr,
        } => match map_expr(*expr)? {
            Expr::Literal(Value::Int(v)) => Ok(Expr::Literal(Value::Int(-v))),
            Expr::Literal(Value::Float(v)) => Ok(Expr::Literal(Value::Float(-v))),
            other => Err(DbError::Parser(format!(
                "cannot negate {other:?}"
            ))),
        },
        sqlast::Expr::BinaryOp { left, op, right } => {
            let op = map_binary_op(&op)?;
            Ok(Expr::Binary {
                left: Box::new(map_expr(*left)?),
                op,
                right: Box::new(map_expr(*right)?),
            })
        }
        other => Err(DbError::Parser(format!("unsupported expression: {other}"))),
    }
}

fn map_binary_op(op: &sqlast::BinaryOperator) -> DbResult<BinaryOp> {
    use sqlast::BinaryOperator as SqlOp;
    Ok(match op {
        SqlOp::Eq => BinaryOp::Eq,
        SqlOp::NotEq => BinaryOp::Ne,
        SqlOp::Lt => BinaryOp::Lt,
        SqlOp::LtEq => BinaryOp::Le,
        SqlOp::Gt => BinaryOp::Gt,
        SqlOp::GtEq => BinaryOp::Ge,
        SqlOp::And => BinaryOp::And,
        SqlOp::Or => BinaryOp::Or,
        other => {
            return Err(DbError::Parser(format!("unsupported operator: {other}")));
        }
    })
}

fn map_value(value: &sqlast::Value) -> DbResult<Value> {
    match value {
        sqlast::Value::Number(text, _) => {
            if let Ok(v) = text.parse::<i32>() {
                Ok(Value::Int(v))
            } else {
                text.parse::<f32>()
                    .map(Value::Float)
                    .map_err(|_| DbError::Parser(format!("bad numeric literal '{text}'")))
            }
        }
        sqlast::Value::SingleQuotedString(s) | sqlast::Value::DoubleQuotedString(s) => {
            Ok(Value::Char(s.clone()))
        }
        sqlast::Value::Null => Ok(Value::Null),
        other => Err(DbError::Parser(format!("unsupported literal: {other}"))),
    }
}

fn literal_value(expr: &sqlast::Expr) -> DbResult<Value> {
    match expr {
        sqlast::Expr::Value(value) => map_value(value),
        sqlast::Expr::UnaryOp {
            op: sqlast::UnaryOperator::Minus,
            expr,
        } => match literal_value(expr)? {
            Value::Int(v) => Ok(Value::Int(-v)),
            Value::Float(v) => Ok(Value::Float(-v)),
            other => Err(DbError::Parser(format!("cannot negate {other}"))),
        },
        other => Err(DbError::Parser(format!(
            "expected a literal value, got {other}"
        ))),
    }
}

fn extract_values(query: sqlast::Query) -> DbResult<Vec<Value>> {
    let sqlast::SetExpr::Values(values) = *query.body else {
        return Err(DbError::Parser("INSERT requires VALUES".into()));
    };
    let mut rows = values.rows;
    if rows.len() != 1 {
        return Err(DbError::Parser(
            "INSERT takes exactly one row of values".into(),
        ));
    }
    rows.remove(0).iter().map(literal_value).collect()
}

fn map_data_type(data_type: &sqlast::DataType) -> DbResult<SqlType> {
    // Normalizing through the display form keeps this independent of the
    // sqlparser enum layout.
    let text = data_type.to_string().to_uppercase();
    if text.starts_with("INT") || text.starts_with("BIGINT") || text.starts_with("SMALLINT") {
        return Ok(SqlType::Int);
    }
    if text.starts_with("FLOAT") || text.starts_with("REAL") || text.starts_with("DOUBLE") {
        return Ok(SqlType::Float);
    }
    if text.starts_with("CHAR") || text.starts_with("VARCHAR") {
        let width = text
            .split_once('(')
            .and_then(|(_, rest)| rest.split_once(')'))
            .map(|(digits, _)| digits.trim().parse::<u32>())
            .transpose()
            .map_err(|_| DbError::Parser(format!("bad char width in '{text}'")))?
            .unwrap_or(1);
        if width == 0 {
            return Err(DbError::Parser("char width must be positive".into()));
        }
        return Ok(SqlType::Char(width));
    }
    Err(DbError::Parser(format!("unsupported column type '{text}'")))
}

fn normalize_ident(ident: &sqlast::Ident) -> String {
    ident.value.to_ascii_lowercase()
}

fn object_name(name: &sqlast::ObjectName) -> DbResult<String> {
    name.0
        .last()
        .map(normalize_ident)
        .ok_or_else(|| DbError::Parser("empty object name".into()))
}

fn first_name(names: Vec<sqlast::ObjectName>) -> DbResult<String> {
    names
        .first()
        .ok_or_else(|| DbError::Parser("missing object name".into()))
        .and_then(object_name)
}

fn table_name_from_factor(factor: &sqlast::TableFactor) -> DbResult<String> {
    match factor {
        sqlast::TableFactor::Table { name, .. } => object_name(name),
        other => Err(DbError::Parser(format!(
            "unsupported table reference: {other}"
        ))),
    }
}
