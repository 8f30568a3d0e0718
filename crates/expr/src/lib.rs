//! Predicate expressions evaluated over rows.
//!
//! Comparisons involving SQL NULL evaluate to false rather than unknown;
//! the statement layer never needs three-valued logic.

use std::cmp::Ordering;

use common::{DbError, DbResult};
use record::{Row, Schema};
use types::Value;

/// Binary comparison and logical operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_connector(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Unary operators (currently just logical NOT).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnaryOp {
    Not,
}

/// Predicate abstract syntax tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Reference to a column of the scanned table.
    Column(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Evaluates the expression against one row of `schema`.
    pub fn eval(&self, row: &Row, schema: &Schema) -> DbResult<Value> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Column(name) => {
                let idx = schema
                    .column_index(name)
                    .ok_or_else(|| DbError::NotFound(format!("column '{name}'")))?;
                Ok(row.values[idx].clone())
            }
            Expr::Unary { op: UnaryOp::Not, expr } => {
                let value = expr.eval(row, schema)?;
                match value {
                    Value::Int(v) => Ok(Value::Int((v == 0) as i32)),
                    other => Err(DbError::Constraint(format!(
                        "NOT expects a boolean-like value, got {other}"
                    ))),
                }
            }
            Expr::Binary { left, op, right } => {
                let lv = left.eval(row, schema)?;
                let rv = right.eval(row, schema)?;
                eval_binary(&lv, *op, &rv)
            }
        }
    }

    /// Evaluates as a filter condition; non-matches and null comparisons
    /// are both false.
    pub fn matches(&self, row: &Row, schema: &Schema) -> DbResult<bool> {
        Ok(truthy(&self.eval(row, schema)?))
    }
}

/// Truth is represented as non-zero ints (comparisons produce 0/1).
fn truthy(value: &Value) -> bool {
    matches!(value, Value::Int(v) if *v != 0)
}

fn eval_binary(left: &Value, op: BinaryOp, right: &Value) -> DbResult<Value> {
    use BinaryOp::*;

    if op.is_connector() {
        let l = truthy(left);
        let r = truthy(right);
        let result = match op {
            And => l && r,
            Or => l || r,
            _ => unreachable!(),
        };
        return Ok(Value::Int(result as i32));
    }

    // A comparison touching NULL never matches.
    if left.is_null() || right.is_null() {
        return Ok(Value::Int(0));
    }

    let ord = left.compare(right).ok_or_else(|| {
        DbError::Constraint(format!(
            "cannot compare {left} with {right}"
        ))
    })?;
    let result = match op {
        Eq => ord == Ordering::Equal,
        Ne => ord != Ordering::Equal,
        Lt => ord == Ordering::Less,
        Le => ord != Ordering::Greater,
        Gt => ord == Ordering::Greater,
        Ge => ord != Ordering::Less,
        And | Or => unreachable!(),
    };
    Ok(Value::Int(result as i32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use record::Column;
    use types::SqlType;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", SqlType::Int, 0),
            Column::new("name", SqlType::Char(16), 1),
            Column::new("score", SqlType::Float, 2),
        ])
    }

    fn row(id: i32, name: &str, score: f32) -> Row {
        Row::new(vec![
            Value::Int(id),
            Value::Char(name.into()),
            Value::Float(score),
        ])
    }

    fn col(name: &str) -> Box<Expr> {
        Box::new(Expr::Column(name.into()))
    }

    fn lit(value: Value) -> Box<Expr> {
        Box::new(Expr::Literal(value))
    }

    fn cmp(left: Box<Expr>, op: BinaryOp, right: Box<Expr>) -> Expr {
        Expr::Binary { left, op, right }
    }

    #[test]
    fn comparisons_over_columns() {
        let schema = schema();
        let r = row(5, "ada", 1.5);

        assert!(cmp(col("id"), BinaryOp::Eq, lit(Value::Int(5)))
            .matches(&r, &schema)
            .unwrap());
        assert!(cmp(col("name"), BinaryOp::Gt, lit(Value::Char("aa".into())))
            .matches(&r, &schema)
            .unwrap());
        assert!(!cmp(col("score"), BinaryOp::Lt, lit(Value::Float(1.0)))
            .matches(&r, &schema)
            .unwrap());
        // Ints and floats compare numerically.
        assert!(cmp(col("id"), BinaryOp::Gt, lit(Value::Float(4.5)))
            .matches(&r, &schema)
            .unwrap());
    }

    #[test]
    fn connectors_and_not() {
        let schema = schema();
        let r = row(5, "ada", 1.5);

        let both = cmp(
            Box::new(cmp(col("id"), BinaryOp::Ge, lit(Value::Int(5)))),
            BinaryOp::And,
            Box::new(cmp(col("score"), BinaryOp::Ne, lit(Value::Float(0.0)))),
        );
        assert!(both.matches(&r, &schema).unwrap());

        let either = cmp(
            Box::new(cmp(col("id"), BinaryOp::Lt, lit(Value::Int(0)))),
            BinaryOp::Or,
            Box::new(cmp(col("name"), BinaryOp::Eq, lit(Value::Char("ada".into())))),
        );
        assert!(either.matches(&r, &schema).unwrap());

        let negated = Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(cmp(col("id"), BinaryOp::Eq, lit(Value::Int(5)))),
        };
        assert!(!negated.matches(&r, &schema).unwrap());
    }

    #[test]
    fn null_comparisons_never_match() {
        let schema = schema();
        let r = Row::new(vec![Value::Int(1), Value::Null, Value::Null]);

        assert!(!cmp(col("name"), BinaryOp::Eq, lit(Value::Char("x".into())))
            .matches(&r, &schema)
            .unwrap());
        assert!(!cmp(col("name"), BinaryOp::Ne, lit(Value::Char("x".into())))
            .matches(&r, &schema)
            .unwrap());
    }

    #[test]
    fn unknown_column_and_type_mismatch_error() {
        let schema = schema();
        let r = row(1, "a", 0.0);

        assert!(matches!(
            cmp(col("missing"), BinaryOp::Eq, lit(Value::Int(1))).matches(&r, &schema),
            Err(DbError::NotFound(_))
        ));
        assert!(matches!(
            cmp(col("name"), BinaryOp::Eq, lit(Value::Int(1))).matches(&r, &schema),
            Err(DbError::Constraint(_))
        ));
    }
}
