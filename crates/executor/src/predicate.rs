//! Predicate evaluation producing row-id sets.
//!
//! Each atomic comparison resolves to a sorted set of row ids, through a
//! single-column index for equality when one covers the column, otherwise
//! through a heap scan. `AND`/`OR` combine sets by sort-merge under the
//! (page id, slot) order.

use btree::Index as _;
use catalog::{IndexInfo, TableInfo};
use common::{DbResult, RecordId};
use expr::{BinaryOp, Expr};
use record::Row;
use types::Value;

/// Row ids matching the (optional) predicate, in (page, slot) order.
pub(crate) fn collect_rids(
    selection: Option<&Expr>,
    table: &TableInfo,
    indexes: &[&IndexInfo],
) -> DbResult<Vec<RecordId>> {
    match selection {
        None => scan_filter(table, None),
        Some(expr) => eval_rids(expr, table, indexes),
    }
}

fn eval_rids(
    expr: &Expr,
    table: &TableInfo,
    indexes: &[&IndexInfo],
) -> DbResult<Vec<RecordId>> {
    if let Expr::Binary { left, op, right } = expr
        && op.is_connector()
    {
        let lhs = eval_rids(left, table, indexes)?;
        let rhs = eval_rids(right, table, indexes)?;
        return Ok(match op {
            BinaryOp::And => intersect(lhs, rhs),
            BinaryOp::Or => union(lhs, rhs),
            _ => unreachable!(),
        });
    }

    if let Some((column, value)) = column_equality(expr)
        && let Some(info) = covering_index(column, value, table, indexes)
    {
        let key = Row::new(vec![value.clone()]);
        let mut rids = info.index.scan_key(&key)?;
        rids.sort_unstable();
        return Ok(rids);
    }

    scan_filter(table, Some(expr))
}

/// Full heap scan, optionally filtered by the predicate.
fn scan_filter(table: &TableInfo, expr: Option<&Expr>) -> DbResult<Vec<RecordId>> {
    let mut rids = Vec::new();
    for row in table.heap.iter() {
        let row = row?;
        let keep = match expr {
            None => true,
            Some(expr) => expr.matches(&row, &table.schema)?,
        };
        if keep {
            rids.push(row.rid());
        }
    }
    Ok(rids)
}

/// `column = literal` (either side), with a non-null literal.
fn column_equality(expr: &Expr) -> Option<(&str, &Value)> {
    let Expr::Binary {
        left,
        op: BinaryOp::Eq,
        right,
    } = expr
    else {
        return None;
    };
    let pair = match (left.as_ref(), right.as_ref()) {
        (Expr::Column(name), Expr::Literal(value)) => (name.as_str(), value),
        (Expr::Literal(value), Expr::Column(name)) => (name.as_str(), value),
        _ => return None,
    };
    (!pair.1.is_null()).then_some(pair)
}

/// A single-column index whose key is exactly this column. Probes whose
/// type cannot live in the column fall back to the scan path, which
/// reports the mismatch uniformly.
fn covering_index<'a>(
    column: &str,
    value: &Value,
    table: &TableInfo,
    indexes: &[&'a IndexInfo],
) -> Option<&'a IndexInfo> {
    let position = table.schema.column_index(column)?;
    let ty = &table.schema.column(position)?.ty;
    if !value.fits(ty) {
        return None;
    }
    indexes
        .iter()
        .find(|info| info.key_map.as_slice() == [position as u32])
        .copied()
}

fn intersect(lhs: Vec<RecordId>, rhs: Vec<RecordId>) -> Vec<RecordId> {
    let mut out = Vec::with_capacity(lhs.len().min(rhs.len()));
    let (mut i, mut j) = (0, 0);
    while i < lhs.len() && j < rhs.len() {
        match lhs[i].cmp(&rhs[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(lhs[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

fn union(lhs: Vec<RecordId>, rhs: Vec<RecordId>) -> Vec<RecordId> {
    let mut out = Vec::with_capacity(lhs.len() + rhs.len());
    let (mut i, mut j) = (0, 0);
    while i < lhs.len() && j < rhs.len() {
        match lhs[i].cmp(&rhs[j]) {
            std::cmp::Ordering::Less => {
                out.push(lhs[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(rhs[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(lhs[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&lhs[i..]);
    out.extend_from_slice(&rhs[j..]);
    out
}
