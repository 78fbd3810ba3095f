use std::collections::BTreeMap;

use smallvec::SmallVec;
use tidemark_value::{cmp_values, Value};

/// A parsed query: one [`FieldQuery`] per top-level query field.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub fields: BTreeMap<String, FieldQuery>,
}

/// What to return for one field: a projection, an optional filter, sort
/// order, and a row cap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldQuery {
    /// Empty means "return all fields".
    pub selections: BTreeMap<String, Selection>,
    pub where_clause: Option<WhereClause>,
    pub sort: SmallVec<[SortClause; 2]>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Copy the field if the row carries it.
    Field,
    /// Resolve a relation and project the related rows recursively.
    Nested(FieldQuery),
}

/// A conjunction over field filters. `$and`/`$or` enter as
/// [`FilterValue::And`]/[`FilterValue::Or`] under their own keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    pub fields: BTreeMap<String, FilterValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Bare value: equality. `null` means "is null".
    Simple(Value),
    /// `{"$gte": 18, ...}`: every operator must hold.
    Operators(BTreeMap<String, FilterValue>),
    And(Vec<WhereClause>),
    Or(Vec<WhereClause>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortClause {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl WhereClause {
    /// Does `row` satisfy this clause? Missing row fields read as Null.
    pub fn matches(&self, row: &tidemark_value::Row) -> bool {
        self.fields.iter().all(|(field, filter)| match filter {
            FilterValue::And(clauses) => clauses.iter().all(|c| c.matches(row)),
            FilterValue::Or(clauses) => clauses.iter().any(|c| c.matches(row)),
            FilterValue::Simple(expected) => row.get_or_null(field) == expected,
            FilterValue::Operators(ops) => {
                let actual = row.get_or_null(field);
                ops.iter().all(|(op, operand)| eval_operator(op, actual, operand))
            }
        })
    }

    /// Every field name this clause reads, recursing through `$and`/`$or`.
    pub fn referenced_fields(&self, out: &mut Vec<String>) {
        for (field, filter) in &self.fields {
            match filter {
                FilterValue::And(clauses) | FilterValue::Or(clauses) => {
                    for clause in clauses {
                        clause.referenced_fields(out);
                    }
                }
                FilterValue::Simple(_) | FilterValue::Operators(_) => {
                    if !out.contains(field) {
                        out.push(field.clone());
                    }
                }
            }
        }
    }
}

/// Evaluate one `$op`. Equality is structural; the range operators require
/// like-typed operands and never match across type boundaries. Unsupported
/// operators and non-scalar operands evaluate to false.
fn eval_operator(op: &str, actual: &Value, operand: &FilterValue) -> bool {
    let FilterValue::Simple(expected) = operand else {
        return false;
    };
    match op {
        "$eq" => actual == expected,
        "$ne" => actual != expected,
        "$gt" | "$gte" | "$lt" | "$lte" => {
            if !comparable(actual, expected) {
                return false;
            }
            let ordering = cmp_values(actual, expected);
            match op {
                "$gt" => ordering.is_gt(),
                "$gte" => ordering.is_ge(),
                "$lt" => ordering.is_lt(),
                _ => ordering.is_le(),
            }
        }
        _ => false,
    }
}

fn comparable(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Int(_), Value::Int(_)) | (Value::Float(_), Value::Float(_)) | (Value::String(_), Value::String(_))
    )
}

impl Direction {
    pub fn parse(s: &str) -> Option<Direction> {
        match s {
            "asc" | "Asc" => Some(Direction::Asc),
            "desc" | "Desc" => Some(Direction::Desc),
            _ => None,
        }
    }
}
