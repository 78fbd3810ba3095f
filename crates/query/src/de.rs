use std::collections::BTreeMap;

use serde_json::Value as Json;
use smallvec::SmallVec;
use tidemark_value::Value;

use crate::ast::{Direction, FieldQuery, FilterValue, Query, Selection, SortClause, WhereClause};
use crate::QueryError;

/// Decode a query from its JSON source.
///
/// The source is an object of query fields, each carrying `selections` and
/// optional `where`, `sort`, and `limit`. A selection maps a field name to
/// `true` (copy the field) or to a nested field query (resolve a relation).
pub fn parse_query(source: &Json) -> Result<Query, QueryError> {
    let Json::Object(fields) = source else {
        return Err(QueryError::Decode {
            at: ".".to_owned(),
            detail: "query source must be an object".to_owned(),
        });
    };
    let mut query = Query { fields: BTreeMap::new() };
    for (name, body) in fields {
        query.fields.insert(name.clone(), parse_field_query(name, body)?);
    }
    Ok(query)
}

fn parse_field_query(at: &str, body: &Json) -> Result<FieldQuery, QueryError> {
    let Json::Object(map) = body else {
        return Err(decode_err(at, "field query must be an object"));
    };

    let mut field_query = FieldQuery::default();
    for (key, value) in map {
        match key.as_str() {
            "selections" => field_query.selections = parse_selections(at, value)?,
            "where" => field_query.where_clause = Some(parse_where(at, value)?),
            "sort" => field_query.sort = parse_sort(at, value)?,
            "limit" => {
                field_query.limit = Some(
                    value
                        .as_u64()
                        .map(|n| n as usize)
                        .ok_or_else(|| decode_err(at, "limit must be a non-negative integer"))?,
                )
            }
            other => return Err(decode_err(at, &format!("unknown field query key `{other}`"))),
        }
    }
    Ok(field_query)
}

fn parse_selections(at: &str, body: &Json) -> Result<BTreeMap<String, Selection>, QueryError> {
    let Json::Object(map) = body else {
        return Err(decode_err(at, "selections must be an object"));
    };
    let mut selections = BTreeMap::new();
    for (field, value) in map {
        let selection = match value {
            Json::Object(_) => Selection::Nested(parse_field_query(&format!("{at}.{field}"), value)?),
            _ => Selection::Field,
        };
        selections.insert(field.clone(), selection);
    }
    Ok(selections)
}

fn parse_where(at: &str, body: &Json) -> Result<WhereClause, QueryError> {
    let Json::Object(map) = body else {
        return Err(decode_err(at, "where clause must be an object"));
    };
    let mut clause = WhereClause::default();
    for (field, value) in map {
        let filter = match field.as_str() {
            "$and" => FilterValue::And(parse_clause_list(at, value)?),
            "$or" => FilterValue::Or(parse_clause_list(at, value)?),
            _ => parse_filter_value(at, value)?,
        };
        clause.fields.insert(field.clone(), filter);
    }
    Ok(clause)
}

fn parse_clause_list(at: &str, body: &Json) -> Result<Vec<WhereClause>, QueryError> {
    let Json::Array(items) = body else {
        return Err(decode_err(at, "$and/$or expects an array of clauses"));
    };
    items.iter().map(|item| parse_where(at, item)).collect()
}

/// An object whose keys all start with `$` is an operator map; an object
/// with no `$` keys is equality shorthand for that whole object value.
fn parse_filter_value(at: &str, body: &Json) -> Result<FilterValue, QueryError> {
    if let Json::Object(map) = body {
        if map.keys().any(|k| k.starts_with('$')) {
            let mut ops = BTreeMap::new();
            for (op, operand) in map {
                if !op.starts_with('$') {
                    return Err(decode_err(at, &format!("operator map mixes `{op}` with operators")));
                }
                ops.insert(op.clone(), parse_filter_value(at, operand)?);
            }
            return Ok(FilterValue::Operators(ops));
        }
    }
    Ok(FilterValue::Simple(to_value(body)))
}

fn parse_sort(at: &str, body: &Json) -> Result<SmallVec<[SortClause; 2]>, QueryError> {
    let Json::Array(items) = body else {
        return Err(decode_err(at, "sort must be an array"));
    };
    items
        .iter()
        .map(|item| {
            let Json::Object(map) = item else {
                return Err(decode_err(at, "sort clause must be an object"));
            };
            let field = map
                .get("field")
                .and_then(Json::as_str)
                .ok_or_else(|| decode_err(at, "sort clause needs a `field`"))?;
            let direction = match map.get("direction") {
                None => Direction::Asc,
                Some(Json::String(s)) => {
                    Direction::parse(s).ok_or_else(|| decode_err(at, &format!("bad sort direction `{s}`")))?
                }
                Some(_) => return Err(decode_err(at, "sort direction must be a string")),
            };
            Ok(SortClause {
                field: field.to_owned(),
                direction,
            })
        })
        .collect()
}

fn to_value(json: &Json) -> Value {
    // serde_json::Value and tidemark Value agree on the JSON data model, so
    // the codec on the tidemark side does the tagging.
    serde_json::from_value(json.clone()).unwrap_or(Value::Null)
}

fn decode_err(at: &str, detail: &str) -> QueryError {
    QueryError::Decode {
        at: at.to_owned(),
        detail: detail.to_owned(),
    }
}
