use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tidemark_store::{Database, RelationKind, Schema};
use tidemark_value::{cmp_values, Row, RowId, Value, ID_FIELD};

use crate::ast::{Direction, FieldQuery, Query, Selection, SortClause};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueryError {
    #[error("query source malformed at `{at}`: {detail}")]
    Decode { at: String, detail: String },
    #[error("query field `{field}` does not map to a table")]
    UnknownQueryField { field: String },
}

/// What one execution produced: the rendered result plus, per table, the
/// set of integer base-row ids visited at any projection level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub results: BTreeMap<String, Vec<Row>>,
    pub row_ids: BTreeMap<String, BTreeSet<i64>>,
}

/// Execute `query` against the store.
pub fn execute(db: &Database, query: &Query) -> Result<QueryOutput, QueryError> {
    let mut output = QueryOutput::default();
    for (field_name, field_query) in &query.fields {
        let table = db
            .schema()
            .table_for_query_field(field_name)
            .ok_or_else(|| QueryError::UnknownQueryField {
                field: field_name.clone(),
            })?
            .to_owned();
        let rows = run_field_query(db, &table, field_query, &mut output.row_ids);
        output.results.insert(field_name.clone(), rows);
    }
    Ok(output)
}

/// Filter, sort, limit, project. The sort is stable, so ties keep table
/// insertion order; without a sort, insertion order carries through.
fn run_field_query(
    db: &Database,
    table: &str,
    field_query: &FieldQuery,
    row_ids: &mut BTreeMap<String, BTreeSet<i64>>,
) -> Vec<Row> {
    let mut rows: Vec<&Row> = db
        .rows(table)
        .filter(|row| match &field_query.where_clause {
            Some(clause) => clause.matches(row),
            None => true,
        })
        .collect();

    sort_rows(&mut rows, &field_query.sort);

    if let Some(limit) = field_query.limit {
        rows.truncate(limit);
    }

    rows.into_iter()
        .map(|row| project_row(db, table, row, field_query, row_ids))
        .collect()
}

/// Project one base row through `selections`, resolving nested relations
/// and recording the row's id in the visited set.
fn project_row(
    db: &Database,
    table: &str,
    row: &Row,
    field_query: &FieldQuery,
    row_ids: &mut BTreeMap<String, BTreeSet<i64>>,
) -> Row {
    if let Ok(id) = row.id() {
        if let Some(n) = id.as_int() {
            row_ids.entry(table.to_owned()).or_default().insert(n);
        }
    }

    if field_query.selections.is_empty() {
        return row.clone();
    }

    let mut projected = Row::new();
    // The id always rides along: patch paths and row tracking need it even
    // when the caller didn't select it.
    if let Some(id) = row.get(ID_FIELD) {
        projected.insert(ID_FIELD, id.clone());
    }

    for (field, selection) in &field_query.selections {
        match selection {
            Selection::Field => {
                if let Some(value) = row.get(field) {
                    projected.insert(field.clone(), value.clone());
                }
            }
            Selection::Nested(nested) => {
                projected.insert(field.clone(), resolve_relation(db, table, row, field, nested, row_ids));
            }
        }
    }
    projected
}

fn resolve_relation(
    db: &Database,
    table: &str,
    row: &Row,
    field: &str,
    nested: &FieldQuery,
    row_ids: &mut BTreeMap<String, BTreeSet<i64>>,
) -> Value {
    let Some(relationship) = db.schema().relationship(table, field) else {
        log::warn!("no relationship `{field}` on table `{table}`");
        return Value::Null;
    };
    let related = relationship.related_table.as_str();
    let from_value = row.get_or_null(relationship.from_field());

    match relationship.kind {
        RelationKind::OneToMany => {
            let mut children: Vec<&Row> = db
                .lookup_by_fk(related, &relationship.to_field, from_value)
                .into_iter()
                .filter(|child| match &nested.where_clause {
                    Some(clause) => clause.matches(child),
                    None => true,
                })
                .collect();
            sort_rows(&mut children, &nested.sort);
            if let Some(limit) = nested.limit {
                children.truncate(limit);
            }
            Value::Array(
                children
                    .into_iter()
                    .map(|child| Value::Object(project_row(db, related, child, nested, row_ids).0))
                    .collect(),
            )
        }
        RelationKind::ManyToOne | RelationKind::OneToOne => {
            let target = if relationship.to_field == ID_FIELD {
                RowId::from_value(from_value)
                    .ok()
                    .and_then(|id| db.get_by_id(related, &id))
            } else {
                db.lookup_by_fk(related, &relationship.to_field, from_value)
                    .into_iter()
                    .next()
            };
            match target {
                Some(target) => Value::Object(project_row(db, related, target, nested, row_ids).0),
                // A dangling relation projects an explicit Null, not an
                // absent key.
                None => Value::Null,
            }
        }
    }
}

/// Stable sort by the clause list in order; Desc negates, and a field
/// neither row orders on is a tie, so insertion order survives.
fn sort_rows(rows: &mut [&Row], clauses: &[SortClause]) {
    if clauses.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for clause in clauses {
            let ordering = cmp_values(a.get_or_null(&clause.field), b.get_or_null(&clause.field));
            let ordering = match clause.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if !ordering.is_eq() {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Every (table, field-query) pair the query reads, top-level fields and
/// nested relations alike. A table queried from several places collects
/// each of its field queries.
pub fn collect_field_queries<'q>(schema: &Schema, query: &'q Query) -> BTreeMap<String, Vec<&'q FieldQuery>> {
    let mut out = BTreeMap::new();
    for (field_name, field_query) in &query.fields {
        if let Some(table) = schema.table_for_query_field(field_name) {
            let table = table.to_owned();
            collect_into(schema, &table, field_query, &mut out);
        }
    }
    out
}

fn collect_into<'q>(
    schema: &Schema,
    table: &str,
    field_query: &'q FieldQuery,
    out: &mut BTreeMap<String, Vec<&'q FieldQuery>>,
) {
    out.entry(table.to_owned()).or_default().push(field_query);
    for (field, selection) in &field_query.selections {
        if let Selection::Nested(nested) = selection {
            if let Some(relationship) = schema.relationship(table, field) {
                collect_into(schema, &relationship.related_table, nested, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_query;
    use pretty_assertions::assert_eq;
    use tidemark_store::{Relationship, TableSchema};

    fn schema() -> Schema {
        let mut tables = BTreeMap::new();
        tables.insert(
            "user".to_string(),
            TableSchema {
                relationships: [(
                    "posts".to_string(),
                    Relationship {
                        kind: RelationKind::OneToMany,
                        related_table: "post".to_string(),
                        from_field: None,
                        to_field: "userId".to_string(),
                    },
                )]
                .into_iter()
                .collect(),
            },
        );
        tables.insert(
            "post".to_string(),
            TableSchema {
                relationships: [(
                    "author".to_string(),
                    Relationship {
                        kind: RelationKind::ManyToOne,
                        related_table: "user".to_string(),
                        from_field: Some("userId".to_string()),
                        to_field: "id".to_string(),
                    },
                )]
                .into_iter()
                .collect(),
            },
        );
        Schema {
            tables,
            query_fields: [
                ("user".to_string(), "user".to_string()),
                ("post".to_string(), "post".to_string()),
            ]
            .into_iter()
            .collect(),
        }
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn sample_db() -> Database {
        let mut tables = BTreeMap::new();
        tables.insert(
            "user".to_string(),
            vec![
                row(&[("id", Value::Int(1)), ("name", Value::from("Bob")), ("role", Value::from("admin"))]),
                row(&[("id", Value::Int(2)), ("name", Value::from("Alice")), ("role", Value::from("admin"))]),
                row(&[("id", Value::Int(999)), ("name", Value::from("Eve")), ("role", Value::from("user"))]),
            ],
        );
        tables.insert(
            "post".to_string(),
            vec![
                row(&[("id", Value::Int(10)), ("userId", Value::Int(1)), ("title", Value::from("t10"))]),
                row(&[("id", Value::Int(11)), ("userId", Value::Int(2)), ("title", Value::from("t11"))]),
                row(&[("id", Value::Int(12)), ("userId", Value::Int(1)), ("title", Value::from("t12"))]),
            ],
        );
        Database::bootstrap(schema(), tables)
    }

    fn run(db: &Database, source: &str) -> QueryOutput {
        let query = parse_query(&serde_json::from_str(source).unwrap()).unwrap();
        execute(db, &query).unwrap()
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter().map(|r| r.id().unwrap().as_int().unwrap()).collect()
    }

    #[test]
    fn filter_and_track_ids() {
        let db = sample_db();
        let output = run(
            &db,
            r#"{"user": {"selections": {"id": true, "role": true}, "where": {"role": {"$eq": "admin"}}}}"#,
        );
        assert_eq!(ids(&output.results["user"]), vec![1, 2]);
        assert_eq!(output.row_ids["user"], BTreeSet::from([1, 2]));
        // Projection drops unselected fields.
        assert_eq!(output.results["user"][0].get("name"), None);
    }

    #[test]
    fn sort_then_limit() {
        let db = sample_db();
        let output = run(
            &db,
            r#"{"user": {"selections": {}, "sort": [{"field": "name", "direction": "asc"}], "limit": 2}}"#,
        );
        assert_eq!(ids(&output.results["user"]), vec![2, 1]); // Alice, Bob
    }

    #[test]
    fn desc_sort_reverses() {
        let db = sample_db();
        let output = run(
            &db,
            r#"{"user": {"selections": {}, "sort": [{"field": "name", "direction": "Desc"}]}}"#,
        );
        assert_eq!(ids(&output.results["user"]), vec![999, 1, 2]); // Eve, Bob, Alice
    }

    #[test]
    fn limit_zero_is_empty() {
        let db = sample_db();
        let output = run(&db, r#"{"user": {"selections": {}, "limit": 0}}"#);
        assert_eq!(output.results["user"], Vec::<Row>::new());
        assert!(output.row_ids.get("user").is_none());
    }

    #[test]
    fn sort_over_absent_fields_keeps_insertion_order() {
        let db = sample_db();
        let output = run(
            &db,
            r#"{"user": {"selections": {}, "sort": [{"field": "nosuch", "direction": "asc"}]}}"#,
        );
        assert_eq!(ids(&output.results["user"]), vec![1, 2, 999]);
    }

    #[test]
    fn empty_selections_return_all_fields() {
        let db = sample_db();
        let output = run(&db, r#"{"user": {"selections": {}, "where": {"id": 1}}}"#);
        assert_eq!(output.results["user"][0].get("name"), Some(&Value::from("Bob")));
        assert_eq!(output.results["user"][0].get("role"), Some(&Value::from("admin")));
    }

    #[test]
    fn one_to_many_projects_children_and_tracks_their_ids() {
        let db = sample_db();
        let output = run(
            &db,
            r#"{"user": {"selections": {"id": true, "posts": {"selections": {"id": true, "title": true}}}, "where": {"id": 1}}}"#,
        );
        let user = &output.results["user"][0];
        let posts = user.get("posts").unwrap().as_array().unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(output.row_ids["post"], BTreeSet::from([10, 12]));
        assert_eq!(output.row_ids["user"], BTreeSet::from([1]));
    }

    #[test]
    fn many_to_one_projects_a_single_object_or_null() {
        let db = sample_db();
        let output = run(
            &db,
            r#"{"post": {"selections": {"id": true, "author": {"selections": {"id": true, "name": true}}}}}"#,
        );
        let first = &output.results["post"][0];
        let author = first.get("author").unwrap().as_object().unwrap();
        assert_eq!(author["name"], Value::from("Bob"));
        assert_eq!(output.row_ids["user"], BTreeSet::from([1, 2]));
    }

    #[test]
    fn dangling_relation_is_explicit_null() {
        let mut tables = BTreeMap::new();
        tables.insert(
            "post".to_string(),
            vec![row(&[("id", Value::Int(10)), ("userId", Value::Int(404))])],
        );
        let db = Database::bootstrap(schema(), tables);
        let output = run(
            &db,
            r#"{"post": {"selections": {"id": true, "author": {"selections": {}}}}}"#,
        );
        assert_eq!(output.results["post"][0].get("author"), Some(&Value::Null));
    }

    #[test]
    fn id_rides_along_even_when_not_selected() {
        let db = sample_db();
        let output = run(&db, r#"{"user": {"selections": {"name": true}}}"#);
        assert!(output.results["user"][0].get("id").is_some());
    }

    #[test]
    fn unknown_query_field_is_an_error() {
        let db = sample_db();
        let query = parse_query(&serde_json::from_str(r#"{"ghost": {"selections": {}}}"#).unwrap()).unwrap();
        assert_eq!(
            execute(&db, &query),
            Err(QueryError::UnknownQueryField { field: "ghost".into() })
        );
    }

    #[test]
    fn collect_field_queries_sees_nested_tables() {
        let query = parse_query(
            &serde_json::from_str(
                r#"{"user": {"selections": {"posts": {"selections": {}, "limit": 3}}}}"#,
            )
            .unwrap(),
        )
        .unwrap();
        let by_table = collect_field_queries(&schema(), &query);
        assert_eq!(by_table["user"].len(), 1);
        assert_eq!(by_table["post"].len(), 1);
        assert_eq!(by_table["post"][0].limit, Some(3));
    }
}
