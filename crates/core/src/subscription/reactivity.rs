use std::collections::{BTreeMap, BTreeSet};

use tidemark_query::{collect_field_queries, FieldQuery, Query};
use tidemark_store::{AppliedRow, Schema};
use tidemark_value::Value;

/// Whether an applied delta can touch a subscription's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip,
    ReExecute,
}

/// Decide per subscription whether a delta warrants re-execution.
///
/// `changes` is the ingest outcome per table, in delta order; `tracked` is
/// the subscription's per-table result-row-id sets as of its last run. The
/// policy is conservative: missing tracking, string-keyed rows, and any
/// other doubt re-execute rather than risk a stale result.
pub fn decide(
    schema: &Schema,
    query: &Query,
    tracked: &BTreeMap<String, BTreeSet<i64>>,
    changes: &BTreeMap<String, Vec<AppliedRow>>,
) -> Decision {
    for (table, field_queries) in collect_field_queries(schema, query) {
        let Some(applied) = changes.get(&table) else {
            continue;
        };
        if applied.is_empty() {
            continue;
        }

        // Tracking only covers integer ids; a string-keyed row may or may
        // not be in the result, so assume it is.
        if applied.iter().any(|row| row.id.as_int().is_none()) {
            return Decision::ReExecute;
        }

        let Some(tracked_ids) = tracked.get(&table) else {
            // First run or unknown state for this table.
            return Decision::ReExecute;
        };

        let (overlapping, new): (Vec<&AppliedRow>, Vec<&AppliedRow>) = applied
            .iter()
            .partition(|row| row.id.as_int().is_some_and(|id| tracked_ids.contains(&id)));

        for field_query in &field_queries {
            if !overlapping.is_empty() && overlapping_rows_matter(field_query, &overlapping) {
                return Decision::ReExecute;
            }
            if !new.is_empty() && new_rows_matter(field_query, &new) {
                return Decision::ReExecute;
            }
        }
    }
    Decision::Skip
}

/// A changed row already in the result matters when a field the query
/// orders or filters on moved, or unconditionally for a bare query.
fn overlapping_rows_matter(field_query: &FieldQuery, overlapping: &[&AppliedRow]) -> bool {
    if field_query.limit.is_some() || !field_query.sort.is_empty() {
        let mut watched: Vec<String> = field_query.sort.iter().map(|clause| clause.field.clone()).collect();
        // Membership under a limit can still flip on a filtered field.
        if let Some(clause) = &field_query.where_clause {
            clause.referenced_fields(&mut watched);
        }
        return overlapping.iter().any(|row| fields_changed(row, &watched));
    }
    match &field_query.where_clause {
        None => true,
        Some(clause) => {
            let mut watched = Vec::new();
            clause.referenced_fields(&mut watched);
            overlapping.iter().any(|row| fields_changed(row, &watched))
        }
    }
}

/// A row outside the result matters when it (now) satisfies the filter, or
/// always for an unfiltered query.
fn new_rows_matter(field_query: &FieldQuery, new: &[&AppliedRow]) -> bool {
    match &field_query.where_clause {
        None => true,
        Some(clause) => new.iter().any(|row| clause.matches(&row.new)),
    }
}

fn fields_changed(row: &AppliedRow, fields: &[String]) -> bool {
    let old = row.old.as_ref();
    fields.iter().any(|field| {
        let before = old.map(|r| r.get_or_null(field)).unwrap_or(&Value::Null);
        before != row.new.get_or_null(field)
    })
}
