use std::collections::BTreeMap;

use indexmap::IndexMap;
use tidemark_value::{lww_accepts, Row, RowId, Value};

use crate::index::{FkIndex, IndexUpdate};
use crate::Schema;

/// The outcome of ingesting one delta row: the stored row before and after.
/// For a row the LWW check dropped, `new` equals `old`.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedRow {
    pub id: RowId,
    pub old: Option<Row>,
    pub new: Row,
}

/// All tables plus their foreign-key indices, owned by the controller.
#[derive(Debug, Default)]
pub struct Database {
    schema: Schema,
    tables: BTreeMap<String, IndexMap<RowId, Row>>,
    indices: BTreeMap<(String, String), FkIndex>,
}

impl Database {
    pub fn new(schema: Schema) -> Database {
        let indices = schema
            .indexed_columns()
            .into_iter()
            .map(|pair| (pair, FkIndex::new()))
            .collect();
        Database {
            schema,
            tables: BTreeMap::new(),
            indices,
        }
    }

    /// Build a database from persisted rows, computing every index.
    pub fn bootstrap(schema: Schema, tables: BTreeMap<String, Vec<Row>>) -> Database {
        let mut db = Database::new(schema);
        for (table, rows) in tables {
            let keyed = rows
                .into_iter()
                .filter_map(|row| match row.id() {
                    Ok(id) => Some((id, row)),
                    Err(e) => {
                        log::warn!("dropping persisted row in `{table}`: {e}");
                        None
                    }
                })
                .collect();
            db.ingest_rows(&table, keyed);
        }
        db
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn get_by_id(&self, table: &str, id: &RowId) -> Option<&Row> {
        self.tables.get(table)?.get(id)
    }

    /// The table's rows in insertion order.
    pub fn rows(&self, table: &str) -> impl Iterator<Item = &Row> {
        self.tables.get(table).into_iter().flat_map(|t| t.values())
    }

    /// The table's maximum `updatedAt`, for folding into the sync cursor.
    pub fn max_updated_at(&self, table: &str) -> Option<f64> {
        self.rows(table).filter_map(|row| row.version()).fold(None, |acc, v| {
            Some(match acc {
                Some(a) if a >= v => a,
                _ => v,
            })
        })
    }

    /// Rows of `table` whose `column` carries `value`, by index when one
    /// exists and by scan otherwise. Both paths return the same rows in
    /// ascending id order; values that index to nothing match nothing.
    pub fn lookup_by_fk(&self, table: &str, column: &str, value: &Value) -> Vec<&Row> {
        let Some(key) = value.index_key() else {
            return Vec::new();
        };
        if let Some(index) = self.indices.get(&(table.to_owned(), column.to_owned())) {
            index
                .ids_for(&key)
                .filter_map(|id| self.get_by_id(table, id))
                .collect()
        } else {
            let mut matches: Vec<(&RowId, &Row)> = self
                .tables
                .get(table)
                .into_iter()
                .flat_map(|t| t.iter())
                .filter(|(_, row)| row.get_or_null(column).index_key().as_deref() == Some(key.as_str()))
                .collect();
            matches.sort_by(|(a, _), (b, _)| a.cmp(b));
            matches.into_iter().map(|(_, row)| row).collect()
        }
    }

    /// Ingest delta rows for one table: merge fields into the stored row
    /// under LWW, and move index buckets for exactly the columns whose key
    /// changed. Returns the before/after of every row, in delta order.
    pub fn ingest_rows(&mut self, table: &str, rows: Vec<(RowId, Row)>) -> Vec<AppliedRow> {
        let mut applied = Vec::with_capacity(rows.len());
        for (id, incoming) in rows {
            let existing = self.tables.get(table).and_then(|t| t.get(&id)).cloned();

            if let Some(old) = &existing {
                if !lww_accepts(old, &incoming) {
                    applied.push(AppliedRow {
                        id,
                        old: existing.clone(),
                        new: old.clone(),
                    });
                    continue;
                }
            }

            let mut merged = existing.clone().unwrap_or_default();
            for (field, value) in incoming.fields() {
                merged.insert(field.clone(), value.clone());
            }

            for update in self.index_updates(table, &id, existing.as_ref(), &merged) {
                if let Some(index) = self.indices.get_mut(&(update.table.clone(), update.column.clone())) {
                    index.apply(&update);
                }
            }

            self.tables.entry(table.to_owned()).or_default().insert(id.clone(), merged.clone());
            applied.push(AppliedRow {
                id,
                old: existing,
                new: merged,
            });
        }
        applied
    }

    /// The minimal bucket moves for one row transition: one entry per
    /// indexed column on the row's table whose key actually changed.
    fn index_updates(&self, table: &str, id: &RowId, old: Option<&Row>, new: &Row) -> Vec<IndexUpdate> {
        self.indices
            .keys()
            .filter(|(t, _)| t == table)
            .map(|(t, column)| IndexUpdate {
                table: t.clone(),
                column: column.clone(),
                old_key: old.and_then(|row| row.get_or_null(column).index_key()),
                new_key: new.get_or_null(column).index_key(),
                row_id: id.clone(),
            })
            .filter(IndexUpdate::is_effective)
            .collect()
    }

    #[cfg(test)]
    fn index(&self, table: &str, column: &str) -> &FkIndex {
        &self.indices[&(table.to_owned(), column.to_owned())]
    }

    /// Every index entry must hold exactly the ids whose rows carry that
    /// key. Recomputes from scratch and compares.
    #[cfg(test)]
    fn assert_index_consistency(&self) {
        for ((table, column), index) in &self.indices {
            let mut expected = FkIndex::new();
            for (id, row) in self.tables.get(table).into_iter().flat_map(|t| t.iter()) {
                if let Some(key) = row.get_or_null(column).index_key() {
                    expected.insert(key, id.clone());
                }
            }
            assert_eq!(&expected, index, "index ({table}, {column}) drifted");
        }
    }
}
