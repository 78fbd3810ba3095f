use serde::{Deserialize, Serialize};
use thiserror::Error;
use tidemark_value::{Row, RowId, Value};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DeltaDecodeError {
    #[error("table group `{table}` does not carry `id` at header position 0")]
    IdNotFirst { table: String },
    #[error("table group `{table}` row has {got} values for {expected} headers")]
    RowWidthMismatch { table: String, expected: usize, got: usize },
    #[error("table group `{table}` row has an unusable id: {detail}")]
    BadRowId { table: String, detail: String },
}

/// A server-authored change description addressed to all clients.
///
/// Rows are positionally aligned to `headers`, and `id` is always the first
/// header. This grouped shape is the only delta encoding the client accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(rename = "tableGroups")]
    pub table_groups: Vec<TableGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableGroup {
    #[serde(rename = "tableName")]
    pub table_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.table_groups.iter().all(|group| group.rows.is_empty())
    }

    /// Build a one-group delta from full rows, used to funnel catchup pages
    /// through the same ingest path as live deltas. Headers are the union of
    /// the rows' fields with `id` forced to position 0.
    pub fn from_rows(table_name: impl Into<String>, rows: &[Row]) -> Delta {
        let mut headers = vec![tidemark_value::ID_FIELD.to_string()];
        for row in rows {
            for (field, _) in row.fields() {
                if field != tidemark_value::ID_FIELD && !headers.contains(field) {
                    headers.push(field.clone());
                }
            }
        }
        let rows = rows
            .iter()
            .map(|row| headers.iter().map(|h| row.get_or_null(h).clone()).collect())
            .collect();
        Delta {
            table_groups: vec![TableGroup {
                table_name: table_name.into(),
                headers,
                rows,
            }],
        }
    }
}

impl TableGroup {
    /// Decode the positional rows into field→value rows, enforcing the
    /// id-first invariant. Rows with a missing or non-key-typed id reject
    /// the whole group; a malformed group is dropped at ingress.
    pub fn decode_rows(&self) -> Result<Vec<(RowId, Row)>, DeltaDecodeError> {
        if self.headers.first().map(String::as_str) != Some(tidemark_value::ID_FIELD) {
            return Err(DeltaDecodeError::IdNotFirst {
                table: self.table_name.clone(),
            });
        }
        let mut decoded = Vec::with_capacity(self.rows.len());
        for values in &self.rows {
            if values.len() != self.headers.len() {
                return Err(DeltaDecodeError::RowWidthMismatch {
                    table: self.table_name.clone(),
                    expected: self.headers.len(),
                    got: values.len(),
                });
            }
            let id = RowId::from_value(&values[0]).map_err(|e| DeltaDecodeError::BadRowId {
                table: self.table_name.clone(),
                detail: e.to_string(),
            })?;
            let row: Row = self.headers.iter().cloned().zip(values.iter().cloned()).collect();
            decoded.push((id, row));
        }
        Ok(decoded)
    }

    /// The ids named by this group, in row order.
    pub fn changed_ids(&self) -> Vec<RowId> {
        self.rows
            .iter()
            .filter_map(|values| values.first())
            .filter_map(|v| RowId::from_value(v).ok())
            .collect()
    }
}
