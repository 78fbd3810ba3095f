use std::collections::HashMap;

use thiserror::Error;
use tidemark_value::{Row, RowId};

use crate::{PatchOp, Path};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DiffError {
    #[error("result row without an `id` cannot be diffed")]
    RowWithoutId,
}

/// Reconcile two consecutive ordered results of one query field into ops.
///
/// Two passes: list reconciliation (moves, inserts, trailing removes in
/// descending index order), then value reconciliation (`set-row` at final
/// indices for rows present on both sides whose contents changed). The ops
/// are minimal enough, not provably minimal; replaying them over the old
/// list always reproduces the new one.
pub fn diff_field(query_field: &str, old: &[Row], new: &[Row]) -> Result<Vec<PatchOp>, DiffError> {
    let old_ids = ids_of(old)?;
    let new_ids = ids_of(new)?;
    let old_by_id: HashMap<&RowId, &Row> = old_ids.iter().zip(old).collect();
    let new_by_id: HashMap<&RowId, &Row> = new_ids.iter().zip(new).collect();

    let list_path = Path::field(query_field);
    let mut ops = Vec::new();

    // Pass 1: bring the id sequence in line.
    let mut working = old_ids.clone();
    for (i, id) in new_ids.iter().enumerate() {
        match working.iter().position(|w| w == id) {
            Some(current) => {
                if current != i {
                    ops.push(PatchOp::MoveRow {
                        path: list_path.clone(),
                        from: current,
                        to: i,
                    });
                    let moved = working.remove(current);
                    working.insert(i, moved);
                }
            }
            None => {
                ops.push(PatchOp::InsertRow {
                    path: list_path.clone(),
                    index: i,
                    row: new_by_id[id].clone(),
                });
                working.insert(i, id.clone());
            }
        }
    }
    for k in (new_ids.len()..working.len()).rev() {
        ops.push(PatchOp::RemoveRowByIndex {
            path: list_path.clone(),
            index: k,
        });
    }

    // Pass 2: rows that stayed but changed contents.
    for (i, id) in new_ids.iter().enumerate() {
        if let Some(old_row) = old_by_id.get(id) {
            let new_row = new_by_id[id];
            if *old_row != new_row {
                ops.push(PatchOp::SetRow {
                    path: list_path.at_index(i),
                    row: new_row.clone(),
                });
            }
        }
    }

    Ok(ops)
}

fn ids_of(rows: &[Row]) -> Result<Vec<RowId>, DiffError> {
    rows.iter()
        .map(|row| row.id().map_err(|_| DiffError::RowWithoutId))
        .collect()
}
