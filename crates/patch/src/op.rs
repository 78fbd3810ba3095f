use serde::{Deserialize, Serialize};
use tidemark_value::Row;

use crate::Path;

/// One step of a query delta.
///
/// `set-row` and `remove-row` address a row directly; the list ops address
/// a row list and carry explicit positions. `insert-row` clamps an
/// out-of-range index to `[0, len]`; every other positional op treats an
/// out-of-range position as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PatchOp {
    SetRow { path: Path, row: Row },
    RemoveRow { path: Path },
    InsertRow { path: Path, index: usize, row: Row },
    MoveRow { path: Path, from: usize, to: usize },
    RemoveRowByIndex { path: Path, index: usize },
}

impl PatchOp {
    /// The op's wire name, used in error context.
    pub fn name(&self) -> &'static str {
        match self {
            PatchOp::SetRow { .. } => "set-row",
            PatchOp::RemoveRow { .. } => "remove-row",
            PatchOp::InsertRow { .. } => "insert-row",
            PatchOp::MoveRow { .. } => "move-row",
            PatchOp::RemoveRowByIndex { .. } => "remove-row-by-index",
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            PatchOp::SetRow { path, .. }
            | PatchOp::RemoveRow { path }
            | PatchOp::InsertRow { path, .. }
            | PatchOp::MoveRow { path, .. }
            | PatchOp::RemoveRowByIndex { path, .. } => path,
        }
    }
}
