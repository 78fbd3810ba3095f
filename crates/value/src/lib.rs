//! The tagged value model shared by every tidemark crate.
//!
//! Rows are heterogeneous maps over [`Value`], a tagged variant which
//! discriminates decoding, comparison, and the JSON round-trip. The tag is
//! load-bearing: erasing it to a single dynamic type would lose the
//! comparison semantics the query layer depends on.

mod row;
mod value;

pub use row::{lww_accepts, Row, RowError, RowId, ID_FIELD, UPDATED_AT_FIELD};
pub use value::{cmp_values, Value};
