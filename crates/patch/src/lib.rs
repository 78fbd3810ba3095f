//! Query deltas: the smallest patch describing the change between two
//! consecutive results of one live query.
//!
//! The producer side ([`diff_field`]) reconciles an old and a new ordered
//! row list into move/insert/remove/set ops. The consumer side ([`apply`])
//! replays those ops over the previously received full result. The two are
//! symmetric: for any base `B` and target `T`, `apply(B, diff(B, T)) = T`.
//!
//! Paths address positions inside a result tree, never the underlying
//! relational graph.

mod apply;
mod diff;
mod op;
mod path;

pub use apply::{apply, ApplyError};
pub use diff::{diff_field, DiffError};
pub use op::PatchOp;
pub use path::{ParsePathError, Path, Segment, Selector};
