//! The in-memory relational store.
//!
//! Tables are insertion-ordered id→row maps; secondary indices on
//! (table, column) back foreign-key lookups for one-to-many relations.
//! Ingest merges delta rows under last-writer-wins and maintains the
//! indices incrementally: only columns whose index key actually moved
//! touch a bucket.

mod db;
mod index;
mod schema;

pub use db::{AppliedRow, Database};
pub use index::{FkIndex, IndexUpdate};
pub use schema::{RelationKind, Relationship, Schema, TableSchema};
