//! Live queries: select/where/sort/limit with nested relations.
//!
//! A query is decoded once at registration, then re-executed against the
//! in-memory store whenever a delta could affect its result. The executor
//! reports both the rendered rows and the set of base-row ids it visited,
//! which is what makes the skip/re-execute decision cheap.

mod ast;
mod de;
mod exec;

pub use ast::{Direction, FieldQuery, FilterValue, Query, Selection, SortClause, WhereClause};
pub use de::parse_query;
pub use exec::{collect_field_queries, execute, QueryError, QueryOutput};
