use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tidemark_value::Row;

/// Per-table progress marker for the paged pull. Persisted verbatim.
///
/// `permission_hash` is server-driven and opaque: the client stores it,
/// echoes it back, and may compare it for equality, nothing more.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub tables: BTreeMap<String, CursorEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CursorEntry {
    pub last_seen_updated_at: Option<f64>,
    pub permission_hash: String,
}

impl SyncCursor {
    /// Fold a locally observed `updatedAt` high-water mark into the cursor,
    /// keeping the larger of the two.
    pub fn observe(&mut self, table: &str, updated_at: f64) {
        let entry = self.tables.entry(table.to_owned()).or_default();
        match entry.last_seen_updated_at {
            Some(existing) if existing >= updated_at => {}
            _ => entry.last_seen_updated_at = Some(updated_at),
        }
    }

    /// Adopt a server-reported cursor position for one table.
    pub fn advance(&mut self, table: &str, page: &CatchupTable) {
        let entry = self.tables.entry(table.to_owned()).or_default();
        entry.permission_hash = page.permission_hash.clone();
        if page.last_seen_updated_at.is_some() {
            entry.last_seen_updated_at = page.last_seen_updated_at;
        }
    }
}

/// One page of the catchup response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatchupResponse {
    pub tables: BTreeMap<String, CatchupTable>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatchupTable {
    pub rows: Vec<Row>,
    pub permission_hash: String,
    pub last_seen_updated_at: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cursor_roundtrips_the_persisted_layout() {
        let json = r#"{"tables":{"user":{"last_seen_updated_at":120.5,"permission_hash":"h1"}}}"#;
        let cursor: SyncCursor = serde_json::from_str(json).unwrap();
        assert_eq!(cursor.tables["user"].last_seen_updated_at, Some(120.5));
        assert_eq!(cursor.tables["user"].permission_hash, "h1");
        let back = serde_json::to_string(&cursor).unwrap();
        assert_eq!(serde_json::from_str::<SyncCursor>(&back).unwrap(), cursor);
    }

    #[test]
    fn observe_keeps_the_high_water_mark() {
        let mut cursor = SyncCursor::default();
        cursor.observe("user", 100.0);
        cursor.observe("user", 50.0);
        assert_eq!(cursor.tables["user"].last_seen_updated_at, Some(100.0));
        cursor.observe("user", 150.0);
        assert_eq!(cursor.tables["user"].last_seen_updated_at, Some(150.0));
    }

    #[test]
    fn advance_adopts_server_position_but_keeps_local_mark_when_absent() {
        let mut cursor = SyncCursor::default();
        cursor.observe("user", 100.0);
        cursor.advance(
            "user",
            &CatchupTable {
                rows: vec![],
                permission_hash: "h2".into(),
                last_seen_updated_at: None,
            },
        );
        assert_eq!(cursor.tables["user"].last_seen_updated_at, Some(100.0));
        assert_eq!(cursor.tables["user"].permission_hash, "h2");
    }
}
