use std::collections::BTreeMap;

use tidemark_client_api_messages::{CatchupTable, Delta, ErrorEvent, OutboundEvent, SyncCursor};
use tidemark_durability::{KeyValueBackend, RowStore};
use tidemark_store::{AppliedRow, Database, Schema};
use tidemark_value::Row;

use crate::error::CoreError;
use crate::subscription::SubscriptionManager;

/// The state the controller actor owns: the in-memory database, the
/// subscription registry, and the durable row store behind them.
///
/// Everything here is synchronous; the controller decides where the
/// suspension points fall. Tests drive an `Engine` directly.
pub struct Engine<B> {
    db: Database,
    subscriptions: SubscriptionManager,
    row_store: RowStore<B>,
}

impl<B: KeyValueBackend> Engine<B> {
    /// Load persisted rows and build the store plus its indices.
    pub fn bootstrap(schema: Schema, backend: B) -> Result<Engine<B>, CoreError> {
        let row_store = RowStore::new(backend);
        let tables = row_store.get_all_tables()?;
        let db = Database::bootstrap(schema, tables);
        Ok(Engine {
            db,
            subscriptions: SubscriptionManager::new(),
            row_store,
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn register(
        &mut self,
        query_id: &str,
        query_source: &serde_json::Value,
        query_input: serde_json::Value,
    ) -> Result<OutboundEvent, CoreError> {
        self.subscriptions.register(&self.db, query_id, query_source, query_input)
    }

    pub fn update_input(&mut self, query_id: &str, query_input: serde_json::Value) -> Result<OutboundEvent, CoreError> {
        self.subscriptions.update_input(&self.db, query_id, query_input)
    }

    pub fn unregister(&mut self, query_id: &str) -> bool {
        self.subscriptions.unregister(query_id)
    }

    /// Emit a `full` for every registered query against current state.
    pub fn refresh_all(&mut self) -> Vec<OutboundEvent> {
        self.subscriptions.refresh_all(&self.db)
    }

    /// Populate in-memory state from externally supplied rows (the
    /// `initial-data` port). Nothing is written back to persistence.
    pub fn seed_tables(&mut self, tables: BTreeMap<String, Vec<Row>>) {
        for (table, rows) in tables {
            let keyed = rows
                .into_iter()
                .filter_map(|row| match row.id() {
                    Ok(id) => Some((id, row)),
                    Err(e) => {
                        log::warn!("dropping seeded row in `{table}`: {e}");
                        None
                    }
                })
                .collect();
            self.db.ingest_rows(&table, keyed);
        }
    }

    /// Apply one inbound delta end to end: decode each group, mutate store
    /// and indices, write through to persistence, then run the subscription
    /// screen. Malformed groups and persist failures surface as `error`
    /// events without blocking the rest; the in-memory store is the source
    /// of truth for reactivity, persistence catches up on the next write.
    pub fn apply_delta(&mut self, delta: &Delta) -> Vec<OutboundEvent> {
        if delta.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::new();
        let mut changes: BTreeMap<String, Vec<AppliedRow>> = BTreeMap::new();

        for group in &delta.table_groups {
            let rows = match group.decode_rows() {
                Ok(rows) => rows,
                Err(e) => {
                    log::error!("dropping malformed table group: {e}");
                    events.push(error_event(e.to_string(), None, None));
                    continue;
                }
            };
            let applied = self.db.ingest_rows(&group.table_name, rows);

            let merged: Vec<Row> = applied.iter().map(|row| row.new.clone()).collect();
            if let Err(e) = self.row_store.put_rows(&group.table_name, &merged) {
                log::error!("persist of `{}` failed: {e}", group.table_name);
                events.push(error_event(
                    format!("failed to persist `{}`", group.table_name),
                    None,
                    Some(e.to_string()),
                ));
            }

            changes.entry(group.table_name.clone()).or_default().extend(applied);
        }

        events.extend(self.subscriptions.handle_changes(&self.db, &changes));
        events
    }

    /// Funnel one catchup table through the regular delta path.
    pub fn apply_catchup_table(&mut self, table: &str, page: &CatchupTable) -> Vec<OutboundEvent> {
        self.apply_delta(&Delta::from_rows(table, &page.rows))
    }

    /// The cursor a catchup run starts from: the persisted cursor with the
    /// in-memory per-table `updatedAt` high-water marks folded in.
    pub fn initial_cursor(&self) -> SyncCursor {
        let mut cursor = match self.row_store.get_cursor() {
            Ok(Some(cursor)) => cursor,
            Ok(None) => SyncCursor::default(),
            Err(e) => {
                log::warn!("failed to read persisted cursor ({e}); starting fresh");
                SyncCursor::default()
            }
        };
        let tables: Vec<String> = self.db.table_names().map(str::to_owned).collect();
        for table in tables {
            if let Some(max) = self.db.max_updated_at(&table) {
                cursor.observe(&table, max);
            }
        }
        cursor
    }

    pub fn persist_cursor(&mut self, cursor: &SyncCursor) -> Result<(), CoreError> {
        Ok(self.row_store.put_cursor(cursor)?)
    }

    /// Drop persistence and in-memory state alike.
    pub fn reset(&mut self) -> Result<(), CoreError> {
        self.row_store.reset()?;
        self.db = Database::new(self.db.schema().clone());
        Ok(())
    }
}

pub(crate) fn error_event(message: String, query_id: Option<String>, details: Option<String>) -> OutboundEvent {
    OutboundEvent::Error {
        error: ErrorEvent {
            message,
            query_id,
            op: None,
            path: None,
            details,
        },
    }
}
