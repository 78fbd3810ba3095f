use std::collections::{BTreeMap, BTreeSet};

use tidemark_client_api_messages::{OutboundEvent, QueryDeltaOps, QueryResult};
use tidemark_patch::{diff_field, PatchOp};
use tidemark_query::{collect_field_queries, execute, parse_query, Query};
use tidemark_store::{AppliedRow, Database};

use crate::error::CoreError;
use crate::subscription::{decide, Decision};

/// One registered live query.
#[derive(Debug)]
pub struct Subscription {
    query_id: String,
    query: Query,
    /// Opaque caller payload; swapping it forces a fresh full result.
    input: serde_json::Value,
    /// Bumped on every emission, never otherwise.
    revision: u64,
    result_row_ids: BTreeMap<String, BTreeSet<i64>>,
    last_result: Option<QueryResult>,
}

impl Subscription {
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn result_row_ids(&self) -> &BTreeMap<String, BTreeSet<i64>> {
        &self.result_row_ids
    }

    pub fn input(&self) -> &serde_json::Value {
        &self.input
    }
}

/// The registry of live queries, mutated only by the controller.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    subscriptions: BTreeMap<String, Subscription>,
}

impl SubscriptionManager {
    pub fn new() -> SubscriptionManager {
        SubscriptionManager::default()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn get(&self, query_id: &str) -> Option<&Subscription> {
        self.subscriptions.get(query_id)
    }

    /// Register (or replace) a subscription and emit its initial `full`.
    pub fn register(
        &mut self,
        db: &Database,
        query_id: &str,
        query_source: &serde_json::Value,
        query_input: serde_json::Value,
    ) -> Result<OutboundEvent, CoreError> {
        let query = parse_query(query_source)?;
        let subscription = Subscription {
            query_id: query_id.to_owned(),
            query,
            input: query_input,
            revision: 0,
            result_row_ids: BTreeMap::new(),
            last_result: None,
        };
        self.subscriptions.insert(query_id.to_owned(), subscription);
        let subscription = self.subscriptions.get_mut(query_id).expect("just inserted");
        Ok(run(subscription, db, Emit::ForceFull)?.expect("first run always emits"))
    }

    /// Swap a subscription's input and emit a fresh `full`.
    pub fn update_input(
        &mut self,
        db: &Database,
        query_id: &str,
        query_input: serde_json::Value,
    ) -> Result<OutboundEvent, CoreError> {
        let subscription = self
            .subscriptions
            .get_mut(query_id)
            .ok_or_else(|| CoreError::UnknownQuery(query_id.to_owned()))?;
        subscription.input = query_input;
        Ok(run(subscription, db, Emit::ForceFull)?.expect("forced run always emits"))
    }

    pub fn unregister(&mut self, query_id: &str) -> bool {
        self.subscriptions.remove(query_id).is_some()
    }

    /// Re-emit a `full` for every subscription, e.g. after bootstrap.
    pub fn refresh_all(&mut self, db: &Database) -> Vec<OutboundEvent> {
        let mut events = Vec::with_capacity(self.subscriptions.len());
        for subscription in self.subscriptions.values_mut() {
            match run(subscription, db, Emit::ForceFull) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => log::error!("refresh of `{}` failed: {e}", subscription.query_id),
            }
        }
        events
    }

    /// Route an applied delta: each subscription is screened by the
    /// fine-grained decision, and only the ones that re-execute can emit.
    pub fn handle_changes(
        &mut self,
        db: &Database,
        changes: &BTreeMap<String, Vec<AppliedRow>>,
    ) -> Vec<OutboundEvent> {
        if changes.values().all(Vec::is_empty) {
            return Vec::new();
        }
        let mut events = Vec::new();
        for subscription in self.subscriptions.values_mut() {
            let decision = decide(db.schema(), &subscription.query, &subscription.result_row_ids, changes);
            if decision == Decision::Skip {
                continue;
            }
            match run(subscription, db, Emit::DiffAgainstLast) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => log::error!("re-execution of `{}` failed: {e}", subscription.query_id),
            }
        }
        events
    }
}

#[derive(PartialEq)]
enum Emit {
    ForceFull,
    DiffAgainstLast,
}

/// Execute the subscription's query and emit per §registration/diff rules:
/// a `full` on first run or forced refresh, a `delta` when the structural
/// diff is non-empty, nothing when the result is unchanged. The cached
/// result and row ids always advance.
fn run(subscription: &mut Subscription, db: &Database, emit: Emit) -> Result<Option<OutboundEvent>, CoreError> {
    let output = execute(db, &subscription.query)?;

    // Track an entry for every table the query reads, even when it matched
    // nothing there, so later deltas on that table partition correctly.
    let mut row_ids = output.row_ids;
    for table in collect_field_queries(db.schema(), &subscription.query).keys() {
        row_ids.entry(table.clone()).or_default();
    }

    let event = match (&subscription.last_result, emit) {
        (None, _) | (Some(_), Emit::ForceFull) => {
            subscription.revision += 1;
            Some(OutboundEvent::Full {
                query_id: subscription.query_id.clone(),
                revision: subscription.revision,
                result: output.results.clone(),
            })
        }
        (Some(previous), Emit::DiffAgainstLast) => {
            match diff_results(previous, &output.results) {
                Ok(ops) if ops.is_empty() => None,
                Ok(ops) => {
                    subscription.revision += 1;
                    Some(OutboundEvent::Delta {
                        query_id: subscription.query_id.clone(),
                        revision: subscription.revision,
                        delta: QueryDeltaOps { ops },
                    })
                }
                // A result this diff cannot express falls back to a full.
                Err(e) => {
                    log::warn!("diff for `{}` failed ({e}); emitting full", subscription.query_id);
                    subscription.revision += 1;
                    Some(OutboundEvent::Full {
                        query_id: subscription.query_id.clone(),
                        revision: subscription.revision,
                        result: output.results.clone(),
                    })
                }
            }
        }
    };

    subscription.last_result = Some(output.results);
    subscription.result_row_ids = row_ids;
    Ok(event)
}

fn diff_results(old: &QueryResult, new: &QueryResult) -> Result<Vec<PatchOp>, tidemark_patch::DiffError> {
    static EMPTY: Vec<tidemark_value::Row> = Vec::new();
    let mut ops = Vec::new();
    for (field, new_rows) in new {
        let old_rows = old.get(field).unwrap_or(&EMPTY);
        ops.extend(diff_field(field, old_rows, new_rows)?);
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tidemark_store::Schema;
    use tidemark_value::{Row, RowId, Value};

    fn schema() -> Schema {
        serde_json::from_str(
            r#"{
              "tables": {"user": {}, "post": {}},
              "queryFields": {"user": "user", "post": "post"}
            }"#,
        )
        .unwrap()
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn user(id: i64, name: &str) -> (RowId, Row) {
        (RowId::Int(id), row(&[("id", Value::Int(id)), ("name", Value::from(name))]))
    }

    fn source(json: &str) -> serde_json::Value {
        serde_json::from_str(json).unwrap()
    }

    fn ingest(db: &mut Database, table: &str, rows: Vec<(RowId, Row)>) -> BTreeMap<String, Vec<AppliedRow>> {
        let applied = db.ingest_rows(table, rows);
        [(table.to_string(), applied)].into_iter().collect()
    }

    #[test]
    fn register_emits_full_at_revision_one() {
        let mut db = Database::new(schema());
        db.ingest_rows("user", vec![user(1, "Bob")]);
        let mut manager = SubscriptionManager::new();
        let event = manager
            .register(&db, "q1", &source(r#"{"user": {"selections": {}}}"#), serde_json::Value::Null)
            .unwrap();
        let OutboundEvent::Full { query_id, revision, result } = event else {
            panic!("expected full");
        };
        assert_eq!((query_id.as_str(), revision), ("q1", 1));
        assert_eq!(result["user"].len(), 1);
    }

    #[test]
    fn unrelated_update_emits_nothing() {
        let mut db = Database::new(schema());
        db.ingest_rows(
            "user",
            vec![
                (RowId::Int(1), row(&[("id", Value::Int(1)), ("role", Value::from("admin"))])),
                (RowId::Int(2), row(&[("id", Value::Int(2)), ("role", Value::from("admin"))])),
                (
                    RowId::Int(999),
                    row(&[("id", Value::Int(999)), ("role", Value::from("user")), ("email", Value::from("a"))]),
                ),
            ],
        );
        let mut manager = SubscriptionManager::new();
        manager
            .register(
                &db,
                "q1",
                &source(r#"{"user": {"selections": {"id": true, "role": true}, "where": {"role": {"$eq": "admin"}}}}"#),
                serde_json::Value::Null,
            )
            .unwrap();

        let changes = ingest(
            &mut db,
            "user",
            vec![(RowId::Int(999), row(&[("id", Value::Int(999)), ("email", Value::from("b"))]))],
        );
        let events = manager.handle_changes(&db, &changes);
        assert_eq!(events, vec![]);
        assert_eq!(
            manager.get("q1").unwrap().result_row_ids()["user"],
            BTreeSet::from([1, 2])
        );
    }

    #[test]
    fn sorted_rename_emits_move_and_set() {
        let mut db = Database::new(schema());
        db.ingest_rows("user", vec![user(1, "Bob"), user(2, "Alice"), user(3, "Carol")]);
        let mut manager = SubscriptionManager::new();
        let event = manager
            .register(
                &db,
                "q1",
                &source(r#"{"user": {"selections": {}, "sort": [{"field": "name", "direction": "asc"}]}}"#),
                serde_json::Value::Null,
            )
            .unwrap();
        let OutboundEvent::Full { result, .. } = &event else {
            panic!("expected full")
        };
        let initial: Vec<i64> = result["user"].iter().map(|r| r.id().unwrap().as_int().unwrap()).collect();
        assert_eq!(initial, vec![2, 1, 3]);

        let changes = ingest(&mut db, "user", vec![user(1, "Zed")]);
        let events = manager.handle_changes(&db, &changes);
        assert_eq!(events.len(), 1);
        let OutboundEvent::Delta { revision, delta, .. } = &events[0] else {
            panic!("expected delta");
        };
        assert_eq!(*revision, 2);
        assert!(delta.ops.iter().any(|op| matches!(op, PatchOp::MoveRow { .. })));
        assert!(delta.ops.iter().any(|op| matches!(op, PatchOp::SetRow { .. })));

        // Replaying the ops over the old full reproduces the new order.
        let base: Value = serde_json::from_str(
            &serde_json::to_string(&serde_json::json!({ "user": result["user"] })).unwrap(),
        )
        .unwrap();
        let (patched, errors) = tidemark_patch::apply(&base, &delta.ops);
        assert_eq!(errors, vec![]);
        let order: Vec<i64> = patched.as_object().unwrap()["user"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().unwrap()["id"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn insert_matching_where_emits_insert_op() {
        let mut db = Database::new(schema());
        let mut manager = SubscriptionManager::new();
        manager
            .register(
                &db,
                "q1",
                &source(r#"{"post": {"selections": {}, "where": {"published": true}}}"#),
                serde_json::Value::Null,
            )
            .unwrap();

        let changes = ingest(
            &mut db,
            "post",
            vec![(
                RowId::Int(10),
                row(&[("id", Value::Int(10)), ("title", Value::from("T")), ("published", Value::Bool(true))]),
            )],
        );
        let events = manager.handle_changes(&db, &changes);
        assert_eq!(events.len(), 1);
        let OutboundEvent::Delta { revision, delta, .. } = &events[0] else {
            panic!("expected delta");
        };
        assert_eq!(*revision, 2);
        assert!(matches!(&delta.ops[0], PatchOp::InsertRow { index: 0, .. }));
        assert_eq!(
            manager.get("q1").unwrap().result_row_ids()["post"],
            BTreeSet::from([10])
        );
    }

    #[test]
    fn re_execution_with_identical_result_emits_nothing_but_advances_cache() {
        let mut db = Database::new(schema());
        db.ingest_rows("user", vec![user(1, "Bob")]);
        let mut manager = SubscriptionManager::new();
        manager
            .register(&db, "q1", &source(r#"{"user": {"selections": {}}}"#), serde_json::Value::Null)
            .unwrap();

        // A bare query re-executes on any overlap, but re-sending the same
        // row diffs to nothing.
        let changes = ingest(&mut db, "user", vec![user(1, "Bob")]);
        assert_eq!(manager.handle_changes(&db, &changes), vec![]);
        assert_eq!(manager.get("q1").unwrap().revision(), 1);

        // A real change afterwards still diffs correctly.
        let changes = ingest(&mut db, "user", vec![user(1, "Bobby")]);
        let events = manager.handle_changes(&db, &changes);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], OutboundEvent::Delta { revision: 2, .. }));
    }

    #[test]
    fn update_input_emits_fresh_full() {
        let mut db = Database::new(schema());
        db.ingest_rows("user", vec![user(1, "Bob")]);
        let mut manager = SubscriptionManager::new();
        manager
            .register(&db, "q1", &source(r#"{"user": {"selections": {}}}"#), serde_json::Value::Null)
            .unwrap();
        let event = manager
            .update_input(&db, "q1", serde_json::json!({"page": 2}))
            .unwrap();
        assert!(matches!(event, OutboundEvent::Full { revision: 2, .. }));
        assert_eq!(manager.get("q1").unwrap().input(), &serde_json::json!({"page": 2}));
    }

    #[test]
    fn update_input_on_unknown_query_errors() {
        let db = Database::new(schema());
        let mut manager = SubscriptionManager::new();
        assert!(matches!(
            manager.update_input(&db, "ghost", serde_json::Value::Null),
            Err(CoreError::UnknownQuery(_))
        ));
    }

    #[test]
    fn unregister_stops_emissions() {
        let mut db = Database::new(schema());
        let mut manager = SubscriptionManager::new();
        manager
            .register(&db, "q1", &source(r#"{"user": {"selections": {}}}"#), serde_json::Value::Null)
            .unwrap();
        assert!(manager.unregister("q1"));
        assert!(!manager.unregister("q1"));
        let changes = ingest(&mut db, "user", vec![user(1, "Bob")]);
        assert_eq!(manager.handle_changes(&db, &changes), vec![]);
    }

    #[test]
    fn revisions_strictly_increase_across_emission_kinds() {
        let mut db = Database::new(schema());
        db.ingest_rows("user", vec![user(1, "Bob")]);
        let mut manager = SubscriptionManager::new();
        let mut revisions = Vec::new();

        let event = manager
            .register(&db, "q1", &source(r#"{"user": {"selections": {}}}"#), serde_json::Value::Null)
            .unwrap();
        if let OutboundEvent::Full { revision, .. } = event {
            revisions.push(revision);
        }
        for name in ["A", "B", "C"] {
            let changes = ingest(&mut db, "user", vec![user(1, name)]);
            for event in manager.handle_changes(&db, &changes) {
                match event {
                    OutboundEvent::Full { revision, .. } | OutboundEvent::Delta { revision, .. } => {
                        revisions.push(revision)
                    }
                    _ => {}
                }
            }
        }
        let event = manager.update_input(&db, "q1", serde_json::Value::Null).unwrap();
        if let OutboundEvent::Full { revision, .. } = event {
            revisions.push(revision);
        }

        assert!(revisions.windows(2).all(|w| w[0] < w[1]), "revisions {revisions:?}");
    }
}
