use tidemark_client_api_messages::{OutboundEvent, QueryResult};
use tidemark_patch::apply;
use tidemark_value::Value;

/// The consumer side of one subscription: the last received full result
/// with query deltas replayed over it, under strict revision ordering.
///
/// Stale or replayed envelopes (revision ≤ current) are dropped and
/// logged, which is what makes delta application idempotent.
#[derive(Debug, Clone)]
pub struct ResultView {
    query_id: String,
    revision: u64,
    value: Value,
}

impl ResultView {
    pub fn new(query_id: impl Into<String>) -> ResultView {
        ResultView {
            query_id: query_id.into(),
            revision: 0,
            value: Value::Null,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Fold one outbound envelope in. Returns whether the view advanced.
    /// Per-op path errors are logged with full context and skipped; the
    /// remaining ops still apply.
    pub fn apply_event(&mut self, event: &OutboundEvent) -> bool {
        match event {
            OutboundEvent::Full { query_id, revision, result } if query_id == &self.query_id => {
                if !self.accept_revision(*revision) {
                    return false;
                }
                self.value = result_value(result);
                true
            }
            OutboundEvent::Delta { query_id, revision, delta } if query_id == &self.query_id => {
                if !self.accept_revision(*revision) {
                    return false;
                }
                let (next, errors) = apply(&self.value, &delta.ops);
                for error in errors {
                    log::error!(
                        "query `{}`: op `{}` at `{}` failed: {}",
                        self.query_id,
                        error.op,
                        error.path,
                        error.detail
                    );
                }
                self.value = next;
                true
            }
            _ => false,
        }
    }

    fn accept_revision(&mut self, revision: u64) -> bool {
        if revision <= self.revision {
            log::warn!(
                "query `{}`: dropping out-of-order revision {revision} (at {})",
                self.query_id,
                self.revision
            );
            return false;
        }
        self.revision = revision;
        true
    }
}

fn result_value(result: &QueryResult) -> Value {
    Value::Object(
        result
            .iter()
            .map(|(field, rows)| {
                let list = rows.iter().map(|row| Value::Object(row.0.clone())).collect();
                (field.clone(), Value::Array(list))
            })
            .collect(),
    )
}
