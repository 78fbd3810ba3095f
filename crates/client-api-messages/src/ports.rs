use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tidemark_patch::PatchOp;
use tidemark_value::{Row, Value};

use crate::SyncProgress;

/// A rendered query result: one ordered row list per top-level query field.
pub type QueryResult = BTreeMap<String, Vec<Row>>;

/// Everything the application can ask of the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    /// Register a live query; answered with an initial `full` emission.
    #[serde(rename = "register")]
    Register {
        #[serde(rename = "queryId")]
        query_id: String,
        #[serde(rename = "querySource")]
        query_source: serde_json::Value,
        #[serde(rename = "queryInput")]
        query_input: serde_json::Value,
    },
    /// Swap a registered query's input; answered with a fresh `full`.
    #[serde(rename = "update-input")]
    UpdateInput {
        #[serde(rename = "queryId")]
        query_id: String,
        #[serde(rename = "queryInput")]
        query_input: serde_json::Value,
    },
    #[serde(rename = "unregister")]
    Unregister {
        #[serde(rename = "queryId")]
        query_id: String,
    },
    /// Forward a mutation to the server. Effects come back on the delta
    /// path; nothing is applied optimistically.
    #[serde(rename = "sendMutation")]
    SendMutation {
        id: String,
        #[serde(rename = "baseUrl")]
        base_url: String,
        input: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<BTreeMap<String, String>>,
    },
    /// Seed the in-memory state from the persistent store.
    #[serde(rename = "initial-data")]
    InitialData { tables: BTreeMap<String, Vec<Row>> },
}

/// The op list carried by a `delta` emission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDeltaOps {
    pub ops: Vec<PatchOp>,
}

/// Everything the controller emits back to the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "full")]
    Full {
        #[serde(rename = "queryId")]
        query_id: String,
        revision: u64,
        result: QueryResult,
    },
    #[serde(rename = "delta")]
    Delta {
        #[serde(rename = "queryId")]
        query_id: String,
        revision: u64,
        delta: QueryDeltaOps,
    },
    #[serde(rename = "mutationResult")]
    MutationResult { id: String, result: MutationOutcome },
    #[serde(rename = "syncProgress")]
    SyncProgress {
        #[serde(flatten)]
        progress: SyncProgress,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(flatten)]
        error: ErrorEvent,
    },
}

/// A non-fatal fault surfaced to the application with enough context to
/// attribute it: which query, which op, which path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
    #[serde(rename = "queryId", default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// `{ ok: true, value }` or `{ ok: false, error }`.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    Ok(Value),
    Err(MutationFailure),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationFailure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Serialize for MutationOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            MutationOutcome::Ok(value) => {
                map.serialize_entry("ok", &true)?;
                map.serialize_entry("value", value)?;
            }
            MutationOutcome::Err(failure) => {
                map.serialize_entry("ok", &false)?;
                map.serialize_entry("error", failure)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MutationOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<MutationOutcome, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            ok: bool,
            #[serde(default)]
            value: Option<Value>,
            #[serde(default)]
            error: Option<MutationFailure>,
        }
        let raw = Raw::deserialize(deserializer)?;
        match (raw.ok, raw.value, raw.error) {
            (true, Some(value), _) => Ok(MutationOutcome::Ok(value)),
            (true, None, _) => Ok(MutationOutcome::Ok(Value::Null)),
            (false, _, Some(error)) => Ok(MutationOutcome::Err(error)),
            (false, _, None) => Err(D::Error::missing_field("error")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn register_request_wire_shape() {
        let req: ClientRequest = serde_json::from_str(
            r#"{"type":"register","queryId":"q1","querySource":{"user":{}},"queryInput":null}"#,
        )
        .unwrap();
        assert!(matches!(req, ClientRequest::Register { ref query_id, .. } if query_id == "q1"));
    }

    #[test]
    fn outbound_full_envelope() {
        let event = OutboundEvent::Full {
            query_id: "q1".into(),
            revision: 1,
            result: QueryResult::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "full");
        assert_eq!(json["queryId"], "q1");
        assert_eq!(json["revision"], 1);
    }

    #[test]
    fn mutation_outcome_roundtrip() {
        let ok = MutationOutcome::Ok(Value::Int(1));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json, serde_json::json!({"ok": true, "value": 1}));
        assert_eq!(serde_json::from_value::<MutationOutcome>(json).unwrap(), ok);

        let err = MutationOutcome::Err(MutationFailure {
            message: "boom".into(),
            status: Some(500),
            body: None,
        });
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["status"], 500);
        assert_eq!(serde_json::from_value::<MutationOutcome>(json).unwrap(), err);
    }

    #[test]
    fn error_event_flattens_into_the_envelope() {
        let event = OutboundEvent::Error {
            error: ErrorEvent {
                message: "path does not resolve".into(),
                query_id: Some("q1".into()),
                op: Some("set-row".into()),
                path: Some(".user[5]".into()),
                details: None,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["queryId"], "q1");
        assert_eq!(json["op"], "set-row");
    }
}
