use serde::{Deserialize, Serialize};

use crate::Delta;

/// Named events carried on the live push channel, one JSON frame each.
/// Unknown event names fail decode; the stream client logs and drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum StreamEvent {
    #[serde(rename = "connected")]
    Connected {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename = "delta")]
    Delta { data: Delta },
    #[serde(rename = "syncProgress")]
    SyncProgress { data: SyncProgress },
    #[serde(rename = "syncComplete")]
    SyncComplete,
}

/// Catchup progress, both as pushed by the server and as re-emitted to the
/// application while the local catchup driver pages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(rename = "tablesSynced")]
    pub tables_synced: u32,
    #[serde(rename = "totalTables", default, skip_serializing_if = "Option::is_none")]
    pub total_tables: Option<u32>,
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
