//! The message vocabulary spoken at the client's boundaries: server-pushed
//! deltas, the catchup contract, live-stream events, and the inbound and
//! outbound application ports.
//!
//! These types define the only shapes accepted at the boundary. Alternative
//! delta encodings are rejected during decode, not papered over downstream.

mod catchup;
mod delta;
mod ports;
mod stream;

pub use catchup::{CatchupResponse, CatchupTable, CursorEntry, SyncCursor};
pub use delta::{Delta, DeltaDecodeError, TableGroup};
pub use ports::{
    ClientRequest, ErrorEvent, MutationFailure, MutationOutcome, OutboundEvent, QueryDeltaOps, QueryResult,
};
pub use stream::{StreamEvent, SyncProgress};
