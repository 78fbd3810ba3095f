//! The tidemark engine.
//!
//! Wires the leaf crates into a running client: bootstrap from the durable
//! store, catchup against the server, a live push stream, and a registry of
//! live queries that receive ordered incremental patches as state changes.
//!
//! All in-memory state is owned by a single controller actor. Inbound
//! events (application requests, stream events) are messages; outbound
//! emissions leave through one bounded channel. Nothing else mutates the
//! store, so delta application and query re-execution never interleave.

mod catchup;
mod config;
mod controller;
mod engine;
mod error;
mod stream;
pub mod subscription;
mod view;

pub use catchup::{CatchupClient, CatchupState};
pub use config::{BackoffConfig, SyncConfig};
pub use controller::{Controller, ControllerHandle};
pub use engine::Engine;
pub use error::{CatchupError, CoreError};
pub use stream::LiveStream;
pub use view::ResultView;
