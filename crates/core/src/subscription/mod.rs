//! Live-query subscriptions: the registry, the per-delta skip/re-execute
//! decision, and revisioned emission of full results and query deltas.

mod manager;
mod reactivity;

pub use manager::{Subscription, SubscriptionManager};
pub use reactivity::{decide, Decision};
