//! Shared state between the ingest task and the control thread.

pub mod store;

pub use store::{PendingUpdates, SharedState};
