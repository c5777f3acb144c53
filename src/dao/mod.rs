/// Party, user, and session lookups against the upstream backend.
pub mod directory;
/// Snapshot entity definitions.
pub mod models;
/// Registry snapshot storage and retrieval operations.
pub mod snapshot_store;
