//! Persistent state for applied stacks.
//!
//! Each environment has its own state document and lock, so environments
//! can be applied concurrently without contending on shared storage.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use s3::S3StateStore;
pub use store::{STATE_DIR, StateStore, open_store};
pub use types::{ExportRecord, RunHistoryEntry, ResourceRecord, STATE_VERSION, StackState};
