//! Issue tracking stored inside your version control repository.
//!
//! wong keeps issue records as JSON files on a dedicated, immutable
//! revision (the `wong-db` side-channel) that lives beside normal code
//! history. Operations are safe under concurrent access from multiple
//! working copies of the same repository: writes are tracked per store
//! instance and folded into the side-channel by an atomic, file-locked
//! [`Store::sync`](store::Store::sync).
//!
//! The layers, bottom up:
//!
//! - [`vcs`]: a backend-neutral capability trait over jj and git, driven
//!   as child processes; [`vcs::detect`] picks a backend per repository.
//! - [`store`]: the wong-db store. Init, typed reads pinned to the
//!   side-channel, dirty-tracked writes, sync, push/pull.
//! - [`orchestrator`]: per-subtask workspaces and squash-back on
//!   completion.
//! - [`conflict`]: auto-resolution for store-file conflicts.
//! - [`passthrough`]: the `wj` shim that syncs after backend write
//!   commands.

pub mod audit;
pub mod conflict;
pub mod error;
pub mod exec;
pub mod orchestrator;
pub mod passthrough;
pub mod store;
pub mod vcs;

pub use error::{Error, Result};
pub use exec::CancelToken;
pub use store::Store;
pub use vcs::detect::Context;
