//! Live configuration subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (any collaborator, e.g. security::Firewall):
//!     listen_key / listen_dir
//!     → kv::KvStore::get / list (synchronous initial load)
//!     → callback(current value)   (error aborts registration)
//!     → baseline version recorded
//!
//! Poll loop (one task per watcher):
//!     kv::KvStore::list_wait(namespace/, cursor, 60s)
//!     → subscription.rs (group entries per directory, compare versions)
//!     → callbacks for changed keys and directories
//!     → cursor = store's last index
//! ```
//!
//! # Design Decisions
//! - Delivery is push-based through boxed callbacks, one per key or prefix
//! - Directory subscribers always receive the full snapshot, never a diff
//! - Deleting a child does not trigger a directory delivery on its own

pub mod subscription;
pub mod watcher;

pub use subscription::{CallbackError, DirCallback, DirSnapshot, KeyCallback};
pub use watcher::{
    ConfigWatcher, DispatchReport, ListenOptions, WatchError, WatchResult, WatcherSettings,
};
