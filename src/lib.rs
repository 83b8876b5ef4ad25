//! Crash-safe trash can engine.
//! Files are relocated into a recoverable holding area instead of deleted,
//! and can later be restored or purged. Two storage formats are supported:
//! the FreeDesktop layout (one trash per device) and a flat legacy directory
//! whose JSON history is updated through a crash-safe journal.

pub mod backend;
pub mod config;
pub mod errors;
pub mod filter;
pub mod fs;
pub mod helpers;
pub mod journal;
pub mod manager;
pub mod models;
pub mod mounts;
pub mod mover;
pub mod trashinfo;

pub use backend::{Backend, LegacyBackend, SpecBackend, TrashBackend};
pub use config::{Strategy, TrashConfig};
pub use errors::{CoreError, Result};
pub use filter::{Filter, FilterConfig};
pub use fs::{FileSystem, RealFileSystem};
pub use helpers::{
    build_unique_basename,
    collision_name,
    parse_size,
    TRASHINFO_EXTENSION,
    TRASHINFO_TIME_FORMAT,
};
pub use journal::{Journal, JournalOptions, RecoveryReport, Transaction, TransactionState};
pub use manager::Manager;
pub use models::{
    BackendId,
    BackendInfo,
    BackendKind,
    BatchOutcome,
    PutOutcome,
    TrashLocation,
    TrashedEntry,
};
pub use mounts::MountIndex;
pub use mover::{AtomicMover, MoveOptions, MoveStrategy};
pub use trashinfo::TrashInfo;

/// Re-export a small stable API surface for embedding binaries.
pub mod prelude {
    pub use crate::{
        backend::{Backend, TrashBackend},
        config::TrashConfig,
        errors::{CoreError, Result},
        filter::{Filter, FilterConfig},
        fs::{FileSystem, RealFileSystem},
        manager::Manager,
        models::*,
    };
}
