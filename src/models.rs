use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;

/// Handle naming the backend that produced an entry.
///
/// Entries hold this instead of a reference so they can outlive a borrow of
/// the manager; it is only used to route restore/remove calls.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BackendId(pub usize);

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Storage format of a backend.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum BackendKind {
    /// FreeDesktop layout: `files/` + `info/*.trashinfo`, one location per device.
    Spec,
    /// Single flat directory with a JSON history document.
    Legacy,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spec => "xdg",
            Self::Legacy => "legacy",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Summary of a backend as reported to callers.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BackendInfo {
    pub kind: BackendKind,
    /// Human readable description of where trashed data goes.
    pub location: String,
    pub root: PathBuf,
    pub available: bool,
}

/// Where a FreeDesktop location lives.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LocationKind {
    Home,
    External { mount_point: PathBuf },
}

/// One FreeDesktop trash directory.
#[derive(Debug, Clone)]
pub struct TrashLocation {
    pub kind: LocationKind,
    pub path: PathBuf,
    pub files_dir: PathBuf,
    pub info_dir: PathBuf,
    /// Root against which relative `Path=` values resolve. `None` means
    /// original paths are stored absolute.
    pub mount_point: Option<PathBuf>,
}

impl TrashLocation {
    pub fn new(kind: LocationKind, path: PathBuf) -> Self {
        let files_dir = path.join("files");
        let info_dir = path.join("info");
        let mount_point = match &kind {
            LocationKind::Home => None,
            LocationKind::External { mount_point } => Some(mount_point.clone()),
        };
        Self {
            kind,
            path,
            files_dir,
            info_dir,
            mount_point,
        }
    }

    pub fn home(path: PathBuf) -> Self {
        Self::new(LocationKind::Home, path)
    }

    pub fn external(path: PathBuf, mount_point: PathBuf) -> Self {
        Self::new(LocationKind::External { mount_point }, path)
    }
}

/// A trashed file or directory, independent of the backend that stores it.
#[derive(Debug, Clone)]
pub struct TrashedEntry {
    /// Original base name.
    pub name: String,
    pub original_path: PathBuf,
    /// Current location of the payload; unique among live entries.
    pub trash_path: PathBuf,
    pub deleted_at: DateTime<Utc>,
    pub size: u64,
    pub is_dir: bool,
    pub mode: u32,
    /// Backend-local key: the sidecar base name or the history record ID.
    pub key: String,
    pub backend: Option<BackendId>,
}

impl TrashedEntry {
    pub fn with_backend(mut self, backend: BackendId) -> Self {
        self.backend = Some(backend);
        self
    }
}

/// Result of trashing a single path.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub entry: TrashedEntry,
    pub backend: BackendId,
    pub kind: BackendKind,
}

/// Per-path outcome of a batch operation; each path succeeds or fails on its own.
#[derive(Debug)]
pub struct BatchOutcome {
    pub path: PathBuf,
    pub result: crate::Result<PutOutcome>,
}

impl BatchOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}
