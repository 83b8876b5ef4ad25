//! Trash storage formats behind a single capability trait.

mod legacy;
mod spec;

pub use legacy::LegacyBackend;
pub use spec::{discover_external, SpecBackend};

use crate::errors::{CoreError, Result};
use crate::fs::FileSystem;
use crate::models::{BackendId, BackendInfo, BackendKind, TrashedEntry};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Operations every trash format supports.
///
/// Paths handed to [`TrashBackend::put`] must already be absolute.
pub trait TrashBackend {
    fn id(&self) -> BackendId;

    fn kind(&self) -> BackendKind;

    fn info(&self) -> BackendInfo;

    /// Moves `path` into the trash.
    fn put(&self, path: &Path) -> Result<TrashedEntry>;

    fn list(&self) -> Result<Vec<TrashedEntry>>;

    /// Moves the payload back to `destination`, or to its original path.
    /// Returns where it ended up.
    fn restore(&self, entry: &TrashedEntry, destination: Option<&Path>) -> Result<PathBuf>;

    /// Permanently deletes the payload and its metadata.
    fn remove(&self, entry: &TrashedEntry) -> Result<()>;

    /// True when `path` can be stored without crossing a device boundary.
    fn same_device(&self, path: &Path) -> Result<bool>;

    /// True when the backend was told to take paths from any device.
    fn accepts_fallback(&self) -> bool;
}

/// The closed set of backends selected at startup.
pub enum Backend {
    Spec(SpecBackend),
    Legacy(LegacyBackend),
}

impl Backend {
    fn inner(&self) -> &dyn TrashBackend {
        match self {
            Self::Spec(backend) => backend,
            Self::Legacy(backend) => backend,
        }
    }
}

impl From<SpecBackend> for Backend {
    fn from(backend: SpecBackend) -> Self {
        Self::Spec(backend)
    }
}

impl From<LegacyBackend> for Backend {
    fn from(backend: LegacyBackend) -> Self {
        Self::Legacy(backend)
    }
}

impl TrashBackend for Backend {
    fn id(&self) -> BackendId {
        self.inner().id()
    }

    fn kind(&self) -> BackendKind {
        self.inner().kind()
    }

    fn info(&self) -> BackendInfo {
        self.inner().info()
    }

    fn put(&self, path: &Path) -> Result<TrashedEntry> {
        self.inner().put(path)
    }

    fn list(&self) -> Result<Vec<TrashedEntry>> {
        self.inner().list()
    }

    fn restore(&self, entry: &TrashedEntry, destination: Option<&Path>) -> Result<PathBuf> {
        self.inner().restore(entry, destination)
    }

    fn remove(&self, entry: &TrashedEntry) -> Result<()> {
        self.inner().remove(entry)
    }

    fn same_device(&self, path: &Path) -> Result<bool> {
        self.inner().same_device(path)
    }

    fn accepts_fallback(&self) -> bool {
        self.inner().accepts_fallback()
    }
}

/// Size, type and permission bits of a path about to be trashed or listed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryStat {
    pub size: u64,
    pub is_dir: bool,
    pub mode: u32,
}

impl EntryStat {
    /// Directories report the sum of their regular files; links are not followed.
    pub fn of(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        let meta = fs.symlink_metadata(path)?;
        let is_dir = meta.is_dir();
        let size = if is_dir {
            WalkDir::new(path)
                .follow_links(false)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| entry.metadata().ok())
                .map(|meta| meta.len())
                .sum()
        } else {
            meta.len()
        };
        Ok(Self {
            size,
            is_dir,
            mode: mode_of(&meta),
        })
    }
}

#[cfg(unix)]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Path whose device decides where `path` may be stored. A symlink is
/// judged by the directory holding it, not by its target.
pub(crate) fn device_probe(fs: &dyn FileSystem, path: &Path) -> PathBuf {
    match fs.symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/")),
        _ => path.to_path_buf(),
    }
}

/// Fails with `NotFound` unless `path` exists (dangling links count).
pub(crate) fn require_exists(fs: &dyn FileSystem, path: &Path) -> Result<()> {
    if fs.exists(path) {
        Ok(())
    } else {
        Err(CoreError::NotFound(path.to_path_buf()))
    }
}

/// Refuses to trash a trash directory or anything containing one.
pub(crate) fn guard_trash_roots<'a>(
    path: &Path,
    roots: impl IntoIterator<Item = &'a Path>,
) -> Result<()> {
    for root in roots {
        if root.starts_with(path) {
            return Err(CoreError::invalid_input(format!(
                "refusing to trash {}: it contains the trash directory {}",
                path.display(),
                root.display()
            )));
        }
    }
    Ok(())
}

/// Base name of `path`, rejecting paths like `/` that have none.
pub(crate) fn base_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| CoreError::invalid_input(format!("{} has no file name", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::RealFileSystem;

    #[test]
    fn directory_size_sums_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        std::fs::create_dir_all(tree.join("a/b")).unwrap();
        std::fs::write(tree.join("one"), vec![0u8; 100]).unwrap();
        std::fs::write(tree.join("a/b/two"), vec![0u8; 23]).unwrap();

        let stat = EntryStat::of(&RealFileSystem, &tree).unwrap();
        assert!(stat.is_dir);
        assert_eq!(stat.size, 123);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_probed_through_their_parent() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("/nonexistent/target", &link).unwrap();

        assert_eq!(device_probe(&RealFileSystem, &link), dir.path());
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(device_probe(&RealFileSystem, &file), file);
        require_exists(&RealFileSystem, &link).unwrap();
    }

    #[test]
    fn trash_roots_and_their_ancestors_are_refused() {
        let roots = [Path::new("/home/ann/.local/share/Trash")];
        assert!(guard_trash_roots(Path::new("/home/ann"), roots).is_err());
        assert!(guard_trash_roots(Path::new("/home/ann/.local/share/Trash"), roots).is_err());
        assert!(guard_trash_roots(Path::new("/home/ann/notes.txt"), roots).is_ok());
    }

    #[test]
    fn root_has_no_base_name() {
        assert!(base_name(Path::new("/")).is_err());
        assert_eq!(base_name(Path::new("/tmp/a b.txt")).unwrap(), "a b.txt");
    }
}
