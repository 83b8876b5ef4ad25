//! Relocates files and directories, preferring an in-place rename.

use crate::errors::{CoreError, Result};
use crate::fs::FileSystem;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Flags accepted by [`AtomicMover::move_path`].
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct MoveOptions {
    /// Fall back to copy-then-delete when the rename fails.
    pub allow_cross_device: bool,
    /// Replace an existing destination instead of failing.
    pub force: bool,
}

impl MoveOptions {
    pub fn cross_device(allow: bool) -> Self {
        Self {
            allow_cross_device: allow,
            force: false,
        }
    }
}

/// How a move was carried out.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MoveStrategy {
    Renamed,
    Copied,
}

#[derive(Clone)]
pub struct AtomicMover {
    fs: Arc<dyn FileSystem>,
}

impl AtomicMover {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Moves `src` to `dst`.
    ///
    /// A failed call leaves the data in exactly one place: either still at
    /// `src` or fully at `dst`.
    pub fn move_path(&self, src: &Path, dst: &Path, options: MoveOptions) -> Result<MoveStrategy> {
        self.fs.symlink_metadata(src).map_err(|err| match err {
            CoreError::Io(path, io) if io.kind() == std::io::ErrorKind::NotFound => {
                CoreError::NotFound(path)
            }
            other => other,
        })?;
        if dst.as_os_str().is_empty() {
            return Err(CoreError::invalid_input("move destination is empty"));
        }
        if self.fs.exists(dst) {
            if !options.force {
                return Err(CoreError::DestinationExists(dst.to_path_buf()));
            }
            debug!(dst = %dst.display(), "replacing existing destination");
            self.fs.remove_all(dst)?;
        }
        if let Some(parent) = dst.parent() {
            if !parent.as_os_str().is_empty() {
                self.fs.create_dir_all(parent)?;
            }
        }

        let rename_err = match self.fs.rename(src, dst) {
            Ok(()) => return Ok(MoveStrategy::Renamed),
            Err(err) => err,
        };
        if !options.allow_cross_device {
            return Err(rename_err);
        }
        debug!(
            src = %src.display(),
            dst = %dst.display(),
            error = %rename_err,
            "rename failed, falling back to copy"
        );

        if let Err(copy_err) = self.copy_tree(src, dst) {
            if let Err(cleanup_err) = self.fs.remove_if_exists(dst) {
                warn!(dst = %dst.display(), error = %cleanup_err, "failed to remove partial copy");
            }
            return Err(copy_err);
        }

        self.remove_source_after_copy(src, dst)?;
        Ok(MoveStrategy::Copied)
    }

    fn remove_source_after_copy(&self, src: &Path, dst: &Path) -> Result<()> {
        let src_is_dir = self
            .fs
            .symlink_metadata(src)
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        let remove_error = match self.fs.remove_all(src) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        // A directory may have been partly removed; the copy is then the only
        // complete one and must survive.
        if src_is_dir && !self.tree_intact(src, dst) {
            warn!(
                src = %src.display(),
                dst = %dst.display(),
                "source partially removed after copy, keeping the copy"
            );
            return Err(remove_error);
        }

        match self.fs.remove_all(dst) {
            Ok(()) => Err(remove_error),
            Err(cleanup_error) => Err(CoreError::MoveCleanup {
                src: src.to_path_buf(),
                dst: dst.to_path_buf(),
                remove_error: Box::new(remove_error),
                cleanup_error: Box::new(cleanup_error),
            }),
        }
    }

    /// True when every entry of the copy still exists at the source.
    fn tree_intact(&self, src: &Path, copy: &Path) -> bool {
        let children = match self.fs.list_dir(copy) {
            Ok(children) => children,
            Err(_) => return false,
        };
        children.iter().all(|child| {
            let Some(name) = child.file_name() else {
                return false;
            };
            let original = src.join(name);
            match self.fs.symlink_metadata(child) {
                Ok(meta) if meta.is_dir() => self.tree_intact(&original, child),
                Ok(_) => self.fs.exists(&original),
                Err(_) => false,
            }
        })
    }

    /// Copies `src` to `dst` preserving mode, timestamps and symlink targets.
    pub fn copy_tree(&self, src: &Path, dst: &Path) -> Result<()> {
        let meta = self.fs.symlink_metadata(src)?;
        let file_type = meta.file_type();

        if file_type.is_symlink() {
            let target = self.fs.read_link(src)?;
            return self.fs.symlink(&target, dst);
        }

        if file_type.is_dir() {
            self.fs.create_dir(dst)?;
            for child in self.fs.list_dir(src)? {
                let Some(name) = child.file_name() else {
                    continue;
                };
                self.copy_tree(&child, &dst.join(name))?;
            }
        } else {
            self.fs.copy_file(src, dst)?;
        }

        self.fs.set_permissions(dst, meta.permissions())?;
        if let (Ok(accessed), Ok(modified)) = (meta.accessed(), meta.modified()) {
            self.fs.set_times(dst, accessed, modified)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testing::FaultyFs;
    use crate::fs::RealFileSystem;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::Ordering;

    fn real() -> AtomicMover {
        AtomicMover::new(Arc::new(RealFileSystem))
    }

    #[test]
    fn rename_moves_file_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("nested/deeper/a.txt");
        std::fs::write(&src, b"payload").unwrap();

        let strategy = real().move_path(&src, &dst, MoveOptions::default()).unwrap();

        assert_eq!(strategy, MoveStrategy::Renamed);
        assert!(!src.exists());
        assert_eq!(std::fs::read(&dst).unwrap(), b"payload");
    }

    #[test]
    fn existing_destination_is_rejected_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        std::fs::write(&src, b"new").unwrap();
        std::fs::write(&dst, b"old").unwrap();

        let err = real().move_path(&src, &dst, MoveOptions::default()).unwrap_err();
        assert!(matches!(err, CoreError::DestinationExists(_)));
        assert_eq!(std::fs::read(&src).unwrap(), b"new");
        assert_eq!(std::fs::read(&dst).unwrap(), b"old");

        let forced = MoveOptions {
            allow_cross_device: false,
            force: true,
        };
        real().move_path(&src, &dst, forced).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"new");
        assert!(!src.exists());
    }

    #[test]
    fn missing_source_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = real()
            .move_path(&dir.path().join("nope"), &dir.path().join("x"), MoveOptions::default())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn rename_failure_without_fallback_returns_original_error() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        std::fs::write(&src, b"data").unwrap();

        let mover = AtomicMover::new(Arc::new(FaultyFs::cross_device()));
        let err = mover.move_path(&src, &dst, MoveOptions::cross_device(false)).unwrap_err();

        assert!(err.is_cross_device());
        assert!(src.exists());
        assert!(!dst.exists());
    }

    #[test]
    fn cross_device_fallback_copies_tree_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tree");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("sub/file.sh"), b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(src.join("sub/file.sh"), std::fs::Permissions::from_mode(0o751))
            .unwrap();
        std::os::unix::fs::symlink("sub/file.sh", src.join("link")).unwrap();
        let old = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(src.join("sub/file.sh"), old).unwrap();

        let dst = dir.path().join("elsewhere/tree");
        let mover = AtomicMover::new(Arc::new(FaultyFs::cross_device()));
        let strategy = mover.move_path(&src, &dst, MoveOptions::cross_device(true)).unwrap();

        assert_eq!(strategy, MoveStrategy::Copied);
        assert!(!src.exists());
        let copied = dst.join("sub/file.sh");
        assert_eq!(std::fs::read(&copied).unwrap(), b"#!/bin/sh\n");
        let meta = std::fs::metadata(&copied).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o751);
        assert_eq!(filetime::FileTime::from_last_modification_time(&meta), old);
        assert_eq!(std::fs::read_link(dst.join("link")).unwrap(), Path::new("sub/file.sh"));
    }

    #[test]
    fn failed_source_removal_keeps_exactly_one_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        std::fs::write(&src, b"only once").unwrap();

        let fs = Arc::new(FaultyFs::cross_device());
        *fs.fail_remove_on.lock().unwrap() = Some(src.clone());
        let mover = AtomicMover::new(fs.clone());

        let err = mover.move_path(&src, &dst, MoveOptions::cross_device(true)).unwrap_err();
        assert!(matches!(err.root_cause(), CoreError::Io(..)));
        assert_eq!(std::fs::read(&src).unwrap(), b"only once");
        assert!(!dst.exists());
    }

    #[test]
    fn combined_error_when_both_removals_fail() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        std::fs::write(&src, b"data").unwrap();

        let fs = Arc::new(FaultyFs::cross_device());
        fs.fail_remove.store(true, Ordering::SeqCst);
        let mover = AtomicMover::new(fs);

        let err = mover.move_path(&src, &dst, MoveOptions::cross_device(true)).unwrap_err();
        assert!(matches!(err, CoreError::MoveCleanup { .. }));
        assert!(src.exists());
    }
}
