use crate::errors::CoreError;
use std::fs::{self, File, FileTimes, Metadata, OpenOptions, Permissions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Filesystem abstraction boundary for the trash subsystems.
///
/// Every component performs its I/O through this trait so tests can inject
/// faults (a rename that reports `EXDEV`, a removal that fails half way) and
/// so the clock used for staleness checks can be controlled.
pub trait FileSystem: Send + Sync {
    /// Returns the current time in wall-clock format.
    fn now(&self) -> SystemTime;

    /// Returns true when path exists (symlink-aware: dangling links count).
    fn exists(&self, path: &Path) -> bool;

    /// Reads file metadata.
    fn metadata(&self, path: &Path) -> crate::Result<Metadata>;

    /// Reads symlink metadata.
    fn symlink_metadata(&self, path: &Path) -> crate::Result<Metadata>;

    /// Resolves symlinks and relative segments.
    fn canonicalize(&self, path: &Path) -> crate::Result<PathBuf>;

    /// Creates a directory and all missing parent directories.
    fn create_dir_all(&self, path: &Path) -> crate::Result<()>;

    /// Creates a directory.
    fn create_dir(&self, path: &Path) -> crate::Result<()>;

    /// Writes raw bytes atomically (temp file + fsync + replace).
    fn write(&self, path: &Path, data: &[u8]) -> crate::Result<()>;

    /// Writes raw bytes to a file that must not exist yet.
    fn write_new(&self, path: &Path, data: &[u8]) -> crate::Result<()>;

    /// Reads UTF-8 text.
    fn read_to_string(&self, path: &Path) -> crate::Result<String>;

    /// Removes a file or symlink.
    fn remove_file(&self, path: &Path) -> crate::Result<()>;

    /// Removes a directory tree.
    fn remove_dir_all(&self, path: &Path) -> crate::Result<()>;

    /// Renames/moves a path.
    fn rename(&self, from: &Path, to: &Path) -> crate::Result<()>;

    /// Lists directory children as concrete paths.
    fn list_dir(&self, path: &Path) -> crate::Result<Vec<PathBuf>>;

    /// Copies a regular file's content and permission bits.
    fn copy_file(&self, from: &Path, to: &Path) -> crate::Result<u64>;

    /// Reads a symlink target.
    fn read_link(&self, path: &Path) -> crate::Result<PathBuf>;

    /// Creates a symlink at `link` pointing to `target`.
    fn symlink(&self, target: &Path, link: &Path) -> crate::Result<()>;

    /// Applies permission bits.
    fn set_permissions(&self, path: &Path, permissions: Permissions) -> crate::Result<()>;

    /// Applies access and modification times (follows symlinks).
    fn set_times(&self, path: &Path, accessed: SystemTime, modified: SystemTime)
        -> crate::Result<()>;

    /// Removes a file, symlink or directory tree without following links.
    fn remove_all(&self, path: &Path) -> crate::Result<()> {
        let meta = self.symlink_metadata(path)?;
        if meta.is_dir() {
            self.remove_dir_all(path)
        } else {
            self.remove_file(path)
        }
    }

    /// Like [`FileSystem::remove_all`] but a missing path is not an error.
    fn remove_if_exists(&self, path: &Path) -> crate::Result<()> {
        match self.remove_all(path) {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }
}

/// Default filesystem implementation backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn metadata(&self, path: &Path) -> crate::Result<Metadata> {
        fs::metadata(path).map_err(|err| CoreError::io(path, err))
    }

    fn symlink_metadata(&self, path: &Path) -> crate::Result<Metadata> {
        fs::symlink_metadata(path).map_err(|err| CoreError::io(path, err))
    }

    fn canonicalize(&self, path: &Path) -> crate::Result<PathBuf> {
        fs::canonicalize(path).map_err(|err| CoreError::io(path, err))
    }

    fn create_dir_all(&self, path: &Path) -> crate::Result<()> {
        fs::create_dir_all(path).map_err(|err| CoreError::io(path, err))
    }

    fn create_dir(&self, path: &Path) -> crate::Result<()> {
        fs::create_dir(path).map_err(|err| CoreError::io(path, err))
    }

    fn write(&self, path: &Path, data: &[u8]) -> crate::Result<()> {
        let file_name = path
            .file_name()
            .ok_or_else(|| CoreError::invalid_input(format!("no file name in {}", path.display())))?;
        let mut tmp_name = std::ffi::OsString::from(".");
        tmp_name.push(file_name);
        tmp_name.push(format!(".{}.tmp", std::process::id()));
        let tmp = path.with_file_name(tmp_name);

        let result = (|| -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        })();
        if let Err(err) = result {
            let _ = fs::remove_file(&tmp);
            return Err(CoreError::io(path, err));
        }
        Ok(())
    }

    fn write_new(&self, path: &Path, data: &[u8]) -> crate::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| CoreError::io(path, err))?;
        file.write_all(data)
            .and_then(|_| file.sync_all())
            .map_err(|err| {
                let _ = fs::remove_file(path);
                CoreError::io(path, err)
            })
    }

    fn read_to_string(&self, path: &Path) -> crate::Result<String> {
        fs::read_to_string(path).map_err(|err| CoreError::io(path, err))
    }

    fn remove_file(&self, path: &Path) -> crate::Result<()> {
        fs::remove_file(path).map_err(|err| CoreError::io(path, err))
    }

    fn remove_dir_all(&self, path: &Path) -> crate::Result<()> {
        fs::remove_dir_all(path).map_err(|err| CoreError::io(path, err))
    }

    fn rename(&self, from: &Path, to: &Path) -> crate::Result<()> {
        fs::rename(from, to).map_err(|err| CoreError::io(from, err))
    }

    fn list_dir(&self, path: &Path) -> crate::Result<Vec<PathBuf>> {
        fs::read_dir(path)
            .map_err(|err| CoreError::io(path, err))?
            .map(|entry| entry.map(|v| v.path()))
            .collect::<Result<Vec<PathBuf>, io::Error>>()
            .map_err(|err| CoreError::io(path, err))
    }

    fn copy_file(&self, from: &Path, to: &Path) -> crate::Result<u64> {
        fs::copy(from, to).map_err(|err| CoreError::io(from, err))
    }

    fn read_link(&self, path: &Path) -> crate::Result<PathBuf> {
        fs::read_link(path).map_err(|err| CoreError::io(path, err))
    }

    #[cfg(unix)]
    fn symlink(&self, target: &Path, link: &Path) -> crate::Result<()> {
        std::os::unix::fs::symlink(target, link).map_err(|err| CoreError::io(link, err))
    }

    #[cfg(not(unix))]
    fn symlink(&self, _target: &Path, link: &Path) -> crate::Result<()> {
        Err(CoreError::io(
            link,
            io::Error::new(io::ErrorKind::Unsupported, "symlinks are not supported"),
        ))
    }

    fn set_permissions(&self, path: &Path, permissions: Permissions) -> crate::Result<()> {
        fs::set_permissions(path, permissions).map_err(|err| CoreError::io(path, err))
    }

    fn set_times(
        &self,
        path: &Path,
        accessed: SystemTime,
        modified: SystemTime,
    ) -> crate::Result<()> {
        let times = FileTimes::new().set_accessed(accessed).set_modified(modified);
        File::open(path)
            .and_then(|file| file.set_times(times))
            .map_err(|err| CoreError::io(path, err))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::errors::{CoreError, Result};
    use crate::fs::{FileSystem, RealFileSystem};
    use std::fs::{Metadata, Permissions};
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime};

    /// Real filesystem with switchable faults and a skewable clock.
    #[derive(Default)]
    pub struct FaultyFs {
        pub fail_rename: AtomicBool,
        pub fail_remove: AtomicBool,
        pub fail_remove_on: std::sync::Mutex<Option<PathBuf>>,
        /// Renames onto this path fail with `EACCES`.
        pub fail_rename_to: std::sync::Mutex<Option<PathBuf>>,
        pub skew_secs: AtomicUsize,
        inner: RealFileSystem,
    }

    impl FaultyFs {
        pub fn cross_device() -> Self {
            let fs = Self::default();
            fs.fail_rename.store(true, Ordering::SeqCst);
            fs
        }

        fn should_fail_remove(&self, path: &Path) -> bool {
            if self.fail_remove.load(Ordering::SeqCst) {
                return true;
            }
            matches!(&*self.fail_remove_on.lock().unwrap(), Some(p) if p == path)
        }
    }

    impl FileSystem for FaultyFs {
        fn now(&self) -> SystemTime {
            self.inner.now() + Duration::from_secs(self.skew_secs.load(Ordering::SeqCst) as u64)
        }
        fn exists(&self, path: &Path) -> bool {
            self.inner.exists(path)
        }
        fn metadata(&self, path: &Path) -> Result<Metadata> {
            self.inner.metadata(path)
        }
        fn symlink_metadata(&self, path: &Path) -> Result<Metadata> {
            self.inner.symlink_metadata(path)
        }
        fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
            self.inner.canonicalize(path)
        }
        fn create_dir_all(&self, path: &Path) -> Result<()> {
            self.inner.create_dir_all(path)
        }
        fn create_dir(&self, path: &Path) -> Result<()> {
            self.inner.create_dir(path)
        }
        fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
            self.inner.write(path, data)
        }
        fn write_new(&self, path: &Path, data: &[u8]) -> Result<()> {
            self.inner.write_new(path, data)
        }
        fn read_to_string(&self, path: &Path) -> Result<String> {
            self.inner.read_to_string(path)
        }
        fn remove_file(&self, path: &Path) -> Result<()> {
            if self.should_fail_remove(path) {
                return Err(CoreError::io(path, io::Error::from(io::ErrorKind::PermissionDenied)));
            }
            self.inner.remove_file(path)
        }
        fn remove_dir_all(&self, path: &Path) -> Result<()> {
            if self.should_fail_remove(path) {
                return Err(CoreError::io(path, io::Error::from(io::ErrorKind::PermissionDenied)));
            }
            self.inner.remove_dir_all(path)
        }
        fn rename(&self, from: &Path, to: &Path) -> Result<()> {
            if self.fail_rename.load(Ordering::SeqCst) {
                return Err(CoreError::io(from, io::Error::from_raw_os_error(libc::EXDEV)));
            }
            if matches!(&*self.fail_rename_to.lock().unwrap(), Some(p) if p == to) {
                return Err(CoreError::io(to, io::Error::from(io::ErrorKind::PermissionDenied)));
            }
            self.inner.rename(from, to)
        }
        fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
            self.inner.list_dir(path)
        }
        fn copy_file(&self, from: &Path, to: &Path) -> Result<u64> {
            self.inner.copy_file(from, to)
        }
        fn read_link(&self, path: &Path) -> Result<PathBuf> {
            self.inner.read_link(path)
        }
        fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
            self.inner.symlink(target, link)
        }
        fn set_permissions(&self, path: &Path, permissions: Permissions) -> Result<()> {
            self.inner.set_permissions(path, permissions)
        }
        fn set_times(&self, path: &Path, accessed: SystemTime, modified: SystemTime) -> Result<()> {
            self.inner.set_times(path, accessed, modified)
        }
    }
}
