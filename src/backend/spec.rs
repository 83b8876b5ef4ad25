//! FreeDesktop trash: `files/` holds payloads, `info/` one sidecar each.

use super::{base_name, device_probe, guard_trash_roots, require_exists, EntryStat, TrashBackend};
use crate::errors::{CoreError, Result, ResultExt};
use crate::fs::FileSystem;
use crate::helpers::{collision_name, TRASHINFO_EXTENSION};
use crate::models::{BackendId, BackendInfo, BackendKind, TrashLocation, TrashedEntry};
use crate::mounts::{device_of, MountIndex};
use crate::mover::{AtomicMover, MoveOptions};
use crate::trashinfo::{self, TrashInfo};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// Upper bound on `name_N` candidates before giving up.
const MAX_COLLISION_ATTEMPTS: u32 = 10_000;

pub struct SpecBackend {
    id: BackendId,
    fs: Arc<dyn FileSystem>,
    mover: AtomicMover,
    home: TrashLocation,
    external: Vec<TrashLocation>,
    enable_home_fallback: bool,
}

impl SpecBackend {
    /// Creates the home layout under `home_root` if missing.
    pub fn new(
        id: BackendId,
        fs: Arc<dyn FileSystem>,
        home_root: PathBuf,
        external: Vec<TrashLocation>,
        enable_home_fallback: bool,
    ) -> Result<Self> {
        let home = TrashLocation::home(home_root);
        for dir in [&home.files_dir, &home.info_dir] {
            fs.create_dir_all(dir).during("prepare trash directory", dir.clone())?;
        }
        Ok(Self {
            id,
            mover: AtomicMover::new(fs.clone()),
            fs,
            home,
            external,
            enable_home_fallback,
        })
    }

    /// Home location plus every valid external location on `mounts`.
    pub fn discover(
        id: BackendId,
        fs: Arc<dyn FileSystem>,
        home_root: PathBuf,
        mounts: &MountIndex,
        enable_home_fallback: bool,
    ) -> Result<Self> {
        let external = discover_external(fs.as_ref(), mounts, current_uid());
        debug!(home = %home_root.display(), external = external.len(), "trash locations discovered");
        Self::new(id, fs, home_root, external, enable_home_fallback)
    }

    pub fn home(&self) -> &TrashLocation {
        &self.home
    }

    pub fn external(&self) -> &[TrashLocation] {
        &self.external
    }

    pub fn locations(&self) -> impl Iterator<Item = &TrashLocation> {
        std::iter::once(&self.home).chain(self.external.iter())
    }

    /// Location on the same device as `path`, home first.
    fn same_device_location(&self, path: &Path) -> Result<Option<&TrashLocation>> {
        let probe = device_probe(self.fs.as_ref(), path);
        let device = device_of(self.fs.as_ref(), &probe).during("stat device of", probe.clone())?;
        for location in self.locations() {
            match device_of(self.fs.as_ref(), &location.path) {
                Ok(candidate) if candidate == device => return Ok(Some(location)),
                Ok(_) => {}
                Err(err) => {
                    debug!(location = %location.path.display(), error = %err, "skipping unreadable trash location");
                }
            }
        }
        Ok(None)
    }

    fn select_location(&self, path: &Path) -> Result<&TrashLocation> {
        if let Some(location) = self.same_device_location(path)? {
            return Ok(location);
        }
        if self.enable_home_fallback {
            debug!(path = %path.display(), "no trash on this device, using home trash");
            return Ok(&self.home);
        }
        Err(CoreError::CrossDevice(path.to_path_buf()))
    }

    fn location_of(&self, entry: &TrashedEntry) -> Result<&TrashLocation> {
        let parent = entry.trash_path.parent();
        self.locations()
            .find(|location| Some(location.files_dir.as_path()) == parent)
            .ok_or_else(|| CoreError::NotFound(entry.trash_path.clone()))
    }

    fn sidecar_path(location: &TrashLocation, name: &str) -> PathBuf {
        location.info_dir.join(format!("{name}{TRASHINFO_EXTENSION}"))
    }

    /// Claims the first free `name`, `name_1`, ... by creating its sidecar.
    fn claim_name(&self, location: &TrashLocation, base: &str, info: &TrashInfo) -> Result<String> {
        for attempt in 0..MAX_COLLISION_ATTEMPTS {
            let candidate = collision_name(base, attempt);
            if self.fs.exists(&location.files_dir.join(&candidate)) {
                continue;
            }
            match trashinfo::write_exclusive(self.fs.as_ref(), &Self::sidecar_path(location, &candidate), info) {
                Ok(()) => return Ok(candidate),
                Err(err) if err.is_destination_exists() => continue,
                Err(err) => return Err(err),
            }
        }
        Err(CoreError::not_ready(format!(
            "no free name for {base} in {}",
            location.files_dir.display()
        )))
    }

    fn remove_sidecar(&self, location: &TrashLocation, name: &str) {
        let sidecar = Self::sidecar_path(location, name);
        if let Err(err) = self.fs.remove_if_exists(&sidecar) {
            warn!(sidecar = %sidecar.display(), error = %err, "failed to delete sidecar");
        }
    }

    fn list_location(&self, location: &TrashLocation) -> Result<Vec<TrashedEntry>> {
        let mut entries = Vec::new();
        for payload in self.fs.list_dir(&location.files_dir)? {
            let name = match payload.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            let sidecar = Self::sidecar_path(location, &name);
            let info = match trashinfo::read(self.fs.as_ref(), &sidecar) {
                Ok(info) => info,
                Err(err) => {
                    warn!(payload = %payload.display(), error = %err, "skipping entry without a usable sidecar");
                    continue;
                }
            };
            let stat = match EntryStat::of(self.fs.as_ref(), &payload) {
                Ok(stat) => stat,
                Err(err) => {
                    warn!(payload = %payload.display(), error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            entries.push(TrashedEntry {
                name: info.original_name(),
                original_path: info.resolve(location.mount_point.as_deref()),
                trash_path: payload,
                deleted_at: info.deleted_at(),
                size: stat.size,
                is_dir: stat.is_dir,
                mode: stat.mode,
                key: name,
                backend: Some(self.id),
            });
        }
        Ok(entries)
    }
}

impl TrashBackend for SpecBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Spec
    }

    fn info(&self) -> BackendInfo {
        let location = if self.external.is_empty() {
            self.home.path.display().to_string()
        } else {
            format!(
                "{} (+{} external)",
                self.home.path.display(),
                self.external.len()
            )
        };
        BackendInfo {
            kind: BackendKind::Spec,
            location,
            root: self.home.path.clone(),
            available: self.fs.exists(&self.home.files_dir) && self.fs.exists(&self.home.info_dir),
        }
    }

    fn put(&self, path: &Path) -> Result<TrashedEntry> {
        require_exists(self.fs.as_ref(), path)?;
        guard_trash_roots(path, self.locations().map(|location| location.path.as_path()))?;
        let base = base_name(path)?;
        let location = self.select_location(path).during("trash", path)?;
        let stat = EntryStat::of(self.fs.as_ref(), path).during("trash", path)?;

        let info = TrashInfo::for_location(path, location.mount_point.as_deref(), self.fs.now());
        let name = self.claim_name(location, &base, &info).during("trash", path)?;
        let trash_path = location.files_dir.join(&name);

        if let Err(err) = self
            .mover
            .move_path(path, &trash_path, MoveOptions::cross_device(true))
        {
            self.remove_sidecar(location, &name);
            return Err(err.during("trash", path));
        }

        info!(path = %path.display(), trash = %trash_path.display(), "trashed");
        Ok(TrashedEntry {
            name: base,
            original_path: path.to_path_buf(),
            trash_path,
            deleted_at: info.deleted_at(),
            size: stat.size,
            is_dir: stat.is_dir,
            mode: stat.mode,
            key: name,
            backend: Some(self.id),
        })
    }

    fn list(&self) -> Result<Vec<TrashedEntry>> {
        let mut entries = self
            .list_location(&self.home)
            .during("list", self.home.files_dir.clone())?;
        for location in &self.external {
            match self.list_location(location) {
                Ok(found) => entries.extend(found),
                Err(err) => {
                    warn!(location = %location.path.display(), error = %err, "skipping unreadable trash location");
                }
            }
        }
        Ok(entries)
    }

    fn restore(&self, entry: &TrashedEntry, destination: Option<&Path>) -> Result<PathBuf> {
        let location = self.location_of(entry)?;
        require_exists(self.fs.as_ref(), &entry.trash_path)?;
        let target = destination.unwrap_or(&entry.original_path).to_path_buf();
        if self.fs.exists(&target) {
            return Err(CoreError::DestinationExists(target));
        }

        self.mover
            .move_path(&entry.trash_path, &target, MoveOptions::cross_device(true))
            .during("restore", entry.trash_path.clone())?;
        self.remove_sidecar(location, &entry.key);
        info!(trash = %entry.trash_path.display(), path = %target.display(), "restored");
        Ok(target)
    }

    fn remove(&self, entry: &TrashedEntry) -> Result<()> {
        let location = self.location_of(entry)?;
        require_exists(self.fs.as_ref(), &entry.trash_path)?;
        self.fs
            .remove_all(&entry.trash_path)
            .during("remove", entry.trash_path.clone())?;
        self.remove_sidecar(location, &entry.key);
        info!(trash = %entry.trash_path.display(), "removed permanently");
        Ok(())
    }

    fn same_device(&self, path: &Path) -> Result<bool> {
        Ok(self.same_device_location(path)?.is_some())
    }

    fn accepts_fallback(&self) -> bool {
        self.enable_home_fallback
    }
}

/// Valid per-mount trash directories for `uid`: `$top/.Trash/$uid` under a
/// sticky, non-symlink `$top/.Trash`, then `$top/.Trash-$uid`.
pub fn discover_external(fs: &dyn FileSystem, mounts: &MountIndex, uid: u32) -> Vec<TrashLocation> {
    let mut found = Vec::new();
    for mount in mounts.non_root() {
        let top = &mount.mount_point;

        let shared = top.join(".Trash");
        let per_user = shared.join(uid.to_string());
        if fs.exists(&per_user) {
            if is_sticky_dir(fs, &shared) && !is_symlink(fs, &shared) {
                if has_layout(fs, &per_user) {
                    found.push(TrashLocation::external(per_user, top.clone()));
                }
            } else {
                debug!(path = %shared.display(), "ignoring .Trash without sticky bit or behind a symlink");
            }
        }

        let private = top.join(format!(".Trash-{uid}"));
        if has_layout(fs, &private) {
            found.push(TrashLocation::external(private, top.clone()));
        }
    }
    found
}

/// A real directory (not a symlink) with `files` and `info` subdirectories.
fn has_layout(fs: &dyn FileSystem, path: &Path) -> bool {
    is_real_dir(fs, path) && is_real_dir(fs, &path.join("files")) && is_real_dir(fs, &path.join("info"))
}

fn is_real_dir(fs: &dyn FileSystem, path: &Path) -> bool {
    fs.symlink_metadata(path).map(|meta| meta.is_dir()).unwrap_or(false)
}

fn is_symlink(fs: &dyn FileSystem, path: &Path) -> bool {
    fs.symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

#[cfg(unix)]
fn is_sticky_dir(fs: &dyn FileSystem, path: &Path) -> bool {
    match fs.metadata(path) {
        Ok(meta) => meta.is_dir() && meta.mode() & 0o1000 == 0o1000,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_sticky_dir(_fs: &dyn FileSystem, _path: &Path) -> bool {
    false
}

#[cfg(unix)]
fn current_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}
