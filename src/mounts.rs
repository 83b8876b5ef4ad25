//! Mounted filesystem discovery and device comparison.

#[cfg(not(unix))]
use crate::errors::CoreError;
use crate::errors::Result;
use crate::fs::FileSystem;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

const MOUNTS_FILE: &str = "/proc/self/mounts";

/// Filesystem types that never hold user data worth trashing.
const PSEUDO_FILESYSTEMS: &[&str] = &[
    "autofs",
    "binfmt_misc",
    "bpf",
    "cgroup",
    "cgroup2",
    "configfs",
    "debugfs",
    "devpts",
    "devtmpfs",
    "efivarfs",
    "fusectl",
    "hugetlbfs",
    "mqueue",
    "nsfs",
    "proc",
    "pstore",
    "ramfs",
    "rpc_pipefs",
    "securityfs",
    "selinuxfs",
    "squashfs",
    "sysfs",
    "tmpfs",
    "tracefs",
];

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Mount {
    pub source: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
}

impl Mount {
    fn root() -> Self {
        Self {
            source: "rootfs".to_string(),
            mount_point: PathBuf::from("/"),
            fs_type: String::new(),
        }
    }
}

/// Writable, non-virtual mounts; the root filesystem is always present.
#[derive(Debug, Clone)]
pub struct MountIndex {
    mounts: Vec<Mount>,
}

impl MountIndex {
    /// Reads the live mount table.
    pub fn load(fs: &dyn FileSystem) -> Result<Self> {
        let content = fs.read_to_string(Path::new(MOUNTS_FILE))?;
        Ok(Self::parse(&content))
    }

    /// Like [`MountIndex::load`] but falls back to just `/` when the table is unreadable.
    pub fn load_or_root(fs: &dyn FileSystem) -> Self {
        Self::load(fs).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "mount table unreadable, assuming a single root mount");
            Self::from_volumes(Vec::new())
        })
    }

    /// Parses `/proc/self/mounts` formatted text.
    pub fn parse(content: &str) -> Self {
        let mut mounts: Vec<Mount> = Vec::new();
        for line in content.lines() {
            let mut fields = line.split_whitespace();
            let (Some(source), Some(target), Some(fs_type)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let options = fields.next().unwrap_or("");
            if PSEUDO_FILESYSTEMS.contains(&fs_type) {
                continue;
            }
            if options.split(',').any(|option| option == "ro") {
                continue;
            }
            let mount_point = PathBuf::from(unescape_mountpoint(target));
            if mounts.iter().any(|m| m.mount_point == mount_point) {
                continue;
            }
            mounts.push(Mount {
                source: source.to_string(),
                mount_point,
                fs_type: fs_type.to_string(),
            });
        }
        Self::with_root(mounts)
    }

    /// Builds an index from an explicit list of volumes (`TRASH_VOLUMES`).
    pub fn from_volumes(volumes: Vec<PathBuf>) -> Self {
        let mounts = volumes
            .into_iter()
            .map(|mount_point| Mount {
                source: String::new(),
                mount_point,
                fs_type: String::new(),
            })
            .collect();
        Self::with_root(mounts)
    }

    fn with_root(mut mounts: Vec<Mount>) -> Self {
        if !mounts.iter().any(|m| m.mount_point == Path::new("/")) {
            mounts.insert(0, Mount::root());
        }
        Self { mounts }
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    /// Mount points other than `/`.
    pub fn non_root(&self) -> impl Iterator<Item = &Mount> {
        self.mounts.iter().filter(|m| m.mount_point != Path::new("/"))
    }

    /// Mount point with the longest prefix match for `path`; `/` when none match.
    pub fn owning_mount(&self, path: &Path) -> &Path {
        self.mounts
            .iter()
            .map(|m| m.mount_point.as_path())
            .filter(|mount_point| path.starts_with(mount_point))
            .max_by_key(|mount_point| mount_point.components().count())
            .unwrap_or_else(|| Path::new("/"))
    }
}

/// Device identifier of the filesystem holding `path`, after resolving symlinks.
#[cfg(unix)]
pub fn device_of(fs: &dyn FileSystem, path: &Path) -> Result<u64> {
    let resolved = fs.canonicalize(path)?;
    Ok(fs.metadata(&resolved)?.dev())
}

#[cfg(not(unix))]
pub fn device_of(_fs: &dyn FileSystem, path: &Path) -> Result<u64> {
    Err(CoreError::not_ready(format!(
        "device identifiers unavailable for {}",
        path.display()
    )))
}

/// True when both paths live on the same filesystem. Unreadable paths are errors.
pub fn same_device(fs: &dyn FileSystem, a: &Path, b: &Path) -> Result<bool> {
    let left = device_of(fs, a).map_err(|err| err.during("stat device of", a))?;
    let right = device_of(fs, b).map_err(|err| err.during("stat device of", b))?;
    Ok(left == right)
}

/// Reverses the octal escapes used in the mount table (`\040` for a space, ...).
fn unescape_mountpoint(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && is_octal_triplet(&bytes[i + 1..]) {
            let byte =
                ((bytes[i + 1] - b'0') << 6) | ((bytes[i + 2] - b'0') << 3) | (bytes[i + 3] - b'0');
            decoded.push(byte);
            i += 4;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn is_octal_triplet(rest: &[u8]) -> bool {
    rest.len() >= 3
        && rest[..3].iter().all(|b| (b'0'..=b'7').contains(b))
        && rest[0] <= b'3'
}
