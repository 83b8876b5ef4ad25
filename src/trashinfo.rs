//! Reading and writing `.trashinfo` sidecar files.
//!
//! ```text
//! [Trash Info]
//! Path=/home/ann/My%20Notes/todo.txt
//! DeletionDate=2024-03-01T09:15:42
//! ```

use crate::errors::{CoreError, Result};
use crate::fs::FileSystem;
use crate::helpers::TRASHINFO_TIME_FORMAT;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[cfg(unix)]
use std::os::unix::ffi::{OsStrExt, OsStringExt};

pub const TRASHINFO_HEADER: &str = "[Trash Info]";

const PATH_KEY: &str = "Path";
const DELETION_DATE_KEY: &str = "DeletionDate";

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TrashInfo {
    /// Original location, absolute or relative to the owning mount point.
    pub path: PathBuf,
    /// Local wall-clock deletion time.
    pub deletion_date: NaiveDateTime,
}

impl TrashInfo {
    pub fn new(path: PathBuf, deleted_at: SystemTime) -> Self {
        Self {
            path,
            deletion_date: DateTime::<Local>::from(deleted_at).naive_local(),
        }
    }

    /// Records `original` relative to `mount_point` when one is given.
    pub fn for_location(original: &Path, mount_point: Option<&Path>, deleted_at: SystemTime) -> Self {
        let path = match mount_point {
            Some(mount) => original
                .strip_prefix(mount)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| original.to_path_buf()),
            None => original.to_path_buf(),
        };
        Self::new(path, deleted_at)
    }

    pub fn original_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn deleted_at(&self) -> DateTime<Utc> {
        Local
            .from_local_datetime(&self.deletion_date)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&self.deletion_date))
    }

    /// Absolute original location; relative paths resolve against `mount_point`.
    pub fn resolve(&self, mount_point: Option<&Path>) -> PathBuf {
        if self.path.is_absolute() {
            return self.path.clone();
        }
        mount_point.unwrap_or_else(|| Path::new("/")).join(&self.path)
    }

    pub fn encode(&self) -> String {
        format!(
            "{TRASHINFO_HEADER}\n{PATH_KEY}={}\n{DELETION_DATE_KEY}={}\n",
            encode_path(&self.path),
            self.deletion_date.format(TRASHINFO_TIME_FORMAT)
        )
    }

    /// Parses a sidecar body. Any malformed or missing field fails the whole record.
    pub fn decode(content: &str) -> std::result::Result<Self, String> {
        let mut seen_header = false;
        let mut path = None;
        let mut deletion_date = None;

        for raw in content.lines() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') {
                if line == TRASHINFO_HEADER {
                    seen_header = true;
                    continue;
                }
                if seen_header {
                    break;
                }
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(format!("malformed line {line:?}"));
            };
            if !seen_header {
                return Err(format!("key {key:?} appears before {TRASHINFO_HEADER}"));
            }
            match key.trim() {
                PATH_KEY if path.is_none() => path = Some(decode_path(value)),
                DELETION_DATE_KEY if deletion_date.is_none() => {
                    let parsed = NaiveDateTime::parse_from_str(value.trim(), TRASHINFO_TIME_FORMAT)
                        .map_err(|err| format!("bad {DELETION_DATE_KEY} {value:?}: {err}"))?;
                    deletion_date = Some(parsed);
                }
                _ => {}
            }
        }

        if !seen_header {
            return Err(format!("missing {TRASHINFO_HEADER} header"));
        }
        let path = path.ok_or_else(|| format!("missing {PATH_KEY}"))?;
        if path.as_os_str().is_empty() {
            return Err(format!("empty {PATH_KEY}"));
        }
        let deletion_date = deletion_date.ok_or_else(|| format!("missing {DELETION_DATE_KEY}"))?;
        Ok(Self {
            path,
            deletion_date,
        })
    }
}

/// Percent-encodes a path: each `/` segment is split on spaces, every token
/// is encoded, tokens are joined by `%20` and segments by `/`.
#[cfg(unix)]
pub fn encode_path(path: &Path) -> String {
    path.as_os_str()
        .as_bytes()
        .split(|b| *b == b'/')
        .map(|segment| {
            segment
                .split(|b| *b == b' ')
                .map(|token| urlencoding::encode_binary(token).into_owned())
                .collect::<Vec<_>>()
                .join("%20")
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
pub fn decode_path(value: &str) -> PathBuf {
    let bytes = urlencoding::decode_binary(value.as_bytes()).into_owned();
    PathBuf::from(OsString::from_vec(bytes))
}

#[cfg(not(unix))]
pub fn encode_path(path: &Path) -> String {
    path.to_string_lossy()
        .split('/')
        .map(|segment| {
            segment
                .split(' ')
                .map(|token| urlencoding::encode(token).into_owned())
                .collect::<Vec<_>>()
                .join("%20")
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(not(unix))]
pub fn decode_path(value: &str) -> PathBuf {
    let bytes = urlencoding::decode_binary(value.as_bytes()).into_owned();
    PathBuf::from(OsString::from(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Writes a sidecar, failing if one with that name already exists.
pub fn write_exclusive(fs: &dyn FileSystem, info_path: &Path, info: &TrashInfo) -> Result<()> {
    fs.write_new(info_path, info.encode().as_bytes())
}

/// Reads and decodes a sidecar.
pub fn read(fs: &dyn FileSystem, info_path: &Path) -> Result<TrashInfo> {
    let content = fs.read_to_string(info_path)?;
    TrashInfo::decode(&content).map_err(|reason| CoreError::trash_info(info_path, reason))
}
