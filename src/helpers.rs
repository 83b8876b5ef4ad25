//! Shared utility helpers for naming, time and size handling.

use std::fmt::Display;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// File extension used by trash info files.
pub const TRASHINFO_EXTENSION: &str = ".trashinfo";

/// Deletion date format used by Trash info metadata.
pub const TRASHINFO_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Builds the namespaced filename used by the legacy store: `<base>.<suffix>`.
pub fn build_unique_basename(file_name: &str, suffix: impl Display) -> String {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|v| v.to_str())
        .unwrap_or("item");
    format!("{base}.{suffix}")
}

/// Builds the n-th collision candidate: `name`, `name_1`, `name_2`, ...
pub fn collision_name(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        base.to_string()
    } else {
        format!("{base}_{attempt}")
    }
}

/// Parses a human readable size such as `10MB`, `512KiB` or `1024`.
///
/// Decimal suffixes (`KB`, `MB`, ...) use powers of 1000, binary suffixes
/// (`KiB`, `MiB`, ...) powers of 1024. Matching is case-insensitive.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("size cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("invalid number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1_000,
        "KIB" => 1_024,
        "M" | "MB" => 1_000_000,
        "MIB" => 1_048_576,
        "G" | "GB" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "T" | "TB" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}

/// Makes `path` absolute against the working directory and folds `.`/`..`
/// lexically, without following the final symlink.
pub fn lexical_absolute(path: &Path) -> std::io::Result<PathBuf> {
    let mut absolute = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir()?
    };
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                absolute.pop();
            }
            component => absolute.push(component.as_os_str()),
        }
    }
    Ok(absolute)
}

/// Generates process-unique identifiers for records and transactions.
///
/// IDs combine the wall-clock nanoseconds, the process id and a per-generator
/// counter so two generators in one process still never collide within a tick.
#[derive(Debug, Default)]
pub struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self, now: SystemTime) -> String {
        let nanos = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{nanos:x}{:06x}{seq:04x}", std::process::id())
    }
}

/// Produces a human readable string from a duration.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let mins = secs / 60;
    let hours = mins / 60;
    let days = hours / 24;
    let rem_secs = secs % 60;
    let rem_mins = mins % 60;
    let rem_hours = hours % 24;

    if days > 0 {
        format!("{days}d {rem_hours:02}:{rem_mins:02}:{rem_secs:02}")
    } else if hours > 0 {
        format!("{hours}h {rem_mins:02}:{rem_secs:02}")
    } else if mins > 0 {
        format!("{mins}m {rem_secs:02}s")
    } else {
        format!("{secs}s")
    }
}
