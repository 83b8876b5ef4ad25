use crate::errors::{CoreError, Result};
use crate::fs::FileSystem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Schema version written by this crate.
pub const HISTORY_VERSION: u32 = 1;

/// One trashed path in the legacy store.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub name: String,
    pub id: String,
    /// Groups records trashed by one invocation.
    #[serde(rename = "group_id")]
    pub run_id: String,
    pub from: PathBuf,
    /// Destination relative to the trash root.
    pub to: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub is_dir: bool,
}

/// The JSON document listing every legacy record.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct HistoryDocument {
    pub version: u32,
    #[serde(default)]
    pub files: Vec<HistoryRecord>,
}

impl Default for HistoryDocument {
    fn default() -> Self {
        Self {
            version: HISTORY_VERSION,
            files: Vec::new(),
        }
    }
}

impl HistoryDocument {
    /// Loads the document, treating a missing file as empty.
    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        if !fs.exists(path) {
            return Ok(Self::default());
        }
        let content = fs.read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content).map_err(|err| CoreError::Serialization(path.to_path_buf(), err))
    }

    /// Serializes with the version bumped to at least [`HISTORY_VERSION`].
    pub fn to_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        let mut doc = self.clone();
        doc.version = doc.version.max(HISTORY_VERSION);
        serde_json::to_vec_pretty(&doc).map_err(|err| CoreError::Serialization(path.to_path_buf(), err))
    }

    pub fn find(&self, id: &str) -> Option<&HistoryRecord> {
        self.files.iter().find(|record| record.id == id)
    }

    pub fn find_by_destination(&self, to: &Path) -> Option<&HistoryRecord> {
        self.files.iter().find(|record| record.to == to)
    }

    /// Copy of the document with `record` appended.
    pub fn with_record(&self, record: &HistoryRecord) -> Self {
        let mut doc = self.clone();
        doc.version = doc.version.max(HISTORY_VERSION);
        doc.files.push(record.clone());
        doc
    }

    /// Copy of the document without `record`; for directories every record
    /// stored beneath its destination goes too.
    pub fn without_record(&self, record: &HistoryRecord) -> Self {
        let mut doc = self.clone();
        doc.version = doc.version.max(HISTORY_VERSION);
        doc.files.retain(|candidate| {
            if candidate.id == record.id {
                return false;
            }
            !(record.is_dir && candidate.to != record.to && candidate.to.starts_with(&record.to))
        });
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, to: &str, is_dir: bool) -> HistoryRecord {
        HistoryRecord {
            name: Path::new(to)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            id: id.to_string(),
            run_id: "run".to_string(),
            from: PathBuf::from("/home/ann").join(to),
            to: PathBuf::from(to),
            timestamp: Utc::now(),
            is_dir,
        }
    }

    #[test]
    fn wire_format_uses_documented_keys() {
        let doc = HistoryDocument::default().with_record(&record("1", "a.txt.1", false));
        let value: serde_json::Value =
            serde_json::from_slice(&doc.to_bytes(Path::new("h.json")).unwrap()).unwrap();

        assert_eq!(value["version"], 1);
        let entry = &value["files"][0];
        for key in ["name", "id", "group_id", "from", "to", "timestamp", "is_dir"] {
            assert!(entry.get(key).is_some(), "missing key {key}");
        }
    }

    #[test]
    fn version_never_decreases() {
        let doc = HistoryDocument {
            version: 3,
            files: Vec::new(),
        };
        let bytes = doc.with_record(&record("1", "x.1", false)).to_bytes(Path::new("h")).unwrap();
        let reread: HistoryDocument = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reread.version, 3);

        let old = HistoryDocument {
            version: 0,
            files: Vec::new(),
        };
        let reread: HistoryDocument =
            serde_json::from_slice(&old.to_bytes(Path::new("h")).unwrap()).unwrap();
        assert_eq!(reread.version, HISTORY_VERSION);
    }

    #[test]
    fn removing_a_directory_drops_descendants_only() {
        let doc = HistoryDocument::default()
            .with_record(&record("1", "dir.1", true))
            .with_record(&record("2", "dir.1/inner.txt", false))
            .with_record(&record("3", "dir.10", false));

        let dir = doc.find("1").unwrap().clone();
        let remaining = doc.without_record(&dir);
        let ids: Vec<_> = remaining.files.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["3"]);
    }
}
