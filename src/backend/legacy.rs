//! Flat trash directory whose bookkeeping lives in a journaled JSON document.

use super::{base_name, device_probe, guard_trash_roots, require_exists, EntryStat, TrashBackend};
use crate::errors::{CoreError, Result, ResultExt};
use crate::fs::FileSystem;
use crate::helpers::{build_unique_basename, IdGenerator};
use crate::journal::{HistoryRecord, Journal, JournalOptions};
use crate::models::{BackendId, BackendInfo, BackendKind, TrashedEntry};
use crate::mounts::same_device;
use crate::mover::{AtomicMover, MoveOptions};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct LegacyBackend {
    id: BackendId,
    fs: Arc<dyn FileSystem>,
    mover: AtomicMover,
    journal: Journal,
    ids: IdGenerator,
    run_id: String,
    enable_home_fallback: bool,
}

impl LegacyBackend {
    /// Opens the store at `root`, recovering interrupted transactions.
    pub fn open(
        id: BackendId,
        fs: Arc<dyn FileSystem>,
        root: PathBuf,
        options: JournalOptions,
    ) -> Result<Self> {
        let journal = Journal::open(fs.clone(), root.clone(), options).during("open legacy trash", root)?;
        let ids = IdGenerator::new();
        let run_id = ids.next_id(fs.now());
        Ok(Self {
            id,
            mover: AtomicMover::new(fs.clone()),
            fs,
            journal,
            ids,
            run_id,
            enable_home_fallback: false,
        })
    }

    /// Accepts paths from other devices, copying them into the store.
    pub fn with_home_fallback(mut self, enabled: bool) -> Self {
        self.enable_home_fallback = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        self.journal.root()
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Groups every record written by this instance.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn record_for(&self, entry: &TrashedEntry) -> Result<HistoryRecord> {
        if let Some(record) = self.journal.find(&entry.key) {
            return Ok(record);
        }
        entry
            .trash_path
            .strip_prefix(self.root())
            .ok()
            .and_then(|relative| self.journal.find_by_destination(relative))
            .ok_or_else(|| CoreError::NotFound(entry.trash_path.clone()))
    }

    fn to_entry(&self, record: &HistoryRecord, stat: EntryStat) -> TrashedEntry {
        TrashedEntry {
            name: record.name.clone(),
            original_path: record.from.clone(),
            trash_path: self.root().join(&record.to),
            deleted_at: record.timestamp,
            size: stat.size,
            is_dir: record.is_dir,
            mode: stat.mode,
            key: record.id.clone(),
            backend: Some(self.id),
        }
    }

    /// Moves a payload back to where it was after the document refused the
    /// change, so disk and history agree again.
    fn undo_move(&self, moved: &Path, back_to: &Path) {
        if let Err(err) = self
            .mover
            .move_path(moved, back_to, MoveOptions::cross_device(true))
        {
            warn!(
                moved = %moved.display(),
                back_to = %back_to.display(),
                error = %err,
                "could not move payload back; recovery will restore it from backup"
            );
        }
    }
}

impl TrashBackend for LegacyBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Legacy
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            kind: BackendKind::Legacy,
            location: self.root().display().to_string(),
            root: self.root().to_path_buf(),
            available: self.fs.exists(self.root()) && self.fs.exists(self.journal.document_path()),
        }
    }

    fn put(&self, path: &Path) -> Result<TrashedEntry> {
        require_exists(self.fs.as_ref(), path)?;
        guard_trash_roots(path, [self.root()])?;
        let name = base_name(path)?;
        if !self.enable_home_fallback && !self.same_device(path).during("trash", path)? {
            return Err(CoreError::CrossDevice(path.to_path_buf()));
        }
        let stat = EntryStat::of(self.fs.as_ref(), path).during("trash", path)?;

        let now = self.fs.now();
        let id = self.ids.next_id(now);
        let record = HistoryRecord {
            to: PathBuf::from(build_unique_basename(&name, &id)),
            name,
            id,
            run_id: self.run_id.clone(),
            from: path.to_path_buf(),
            timestamp: DateTime::<Utc>::from(now),
            is_dir: stat.is_dir,
        };
        let trash_path = self.root().join(&record.to);

        let mut tx = self.journal.prepare_move(record.clone()).during("trash", path)?;
        if let Err(err) = self
            .mover
            .move_path(path, &trash_path, MoveOptions::cross_device(true))
        {
            if let Err(rollback_err) = self.journal.rollback_move(&mut tx) {
                warn!(tx = %tx.id, error = %rollback_err, "rollback after failed move did not complete");
            }
            return Err(err.during("trash", path));
        }
        if let Err(err) = self.journal.commit_move(&mut tx) {
            self.undo_move(&trash_path, path);
            return Err(err.during("trash", path));
        }

        info!(path = %path.display(), trash = %trash_path.display(), "trashed");
        Ok(self.to_entry(&record, stat))
    }

    fn list(&self) -> Result<Vec<TrashedEntry>> {
        let mut entries = Vec::new();
        for record in self.journal.records() {
            let payload = self.root().join(&record.to);
            match EntryStat::of(self.fs.as_ref(), &payload) {
                Ok(stat) => entries.push(self.to_entry(&record, stat)),
                Err(err) => {
                    warn!(id = %record.id, payload = %payload.display(), error = %err, "skipping record without payload");
                }
            }
        }
        Ok(entries)
    }

    fn restore(&self, entry: &TrashedEntry, destination: Option<&Path>) -> Result<PathBuf> {
        let record = self.record_for(entry)?;
        let payload = self.root().join(&record.to);
        require_exists(self.fs.as_ref(), &payload)?;
        let target = destination.unwrap_or(&record.from).to_path_buf();
        if self.fs.exists(&target) {
            return Err(CoreError::DestinationExists(target));
        }

        let mut tx = self
            .journal
            .prepare_restore(&record)
            .during("restore", payload.clone())?;
        if let Err(err) = self
            .mover
            .move_path(&payload, &target, MoveOptions::cross_device(true))
        {
            if let Err(rollback_err) = self.journal.rollback_restore(&mut tx) {
                warn!(tx = %tx.id, error = %rollback_err, "rollback after failed restore did not complete");
            }
            return Err(err.during("restore", payload));
        }
        if let Err(err) = self.journal.commit_restore(&mut tx) {
            self.undo_move(&target, &payload);
            return Err(err.during("restore", payload));
        }

        info!(trash = %payload.display(), path = %target.display(), "restored");
        Ok(target)
    }

    fn remove(&self, entry: &TrashedEntry) -> Result<()> {
        let record = self.record_for(entry)?;
        let payload = self.root().join(&record.to);
        require_exists(self.fs.as_ref(), &payload)?;

        let mut tx = self
            .journal
            .prepare_remove(&record)
            .during("remove", payload.clone())?;
        if let Err(err) = self.fs.remove_all(&payload) {
            if let Err(rollback_err) = self.journal.rollback_remove(&mut tx) {
                warn!(tx = %tx.id, error = %rollback_err, "rollback after failed removal did not complete");
            }
            return Err(err.during("remove", payload));
        }
        self.journal
            .commit_remove(&mut tx)
            .during("remove", payload.clone())?;

        info!(trash = %payload.display(), "removed permanently");
        Ok(())
    }

    fn same_device(&self, path: &Path) -> Result<bool> {
        let probe = device_probe(self.fs.as_ref(), path);
        same_device(self.fs.as_ref(), &probe, self.root())
    }

    fn accepts_fallback(&self) -> bool {
        self.enable_home_fallback
    }
}
