//! Transactional store for the legacy backend's history document.
//!
//! Every mutation is staged next to the live document and swapped in with a
//! single rename:
//!
//! 1. `prepare_*` writes a descriptor, the pending document and a backup of
//!    the affected path into the staging directory.
//! 2. The caller performs the payload operation.
//! 3. `commit_*` renames the pending document over the live one, or
//!    `rollback_*` puts the backup back.
//!
//! On open, descriptors left behind by a crashed process are recovered.

mod document;
mod transaction;

pub use document::{HistoryDocument, HistoryRecord, HISTORY_VERSION};
pub use transaction::{
    StagingPaths, Transaction, TransactionKind, TransactionMetadata, TransactionState,
};

use crate::errors::{CoreError, Result, ResultExt};
use crate::fs::FileSystem;
use crate::helpers::{format_duration, IdGenerator};
use crate::mover::{AtomicMover, MoveOptions};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use transaction::DESCRIPTOR_SUFFIX;

/// Live history document inside the trash root.
pub const HISTORY_FILE: &str = "history.json";

/// Staging directory inside the trash root.
pub const STAGING_DIR: &str = ".journal";

/// Age after which a `Prepared` transaction is assumed abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct JournalOptions {
    pub stale_after: Duration,
}

impl Default for JournalOptions {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// What a recovery pass did.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct RecoveryReport {
    /// Stale `Prepared` transactions restored from their backup.
    pub rolled_back: usize,
    /// `Initial`, `Failed` or leftover terminal transactions removed.
    pub cleaned: usize,
    /// Transactions left in place (fresh `Prepared`, or a backup that could not be restored).
    pub pending: usize,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Journal {
    fs: Arc<dyn FileSystem>,
    mover: AtomicMover,
    root: PathBuf,
    document_path: PathBuf,
    staging_dir: PathBuf,
    options: JournalOptions,
    ids: IdGenerator,
    document: Mutex<HistoryDocument>,
}

impl Journal {
    /// Opens (creating if needed) the journal under `root` and runs recovery.
    pub fn open(
        fs: Arc<dyn FileSystem>,
        root: impl Into<PathBuf>,
        options: JournalOptions,
    ) -> Result<Self> {
        let root = root.into();
        let document_path = root.join(HISTORY_FILE);
        let staging_dir = root.join(STAGING_DIR);

        fs.create_dir_all(&staging_dir).during("open journal", &root)?;
        let document =
            HistoryDocument::load(fs.as_ref(), &document_path).during("open journal", &root)?;
        if !fs.exists(&document_path) {
            fs.write(&document_path, &document.to_bytes(&document_path)?)
                .during("open journal", &root)?;
        }

        let journal = Self {
            mover: AtomicMover::new(fs.clone()),
            fs,
            root,
            document_path,
            staging_dir,
            options,
            ids: IdGenerator::new(),
            document: Mutex::new(document),
        };

        let report = journal.recover()?;
        if !report.is_empty() {
            info!(
                root = %journal.root.display(),
                rolled_back = report.rolled_back,
                cleaned = report.cleaned,
                pending = report.pending,
                "journal recovery finished"
            );
        }
        Ok(journal)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn document_path(&self) -> &Path {
        &self.document_path
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn options(&self) -> JournalOptions {
        self.options
    }

    pub fn version(&self) -> u32 {
        self.lock().version
    }

    pub fn records(&self) -> Vec<HistoryRecord> {
        self.lock().files.clone()
    }

    pub fn find(&self, id: &str) -> Option<HistoryRecord> {
        self.lock().find(id).cloned()
    }

    pub fn find_by_destination(&self, to: &Path) -> Option<HistoryRecord> {
        self.lock().find_by_destination(to).cloned()
    }

    /// Stages the addition of `record`, backing up `record.from`.
    pub fn prepare_move(&self, record: HistoryRecord) -> Result<Transaction> {
        let document = self.lock();
        if document.find(&record.id).is_some() {
            return Err(CoreError::invalid_input(format!(
                "history already contains record {}",
                record.id
            )));
        }
        let affected = record.from.clone();
        self.prepare(&document, TransactionKind::Move, record, affected)
    }

    pub fn commit_move(&self, tx: &mut Transaction) -> Result<()> {
        self.commit(tx, TransactionKind::Move)
    }

    pub fn rollback_move(&self, tx: &mut Transaction) -> Result<()> {
        self.rollback(tx, TransactionKind::Move)
    }

    /// Stages the removal of `record` ahead of restoring its payload.
    pub fn prepare_restore(&self, record: &HistoryRecord) -> Result<Transaction> {
        self.prepare_removal(record, TransactionKind::Restore)
    }

    pub fn commit_restore(&self, tx: &mut Transaction) -> Result<()> {
        self.commit(tx, TransactionKind::Restore)
    }

    pub fn rollback_restore(&self, tx: &mut Transaction) -> Result<()> {
        self.rollback(tx, TransactionKind::Restore)
    }

    /// Stages the removal of `record` ahead of purging its payload.
    pub fn prepare_remove(&self, record: &HistoryRecord) -> Result<Transaction> {
        self.prepare_removal(record, TransactionKind::Remove)
    }

    pub fn commit_remove(&self, tx: &mut Transaction) -> Result<()> {
        self.commit(tx, TransactionKind::Remove)
    }

    pub fn rollback_remove(&self, tx: &mut Transaction) -> Result<()> {
        self.rollback(tx, TransactionKind::Remove)
    }

    /// Deletes every staging artifact of `tx`. Missing files are fine.
    pub fn cleanup(&self, tx: &Transaction) {
        let _document = self.lock();
        self.discard(&tx.staging);
    }

    /// Resolves transactions left behind by a previous process.
    ///
    /// `Prepared` transactions whose document swap already happened are
    /// finished, stale ones are rolled back, `Initial` and `Failed` ones are
    /// cleaned up. Running it with nothing pending changes nothing.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let _document = self.lock();
        let now = self.now();
        let mut report = RecoveryReport::default();

        let mut descriptors: Vec<PathBuf> = self
            .fs
            .list_dir(&self.staging_dir)
            .during("recover journal", &self.staging_dir)?
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(DESCRIPTOR_SUFFIX))
            })
            .collect();
        descriptors.sort();

        for path in descriptors {
            let mut tx = match self.load_descriptor(&path) {
                Ok(tx) => tx,
                Err(err) => {
                    warn!(descriptor = %path.display(), error = %err, "discarding unreadable transaction");
                    if let Some(id) = path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .and_then(|name| name.strip_suffix(DESCRIPTOR_SUFFIX))
                    {
                        self.discard(&StagingPaths::new(&self.staging_dir, id));
                    }
                    report.cleaned += 1;
                    continue;
                }
            };

            match tx.state() {
                // Commit renames the pending document over the live one, so
                // its absence means the change already landed.
                TransactionState::Prepared if !self.fs.exists(&tx.staging.pending_document) => {
                    info!(tx = %tx.id, kind = %tx.kind, "finishing transaction whose commit already landed");
                    self.discard(&tx.staging);
                    report.cleaned += 1;
                }
                TransactionState::Prepared if tx.is_stale(now, self.options.stale_after) => {
                    info!(
                        tx = %tx.id,
                        kind = %tx.kind,
                        age = %format_duration(tx.age(now)),
                        affected = %tx.affected.display(),
                        "rolling back stale transaction"
                    );
                    if let Err(err) = self.restore_backup(&tx) {
                        warn!(tx = %tx.id, error = %err, "stale transaction could not be restored");
                        self.fail(&mut tx);
                        report.pending += 1;
                        continue;
                    }
                    self.warn_orphaned_payload(&tx);
                    self.settle(&mut tx, TransactionState::RolledBack)?;
                    self.discard(&tx.staging);
                    report.rolled_back += 1;
                }
                TransactionState::Prepared => {
                    debug!(tx = %tx.id, "transaction still in flight, leaving it");
                    report.pending += 1;
                }
                TransactionState::Failed => {
                    if let Err(err) = self.restore_backup(&tx) {
                        warn!(tx = %tx.id, error = %err, "keeping backup of failed transaction");
                        report.pending += 1;
                        continue;
                    }
                    self.discard(&tx.staging);
                    report.cleaned += 1;
                }
                TransactionState::Initial
                | TransactionState::Committed
                | TransactionState::RolledBack => {
                    debug!(tx = %tx.id, state = %tx.state(), "cleaning up transaction");
                    self.discard(&tx.staging);
                    report.cleaned += 1;
                }
            }
        }
        Ok(report)
    }

    fn lock(&self) -> MutexGuard<'_, HistoryDocument> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.fs.now())
    }

    fn prepare_removal(&self, record: &HistoryRecord, kind: TransactionKind) -> Result<Transaction> {
        let document = self.lock();
        let stored = document
            .find(&record.id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(self.root.join(&record.to)))?;
        let affected = self.root.join(&stored.to);
        self.prepare(&document, kind, stored, affected)
    }

    fn prepare(
        &self,
        document: &HistoryDocument,
        kind: TransactionKind,
        record: HistoryRecord,
        affected: PathBuf,
    ) -> Result<Transaction> {
        let id = self.ids.next_id(self.fs.now());
        let mut tx = Transaction::new(id, kind, record, affected, &self.staging_dir, self.now());

        let staged = (|| -> Result<()> {
            self.persist(&tx)?;
            let pending = kind.apply(document, &tx.record);
            let bytes = pending.to_bytes(&tx.staging.pending_document)?;
            self.fs.write(&tx.staging.pending_document, &bytes)?;
            self.mover.copy_tree(&tx.affected, &tx.staging.backup)?;
            tx.transition(TransactionState::Prepared, self.now())?;
            self.persist(&tx)
        })();

        if let Err(err) = staged {
            self.discard(&tx.staging);
            return Err(err.during("prepare transaction for", tx.affected.clone()));
        }
        debug!(tx = %tx.id, kind = %kind, affected = %tx.affected.display(), "transaction prepared");
        Ok(tx)
    }

    fn commit(&self, tx: &mut Transaction, kind: TransactionKind) -> Result<()> {
        let mut document = self.lock();
        Self::check_kind(tx, kind)?;
        tx.check_transition(TransactionState::Committed)?;

        if let Err(err) = self.fs.rename(&tx.staging.pending_document, &self.document_path) {
            // The backup stays so the affected path can still be recovered.
            self.fail(tx);
            return Err(err.during("commit transaction to", self.document_path.clone()));
        }
        // From here on the live document holds the change.
        self.settle(tx, TransactionState::Committed)?;
        if let Err(err) = self.fs.remove_if_exists(&tx.staging.backup) {
            warn!(tx = %tx.id, error = %err, "failed to delete backup after commit");
        }

        *document = match HistoryDocument::load(self.fs.as_ref(), &self.document_path) {
            Ok(reloaded) => reloaded,
            Err(err) => {
                warn!(error = %err, "reload after commit failed, applying change in memory");
                tx.kind.apply(&document, &tx.record)
            }
        };
        self.discard(&tx.staging);
        debug!(tx = %tx.id, kind = %kind, "transaction committed");
        Ok(())
    }

    fn rollback(&self, tx: &mut Transaction, kind: TransactionKind) -> Result<()> {
        let _document = self.lock();
        Self::check_kind(tx, kind)?;
        tx.check_transition(TransactionState::RolledBack)?;

        if let Err(err) = self.restore_backup(tx) {
            self.fail(tx);
            return Err(err.during("roll back transaction for", tx.affected.clone()));
        }
        self.settle(tx, TransactionState::RolledBack)?;
        self.discard(&tx.staging);
        debug!(tx = %tx.id, kind = %kind, "transaction rolled back");
        Ok(())
    }

    fn check_kind(tx: &Transaction, kind: TransactionKind) -> Result<()> {
        tx.ensure_active()?;
        if tx.kind != kind {
            return Err(CoreError::invalid_input(format!(
                "transaction {} is a {} transaction, not {}",
                tx.id, tx.kind, kind
            )));
        }
        Ok(())
    }

    /// Moves the backup back to the affected path when that path is gone.
    /// A directory being removed may be gone half way, so it is replaced
    /// even when present. Returns whether anything was restored.
    fn restore_backup(&self, tx: &Transaction) -> Result<bool> {
        if !self.fs.exists(&tx.staging.backup) {
            return Ok(false);
        }
        let replace = tx.kind == TransactionKind::Remove
            && self
                .fs
                .symlink_metadata(&tx.affected)
                .map(|meta| meta.is_dir())
                .unwrap_or(false);
        if self.fs.exists(&tx.affected) && !replace {
            debug!(tx = %tx.id, affected = %tx.affected.display(), "affected path intact, dropping backup");
            return Ok(false);
        }
        let options = MoveOptions {
            allow_cross_device: true,
            force: replace,
        };
        self.mover
            .move_path(&tx.staging.backup, &tx.affected, options)?;
        info!(tx = %tx.id, affected = %tx.affected.display(), "restored from backup");
        Ok(true)
    }

    fn warn_orphaned_payload(&self, tx: &Transaction) {
        if tx.kind != TransactionKind::Move {
            return;
        }
        let payload = self.root.join(&tx.record.to);
        if self.fs.exists(&payload) {
            warn!(
                tx = %tx.id,
                payload = %payload.display(),
                "payload has no history record after rollback"
            );
        }
    }

    /// Moves `tx` to `state` and records it in the descriptor. A descriptor
    /// that cannot be rewritten is left for recovery to interpret.
    fn settle(&self, tx: &mut Transaction, state: TransactionState) -> Result<()> {
        tx.transition(state, self.now())?;
        if let Err(err) = self.persist(tx) {
            warn!(tx = %tx.id, state = %state, error = %err, "failed to record transaction state");
        }
        Ok(())
    }

    fn fail(&self, tx: &mut Transaction) {
        if tx.transition(TransactionState::Failed, self.now()).is_err() {
            return;
        }
        if let Err(err) = self.persist(tx) {
            warn!(tx = %tx.id, error = %err, "failed to record transaction failure");
        }
    }

    fn persist(&self, tx: &Transaction) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(tx)
            .map_err(|err| CoreError::Serialization(tx.staging.descriptor.clone(), err))?;
        self.fs.write(&tx.staging.descriptor, &bytes)
    }

    fn load_descriptor(&self, path: &Path) -> Result<Transaction> {
        let content = self.fs.read_to_string(path)?;
        serde_json::from_str(&content).map_err(|err| CoreError::Serialization(path.to_path_buf(), err))
    }

    /// Removes staging files; the descriptor goes last so a crash mid-way is
    /// still visible to recovery.
    fn discard(&self, staging: &StagingPaths) {
        for path in [&staging.pending_document, &staging.backup, &staging.descriptor] {
            if let Err(err) = self.fs.remove_if_exists(path) {
                warn!(path = %path.display(), error = %err, "failed to remove staging artifact");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testing::FaultyFs;
    use crate::fs::RealFileSystem;
    use std::sync::atomic::Ordering;

    fn record(src: &Path, id: &str) -> HistoryRecord {
        let name = src.file_name().unwrap().to_string_lossy().into_owned();
        HistoryRecord {
            to: PathBuf::from(format!("{name}.{id}")),
            name,
            id: id.to_string(),
            run_id: "run-1".to_string(),
            from: src.to_path_buf(),
            timestamp: Utc::now(),
            is_dir: false,
        }
    }

    fn staging_is_empty(journal: &Journal) -> bool {
        std::fs::read_dir(journal.staging_dir()).unwrap().next().is_none()
    }

    fn open(fs: Arc<dyn FileSystem>, root: &Path) -> Journal {
        Journal::open(fs, root, JournalOptions::default()).unwrap()
    }

    #[test]
    fn open_creates_versioned_document() {
        let dir = tempfile::tempdir().unwrap();
        let journal = open(Arc::new(RealFileSystem), &dir.path().join("trash"));

        let doc: HistoryDocument =
            serde_json::from_str(&std::fs::read_to_string(journal.document_path()).unwrap())
                .unwrap();
        assert_eq!(doc.version, HISTORY_VERSION);
        assert!(doc.files.is_empty());
        assert!(journal.staging_dir().is_dir());
        assert!(journal.recover().unwrap().is_empty());
    }

    #[test]
    fn move_commit_appends_record_and_cleans_staging() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("trash");
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"content").unwrap();
        let journal = open(Arc::new(RealFileSystem), &root);

        let rec = record(&src, "1");
        let mut tx = journal.prepare_move(rec.clone()).unwrap();
        assert_eq!(tx.state(), TransactionState::Prepared);
        assert!(tx.staging.backup.exists());
        assert!(tx.staging.pending_document.exists());

        std::fs::rename(&src, root.join(&rec.to)).unwrap();
        journal.commit_move(&mut tx).unwrap();

        assert_eq!(tx.state(), TransactionState::Committed);
        assert_eq!(journal.records(), vec![rec.clone()]);
        assert!(staging_is_empty(&journal));
        let reopened = open(Arc::new(RealFileSystem), &root);
        assert_eq!(reopened.find("1"), Some(rec));
    }

    #[test]
    fn rollback_keeps_document_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"content").unwrap();
        let journal = open(Arc::new(RealFileSystem), &dir.path().join("trash"));

        let mut tx = journal.prepare_move(record(&src, "1")).unwrap();
        journal.rollback_move(&mut tx).unwrap();

        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert!(journal.records().is_empty());
        assert_eq!(std::fs::read(&src).unwrap(), b"content");
        assert!(staging_is_empty(&journal));
    }

    #[test]
    fn rollback_restores_missing_affected_path() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"precious").unwrap();
        let journal = open(Arc::new(RealFileSystem), &dir.path().join("trash"));

        let mut tx = journal.prepare_move(record(&src, "1")).unwrap();
        std::fs::remove_file(&src).unwrap();
        journal.rollback_move(&mut tx).unwrap();

        assert_eq!(std::fs::read(&src).unwrap(), b"precious");
    }

    #[test]
    fn prepare_failure_leaves_no_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let journal = open(Arc::new(RealFileSystem), &dir.path().join("trash"));

        let err = journal
            .prepare_move(record(&dir.path().join("missing.txt"), "1"))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(staging_is_empty(&journal));
        assert!(journal.records().is_empty());
    }

    #[test]
    fn duplicate_record_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("trash");
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"x").unwrap();
        let journal = open(Arc::new(RealFileSystem), &root);
        let mut tx = journal.prepare_move(record(&src, "1")).unwrap();
        journal.commit_move(&mut tx).unwrap();

        let err = journal.prepare_move(record(&src, "1")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn completed_transactions_reject_further_calls() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"x").unwrap();
        let journal = open(Arc::new(RealFileSystem), &dir.path().join("trash"));

        let mut tx = journal.prepare_move(record(&src, "1")).unwrap();
        journal.commit_move(&mut tx).unwrap();
        let snapshot = tx.clone();
        let records = journal.records();

        assert!(journal.commit_move(&mut tx).unwrap_err().is_already_completed());
        assert!(journal.rollback_move(&mut tx).unwrap_err().is_already_completed());
        assert_eq!(tx, snapshot);
        assert_eq!(journal.records(), records);

        let mut rolled = journal.prepare_move(record(&src, "2")).unwrap();
        journal.rollback_move(&mut rolled).unwrap();
        assert!(journal.commit_move(&mut rolled).unwrap_err().is_already_completed());
        assert_eq!(journal.records(), records);
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"x").unwrap();
        let journal = open(Arc::new(RealFileSystem), &dir.path().join("trash"));

        let mut tx = journal.prepare_move(record(&src, "1")).unwrap();
        let err = journal.commit_restore(&mut tx).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
        assert_eq!(tx.state(), TransactionState::Prepared);
        journal.rollback_move(&mut tx).unwrap();
    }

    #[test]
    fn restore_transaction_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("trash");
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"x").unwrap();
        let journal = open(Arc::new(RealFileSystem), &root);

        let rec = record(&src, "1");
        let mut tx = journal.prepare_move(rec.clone()).unwrap();
        std::fs::rename(&src, root.join(&rec.to)).unwrap();
        journal.commit_move(&mut tx).unwrap();

        let mut restore = journal.prepare_restore(&rec).unwrap();
        assert_eq!(restore.affected, root.join(&rec.to));
        std::fs::rename(root.join(&rec.to), &src).unwrap();
        journal.commit_restore(&mut restore).unwrap();

        assert!(journal.records().is_empty());
        assert!(staging_is_empty(&journal));

        let err = journal.prepare_restore(&rec).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn commit_failure_marks_failed_and_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("trash");
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"x").unwrap();
        let fs = Arc::new(FaultyFs::default());
        let journal = open(fs.clone(), &root);

        let mut tx = journal.prepare_move(record(&src, "1")).unwrap();
        fs.fail_rename.store(true, Ordering::SeqCst);
        assert!(journal.commit_move(&mut tx).is_err());

        assert_eq!(tx.state(), TransactionState::Failed);
        assert!(tx.staging.backup.exists());
        assert!(tx.staging.descriptor.exists());
        assert!(journal.records().is_empty());
        assert!(journal.commit_move(&mut tx).unwrap_err().is_already_completed());

        fs.fail_rename.store(false, Ordering::SeqCst);
        drop(journal);
        let reopened = open(fs, &root);
        assert!(staging_is_empty(&reopened));
        assert!(src.exists());
    }

    #[test]
    fn stale_prepared_transaction_is_rolled_back_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("trash");
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"survives the crash").unwrap();
        let fs = Arc::new(FaultyFs::default());

        let journal = open(fs.clone(), &root);
        let rec = record(&src, "1");
        let tx = journal.prepare_move(rec.clone()).unwrap();
        // The process "crashes" after moving the payload, before committing.
        std::fs::rename(&src, root.join(&rec.to)).unwrap();
        drop(journal);

        fs.skew_secs.store(2 * 60 * 60, Ordering::SeqCst);
        let reopened = open(fs, &root);

        assert_eq!(std::fs::read(&src).unwrap(), b"survives the crash");
        assert!(!tx.staging.backup.exists());
        assert!(staging_is_empty(&reopened));
        assert!(reopened.records().is_empty());
    }

    #[test]
    fn fresh_prepared_transaction_is_left_pending() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("trash");
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"x").unwrap();

        let journal = open(Arc::new(RealFileSystem), &root);
        let tx = journal.prepare_move(record(&src, "1")).unwrap();
        drop(journal);

        let reopened = open(Arc::new(RealFileSystem), &root);
        assert!(tx.staging.descriptor.exists());
        assert!(tx.staging.backup.exists());
        let report = reopened.recover().unwrap();
        assert_eq!(report.pending, 1);
        assert_eq!(report.rolled_back, 0);
    }

    #[test]
    fn configurable_threshold_rolls_back_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("trash");
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"x").unwrap();

        let journal = open(Arc::new(RealFileSystem), &root);
        journal.prepare_move(record(&src, "1")).unwrap();
        drop(journal);

        let options = JournalOptions {
            stale_after: Duration::ZERO,
        };
        let reopened = Journal::open(Arc::new(RealFileSystem), &root, options).unwrap();
        assert!(staging_is_empty(&reopened));
        assert!(src.exists());
    }

    #[test]
    fn initial_and_corrupt_descriptors_are_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("trash");
        let journal = open(Arc::new(RealFileSystem), &root);

        let rec = record(&dir.path().join("gone.txt"), "1");
        let tx = Transaction::new(
            "abc".into(),
            TransactionKind::Move,
            rec,
            dir.path().join("gone.txt"),
            journal.staging_dir(),
            Utc::now(),
        );
        std::fs::write(&tx.staging.descriptor, serde_json::to_vec(&tx).unwrap()).unwrap();
        std::fs::write(&tx.staging.pending_document, b"{}").unwrap();
        std::fs::write(journal.staging_dir().join("broken.tx.json"), b"not json").unwrap();
        std::fs::write(journal.staging_dir().join("broken.backup"), b"x").unwrap();

        let report = journal.recover().unwrap();
        assert_eq!(report.cleaned, 2);
        assert!(staging_is_empty(&journal));
        assert!(journal.recover().unwrap().is_empty());
    }
}
