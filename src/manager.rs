//! Routes trash operations across the configured backends.

use crate::backend::{Backend, LegacyBackend, SpecBackend, TrashBackend};
use crate::config::{Strategy, TrashConfig};
use crate::errors::{CoreError, Result, ResultExt};
use crate::filter::Filter;
use crate::fs::FileSystem;
use crate::helpers::lexical_absolute;
use crate::models::{BackendId, BackendInfo, BatchOutcome, PutOutcome, TrashedEntry};
use crate::mounts::MountIndex;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Manager {
    fs: Arc<dyn FileSystem>,
    backends: Vec<Backend>,
    filter: Filter,
}

impl Manager {
    /// Home fallback is a backend setting; the manager only asks
    /// [`TrashBackend::accepts_fallback`].
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            backends: Vec::new(),
            filter: Filter::default(),
        }
    }

    /// Builds the backends `config` asks for.
    pub fn from_config(fs: Arc<dyn FileSystem>, config: &TrashConfig) -> Result<Self> {
        let mut manager =
            Self::new(fs.clone()).with_filter(Filter::new(&config.filter)?);

        let use_spec = config.strategy != Strategy::Legacy;
        let use_legacy = match config.strategy {
            Strategy::Legacy => true,
            Strategy::Xdg => false,
            Strategy::Auto => config
                .legacy_root
                .as_deref()
                .is_some_and(|root| fs.exists(root)),
        };

        if use_spec {
            let home = config
                .home_trash
                .clone()
                .ok_or_else(|| CoreError::not_ready("no home trash directory configured"))?;
            let mounts = if config.force_home_only {
                MountIndex::from_volumes(Vec::new())
            } else if config.volumes.is_empty() {
                MountIndex::load_or_root(fs.as_ref())
            } else {
                MountIndex::from_volumes(config.volumes.clone())
            };
            let backend = SpecBackend::discover(
                manager.next_id(),
                fs.clone(),
                home,
                &mounts,
                config.enable_home_fallback,
            )?;
            manager.add(backend)?;
        }

        if use_legacy {
            let root = config
                .legacy_root
                .clone()
                .ok_or_else(|| CoreError::not_ready("no legacy trash directory configured"))?;
            let backend =
                LegacyBackend::open(manager.next_id(), fs.clone(), root, config.journal.options())?
                    .with_home_fallback(config.enable_home_fallback);
            manager.add(backend)?;
        }

        Ok(manager)
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Identifier the next added backend must carry.
    pub fn next_id(&self) -> BackendId {
        BackendId(self.backends.len())
    }

    /// Registers a backend built with [`Manager::next_id`].
    pub fn add(&mut self, backend: impl Into<Backend>) -> Result<BackendId> {
        let backend = backend.into();
        let expected = self.next_id();
        if backend.id() != expected {
            return Err(CoreError::invalid_input(format!(
                "backend registered as {} but built with {}",
                expected,
                backend.id()
            )));
        }
        self.backends.push(backend);
        Ok(expected)
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn backend(&self, id: BackendId) -> Option<&Backend> {
        self.backends.get(id.0)
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn info(&self) -> Vec<BackendInfo> {
        self.backends.iter().map(|backend| backend.info()).collect()
    }

    /// Backend that should store `path`: one on the same device, else the
    /// first backend that accepts paths from other devices.
    pub fn select(&self, path: &Path) -> Result<&Backend> {
        if self.backends.is_empty() {
            return Err(CoreError::not_ready("no trash backend configured"));
        }
        for backend in &self.backends {
            if backend.same_device(path)? {
                debug!(path = %path.display(), backend = %backend.kind(), "same-device backend selected");
                return Ok(backend);
            }
        }
        if let Some(backend) = self.backends.iter().find(|b| b.accepts_fallback()) {
            debug!(path = %path.display(), backend = %backend.kind(), "falling back to home storage");
            return Ok(backend);
        }
        Err(CoreError::CrossDevice(path.to_path_buf()))
    }

    pub fn put(&self, path: &Path) -> Result<PutOutcome> {
        let absolute = self.resolve(path)?;
        let backend = self.select(&absolute).during("trash", absolute.clone())?;
        let entry = backend.put(&absolute)?;
        Ok(PutOutcome {
            entry,
            backend: backend.id(),
            kind: backend.kind(),
        })
    }

    /// Trashes each path independently; one failure does not stop the rest.
    pub fn put_all<I, P>(&self, paths: I) -> Vec<BatchOutcome>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        paths
            .into_iter()
            .map(|path| {
                let path = path.as_ref();
                let result = self.put(path);
                if let Err(err) = &result {
                    warn!(path = %path.display(), error = %err, "failed to trash");
                }
                BatchOutcome {
                    path: path.to_path_buf(),
                    result,
                }
            })
            .collect()
    }

    /// Every entry that passes the filter, newest first.
    pub fn list(&self) -> Result<Vec<TrashedEntry>> {
        self.list_at(Utc::now())
    }

    /// Like [`Manager::list`] with ages measured from `now`.
    pub fn list_at(&self, now: DateTime<Utc>) -> Result<Vec<TrashedEntry>> {
        let entries = self.filter.apply_at(self.list_unfiltered(), now);
        Ok(entries)
    }

    /// Every entry of every backend that could be listed, newest first.
    pub fn list_unfiltered(&self) -> Vec<TrashedEntry> {
        let mut entries = Vec::new();
        for backend in &self.backends {
            match backend.list() {
                Ok(found) => entries.extend(found.into_iter().map(|entry| entry.with_backend(backend.id()))),
                Err(err) => {
                    warn!(backend = %backend.kind(), error = %err, "skipping backend that failed to list");
                }
            }
        }
        entries.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        entries
    }

    pub fn restore(&self, entry: &TrashedEntry, destination: Option<&Path>) -> Result<PathBuf> {
        let destination = destination.map(|path| self.resolve_lexically(path)).transpose()?;
        self.owner(entry)?.restore(entry, destination.as_deref())
    }

    pub fn remove(&self, entry: &TrashedEntry) -> Result<()> {
        self.owner(entry)?.remove(entry)
    }

    fn owner(&self, entry: &TrashedEntry) -> Result<&Backend> {
        let id = entry.backend.ok_or_else(|| {
            CoreError::invalid_input(format!(
                "entry {} does not belong to any backend",
                entry.trash_path.display()
            ))
        })?;
        self.backend(id)
            .ok_or_else(|| CoreError::invalid_input(format!("unknown backend {id}")))
    }

    /// Absolute form of `path` that must exist; symlinks are not followed.
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let absolute = self.resolve_lexically(path)?;
        if !self.fs.exists(&absolute) {
            return Err(CoreError::NotFound(absolute));
        }
        Ok(absolute)
    }

    fn resolve_lexically(&self, path: &Path) -> Result<PathBuf> {
        if path.as_os_str().is_empty() {
            return Err(CoreError::invalid_input("empty path"));
        }
        lexical_absolute(path).map_err(|err| CoreError::io(path, err))
    }
}
