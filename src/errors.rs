use std::{io, path::PathBuf};

/// Shared error type for every trash subsystem.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    /// File system I/O failure.
    #[error("I/O error while accessing {0}")]
    Io(PathBuf, #[source] io::Error),

    /// The entry or path is missing.
    #[error("not found: {0}")]
    NotFound(PathBuf),

    /// No eligible trash location shares a device with the path and home fallback is disabled.
    #[error("no trash location on the same device as {0} (home fallback disabled)")]
    CrossDevice(PathBuf),

    /// The destination of a move or restore is already occupied.
    #[error("destination already exists: {0}")]
    DestinationExists(PathBuf),

    /// A trash location is missing its layout or cannot be written.
    #[error("trash storage not ready: {0}")]
    StorageNotReady(String),

    /// The process lacks permission for the path.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// A transaction was asked to move along an edge its state machine does not have.
    #[error("invalid transaction state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// A transaction already reached a terminal state.
    #[error("transaction {id} already completed ({state})")]
    TransactionAlreadyCompleted { id: String, state: String },

    /// A `.trashinfo` sidecar is malformed or incomplete.
    #[error("invalid trash info {path}: {reason}")]
    InvalidTrashInfo { path: PathBuf, reason: String },

    /// JSON encoding or decoding failed.
    #[error("malformed document {0}")]
    Serialization(PathBuf, #[source] serde_json::Error),

    /// An operation was rejected due to configuration/argument issues.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A filter pattern or size expression failed to compile.
    #[error("invalid filter pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Copy fallback finished but neither removing the source nor the copy succeeded.
    #[error(
        "copied {src} -> {dst} but failed to remove the source ({remove_error}); \
         removing the copy also failed ({cleanup_error})"
    )]
    MoveCleanup {
        src: PathBuf,
        dst: PathBuf,
        remove_error: Box<CoreError>,
        cleanup_error: Box<CoreError>,
    },

    /// Wraps any failure with the name of the operation and the path it was acting on.
    #[error("{op} {path}")]
    Operation {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::StorageNotReady(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, error: io::Error) -> Self {
        Self::Io(path.into(), error)
    }

    /// Maps an I/O failure onto the dedicated kinds where one exists.
    pub fn classify(path: impl Into<PathBuf>, error: io::Error) -> Self {
        let path = path.into();
        match error.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            io::ErrorKind::AlreadyExists => Self::DestinationExists(path),
            _ => Self::Io(path, error),
        }
    }

    pub fn trash_info(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidTrashInfo {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Wraps `self` with the failing operation name and path. Raw I/O
    /// failures with a dedicated kind are classified first.
    pub fn during(self, op: &'static str, path: impl Into<PathBuf>) -> Self {
        let source = match self {
            Self::Io(path, error) => Self::classify(path, error),
            other => other,
        };
        Self::Operation {
            op,
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Strips every `Operation` layer and returns the underlying cause.
    pub fn root_cause(&self) -> &CoreError {
        let mut current = self;
        while let Self::Operation { source, .. } = current {
            current = source;
        }
        current
    }

    pub fn is_not_found(&self) -> bool {
        match self.root_cause() {
            Self::NotFound(_) => true,
            Self::Io(_, err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_destination_exists(&self) -> bool {
        match self.root_cause() {
            Self::DestinationExists(_) => true,
            Self::Io(_, err) => err.kind() == io::ErrorKind::AlreadyExists,
            _ => false,
        }
    }

    /// True for `CrossDevice` and for raw `EXDEV` rename failures.
    pub fn is_cross_device(&self) -> bool {
        match self.root_cause() {
            Self::CrossDevice(_) => true,
            Self::Io(_, err) => err.raw_os_error() == Some(libc::EXDEV),
            _ => false,
        }
    }

    pub fn is_already_completed(&self) -> bool {
        matches!(self.root_cause(), Self::TransactionAlreadyCompleted { .. })
    }
}

/// Extension for attaching operation context to results.
pub trait ResultExt<T> {
    fn during(self, op: &'static str, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn during(self, op: &'static str, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|err| err.during(op, path))
    }
}

/// Shared result alias for the core crate.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_peels_operation_layers() {
        let err = CoreError::NotFound(PathBuf::from("/tmp/a"))
            .during("restore", "/tmp/a")
            .during("manager restore", "/tmp/a");

        assert!(matches!(err.root_cause(), CoreError::NotFound(_)));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "manager restore /tmp/a");
    }

    #[test]
    fn raw_exdev_is_cross_device() {
        let err = CoreError::io("/a", io::Error::from_raw_os_error(libc::EXDEV));
        assert!(err.is_cross_device());
        assert!(!CoreError::io("/a", io::Error::from(io::ErrorKind::Other)).is_cross_device());
    }

    #[test]
    fn classify_maps_kinds() {
        let denied = CoreError::classify("/x", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(denied, CoreError::PermissionDenied(_)));
        let exists = CoreError::classify("/x", io::Error::from(io::ErrorKind::AlreadyExists));
        assert!(exists.is_destination_exists());
    }

    #[test]
    fn wrapping_classifies_raw_io_errors() {
        let err = CoreError::io("/x", io::Error::from(io::ErrorKind::PermissionDenied))
            .during("remove", "/x");
        assert!(matches!(err.root_cause(), CoreError::PermissionDenied(_)));

        let exdev = CoreError::io("/x", io::Error::from_raw_os_error(libc::EXDEV)).during("trash", "/x");
        assert!(exdev.is_cross_device());
    }
}
