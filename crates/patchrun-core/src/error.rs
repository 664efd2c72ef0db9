//! Error types for step discovery, checkpoint persistence and runs.

use std::path::PathBuf;
use thiserror::Error;

/// Step directory could not be used as a step source.
///
/// Raised by [`crate::UpdateRunner::read`] before any step executes.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The directory does not exist (or could not be resolved).
    #[error("unable to read \"{}\" directory: not found", .path.display())]
    NotFound {
        /// The path as resolved against the installation root.
        path: PathBuf,
    },

    /// The path exists but is not a directory.
    #[error("unable to read \"{}\" directory: not a directory", .path.display())]
    NotDirectory {
        /// The canonical path.
        path: PathBuf,
    },

    /// The directory exists but cannot be listed.
    #[error("unable to read \"{}\" directory: {source}", .path.display())]
    NotReadable {
        /// The canonical path.
        path: PathBuf,
        /// The underlying IO failure.
        #[source]
        source: std::io::Error,
    },

    /// A `./` or `../` path was given but no installation root is configured.
    #[error("cannot resolve \"{path}\": no installation root configured")]
    NoInstallRoot {
        /// The path as given by the caller.
        path: String,
    },
}

/// Checkpoint persistence errors.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The store refused the write.
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Terminal failure of an update run.
///
/// Every variant produced by a run names the transition that was being
/// attempted. The subject stays parked at `current` and the next run
/// starts from there.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// A step directory was unusable.
    #[error(transparent)]
    Read(#[from] ReadError),

    /// The current checkpoint could not be loaded.
    #[error("unable to load checkpoint for \"{subject}\": {source}")]
    CheckpointRead {
        /// Subject being updated.
        subject: String,
        /// The store failure.
        #[source]
        source: CheckpointError,
    },

    /// A step reported a failure.
    #[error("unable to update \"{subject}\" from \"{current}\" to \"{target}\": {message}")]
    StepFailure {
        /// Subject being updated.
        subject: String,
        /// Last committed version.
        current: String,
        /// Version of the failed step.
        target: String,
        /// Failure detail reported by the step.
        message: String,
    },

    /// A step asked to be retried later.
    #[error("unable to update \"{subject}\" from \"{current}\" to \"{target}\": step deferred")]
    StepDeferred {
        /// Subject being updated.
        subject: String,
        /// Last committed version.
        current: String,
        /// Version of the deferred step.
        target: String,
    },

    /// A step succeeded but its version could not be recorded.
    #[error(
        "unable to update \"{subject}\" from \"{current}\" to \"{target}\": checkpoint write failed: {source}"
    )]
    CheckpointWrite {
        /// Subject being updated.
        subject: String,
        /// Last committed version.
        current: String,
        /// Version whose step succeeded but was not recorded.
        target: String,
        /// The store failure.
        #[source]
        source: CheckpointError,
    },
}

impl UpdateError {
    /// Whether this is the expected "not finished yet, retry later" outcome.
    pub fn is_deferred(&self) -> bool {
        matches!(self, UpdateError::StepDeferred { .. })
    }

    /// The attempted target version, if the error came from a step.
    pub fn target(&self) -> Option<&str> {
        match self {
            UpdateError::StepFailure { target, .. }
            | UpdateError::StepDeferred { target, .. }
            | UpdateError::CheckpointWrite { target, .. } => Some(target),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failure_display() {
        let err = UpdateError::StepFailure {
            subject: "abc_plugin".to_string(),
            current: "1.0".to_string(),
            target: "2.0".to_string(),
            message: "table missing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unable to update \"abc_plugin\" from \"1.0\" to \"2.0\": table missing"
        );
        assert!(!err.is_deferred());
        assert_eq!(err.target(), Some("2.0"));
    }

    #[test]
    fn test_deferred_is_distinct() {
        let err = UpdateError::StepDeferred {
            subject: "abc_plugin".to_string(),
            current: "0.0.0".to_string(),
            target: "0.1".to_string(),
        };
        assert!(err.is_deferred());
        assert!(err.to_string().contains("deferred"));
    }

    #[test]
    fn test_read_error_display() {
        let err = ReadError::NotFound {
            path: PathBuf::from("/srv/updates"),
        };
        assert!(err.to_string().contains("/srv/updates"));

        let err: UpdateError = err.into();
        assert!(err.target().is_none());
    }
}
