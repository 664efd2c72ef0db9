//! Host commands: install, uninstall, trigger, status and pending.

use crate::config::CliConfig;
use crate::error::Error;
use crate::prefs::{split_list, PrefStore, DEFAULT_PATH, PREF_KEY, PREF_PATH, PREF_PREFIX};
use patchrun_core::{
    CheckpointStore, CommandExecutor, ReadError, SledCheckpointStore, SubjectLocks,
    UpdateRunner, ZERO_VERSION,
};
use serde::Serialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Preferences written by `install`.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct InstallReport {
    /// Step directory list.
    pub path: String,
    /// Shared secret for `trigger`.
    pub key: String,
    /// Names of preferences that were newly written.
    pub created: Vec<&'static str>,
}

/// Result of `uninstall`.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct UninstallReport {
    /// Number of preferences and checkpoints removed.
    pub removed: usize,
}

/// Payload reported by `trigger`.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TriggerResponse {
    /// Whether every pending step was applied.
    pub success: bool,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the failure was a deferral.
    #[serde(skip)]
    pub deferred: bool,
}

/// Recorded checkpoint of a subject.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusResponse {
    /// Subject inspected.
    pub subject: String,
    /// Last applied version.
    pub version: String,
    /// Version recorded before it.
    pub previous: Option<String>,
    /// When it was recorded (microseconds since epoch).
    pub updated_at: Option<u64>,
}

/// One entry of `pending`.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PendingEntry {
    /// Step source.
    pub pass: String,
    /// Step version.
    pub version: String,
}

/// The host: preferences, checkpoints and the runner wiring.
pub struct Host {
    _db: sled::Db,
    config: CliConfig,
    prefs: PrefStore,
    checkpoints: Arc<SledCheckpointStore>,
    locks: Arc<SubjectLocks>,
}

impl Host {
    /// Open the preference database under `config.data_path`.
    pub fn open(config: CliConfig) -> Result<Self, Error> {
        let db = sled::open(&config.data_path)?;
        let prefs = PrefStore::open(&db)?;
        let checkpoints = Arc::new(SledCheckpointStore::from_tree(prefs.tree().clone()));

        tracing::debug!(data_path = %config.data_path.display(), "preferences opened");

        Ok(Self {
            _db: db,
            config,
            prefs,
            checkpoints,
            locks: Arc::new(SubjectLocks::new()),
        })
    }

    /// Preference store.
    pub fn prefs(&self) -> &PrefStore {
        &self.prefs
    }

    /// Seed default preferences, keeping any existing values.
    pub fn install(&self) -> Result<InstallReport, Error> {
        let mut created = Vec::new();

        let (path, inserted) = self.prefs.get_or_insert(PREF_PATH, DEFAULT_PATH)?;
        if inserted {
            created.push(PREF_PATH);
        }

        let (key, inserted) = self.prefs.get_or_insert(PREF_KEY, &generate_key())?;
        if inserted {
            created.push(PREF_KEY);
        }

        tracing::info!(?created, "installed");
        Ok(InstallReport { path, key, created })
    }

    /// Remove every preference and checkpoint owned by this tool.
    pub fn uninstall(&self) -> Result<UninstallReport, Error> {
        let removed = self.prefs.remove_prefix(PREF_PREFIX)?;
        tracing::info!(removed, "uninstalled");
        Ok(UninstallReport { removed })
    }

    /// Run pending updates for `subject` if `key` matches the configured secret.
    ///
    /// Update failures are reported in the response rather than as errors;
    /// an error means the request itself was rejected.
    pub fn trigger(&self, key: &str, subject: &str) -> Result<TriggerResponse, Error> {
        let path = self
            .prefs
            .get_non_empty(PREF_PATH)?
            .ok_or(Error::NotConfigured(PREF_PATH))?;
        let expected = self
            .prefs
            .get_non_empty(PREF_KEY)?
            .ok_or(Error::NotConfigured(PREF_KEY))?;

        if !bool::from(expected.as_bytes().ct_eq(key.as_bytes())) {
            tracing::warn!(subject, "trigger rejected: invalid key");
            return Err(Error::Unauthorized);
        }

        let runner = match self.runner(subject, &path) {
            Ok(runner) => runner,
            Err(e) => {
                tracing::error!(subject, error = %e, "failed to read step directories");
                return Ok(TriggerResponse {
                    success: false,
                    error: Some(e.to_string()),
                    deferred: false,
                });
            }
        };

        Ok(match runner.execute() {
            Ok(_) => TriggerResponse {
                success: true,
                error: None,
                deferred: false,
            },
            Err(e) => TriggerResponse {
                success: false,
                deferred: e.is_deferred(),
                error: Some(e.to_string()),
            },
        })
    }

    /// Recorded checkpoint of `subject`.
    pub fn status(&self, subject: &str) -> Result<StatusResponse, Error> {
        Ok(match self.checkpoints.get(subject)? {
            Some(checkpoint) => StatusResponse {
                subject: subject.to_string(),
                version: checkpoint.version,
                previous: checkpoint.previous,
                updated_at: Some(checkpoint.updated_at),
            },
            None => StatusResponse {
                subject: subject.to_string(),
                version: ZERO_VERSION.to_string(),
                previous: None,
                updated_at: None,
            },
        })
    }

    /// Steps the next trigger for `subject` would attempt.
    pub fn pending(&self, subject: &str) -> Result<Vec<PendingEntry>, Error> {
        let path = self
            .prefs
            .get_non_empty(PREF_PATH)?
            .ok_or(Error::NotConfigured(PREF_PATH))?;
        let runner = self
            .runner(subject, &path)
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(runner
            .pending()?
            .into_iter()
            .map(|step| PendingEntry {
                pass: step.pass.to_string(),
                version: step.version,
            })
            .collect())
    }

    fn runner(&self, subject: &str, path: &str) -> Result<UpdateRunner, ReadError> {
        let executor = match &self.config.interpreter {
            Some(interpreter) => CommandExecutor::with_interpreter(interpreter.clone()),
            None => CommandExecutor::direct(),
        };

        let store: Arc<dyn CheckpointStore> = self.checkpoints.clone();
        let mut runner = UpdateRunner::new(subject, store)
            .with_install_root(&self.config.install_root)
            .with_extension(self.config.extension.clone())
            .with_executor(Arc::new(executor))
            .with_locks(Arc::clone(&self.locks));
        runner.read(split_list(path))?;
        Ok(runner)
    }
}

/// Generate a random 32-character hex secret.
pub fn generate_key() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}
