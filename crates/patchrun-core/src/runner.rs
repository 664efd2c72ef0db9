//! Update runner - applies pending steps and advances the checkpoint.
//!
//! A run loads the subject's checkpoint, then makes two passes: first over
//! the callback steps, then over the file steps. Within a pass, steps run
//! in ascending version order and only if newer than the current
//! checkpoint. After every successful step the checkpoint is written before
//! the next step starts. The first failure, deferral or checkpoint write
//! error halts the run; a halted callback pass means the file pass never
//! starts.

use crate::checkpoint::CheckpointStore;
use crate::error::{CheckpointError, ReadError, UpdateError};
use crate::lock::SubjectLocks;
use crate::source::{StepMap, StepReader};
use crate::step::{CommandExecutor, FileStep, Outcome, Step, StepContext, StepExecutor};
use crate::version::is_newer;
use std::path::PathBuf;
use std::sync::Arc;

/// Which step source a step came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Steps registered with [`UpdateRunner::map`].
    Callbacks,
    /// Steps discovered with [`UpdateRunner::read`].
    Files,
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pass::Callbacks => write!(f, "callbacks"),
            Pass::Files => write!(f, "files"),
        }
    }
}

/// Why a run stopped early.
#[derive(Debug)]
pub enum HaltKind {
    /// The checkpoint could not be loaded; nothing ran.
    CheckpointRead(CheckpointError),
    /// A step failed.
    StepFailed(String),
    /// A step asked to be retried later.
    Deferred,
    /// A step succeeded but its version could not be recorded.
    CheckpointWrite(CheckpointError),
}

/// A halted run.
#[derive(Debug)]
pub struct Halt {
    /// Why the run stopped.
    pub kind: HaltKind,
    /// Pass that was running, if any step was attempted.
    pub pass: Option<Pass>,
    /// Version the subject is parked at. `None` if the checkpoint could not
    /// be read.
    pub current: Option<String>,
    /// Version that was being attempted.
    pub target: Option<String>,
}

impl Halt {
    /// Whether this is the expected "retry later" outcome.
    pub fn is_deferred(&self) -> bool {
        matches!(self.kind, HaltKind::Deferred)
    }
}

/// Terminal state of a run.
#[derive(Debug)]
pub enum RunState {
    /// Every pending step in both passes succeeded.
    Completed,
    /// The run stopped early.
    Halted(Halt),
}

/// Outcome of [`UpdateRunner::run`].
#[derive(Debug)]
pub struct RunReport {
    /// Subject that was updated.
    pub subject: String,
    /// Checkpoint at the start of the run. `None` if it could not be read.
    pub from_version: Option<String>,
    /// Checkpoint at the end of the run. `None` if it could not be read.
    pub current_version: Option<String>,
    /// Versions applied and recorded during this run, in order.
    pub applied: Vec<String>,
    /// How the run ended.
    pub state: RunState,
}

impl RunReport {
    /// Whether the run completed.
    pub fn is_completed(&self) -> bool {
        matches!(self.state, RunState::Completed)
    }

    /// The halt, if the run stopped early.
    pub fn halt(&self) -> Option<&Halt> {
        match &self.state {
            RunState::Halted(halt) => Some(halt),
            RunState::Completed => None,
        }
    }

    /// Convert a halted run into an [`UpdateError`].
    pub fn into_result(self) -> Result<RunReport, UpdateError> {
        let halt = match self.state {
            RunState::Completed => return Ok(self),
            RunState::Halted(halt) => halt,
        };

        let subject = self.subject;
        let current = halt.current.unwrap_or_default();
        let target = halt.target.unwrap_or_default();

        Err(match halt.kind {
            HaltKind::CheckpointRead(source) => UpdateError::CheckpointRead { subject, source },
            HaltKind::StepFailed(message) => UpdateError::StepFailure {
                subject,
                current,
                target,
                message,
            },
            HaltKind::Deferred => UpdateError::StepDeferred {
                subject,
                current,
                target,
            },
            HaltKind::CheckpointWrite(source) => UpdateError::CheckpointWrite {
                subject,
                current,
                target,
                source,
            },
        })
    }
}

/// A step a run would attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStep {
    /// Source of the step.
    pub pass: Pass,
    /// Version of the step.
    pub version: String,
}

/// Applies version-ordered update steps to one subject.
pub struct UpdateRunner {
    subject: String,
    store: Arc<dyn CheckpointStore>,
    callbacks: StepMap,
    files: StepMap,
    reader: StepReader,
    executor: Arc<dyn StepExecutor>,
    locks: Option<Arc<SubjectLocks>>,
}

impl UpdateRunner {
    /// Create a runner for `subject` recording progress in `store`.
    pub fn new(subject: impl Into<String>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            subject: subject.into(),
            store,
            callbacks: StepMap::new(),
            files: StepMap::new(),
            reader: StepReader::new(),
            executor: Arc::new(CommandExecutor::default()),
            locks: None,
        }
    }

    /// Set the installation root that `./` and `../` step paths resolve to.
    pub fn with_install_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.reader = self.reader.with_install_root(root);
        self
    }

    /// Set the extension of step files.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.reader = self.reader.with_extension(extension);
        self
    }

    /// Set the executor used for step files read afterwards.
    pub fn with_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Serialize runs of the same subject through `locks`.
    pub fn with_locks(mut self, locks: Arc<SubjectLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Subject being updated.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Registered callback steps.
    pub fn callbacks(&self) -> &StepMap {
        &self.callbacks
    }

    /// Discovered file steps.
    pub fn files(&self) -> &StepMap {
        &self.files
    }

    /// Register callback steps.
    ///
    /// Steps are merged into those already registered; a version that is
    /// already registered is replaced.
    pub fn map<I, V>(&mut self, steps: I) -> &mut Self
    where
        I: IntoIterator<Item = (V, Arc<dyn Step>)>,
        V: Into<String>,
    {
        self.callbacks.merge(steps);
        self
    }

    /// Register a single callback step.
    pub fn add<S: Step + 'static>(&mut self, version: impl Into<String>, step: S) -> &mut Self {
        let step: Arc<dyn Step> = Arc::new(step);
        self.map([(version.into(), step)])
    }

    /// Discover step files under `paths` and register them.
    ///
    /// Every directory must exist and be readable; otherwise nothing is
    /// registered. Returns the number of step files found.
    pub fn read<I, P>(&mut self, paths: I) -> Result<usize, ReadError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let found = self.reader.discover(paths)?;
        let count = found.len();

        let executor = &self.executor;
        self.files.merge(found.into_iter().map(|(version, path)| {
            let step: Arc<dyn Step> = Arc::new(FileStep::new(path, Arc::clone(executor)));
            (version, step)
        }));

        tracing::info!(subject = %self.subject, count, "step files registered");
        Ok(count)
    }

    /// Steps the next run would attempt, without running anything.
    ///
    /// Assumes every attempted step succeeds, so a file step at or below the
    /// highest pending callback version is not listed.
    pub fn pending(&self) -> Result<Vec<PendingStep>, CheckpointError> {
        let mut current = self.store.current_version(&self.subject)?;
        let mut pending = Vec::new();

        for (pass, steps) in self.passes() {
            for version in steps.versions() {
                if is_newer(&current, version) {
                    pending.push(PendingStep {
                        pass,
                        version: version.to_string(),
                    });
                    current = version.to_string();
                }
            }
        }

        Ok(pending)
    }

    /// Run all pending steps.
    pub fn run(&self) -> RunReport {
        match &self.locks {
            Some(locks) => locks.with_lock(&self.subject, || self.run_unlocked()),
            None => self.run_unlocked(),
        }
    }

    /// Run all pending steps, converting a halt into an error.
    pub fn execute(&self) -> Result<RunReport, UpdateError> {
        self.run().into_result()
    }

    fn run_unlocked(&self) -> RunReport {
        let from_version = match self.store.current_version(&self.subject) {
            Ok(version) => version,
            Err(e) => {
                tracing::error!(subject = %self.subject, error = %e, "failed to load checkpoint");
                return RunReport {
                    subject: self.subject.clone(),
                    from_version: None,
                    current_version: None,
                    applied: Vec::new(),
                    state: RunState::Halted(Halt {
                        kind: HaltKind::CheckpointRead(e),
                        pass: None,
                        current: None,
                        target: None,
                    }),
                };
            }
        };

        tracing::info!(subject = %self.subject, version = %from_version, "starting update run");

        let mut current = from_version.clone();
        let mut applied = Vec::new();
        let mut state = RunState::Completed;

        for (pass, steps) in self.passes() {
            if let Err(halt) = self.run_pass(pass, steps, &mut current, &mut applied) {
                state = RunState::Halted(halt);
                break;
            }
        }

        match &state {
            RunState::Completed => tracing::info!(
                subject = %self.subject,
                version = %current,
                applied = applied.len(),
                "update run completed"
            ),
            RunState::Halted(halt) => tracing::warn!(
                subject = %self.subject,
                version = %current,
                target = ?halt.target,
                deferred = halt.is_deferred(),
                "update run halted"
            ),
        }

        RunReport {
            subject: self.subject.clone(),
            from_version: Some(from_version),
            current_version: Some(current),
            applied,
            state,
        }
    }

    fn passes(&self) -> [(Pass, &StepMap); 2] {
        [(Pass::Callbacks, &self.callbacks), (Pass::Files, &self.files)]
    }

    fn run_pass(
        &self,
        pass: Pass,
        steps: &StepMap,
        current: &mut String,
        applied: &mut Vec<String>,
    ) -> Result<(), Halt> {
        for (version, step) in steps.iter() {
            if !is_newer(current, version) {
                continue;
            }

            let ctx = StepContext {
                subject: self.subject.clone(),
                version: version.to_string(),
                old: current.clone(),
            };
            let halt = |kind| Halt {
                kind,
                pass: Some(pass),
                current: Some(ctx.old.clone()),
                target: Some(ctx.version.clone()),
            };

            tracing::info!(
                subject = %self.subject,
                %pass,
                from = %ctx.old,
                to = %ctx.version,
                "applying step"
            );

            match step.apply(&ctx) {
                Outcome::Success => {}
                Outcome::Deferred => {
                    tracing::info!(subject = %self.subject, version, "step deferred");
                    return Err(halt(HaltKind::Deferred));
                }
                Outcome::Failure(message) => {
                    tracing::error!(subject = %self.subject, version, error = %message, "step failed");
                    return Err(halt(HaltKind::StepFailed(message)));
                }
            }

            if let Err(e) = self.store.set(&self.subject, version) {
                tracing::error!(
                    subject = %self.subject,
                    version,
                    error = %e,
                    "failed to record checkpoint"
                );
                return Err(halt(HaltKind::CheckpointWrite(e)));
            }

            *current = ctx.version.clone();
            applied.push(ctx.version.clone());
        }

        Ok(())
    }
}

impl std::fmt::Debug for UpdateRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateRunner")
            .field("subject", &self.subject)
            .field("callbacks", &self.callbacks)
            .field("files", &self.files)
            .field("reader", &self.reader)
            .finish()
    }
}
