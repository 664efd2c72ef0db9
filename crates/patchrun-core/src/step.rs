//! Update steps.
//!
//! A step is one version-tagged unit of update work. Callback steps are
//! plain closures; file steps are scripts executed through a
//! [`StepExecutor`].

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// Exit status a step script uses to say "not finished, run me again later".
pub const EXIT_DEFERRED: i32 = 75;

/// Default interpreter for step scripts.
pub const DEFAULT_INTERPRETER: &str = "sh";

/// What a step is told about the update it performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepContext {
    /// Subject being updated.
    pub subject: String,
    /// Version this step moves the subject to.
    pub version: String,
    /// Version the subject is at before this step.
    pub old: String,
}

/// Result of applying a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The step completed; its version may be recorded.
    Success,
    /// The step is not finished yet and should be retried by a later run.
    Deferred,
    /// The step failed.
    Failure(String),
}

impl Outcome {
    /// Map a fallible boolean result: `Ok(true)` succeeds, `Ok(false)`
    /// defers and `Err` fails.
    pub fn from_result<E: std::fmt::Display>(result: Result<bool, E>) -> Self {
        match result {
            Ok(done) => done.into(),
            Err(e) => Outcome::Failure(e.to_string()),
        }
    }

    /// Whether the step completed.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl From<bool> for Outcome {
    fn from(done: bool) -> Self {
        if done {
            Outcome::Success
        } else {
            Outcome::Deferred
        }
    }
}

/// A unit of update work.
///
/// Implementations must tolerate being applied again with the same
/// context: the checkpoint is only written after [`Outcome::Success`], so a
/// crash in between re-runs the step.
pub trait Step: Send + Sync {
    /// Apply the update.
    fn apply(&self, ctx: &StepContext) -> Outcome;
}

impl<F> Step for F
where
    F: Fn(&StepContext) -> Outcome + Send + Sync,
{
    fn apply(&self, ctx: &StepContext) -> Outcome {
        self(ctx)
    }
}

/// Runs step files.
pub trait StepExecutor: Send + Sync {
    /// Execute the step file at `path`.
    fn execute(&self, path: &Path, ctx: &StepContext) -> Outcome;
}

/// Executes step files as child processes.
///
/// The step context is passed through the environment as
/// `PATCHRUN_SUBJECT`, `PATCHRUN_VERSION` and `PATCHRUN_OLD_VERSION`.
/// Exit status 0 is success, [`EXIT_DEFERRED`] defers, anything else fails.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    interpreter: Option<String>,
}

impl CommandExecutor {
    /// Run step files through `interpreter` (e.g. `sh`, `python3`).
    pub fn with_interpreter(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: Some(interpreter.into()),
        }
    }

    /// Execute step files directly; they must be executable.
    pub fn direct() -> Self {
        Self { interpreter: None }
    }

    fn command(&self, path: &Path) -> Command {
        match &self.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(path);
                command
            }
            None => Command::new(path),
        }
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::with_interpreter(DEFAULT_INTERPRETER)
    }
}

impl StepExecutor for CommandExecutor {
    fn execute(&self, path: &Path, ctx: &StepContext) -> Outcome {
        let mut command = self.command(path);
        command
            .env("PATCHRUN_SUBJECT", &ctx.subject)
            .env("PATCHRUN_VERSION", &ctx.version)
            .env("PATCHRUN_OLD_VERSION", &ctx.old);
        if let Some(dir) = path.parent() {
            command.current_dir(dir);
        }

        let output = match command.output() {
            Ok(output) => output,
            Err(e) => {
                return Outcome::Failure(format!("failed to execute {}: {e}", path.display()));
            }
        };

        if let Some(stdout) = captured(&output.stdout) {
            tracing::debug!(
                path = %path.display(),
                version = %ctx.version,
                stdout = %stdout,
                "step output"
            );
        }

        match output.status.code() {
            Some(0) => Outcome::Success,
            Some(EXIT_DEFERRED) => Outcome::Deferred,
            code => {
                let status = match code {
                    Some(code) => format!("exit status {code}"),
                    None => "terminated by signal".to_string(),
                };
                match captured(&output.stderr) {
                    Some(stderr) => {
                        Outcome::Failure(format!("{} {status}: {stderr}", path.display()))
                    }
                    None => Outcome::Failure(format!("{} {status}", path.display())),
                }
            }
        }
    }
}

/// Trimmed process output, or `None` if there was none.
fn captured(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// A step backed by a file on disk.
#[derive(Clone)]
pub struct FileStep {
    path: PathBuf,
    executor: Arc<dyn StepExecutor>,
}

impl FileStep {
    /// Create a file step.
    pub fn new(path: impl Into<PathBuf>, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            path: path.into(),
            executor,
        }
    }

    /// Location of the step file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for FileStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStep").field("path", &self.path).finish()
    }
}

impl Step for FileStep {
    fn apply(&self, ctx: &StepContext) -> Outcome {
        self.executor.execute(&self.path, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn context(version: &str, old: &str) -> StepContext {
        StepContext {
            subject: "abc_plugin".to_string(),
            version: version.to_string(),
            old: old.to_string(),
        }
    }

    #[test]
    fn test_outcome_from_bool() {
        assert_eq!(Outcome::from(true), Outcome::Success);
        assert_eq!(Outcome::from(false), Outcome::Deferred);
    }

    #[test]
    fn test_outcome_from_result() {
        assert_eq!(Outcome::from_result::<String>(Ok(true)), Outcome::Success);
        assert_eq!(Outcome::from_result::<String>(Ok(false)), Outcome::Deferred);
        assert_eq!(
            Outcome::from_result(Err::<bool, _>("boom")),
            Outcome::Failure("boom".to_string())
        );
    }

    #[test]
    fn test_closure_step_receives_context() {
        let seen = Mutex::new(None);
        let step = |ctx: &StepContext| {
            *seen.lock() = Some(ctx.clone());
            Outcome::Success
        };

        assert!(step.apply(&context("1.0", "0.0.0")).is_success());
        assert_eq!(seen.lock().clone(), Some(context("1.0", "0.0.0")));
    }

    struct RecordingExecutor {
        calls: Mutex<Vec<(PathBuf, String)>>,
    }

    impl StepExecutor for RecordingExecutor {
        fn execute(&self, path: &Path, ctx: &StepContext) -> Outcome {
            self.calls
                .lock()
                .push((path.to_path_buf(), ctx.version.clone()));
            Outcome::Deferred
        }
    }

    #[test]
    fn test_file_step_delegates_to_executor() {
        let executor = Arc::new(RecordingExecutor {
            calls: Mutex::new(Vec::new()),
        });
        let step = FileStep::new("/updates/1.0.sh", executor.clone());

        assert_eq!(step.apply(&context("1.0", "0.0.0")), Outcome::Deferred);
        assert_eq!(
            executor.calls.lock().as_slice(),
            &[(PathBuf::from("/updates/1.0.sh"), "1.0".to_string())]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_command_executor_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let ok = dir.path().join("ok.sh");
        let later = dir.path().join("later.sh");
        let bad = dir.path().join("bad.sh");
        std::fs::write(&ok, "test \"$PATCHRUN_VERSION\" = \"1.0\" || exit 1\nexit 0\n").unwrap();
        std::fs::write(&later, "exit 75\n").unwrap();
        std::fs::write(&bad, "echo 'no table' >&2\nexit 3\n").unwrap();

        let executor = CommandExecutor::default();
        let ctx = context("1.0", "0.0.0");

        assert_eq!(executor.execute(&ok, &ctx), Outcome::Success);
        assert_eq!(executor.execute(&later, &ctx), Outcome::Deferred);
        match executor.execute(&bad, &ctx) {
            Outcome::Failure(message) => {
                assert!(message.contains("exit status 3"));
                assert!(message.contains("no table"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_captured_output() {
        assert_eq!(captured(b""), None);
        assert_eq!(captured(b"  \n"), None);
        assert_eq!(captured(b"migrated 3 rows\n"), Some("migrated 3 rows".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_executor_stdout_does_not_affect_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let noisy = dir.path().join("noisy.sh");
        std::fs::write(&noisy, "echo \"migrating to $PATCHRUN_VERSION\"\nexit 0\n").unwrap();

        let executor = CommandExecutor::default();
        assert_eq!(
            executor.execute(&noisy, &context("1.0", "0.0.0")),
            Outcome::Success
        );
    }

    #[test]
    fn test_command_executor_spawn_failure() {
        let executor = CommandExecutor::with_interpreter("patchrun-no-such-interpreter");
        let outcome = executor.execute(Path::new("/tmp/1.0.sh"), &context("1.0", "0.0.0"));
        assert!(matches!(outcome, Outcome::Failure(_)));
    }
}
