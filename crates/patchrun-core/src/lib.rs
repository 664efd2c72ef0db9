//! Patchrun Core - versioned, checkpointed update runner.
//!
//! Applies version-tagged update steps for a subject (usually a plugin or
//! component name), in ascending version order, recording the last applied
//! version after every successful step. A later run resumes from that
//! checkpoint.
//!
//! Steps come from two sources: callbacks registered with
//! [`UpdateRunner::map`] and script files discovered with
//! [`UpdateRunner::read`]. All callback steps run before any file step.
//!
//! # Example
//!
//! ```ignore
//! use patchrun_core::{MemoryCheckpointStore, Outcome, StepContext, UpdateRunner};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryCheckpointStore::new());
//! let mut runner = UpdateRunner::new("abc_plugin", store)
//!     .with_install_root("/srv/site/textpattern");
//!
//! runner.add("1.0", |_: &StepContext| Outcome::Success);
//! runner.read(["../abc_plugin/updates"])?;
//!
//! let report = runner.run();
//! println!("now at {:?}", report.current_version);
//! ```
//!
//! # Writing steps
//!
//! The checkpoint is written only after a step reports success. If the
//! process dies between the step finishing and the checkpoint being
//! written, the step runs again on the next invocation with the same
//! `old` version, so every step must be safe to re-run.

pub mod checkpoint;
pub mod error;
pub mod lock;
pub mod runner;
pub mod source;
pub mod step;
pub mod version;

pub use checkpoint::{
    checkpoint_key, Checkpoint, CheckpointStore, MemoryCheckpointStore, SledCheckpointStore,
    CHECKPOINT_KEY_PREFIX,
};
pub use error::{CheckpointError, ReadError, UpdateError};
pub use lock::SubjectLocks;
pub use runner::{Halt, HaltKind, Pass, PendingStep, RunReport, RunState, UpdateRunner};
pub use source::{StepMap, StepReader, DEFAULT_STEP_EXTENSION};
pub use step::{CommandExecutor, FileStep, Outcome, Step, StepContext, StepExecutor};
pub use version::ZERO_VERSION;
