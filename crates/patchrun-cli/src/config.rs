//! CLI configuration.

use clap::{Parser, Subcommand};
use patchrun_core::step::DEFAULT_INTERPRETER;
use patchrun_core::DEFAULT_STEP_EXTENSION;
use std::path::PathBuf;

/// Subject updated when none is given: the tool's own name.
pub const DEFAULT_SUBJECT: &str = "patchrun";

/// Default data directory.
pub const DEFAULT_DATA_PATH: &str = "./data";

/// Patchrun host configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Path to the preference database directory.
    pub data_path: PathBuf,

    /// Root that `./` and `../` step paths resolve against.
    pub install_root: PathBuf,

    /// Extension of step files.
    pub extension: String,

    /// Interpreter for step files. None executes them directly.
    pub interpreter: Option<String>,
}

impl CliConfig {
    /// Create a configuration using `data_path` as database and installation root.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        let data_path = data_path.into();
        Self {
            install_root: data_path.clone(),
            data_path,
            extension: DEFAULT_STEP_EXTENSION.to_string(),
            interpreter: Some(DEFAULT_INTERPRETER.to_string()),
        }
    }

    /// Set the installation root.
    pub fn with_install_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.install_root = root.into();
        self
    }

    /// Set the step file extension.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Set the step interpreter.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Execute step files directly.
    pub fn without_interpreter(mut self) -> Self {
        self.interpreter = None;
        self
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_PATH)
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "patchrun")]
#[command(version, about = "Versioned, checkpointed update runner", long_about = None)]
pub struct Args {
    /// Path to the preference database directory.
    #[arg(short, long, global = true, default_value = DEFAULT_DATA_PATH)]
    pub data_path: PathBuf,

    /// Installation root for `./` and `../` step paths (defaults to the data path).
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Step file extension.
    #[arg(long, global = true, default_value = DEFAULT_STEP_EXTENSION)]
    pub extension: String,

    /// Interpreter used to execute step files.
    #[arg(long, global = true, default_value = DEFAULT_INTERPRETER)]
    pub interpreter: String,

    /// Execute step files directly instead of through the interpreter.
    #[arg(long, global = true)]
    pub direct: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Seed default preferences (step path and a random key).
    Install,

    /// Remove all preferences and checkpoints.
    Uninstall,

    /// Run pending updates if the key matches.
    Trigger {
        /// Shared secret configured at install time.
        #[arg(long)]
        key: String,

        /// Subject to update.
        #[arg(long, default_value = DEFAULT_SUBJECT)]
        subject: String,
    },

    /// Show the recorded checkpoint.
    Status {
        /// Subject to inspect.
        #[arg(long, default_value = DEFAULT_SUBJECT)]
        subject: String,
    },

    /// List the steps the next trigger would attempt.
    Pending {
        /// Subject to inspect.
        #[arg(long, default_value = DEFAULT_SUBJECT)]
        subject: String,
    },
}

impl Args {
    /// Convert command-line arguments to configuration and a command.
    pub fn into_config(self) -> (CliConfig, Command) {
        let mut config = CliConfig::new(self.data_path).with_extension(self.extension);
        if let Some(root) = self.root {
            config = config.with_install_root(root);
        }
        config = if self.direct {
            config.without_interpreter()
        } else {
            config.with_interpreter(self.interpreter)
        };
        (config, self.command)
    }
}
