//! Patchrun - command-line host for the update runner.
//!
//! Keeps preferences and checkpoints in a sled database and exposes the
//! install, uninstall and trigger hooks of a host application. Results are
//! printed to stdout as JSON; logs go to stderr.

mod commands;
mod config;
mod error;
mod prefs;

use clap::Parser;
use commands::Host;
use config::{Args, Command};
use serde::Serialize;
use std::io::Write;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status when the run stopped on a deferred step.
const EXIT_DEFERRED: i32 = 75;

fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "patchrun=info,patchrun_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let (config, command) = args.into_config();

    tracing::debug!(
        data_path = %config.data_path.display(),
        install_root = %config.install_root.display(),
        "configuration loaded"
    );

    match run(config, command) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            let _ = write_error(&mut std::io::stderr(), &e);
            std::process::exit(1);
        }
    }
}

fn run(config: config::CliConfig, command: Command) -> Result<i32, error::Error> {
    let host = Host::open(config)?;

    match command {
        Command::Install => print_json(&host.install()?).map(|_| 0),
        Command::Uninstall => print_json(&host.uninstall()?).map(|_| 0),
        Command::Trigger { key, subject } => {
            let response = host.trigger(&key, &subject)?;
            print_json(&response)?;
            Ok(if response.success {
                0
            } else if response.deferred {
                EXIT_DEFERRED
            } else {
                1
            })
        }
        Command::Status { subject } => print_json(&host.status(&subject)?).map(|_| 0),
        Command::Pending { subject } => print_json(&host.pending(&subject)?).map(|_| 0),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), error::Error> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Report a failed command once, on `out`.
fn write_error(out: &mut impl Write, e: &error::Error) -> std::io::Result<()> {
    writeln!(out, "Error: {}", e)
}
