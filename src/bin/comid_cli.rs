//! CoMID CLI
//!
//! Commands: create
//! Silent on success; errors go to stderr.
//! Returns 2 on usage errors, 1 on template failures.

use clap::Parser;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use comid_core::cli::{self, ArgumentError, Cli, CliError, Commands};
use comid_core::OsFs;

fn init_logging() {
    let default_level = "warn";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn fail(err: CliError) -> ExitCode {
    eprintln!("Error: {}", err);
    ExitCode::from(err.exit_code())
}

fn main() -> ExitCode {
    init_logging();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => {
            // --help / --version
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => return fail(ArgumentError::from(e).into()),
    };

    match cli.command {
        Commands::Create(args) => match cli::run_create(&args, &OsFs) {
            Ok(report) => {
                debug!(artifacts = report.artifacts.len(), "create finished");
                ExitCode::SUCCESS
            }
            Err(e) => fail(e.into()),
        },
    }
}
