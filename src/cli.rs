//! Command-line surface for `comid create`
//!
//! Flag parsing lives in the library so the whole command, flags included,
//! can be driven against any [`FileSystem`].

use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{Args, Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;

use crate::fs::FileSystem;
use crate::pipeline::{BatchConfig, PipelineError, RunReport, TemplatePipeline};
use crate::VERSION;

#[derive(Debug, Parser)]
#[command(name = "comid")]
#[command(version = VERSION)]
#[command(about = "CoMID tooling - compile JSON templates into canonical CBOR")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create CBOR-encoded CoMIDs from JSON templates
    Create(CreateArgs),
}

#[derive(Debug, Clone, Args)]
pub struct CreateArgs {
    /// CoMID template file (JSON); may be repeated
    #[arg(long = "tmpl-file", value_name = "FILE")]
    pub template_files: Vec<PathBuf>,

    /// Directory scanned for *.json templates (not recursive); may be repeated
    #[arg(long = "tmpl-dir", value_name = "DIR")]
    pub template_dirs: Vec<PathBuf>,

    /// Directory the CBOR files are written to
    #[arg(long = "output-dir", value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,
}

impl From<&CreateArgs> for BatchConfig {
    fn from(args: &CreateArgs) -> Self {
        BatchConfig {
            template_files: args.template_files.clone(),
            template_dirs: args.template_dirs.clone(),
            output_dir: args.output_dir.clone(),
        }
    }
}

/// The `create` flags on their own, without a binary name in front.
#[derive(Debug, Parser)]
#[command(name = "create", no_binary_name = true)]
struct CreateCommand {
    #[command(flatten)]
    args: CreateArgs,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("unknown flag: {0}")]
    UnknownFlag(String),
    #[error("{0}")]
    Usage(String),
}

impl From<clap::Error> for ArgumentError {
    fn from(err: clap::Error) -> Self {
        if err.kind() == ErrorKind::UnknownArgument {
            if let Some(ContextValue::String(arg)) = err.get(ContextKind::InvalidArg) {
                if arg.starts_with('-') {
                    let flag = arg.split('=').next().unwrap_or(arg);
                    return ArgumentError::UnknownFlag(flag.to_string());
                }
            }
        }
        let rendered = err.render().to_string();
        let message = rendered.trim_end();
        ArgumentError::Usage(message.strip_prefix("error: ").unwrap_or(message).to_string())
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Argument(#[from] ArgumentError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl CliError {
    /// 2 for bad usage, 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Argument(_) => 2,
            CliError::Pipeline(_) => 1,
        }
    }
}

/// Run already-parsed `create` arguments.
pub fn run_create(args: &CreateArgs, fs: &dyn FileSystem) -> Result<RunReport, PipelineError> {
    TemplatePipeline::new(fs).run(&BatchConfig::from(args))
}

/// Parse `create` flags (no binary name) and run them.
pub fn execute_create<I, T>(args: I, fs: &dyn FileSystem) -> Result<RunReport, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let command = CreateCommand::try_parse_from(args).map_err(ArgumentError::from)?;
    Ok(run_create(&command.args, fs)?)
}
