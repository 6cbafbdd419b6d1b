//! Template Pipeline - Single Entry Point
//!
//! CRITICAL: every template is validated before it is encoded. No bypass.
//!
//! A run discovers its sources, then takes each one through
//! load -> decode -> validate -> encode -> name -> write, in discovery
//! order. The first failure ends the run.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::canonical::{encode_canonical, EncodeError};
use crate::decode::{decode_template, DecodeError};
use crate::fs::{normalize, FileSystem};
use crate::hashing::sha256_hex;
use crate::identity::{output_file_name, tag_id_string, IdentityError};
use crate::validation::{ValidationError, Validator};
use crate::TEMPLATE_EXTENSION;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static VALIDATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_validation_call_count() {
    VALIDATION_CALL_COUNT.store(0, Ordering::SeqCst);
}

/// Per-source processing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Loading,
    Decoding,
    Validating,
    Encoding,
    Naming,
    Writing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Loading => "loading",
            Stage::Decoding => "decoding",
            Stage::Validating => "validating",
            Stage::Encoding => "encoding",
            Stage::Naming => "naming",
            Stage::Writing => "writing",
        })
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no templates supplied")]
    NoTemplates,

    #[error("no files found")]
    NoFilesFound,

    #[error("error loading template from {template}: {cause}")]
    Read {
        template: String,
        #[source]
        cause: io::Error,
    },

    #[error("error decoding template from {template}: {cause}")]
    Decode {
        template: String,
        #[source]
        cause: DecodeError,
    },

    #[error("error validating template {template}: {cause}")]
    Validation {
        template: String,
        #[source]
        cause: ValidationError,
    },

    #[error("error encoding template {template}: {cause}")]
    Encode {
        template: String,
        #[source]
        cause: EncodeError,
    },

    #[error("error deriving output name for template {template}: {cause}")]
    Identity {
        template: String,
        #[source]
        cause: IdentityError,
    },

    #[error("error creating output directory {}: {cause}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        cause: io::Error,
    },

    #[error("error saving CBOR file {}: {cause}", .path.display())]
    Write {
        template: String,
        path: PathBuf,
        #[source]
        cause: io::Error,
    },
}

impl PipelineError {
    /// The stage a per-source failure happened in.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::NoTemplates | PipelineError::NoFilesFound => None,
            PipelineError::Read { .. } => Some(Stage::Loading),
            PipelineError::Decode { .. } => Some(Stage::Decoding),
            PipelineError::Validation { .. } => Some(Stage::Validating),
            PipelineError::Encode { .. } => Some(Stage::Encoding),
            PipelineError::Identity { .. } => Some(Stage::Naming),
            PipelineError::OutputDir { .. } | PipelineError::Write { .. } => Some(Stage::Writing),
        }
    }

    /// The template that caused the failure, if it is attributable to one.
    pub fn template(&self) -> Option<&str> {
        match self {
            PipelineError::Read { template, .. }
            | PipelineError::Decode { template, .. }
            | PipelineError::Validation { template, .. }
            | PipelineError::Encode { template, .. }
            | PipelineError::Identity { template, .. }
            | PipelineError::Write { template, .. } => Some(template),
            _ => None,
        }
    }
}

/// What to compile and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub template_files: Vec<PathBuf>,
    /// Scanned non-recursively for `*.json`.
    pub template_dirs: Vec<PathBuf>,
    pub output_dir: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            template_files: Vec::new(),
            template_dirs: Vec::new(),
            output_dir: PathBuf::from("."),
        }
    }
}

/// Raw template bytes and where they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// A validated, encoded template ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedArtifact {
    pub tag_id: String,
    pub file_name: String,
    pub cbor: Vec<u8>,
}

/// A written artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub template: String,
    pub path: PathBuf,
    pub tag_id: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// In processing order.
    pub artifacts: Vec<Artifact>,
}

/// The template pipeline - single entry point for all template operations
pub struct TemplatePipeline<'a> {
    fs: &'a dyn FileSystem,
    validator: Validator,
}

impl<'a> TemplatePipeline<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self {
            fs,
            validator: Validator::new(),
        }
    }

    /// Resolve the configured files and directories into an ordered list.
    ///
    /// Explicit files come first, in the order given, then each
    /// directory's `*.json` entries sorted by name. Paths that do not
    /// resolve are skipped; a path is only listed once, compared after
    /// resolving `.` and `..` segments.
    pub fn discover(&self, config: &BatchConfig) -> Result<Vec<PathBuf>, PipelineError> {
        if config.template_files.is_empty() && config.template_dirs.is_empty() {
            return Err(PipelineError::NoTemplates);
        }

        let mut found = Vec::new();

        for file in &config.template_files {
            match self.fs.metadata(file) {
                Ok(meta) if !meta.is_dir => found.push(file.clone()),
                Ok(_) => warn!(path = %file.display(), "skipping template path: is a directory"),
                Err(e) => warn!(path = %file.display(), error = %e, "skipping template path"),
            }
        }

        for dir in &config.template_dirs {
            let entries = match self.fs.read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "skipping template directory");
                    continue;
                }
            };
            let mut names: Vec<_> = entries
                .into_iter()
                .filter(|e| !e.is_dir && has_template_extension(&e.name))
                .map(|e| e.name)
                .collect();
            names.sort();
            found.extend(names.into_iter().map(|name| dir.join(name)));
        }

        let mut seen = HashSet::new();
        found.retain(|path| seen.insert(normalize(path)));

        if found.is_empty() {
            return Err(PipelineError::NoFilesFound);
        }
        debug!(count = found.len(), "discovered templates");
        Ok(found)
    }

    pub fn load(&self, path: &Path) -> Result<TemplateSource, PipelineError> {
        let name = path.display().to_string();
        let bytes = self.fs.read(path).map_err(|cause| PipelineError::Read {
            template: name.clone(),
            cause,
        })?;
        Ok(TemplateSource { name, bytes })
    }

    /// Decode, validate, encode and name one template. Touches no storage.
    ///
    /// This ALWAYS validates before encoding.
    pub fn prepare(&self, source: &TemplateSource) -> Result<PreparedArtifact, PipelineError> {
        let template = &source.name;

        debug!(template = %template, stage = %Stage::Decoding, "processing template");
        let comid = decode_template(&source.bytes).map_err(|cause| PipelineError::Decode {
            template: template.clone(),
            cause,
        })?;

        #[cfg(feature = "test-hooks")]
        VALIDATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        debug!(template = %template, stage = %Stage::Validating, "processing template");
        let comid = self
            .validator
            .validate(comid)
            .map_err(|cause| PipelineError::Validation {
                template: template.clone(),
                cause,
            })?;

        debug!(template = %template, stage = %Stage::Encoding, "processing template");
        let cbor = encode_canonical(&comid).map_err(|cause| PipelineError::Encode {
            template: template.clone(),
            cause,
        })?;

        let naming_error = |cause| PipelineError::Identity {
            template: template.clone(),
            cause,
        };
        let tag_id = tag_id_string(&comid).map_err(naming_error)?;
        let file_name = output_file_name(&comid).map_err(naming_error)?;

        Ok(PreparedArtifact {
            tag_id,
            file_name,
            cbor,
        })
    }

    fn commit(
        &self,
        template: &str,
        output_dir: &Path,
        prepared: PreparedArtifact,
    ) -> Result<Artifact, PipelineError> {
        self.fs
            .create_dir_all(output_dir)
            .map_err(|cause| PipelineError::OutputDir {
                path: output_dir.to_path_buf(),
                cause,
            })?;

        let path = output_dir.join(&prepared.file_name);
        if self.fs.metadata(&path).is_ok() {
            debug!(path = %path.display(), "overwriting existing artifact");
        }
        self.fs
            .write(&path, &prepared.cbor)
            .map_err(|cause| PipelineError::Write {
                template: template.to_string(),
                path: path.clone(),
                cause,
            })?;

        let sha256 = sha256_hex(&prepared.cbor);
        info!(
            template = %template,
            path = %path.display(),
            tag_id = %prepared.tag_id,
            sha256 = %sha256,
            "created CBOR artifact"
        );
        Ok(Artifact {
            template: template.to_string(),
            path,
            tag_id: prepared.tag_id,
            sha256,
        })
    }

    /// Run the whole batch. Stops at the first template that fails.
    pub fn run(&self, config: &BatchConfig) -> Result<RunReport, PipelineError> {
        let paths = self.discover(config)?;
        let mut report = RunReport::default();

        for path in &paths {
            let source = self.load(path)?;
            let prepared = self.prepare(&source)?;
            let artifact = self.commit(&source.name, &config.output_dir, prepared)?;
            report.artifacts.push(artifact);
        }

        Ok(report)
    }
}

fn has_template_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext == TEMPLATE_EXTENSION)
}
