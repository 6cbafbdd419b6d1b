//! CoMID Core - Template Compiler
//!
//! # The Pipeline Contract
//! 1. Decoding Is Syntax Only
//! 2. Validation Is Mandatory
//! 3. Encoding Is Canonical
//! 4. Artifacts Are Named By Identity
//! 5. One Bad Template Stops The Batch

pub mod comid;
pub mod decode;
pub mod validation;
pub mod canonical;
pub mod identity;
pub mod hashing;
pub mod fs;
pub mod pipeline;
pub mod cli;

pub use comid::{Comid, TagId, TagIdentity};
pub use decode::{decode_template, DecodeError};
pub use validation::{ValidComid, ValidationError, Validator};
pub use canonical::{encode_canonical, EncodeError};
pub use identity::{output_file_name, tag_id_string, IdentityError, CBOR_SUFFIX};
pub use fs::{FileSystem, MemFs, OsFs};
pub use pipeline::{BatchConfig, PipelineError, RunReport, TemplatePipeline};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Extension matched when scanning template directories.
pub const TEMPLATE_EXTENSION: &str = "json";
