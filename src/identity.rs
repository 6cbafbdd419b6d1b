//! Identity Extraction - naming artifacts after their tag-id

use thiserror::Error;

use crate::comid::Comid;

/// Suffix appended to the tag-id to form the artifact name.
pub const CBOR_SUFFIX: &str = ".cbor";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("empty tag-id")]
    Empty,
    #[error("tag-id {0:?} is not usable as a file name")]
    UnsafeFileName(String),
}

/// String form of the tag-id, checked to be a single safe path component.
pub fn tag_id_string(comid: &Comid) -> Result<String, IdentityError> {
    let id = comid
        .tag_identity
        .tag_id()
        .ok_or(IdentityError::Empty)?
        .to_string();

    let unsafe_name = id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || id.chars().any(char::is_control);
    if unsafe_name {
        return Err(IdentityError::UnsafeFileName(id));
    }
    Ok(id)
}

/// `<tag-id>.cbor`
pub fn output_file_name(comid: &Comid) -> Result<String, IdentityError> {
    Ok(format!("{}{}", tag_id_string(comid)?, CBOR_SUFFIX))
}
