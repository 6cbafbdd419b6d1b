//! Semantic Validation - Rules Over the Typed Model
//!
//! Rules run in a fixed order and the first failure wins, so the same
//! template always produces the same message.

use std::fmt;
use std::ops::Deref;
use thiserror::Error;
use url::Url;

use crate::comid::{
    hash_algorithm, oid_to_ber, ClassId, Comid, Environment, InstanceId, KeyTriple,
    Measurement, MeasurementKey, MeasurementValues, ValueTriple,
};

/// The named check that rejected a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    TagIdentity,
    Entities,
    LinkedTags,
    Triples,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Check::TagIdentity => "tag-identity",
            Check::Entities => "entities",
            Check::LinkedTags => "linked-tags",
            Check::Triples => "triples",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Cause {
    #[error("empty tag-id")]
    EmptyTagId,
    #[error("no entities")]
    NoEntities,
    #[error("empty entity-name")]
    EmptyEntityName,
    #[error("empty roles")]
    EmptyRoles,
    #[error("invalid reg-id {0:?}: not an absolute URI")]
    InvalidRegId(String),
    #[error("no linked tags")]
    NoLinkedTags,
    #[error("empty linked-tag-id")]
    EmptyLinkedTagId,
    #[error("tag cannot link to itself")]
    SelfLink,
    #[error("triples struct must not be empty")]
    EmptyTriples,
    #[error("environment must not be empty")]
    EmptyEnvironment,
    #[error("class must not be empty")]
    EmptyClass,
    #[error("impl-id must be 32 bytes, got {0}")]
    ImplIdLength(usize),
    #[error("invalid OID {0:?}")]
    InvalidOid(String),
    #[error("empty ueid")]
    EmptyUeid,
    #[error("nil UUID")]
    NilUuid,
    #[error("no measurements")]
    NoMeasurements,
    #[error("empty measurement key")]
    EmptyMeasurementKey,
    #[error("signer-id must be 32, 48 or 64 bytes, got {0}")]
    SignerIdLength(usize),
    #[error("no measurement value set")]
    EmptyMeasurementValue,
    #[error("empty version")]
    EmptyVersion,
    #[error("empty digests")]
    EmptyDigests,
    #[error("unknown hash algorithm {0:?}")]
    UnknownHashAlgorithm(String),
    #[error("{alg} digest must be {expected} bytes, got {actual}")]
    DigestLength {
        alg: String,
        expected: usize,
        actual: usize,
    },
    #[error("raw-value-mask without raw-value")]
    MaskWithoutRawValue,
    #[error("raw-value-mask is {mask} bytes, longer than raw-value ({value} bytes)")]
    MaskTooLong { mask: usize, value: usize },
    #[error("no verification keys")]
    NoKeys,
    #[error("empty key")]
    EmptyKey,
}

/// A rule's finding, with the path inside the section where it occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub location: Vec<String>,
    pub cause: Cause,
}

impl From<Cause> for Violation {
    fn from(cause: Cause) -> Self {
        Self {
            location: Vec::new(),
            cause,
        }
    }
}

fn fail(cause: Cause) -> Result<(), Violation> {
    Err(cause.into())
}

trait Locate {
    fn at(self, segment: impl FnOnce() -> String) -> Self;
}

impl Locate for Result<(), Violation> {
    fn at(self, segment: impl FnOnce() -> String) -> Self {
        self.map_err(|mut v| {
            v.location.insert(0, segment());
            v
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub check: Check,
    pub location: Vec<String>,
    pub cause: Cause,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation failed: ", self.check)?;
        for segment in &self.location {
            write!(f, "{segment}: ")?;
        }
        write!(f, "{}", self.cause)
    }
}

impl std::error::Error for ValidationError {}

/// A `Comid` that passed every rule. Only the validator constructs one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidComid(Comid);

impl ValidComid {
    pub fn into_inner(self) -> Comid {
        self.0
    }
}

impl Deref for ValidComid {
    type Target = Comid;

    fn deref(&self) -> &Comid {
        &self.0
    }
}

/// Validation rule trait - one named check over a whole instance
pub trait ValidationRule {
    fn check(&self) -> Check;
    fn validate(&self, comid: &Comid) -> Result<(), Violation>;
}

// --- Concrete Rules ---

pub struct TagIdentityRule;

impl ValidationRule for TagIdentityRule {
    fn check(&self) -> Check {
        Check::TagIdentity
    }

    fn validate(&self, comid: &Comid) -> Result<(), Violation> {
        match comid.tag_identity.tag_id() {
            Some(_) => Ok(()),
            None => fail(Cause::EmptyTagId),
        }
    }
}

pub struct EntitiesRule;

impl ValidationRule for EntitiesRule {
    fn check(&self) -> Check {
        Check::Entities
    }

    fn validate(&self, comid: &Comid) -> Result<(), Violation> {
        let Some(entities) = &comid.entities else {
            return Ok(());
        };
        if entities.is_empty() {
            return fail(Cause::NoEntities);
        }

        for (i, entity) in entities.iter().enumerate() {
            let result = if entity.name.is_empty() {
                fail(Cause::EmptyEntityName)
            } else if entity.roles.is_empty() {
                fail(Cause::EmptyRoles)
            } else {
                match &entity.regid {
                    Some(regid) if !is_absolute_uri(regid) => {
                        fail(Cause::InvalidRegId(regid.clone()))
                    }
                    _ => Ok(()),
                }
            };
            result.at(|| format!("entity at index {i}"))?;
        }
        Ok(())
    }
}

pub struct LinkedTagsRule;

impl ValidationRule for LinkedTagsRule {
    fn check(&self) -> Check {
        Check::LinkedTags
    }

    fn validate(&self, comid: &Comid) -> Result<(), Violation> {
        let Some(links) = &comid.linked_tags else {
            return Ok(());
        };
        if links.is_empty() {
            return fail(Cause::NoLinkedTags);
        }

        let own = comid.tag_identity.tag_id();
        for (i, link) in links.iter().enumerate() {
            let result = match link.target.as_ref().filter(|t| !t.is_empty()) {
                None => fail(Cause::EmptyLinkedTagId),
                Some(target) if Some(target) == own => fail(Cause::SelfLink),
                Some(_) => Ok(()),
            };
            result.at(|| format!("linked tag at index {i}"))?;
        }
        Ok(())
    }
}

pub struct TriplesRule;

impl ValidationRule for TriplesRule {
    fn check(&self) -> Check {
        Check::Triples
    }

    fn validate(&self, comid: &Comid) -> Result<(), Violation> {
        let triples = &comid.triples;
        if triples.is_empty() {
            return fail(Cause::EmptyTriples);
        }

        for (i, t) in triples.reference_values.iter().flatten().enumerate() {
            validate_value_triple(t).at(|| format!("reference value at index {i}"))?;
        }
        for (i, t) in triples.endorsed_values.iter().flatten().enumerate() {
            validate_value_triple(t).at(|| format!("endorsed value at index {i}"))?;
        }
        for (i, t) in triples.dev_identity_keys.iter().flatten().enumerate() {
            validate_key_triple(t).at(|| format!("identity key at index {i}"))?;
        }
        for (i, t) in triples.attester_verification_keys.iter().flatten().enumerate() {
            validate_key_triple(t).at(|| format!("attestation key at index {i}"))?;
        }
        Ok(())
    }
}

fn validate_value_triple(triple: &ValueTriple) -> Result<(), Violation> {
    validate_environment(&triple.environment).at(|| "environment".to_string())?;
    if triple.measurements.is_empty() {
        return fail(Cause::NoMeasurements);
    }
    for (i, m) in triple.measurements.iter().enumerate() {
        validate_measurement(m).at(|| format!("measurement at index {i}"))?;
    }
    Ok(())
}

fn validate_key_triple(triple: &KeyTriple) -> Result<(), Violation> {
    validate_environment(&triple.environment).at(|| "environment".to_string())?;
    if triple.keys.is_empty() {
        return fail(Cause::NoKeys);
    }
    for (i, k) in triple.keys.iter().enumerate() {
        if k.key.trim().is_empty() {
            return fail(Cause::EmptyKey).at(|| format!("key at index {i}"));
        }
    }
    Ok(())
}

fn validate_environment(env: &Environment) -> Result<(), Violation> {
    if env.is_empty() {
        return fail(Cause::EmptyEnvironment);
    }

    if let Some(class) = &env.class {
        if class.is_empty() {
            return fail(Cause::EmptyClass).at(|| "class".to_string());
        }
        match &class.id {
            Some(ClassId::PsaImplId(b)) if b.0.len() != 32 => {
                return fail(Cause::ImplIdLength(b.0.len())).at(|| "class".to_string());
            }
            Some(ClassId::Oid(oid)) if oid_to_ber(oid).is_none() => {
                return fail(Cause::InvalidOid(oid.clone())).at(|| "class".to_string());
            }
            Some(ClassId::Uuid(u)) if u.is_nil() => {
                return fail(Cause::NilUuid).at(|| "class".to_string());
            }
            _ => {}
        }
    }

    match &env.instance {
        Some(InstanceId::Ueid(b)) if b.0.is_empty() => {
            fail(Cause::EmptyUeid).at(|| "instance".to_string())
        }
        Some(InstanceId::Uuid(u)) if u.is_nil() => {
            fail(Cause::NilUuid).at(|| "instance".to_string())
        }
        _ => Ok(()),
    }
}

fn validate_measurement(m: &Measurement) -> Result<(), Violation> {
    if let Some(key) = &m.key {
        validate_measurement_key(key).at(|| "key".to_string())?;
    }
    validate_measurement_values(&m.value).at(|| "value".to_string())
}

fn validate_measurement_key(key: &MeasurementKey) -> Result<(), Violation> {
    match key {
        MeasurementKey::PsaRefValId(id) => match id.signer_id.0.len() {
            32 | 48 | 64 => Ok(()),
            n => fail(Cause::SignerIdLength(n)),
        },
        MeasurementKey::Oid(oid) if oid_to_ber(oid).is_none() => {
            fail(Cause::InvalidOid(oid.clone()))
        }
        MeasurementKey::Uuid(u) if u.is_nil() => fail(Cause::NilUuid),
        MeasurementKey::Text(s) if s.is_empty() => fail(Cause::EmptyMeasurementKey),
        _ => Ok(()),
    }
}

fn validate_measurement_values(mval: &MeasurementValues) -> Result<(), Violation> {
    if mval.is_empty() {
        return fail(Cause::EmptyMeasurementValue);
    }

    if let Some(version) = &mval.version {
        if version.value.is_empty() {
            return fail(Cause::EmptyVersion);
        }
    }

    if let Some(digests) = &mval.digests {
        if digests.is_empty() {
            return fail(Cause::EmptyDigests);
        }
        for (i, d) in digests.iter().enumerate() {
            let result = match hash_algorithm(&d.alg) {
                None => fail(Cause::UnknownHashAlgorithm(d.alg.clone())),
                Some((_, expected)) if expected != d.value.len() => fail(Cause::DigestLength {
                    alg: d.alg.clone(),
                    expected,
                    actual: d.value.len(),
                }),
                Some(_) => Ok(()),
            };
            result.at(|| format!("digest at index {i}"))?;
        }
    }

    match (&mval.raw_value, &mval.raw_value_mask) {
        (None, Some(_)) => fail(Cause::MaskWithoutRawValue),
        (Some(value), Some(mask)) if mask.0.len() > value.as_bytes().len() => {
            fail(Cause::MaskTooLong {
                mask: mask.0.len(),
                value: value.as_bytes().len(),
            })
        }
        _ => Ok(()),
    }
}

// The URL parser drops tabs and newlines and percent-encodes spaces in
// opaque paths; a reg-id written with whitespace is still rejected.
fn is_absolute_uri(s: &str) -> bool {
    !s.contains(char::is_whitespace) && Url::parse(s).is_ok()
}

/// Validator runs the rules in order and stops at the first failure
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(TagIdentityRule),
                Box::new(EntitiesRule),
                Box::new(LinkedTagsRule),
                Box::new(TriplesRule),
            ],
        }
    }

    /// Check an instance without taking ownership.
    pub fn check(&self, comid: &Comid) -> Result<(), ValidationError> {
        for rule in &self.rules {
            rule.validate(comid).map_err(|v| ValidationError {
                check: rule.check(),
                location: v.location,
                cause: v.cause,
            })?;
        }
        Ok(())
    }

    pub fn validate(&self, comid: Comid) -> Result<ValidComid, ValidationError> {
        self.check(&comid)?;
        Ok(ValidComid(comid))
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comid::{
        Bytes, Class, CryptoKey, Digest, Entity, LinkedTag, RawValue, Role, TagId,
        TagRelation, Triples,
    };
    use crate::decode::decode_template;

    fn psa() -> Comid {
        decode_template(include_bytes!("../tests/fixtures/psa-refval.json")).unwrap()
    }

    fn first_measurement(comid: &mut Comid) -> &mut Measurement {
        &mut comid.triples.reference_values.as_mut().unwrap()[0].measurements[0]
    }

    fn message(comid: &Comid) -> String {
        Validator::new().check(comid).unwrap_err().to_string()
    }

    #[test]
    fn test_psa_template_is_valid() {
        assert!(Validator::new().validate(psa()).is_ok());
    }

    #[test]
    fn test_empty_comid_fails_on_tag_identity() {
        let err = Validator::new().check(&Comid::default()).unwrap_err();
        assert_eq!(err.check, Check::TagIdentity);
        assert_eq!(err.cause, Cause::EmptyTagId);
        assert_eq!(err.to_string(), "tag-identity validation failed: empty tag-id");
    }

    #[test]
    fn test_empty_text_tag_id_rejected() {
        let mut comid = psa();
        comid.tag_identity.id = Some(TagId::Text(String::new()));
        assert_eq!(message(&comid), "tag-identity validation failed: empty tag-id");
    }

    #[test]
    fn test_checks_run_in_fixed_order() {
        // Bad entities and empty triples: entities is reported first.
        let mut comid = psa();
        comid.entities = Some(vec![Entity::default()]);
        comid.triples = Triples::default();
        assert_eq!(
            message(&comid),
            "entities validation failed: entity at index 0: empty entity-name"
        );
    }

    #[test]
    fn test_entity_roles_and_regid() {
        let mut comid = psa();
        comid.entities = Some(vec![Entity {
            name: "ACME".into(),
            regid: None,
            roles: vec![],
        }]);
        assert_eq!(message(&comid), "entities validation failed: entity at index 0: empty roles");

        comid.entities = Some(vec![Entity {
            name: "ACME".into(),
            regid: Some("acme.example".into()),
            roles: vec![Role::Creator],
        }]);
        assert!(message(&comid).contains("invalid reg-id \"acme.example\""));

        comid.entities.as_mut().unwrap()[0].regid = Some("https://acme .example".into());
        assert_eq!(
            message(&comid),
            "entities validation failed: entity at index 0: invalid reg-id \"https://acme .example\": not an absolute URI"
        );
    }

    #[test]
    fn test_linked_tag_cannot_point_at_self() {
        let mut comid = psa();
        comid.linked_tags = Some(vec![LinkedTag {
            target: comid.tag_identity.id.clone(),
            rel: TagRelation::Supplements,
        }]);
        assert_eq!(
            message(&comid),
            "linked-tags validation failed: linked tag at index 0: tag cannot link to itself"
        );
    }

    #[test]
    fn test_empty_triples() {
        let mut comid = psa();
        comid.triples = Triples {
            reference_values: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(message(&comid), "triples validation failed: triples struct must not be empty");
    }

    #[test]
    fn test_environment_and_class() {
        let mut comid = psa();
        comid.triples.reference_values.as_mut().unwrap()[0].environment = Environment::default();
        assert_eq!(
            message(&comid),
            "triples validation failed: reference value at index 0: environment: environment must not be empty"
        );

        let mut comid = psa();
        comid.triples.reference_values.as_mut().unwrap()[0].environment.class = Some(Class {
            id: Some(ClassId::PsaImplId(Bytes(vec![0; 31]))),
            ..Default::default()
        });
        assert_eq!(
            message(&comid),
            "triples validation failed: reference value at index 0: environment: class: impl-id must be 32 bytes, got 31"
        );
    }

    #[test]
    fn test_digest_checks() {
        let mut comid = psa();
        first_measurement(&mut comid).value.digests = Some(vec![Digest {
            alg: "sha-256".into(),
            value: vec![0; 20],
        }]);
        assert_eq!(
            message(&comid),
            "triples validation failed: reference value at index 0: measurement at index 0: value: digest at index 0: sha-256 digest must be 32 bytes, got 20"
        );

        first_measurement(&mut comid).value.digests = Some(vec![Digest {
            alg: "md5".into(),
            value: vec![0; 16],
        }]);
        assert!(message(&comid).ends_with("unknown hash algorithm \"md5\""));
    }

    #[test]
    fn test_measurement_needs_a_value() {
        let mut comid = psa();
        first_measurement(&mut comid).value = MeasurementValues::default();
        assert!(message(&comid).ends_with("measurement at index 0: value: no measurement value set"));
    }

    #[test]
    fn test_signer_id_length() {
        let mut comid = psa();
        if let Some(MeasurementKey::PsaRefValId(id)) = &mut first_measurement(&mut comid).key {
            id.signer_id = Bytes(vec![1; 20]);
        }
        assert!(message(&comid).ends_with("key: signer-id must be 32, 48 or 64 bytes, got 20"));
    }

    #[test]
    fn test_raw_value_mask() {
        let mut comid = psa();
        let mval = &mut first_measurement(&mut comid).value;
        mval.raw_value_mask = Some(Bytes(vec![0xff; 4]));
        assert!(message(&comid).ends_with("raw-value-mask without raw-value"));

        let mval = &mut first_measurement(&mut comid).value;
        mval.raw_value = Some(RawValue::Bytes(Bytes(vec![1, 2])));
        assert!(message(&comid).ends_with("raw-value-mask is 4 bytes, longer than raw-value (2 bytes)"));
    }

    #[test]
    fn test_key_triples() {
        let mut comid = psa();
        comid.triples.attester_verification_keys = Some(vec![KeyTriple {
            environment: comid.triples.reference_values.as_ref().unwrap()[0].environment.clone(),
            keys: vec![CryptoKey { key: " ".into() }],
        }]);
        assert_eq!(
            message(&comid),
            "triples validation failed: attestation key at index 0: key at index 0: empty key"
        );
    }

    #[test]
    fn test_validation_is_idempotent() {
        let comid = Comid::default();
        let v = Validator::new();
        assert_eq!(v.check(&comid), v.check(&comid));

        let ok = psa();
        assert_eq!(v.check(&ok), Ok(()));
        assert_eq!(v.check(&ok), Ok(()));
    }

    #[test]
    fn test_absolute_uri() {
        assert!(is_absolute_uri("https://acme.example"));
        assert!(is_absolute_uri("urn:uuid:1234"));
        assert!(!is_absolute_uri("acme.example"));
        assert!(!is_absolute_uri("1http://x"));
        assert!(!is_absolute_uri("https:"));
        assert!(!is_absolute_uri("https://acme example"));
        assert!(!is_absolute_uri("a:b c"));
        assert!(!is_absolute_uri("http:\n"));
        assert!(!is_absolute_uri(""));
    }
}
