//! CoMID Model - Typed Form of a JSON Template
//!
//! Every member is optional at this layer. A template that is valid JSON
//! but carries no CoMID content decodes into `Comid::default()`; rejecting
//! it is the validator's job.

use base64::Engine;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Comid {
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tag_identity: TagIdentity,
    #[serde(default)]
    pub entities: Option<Vec<Entity>>,
    #[serde(default)]
    pub linked_tags: Option<Vec<LinkedTag>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub triples: Triples,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TagIdentity {
    #[serde(default)]
    pub id: Option<TagId>,
    #[serde(default)]
    pub version: Option<u64>,
}

impl TagIdentity {
    /// The tag-id, if one is present and non-empty.
    pub fn tag_id(&self) -> Option<&TagId> {
        self.id.as_ref().filter(|id| !id.is_empty())
    }
}

/// A tag identifier: free text, or a UUID when the text parses as one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagId {
    Text(String),
    Uuid(Uuid),
}

impl TagId {
    pub fn is_empty(&self) -> bool {
        match self {
            TagId::Text(s) => s.is_empty(),
            TagId::Uuid(u) => u.is_nil(),
        }
    }
}

impl From<&str> for TagId {
    fn from(value: &str) -> Self {
        match Uuid::parse_str(value) {
            Ok(uuid) => TagId::Uuid(uuid),
            Err(_) => TagId::Text(value.to_string()),
        }
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagId::Text(s) => f.write_str(s),
            TagId::Uuid(u) => write!(f, "{}", u.hyphenated()),
        }
    }
}

impl<'de> Deserialize<'de> for TagId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(TagId::from(s.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Entity {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub regid: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    TagCreator,
    Creator,
    Maintainer,
}

impl Role {
    pub fn code(self) -> u64 {
        match self {
            Role::TagCreator => 0,
            Role::Creator => 1,
            Role::Maintainer => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkedTag {
    #[serde(default)]
    pub target: Option<TagId>,
    pub rel: TagRelation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagRelation {
    Supplements,
    Replaces,
}

impl TagRelation {
    pub fn code(self) -> u64 {
        match self {
            TagRelation::Supplements => 0,
            TagRelation::Replaces => 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Triples {
    #[serde(default)]
    pub reference_values: Option<Vec<ValueTriple>>,
    #[serde(default)]
    pub endorsed_values: Option<Vec<ValueTriple>>,
    #[serde(default)]
    pub dev_identity_keys: Option<Vec<KeyTriple>>,
    #[serde(default)]
    pub attester_verification_keys: Option<Vec<KeyTriple>>,
}

impl Triples {
    pub fn is_empty(&self) -> bool {
        fn empty<T>(list: &Option<Vec<T>>) -> bool {
            list.as_ref().map_or(true, Vec::is_empty)
        }
        empty(&self.reference_values)
            && empty(&self.endorsed_values)
            && empty(&self.dev_identity_keys)
            && empty(&self.attester_verification_keys)
    }
}

/// Reference or endorsed value: an environment and what was measured in it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ValueTriple {
    #[serde(default, deserialize_with = "null_as_default")]
    pub environment: Environment,
    #[serde(default, deserialize_with = "null_as_default")]
    pub measurements: Vec<Measurement>,
}

/// Identity or attestation keys bound to an environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct KeyTriple {
    #[serde(default, deserialize_with = "null_as_default")]
    pub environment: Environment,
    #[serde(default, rename = "verification-keys", deserialize_with = "null_as_default")]
    pub keys: Vec<CryptoKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CryptoKey {
    #[serde(default, deserialize_with = "null_as_default")]
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub class: Option<Class>,
    #[serde(default)]
    pub instance: Option<InstanceId>,
    #[serde(default)]
    pub group: Option<GroupId>,
}

impl Environment {
    pub fn is_empty(&self) -> bool {
        self.class.is_none() && self.instance.is_none() && self.group.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Class {
    #[serde(default)]
    pub id: Option<ClassId>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub layer: Option<u64>,
    #[serde(default)]
    pub index: Option<u64>,
}

impl Class {
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.vendor.is_none()
            && self.model.is_none()
            && self.layer.is_none()
            && self.index.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ClassId {
    #[serde(rename = "psa.impl-id")]
    PsaImplId(Bytes),
    #[serde(rename = "uuid")]
    Uuid(Uuid),
    #[serde(rename = "oid")]
    Oid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum InstanceId {
    #[serde(rename = "ueid")]
    Ueid(Bytes),
    #[serde(rename = "uuid")]
    Uuid(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum GroupId {
    #[serde(rename = "uuid")]
    Uuid(Uuid),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Measurement {
    #[serde(default)]
    pub key: Option<MeasurementKey>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: MeasurementValues,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum MeasurementKey {
    #[serde(rename = "psa.refval-id")]
    PsaRefValId(PsaRefValId),
    #[serde(rename = "uuid")]
    Uuid(Uuid),
    #[serde(rename = "oid")]
    Oid(String),
    #[serde(rename = "uint")]
    Uint(u64),
    #[serde(rename = "string")]
    Text(String),
}

/// PSA software component identifier (label, version, signer).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PsaRefValId {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub signer_id: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MeasurementValues {
    #[serde(default)]
    pub version: Option<Version>,
    #[serde(default)]
    pub svn: Option<Svn>,
    #[serde(default)]
    pub digests: Option<Vec<Digest>>,
    #[serde(default)]
    pub raw_value: Option<RawValue>,
    #[serde(default)]
    pub raw_value_mask: Option<Bytes>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub ueid: Option<Bytes>,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
}

impl MeasurementValues {
    pub fn is_empty(&self) -> bool {
        self.version.is_none()
            && self.svn.is_none()
            && self.digests.is_none()
            && self.raw_value.is_none()
            && self.raw_value_mask.is_none()
            && self.serial_number.is_none()
            && self.ueid.is_none()
            && self.uuid.is_none()
            && self.name.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Version {
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: String,
    #[serde(default)]
    pub scheme: Option<VersionScheme>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum VersionScheme {
    #[serde(rename = "multipartnumeric")]
    MultipartNumeric,
    #[serde(rename = "multipartnumeric+suffix")]
    MultipartNumericSuffix,
    #[serde(rename = "alphanumeric")]
    Alphanumeric,
    #[serde(rename = "decimal")]
    Decimal,
    #[serde(rename = "semver")]
    Semver,
}

impl VersionScheme {
    pub fn code(self) -> u64 {
        match self {
            VersionScheme::MultipartNumeric => 1,
            VersionScheme::MultipartNumericSuffix => 2,
            VersionScheme::Alphanumeric => 3,
            VersionScheme::Decimal => 4,
            VersionScheme::Semver => 16384,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Svn {
    #[serde(rename = "exact-value")]
    Exact(u64),
    #[serde(rename = "min-value")]
    Min(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum RawValue {
    #[serde(rename = "bytes")]
    Bytes(Bytes),
}

impl RawValue {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RawValue::Bytes(b) => &b.0,
        }
    }
}

/// A digest written as `"<algorithm>;<base64 value>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub alg: String,
    pub value: Vec<u8>,
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let (alg, encoded) = s
            .split_once(';')
            .ok_or_else(|| de::Error::custom(format!("invalid digest {s:?}: expecting \"<alg>;<base64>\"")))?;
        let value = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| de::Error::custom(format!("invalid digest value: {e}")))?;
        Ok(Digest {
            alg: alg.to_string(),
            value,
        })
    }
}

/// Byte string carried as standard base64 in JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bytes(pub Vec<u8>);

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map(Bytes)
            .map_err(|e| de::Error::custom(format!("illegal base64 data: {e}")))
    }
}

/// `null` reads as the member's zero value, like an absent member.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Named-information hash algorithm: IANA id and digest length in bytes.
pub fn hash_algorithm(name: &str) -> Option<(u64, usize)> {
    let entry = match name {
        "sha-256" => (1, 32),
        "sha-256-128" => (2, 16),
        "sha-256-120" => (3, 15),
        "sha-256-96" => (4, 12),
        "sha-256-64" => (5, 8),
        "sha-256-32" => (6, 4),
        "sha-384" => (7, 48),
        "sha-512" => (8, 64),
        "sha3-224" => (9, 28),
        "sha3-256" => (10, 32),
        "sha3-384" => (11, 48),
        "sha3-512" => (12, 64),
        _ => return None,
    };
    Some(entry)
}

/// BER content octets of a dotted-decimal OID, or `None` if malformed.
pub fn oid_to_ber(oid: &str) -> Option<Vec<u8>> {
    let arcs = oid
        .split('.')
        .map(|arc| arc.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
        return None;
    }

    let mut out = Vec::new();
    let first = arcs[0].checked_mul(40)?.checked_add(arcs[1])?;
    push_base128(&mut out, first);
    for &arc in &arcs[2..] {
        push_base128(&mut out, arc);
    }
    Some(out)
}

fn push_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut groups = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        groups.push((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
    out.extend(groups.iter().rev());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_zero_value() {
        let comid: Comid = serde_json::from_str("{}").unwrap();
        assert_eq!(comid, Comid::default());
        assert!(comid.tag_identity.tag_id().is_none());
        assert!(comid.triples.is_empty());
    }

    #[test]
    fn test_null_members_read_as_absent() {
        let comid: Comid =
            serde_json::from_str(r#"{"tag-identity": null, "triples": null, "lang": null}"#).unwrap();
        assert_eq!(comid, Comid::default());

        let entity: Entity = serde_json::from_str(r#"{"name": null, "roles": null}"#).unwrap();
        assert_eq!(entity, Entity::default());
    }

    #[test]
    fn test_tag_id_uuid_is_lowercased() {
        let id = TagId::from("43BBE37F-2E61-4B33-AED3-53CFF1428B16");
        assert!(matches!(id, TagId::Uuid(_)));
        assert_eq!(id.to_string(), "43bbe37f-2e61-4b33-aed3-53cff1428b16");
    }

    #[test]
    fn test_tag_id_text_kept_verbatim() {
        let id = TagId::from("my-ns:acme-roadrunner");
        assert_eq!(id, TagId::Text("my-ns:acme-roadrunner".to_string()));
        assert!(TagId::from("").is_empty());
    }

    #[test]
    fn test_digest_parses_alg_and_value() {
        let d: Digest = serde_json::from_str(r#""sha-256;AAECAw==""#).unwrap();
        assert_eq!(d.alg, "sha-256");
        assert_eq!(d.value, vec![0, 1, 2, 3]);

        assert!(serde_json::from_str::<Digest>(r#""AAECAw==""#).is_err());
    }

    #[test]
    fn test_oid_ber_encoding() {
        // 1.2.840.113549 -> 2a 86 48 86 f7 0d
        assert_eq!(
            oid_to_ber("1.2.840.113549").unwrap(),
            vec![0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d]
        );
        assert_eq!(oid_to_ber("2.999").unwrap(), vec![0x88, 0x37]);
        assert!(oid_to_ber("3.1").is_none());
        assert!(oid_to_ber("1.40").is_none());
        assert!(oid_to_ber("1").is_none());
        assert!(oid_to_ber("1..2").is_none());
    }

    #[test]
    fn test_hash_algorithm_table() {
        assert_eq!(hash_algorithm("sha-256"), Some((1, 32)));
        assert_eq!(hash_algorithm("sha-384"), Some((7, 48)));
        assert_eq!(hash_algorithm("md5"), None);
    }
}
