//! Canonical Encoding - CoMID to Deterministic CBOR
//!
//! The typed model is lowered to a CBOR value tree with integer keys, the
//! tree is put into RFC 8949 core deterministic order, then serialized.
//! Same logical value, same bytes.

use ciborium::value::Value;
use thiserror::Error;

use crate::comid::{
    hash_algorithm, oid_to_ber, Class, ClassId, Comid, Entity, Environment, GroupId,
    InstanceId, KeyTriple, LinkedTag, Measurement, MeasurementKey, MeasurementValues,
    RawValue, Svn, TagId, TagIdentity, Triples, ValueTriple,
};
use crate::validation::ValidComid;

pub const TAG_URI: u64 = 32;
pub const TAG_UUID: u64 = 37;
pub const TAG_OID: u64 = 111;
pub const TAG_UEID: u64 = 550;
pub const TAG_SVN: u64 = 552;
pub const TAG_MIN_SVN: u64 = 553;
pub const TAG_PKIX_BASE64_KEY: u64 = 554;
pub const TAG_BYTES: u64 = 560;
pub const TAG_PSA_IMPL_ID: u64 = 600;
pub const TAG_PSA_REFVAL_ID: u64 = 601;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("missing tag-identity")]
    MissingTagIdentity,
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("unknown hash algorithm {0:?}")]
    UnknownHashAlgorithm(String),
    #[error("invalid OID {0:?}")]
    InvalidOid(String),
    #[error("CBOR serialization failed: {0}")]
    Serialization(String),
}

/// Encode a validated CoMID into canonical CBOR.
pub fn encode_canonical(comid: &ValidComid) -> Result<Vec<u8>, EncodeError> {
    encode_comid(comid)
}

// Instances missing required members are refused rather than encoded
// partially.
fn encode_comid(comid: &Comid) -> Result<Vec<u8>, EncodeError> {
    let value = canonical_value(comid_value(comid)?)?;
    to_bytes(&value)
}

fn to_bytes(value: &Value) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| EncodeError::Serialization(format!("{e:?}")))?;
    Ok(buf)
}

/// Put every map in the tree into core deterministic order: entries sorted
/// by the bytewise order of their encoded keys.
pub fn canonical_value(value: Value) -> Result<Value, EncodeError> {
    Ok(match value {
        Value::Map(entries) => {
            let mut keyed = entries
                .into_iter()
                .map(|(k, v)| {
                    let k = canonical_value(k)?;
                    Ok::<_, EncodeError>((to_bytes(&k)?, k, canonical_value(v)?))
                })
                .collect::<Result<Vec<_>, EncodeError>>()?;
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Map(keyed.into_iter().map(|(_, k, v)| (k, v)).collect())
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(canonical_value)
                .collect::<Result<_, _>>()?,
        ),
        Value::Tag(tag, inner) => Value::Tag(tag, Box::new(canonical_value(*inner)?)),
        other => other,
    })
}

/// Map with small unsigned integer keys; absent members are skipped.
struct MapBuilder(Vec<(Value, Value)>);

impl MapBuilder {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn insert(&mut self, key: u64, value: Value) -> &mut Self {
        self.0.push((uint(key), value));
        self
    }

    fn insert_opt(&mut self, key: u64, value: Option<Value>) -> &mut Self {
        if let Some(value) = value {
            self.insert(key, value);
        }
        self
    }

    fn build(&mut self) -> Value {
        Value::Map(std::mem::take(&mut self.0))
    }
}

fn uint(v: u64) -> Value {
    Value::Integer(v.into())
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn bytes(b: &[u8]) -> Value {
    Value::Bytes(b.to_vec())
}

fn tagged(tag: u64, inner: Value) -> Value {
    Value::Tag(tag, Box::new(inner))
}

fn uuid_value(u: &uuid::Uuid) -> Value {
    tagged(TAG_UUID, bytes(u.as_bytes()))
}

fn oid_value(oid: &str) -> Result<Value, EncodeError> {
    let ber = oid_to_ber(oid).ok_or_else(|| EncodeError::InvalidOid(oid.to_string()))?;
    Ok(tagged(TAG_OID, Value::Bytes(ber)))
}

fn list<T>(
    items: &[T],
    f: impl Fn(&T) -> Result<Value, EncodeError>,
) -> Result<Value, EncodeError> {
    Ok(Value::Array(items.iter().map(f).collect::<Result<_, _>>()?))
}

fn comid_value(comid: &Comid) -> Result<Value, EncodeError> {
    let mut map = MapBuilder::new();
    map.insert_opt(0, comid.lang.as_deref().map(text))
        .insert(1, tag_identity_value(&comid.tag_identity)?);
    if let Some(entities) = &comid.entities {
        map.insert(2, list(entities, entity_value)?);
    }
    if let Some(links) = &comid.linked_tags {
        map.insert(3, list(links, linked_tag_value)?);
    }
    map.insert(4, triples_value(&comid.triples)?);
    Ok(map.build())
}

fn tag_id_value(id: &TagId) -> Value {
    match id {
        TagId::Text(s) => text(s),
        // Untagged 16-byte string, as the tag-id grammar requires.
        TagId::Uuid(u) => bytes(u.as_bytes()),
    }
}

fn tag_identity_value(identity: &TagIdentity) -> Result<Value, EncodeError> {
    let id = identity.tag_id().ok_or(EncodeError::MissingTagIdentity)?;
    // tag-version defaults to 0 and is omitted at its default.
    let version = identity.version.filter(|v| *v != 0).map(uint);
    Ok(MapBuilder::new()
        .insert(0, tag_id_value(id))
        .insert_opt(1, version)
        .build())
}

fn entity_value(entity: &Entity) -> Result<Value, EncodeError> {
    if entity.name.is_empty() {
        return Err(EncodeError::MissingField("entity-name"));
    }
    let roles = Value::Array(entity.roles.iter().map(|r| uint(r.code())).collect());
    Ok(MapBuilder::new()
        .insert(0, text(&entity.name))
        .insert_opt(1, entity.regid.as_deref().map(|r| tagged(TAG_URI, text(r))))
        .insert(2, roles)
        .build())
}

fn linked_tag_value(link: &LinkedTag) -> Result<Value, EncodeError> {
    let target = link
        .target
        .as_ref()
        .filter(|t| !t.is_empty())
        .ok_or(EncodeError::MissingField("linked-tag-id"))?;
    Ok(MapBuilder::new()
        .insert(0, tag_id_value(target))
        .insert(1, uint(link.rel.code()))
        .build())
}

fn triples_value(triples: &Triples) -> Result<Value, EncodeError> {
    if triples.is_empty() {
        return Err(EncodeError::MissingField("triples"));
    }
    let mut map = MapBuilder::new();
    if let Some(t) = &triples.reference_values {
        map.insert(0, list(t, value_triple_value)?);
    }
    if let Some(t) = &triples.endorsed_values {
        map.insert(1, list(t, value_triple_value)?);
    }
    if let Some(t) = &triples.dev_identity_keys {
        map.insert(2, list(t, key_triple_value)?);
    }
    if let Some(t) = &triples.attester_verification_keys {
        map.insert(3, list(t, key_triple_value)?);
    }
    Ok(map.build())
}

fn value_triple_value(triple: &ValueTriple) -> Result<Value, EncodeError> {
    Ok(Value::Array(vec![
        environment_value(&triple.environment)?,
        list(&triple.measurements, measurement_value)?,
    ]))
}

fn key_triple_value(triple: &KeyTriple) -> Result<Value, EncodeError> {
    let keys = triple
        .keys
        .iter()
        .map(|k| tagged(TAG_PKIX_BASE64_KEY, text(k.key.trim())))
        .collect();
    Ok(Value::Array(vec![
        environment_value(&triple.environment)?,
        Value::Array(keys),
    ]))
}

fn environment_value(env: &Environment) -> Result<Value, EncodeError> {
    if env.is_empty() {
        return Err(EncodeError::MissingField("environment"));
    }
    let class = env.class.as_ref().map(class_value).transpose()?;
    let instance = env.instance.as_ref().map(|i| match i {
        InstanceId::Ueid(b) => tagged(TAG_UEID, bytes(&b.0)),
        InstanceId::Uuid(u) => uuid_value(u),
    });
    let group = env.group.as_ref().map(|g| match g {
        GroupId::Uuid(u) => uuid_value(u),
    });
    Ok(MapBuilder::new()
        .insert_opt(0, class)
        .insert_opt(1, instance)
        .insert_opt(2, group)
        .build())
}

fn class_value(class: &Class) -> Result<Value, EncodeError> {
    let id = match &class.id {
        Some(ClassId::PsaImplId(b)) => Some(tagged(TAG_PSA_IMPL_ID, bytes(&b.0))),
        Some(ClassId::Uuid(u)) => Some(uuid_value(u)),
        Some(ClassId::Oid(oid)) => Some(oid_value(oid)?),
        None => None,
    };
    Ok(MapBuilder::new()
        .insert_opt(0, id)
        .insert_opt(1, class.vendor.as_deref().map(text))
        .insert_opt(2, class.model.as_deref().map(text))
        .insert_opt(3, class.layer.map(uint))
        .insert_opt(4, class.index.map(uint))
        .build())
}

fn measurement_value(m: &Measurement) -> Result<Value, EncodeError> {
    let key = m.key.as_ref().map(measurement_key_value).transpose()?;
    Ok(MapBuilder::new()
        .insert_opt(0, key)
        .insert(1, measurement_values_value(&m.value)?)
        .build())
}

fn measurement_key_value(key: &MeasurementKey) -> Result<Value, EncodeError> {
    Ok(match key {
        MeasurementKey::PsaRefValId(id) => {
            let inner = MapBuilder::new()
                .insert_opt(1, id.label.as_deref().map(text))
                .insert_opt(4, id.version.as_deref().map(text))
                .insert(5, bytes(&id.signer_id.0))
                .build();
            tagged(TAG_PSA_REFVAL_ID, inner)
        }
        MeasurementKey::Uuid(u) => uuid_value(u),
        MeasurementKey::Oid(oid) => oid_value(oid)?,
        MeasurementKey::Uint(n) => uint(*n),
        MeasurementKey::Text(s) => text(s),
    })
}

fn measurement_values_value(mval: &MeasurementValues) -> Result<Value, EncodeError> {
    if mval.is_empty() {
        return Err(EncodeError::MissingField("measurement value"));
    }

    let version = mval.version.as_ref().map(|v| {
        MapBuilder::new()
            .insert(0, text(&v.value))
            .insert_opt(1, v.scheme.map(|s| uint(s.code())))
            .build()
    });
    let svn = mval.svn.map(|svn| match svn {
        Svn::Exact(n) => tagged(TAG_SVN, uint(n)),
        Svn::Min(n) => tagged(TAG_MIN_SVN, uint(n)),
    });
    let digests = mval
        .digests
        .as_ref()
        .map(|digests| {
            list(digests, |d| {
                let (alg, _) = hash_algorithm(&d.alg)
                    .ok_or_else(|| EncodeError::UnknownHashAlgorithm(d.alg.clone()))?;
                Ok(Value::Array(vec![uint(alg), bytes(&d.value)]))
            })
        })
        .transpose()?;
    let raw_value = mval.raw_value.as_ref().map(|r| match r {
        RawValue::Bytes(b) => tagged(TAG_BYTES, bytes(&b.0)),
    });

    Ok(MapBuilder::new()
        .insert_opt(0, version)
        .insert_opt(1, svn)
        .insert_opt(2, digests)
        .insert_opt(4, raw_value)
        .insert_opt(5, mval.raw_value_mask.as_ref().map(|m| bytes(&m.0)))
        .insert_opt(8, mval.serial_number.as_deref().map(text))
        .insert_opt(9, mval.ueid.as_ref().map(|u| bytes(&u.0)))
        .insert_opt(10, mval.uuid.as_ref().map(|u| bytes(u.as_bytes())))
        .insert_opt(11, mval.name.as_deref().map(text))
        .build())
}
