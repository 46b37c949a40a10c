//! Blob payload codec: gzip framing and JSON conversion of records.
//!
//! Records are written as typed attribute JSON (`{"name": {"S": "..."}}`) so
//! every value kind survives a round trip. Reading also accepts plain JSON
//! documents, mapping them onto the closest attribute kinds.

use std::{
    collections::HashSet,
    io::{Read, Write},
};

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::record::{AttributeValue, Record};

/// Two-byte gzip member header, used as the format-detection signal.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound on decompressed payloads; guards against compression bombs.
pub const MAX_DECOMPRESSED_SIZE: usize = 100 * 1024 * 1024;

const TYPE_DESCRIPTORS: [&str; 10] = ["S", "N", "B", "BOOL", "NULL", "SS", "NS", "BS", "L", "M"];

/// Errors raised while encoding or decoding blob payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Gzip stream could not be written or read.
    #[error("gzip error: {0}")]
    Gzip(#[from] std::io::Error),
    /// Payload was not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Payload was JSON but did not describe a record.
    #[error("malformed payload: {0}")]
    Malformed(String),
    /// Decompressed payload exceeded [`MAX_DECOMPRESSED_SIZE`].
    #[error("decompressed payload exceeds {max} bytes")]
    TooLarge {
        /// Configured limit.
        max: usize,
    },
}

/// Returns `true` when `data` starts with the gzip magic number.
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= GZIP_MAGIC.len() && data[..GZIP_MAGIC.len()] == GZIP_MAGIC
}

/// Compress `data` into a single gzip member.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress a gzip stream, failing once the output passes
/// [`MAX_DECOMPRESSED_SIZE`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = decoder.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        if decompressed.len().saturating_add(bytes_read) > MAX_DECOMPRESSED_SIZE {
            return Err(CodecError::TooLarge {
                max: MAX_DECOMPRESSED_SIZE,
            });
        }
        decompressed.extend_from_slice(&buffer[..bytes_read]);
    }

    Ok(decompressed)
}

/// Serialize a record as a typed attribute JSON document.
pub fn to_json(record: &Record) -> Result<Vec<u8>, CodecError> {
    let document: Map<String, Value> = record
        .iter()
        .map(|(name, value)| (name.clone(), attribute_to_json(value)))
        .collect();
    Ok(serde_json::to_vec(&Value::Object(document))?)
}

/// Parse a JSON document (typed or plain) back into a record.
pub fn from_json(bytes: &[u8]) -> Result<Record, CodecError> {
    let document: Value = serde_json::from_slice(bytes)?;
    let Value::Object(fields) = document else {
        return Err(CodecError::Malformed(
            "top-level JSON value is not an object".to_string(),
        ));
    };
    fields
        .into_iter()
        .map(|(name, value)| Ok((name, json_to_attribute(value)?)))
        .collect()
}

/// JSON-encode and gzip a record for blob storage.
pub fn encode_payload(record: &Record) -> Result<Vec<u8>, CodecError> {
    compress(&to_json(record)?)
}

/// Decode a fetched blob, decompressing first when it carries the gzip magic.
pub fn decode_payload(bytes: &[u8]) -> Result<Record, CodecError> {
    if is_gzip(bytes) {
        from_json(&decompress(bytes)?)
    } else {
        from_json(bytes)
    }
}

fn attribute_to_json(value: &AttributeValue) -> Value {
    let (descriptor, inner) = match value {
        AttributeValue::S(s) => ("S", Value::String(s.clone())),
        AttributeValue::N(n) => ("N", Value::String(n.clone())),
        AttributeValue::B(bytes) => ("B", Value::String(STANDARD.encode(bytes))),
        AttributeValue::Bool(b) => ("BOOL", Value::Bool(*b)),
        AttributeValue::Null => ("NULL", Value::Bool(true)),
        AttributeValue::L(items) => ("L", Value::Array(items.iter().map(attribute_to_json).collect())),
        AttributeValue::M(map) => (
            "M",
            Value::Object(
                map.iter()
                    .map(|(name, nested)| (name.clone(), attribute_to_json(nested)))
                    .collect(),
            ),
        ),
        AttributeValue::Ss(items) => (
            "SS",
            Value::Array(items.iter().cloned().map(Value::String).collect()),
        ),
        AttributeValue::Ns(items) => (
            "NS",
            Value::Array(items.iter().cloned().map(Value::String).collect()),
        ),
        AttributeValue::Bs(items) => (
            "BS",
            Value::Array(
                items
                    .iter()
                    .map(|bytes| Value::String(STANDARD.encode(bytes)))
                    .collect(),
            ),
        ),
    };
    let mut wrapper = Map::new();
    wrapper.insert(descriptor.to_string(), inner);
    Value::Object(wrapper)
}

fn json_to_attribute(node: Value) -> Result<AttributeValue, CodecError> {
    match node {
        Value::Object(fields)
            if fields.len() == 1
                && fields
                    .keys()
                    .all(|key| TYPE_DESCRIPTORS.contains(&key.as_str())) =>
        {
            match fields.into_iter().next() {
                Some((descriptor, inner)) => convert_typed(&descriptor, inner),
                None => Err(CodecError::Malformed("empty type descriptor".to_string())),
            }
        }
        other => convert_plain(other),
    }
}

fn convert_typed(descriptor: &str, inner: Value) -> Result<AttributeValue, CodecError> {
    match (descriptor, inner) {
        ("S", Value::String(s)) => Ok(AttributeValue::S(s)),
        ("N", Value::String(n)) => Ok(AttributeValue::N(n)),
        ("N", Value::Number(n)) => Ok(AttributeValue::N(n.to_string())),
        ("B", Value::String(encoded)) => Ok(AttributeValue::B(decode_base64(&encoded)?)),
        ("BOOL", Value::Bool(b)) => Ok(AttributeValue::Bool(b)),
        ("NULL", _) => Ok(AttributeValue::Null),
        ("SS", Value::Array(items)) => Ok(AttributeValue::Ss(
            items
                .into_iter()
                .map(|item| expect_string("SS", item))
                .collect::<Result<_, _>>()?,
        )),
        ("NS", Value::Array(items)) => Ok(AttributeValue::Ns(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Number(n) => Ok(n.to_string()),
                    other => expect_string("NS", other),
                })
                .collect::<Result<_, _>>()?,
        )),
        ("BS", Value::Array(items)) => Ok(AttributeValue::Bs(
            items
                .into_iter()
                .map(|item| decode_base64(&expect_string("BS", item)?))
                .collect::<Result<_, _>>()?,
        )),
        ("L", Value::Array(items)) => Ok(AttributeValue::L(
            items
                .into_iter()
                .map(json_to_attribute)
                .collect::<Result<_, _>>()?,
        )),
        ("M", Value::Object(fields)) => Ok(AttributeValue::M(
            fields
                .into_iter()
                .map(|(name, value)| Ok((name, json_to_attribute(value)?)))
                .collect::<Result<_, CodecError>>()?,
        )),
        (descriptor, other) => Err(CodecError::Malformed(format!(
            "descriptor `{descriptor}` cannot hold {other}"
        ))),
    }
}

fn convert_plain(node: Value) -> Result<AttributeValue, CodecError> {
    Ok(match node {
        Value::Null => AttributeValue::Null,
        Value::Bool(b) => AttributeValue::Bool(b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s),
        Value::Array(items) if items.is_empty() => AttributeValue::Null,
        Value::Array(items) if items.iter().all(Value::is_string) => {
            let mut seen = HashSet::new();
            AttributeValue::Ss(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .filter(|s| seen.insert(s.clone()))
                    .collect(),
            )
        }
        Value::Array(items) => AttributeValue::L(
            items
                .into_iter()
                .map(json_to_attribute)
                .collect::<Result<_, _>>()?,
        ),
        // Complex value types are stored by the typed layer as JSON text.
        object @ Value::Object(_) => AttributeValue::S(object.to_string()),
    })
}

fn expect_string(descriptor: &str, value: Value) -> Result<String, CodecError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(CodecError::Malformed(format!(
            "`{descriptor}` element must be a string, got {other}"
        ))),
    }
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(encoded)
        .map_err(|err| CodecError::Malformed(format!("invalid base64 payload: {err}")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn every_kind() -> Record {
        let mut nested = BTreeMap::new();
        nested.insert("street".to_string(), AttributeValue::s("Main"));
        nested.insert("number".to_string(), AttributeValue::n(12));

        let mut record = Record::new();
        record.insert("pk".into(), AttributeValue::s("USER#123"));
        record.insert("age".into(), AttributeValue::n(41));
        record.insert("ratio".into(), AttributeValue::n("0.25"));
        record.insert("avatar".into(), AttributeValue::B(vec![0, 1, 2, 255]));
        record.insert("active".into(), AttributeValue::Bool(true));
        record.insert("deleted_at".into(), AttributeValue::Null);
        record.insert(
            "history".into(),
            AttributeValue::L(vec![
                AttributeValue::s("a"),
                AttributeValue::n(2),
                AttributeValue::Null,
            ]),
        );
        record.insert("address".into(), AttributeValue::M(nested));
        record.insert(
            "tags".into(),
            AttributeValue::Ss(vec!["x".into(), "y".into()]),
        );
        record.insert(
            "scores".into(),
            AttributeValue::Ns(vec!["1".into(), "2.5".into()]),
        );
        record.insert(
            "chunks".into(),
            AttributeValue::Bs(vec![vec![1, 2], vec![3]]),
        );
        record
    }

    #[test]
    fn typed_json_round_trips_every_kind() {
        let record = every_kind();
        let json = to_json(&record).expect("encode");
        assert_eq!(from_json(&json).expect("decode"), record);
    }

    #[test]
    fn gzip_payload_round_trips_and_is_detected() {
        let record = every_kind();
        let payload = encode_payload(&record).expect("encode payload");
        assert!(is_gzip(&payload));
        assert_eq!(&payload[..2], &[0x1f, 0x8b]);
        assert_eq!(decode_payload(&payload).expect("decode payload"), record);
    }

    #[test]
    fn uncompressed_payload_is_accepted() {
        let payload = br#"{"pk": {"S": "USER#1"}, "name": {"S": "Ada"}}"#;
        assert!(!is_gzip(payload));
        let record = decode_payload(payload).expect("decode");
        assert_eq!(record["name"].as_s(), Some("Ada"));
    }

    #[test]
    fn plain_json_maps_to_closest_kinds() {
        let payload = br#"{
            "name": "Ada",
            "visits": 3,
            "balance": 10.5,
            "vip": false,
            "note": null,
            "roles": ["admin", "dev", "admin"],
            "empty": [],
            "mixed": ["a", 1],
            "money": {"amountCents": 100, "currency": "USD"}
        }"#;
        let record = from_json(payload).expect("decode");

        assert_eq!(record["name"], AttributeValue::s("Ada"));
        assert_eq!(record["visits"], AttributeValue::n(3));
        assert_eq!(record["balance"], AttributeValue::n("10.5"));
        assert_eq!(record["vip"], AttributeValue::Bool(false));
        assert_eq!(record["note"], AttributeValue::Null);
        assert_eq!(
            record["roles"],
            AttributeValue::Ss(vec!["admin".into(), "dev".into()])
        );
        assert_eq!(record["empty"], AttributeValue::Null);
        assert_eq!(
            record["mixed"],
            AttributeValue::L(vec![AttributeValue::s("a"), AttributeValue::n(1)])
        );
        let money = record["money"].as_s().expect("object kept as json text");
        let reparsed: Value = serde_json::from_str(money).expect("valid json");
        assert_eq!(reparsed["currency"], "USD");
    }

    #[test]
    fn malformed_documents_are_errors() {
        assert!(matches!(from_json(b"{not json"), Err(CodecError::Json(_))));
        assert!(matches!(from_json(b"[1, 2]"), Err(CodecError::Malformed(_))));
        assert!(matches!(
            from_json(br#"{"flag": {"BOOL": "yes"}}"#),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            from_json(br#"{"blob": {"B": "***"}}"#),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn truncated_gzip_is_an_error() {
        let payload = encode_payload(&every_kind()).expect("encode");
        let truncated = &payload[..payload.len() / 2];
        assert!(decode_payload(truncated).is_err());
    }
}
