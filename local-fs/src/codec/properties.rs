use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use super::{get_count, get_string, put_count, put_string};
use crate::error::CodecError;

/// Encodes and decodes item property records.
///
/// Layout: key count (`i32`), then for each key the key string, a value
/// count (`i32`) and that many value strings. Decoding joins multiple values
/// of one key with `,`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataCodec;

impl MetadataCodec {
    /// Separator used when a key carries several values.
    pub const VALUE_SEPARATOR: &'static str = ",";

    /// Encode single-valued properties.
    pub fn encode(properties: &BTreeMap<String, String>) -> Result<Bytes, CodecError> {
        Self::encode_multi(
            properties
                .iter()
                .map(|(key, value)| (key.as_str(), std::slice::from_ref(value))),
        )
    }

    /// Encode properties where a key may carry several values.
    pub fn encode_multi<'a, I, V>(entries: I) -> Result<Bytes, CodecError>
    where
        I: IntoIterator<Item = (&'a str, V)>,
        I::IntoIter: ExactSizeIterator,
        V: AsRef<[String]>,
    {
        let entries = entries.into_iter();
        let mut buf = BytesMut::new();
        put_count(&mut buf, "property keys", entries.len())?;
        for (key, values) in entries {
            let values = values.as_ref();
            put_string(&mut buf, "property key", key)?;
            put_count(&mut buf, "property values", values.len())?;
            for value in values {
                put_string(&mut buf, "property value", value)?;
            }
        }
        Ok(buf.freeze())
    }

    /// Decode a property record.
    pub fn decode(mut input: &[u8]) -> Result<BTreeMap<String, String>, CodecError> {
        let keys = get_count(&mut input, "property keys")?;
        let mut properties = BTreeMap::new();
        for _ in 0..keys {
            let key = get_string(&mut input, "property key")?;
            let count = get_count(&mut input, "property values")?;
            let mut values = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                values.push(get_string(&mut input, "property value")?);
            }
            properties.insert(key, values.join(Self::VALUE_SEPARATOR));
        }
        Ok(properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_round_trip() {
        let original = props(&[("a", "x"), ("b", "z")]);
        let encoded = MetadataCodec::encode(&original).unwrap();
        assert_eq!(MetadataCodec::decode(&encoded).unwrap(), original);
    }

    #[test]
    fn test_multiple_values_are_joined() {
        let values = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let encoded = MetadataCodec::encode_multi([("a", values)]).unwrap();
        assert_eq!(
            MetadataCodec::decode(&encoded).unwrap(),
            props(&[("a", "x,y,z")])
        );
    }

    #[test]
    fn test_wire_layout() {
        let encoded = MetadataCodec::encode(&props(&[("k", "v")])).unwrap();
        assert_eq!(
            encoded.as_ref(),
            &[0, 0, 0, 1, 0, 1, b'k', 0, 0, 0, 1, 0, 1, b'v']
        );
    }

    #[test]
    fn test_empty_record() {
        let encoded = MetadataCodec::encode(&BTreeMap::new()).unwrap();
        assert_eq!(encoded.as_ref(), &[0, 0, 0, 0]);
        assert!(MetadataCodec::decode(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_record_fails() {
        let encoded = MetadataCodec::encode(&props(&[("a", "x")])).unwrap();
        let truncated = &encoded[..encoded.len() - 1];
        assert!(matches!(
            MetadataCodec::decode(truncated),
            Err(CodecError::UnexpectedEof {
                field: "property value",
                ..
            })
        ));
    }
}
