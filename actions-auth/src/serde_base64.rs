//! Serializes byte buffers as standard base64 strings, the way the agent service
//! and the vendor runner files encode binary values.
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{de::Error, Deserialize, Deserializer, Serializer};

pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&STANDARD.encode(bytes))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    match value {
        Some(encoded) => STANDARD.decode(encoded).map_err(D::Error::custom),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super", default)]
        value: Vec<u8>,
    }

    #[test]
    fn test_encodes_as_standard_base64() {
        let json = serde_json::to_string(&Wrapper {
            value: vec![0xfb, 0xff, 0x01],
        })
        .unwrap();
        assert_eq!(json, r#"{"value":"+/8B"}"#);
    }

    #[test]
    fn test_null_and_missing_decode_to_empty() {
        let null: Wrapper = serde_json::from_str(r#"{"value":null}"#).unwrap();
        let missing: Wrapper = serde_json::from_str(r#"{}"#).unwrap();
        assert!(null.value.is_empty());
        assert!(missing.value.is_empty());
    }

    #[test]
    fn test_rejects_invalid_base64() {
        assert!(serde_json::from_str::<Wrapper>(r#"{"value":"%%%"}"#).is_err());
    }
}
