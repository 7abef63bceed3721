//! Step-script payload encoding
//!
//! Step scripts are variable-length JSON and too bulky to store raw on every
//! event row, so they are serialized and zstd-compressed into a single blob.
//! The blob is fully assembled before any insert touches it; an empty script
//! stores nothing at all rather than an empty compressed placeholder.

use crate::error::Result;

/// Encoded payload plus its element count.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSteps {
    pub blob: Vec<u8>,
    pub count: i32,
}

/// Serialize and compress a step script. Empty input yields `None`.
pub fn encode_steps(steps: &[serde_json::Value]) -> Result<Option<EncodedSteps>> {
    if steps.is_empty() {
        return Ok(None);
    }

    let json = serde_json::to_vec(steps)?;
    let blob = zstd::encode_all(json.as_slice(), zstd::DEFAULT_COMPRESSION_LEVEL)?;

    Ok(Some(EncodedSteps {
        blob,
        count: steps.len() as i32,
    }))
}

/// Decompress and deserialize a stored step script.
pub fn decode_steps(blob: &[u8]) -> Result<Vec<serde_json::Value>> {
    let json = zstd::decode_all(blob)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let steps = vec![
            json!({"operation": "Click element", "selector": "#accept"}),
            json!({"operation": "Enter text in field", "selector": "input[name=q]", "optional_value": "rust"}),
        ];

        let encoded = encode_steps(&steps).unwrap().unwrap();
        assert_eq!(encoded.count, 2);
        assert!(!encoded.blob.is_empty());

        let decoded = decode_steps(&encoded.blob).unwrap();
        assert_eq!(decoded, steps);
    }

    #[test]
    fn test_empty_input_stores_nothing() {
        assert!(encode_steps(&[]).unwrap().is_none());
    }

    #[test]
    fn test_compression_shrinks_repetitive_scripts() {
        let step = json!({"operation": "Click element", "selector": "#the-very-same-selector"});
        let steps = vec![step; 64];

        let encoded = encode_steps(&steps).unwrap().unwrap();
        let raw_len = serde_json::to_vec(&steps).unwrap().len();
        assert!(encoded.blob.len() < raw_len);
    }

    #[test]
    fn test_garbage_blob_is_an_error() {
        assert!(decode_steps(b"not a zstd frame").is_err());
    }
}
