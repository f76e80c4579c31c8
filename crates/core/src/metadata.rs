//! `Upload-Metadata` header codec.
//!
//! The header is a comma-separated list of `key base64value` pairs. Keys must
//! be unique and must not contain spaces or commas; values are opaque binary
//! blobs the engine never interprets. A key may appear without a value.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::collections::BTreeMap;

/// Parsed client metadata. Preserves every pair; values stay opaque bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadMetadata(BTreeMap<String, Vec<u8>>);

impl UploadMetadata {
    /// Parse and validate an `Upload-Metadata` header value.
    pub fn parse(header: &str) -> crate::Result<Self> {
        let mut pairs = BTreeMap::new();
        for item in header.split(',') {
            let item = item.trim();
            if item.is_empty() {
                return Err(crate::Error::InvalidMetadata(
                    "empty metadata pair".to_string(),
                ));
            }
            let mut fields = item.splitn(2, ' ');
            let key = fields.next().unwrap_or_default();
            if key.is_empty() {
                return Err(crate::Error::InvalidMetadata(
                    "metadata key must not be empty".to_string(),
                ));
            }
            let value = match fields.next() {
                Some(encoded) if !encoded.trim().is_empty() => {
                    BASE64.decode(encoded.trim()).map_err(|e| {
                        crate::Error::InvalidMetadata(format!(
                            "value for key '{key}' is not valid base64: {e}"
                        ))
                    })?
                }
                _ => Vec::new(),
            };
            if pairs.insert(key.to_string(), value).is_some() {
                return Err(crate::Error::InvalidMetadata(format!(
                    "duplicate metadata key '{key}'"
                )));
            }
        }
        Ok(Self(pairs))
    }

    /// Look up a decoded value by key.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Re-encode as an `Upload-Metadata` header value.
    pub fn to_header(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    key.clone()
                } else {
                    format!("{key} {}", BASE64.encode(value))
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_and_decodes_values() {
        let md = UploadMetadata::parse("filename ZmlsZS5iaW4=,is_confidential").unwrap();
        assert_eq!(md.get("filename"), Some(&b"file.bin"[..]));
        assert_eq!(md.get("is_confidential"), Some(&b""[..]));
        assert_eq!(md.len(), 2);
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = UploadMetadata::parse("a Zg==,a Zg==").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(UploadMetadata::parse("key not*base64!").is_err());
    }

    #[test]
    fn rejects_empty_pairs() {
        assert!(UploadMetadata::parse("a Zg==,,b Zg==").is_err());
        assert!(UploadMetadata::parse("").is_err());
    }

    #[test]
    fn header_round_trip() {
        let header = "alpha YQ==,beta,gamma Yw==";
        let md = UploadMetadata::parse(header).unwrap();
        assert_eq!(UploadMetadata::parse(&md.to_header()).unwrap(), md);
    }
}
