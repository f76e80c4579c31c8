//! Checksum algorithms and the `Upload-Checksum` header codec.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

/// Checksum algorithms the engine can verify.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
    Sha512,
    Md5,
}

impl ChecksumAlgorithm {
    /// All supported algorithms, in the order advertised to clients.
    pub fn all() -> &'static [ChecksumAlgorithm] {
        &[Self::Sha1, Self::Sha256, Self::Sha512, Self::Md5]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Md5 => "md5",
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
            Self::Md5 => 16,
        }
    }

    /// Create an incremental hasher for this algorithm.
    pub fn hasher(&self) -> ChecksumHasher {
        match self {
            Self::Sha1 => ChecksumHasher::Sha1(Sha1::new()),
            Self::Sha256 => ChecksumHasher::Sha256(Sha256::new()),
            Self::Sha512 => ChecksumHasher::Sha512(Box::new(Sha512::new())),
            Self::Md5 => ChecksumHasher::Md5(Md5::new()),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            "md5" => Ok(Self::Md5),
            other => Err(crate::Error::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incremental digest over one algorithm.
pub enum ChecksumHasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Box<Sha512>),
    Md5(Md5),
}

impl ChecksumHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Md5(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
            Self::Md5(h) => h.finalize().to_vec(),
        }
    }
}

/// A parsed `Upload-Checksum` header: `<algorithm> <base64 digest>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadChecksum {
    pub algorithm: ChecksumAlgorithm,
    pub digest: Vec<u8>,
}

impl UploadChecksum {
    pub fn parse(header: &str) -> crate::Result<Self> {
        let mut fields = header.trim().splitn(2, ' ');
        let algorithm: ChecksumAlgorithm = fields
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| crate::Error::InvalidChecksum("missing algorithm".to_string()))?
            .parse()?;
        let encoded = fields
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| crate::Error::InvalidChecksum("missing digest value".to_string()))?;
        let digest = BASE64
            .decode(encoded)
            .map_err(|e| crate::Error::InvalidChecksum(format!("digest is not base64: {e}")))?;
        if digest.len() != algorithm.digest_len() {
            return Err(crate::Error::InvalidChecksum(format!(
                "{algorithm} digest must be {} bytes, got {}",
                algorithm.digest_len(),
                digest.len()
            )));
        }
        Ok(Self { algorithm, digest })
    }

    /// Compute this header value for a byte slice (test and client helper).
    pub fn compute(algorithm: ChecksumAlgorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        Self {
            algorithm,
            digest: hasher.finalize(),
        }
    }

    pub fn to_header(&self) -> String {
        format!("{} {}", self.algorithm, BASE64.encode(&self.digest))
    }
}
