//! Digest algorithms understood by the signing platform

use serde::{Deserialize, Serialize};

use crate::error::{Result, SigningError};

/// Hash function used for file hashing and for the signed digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-1, accepted only as an explicit legacy choice
    Sha1,
    /// SHA-256
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// Platform algorithm identifier (`ALG_ID`)
    pub fn alg_id(&self) -> u32 {
        match self {
            Self::Sha1 => 0x8004,
            Self::Sha256 => 0x800c,
            Self::Sha384 => 0x800d,
            Self::Sha512 => 0x800e,
        }
    }

    /// Resolve a platform algorithm identifier
    pub fn from_alg_id(alg_id: u32) -> Option<Self> {
        match alg_id {
            0x8004 => Some(Self::Sha1),
            0x800c => Some(Self::Sha256),
            0x800d => Some(Self::Sha384),
            0x800e => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Dotted object identifier, as used in timestamp requests
    pub fn oid(&self) -> &'static str {
        match self {
            Self::Sha1 => "1.3.14.3.2.26",
            Self::Sha256 => "2.16.840.1.101.3.4.2.1",
            Self::Sha384 => "2.16.840.1.101.3.4.2.2",
            Self::Sha512 => "2.16.840.1.101.3.4.2.3",
        }
    }

    /// Length of a digest produced by this algorithm, in bytes
    pub fn output_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DigestAlgorithm {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "").as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(SigningError::Configuration(format!(
                "Unknown digest algorithm: {}",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alg_id_round_trip() {
        for alg in [
            DigestAlgorithm::Sha1,
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ] {
            assert_eq!(DigestAlgorithm::from_alg_id(alg.alg_id()), Some(alg));
        }
        assert_eq!(DigestAlgorithm::from_alg_id(0), None);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("SHA-256".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha256);
        assert_eq!("sha384".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha384);
        assert!("md5".parse::<DigestAlgorithm>().is_err());
    }
}
