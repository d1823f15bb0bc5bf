//! Asymmetric key capabilities
//!
//! The signing engine never sees private key material. It only talks to an
//! [`AsymmetricSigner`], which may hold the key locally or forward the digest
//! to a remote key-custody service.

use std::path::Path;

use p256::ecdsa::signature::hazmat::PrehashSigner;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};

use crate::digest::DigestAlgorithm;
use crate::error::{Result, SigningError};

/// Algorithm family of a key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// RSA key, signs with PKCS#1 v1.5 padding
    Rsa,
    /// Elliptic-curve key, signs the raw digest
    Ecdsa,
    /// Anything else (Ed25519, DSA, ...)
    Unsupported(String),
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rsa => write!(f, "RSA"),
            Self::Ecdsa => write!(f, "ECDSA"),
            Self::Unsupported(name) => write!(f, "{}", name),
        }
    }
}

/// How a digest is turned into a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// RSASSA-PKCS1-v1_5 over a digest of the given algorithm
    RsaPkcs1v15(DigestAlgorithm),
    /// ECDSA over the raw digest, IEEE P1363 (`r || s`) output
    Ecdsa(DigestAlgorithm),
}

impl SignatureScheme {
    /// Digest algorithm the supplied digest was produced with
    pub fn digest(&self) -> DigestAlgorithm {
        match self {
            Self::RsaPkcs1v15(digest) | Self::Ecdsa(digest) => *digest,
        }
    }
}

/// A private-key operation, local or remote
pub trait AsymmetricSigner: Send + Sync {
    /// Algorithm family of the key
    fn key_kind(&self) -> KeyKind;

    /// Sign a precomputed digest
    ///
    /// Implementations may block on network I/O; callers run them from a
    /// synchronous frame.
    fn sign_digest(&self, scheme: SignatureScheme, digest: &[u8]) -> Result<Vec<u8>>;
}

/// Key material held in this process
pub enum LocalKeySigner {
    /// RSA private key
    Rsa(RsaPrivateKey),
    /// NIST P-256 private key
    EcdsaP256(p256::ecdsa::SigningKey),
}

impl LocalKeySigner {
    /// Load a PKCS#8 private key from a PEM or DER file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        match std::str::from_utf8(&bytes) {
            Ok(text) if text.contains("-----BEGIN") => Self::from_pkcs8_pem(text),
            _ => Self::from_pkcs8_der(&bytes),
        }
    }

    /// Parse a PKCS#8 PEM private key (RSA or P-256)
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
            return Ok(Self::Rsa(key));
        }
        p256::SecretKey::from_pkcs8_pem(pem)
            .map(|key| Self::EcdsaP256(key.into()))
            .map_err(|e| {
                SigningError::Configuration(format!("Unsupported or malformed private key: {}", e))
            })
    }

    /// Parse a PKCS#8 DER private key (RSA or P-256)
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        if let Ok(key) = RsaPrivateKey::from_pkcs8_der(der) {
            return Ok(Self::Rsa(key));
        }
        p256::SecretKey::from_pkcs8_der(der)
            .map(|key| Self::EcdsaP256(key.into()))
            .map_err(|e| {
                SigningError::Configuration(format!("Unsupported or malformed private key: {}", e))
            })
    }
}

impl AsymmetricSigner for LocalKeySigner {
    fn key_kind(&self) -> KeyKind {
        match self {
            Self::Rsa(_) => KeyKind::Rsa,
            Self::EcdsaP256(_) => KeyKind::Ecdsa,
        }
    }

    fn sign_digest(&self, scheme: SignatureScheme, digest: &[u8]) -> Result<Vec<u8>> {
        match (self, scheme) {
            (Self::Rsa(key), SignatureScheme::RsaPkcs1v15(algorithm)) => {
                let padding = match algorithm {
                    DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
                    DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
                    DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
                    DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
                };
                key.sign(padding, digest)
                    .map_err(|e| SigningError::InvalidArgument(format!("RSA signing failed: {}", e)))
            }
            (Self::EcdsaP256(key), SignatureScheme::Ecdsa(_)) => {
                let signature: p256::ecdsa::Signature = key.sign_prehash(digest).map_err(|e| {
                    SigningError::InvalidArgument(format!("ECDSA signing failed: {}", e))
                })?;
                Ok(signature.to_bytes().to_vec())
            }
            (signer, scheme) => Err(SigningError::KeyMismatch {
                key: signer.key_kind().to_string(),
                certificate: format!("{:?}", scheme),
            }),
        }
    }
}

impl std::fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LocalKeySigner").field(&self.key_kind()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::hazmat::PrehashVerifier;
    use rsa::RsaPublicKey;
    use sha2::{Digest, Sha256};

    #[test]
    fn test_rsa_2048_signature_is_256_bytes() {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public = RsaPublicKey::from(&key);
        let signer = LocalKeySigner::Rsa(key);
        let digest = Sha256::digest(b"payload");

        let signature = signer
            .sign_digest(SignatureScheme::RsaPkcs1v15(DigestAlgorithm::Sha256), &digest)
            .unwrap();

        assert_eq!(signature.len(), 256);
        public
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
            .unwrap();
    }

    #[test]
    fn test_p256_signature_is_raw_r_and_s() {
        let key = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        let verifying = *key.verifying_key();
        let signer = LocalKeySigner::EcdsaP256(key);
        let digest = Sha256::digest(b"payload");

        let signature = signer
            .sign_digest(SignatureScheme::Ecdsa(DigestAlgorithm::Sha256), &digest)
            .unwrap();

        assert_eq!(signature.len(), 64);
        let parsed = p256::ecdsa::Signature::from_slice(&signature).unwrap();
        verifying.verify_prehash(&digest, &parsed).unwrap();
    }

    #[test]
    fn test_scheme_mismatch_is_rejected() {
        let key = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        let signer = LocalKeySigner::EcdsaP256(key);
        let result =
            signer.sign_digest(SignatureScheme::RsaPkcs1v15(DigestAlgorithm::Sha256), &[0u8; 32]);
        assert!(matches!(result, Err(SigningError::KeyMismatch { .. })));
    }

    #[test]
    fn test_load_pkcs8_pem() {
        use p256::pkcs8::{EncodePrivateKey, LineEnding};

        let secret = p256::SecretKey::random(&mut rand::thread_rng());
        let pem = secret.to_pkcs8_pem(LineEnding::LF).unwrap();

        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("key.pem");
        std::fs::write(&path, pem.as_bytes()).unwrap();

        let signer = LocalKeySigner::load(&path).unwrap();
        assert_eq!(signer.key_kind(), KeyKind::Ecdsa);
    }

    #[test]
    fn test_malformed_key_is_configuration_error() {
        let result = LocalKeySigner::from_pkcs8_der(b"not a key");
        assert!(matches!(result, Err(SigningError::Configuration(_))));
    }
}
