//! Signing identity: key capability + certificate + file digest

use std::sync::Arc;

use x509_cert::der::Decode;
use x509_cert::Certificate;

use crate::certificate::{certificate_key_kind, subject_name};
use crate::digest::DigestAlgorithm;
use crate::error::{Result, SigningError};
use crate::keys::{AsymmetricSigner, KeyKind};

/// An asymmetric signing capability paired with its public certificate
///
/// The capability may be local or remote; the identity only guarantees that
/// it can sign for the certificate's key algorithm.
#[derive(Clone)]
pub struct SigningIdentity {
    signer: Arc<dyn AsymmetricSigner>,
    certificate: Vec<u8>,
    subject: String,
    key_kind: KeyKind,
    digest: DigestAlgorithm,
}

impl SigningIdentity {
    /// Pair a key capability with a DER certificate
    ///
    /// Fails when the certificate is malformed or its key algorithm differs
    /// from the capability's.
    pub fn new(
        signer: Arc<dyn AsymmetricSigner>,
        certificate: Vec<u8>,
        digest: DigestAlgorithm,
    ) -> Result<Self> {
        let cert = Certificate::from_der(&certificate).map_err(|e| {
            SigningError::Configuration(format!("malformed signing certificate: {}", e))
        })?;

        let certificate_kind = certificate_key_kind(&cert);
        let key_kind = signer.key_kind();
        if let KeyKind::Unsupported(name) = &key_kind {
            return Err(SigningError::UnsupportedKeyKind(name.clone()));
        }
        if certificate_kind != key_kind {
            return Err(SigningError::KeyMismatch {
                key: key_kind.to_string(),
                certificate: certificate_kind.to_string(),
            });
        }

        Ok(Self {
            signer,
            subject: subject_name(&cert),
            certificate,
            key_kind,
            digest,
        })
    }

    /// The key capability
    pub fn signer(&self) -> &dyn AsymmetricSigner {
        self.signer.as_ref()
    }

    /// DER-encoded signing certificate
    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    /// Certificate subject, RFC 4514 form
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Key family shared by the capability and certificate
    pub fn key_kind(&self) -> &KeyKind {
        &self.key_kind
    }

    /// Digest algorithm used for file hashing
    pub fn digest(&self) -> DigestAlgorithm {
        self.digest
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("subject", &self.subject)
            .field("key_kind", &self.key_kind)
            .field("digest", &self.digest)
            .finish_non_exhaustive()
    }
}
