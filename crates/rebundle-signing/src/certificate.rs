//! Certificate loading and inspection

use std::path::Path;

use x509_cert::der::{Decode, Encode};
use x509_cert::spki::ObjectIdentifier;
use x509_cert::Certificate;

use crate::error::{Result, SigningError};
use crate::keys::KeyKind;

const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

/// Load every certificate in a PEM or DER file, as DER
pub fn load_certificates(path: &Path) -> Result<Vec<Vec<u8>>> {
    let bytes = std::fs::read(path)?;
    parse_certificates(&bytes).map_err(|e| {
        SigningError::Configuration(format!("{}: {}", path.display(), e))
    })
}

/// Parse one DER certificate or any number of PEM certificate blocks
pub fn parse_certificates(bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    if bytes.windows(10).any(|w| w == b"-----BEGIN") {
        let certificates = Certificate::load_pem_chain(bytes)
            .map_err(|e| SigningError::Configuration(format!("malformed PEM certificate: {}", e)))?;
        return certificates
            .iter()
            .map(|cert| {
                cert.to_der().map_err(|e| {
                    SigningError::Configuration(format!("failed to re-encode certificate: {}", e))
                })
            })
            .collect();
    }

    Certificate::from_der(bytes)
        .map_err(|e| SigningError::Configuration(format!("malformed DER certificate: {}", e)))?;
    Ok(vec![bytes.to_vec()])
}

/// Key family of a certificate's subject public key
pub fn certificate_key_kind(cert: &Certificate) -> KeyKind {
    let oid = cert.tbs_certificate.subject_public_key_info.algorithm.oid;
    if oid == RSA_ENCRYPTION {
        KeyKind::Rsa
    } else if oid == EC_PUBLIC_KEY {
        KeyKind::Ecdsa
    } else {
        KeyKind::Unsupported(oid.to_string())
    }
}

/// RFC 4514 rendering of the certificate subject
pub fn subject_name(cert: &Certificate) -> String {
    cert.tbs_certificate.subject.to_string()
}
