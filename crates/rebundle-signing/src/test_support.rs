//! Certificate fixtures generated in-process for tests

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use base64::Engine;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::Encode;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;

static SERIAL: AtomicU32 = AtomicU32::new(1);

/// A generated certificate and the P-256 key it certifies
pub(crate) struct TestCert {
    pub der: Vec<u8>,
    pub name: Name,
    pub key: p256::ecdsa::SigningKey,
}

fn next_serial() -> SerialNumber {
    SerialNumber::from(SERIAL.fetch_add(1, Ordering::Relaxed))
}

fn validity() -> Validity {
    Validity::from_now(Duration::from_secs(24 * 3600)).unwrap()
}

fn ecdsa_cert(subject: &str, profile: Profile, issuer_key: Option<&p256::ecdsa::SigningKey>) -> TestCert {
    let key = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
    let spki = SubjectPublicKeyInfoOwned::from_key(*key.verifying_key()).unwrap();
    let name = Name::from_str(subject).unwrap();
    let signer = issuer_key.unwrap_or(&key);

    let builder =
        CertificateBuilder::new(profile, next_serial(), validity(), name.clone(), spki, signer)
            .unwrap();
    let cert = builder.build::<p256::ecdsa::DerSignature>().unwrap();

    TestCert {
        der: cert.to_der().unwrap(),
        name,
        key,
    }
}

/// Self-signed P-256 root
pub(crate) fn ecdsa_root(subject: &str) -> TestCert {
    ecdsa_cert(subject, Profile::Root, None)
}

/// P-256 intermediate CA issued by `issuer`
pub(crate) fn ecdsa_intermediate(subject: &str, issuer: &TestCert) -> TestCert {
    ecdsa_cert(
        subject,
        Profile::SubCA {
            issuer: issuer.name.clone(),
            path_len_constraint: None,
        },
        Some(&issuer.key),
    )
}

/// P-256 end-entity certificate issued by `issuer`
pub(crate) fn ecdsa_leaf(subject: &str, issuer: &TestCert) -> TestCert {
    ecdsa_cert(
        subject,
        Profile::Leaf {
            issuer: issuer.name.clone(),
            enable_key_agreement: false,
            enable_key_encipherment: false,
        },
        Some(&issuer.key),
    )
}

/// Self-signed RSA certificate for `key`
pub(crate) fn rsa_self_signed(subject: &str, key: &rsa::RsaPrivateKey) -> Vec<u8> {
    let public = rsa::RsaPublicKey::from(key);
    let spki = SubjectPublicKeyInfoOwned::from_key(public).unwrap();
    let signing_key = rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(key.clone());

    let builder = CertificateBuilder::new(
        Profile::Root,
        next_serial(),
        validity(),
        Name::from_str(subject).unwrap(),
        spki,
        &signing_key,
    )
    .unwrap();
    builder
        .build::<rsa::pkcs1v15::Signature>()
        .unwrap()
        .to_der()
        .unwrap()
}

/// Render DER certificates as concatenated PEM blocks
pub(crate) fn to_pem(ders: &[Vec<u8>]) -> String {
    let mut out = String::new();
    for der in ders {
        let encoded = base64::engine::general_purpose::STANDARD.encode(der);
        out.push_str("-----BEGIN CERTIFICATE-----\n");
        for line in encoded.as_bytes().chunks(64) {
            out.push_str(std::str::from_utf8(line).unwrap());
            out.push('\n');
        }
        out.push_str("-----END CERTIFICATE-----\n");
    }
    out
}
