//! Rebundle Signing - Authenticode signing with remote key custody
//!
//! This crate drives the platform's Authenticode implementation while keeping
//! the private-key operation outside of it:
//! - Certificate chain assembly and an in-memory certificate store
//! - Subject kind dispatch (flat executables vs app packages)
//! - A digest-signing callback bridging the platform to a key capability
//! - Local PKCS#8 keys and Azure Key Vault keys as key capabilities

pub mod callback;
pub mod certificate;
pub mod chain;
pub mod digest;
pub mod engine;
pub mod error;
pub mod identity;
pub mod keys;
pub mod keyvault;
pub mod platform;
pub mod store;
pub mod subject;
pub mod timestamp;

#[cfg(test)]
mod test_support;

pub use callback::DigestSignCallback;
pub use chain::TrustChain;
pub use digest::DigestAlgorithm;
pub use engine::{AuthenticodeEngine, SignOutcome, SignRequest};
pub use error::{Result, SigningError};
pub use identity::SigningIdentity;
pub use keys::{AsymmetricSigner, KeyKind, LocalKeySigner, SignatureScheme};
pub use keyvault::{KeyVaultCertificate, KeyVaultClient, KeyVaultSigner};
pub use platform::{EnvelopePlatform, NativePlatform};
pub use store::InMemoryCertificateStore;
pub use subject::{PageHashing, SubjectConfiguration, SubjectKind};
pub use timestamp::TimestampPolicy;
