//! Certificate chain assembly
//!
//! The chain only supplies ancestor certificates to the platform signing
//! call. Nothing here checks trust, revocation or validity periods.

use x509_cert::der::Decode;
use x509_cert::Certificate;

use crate::error::{Result, SigningError};
use crate::store::InMemoryCertificateStore;

/// Ordered chain from the signing certificate toward a root
#[derive(Debug)]
pub struct TrustChain {
    chain: Vec<Vec<u8>>,
    extra: Vec<Vec<u8>>,
    store: InMemoryCertificateStore,
}

impl TrustChain {
    /// Build the chain for `signing_certificate`, using `extra` as hints
    ///
    /// Extra certificates that fail to parse are skipped. Only a malformed
    /// signing certificate fails the build.
    pub fn assemble(signing_certificate: &[u8], extra: &[Vec<u8>]) -> Result<Self> {
        let leaf = Certificate::from_der(signing_certificate)
            .map_err(|e| SigningError::ChainBuild(format!("malformed signing certificate: {}", e)))?;

        let mut candidates: Vec<(Certificate, &Vec<u8>)> = extra
            .iter()
            .filter(|der| der.as_slice() != signing_certificate)
            .filter_map(|der| Certificate::from_der(der).ok().map(|cert| (cert, der)))
            .collect();

        let mut chain = vec![signing_certificate.to_vec()];
        let mut current = leaf;

        while !is_self_issued(&current) {
            let issuer = &current.tbs_certificate.issuer;
            let Some(position) = candidates
                .iter()
                .position(|(cert, _)| &cert.tbs_certificate.subject == issuer)
            else {
                break;
            };
            let (cert, der) = candidates.swap_remove(position);
            chain.push(der.clone());
            current = cert;
        }

        let mut store = InMemoryCertificateStore::new();
        for der in &chain {
            store.add(der.clone());
        }

        Ok(Self {
            chain,
            extra: extra.to_vec(),
            store,
        })
    }

    /// The signing certificate
    pub fn leaf(&self) -> &[u8] {
        &self.chain[0]
    }

    /// Chain certificates in order, leaf first
    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.chain
    }

    /// Hint certificates supplied by the caller
    pub fn extra(&self) -> &[Vec<u8>] {
        &self.extra
    }

    /// Store populated with the chain, in chain order
    pub fn store(&self) -> &InMemoryCertificateStore {
        &self.store
    }

    /// Number of certificates in the chain
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Always false; a chain holds at least the signing certificate
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

fn is_self_issued(cert: &Certificate) -> bool {
    cert.tbs_certificate.subject == cert.tbs_certificate.issuer
}
