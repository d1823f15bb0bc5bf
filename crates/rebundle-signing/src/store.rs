//! Ephemeral in-memory certificate store

/// Process-local certificate container handed to the native signing call
///
/// Certificates are kept in insertion order; the first one is the signing
/// certificate. A store belongs to exactly one signing session and is dropped
/// with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryCertificateStore {
    certificates: Vec<Vec<u8>>,
}

impl InMemoryCertificateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a DER certificate; duplicates are ignored
    pub fn add(&mut self, der: Vec<u8>) {
        if !self.certificates.contains(&der) {
            self.certificates.push(der);
        }
    }

    /// The signing certificate
    pub fn signing_certificate(&self) -> Option<&[u8]> {
        self.certificates.first().map(Vec::as_slice)
    }

    /// All certificates, in chain order
    pub fn certificates(&self) -> impl Iterator<Item = &[u8]> {
        self.certificates.iter().map(Vec::as_slice)
    }

    /// Number of certificates
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}
