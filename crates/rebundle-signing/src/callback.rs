//! Digest-in, signature-out hook invoked by the platform mid-signing

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::digest::DigestAlgorithm;
use crate::identity::SigningIdentity;
use crate::keys::{AsymmetricSigner, KeyKind, SignatureScheme};
use crate::platform::{E_FAIL, E_INVALIDARG};

/// Bridges the platform's digest-signing hook to a key capability
///
/// Borrowed by exactly one native invocation; the borrow guarantees it is
/// not reachable once that call has returned. The platform expects a status
/// code from the hook, so failures are returned as status values and the
/// message is kept for the engine to report.
pub struct DigestSignCallback<'a> {
    signer: &'a dyn AsymmetricSigner,
    digest: DigestAlgorithm,
    invocations: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl<'a> DigestSignCallback<'a> {
    /// Callback signing with `identity`'s capability and digest algorithm
    pub fn new(identity: &'a SigningIdentity) -> Self {
        Self::with_signer(identity.signer(), identity.digest())
    }

    /// Callback over an arbitrary capability
    pub fn with_signer(signer: &'a dyn AsymmetricSigner, digest: DigestAlgorithm) -> Self {
        Self {
            signer,
            digest,
            invocations: AtomicUsize::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Sign `digest` on behalf of the platform
    ///
    /// `alg_id` is the platform's identifier for the digest algorithm; it
    /// must agree with the configured algorithm when it names one.
    pub fn sign(&self, alg_id: u32, digest: &[u8]) -> Result<Vec<u8>, i32> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if let Some(requested) = DigestAlgorithm::from_alg_id(alg_id) {
            if requested != self.digest {
                return Err(self.fail(
                    E_INVALIDARG,
                    format!(
                        "platform requested {} but the session is configured for {}",
                        requested, self.digest
                    ),
                ));
            }
        }

        if digest.len() != self.digest.output_len() {
            return Err(self.fail(
                E_INVALIDARG,
                format!(
                    "expected a {}-byte {} digest, got {} bytes",
                    self.digest.output_len(),
                    self.digest,
                    digest.len()
                ),
            ));
        }

        let scheme = match self.signer.key_kind() {
            KeyKind::Rsa => SignatureScheme::RsaPkcs1v15(self.digest),
            KeyKind::Ecdsa => SignatureScheme::Ecdsa(self.digest),
            KeyKind::Unsupported(name) => {
                return Err(self.fail(E_INVALIDARG, format!("unsupported key kind: {}", name)));
            }
        };

        self.signer
            .sign_digest(scheme, digest)
            .map_err(|e| self.fail(E_FAIL, e.to_string()))
    }

    /// Number of times the platform called the hook
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Message of the most recent failure, if any
    pub fn take_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|mut slot| slot.take())
    }

    fn fail(&self, status: i32, message: String) -> i32 {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(message);
        }
        status
    }
}
