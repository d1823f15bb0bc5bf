//! Authenticode signing engine
//!
//! One call to [`AuthenticodeEngine::sign`] is one signing session: assemble
//! the chain, resolve the subject configuration, prepare native buffers, run
//! the platform call with the digest callback, release what the platform
//! handed back. Nothing persists between sessions.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::callback::DigestSignCallback;
use crate::chain::TrustChain;
use crate::error::{Result, SigningError};
use crate::identity::SigningIdentity;
use crate::platform::{EnvelopeInvocation, EnvelopePlatform, NativeHandle, WideString, S_OK};
use crate::subject::{PageHashing, SubjectConfiguration, SubjectKind};
use crate::timestamp::TimestampPolicy;

/// A file to sign and its signature attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    /// File to sign in place
    pub path: PathBuf,
    /// Human-readable description embedded in the signature
    pub description: Option<String>,
    /// URL embedded alongside the description
    pub description_url: Option<String>,
    /// Page hashing preference
    pub page_hashing: PageHashing,
}

impl SignRequest {
    /// Request with no description and the platform's page hashing default
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            description: None,
            description_url: None,
            page_hashing: PageHashing::default(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the description URL
    pub fn with_description_url(mut self, url: impl Into<String>) -> Self {
        self.description_url = Some(url.into());
        self
    }

    /// Set the page hashing preference
    pub fn with_page_hashing(mut self, page_hashing: PageHashing) -> Self {
        self.page_hashing = page_hashing;
        self
    }
}

/// Result of one signing session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOutcome {
    /// Native status, verbatim; zero is success
    pub status: i32,
    /// Classified subject kind
    pub subject_kind: SubjectKind,
    /// Page hashing actually requested from the platform
    pub page_hashing: PageHashing,
    /// The caller asked for page hashing and the subject kind forbade it
    pub page_hashing_overridden: bool,
    /// How many digests the platform asked the callback to sign
    pub callback_invocations: usize,
    /// Failure reported by the callback, if it failed
    pub callback_error: Option<String>,
}

impl SignOutcome {
    /// Whether the platform reported success
    pub fn is_success(&self) -> bool {
        self.status == S_OK
    }

    /// Convert a non-zero status into [`SigningError::NativeSigningFailure`]
    pub fn into_result(self, path: &Path) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SigningError::NativeSigningFailure {
                path: path.to_path_buf(),
                status: self.status as u32,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    ChainBuilt,
    Invoking,
    Completed,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::ChainBuilt => write!(f, "chain built"),
            Self::Invoking => write!(f, "invoking"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

struct Session {
    state: SessionState,
}

impl Session {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }

    fn enter(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "Signing session transition");
        self.state = next;
    }
}

/// Signs files with a remote or local key through the platform's
/// Authenticode implementation
pub struct AuthenticodeEngine<P> {
    platform: P,
    identity: SigningIdentity,
    timestamp: TimestampPolicy,
    additional_certificates: Vec<Vec<u8>>,
}

impl<P: EnvelopePlatform> AuthenticodeEngine<P> {
    /// Engine for `identity` with no timestamp and no extra certificates
    pub fn new(platform: P, identity: SigningIdentity) -> Self {
        Self {
            platform,
            identity,
            timestamp: TimestampPolicy::None,
            additional_certificates: Vec::new(),
        }
    }

    /// Set the timestamp policy
    pub fn with_timestamp(mut self, timestamp: TimestampPolicy) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Supply chain hint certificates (DER)
    pub fn with_additional_certificates(mut self, certificates: Vec<Vec<u8>>) -> Self {
        self.additional_certificates = certificates;
        self
    }

    /// The signing identity
    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    /// The timestamp policy
    pub fn timestamp(&self) -> &TimestampPolicy {
        &self.timestamp
    }

    /// The platform implementation
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Sign one file
    ///
    /// Returns an error only when the call cannot be prepared (missing file,
    /// unencodable strings, unusable signing certificate); in that case the
    /// platform is never invoked. Whatever happens inside the platform call
    /// comes back as [`SignOutcome::status`].
    #[instrument(skip(self, request), fields(path = %request.path.display()))]
    pub fn sign(&self, request: &SignRequest) -> Result<SignOutcome> {
        let mut session = Session::new();

        if !request.path.is_file() {
            return Err(SigningError::InvalidArgument(format!(
                "File not found: {}",
                request.path.display()
            )));
        }

        let chain = TrustChain::assemble(self.identity.certificate(), &self.additional_certificates)?;
        debug!(certificates = chain.len(), "Assembled certificate chain");
        session.enter(SessionState::ChainBuilt);

        let subject_config = SubjectConfiguration::resolve(&request.path, request.page_hashing);
        if subject_config.page_hashing_overridden {
            warn!(
                "Page hashing is not supported for {} subjects; signing {} without page hashes",
                subject_config.kind,
                request.path.display()
            );
        }

        let subject = WideString::from_path(&request.path)?;
        let description = request
            .description
            .as_deref()
            .map(WideString::new)
            .transpose()?;
        let description_url = request
            .description_url
            .as_deref()
            .map(WideString::new)
            .transpose()?;
        let timestamp = self.timestamp.native_fields()?;

        let callback = DigestSignCallback::new(&self.identity);
        let invocation = EnvelopeInvocation {
            path: &request.path,
            subject: &subject,
            store: chain.store(),
            digest: self.identity.digest(),
            timestamp: &timestamp,
            description: description.as_ref(),
            description_url: description_url.as_ref(),
            subject_config: &subject_config,
            callback: &callback,
        };

        session.enter(SessionState::Invoking);
        let returned = self.platform.produce_envelope(&invocation);

        if let Some(context) = returned.signer_context {
            context.release();
        }
        if let Some(state) = returned.package_state {
            state.release();
        }

        let outcome = SignOutcome {
            status: returned.status,
            subject_kind: subject_config.kind,
            page_hashing: subject_config.page_hashing,
            page_hashing_overridden: subject_config.page_hashing_overridden,
            callback_invocations: callback.invocations(),
            callback_error: callback.take_error(),
        };

        if outcome.is_success() {
            session.enter(SessionState::Completed);
            info!(kind = %outcome.subject_kind, "Signed {}", request.path.display());
        } else {
            session.enter(SessionState::Failed);
            debug!(
                status = format_args!("0x{:08X}", outcome.status as u32),
                callback_error = outcome.callback_error.as_deref(),
                "Platform signing call failed"
            );
        }

        Ok(outcome)
    }
}

impl<P> std::fmt::Debug for AuthenticodeEngine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticodeEngine")
            .field("identity", &self.identity)
            .field("timestamp", &self.timestamp)
            .field("additional_certificates", &self.additional_certificates.len())
            .finish_non_exhaustive()
    }
}
