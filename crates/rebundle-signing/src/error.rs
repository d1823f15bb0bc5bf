//! Error types for signing operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for signing operations
pub type Result<T> = std::result::Result<T, SigningError>;

/// Signing-related errors
///
/// Failures inside the native signing call are never raised through this type
/// by the engine itself; they come back as a status on the outcome and are
/// only converted into [`SigningError::NativeSigningFailure`] by callers that
/// ask for it.
#[derive(Debug, Error)]
pub enum SigningError {
    /// Bad or missing credentials, malformed inputs
    #[error("Signing configuration error: {0}")]
    Configuration(String),

    /// The certificate chain could not be built at all
    #[error("Failed to build certificate chain: {0}")]
    ChainBuild(String),

    /// The key capability is neither RSA nor ECDSA
    #[error("Unsupported key kind: {0}")]
    UnsupportedKeyKind(String),

    /// The key capability cannot sign for the certificate's key algorithm
    #[error("Signing key ({key}) does not match the certificate key algorithm ({certificate})")]
    KeyMismatch { key: String, certificate: String },

    /// A caller passed an argument the native boundary cannot accept
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Signing attempted before the native library was initialised
    #[error("Native signing library not initialised; call platform::initialize() first")]
    NotInitialized,

    /// Native signing is not available on this platform
    #[error("Authenticode signing is not supported on this platform")]
    UnsupportedPlatform,

    /// The remote key-custody service rejected or failed a request
    #[error("Key Vault error: {0}")]
    KeyVault(String),

    /// The platform signing call returned a non-zero status
    #[error("Failed to sign {path}: native status 0x{status:08X}")]
    NativeSigningFailure { path: PathBuf, status: u32 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 decoding error
    #[error("Base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),
}
