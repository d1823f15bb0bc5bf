//! Boundary to the native Authenticode signing call
//!
//! The engine talks to the platform through [`EnvelopePlatform`] so that the
//! native library is confined to one module and everything above it can be
//! exercised with a fake. The native implementation is only compiled on
//! Windows.

#[cfg(target_os = "windows")]
mod windows;

use std::path::Path;
use std::sync::OnceLock;

use crate::callback::DigestSignCallback;
use crate::digest::DigestAlgorithm;
use crate::error::{Result, SigningError};
use crate::store::InMemoryCertificateStore;
use crate::subject::SubjectConfiguration;
use crate::timestamp::TimestampFields;

/// Success
pub const S_OK: i32 = 0;

/// One or more arguments are invalid
pub const E_INVALIDARG: i32 = 0x8007_0057_u32 as i32;

/// Unspecified failure
pub const E_FAIL: i32 = 0x8000_4005_u32 as i32;

/// Not implemented
pub const E_NOTIMPL: i32 = 0x8000_4001_u32 as i32;

/// Null-terminated UTF-16 string for the native boundary
#[derive(Clone, PartialEq, Eq)]
pub struct WideString(Vec<u16>);

impl WideString {
    /// Encode `s`, rejecting interior nulls
    pub fn new(s: &str) -> Result<Self> {
        if s.contains('\0') {
            return Err(SigningError::InvalidArgument(format!(
                "string contains an interior null: {:?}",
                s
            )));
        }
        Ok(Self(s.encode_utf16().chain(std::iter::once(0)).collect()))
    }

    /// Encode a filesystem path
    #[cfg(target_os = "windows")]
    pub fn from_path(path: &Path) -> Result<Self> {
        use std::os::windows::ffi::OsStrExt;

        let wide: Vec<u16> = path.as_os_str().encode_wide().collect();
        if wide.contains(&0) {
            return Err(SigningError::InvalidArgument(format!(
                "path contains an interior null: {}",
                path.display()
            )));
        }
        Ok(Self(wide.into_iter().chain(std::iter::once(0)).collect()))
    }

    /// Encode a filesystem path
    #[cfg(not(target_os = "windows"))]
    pub fn from_path(path: &Path) -> Result<Self> {
        let s = path.to_str().ok_or_else(|| {
            SigningError::InvalidArgument(format!("path is not valid Unicode: {}", path.display()))
        })?;
        Self::new(s)
    }

    /// Pointer to the first code unit; valid while `self` lives
    pub fn as_ptr(&self) -> *const u16 {
        self.0.as_ptr()
    }

    /// Decode back to a Rust string, without the terminator
    pub fn to_string_lossy(&self) -> String {
        let end = self.0.len().saturating_sub(1);
        String::from_utf16_lossy(&self.0[..end])
    }
}

impl std::fmt::Debug for WideString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

/// A platform-owned resource the engine must hand back exactly once
pub trait NativeHandle {
    /// Release the resource
    fn release(self);
}

/// What the platform hands back from one signing call
///
/// Both handles, when present, belong to the caller and are released by the
/// engine whatever the status.
#[derive(Debug)]
pub struct EnvelopeReturn<H> {
    /// Native status; zero is success
    pub status: i32,
    /// Signer context allocated by the platform
    pub signer_context: Option<H>,
    /// Package signing state, structured packages only
    pub package_state: Option<H>,
}

impl<H> EnvelopeReturn<H> {
    /// A return carrying only a status
    pub fn status(status: i32) -> Self {
        Self {
            status,
            signer_context: None,
            package_state: None,
        }
    }
}

/// Everything a single native signing call needs
///
/// Borrows are scoped to the call, so neither the callback nor the store can
/// outlive it.
pub struct EnvelopeInvocation<'a> {
    /// File being signed
    pub path: &'a Path,
    /// `path` in native encoding
    pub subject: &'a WideString,
    /// Signing certificate followed by its chain
    pub store: &'a InMemoryCertificateStore,
    /// File hash algorithm
    pub digest: DigestAlgorithm,
    /// Timestamp request
    pub timestamp: &'a TimestampFields,
    /// Optional signature description
    pub description: Option<&'a WideString>,
    /// Optional description URL
    pub description_url: Option<&'a WideString>,
    /// Subject kind and page hashing resolution
    pub subject_config: &'a SubjectConfiguration,
    /// Digest signing hook
    pub callback: &'a DigestSignCallback<'a>,
}

/// A native library able to produce an Authenticode signature envelope
pub trait EnvelopePlatform: Send + Sync {
    /// Resource type for returned contexts
    type Handle: NativeHandle;

    /// Run one signing call
    ///
    /// Must not panic; every failure is reported through the status.
    fn produce_envelope(&self, invocation: &EnvelopeInvocation<'_>) -> EnvelopeReturn<Self::Handle>;
}

#[cfg(target_os = "windows")]
static LIBRARY: OnceLock<windows::NativeLibrary> = OnceLock::new();

#[cfg(not(target_os = "windows"))]
static LIBRARY: OnceLock<()> = OnceLock::new();

/// Load the native signing library
///
/// Idempotent. Must run before [`NativePlatform::get`].
#[cfg(target_os = "windows")]
pub fn initialize() -> Result<()> {
    if LIBRARY.get().is_some() {
        return Ok(());
    }
    let library = windows::NativeLibrary::load()?;
    let _ = LIBRARY.set(library);
    tracing::debug!("Loaded native signing library");
    Ok(())
}

/// Load the native signing library
///
/// Native signing only exists on Windows.
#[cfg(not(target_os = "windows"))]
pub fn initialize() -> Result<()> {
    Err(SigningError::UnsupportedPlatform)
}

/// Whether [`initialize`] has succeeded
pub fn is_initialized() -> bool {
    LIBRARY.get().is_some()
}

/// The operating system's signing library
#[derive(Debug, Clone, Copy)]
pub struct NativePlatform {
    #[cfg(target_os = "windows")]
    library: &'static windows::NativeLibrary,
    #[cfg(not(target_os = "windows"))]
    _unavailable: (),
}

impl NativePlatform {
    /// Handle to the loaded library
    #[cfg(target_os = "windows")]
    pub fn get() -> Result<Self> {
        LIBRARY
            .get()
            .map(|library| Self { library })
            .ok_or(SigningError::NotInitialized)
    }

    /// Handle to the loaded library
    #[cfg(not(target_os = "windows"))]
    pub fn get() -> Result<Self> {
        Err(SigningError::UnsupportedPlatform)
    }
}

#[cfg(target_os = "windows")]
impl EnvelopePlatform for NativePlatform {
    type Handle = windows::WindowsHandle;

    fn produce_envelope(&self, invocation: &EnvelopeInvocation<'_>) -> EnvelopeReturn<Self::Handle> {
        self.library.sign(invocation)
    }
}

/// Handle type of a platform that can never return one
#[derive(Debug)]
pub enum NoHandle {}

impl NativeHandle for NoHandle {
    fn release(self) {
        match self {}
    }
}

#[cfg(not(target_os = "windows"))]
impl EnvelopePlatform for NativePlatform {
    type Handle = NoHandle;

    fn produce_envelope(&self, _: &EnvelopeInvocation<'_>) -> EnvelopeReturn<Self::Handle> {
        EnvelopeReturn::status(E_NOTIMPL)
    }
}
