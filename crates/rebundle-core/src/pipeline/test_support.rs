//! Pipeline fakes shared by tests

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use rebundle_signing::platform::E_FAIL;
use rebundle_signing::{PageHashing, SignOutcome, SigningError, SubjectKind};

use super::signer::FileSigner;

/// Records every file it is asked to sign; fails files whose name contains
/// the configured marker
#[derive(Debug, Default)]
pub(crate) struct FakeSigner {
    fail_on: Option<String>,
    panic_on: Option<String>,
    cancel_while_signing: Option<CancellationToken>,
    calls: Mutex<Vec<PathBuf>>,
}

impl FakeSigner {
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_on: Some(marker.to_string()),
            ..Default::default()
        }
    }

    pub fn panicking_on(marker: &str) -> Self {
        Self {
            panic_on: Some(marker.to_string()),
            ..Default::default()
        }
    }

    /// Cancels `token` from inside every signing
    pub fn cancelling(token: CancellationToken) -> Self {
        Self {
            cancel_while_signing: Some(token),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }

    pub fn signed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .calls()
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}

impl FileSigner for FakeSigner {
    fn sign_file(&self, path: &Path) -> Result<SignOutcome, SigningError> {
        self.calls.lock().unwrap().push(path.to_path_buf());

        if let Some(token) = &self.cancel_while_signing {
            token.cancel();
        }

        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        if self.panic_on.as_deref().is_some_and(|marker| name.contains(marker)) {
            panic!("native frame blew up on {}", name);
        }
        if self.fail_on.as_deref().is_some_and(|marker| name.contains(marker)) {
            return Err(SigningError::NativeSigningFailure {
                path: path.to_path_buf(),
                status: E_FAIL as u32,
            });
        }

        Ok(SignOutcome {
            status: 0,
            subject_kind: SubjectKind::classify(path),
            page_hashing: PageHashing::Disabled,
            page_hashing_overridden: false,
            callback_invocations: 1,
            callback_error: None,
        })
    }

    fn subject(&self) -> &str {
        "CN=Fake Publisher, O=Contoso"
    }
}
