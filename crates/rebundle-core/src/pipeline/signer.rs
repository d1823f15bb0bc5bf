//! File signing seam used by the pipeline

use std::path::Path;

use rebundle_signing::{
    AuthenticodeEngine, EnvelopePlatform, PageHashing, SignOutcome, SignRequest, SigningError,
};

/// Signs one file in place
///
/// Blocking; the pipeline calls it from a blocking worker thread.
pub trait FileSigner: Send + Sync {
    /// Sign `path`, failing on any non-zero platform status
    fn sign_file(&self, path: &Path) -> Result<SignOutcome, SigningError>;

    /// Subject of the signing certificate
    fn subject(&self) -> &str;
}

/// [`FileSigner`] backed by the Authenticode engine
#[derive(Debug)]
pub struct EngineSigner<P> {
    engine: AuthenticodeEngine<P>,
    description: Option<String>,
    description_url: Option<String>,
    page_hashing: PageHashing,
}

impl<P: EnvelopePlatform> EngineSigner<P> {
    /// Wrap an engine; no description, platform page hashing default
    pub fn new(engine: AuthenticodeEngine<P>) -> Self {
        Self {
            engine,
            description: None,
            description_url: None,
            page_hashing: PageHashing::default(),
        }
    }

    /// Description embedded in every signature
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Description URL embedded in every signature
    pub fn with_description_url(mut self, url: Option<String>) -> Self {
        self.description_url = url;
        self
    }

    /// Page hashing preference for every file
    pub fn with_page_hashing(mut self, page_hashing: PageHashing) -> Self {
        self.page_hashing = page_hashing;
        self
    }

    /// The wrapped engine
    pub fn engine(&self) -> &AuthenticodeEngine<P> {
        &self.engine
    }

    fn request(&self, path: &Path) -> SignRequest {
        let mut request = SignRequest::new(path).with_page_hashing(self.page_hashing);
        if let Some(description) = &self.description {
            request = request.with_description(description.clone());
        }
        if let Some(url) = &self.description_url {
            request = request.with_description_url(url.clone());
        }
        request
    }
}

impl<P: EnvelopePlatform> FileSigner for EngineSigner<P> {
    fn sign_file(&self, path: &Path) -> Result<SignOutcome, SigningError> {
        self.engine.sign(&self.request(path))?.into_result(path)
    }

    fn subject(&self) -> &str {
        self.engine.identity().subject()
    }
}
