//! Signing options shared by the commands

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rebundle_core::config::{load_config, load_config_or_default, validate_config, Config};
use rebundle_core::EngineSigner;
use rebundle_signing::certificate::load_certificates;
use rebundle_signing::{
    platform, AuthenticodeEngine, KeyVaultClient, LocalKeySigner, NativePlatform, SigningError,
    SigningIdentity,
};

/// Key, certificate and signature options
#[derive(Debug, Clone, Default, Args)]
pub struct SigningArgs {
    /// Configuration file (searched for in the working directory otherwise)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Key Vault URL
    #[arg(long, env = "REBUNDLE_KEY_VAULT_URL")]
    pub key_vault_url: Option<String>,

    /// Key Vault certificate name
    #[arg(long)]
    pub certificate_name: Option<String>,

    /// Key Vault certificate version (latest when omitted)
    #[arg(long)]
    pub certificate_version: Option<String>,

    /// Environment variable holding the Key Vault bearer token
    #[arg(long)]
    pub access_token_env: Option<String>,

    /// Local signing certificate (PEM or DER)
    #[arg(long, requires = "private_key", conflicts_with = "key_vault_url")]
    pub certificate: Option<PathBuf>,

    /// Local PKCS#8 private key (PEM or DER)
    #[arg(long, requires = "certificate")]
    pub private_key: Option<PathBuf>,

    /// File digest algorithm (sha256, sha384, sha512)
    #[arg(long)]
    pub digest: Option<String>,

    /// RFC 3161 timestamp server URL
    #[arg(long, value_name = "URL", conflicts_with = "timestamp_authenticode")]
    pub timestamp_rfc3161: Option<String>,

    /// Legacy Authenticode timestamp server URL
    #[arg(long, value_name = "URL")]
    pub timestamp_authenticode: Option<String>,

    /// Digest algorithm for RFC 3161 timestamp requests
    #[arg(long)]
    pub timestamp_digest: Option<String>,

    /// Signature description
    #[arg(short, long)]
    pub description: Option<String>,

    /// Signature description URL
    #[arg(long)]
    pub description_url: Option<String>,

    /// Page hashing (on, off, default)
    #[arg(long)]
    pub page_hashing: Option<String>,

    /// Extra certificates offered to chain building
    #[arg(long, num_args = 1..)]
    pub additional_certificates: Vec<PathBuf>,
}

impl SigningArgs {
    /// Load the configuration file and apply command-line overrides
    ///
    /// Validation is left to the caller so that command-specific overrides
    /// can be applied first.
    pub fn load_config(&self, cwd: &Path) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => {
                let (config, path) = load_config_or_default(cwd)?;
                match path {
                    Some(path) => debug!(path = %path.display(), "loaded configuration"),
                    None => warn!("No configuration file found, using defaults"),
                }
                config
            }
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut Config) {
        let key = &mut config.key;
        if self.certificate.is_some() {
            key.source = "local".to_string();
            key.certificate_path = self.certificate.clone();
            key.private_key_path = self.private_key.clone();
        }
        if let Some(url) = &self.key_vault_url {
            key.source = "key_vault".to_string();
            key.vault_url = Some(url.clone());
        }
        override_opt(&mut key.certificate_name, &self.certificate_name);
        override_opt(&mut key.certificate_version, &self.certificate_version);
        if let Some(env) = &self.access_token_env {
            key.access_token_env = env.clone();
        }

        let signing = &mut config.signing;
        if let Some(digest) = &self.digest {
            signing.digest = digest.clone();
        }
        if let Some(url) = &self.timestamp_rfc3161 {
            signing.timestamp = Some("rfc3161".to_string());
            signing.timestamp_url = Some(url.clone());
        }
        if let Some(url) = &self.timestamp_authenticode {
            signing.timestamp = Some("authenticode".to_string());
            signing.timestamp_url = Some(url.clone());
        }
        override_opt(&mut signing.timestamp_digest, &self.timestamp_digest);
        override_opt(&mut signing.description, &self.description);
        override_opt(&mut signing.description_url, &self.description_url);
        if let Some(page_hashing) = &self.page_hashing {
            signing.page_hashing = page_hashing.clone();
        }
        if !self.additional_certificates.is_empty() {
            signing.additional_certificates = self.additional_certificates.clone();
        }
    }
}

fn override_opt(target: &mut Option<String>, value: &Option<String>) {
    if value.is_some() {
        *target = value.clone();
    }
}

/// Validate `config` and build the signer it describes
///
/// Blocking: fetching a Key Vault certificate goes over the network, and the
/// Key Vault client must be built and dropped outside the async runtime.
pub fn build_signer(config: &Config) -> anyhow::Result<EngineSigner<NativePlatform>> {
    validate_config(config)?;

    let signing = &config.signing;
    let digest = signing.digest_algorithm()?;
    let timestamp = signing.timestamp_policy()?;
    let page_hashing = signing.page_hashing()?;

    platform::initialize()?;
    let native = NativePlatform::get()?;

    let identity = build_identity(config, digest)?;
    info!(subject = identity.subject(), key = %identity.key_kind(), "Using signing identity");

    let mut additional = Vec::new();
    for path in &signing.additional_certificates {
        additional.extend(load_certificates(path)?);
    }

    let engine = AuthenticodeEngine::new(native, identity)
        .with_timestamp(timestamp)
        .with_additional_certificates(additional);

    Ok(EngineSigner::new(engine)
        .with_description(signing.description.clone())
        .with_description_url(signing.description_url.clone())
        .with_page_hashing(page_hashing))
}

fn build_identity(
    config: &Config,
    digest: rebundle_signing::DigestAlgorithm,
) -> anyhow::Result<SigningIdentity> {
    let key = &config.key;
    match key.source.to_lowercase().as_str() {
        "local" | "file" => {
            let (Some(cert_path), Some(key_path)) = (&key.certificate_path, &key.private_key_path)
            else {
                return Err(SigningError::Configuration(
                    "local keys need a certificate and a private key".to_string(),
                )
                .into());
            };
            let certificate = load_certificates(cert_path)?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    SigningError::Configuration(format!(
                        "no certificate in {}",
                        cert_path.display()
                    ))
                })?;
            let signer = LocalKeySigner::load(key_path)?;
            Ok(SigningIdentity::new(Arc::new(signer), certificate, digest)?)
        }
        _ => {
            let (Some(vault_url), Some(name)) = (&key.vault_url, &key.certificate_name) else {
                return Err(SigningError::Configuration(
                    "Key Vault keys need a vault URL and a certificate name".to_string(),
                )
                .into());
            };
            let client = KeyVaultClient::from_env(vault_url, &key.access_token_env)?;
            let certificate =
                client.fetch_certificate(name, key.certificate_version.as_deref())?;
            let signer = client.signer(&certificate)?;
            debug!(key_id = signer.key_id(), "Fetched Key Vault certificate");
            Ok(SigningIdentity::new(
                Arc::new(signer),
                certificate.certificate,
                digest,
            )?)
        }
    }
}

/// Cancellation token raised by Ctrl-C
///
/// Must be called from within the runtime.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested; stopping at the next stage boundary");
            cancel.cancel();
        }
    });
    token
}
