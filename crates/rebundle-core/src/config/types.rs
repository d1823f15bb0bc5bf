//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use rebundle_signing::keyvault::DEFAULT_ACCESS_TOKEN_ENV;
use rebundle_signing::{DigestAlgorithm, PageHashing, TimestampPolicy};

use crate::error::{ConfigError, Result};
use crate::pipeline::{FailurePolicy, FailureThreshold};

use super::defaults::DEFAULT_TOOL_TIMEOUT_SECS;

/// Main configuration for rebundle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Signature settings
    pub signing: SigningSettings,

    /// Where the signing key lives
    pub key: KeyConfig,

    /// Resign pipeline settings
    pub pipeline: PipelineConfig,
}

/// Signature settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningSettings {
    /// File digest algorithm (sha256, sha384, sha512; sha1 for legacy use)
    pub digest: String,

    /// Timestamp mode (none, authenticode, rfc3161)
    pub timestamp: Option<String>,

    /// Timestamp authority URL
    pub timestamp_url: Option<String>,

    /// Digest algorithm for RFC 3161 requests, defaults to `digest`
    pub timestamp_digest: Option<String>,

    /// Signature description
    pub description: Option<String>,

    /// Signature description URL
    pub description_url: Option<String>,

    /// Page hashing (on, off, default)
    pub page_hashing: String,

    /// Extra certificates (PEM or DER) offered to chain building
    pub additional_certificates: Vec<PathBuf>,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            digest: "sha256".to_string(),
            timestamp: None,
            timestamp_url: None,
            timestamp_digest: None,
            description: None,
            description_url: None,
            page_hashing: "default".to_string(),
            additional_certificates: Vec::new(),
        }
    }
}

impl SigningSettings {
    /// Parsed file digest algorithm
    pub fn digest_algorithm(&self) -> Result<DigestAlgorithm> {
        Ok(self
            .digest
            .parse()
            .map_err(|_| invalid("signing.digest", &self.digest))?)
    }

    /// Parsed page hashing preference
    pub fn page_hashing(&self) -> Result<PageHashing> {
        Ok(self
            .page_hashing
            .parse()
            .map_err(|_| invalid("signing.page_hashing", &self.page_hashing))?)
    }

    /// Effective timestamp mode; rfc3161 when only a URL is given
    pub fn timestamp_mode(&self) -> &str {
        match (&self.timestamp, &self.timestamp_url) {
            (Some(mode), _) => mode.as_str(),
            (None, Some(_)) => "rfc3161",
            (None, None) => "none",
        }
    }

    /// Build the timestamp policy
    pub fn timestamp_policy(&self) -> Result<TimestampPolicy> {
        let url = || {
            self.timestamp_url
                .clone()
                .ok_or_else(|| ConfigError::MissingField("signing.timestamp_url".to_string()))
        };

        match self.timestamp_mode().to_lowercase().as_str() {
            "none" => Ok(TimestampPolicy::None),
            "authenticode" | "legacy" => Ok(TimestampPolicy::LegacyAuthenticode { url: url()? }),
            "rfc3161" => {
                let digest = match &self.timestamp_digest {
                    Some(name) => name
                        .parse()
                        .map_err(|_| invalid("signing.timestamp_digest", name))?,
                    None => self.digest_algorithm()?,
                };
                Ok(TimestampPolicy::Rfc3161 { url: url()?, digest })
            }
            other => Err(invalid("signing.timestamp", other).into()),
        }
    }
}

/// Key location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Key source (key_vault, local)
    pub source: String,

    /// Key Vault base URL
    pub vault_url: Option<String>,

    /// Key Vault certificate name
    pub certificate_name: Option<String>,

    /// Key Vault certificate version, latest when absent
    pub certificate_version: Option<String>,

    /// Environment variable holding the Key Vault bearer token
    pub access_token_env: String,

    /// Local signing certificate (PEM or DER)
    pub certificate_path: Option<PathBuf>,

    /// Local PKCS#8 private key (PEM or DER)
    pub private_key_path: Option<PathBuf>,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            source: "key_vault".to_string(),
            vault_url: None,
            certificate_name: None,
            certificate_version: None,
            access_token_env: DEFAULT_ACCESS_TOKEN_ENV.to_string(),
            certificate_path: None,
            private_key_path: None,
        }
    }
}

/// Resign pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Identity written into every member manifest; the signing
    /// certificate's subject when absent
    pub publisher: Option<String>,

    /// Keep signing remaining members after a failure
    pub continue_on_error: bool,

    /// When continuing on error, what fails the stage (any, all)
    pub failure_threshold: String,

    /// Concurrent member signings; unbounded when absent, system default
    /// when zero or negative
    pub max_degree_of_parallelism: Option<i64>,

    /// Explicit packaging tool path
    pub packaging_tool: Option<PathBuf>,

    /// Packaging tool timeout in seconds
    pub tool_timeout_secs: u64,

    /// Parent directory for the staging directory
    pub work_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            publisher: None,
            continue_on_error: false,
            failure_threshold: "all".to_string(),
            max_degree_of_parallelism: None,
            packaging_tool: None,
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            work_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Failure policy for the member stages
    pub fn failure_policy(&self) -> Result<FailurePolicy> {
        if !self.continue_on_error {
            return Ok(FailurePolicy::FailFast);
        }
        let threshold = match self.failure_threshold.to_lowercase().as_str() {
            "any" => FailureThreshold::AnyFailed,
            "all" => FailureThreshold::AllFailed,
            other => return Err(invalid("pipeline.failure_threshold", other).into()),
        };
        Ok(FailurePolicy::ContinueOnError { threshold })
    }
}

fn invalid(field: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("unrecognised value '{}'", value),
    }
}
