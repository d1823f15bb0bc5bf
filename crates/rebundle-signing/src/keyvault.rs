//! Azure Key Vault remote key capability
//!
//! The private key never leaves the vault: the callback's digest is sent to
//! the key's `sign` operation and the raw signature comes back. Acquiring the
//! bearer token is the caller's business; the client only reads it from an
//! environment variable.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;
use x509_cert::der::Decode;
use x509_cert::Certificate;

use crate::certificate::certificate_key_kind;
use crate::digest::DigestAlgorithm;
use crate::error::{Result, SigningError};
use crate::keys::{AsymmetricSigner, KeyKind, SignatureScheme};

/// REST API version used for every request
pub const API_VERSION: &str = "7.4";

/// Environment variable read for the bearer token when none is configured
pub const DEFAULT_ACCESS_TOKEN_ENV: &str = "REBUNDLE_ACCESS_TOKEN";

#[derive(Debug, Deserialize)]
struct CertificateBundle {
    cer: String,
    kid: String,
}

#[derive(Debug, Serialize)]
struct SignRequestBody<'a> {
    alg: &'a str,
    value: String,
}

#[derive(Debug, Deserialize)]
struct KeyOperationResult {
    value: String,
}

/// Public half of a vault certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVaultCertificate {
    /// DER-encoded certificate
    pub certificate: Vec<u8>,
    /// Identifier of the key backing the certificate
    pub key_id: String,
}

/// Minimal blocking Key Vault client
#[derive(Clone)]
pub struct KeyVaultClient {
    client: reqwest::blocking::Client,
    vault_url: String,
    token: String,
}

impl KeyVaultClient {
    /// Client for `vault_url` authenticating with `token`
    pub fn new(vault_url: &str, token: impl Into<String>) -> Result<Self> {
        let vault_url = vault_url.trim_end_matches('/').to_string();
        if !vault_url.starts_with("https://") {
            return Err(SigningError::Configuration(format!(
                "Key Vault URL must use https: {}",
                vault_url
            )));
        }

        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("rebundle/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            vault_url,
            token: token.into(),
        })
    }

    /// Client whose bearer token is read from the environment variable `env_var`
    pub fn from_env(vault_url: &str, env_var: &str) -> Result<Self> {
        let token = std::env::var(env_var)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                SigningError::Configuration(format!(
                    "No Key Vault access token: set {} to a bearer token",
                    env_var
                ))
            })?;
        Self::new(vault_url, token)
    }

    /// Vault base URL, without trailing slash
    pub fn vault_url(&self) -> &str {
        &self.vault_url
    }

    /// Download a certificate and the identifier of its key
    pub fn fetch_certificate(&self, name: &str, version: Option<&str>) -> Result<KeyVaultCertificate> {
        let url = certificate_url(&self.vault_url, name, version);
        let bundle: CertificateBundle = self.request(reqwest::Method::GET, &url, None)?;

        Ok(KeyVaultCertificate {
            certificate: STANDARD.decode(bundle.cer.trim())?,
            key_id: bundle.kid,
        })
    }

    /// Remote signer for the key behind `certificate`
    pub fn signer(&self, certificate: &KeyVaultCertificate) -> Result<KeyVaultSigner> {
        let cert = Certificate::from_der(&certificate.certificate).map_err(|e| {
            SigningError::Configuration(format!("Key Vault returned a malformed certificate: {}", e))
        })?;

        Ok(KeyVaultSigner {
            client: self.clone(),
            key_id: certificate.key_id.clone(),
            key_kind: certificate_key_kind(&cert),
        })
    }

    fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .header("Authorization", format!("Bearer {}", self.token));

        if let Some(body) = body {
            request = request.json(&body);
        }

        debug!("Making {} request to {}", method, url);

        let response = request.send()?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().unwrap_or_default();
            return Err(SigningError::KeyVault(format!(
                "{} {} returned {}: {}",
                method,
                url,
                status.as_u16(),
                error_text
            )));
        }

        Ok(response.json()?)
    }
}

impl std::fmt::Debug for KeyVaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVaultClient")
            .field("vault_url", &self.vault_url)
            .finish_non_exhaustive()
    }
}

/// Key capability backed by a Key Vault key
#[derive(Debug, Clone)]
pub struct KeyVaultSigner {
    client: KeyVaultClient,
    key_id: String,
    key_kind: KeyKind,
}

impl KeyVaultSigner {
    /// Identifier of the vault key
    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

impl AsymmetricSigner for KeyVaultSigner {
    fn key_kind(&self) -> KeyKind {
        self.key_kind.clone()
    }

    fn sign_digest(&self, scheme: SignatureScheme, digest: &[u8]) -> Result<Vec<u8>> {
        let alg = signing_algorithm(scheme)?;
        let body = serde_json::to_value(SignRequestBody {
            alg,
            value: URL_SAFE_NO_PAD.encode(digest),
        })?;

        let url = sign_url(&self.key_id);
        let result: KeyOperationResult = self.client.request(reqwest::Method::POST, &url, Some(body))?;

        Ok(URL_SAFE_NO_PAD.decode(result.value.trim_end_matches('='))?)
    }
}

/// Key Vault JWA name for a signature scheme
pub fn signing_algorithm(scheme: SignatureScheme) -> Result<&'static str> {
    match scheme {
        SignatureScheme::RsaPkcs1v15(DigestAlgorithm::Sha256) => Ok("RS256"),
        SignatureScheme::RsaPkcs1v15(DigestAlgorithm::Sha384) => Ok("RS384"),
        SignatureScheme::RsaPkcs1v15(DigestAlgorithm::Sha512) => Ok("RS512"),
        SignatureScheme::Ecdsa(DigestAlgorithm::Sha256) => Ok("ES256"),
        SignatureScheme::Ecdsa(DigestAlgorithm::Sha384) => Ok("ES384"),
        SignatureScheme::Ecdsa(DigestAlgorithm::Sha512) => Ok("ES512"),
        other => Err(SigningError::KeyVault(format!(
            "Key Vault cannot sign {} digests",
            other.digest()
        ))),
    }
}

fn certificate_url(vault_url: &str, name: &str, version: Option<&str>) -> String {
    match version {
        Some(version) => format!(
            "{}/certificates/{}/{}?api-version={}",
            vault_url, name, version, API_VERSION
        ),
        None => format!("{}/certificates/{}?api-version={}", vault_url, name, API_VERSION),
    }
}

fn sign_url(key_id: &str) -> String {
    format!("{}/sign?api-version={}", key_id.trim_end_matches('/'), API_VERSION)
}
