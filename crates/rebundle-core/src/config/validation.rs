//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_signing(config)?;
    validate_key(config)?;
    validate_pipeline(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_signing(config: &Config) -> Result<()> {
    let signing = &config.signing;
    signing.digest_algorithm()?;
    signing.page_hashing()?;

    let valid_modes = ["none", "authenticode", "legacy", "rfc3161"];
    let mode = signing.timestamp_mode().to_lowercase();
    if !valid_modes.contains(&mode.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "signing.timestamp".to_string(),
            message: format!("must be one of: {}", valid_modes.join(", ")),
        }
        .into());
    }

    if mode != "none" && signing.timestamp_url.as_deref().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidValue {
            field: "signing.timestamp_url".to_string(),
            message: format!("required for {} timestamps", mode),
        }
        .into());
    }

    signing.timestamp_policy()?;
    Ok(())
}

fn validate_key(config: &Config) -> Result<()> {
    let key = &config.key;
    match key.source.to_lowercase().as_str() {
        "key_vault" | "keyvault" | "azure" => {
            if key.vault_url.as_deref().map_or(true, str::is_empty) {
                return Err(required("key.vault_url", "Key Vault"));
            }
            if key.certificate_name.as_deref().map_or(true, str::is_empty) {
                return Err(required("key.certificate_name", "Key Vault"));
            }
            if key.access_token_env.is_empty() {
                return Err(required("key.access_token_env", "Key Vault"));
            }
        }
        "local" | "file" => {
            if key.certificate_path.is_none() {
                return Err(required("key.certificate_path", "local"));
            }
            if key.private_key_path.is_none() {
                return Err(required("key.private_key_path", "local"));
            }
        }
        _ => {
            return Err(ConfigError::InvalidValue {
                field: "key.source".to_string(),
                message: "must be one of: key_vault, local".to_string(),
            }
            .into())
        }
    }
    Ok(())
}

fn validate_pipeline(config: &Config) -> Result<()> {
    config.pipeline.failure_policy()?;

    let valid_thresholds = ["any", "all"];
    if !valid_thresholds.contains(&config.pipeline.failure_threshold.to_lowercase().as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "pipeline.failure_threshold".to_string(),
            message: format!("must be one of: {}", valid_thresholds.join(", ")),
        }
        .into());
    }

    if config.pipeline.tool_timeout_secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: "pipeline.tool_timeout_secs".to_string(),
            message: "timeout must be greater than zero".to_string(),
        }
        .into());
    }

    if config.pipeline.publisher.as_deref().is_some_and(str::is_empty) {
        return Err(ConfigError::InvalidValue {
            field: "pipeline.publisher".to_string(),
            message: "publisher cannot be empty".to_string(),
        }
        .into());
    }

    Ok(())
}

fn required(field: &str, source: &str) -> crate::error::ResignError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("required for {} keys", source),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn key_vault_config() -> Config {
        let mut config = Config::default();
        config.key.vault_url = Some("https://vault.example.com".to_string());
        config.key.certificate_name = Some("codesign".to_string());
        config
    }

    fn assert_invalid_field(config: &Config, expected: &str) {
        match validate_config(config) {
            Err(crate::error::ResignError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, expected)
            }
            other => panic!("expected invalid {}, got {:?}", expected, other),
        }
    }

    #[test]
    fn test_valid_key_vault_config() {
        assert!(validate_config(&key_vault_config()).is_ok());
    }

    #[test]
    fn test_default_config_needs_a_key() {
        assert_invalid_field(&Config::default(), "key.vault_url");
    }

    #[test]
    fn test_local_key_requires_paths() {
        let mut config = Config::default();
        config.key.source = "local".to_string();
        config.key.certificate_path = Some(PathBuf::from("cert.pem"));
        assert_invalid_field(&config, "key.private_key_path");

        config.key.private_key_path = Some(PathBuf::from("key.pem"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_unknown_digest() {
        let mut config = key_vault_config();
        config.signing.digest = "md5".to_string();
        assert_invalid_field(&config, "signing.digest");
    }

    #[test]
    fn test_unknown_page_hashing() {
        let mut config = key_vault_config();
        config.signing.page_hashing = "sometimes".to_string();
        assert_invalid_field(&config, "signing.page_hashing");
    }

    #[test]
    fn test_timestamp_mode_requires_url() {
        let mut config = key_vault_config();
        config.signing.timestamp = Some("authenticode".to_string());
        assert_invalid_field(&config, "signing.timestamp_url");

        config.signing.timestamp = Some("notary".to_string());
        config.signing.timestamp_url = Some("http://ts.example.com".to_string());
        assert_invalid_field(&config, "signing.timestamp");
    }

    #[test]
    fn test_zero_timeout() {
        let mut config = key_vault_config();
        config.pipeline.tool_timeout_secs = 0;
        assert_invalid_field(&config, "pipeline.tool_timeout_secs");
    }

    #[test]
    fn test_unknown_threshold_even_without_continue() {
        let mut config = key_vault_config();
        config.pipeline.failure_threshold = "most".to_string();
        assert_invalid_field(&config, "pipeline.failure_threshold");
    }
}
