//! Error types for rebundle

use std::path::PathBuf;
use thiserror::Error;

use rebundle_signing::SigningError;

/// Result type alias using ResignError
pub type Result<T> = std::result::Result<T, ResignError>;

/// Main error type for rebundle operations
#[derive(Debug, Error)]
pub enum ResignError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Bundle or member archive errors
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Signing setup errors
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// A required external tool is not installed
    #[error("Tool not found: {tool}. {hint}")]
    ToolNotFound { tool: String, hint: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// Missing required field
    #[error("Missing required configuration field: {0}")]
    MissingField(String),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Archive-related errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive could not be read or written
    #[error("Archive error in {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// An entry would be written outside the staging directory
    #[error("Unsafe entry path in {archive}: {entry}")]
    UnsafeEntry { archive: PathBuf, entry: String },

    /// The bundle holds no member packages
    #[error("No member packages found in {0}")]
    NoMembers(PathBuf),

    /// A required entry is missing
    #[error("{entry} not found in {archive}")]
    MissingEntry { archive: PathBuf, entry: String },

    /// IO error while staging
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Wrap a zip error with the archive it came from
    pub fn zip(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.into(),
            source,
        }
    }
}
