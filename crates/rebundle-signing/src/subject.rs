//! Subject kind dispatch
//!
//! The platform signs each file format through a fixed subject interface
//! package. Only two shapes matter here: plain files (PE images, scripts,
//! cabinets...) and app packages, which need a nested parameter block and
//! never carry page hashes.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Include page hashes in the signature (PE only)
pub const SPC_INC_PE_PAGE_HASHES_FLAG: u32 = 0x100;

/// Exclude page hashes from the signature
pub const SPC_EXC_PE_PAGE_HASHES_FLAG: u32 = 0x200;

const PACKAGE_EXTENSIONS: &[&str] = &[
    "appx",
    "appxbundle",
    "eappx",
    "eappxbundle",
    "msix",
    "msixbundle",
    "emsix",
    "emsixbundle",
];

/// File format family, as far as the signing platform is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    /// A file signed in place through the generic file-info block
    FlatExecutable,
    /// An app package or bundle archive
    StructuredPackage,
}

impl SubjectKind {
    /// Classify a file by its extension
    pub fn classify(path: &Path) -> Self {
        let is_package = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| PACKAGE_EXTENSIONS.iter().any(|p| p.eq_ignore_ascii_case(ext)));

        if is_package {
            Self::StructuredPackage
        } else {
            Self::FlatExecutable
        }
    }
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FlatExecutable => write!(f, "flat executable"),
            Self::StructuredPackage => write!(f, "structured package"),
        }
    }
}

/// Caller preference for page hashing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageHashing {
    /// Ask for page hashes
    Enabled,
    /// Ask for no page hashes
    Disabled,
    /// Let the platform decide
    #[default]
    PlatformDefault,
}

impl PageHashing {
    fn flags(&self) -> u32 {
        match self {
            Self::Enabled => SPC_INC_PE_PAGE_HASHES_FLAG,
            Self::Disabled => SPC_EXC_PE_PAGE_HASHES_FLAG,
            Self::PlatformDefault => 0,
        }
    }
}

impl std::str::FromStr for PageHashing {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "on" | "true" | "enabled" => Ok(Self::Enabled),
            "off" | "false" | "disabled" => Ok(Self::Disabled),
            "default" | "platform_default" => Ok(Self::PlatformDefault),
            _ => Err(format!("Unknown page hashing mode: {}", s)),
        }
    }
}

/// Parameter block shape the native call needs for a subject kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterBlock {
    /// Plain file-info subject
    FileInfo,
    /// Nested package block carrying signer, certificate, signature,
    /// timestamp and callback pointers
    PackageClientData,
}

/// Effective configuration for one signing call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectConfiguration {
    /// Classified subject kind
    pub kind: SubjectKind,
    /// Page hashing actually requested from the platform
    pub page_hashing: PageHashing,
    /// Whether the caller asked for page hashing and it was switched off
    pub page_hashing_overridden: bool,
    /// `dwFlags` for the native call
    pub flags: u32,
    /// Native parameter block to populate
    pub block: ParameterBlock,
}

impl SubjectConfiguration {
    /// Resolve the configuration for `path` under the caller's preference
    pub fn resolve(path: &Path, requested: PageHashing) -> Self {
        Self::for_kind(SubjectKind::classify(path), requested)
    }

    /// Resolve the configuration for an already classified subject
    pub fn for_kind(kind: SubjectKind, requested: PageHashing) -> Self {
        match kind {
            SubjectKind::FlatExecutable => Self {
                kind,
                page_hashing: requested,
                page_hashing_overridden: false,
                flags: requested.flags(),
                block: ParameterBlock::FileInfo,
            },
            SubjectKind::StructuredPackage => Self {
                kind,
                page_hashing: PageHashing::Disabled,
                page_hashing_overridden: requested == PageHashing::Enabled,
                flags: requested.flags() & !SPC_INC_PE_PAGE_HASHES_FLAG,
                block: ParameterBlock::PackageClientData,
            },
        }
    }
}
