//! Timestamp counter-signature policy

use std::ffi::CString;

use crate::digest::DigestAlgorithm;
use crate::error::{Result, SigningError};
use crate::platform::WideString;

/// Platform flag requesting a legacy Authenticode timestamp
pub const SIGNER_TIMESTAMP_AUTHENTICODE: u32 = 1;

/// Platform flag requesting an RFC 3161 timestamp
pub const SIGNER_TIMESTAMP_RFC3161: u32 = 2;

/// Whether and how the signature is counter-signed by a timestamp authority
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TimestampPolicy {
    /// No timestamp
    #[default]
    None,
    /// Legacy Authenticode timestamp server
    LegacyAuthenticode { url: String },
    /// RFC 3161 timestamp authority
    Rfc3161 { url: String, digest: DigestAlgorithm },
}

impl TimestampPolicy {
    /// URL of the timestamp authority, if any
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::LegacyAuthenticode { url } | Self::Rfc3161 { url, .. } => Some(url),
        }
    }

    /// Null-terminated fields handed to the native call
    pub(crate) fn native_fields(&self) -> Result<TimestampFields> {
        match self {
            Self::None => Ok(TimestampFields::default()),
            Self::LegacyAuthenticode { url } => Ok(TimestampFields {
                flags: SIGNER_TIMESTAMP_AUTHENTICODE,
                url: Some(WideString::new(url)?),
                algorithm_oid: None,
            }),
            Self::Rfc3161 { url, digest } => Ok(TimestampFields {
                flags: SIGNER_TIMESTAMP_RFC3161,
                url: Some(WideString::new(url)?),
                algorithm_oid: Some(CString::new(digest.oid()).map_err(|e| {
                    SigningError::InvalidArgument(format!("timestamp digest OID: {}", e))
                })?),
            }),
        }
    }
}

/// Timestamp portion of a native signing invocation
#[derive(Debug, Default)]
pub struct TimestampFields {
    /// `SIGNER_TIMESTAMP_*` flags, zero for no timestamp
    pub flags: u32,
    /// Timestamp authority URL
    pub url: Option<WideString>,
    /// Digest OID for RFC 3161 requests
    pub algorithm_oid: Option<CString>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_has_no_fields() {
        let fields = TimestampPolicy::None.native_fields().unwrap();
        assert_eq!(fields.flags, 0);
        assert!(fields.url.is_none());
        assert!(fields.algorithm_oid.is_none());
    }

    #[test]
    fn test_rfc3161_fields() {
        let policy = TimestampPolicy::Rfc3161 {
            url: "http://timestamp.example.com".to_string(),
            digest: DigestAlgorithm::Sha384,
        };
        let fields = policy.native_fields().unwrap();
        assert_eq!(fields.flags, SIGNER_TIMESTAMP_RFC3161);
        assert_eq!(
            fields.url.unwrap().to_string_lossy(),
            "http://timestamp.example.com"
        );
        assert_eq!(
            fields.algorithm_oid.unwrap().to_str().unwrap(),
            "2.16.840.1.101.3.4.2.2"
        );
    }

    #[test]
    fn test_legacy_fields() {
        let policy = TimestampPolicy::LegacyAuthenticode {
            url: "http://legacy.example.com".to_string(),
        };
        let fields = policy.native_fields().unwrap();
        assert_eq!(fields.flags, SIGNER_TIMESTAMP_AUTHENTICODE);
        assert!(fields.algorithm_oid.is_none());
        assert_eq!(policy.url(), Some("http://legacy.example.com"));
    }
}
