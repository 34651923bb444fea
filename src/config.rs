//! Configuration for signing operations.
//!
//! [`SignerConfig`] is a plain struct with defaults and `with_*` builders. It
//! can also be loaded from JSON; missing keys keep their defaults:
//!
//! ```
//! use pdf_seal::config::SignerConfig;
//!
//! let config = SignerConfig::from_json_str(r#"{ "reason": "Approved", "embed_timestamp": true,
//!     "tsa_url": "http://tsa.example/tsr" }"#)?;
//! assert_eq!(config.reason.as_deref(), Some("Approved"));
//! assert_eq!(config.retry_count, 2);
//! # Ok::<(), pdf_seal::error::Error>(())
//! ```

use crate::error::{Error, Result};
use crate::signatures::{DigestAlgorithm, SignatureAppearance, SignatureSubFilter};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest container estimate accepted, in bytes.
const MAX_ESTIMATED_CONTAINER_SIZE: usize = 16 * 1024 * 1024;

/// Signing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Digest used for the byte range and the signed attributes.
    pub digest_algorithm: DigestAlgorithm,

    /// Upper bound of the DER container in bytes; `0` derives one from the
    /// enabled options.
    pub estimated_container_size: usize,

    /// Embed CRLs for the chain.
    pub embed_crl: bool,

    /// Embed OCSP responses for the chain.
    pub embed_ocsp: bool,

    /// Attach an RFC 3161 signature timestamp.
    pub embed_timestamp: bool,

    /// Fail when revocation evidence cannot be collected.
    pub revocation_policy_fatal: bool,

    /// Fail when no trusted timestamp can be obtained.
    pub timestamp_policy_fatal: bool,

    /// Per-request network timeout in milliseconds.
    pub network_timeout: u64,

    /// Retries after the first failed network attempt.
    pub retry_count: u32,

    /// Initial retry backoff in milliseconds, doubled on each retry.
    pub retry_backoff: u64,

    /// Fully qualified name of the signature field.
    pub field_name: Option<String>,

    /// Visible appearance; `None` signs invisibly.
    pub appearance: Option<SignatureAppearance>,

    /// Container profile.
    pub sub_filter: SignatureSubFilter,

    /// `/Reason` entry.
    pub reason: Option<String>,

    /// `/Location` entry.
    pub location: Option<String>,

    /// `/ContactInfo` entry.
    pub contact_info: Option<String>,

    /// `/Name` entry; defaults to the signer certificate's common name.
    pub signer_name: Option<String>,

    /// Timestamp authority endpoint.
    pub tsa_url: Option<String>,

    /// Basic auth user for the TSA.
    pub tsa_username: Option<String>,

    /// Basic auth password for the TSA.
    pub tsa_password: Option<String>,

    /// OCSP responder overriding the certificates' AIA URLs.
    pub ocsp_url: Option<String>,

    /// CRL URLs used in addition to the certificates' distribution points.
    pub crl_urls: Vec<String>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SignerConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self {
            digest_algorithm: DigestAlgorithm::Sha256,
            estimated_container_size: 0,
            embed_crl: false,
            embed_ocsp: false,
            embed_timestamp: false,
            revocation_policy_fatal: false,
            timestamp_policy_fatal: true,
            network_timeout: 10_000,
            retry_count: 2,
            retry_backoff: 250,
            field_name: None,
            appearance: None,
            sub_filter: SignatureSubFilter::Pkcs7Detached,
            reason: None,
            location: None,
            contact_info: None,
            signer_name: None,
            tsa_url: None,
            tsa_username: None,
            tsa_password: None,
            ocsp_url: None,
            crl_urls: Vec::new(),
        }
    }

    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid JSON configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Check value ranges and combinations.
    pub fn validate(&self) -> Result<()> {
        if self.estimated_container_size > MAX_ESTIMATED_CONTAINER_SIZE {
            return Err(Error::Config(format!(
                "estimated_container_size {} exceeds {}",
                self.estimated_container_size, MAX_ESTIMATED_CONTAINER_SIZE
            )));
        }
        if self.network_timeout == 0 {
            return Err(Error::Config("network_timeout must be positive".to_string()));
        }
        if let Some(name) = &self.field_name {
            if name.is_empty() || name.starts_with('.') || name.ends_with('.') {
                return Err(Error::Config(format!("invalid field name '{}'", name)));
            }
        }
        if self.tsa_username.is_some() != self.tsa_password.is_some() {
            return Err(Error::Config(
                "tsa_username and tsa_password must be set together".to_string(),
            ));
        }
        if let Some(appearance) = &self.appearance {
            if appearance.rect.is_empty() {
                return Err(Error::Config("appearance rectangle has no area".to_string()));
            }
            if appearance.font_size <= 0.0 {
                return Err(Error::Config("appearance font_size must be positive".to_string()));
            }
        }
        Ok(())
    }

    /// Network settings for revocation and timestamp requests.
    pub fn network_policy(&self) -> NetworkPolicy {
        NetworkPolicy {
            timeout: Duration::from_millis(self.network_timeout),
            retry_count: self.retry_count,
            backoff: Duration::from_millis(self.retry_backoff),
        }
    }

    /// Set the digest algorithm.
    pub fn with_digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = algorithm;
        self
    }

    /// Set the container size estimate.
    pub fn with_estimated_container_size(mut self, size: usize) -> Self {
        self.estimated_container_size = size;
        self
    }

    /// Embed CRLs.
    pub fn with_crl(mut self, enable: bool) -> Self {
        self.embed_crl = enable;
        self
    }

    /// Embed OCSP responses.
    pub fn with_ocsp(mut self, enable: bool) -> Self {
        self.embed_ocsp = enable;
        self
    }

    /// Enable timestamping with the specified TSA URL.
    pub fn with_timestamp(mut self, tsa_url: impl Into<String>) -> Self {
        self.embed_timestamp = true;
        self.tsa_url = Some(tsa_url.into());
        self
    }

    /// Make missing revocation evidence fatal.
    pub fn with_revocation_policy_fatal(mut self, fatal: bool) -> Self {
        self.revocation_policy_fatal = fatal;
        self
    }

    /// Make a missing timestamp fatal (default) or a warning.
    pub fn with_timestamp_policy_fatal(mut self, fatal: bool) -> Self {
        self.timestamp_policy_fatal = fatal;
        self
    }

    /// Set the network timeout, retries and initial backoff.
    pub fn with_network_policy(mut self, policy: NetworkPolicy) -> Self {
        self.network_timeout = policy.timeout.as_millis() as u64;
        self.retry_count = policy.retry_count;
        self.retry_backoff = policy.backoff.as_millis() as u64;
        self
    }

    /// Set the signature field name.
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = Some(name.into());
        self
    }

    /// Make the signature visible.
    pub fn with_appearance(mut self, appearance: SignatureAppearance) -> Self {
        self.appearance = Some(appearance);
        self
    }

    /// Set the container profile.
    pub fn with_sub_filter(mut self, sub_filter: SignatureSubFilter) -> Self {
        self.sub_filter = sub_filter;
        self
    }

    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the contact information.
    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.contact_info = Some(contact.into());
        self
    }

    /// Set the displayed signer name.
    pub fn with_signer_name(mut self, name: impl Into<String>) -> Self {
        self.signer_name = Some(name.into());
        self
    }

    /// Set TSA basic auth credentials.
    pub fn with_tsa_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.tsa_username = Some(username.into());
        self.tsa_password = Some(password.into());
        self
    }

    /// Use a fixed OCSP responder.
    pub fn with_ocsp_url(mut self, url: impl Into<String>) -> Self {
        self.ocsp_url = Some(url.into());
        self
    }

    /// Add a CRL URL.
    pub fn with_crl_url(mut self, url: impl Into<String>) -> Self {
        self.crl_urls.push(url.into());
        self
    }
}

/// Timeout and retry settings shared by all network sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkPolicy {
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub retry_count: u32,
    /// Delay before the first retry; doubled for each further retry
    pub backoff: Duration,
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        SignerConfig::default().network_policy()
    }
}

impl NetworkPolicy {
    /// Delay before retry number `attempt` (starting at 1).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    #[test]
    fn test_defaults() {
        let config = SignerConfig::default();
        assert_eq!(config.digest_algorithm, DigestAlgorithm::Sha256);
        assert_eq!(config.estimated_container_size, 0);
        assert!(config.timestamp_policy_fatal);
        assert!(!config.revocation_policy_fatal);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SignerConfig::new()
            .with_reason("Test signing")
            .with_location("Test City")
            .with_timestamp("http://tsa.test")
            .with_crl_url("http://crl.test/a.crl");
        assert_eq!(config.reason.as_deref(), Some("Test signing"));
        assert_eq!(config.location.as_deref(), Some("Test City"));
        assert!(config.embed_timestamp);
        assert_eq!(config.crl_urls.len(), 1);
    }

    #[test]
    fn test_json_partial() {
        let config = SignerConfig::from_json_str(
            r#"{"digest_algorithm": "sha512", "sub_filter": "ETSI.CAdES.detached",
                "appearance": {"page": 1, "rect": {"x": 10, "y": 10, "width": 100, "height": 40}}}"#,
        )
        .unwrap();
        assert_eq!(config.digest_algorithm, DigestAlgorithm::Sha512);
        assert_eq!(config.sub_filter, SignatureSubFilter::CadesDetached);
        let appearance = config.appearance.unwrap();
        assert_eq!(appearance.page, 1);
        assert!(appearance.show_name);
        assert_eq!(appearance.rect, Rect::new(10.0, 10.0, 100.0, 40.0));
    }

    #[test]
    fn test_json_errors() {
        assert!(matches!(SignerConfig::from_json_str("{"), Err(Error::Config(_))));
        let err = SignerConfig::from_json_str(r#"{"tsa_username": "u"}"#).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
        assert!(SignerConfig::from_json_str(r#"{"network_timeout": 0}"#).is_err());
        assert!(SignerConfig::from_json_str(r#"{"field_name": ""}"#).is_err());
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = NetworkPolicy {
            timeout: Duration::from_secs(1),
            retry_count: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signer.json");
        std::fs::write(&path, r#"{"embed_crl": true}"#).unwrap();
        assert!(SignerConfig::from_json_file(&path).unwrap().embed_crl);
    }
}
