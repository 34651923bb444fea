//! PDF signing implementation.
//!
//! [`PdfSigner`] drives one signing operation through
//! `Init → PlaceholderReserved → Digested → ContainerBuilt → Finalized`.
//! Any failure ends in `Failed(kind)` and drops the partially written
//! revision; only a finalized [`SignedDocument`] exposes bytes.
//!
//! ```no_run
//! use pdf_seal::config::SignerConfig;
//! use pdf_seal::document::PdfDocument;
//! use pdf_seal::signatures::{CertificateChain, PdfSigner, RsaSoftwareSigner};
//!
//! let doc = PdfDocument::open("contract.pdf")?;
//! let key = RsaSoftwareSigner::from_file("signer.key")?;
//! let chain = CertificateChain::from_der_list(&[std::fs::read("signer.der")?])?;
//!
//! let mut signer = PdfSigner::new(key, chain)
//!     .with_config(SignerConfig::new().with_reason("Approved").with_field_name("Approval"));
//! signer.sign(&doc)?.save("contract-signed.pdf")?;
//! # Ok::<(), pdf_seal::error::Error>(())
//! ```

use super::byterange::{ByteRange, ByteRangeDigestCalculator};
use super::certificate::{Certificate, CertificateChain};
use super::container::{estimate_container_size, SignatureContainer, SignatureContainerBuilder, SignedAttributes};
use super::field::{FieldDescriptor, SignatureFieldManager};
use super::revocation::{CrlSource, OcspSource, RevocationEvidence, RevocationInfoCollector};
use super::software::SigningCapability;
use super::timestamp::{TimestampClient, TimestampSource, TimestampToken};
use super::transport::HttpTransport;
use super::types::{CancellationToken, SignatureAppearance, SigningState};
use crate::config::SignerConfig;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};
use crate::writer::{text_string, IncrementalDocumentWriter};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

/// Signs documents with one key and certificate chain.
pub struct PdfSigner {
    capability: Arc<dyn SigningCapability>,
    chain: CertificateChain,
    config: SignerConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    timestamp_source: Option<Arc<dyn TimestampSource>>,
    revocation: Option<RevocationInfoCollector>,
    trusted_tsa: Vec<Certificate>,
    cancellation: CancellationToken,
    signing_time: Option<DateTime<Utc>>,
    state: SigningState,
}

impl std::fmt::Debug for PdfSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfSigner")
            .field("signer", &self.chain.leaf().subject().to_string())
            .field("chain_len", &self.chain.len())
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl PdfSigner {
    /// Signer for `chain` (leaf first) whose leaf key is behind `capability`.
    pub fn new(capability: impl SigningCapability + 'static, chain: CertificateChain) -> Self {
        Self {
            capability: Arc::new(capability),
            chain,
            config: SignerConfig::default(),
            transport: None,
            timestamp_source: None,
            revocation: None,
            trusted_tsa: Vec::new(),
            cancellation: CancellationToken::new(),
            signing_time: None,
            state: SigningState::Init,
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: SignerConfig) -> Self {
        self.config = config;
        self
    }

    /// HTTP transport for the CRL, OCSP and TSA sources derived from the
    /// configuration. Defaults to [`UreqTransport`](super::transport::UreqTransport)
    /// with the `http` feature.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Timestamp source used instead of a [`TimestampClient`] for `tsa_url`.
    pub fn with_timestamp_source(mut self, source: impl TimestampSource + 'static) -> Self {
        self.timestamp_source = Some(Arc::new(source));
        self
    }

    /// Revocation sources used instead of the ones derived from the
    /// configuration. Only consulted when CRL or OCSP embedding is enabled.
    pub fn with_revocation_collector(mut self, collector: RevocationInfoCollector) -> Self {
        self.revocation = Some(collector);
        self
    }

    /// Anchors for the TSA certificate of the configured `tsa_url`; required
    /// when the TSA client is derived from the configuration.
    pub fn with_trusted_tsa_certificates(mut self, anchors: impl IntoIterator<Item = Certificate>) -> Self {
        self.trusted_tsa.extend(anchors);
        self
    }

    /// Cancellation flag checked between stages.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Fixed signing time instead of the current time.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = Some(time);
        self
    }

    /// Stage reached by the last operation.
    pub fn state(&self) -> SigningState {
        self.state
    }

    /// Current configuration.
    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    /// The signer's certificate chain.
    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }

    /// Cancellation token shared with this signer.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Append one signed revision to `doc`.
    pub fn sign(&mut self, doc: &PdfDocument) -> Result<SignedDocument> {
        self.state = SigningState::Init;
        match self.run(doc) {
            Ok(signed) => {
                self.advance(SigningState::Finalized);
                log::info!(
                    "Signed field '{}': {} container bytes, ByteRange {}",
                    signed.field.name,
                    signed.container_len,
                    signed.byte_range
                );
                Ok(signed)
            },
            Err(e) => {
                self.advance(SigningState::Failed(e.kind()));
                log::info!("Signing failed: {}", e);
                Err(e)
            },
        }
    }

    fn advance(&mut self, next: SigningState) {
        log::debug!("Signing state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn run(&mut self, doc: &PdfDocument) -> Result<SignedDocument> {
        self.config.validate()?;
        self.ensure_sources()?;
        self.check_cancelled()?;

        let signing_time = self.signing_time.unwrap_or_else(Utc::now);
        let algorithm = self.config.digest_algorithm;

        // Init -> PlaceholderReserved
        let fields = SignatureFieldManager::load(doc)?;
        let name = self.config.field_name.clone().unwrap_or_else(|| fields.unique_name());
        let mut writer = IncrementalDocumentWriter::new(doc);
        let sig_ref = writer.allocate();
        let signer_name = self.config.signer_name.clone().or_else(|| self.chain.leaf().common_name());
        let lines = match &self.config.appearance {
            Some(appearance) => appearance_lines(appearance, &self.config, signer_name.as_deref(), signing_time),
            None => Vec::new(),
        };
        let field = fields.prepare(&mut writer, &name, self.config.appearance.as_ref(), &lines, sig_ref)?;
        writer.set_signature_dictionary(sig_ref, self.signature_dictionary(signer_name.as_deref(), signing_time));

        let estimate = match self.config.estimated_container_size {
            0 => estimate_container_size(
                self.chain.len(),
                self.config.embed_crl,
                self.config.embed_ocsp,
                self.config.embed_timestamp,
            ),
            size => size,
        };
        let mut prepared = writer.reserve_placeholder(estimate)?;
        self.advance(SigningState::PlaceholderReserved);
        self.check_cancelled()?;

        // PlaceholderReserved -> Digested
        let digest = ByteRangeDigestCalculator::new(algorithm).digest_prepared(prepared.bytes(), &prepared.placeholder())?;
        self.advance(SigningState::Digested);
        self.check_cancelled()?;

        // Digested -> ContainerBuilt
        let container = self.build_container(&digest, signing_time)?;
        let der = container.to_der_within(prepared.capacity())?;
        self.advance(SigningState::ContainerBuilt);
        self.check_cancelled()?;

        // ContainerBuilt -> Finalized
        prepared.patch_placeholder(&der)?;
        Ok(SignedDocument {
            byte_range: prepared.byte_range(),
            bytes: prepared.into_bytes(),
            field,
            container_len: der.len(),
            has_timestamp: container.has_timestamp(),
        })
    }

    fn signature_dictionary(&self, signer_name: Option<&str>, signing_time: DateTime<Utc>) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert("Type".to_string(), Object::name("Sig"));
        dict.insert("Filter".to_string(), Object::name("Adobe.PPKLite"));
        dict.insert("SubFilter".to_string(), Object::name(self.config.sub_filter.as_pdf_name()));
        if let Some(name) = signer_name {
            dict.insert("Name".to_string(), text_string(name));
        }
        dict.insert("M".to_string(), Object::String(format_pdf_date(signing_time).into_bytes()));
        if let Some(reason) = &self.config.reason {
            dict.insert("Reason".to_string(), text_string(reason));
        }
        if let Some(location) = &self.config.location {
            dict.insert("Location".to_string(), text_string(location));
        }
        if let Some(contact) = &self.config.contact_info {
            dict.insert("ContactInfo".to_string(), text_string(contact));
        }
        dict
    }

    fn build_container(&self, digest: &[u8], signing_time: DateTime<Utc>) -> Result<SignatureContainer> {
        let collector = self
            .revocation
            .as_ref()
            .filter(|_| self.config.embed_crl || self.config.embed_ocsp);
        let timestamp_source = self.timestamp_source.as_deref().filter(|_| self.config.embed_timestamp);
        let chain = &self.chain;
        let builder = SignatureContainerBuilder::new(self.config.digest_algorithm, &self.chain)
            .with_profile(self.config.sub_filter)
            .with_signing_time(signing_time);

        if self.config.sub_filter.is_cades() {
            // Revocation values are unsigned in CAdES: fetch them while the
            // TSA stamps the signature.
            let signed = builder.sign(self.capability.as_ref(), digest)?;
            self.check_cancelled()?;
            let (evidence, token) = std::thread::scope(|scope| {
                let revocation = collector.map(|collector| scope.spawn(move || collector.collect(chain)));
                let token = timestamp_source
                    .map(|source| self.request_timestamp(source, &signed))
                    .transpose();
                let evidence = revocation
                    .map(|handle| {
                        handle
                            .join()
                            .map_err(|_| Error::RevocationUnavailable("revocation worker panicked".to_string()))
                    })
                    .transpose();
                (evidence, token)
            });
            let evidence = self.apply_revocation_policy(evidence?)?;
            let token = token?.flatten();
            signed.finish(token.as_ref(), evidence.as_ref())
        } else {
            let evidence = self.apply_revocation_policy(collector.map(|c| c.collect(chain)))?;
            self.check_cancelled()?;
            let builder = match &evidence {
                Some(evidence) => builder.with_archived_revocation(evidence),
                None => builder,
            };
            let signed = builder.sign(self.capability.as_ref(), digest)?;
            let token = match timestamp_source {
                Some(source) => self.request_timestamp(source, &signed)?,
                None => None,
            };
            signed.finish(token.as_ref(), None)
        }
    }

    /// Derive the revocation collector and TSA client described by the
    /// configuration, unless they were supplied explicitly.
    fn ensure_sources(&mut self) -> Result<()> {
        let wants_revocation = self.config.embed_crl || self.config.embed_ocsp;
        let needs_collector = wants_revocation && self.revocation.is_none();
        let needs_tsa = self.config.embed_timestamp && self.timestamp_source.is_none();
        if !needs_collector && !needs_tsa {
            return Ok(());
        }
        let policy = self.config.network_policy();

        let tsa_url = if needs_tsa {
            if self.trusted_tsa.is_empty() {
                return Err(Error::Config(
                    "embed_timestamp requires trusted TSA certificates or a timestamp source".to_string(),
                ));
            }
            let url = self
                .config
                .tsa_url
                .clone()
                .or_else(|| super::timestamp::tsa_url_from_certificate(self.chain.leaf()))
                .ok_or_else(|| Error::Config("embed_timestamp requires tsa_url".to_string()))?;
            Some(url)
        } else {
            None
        };
        let transport = self.network_transport()?;

        if needs_collector {
            let mut collector = RevocationInfoCollector::new();
            if self.config.embed_crl {
                let mut crl = CrlSource::new(transport.clone(), policy);
                if !self.config.crl_urls.is_empty() {
                    crl = crl.with_urls(self.config.crl_urls.clone());
                }
                collector = collector.with_source(crl);
            }
            if self.config.embed_ocsp {
                let mut ocsp = OcspSource::new(transport.clone(), policy);
                if let Some(url) = &self.config.ocsp_url {
                    ocsp = ocsp.with_url(url.clone());
                }
                collector = collector.with_source(ocsp);
            }
            self.revocation = Some(collector);
        }

        if let Some(url) = tsa_url {
            let mut client =
                TimestampClient::new(url, transport, policy).with_trusted_certificates(self.trusted_tsa.clone());
            if let (Some(user), Some(password)) = (&self.config.tsa_username, &self.config.tsa_password) {
                client = client.with_credentials(user.clone(), password.clone());
            }
            self.timestamp_source = Some(Arc::new(client));
        }
        Ok(())
    }

    fn network_transport(&self) -> Result<Arc<dyn HttpTransport>> {
        if let Some(transport) = &self.transport {
            return Ok(transport.clone());
        }
        #[cfg(feature = "http")]
        {
            Ok(Arc::new(super::transport::UreqTransport::new()))
        }
        #[cfg(not(feature = "http"))]
        {
            Err(Error::Config("network access requires the `http` feature or with_transport".to_string()))
        }
    }

    /// Missing evidence fails only under `revocation_policy_fatal`.
    fn apply_revocation_policy(&self, evidence: Option<RevocationEvidence>) -> Result<Option<RevocationEvidence>> {
        let Some(evidence) = evidence else {
            return Ok(None);
        };
        if !evidence.is_complete() {
            if self.config.revocation_policy_fatal {
                return Err(Error::RevocationUnavailable(evidence.describe_omissions()));
            }
            for omission in evidence.omissions() {
                log::warn!("Revocation evidence omitted: {}", omission);
            }
        }
        Ok(Some(evidence))
    }

    /// Timestamp the signature value; failures downgrade to no token unless
    /// `timestamp_policy_fatal` is set.
    fn request_timestamp(&self, source: &dyn TimestampSource, signed: &SignedAttributes) -> Result<Option<TimestampToken>> {
        let algorithm = self.config.digest_algorithm;
        match source.timestamp(&signed.signature_digest(), algorithm) {
            Ok(token) => {
                log::debug!("Timestamp token generated at {}", token.generation_time());
                Ok(Some(token))
            },
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) if self.config.timestamp_policy_fatal => Err(e),
            Err(e) => {
                log::warn!("Signing without timestamp: {}", e);
                Ok(None)
            },
        }
    }
}

/// Text block of a generated appearance.
fn appearance_lines(
    appearance: &SignatureAppearance,
    config: &SignerConfig,
    signer_name: Option<&str>,
    signing_time: DateTime<Utc>,
) -> Vec<String> {
    let mut lines = Vec::new();
    if appearance.show_name {
        if let Some(name) = signer_name {
            lines.push(format!("Digitally signed by {}", name));
        }
    }
    if appearance.show_date {
        lines.push(format!("Date: {}", signing_time.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    if appearance.show_reason {
        if let Some(reason) = &config.reason {
            lines.push(format!("Reason: {}", reason));
        }
    }
    if appearance.show_location {
        if let Some(location) = &config.location {
            lines.push(format!("Location: {}", location));
        }
    }
    lines
}

/// Format a time as a PDF date string (`D:YYYYMMDDHHmmSSZ`).
pub fn format_pdf_date(time: DateTime<Utc>) -> String {
    format!("D:{}Z", time.format("%Y%m%d%H%M%S"))
}

/// Output of a finalized signing operation.
#[derive(Debug, Clone)]
pub struct SignedDocument {
    bytes: Vec<u8>,
    field: FieldDescriptor,
    byte_range: ByteRange,
    container_len: usize,
    has_timestamp: bool,
}

impl SignedDocument {
    /// The signed document: input bytes plus one revision.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume and return the document bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The field that holds the new signature.
    pub fn field(&self) -> &FieldDescriptor {
        &self.field
    }

    /// `/ByteRange` of the new signature.
    pub fn byte_range(&self) -> ByteRange {
        self.byte_range
    }

    /// DER length of the embedded container.
    pub fn container_len(&self) -> usize {
        self.container_len
    }

    /// Whether a timestamp token was embedded.
    pub fn has_timestamp(&self) -> bool {
        self.has_timestamp
    }

    /// Parse the output, e.g. to sign it again.
    pub fn to_document(&self) -> Result<PdfDocument> {
        PdfDocument::from_bytes(self.bytes.clone())
    }

    /// Write the document to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::signatures::software::RsaSoftwareSigner;
    use crate::signatures::types::DigestAlgorithm;
    use chrono::TimeZone;

    fn fixture(name: &str) -> Vec<u8> {
        std::fs::read(format!("{}/tests/fixtures/pki/{}", env!("CARGO_MANIFEST_DIR"), name)).unwrap()
    }

    fn signer() -> PdfSigner {
        let key = RsaSoftwareSigner::from_der(&fixture("leaf.key.der")).unwrap();
        let chain = CertificateChain::from_der_list(&[fixture("leaf.der"), fixture("root.der")]).unwrap();
        PdfSigner::new(key, chain).with_signing_time(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
    }

    fn minimal_pdf() -> Vec<u8> {
        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for body in [
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>",
        ] {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", offsets.len(), body).as_bytes());
        }
        let xref = pdf.len();
        pdf.extend_from_slice(b"xref\n0 4\n0000000000 65535 f \n");
        for off in offsets {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        pdf.extend_from_slice(format!("trailer\n<< /Size 4 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n", xref).as_bytes());
        pdf
    }

    #[test]
    fn test_format_pdf_date() {
        let time = Utc.with_ymd_and_hms(2026, 10, 19, 8, 5, 3).unwrap();
        assert_eq!(format_pdf_date(time), "D:20261019080503Z");
    }

    #[test]
    fn test_sign_reaches_finalized() {
        let input = minimal_pdf();
        let doc = PdfDocument::from_bytes(input.clone()).unwrap();
        let mut signer = signer().with_config(SignerConfig::new().with_reason("Test signing"));
        let signed = signer.sign(&doc).unwrap();

        assert_eq!(signer.state(), SigningState::Finalized);
        assert_eq!(&signed.bytes()[..input.len()], input.as_slice());
        assert_eq!(signed.field().name, "Signature1");
        assert!(signed.container_len() <= 8192);
        assert!(!signed.has_timestamp());
        assert_eq!(signed.byte_range().end() as usize, signed.bytes().len());
    }

    #[test]
    fn test_signature_dictionary_entries() {
        let config = SignerConfig::new()
            .with_reason("Approved")
            .with_location("Berlin")
            .with_contact_info("ops@example.test");
        let signer = signer().with_config(config);
        let time = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let dict = signer.signature_dictionary(Some("Seal Test Signer"), time);

        assert_eq!(dict.get("Type").and_then(Object::as_name), Some("Sig"));
        assert_eq!(dict.get("Filter").and_then(Object::as_name), Some("Adobe.PPKLite"));
        assert_eq!(dict.get("SubFilter").and_then(Object::as_name), Some("adbe.pkcs7.detached"));
        assert_eq!(dict.get("M").and_then(Object::as_string), Some(&b"D:20260301120000Z"[..]));
        assert_eq!(dict.get("Reason").and_then(Object::as_string), Some(&b"Approved"[..]));
        assert_eq!(dict.get("Location").and_then(Object::as_string), Some(&b"Berlin"[..]));
        assert!(dict.contains_key("ContactInfo"));
        assert!(!dict.contains_key("Contents"));
    }

    #[test]
    fn test_too_small_estimate_fails() {
        let doc = PdfDocument::from_bytes(minimal_pdf()).unwrap();
        let mut signer = signer().with_config(SignerConfig::new().with_estimated_container_size(64));
        let err = signer.sign(&doc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContainerTooLarge);
        assert_eq!(signer.state(), SigningState::Failed(ErrorKind::ContainerTooLarge));
    }

    #[test]
    fn test_cancelled_before_start() {
        let doc = PdfDocument::from_bytes(minimal_pdf()).unwrap();
        let mut signer = signer();
        signer.cancellation_token().cancel();
        let err = signer.sign(&doc).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(signer.state(), SigningState::Failed(ErrorKind::Cancelled));
    }

    #[test]
    fn test_timestamp_without_anchors_is_config_error() {
        let doc = PdfDocument::from_bytes(minimal_pdf()).unwrap();
        let config = SignerConfig::new().with_timestamp("http://tsa.seal.test");
        let mut signer = signer().with_config(config);
        let err = signer.sign(&doc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_appearance_lines() {
        let appearance = SignatureAppearance::default();
        let config = SignerConfig::new().with_reason("Approved");
        let time = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let lines = appearance_lines(&appearance, &config, Some("Ann"), time);
        assert_eq!(
            lines,
            vec![
                "Digitally signed by Ann".to_string(),
                "Date: 2026-03-01 12:00:00 UTC".to_string(),
                "Reason: Approved".to_string(),
            ]
        );
    }

    #[test]
    fn test_sha512_digest_fits_estimate() {
        let doc = PdfDocument::from_bytes(minimal_pdf()).unwrap();
        let mut signer = signer().with_config(SignerConfig::new().with_digest_algorithm(DigestAlgorithm::Sha512));
        let signed = signer.sign(&doc).unwrap();
        assert!(signed.container_len() > 0);
    }
}
