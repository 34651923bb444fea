//! Revocation evidence (CRLs and OCSP responses) for a signer chain.
//!
//! Collection is best effort: each [`RevocationSource`] either produces
//! evidence for a certificate or records an [`Omission`]. Whether missing
//! evidence is fatal is decided by the caller.

use super::asn1::{self, oid, BasicOcspResponse, CertId, OcspRequest, OcspResponse, OcspResponseStatus,
    OcspSingleRequest, RevocationInfoArchival, RevocationValues, TbsRequest};
use super::certificate::{self, Certificate, CertificateChain};
use super::transport::{send_with_retry, HttpRequest, HttpTransport};
use crate::config::NetworkPolicy;
use crate::error::{Error, Result};
use der::asn1::{Any, OctetString};
use der::{Decode, Encode};
use std::sync::Arc;

/// One piece of revocation data, DER encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationData {
    /// `CertificateList`
    Crl(Vec<u8>),
    /// Full `OCSPResponse`
    Ocsp(Vec<u8>),
}

/// Something that can vouch for a certificate's revocation status.
pub trait RevocationSource: Send + Sync {
    /// Short name used in logs and omissions.
    fn name(&self) -> &'static str;

    /// Whether the source needs the issuer certificate.
    fn requires_issuer(&self) -> bool {
        false
    }

    /// Fetch evidence for `cert`, issued by `issuer` when it is known.
    fn fetch(&self, cert: &Certificate, issuer: Option<&Certificate>) -> Result<Vec<RevocationData>>;
}

/// Downloads CRLs from the certificate's distribution points.
pub struct CrlSource {
    transport: Arc<dyn HttpTransport>,
    policy: NetworkPolicy,
    urls: Vec<String>,
}

impl CrlSource {
    /// Source using the distribution points in each certificate.
    pub fn new(transport: Arc<dyn HttpTransport>, policy: NetworkPolicy) -> Self {
        Self {
            transport,
            policy,
            urls: Vec::new(),
        }
    }

    /// Use these URLs instead of the certificate's distribution points.
    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    fn fetch_one(&self, url: &str, cert: &Certificate) -> Result<Vec<u8>> {
        let body = send_with_retry(self.transport.as_ref(), &HttpRequest::get(url), &self.policy)?;
        let (_, crl) = x509_parser::parse_x509_crl(&body)
            .map_err(|e| Error::InvalidAsn1(format!("response from {} is not a CRL: {}", url, e)))?;

        if crl.issuer().as_raw() != cert.issuer().to_der()?.as_slice() {
            return Err(Error::InvalidAsn1(format!(
                "CRL from {} is issued by {}, expected {}",
                url,
                crl.issuer(),
                cert.issuer()
            )));
        }
        let serial = cert.serial_number().as_bytes();
        if crl
            .iter_revoked_certificates()
            .any(|revoked| asn1::strip_leading_zeros(revoked.raw_serial()) == asn1::strip_leading_zeros(serial))
        {
            log::warn!("Certificate {} is listed as revoked in {}", cert.subject(), url);
        }
        Ok(body)
    }
}

impl RevocationSource for CrlSource {
    fn name(&self) -> &'static str {
        "crl"
    }

    fn fetch(&self, cert: &Certificate, _issuer: Option<&Certificate>) -> Result<Vec<RevocationData>> {
        let urls = if self.urls.is_empty() {
            cert.crl_urls()
        } else {
            self.urls.clone()
        };
        if urls.is_empty() {
            return Err(Error::RevocationUnavailable(format!(
                "{} has no CRL distribution point",
                cert.subject()
            )));
        }

        let mut crls = Vec::new();
        let mut last_err = None;
        for url in &urls {
            match self.fetch_one(url, cert) {
                Ok(crl) => {
                    log::debug!("Fetched CRL of {} bytes from {}", crl.len(), url);
                    crls.push(RevocationData::Crl(crl));
                },
                Err(e) => {
                    log::warn!("CRL download from {} failed: {}", url, e);
                    last_err = Some(e);
                },
            }
        }
        match (crls.is_empty(), last_err) {
            (true, Some(err)) => Err(err),
            _ => Ok(crls),
        }
    }
}

/// Queries an OCSP responder.
pub struct OcspSource {
    transport: Arc<dyn HttpTransport>,
    policy: NetworkPolicy,
    url: Option<String>,
}

impl OcspSource {
    /// Source using the responder named in each certificate.
    pub fn new(transport: Arc<dyn HttpTransport>, policy: NetworkPolicy) -> Self {
        Self {
            transport,
            policy,
            url: None,
        }
    }

    /// Query this responder instead of the certificate's AIA URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

impl RevocationSource for OcspSource {
    fn name(&self) -> &'static str {
        "ocsp"
    }

    fn requires_issuer(&self) -> bool {
        true
    }

    fn fetch(&self, cert: &Certificate, issuer: Option<&Certificate>) -> Result<Vec<RevocationData>> {
        let issuer = issuer.ok_or_else(|| {
            Error::RevocationUnavailable(format!("issuer of {} is not in the chain", cert.subject()))
        })?;
        let url = match &self.url {
            Some(url) => url.clone(),
            None => cert.ocsp_urls().into_iter().next().ok_or_else(|| {
                Error::RevocationUnavailable(format!("{} has no OCSP responder", cert.subject()))
            })?,
        };

        let request = HttpRequest::post(&url, "application/ocsp-request", build_ocsp_request(cert, issuer)?)
            .with_accept("application/ocsp-response");
        let body = send_with_retry(self.transport.as_ref(), &request, &self.policy)?;
        basic_ocsp_response(&body)?;
        log::debug!("Fetched OCSP response of {} bytes from {}", body.len(), url);
        Ok(vec![RevocationData::Ocsp(body)])
    }
}

/// DER `OCSPRequest` for `cert`.
pub fn build_ocsp_request(cert: &Certificate, issuer: &Certificate) -> Result<Vec<u8>> {
    let (name_hash, key_hash) = certificate::issuer_hashes(issuer)?;
    let request = OcspRequest {
        tbs_request: TbsRequest {
            request_list: vec![OcspSingleRequest {
                req_cert: CertId {
                    hash_algorithm: asn1::algorithm_with_null(oid::ID_SHA1),
                    issuer_name_hash: OctetString::new(name_hash)?,
                    issuer_key_hash: OctetString::new(key_hash)?,
                    serial_number: cert.serial_number().clone(),
                },
            }],
        },
    };
    Ok(request.to_der()?)
}

/// Check that `der` is a successful basic OCSP response and return the
/// DER `BasicOCSPResponse`.
pub fn basic_ocsp_response(der: &[u8]) -> Result<Vec<u8>> {
    let response = OcspResponse::from_der(der)
        .map_err(|e| Error::InvalidAsn1(format!("malformed OCSP response: {}", e)))?;
    if response.response_status != OcspResponseStatus::Successful {
        return Err(Error::RevocationUnavailable(format!(
            "OCSP responder answered {:?}",
            response.response_status
        )));
    }
    let bytes = response
        .response_bytes
        .ok_or_else(|| Error::InvalidAsn1("successful OCSP response without responseBytes".to_string()))?;
    if bytes.response_type != oid::ID_PKIX_OCSP_BASIC {
        return Err(Error::InvalidAsn1(format!(
            "unsupported OCSP response type {}",
            bytes.response_type
        )));
    }
    BasicOcspResponse::from_der(bytes.response.as_bytes())
        .map_err(|e| Error::InvalidAsn1(format!("malformed BasicOCSPResponse: {}", e)))?;
    Ok(bytes.response.as_bytes().to_vec())
}

/// Evidence for one chain certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateEvidence {
    /// Subject of the certificate
    pub subject: String,
    /// DER CRLs
    pub crls: Vec<Vec<u8>>,
    /// DER `OCSPResponse`s
    pub ocsp_responses: Vec<Vec<u8>>,
}

/// Evidence a source could not provide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Omission {
    /// Subject of the certificate
    pub subject: String,
    /// Source name (`crl`, `ocsp`, ...)
    pub source: &'static str,
    /// Why it is missing
    pub reason: String,
}

impl std::fmt::Display for Omission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} for {}: {}", self.source, self.subject, self.reason)
    }
}

/// Revocation data for a chain, leaf first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationEvidence {
    entries: Vec<CertificateEvidence>,
    omissions: Vec<Omission>,
}

impl RevocationEvidence {
    /// No evidence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-certificate evidence in chain order.
    pub fn entries(&self) -> &[CertificateEvidence] {
        &self.entries
    }

    /// Evidence that could not be collected.
    pub fn omissions(&self) -> &[Omission] {
        &self.omissions
    }

    /// Whether no CRL or OCSP response was collected.
    pub fn is_empty(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.crls.is_empty() && e.ocsp_responses.is_empty())
    }

    /// Whether every source delivered.
    pub fn is_complete(&self) -> bool {
        self.omissions.is_empty()
    }

    /// All CRLs, without duplicates.
    pub fn crls(&self) -> Vec<&[u8]> {
        let mut out: Vec<&[u8]> = Vec::new();
        for crl in self.entries.iter().flat_map(|e| e.crls.iter()) {
            if !out.contains(&crl.as_slice()) {
                out.push(crl);
            }
        }
        out
    }

    /// All OCSP responses.
    pub fn ocsp_responses(&self) -> Vec<&[u8]> {
        self.entries
            .iter()
            .flat_map(|e| e.ocsp_responses.iter().map(Vec::as_slice))
            .collect()
    }

    /// One line per omission.
    pub fn describe_omissions(&self) -> String {
        self.omissions
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Adobe `RevocationInfoArchival` value.
    pub fn to_archival(&self) -> Result<RevocationInfoArchival> {
        Ok(RevocationInfoArchival {
            crl: non_empty(self.crls().into_iter().map(Any::from_der).collect::<der::Result<Vec<_>>>()?),
            ocsp: non_empty(
                self.ocsp_responses()
                    .into_iter()
                    .map(Any::from_der)
                    .collect::<der::Result<Vec<_>>>()?,
            ),
        })
    }

    /// CAdES `RevocationValues` value; OCSP entries are the basic responses.
    pub fn to_revocation_values(&self) -> Result<RevocationValues> {
        let mut ocsp_vals = Vec::new();
        for response in self.ocsp_responses() {
            ocsp_vals.push(Any::from_der(&basic_ocsp_response(response)?)?);
        }
        Ok(RevocationValues {
            crl_vals: non_empty(self.crls().into_iter().map(Any::from_der).collect::<der::Result<Vec<_>>>()?),
            ocsp_vals: non_empty(ocsp_vals),
        })
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Runs the configured sources over a chain.
#[derive(Default)]
pub struct RevocationInfoCollector {
    sources: Vec<Box<dyn RevocationSource>>,
}

impl RevocationInfoCollector {
    /// Collector without sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source.
    pub fn with_source(mut self, source: impl RevocationSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Add a boxed source.
    pub fn add_source(&mut self, source: Box<dyn RevocationSource>) {
        self.sources.push(source);
    }

    /// Whether any source is configured.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Collect evidence for every certificate that is not a self-signed
    /// root. Certificates are processed concurrently.
    pub fn collect(&self, chain: &CertificateChain) -> RevocationEvidence {
        if self.sources.is_empty() {
            return RevocationEvidence::new();
        }

        let per_cert: Vec<(CertificateEvidence, Vec<Omission>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = chain
                .iter()
                .enumerate()
                .map(|(i, cert)| {
                    let issuer = chain.issuer_of(i);
                    scope.spawn(move || self.collect_for(cert, issuer))
                })
                .collect();
            handles
                .into_iter()
                .zip(chain.iter())
                .map(|(handle, cert)| {
                    handle.join().unwrap_or_else(|_| {
                        let subject = cert.subject().to_string();
                        let omission = Omission {
                            subject: subject.clone(),
                            source: "collector",
                            reason: "fetch thread panicked".to_string(),
                        };
                        (
                            CertificateEvidence {
                                subject,
                                ..Default::default()
                            },
                            vec![omission],
                        )
                    })
                })
                .collect()
        });

        let mut evidence = RevocationEvidence::new();
        for (entry, omissions) in per_cert {
            evidence.entries.push(entry);
            evidence.omissions.extend(omissions);
        }
        log::debug!(
            "Collected {} CRL(s), {} OCSP response(s), {} omission(s)",
            evidence.crls().len(),
            evidence.ocsp_responses().len(),
            evidence.omissions.len()
        );
        evidence
    }

    fn collect_for(&self, cert: &Certificate, issuer: Option<&Certificate>) -> (CertificateEvidence, Vec<Omission>) {
        let subject = cert.subject().to_string();
        let mut entry = CertificateEvidence {
            subject: subject.clone(),
            ..Default::default()
        };
        let mut omissions = Vec::new();

        if cert.is_self_signed() {
            log::debug!("Skipping revocation check of self-signed {}", subject);
            return (entry, omissions);
        }

        for source in &self.sources {
            if source.requires_issuer() && issuer.is_none() {
                omissions.push(Omission {
                    subject: subject.clone(),
                    source: source.name(),
                    reason: "issuer certificate not in chain".to_string(),
                });
                continue;
            }
            match source.fetch(cert, issuer) {
                Ok(data) => {
                    for item in data {
                        match item {
                            RevocationData::Crl(crl) => entry.crls.push(crl),
                            RevocationData::Ocsp(resp) => entry.ocsp_responses.push(resp),
                        }
                    }
                },
                Err(e) => {
                    log::warn!("No {} evidence for {}: {}", source.name(), subject, e);
                    omissions.push(Omission {
                        subject: subject.clone(),
                        source: source.name(),
                        reason: e.to_string(),
                    });
                },
            }
        }
        (entry, omissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::transport::HttpMethod;
    use der::Tagged;
    use std::time::Duration;

    fn fixture(name: &str) -> Vec<u8> {
        std::fs::read(format!("{}/tests/fixtures/pki/{}", env!("CARGO_MANIFEST_DIR"), name)).unwrap()
    }

    fn chain() -> CertificateChain {
        CertificateChain::from_der_list(&[fixture("leaf.der"), fixture("root.der")]).unwrap()
    }

    fn policy() -> NetworkPolicy {
        NetworkPolicy {
            timeout: Duration::from_millis(10),
            retry_count: 0,
            backoff: Duration::ZERO,
        }
    }

    struct Canned;

    impl HttpTransport for Canned {
        fn send(&self, request: &HttpRequest, _timeout: Duration) -> Result<Vec<u8>> {
            match (request.method, request.url.as_str()) {
                (HttpMethod::Get, "http://crl.seal.test/root.crl") => Ok(fixture("root.crl")),
                (HttpMethod::Post, "http://ocsp.seal.test") => Ok(fixture("ocsp_resp.der")),
                _ => Err(Error::Transport {
                    url: request.url.clone(),
                    reason: "connection refused".to_string(),
                }),
            }
        }
    }

    #[test]
    fn test_collects_crl_and_ocsp_for_leaf() {
        let transport: Arc<dyn HttpTransport> = Arc::new(Canned);
        let collector = RevocationInfoCollector::new()
            .with_source(CrlSource::new(transport.clone(), policy()))
            .with_source(OcspSource::new(transport, policy()));
        let evidence = collector.collect(&chain());

        assert!(evidence.is_complete(), "{}", evidence.describe_omissions());
        assert_eq!(evidence.entries().len(), 2);
        assert_eq!(evidence.crls().len(), 1);
        assert_eq!(evidence.ocsp_responses().len(), 1);
        assert!(evidence.entries()[1].crls.is_empty());
    }

    #[test]
    fn test_self_issued_certificate_is_still_checked() {
        let mut der = fixture("root.der");
        let last = der.len() - 1;
        der[last] ^= 0xFF;
        let chain = CertificateChain::from_der_list(&[der]).unwrap();

        let transport: Arc<dyn HttpTransport> = Arc::new(Canned);
        let collector = RevocationInfoCollector::new().with_source(CrlSource::new(transport, policy()));
        let evidence = collector.collect(&chain);
        assert_eq!(evidence.omissions().len(), 1);
        assert_eq!(evidence.omissions()[0].source, "crl");
    }

    #[test]
    fn test_unreachable_source_is_omitted() {
        let transport: Arc<dyn HttpTransport> = Arc::new(Canned);
        let collector = RevocationInfoCollector::new()
            .with_source(CrlSource::new(transport, policy()).with_urls(vec!["http://down.test/x.crl".to_string()]));
        let evidence = collector.collect(&chain());
        assert!(evidence.is_empty());
        assert_eq!(evidence.omissions().len(), 1);
        assert_eq!(evidence.omissions()[0].source, "crl");
    }

    #[test]
    fn test_ocsp_request_matches_fixture_cert_id() {
        let chain = chain();
        let der = build_ocsp_request(chain.leaf(), &chain.certificates()[1]).unwrap();
        let request = OcspRequest::from_der(&der).unwrap();
        let cert_id = &request.tbs_request.request_list[0].req_cert;
        assert_eq!(
            crate::writer::hex_upper(cert_id.issuer_key_hash.as_bytes()),
            "F3C43A42E255932E64877F22819314F1ED3105CB"
        );
        assert_eq!(
            crate::writer::hex_upper(cert_id.issuer_name_hash.as_bytes()),
            "156ECC1BB4B5666844ED6C8553D8FA2CB2E84C59"
        );
    }

    #[test]
    fn test_invalid_ocsp_response_rejected() {
        assert!(basic_ocsp_response(b"\x30\x03\x0a\x01\x00").is_err());
        let try_later = [0x30, 0x03, 0x0a, 0x01, 0x03];
        assert!(matches!(
            basic_ocsp_response(&try_later).unwrap_err(),
            Error::RevocationUnavailable(_)
        ));
        assert!(basic_ocsp_response(&fixture("ocsp_resp.der")).is_ok());
    }

    #[test]
    fn test_evidence_conversions() {
        let transport: Arc<dyn HttpTransport> = Arc::new(Canned);
        let evidence = RevocationInfoCollector::new()
            .with_source(OcspSource::new(transport, policy()))
            .collect(&chain());
        let archival = evidence.to_archival().unwrap();
        assert!(archival.crl.is_none());
        assert_eq!(archival.ocsp.as_ref().unwrap().len(), 1);
        let values = evidence.to_revocation_values().unwrap();
        assert_eq!(values.ocsp_vals.as_ref().unwrap().len(), 1);
        assert_eq!(values.ocsp_vals.unwrap()[0].tag(), der::Tag::Sequence);
    }
}
