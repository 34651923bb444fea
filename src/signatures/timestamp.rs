//! RFC 3161 timestamps.
//!
//! [`TimestampClient`] asks a time-stamping authority to bind a digest to a
//! time and verifies the returned token before handing it to the container
//! builder.

use super::asn1::{self, oid, MessageImprint, TimeStampReq, TimeStampResp, TstInfo};
use super::certificate::{self, Certificate};
use super::container;
use super::transport::{send_with_retry, HttpRequest, HttpTransport};
use super::types::DigestAlgorithm;
use crate::config::NetworkPolicy;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use der::asn1::{ObjectIdentifier, OctetString, Uint};
use der::{Decode, Encode};
use std::sync::Arc;

/// Produces timestamp tokens.
pub trait TimestampSource: Send + Sync {
    /// Timestamp `digest`, computed with `algorithm`.
    fn timestamp(&self, digest: &[u8], algorithm: DigestAlgorithm) -> Result<TimestampToken>;
}

impl<T: TimestampSource + ?Sized> TimestampSource for Arc<T> {
    fn timestamp(&self, digest: &[u8], algorithm: DigestAlgorithm) -> Result<TimestampToken> {
        (**self).timestamp(digest, algorithm)
    }
}

/// A parsed timestamp token.
#[derive(Debug, Clone)]
pub struct TimestampToken {
    der: Vec<u8>,
    signed_data: SignedData,
    tst_info: TstInfo,
    gen_time: DateTime<Utc>,
}

impl TimestampToken {
    /// Parse a DER `ContentInfo` holding a SignedData over `TSTInfo`.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let content_info = ContentInfo::from_der(der)
            .map_err(|e| Error::UntrustedTimestamp(format!("token is not a ContentInfo: {}", e)))?;
        Self::from_content_info(&content_info)
    }

    /// Parse an already decoded token.
    pub fn from_content_info(content_info: &ContentInfo) -> Result<Self> {
        let untrusted = Error::UntrustedTimestamp;
        if content_info.content_type != oid::ID_SIGNED_DATA {
            return Err(untrusted(format!("token content type is {}", content_info.content_type)));
        }
        let signed_data = content_info
            .content
            .decode_as::<SignedData>()
            .map_err(|e| untrusted(format!("invalid token SignedData: {}", e)))?;
        if signed_data.encap_content_info.econtent_type != oid::ID_CT_TST_INFO {
            return Err(untrusted(format!(
                "token encapsulates {}, not TSTInfo",
                signed_data.encap_content_info.econtent_type
            )));
        }
        let tst_der = tst_info_der(&signed_data)?;
        let tst_info = TstInfo::from_der(&tst_der).map_err(|e| untrusted(format!("invalid TSTInfo: {}", e)))?;
        let gen_time = tst_info.generation_time()?;

        Ok(Self {
            der: content_info.to_der()?,
            signed_data,
            tst_info,
            gen_time,
        })
    }

    /// DER `ContentInfo`.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Decoded `ContentInfo`, as embedded in an unsigned attribute.
    pub fn content_info(&self) -> Result<ContentInfo> {
        Ok(ContentInfo::from_der(&self.der)?)
    }

    /// Time asserted by the TSA.
    pub fn generation_time(&self) -> DateTime<Utc> {
        self.gen_time
    }

    /// `TSTInfo` content.
    pub fn tst_info(&self) -> &TstInfo {
        &self.tst_info
    }

    /// Digest the token covers.
    pub fn imprint(&self) -> &[u8] {
        self.tst_info.message_imprint.hashed_message.as_bytes()
    }

    /// Algorithm of the imprint, when it is one we know.
    pub fn imprint_algorithm(&self) -> Option<DigestAlgorithm> {
        DigestAlgorithm::from_oid(&self.tst_info.message_imprint.hash_algorithm.oid)
    }

    /// Certificates carried by the token.
    pub fn certificates(&self) -> Vec<Certificate> {
        certificate::certificates_of(&self.signed_data)
    }

    /// Check the token against the request and the trusted TSA anchors.
    ///
    /// `nonce` is the nonce sent in the request, if any.
    pub fn verify(
        &self,
        digest: &[u8],
        algorithm: DigestAlgorithm,
        nonce: Option<&[u8]>,
        anchors: &[Certificate],
    ) -> Result<()> {
        let untrusted = Error::UntrustedTimestamp;

        if self.tst_info.message_imprint.hash_algorithm.oid != algorithm.oid() {
            return Err(untrusted(format!(
                "imprint algorithm {} differs from {}",
                self.tst_info.message_imprint.hash_algorithm.oid,
                algorithm.name()
            )));
        }
        if self.imprint() != digest {
            return Err(untrusted("imprint does not match the submitted digest".to_string()));
        }
        if let Some(sent) = nonce {
            match &self.tst_info.nonce {
                Some(echoed) if asn1::strip_leading_zeros(echoed.as_bytes()) == asn1::strip_leading_zeros(sent) => {},
                Some(_) => return Err(untrusted("nonce does not match the request".to_string())),
                None => return Err(untrusted("TSA dropped the request nonce".to_string())),
            }
        }

        if anchors.is_empty() {
            return Err(untrusted("no trusted TSA certificates configured".to_string()));
        }
        let signer_info = self
            .signed_data
            .signer_infos
            .0
            .iter()
            .next()
            .ok_or_else(|| untrusted("token has no SignerInfo".to_string()))?;
        let certs = self.certificates();
        let signer = certificate::find_signer(&signer_info.sid, &certs)
            .or_else(|| certificate::find_signer(&signer_info.sid, anchors))
            .ok_or_else(|| untrusted("TSA certificate not found".to_string()))?;
        if !signer.has_timestamping_usage() {
            return Err(untrusted(format!(
                "{} lacks a critical id-kp-timeStamping extended key usage",
                signer.subject()
            )));
        }

        let tst_der = tst_info_der(&self.signed_data)?;
        container::verify_signer_info(signer_info, signer, &tst_der)
            .map_err(|e| untrusted(format!("token signature: {}", e)))?;

        let mut path = vec![signer.clone()];
        path.extend(certs.iter().filter(|c| *c != signer).cloned());
        certificate::verify_path(&path, anchors).map_err(|e| untrusted(e.to_string()))?;

        log::debug!(
            "Timestamp token from {} verified, generated at {}",
            signer.subject(),
            self.gen_time
        );
        Ok(())
    }
}

fn tst_info_der(signed_data: &SignedData) -> Result<Vec<u8>> {
    let econtent = signed_data
        .encap_content_info
        .econtent
        .as_ref()
        .ok_or_else(|| Error::UntrustedTimestamp("token has no TSTInfo content".to_string()))?;
    let octets = econtent
        .decode_as::<OctetString>()
        .map_err(|e| Error::UntrustedTimestamp(format!("TSTInfo is not wrapped in an OCTET STRING: {}", e)))?;
    Ok(octets.as_bytes().to_vec())
}

/// HTTP client for an RFC 3161 TSA.
pub struct TimestampClient {
    url: String,
    transport: Arc<dyn HttpTransport>,
    policy: NetworkPolicy,
    credentials: Option<(String, String)>,
    policy_oid: Option<ObjectIdentifier>,
    trusted: Vec<Certificate>,
}

impl std::fmt::Debug for TimestampClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampClient")
            .field("url", &self.url)
            .field("policy", &self.policy)
            .field("authenticated", &self.credentials.is_some())
            .field("trusted", &self.trusted.len())
            .finish()
    }
}

impl TimestampClient {
    /// Client for the TSA at `url`.
    pub fn new(url: impl Into<String>, transport: Arc<dyn HttpTransport>, policy: NetworkPolicy) -> Self {
        Self {
            url: url.into(),
            transport,
            policy,
            credentials: None,
            policy_oid: None,
            trusted: Vec::new(),
        }
    }

    /// Authenticate with HTTP basic auth.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Request a specific TSA policy.
    pub fn with_policy_oid(mut self, policy: ObjectIdentifier) -> Self {
        self.policy_oid = Some(policy);
        self
    }

    /// Trust tokens chaining to `anchor`.
    pub fn with_trusted_certificate(mut self, anchor: Certificate) -> Self {
        self.trusted.push(anchor);
        self
    }

    /// Trust tokens chaining to any of `anchors`.
    pub fn with_trusted_certificates(mut self, anchors: impl IntoIterator<Item = Certificate>) -> Self {
        self.trusted.extend(anchors);
        self
    }

    /// TSA URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// DER `TimeStampReq` for `digest`.
    pub fn build_request(&self, digest: &[u8], algorithm: DigestAlgorithm, nonce: &[u8]) -> Result<Vec<u8>> {
        let request = TimeStampReq {
            version: 1,
            message_imprint: MessageImprint {
                hash_algorithm: asn1::algorithm(algorithm.oid()),
                hashed_message: OctetString::new(digest)?,
            },
            req_policy: self.policy_oid,
            nonce: Some(Uint::new(nonce)?),
            cert_req: Some(true),
        };
        Ok(request.to_der()?)
    }

    /// Parse and verify a `TimeStampResp`.
    pub fn parse_response(
        &self,
        body: &[u8],
        digest: &[u8],
        algorithm: DigestAlgorithm,
        nonce: Option<&[u8]>,
    ) -> Result<TimestampToken> {
        let response = TimeStampResp::from_der(body)
            .map_err(|e| Error::TimestampUnavailable(format!("unparseable response from {}: {}", self.url, e)))?;
        if !response.status.is_granted() {
            return Err(Error::TimestampUnavailable(format!(
                "{} refused the request: {}",
                self.url,
                response.status.describe()
            )));
        }
        let content_info = response
            .time_stamp_token
            .ok_or_else(|| Error::TimestampUnavailable(format!("{} granted without a token", self.url)))?;
        let token = TimestampToken::from_content_info(&content_info)?;
        token.verify(digest, algorithm, nonce, &self.trusted)?;
        Ok(token)
    }
}

impl TimestampSource for TimestampClient {
    fn timestamp(&self, digest: &[u8], algorithm: DigestAlgorithm) -> Result<TimestampToken> {
        let nonce = uuid::Uuid::new_v4().as_u128().to_be_bytes();
        let nonce = asn1::strip_leading_zeros(&nonce);
        let body = self.build_request(digest, algorithm, nonce)?;

        let mut request = HttpRequest::post(&self.url, "application/timestamp-query", body)
            .with_accept("application/timestamp-reply");
        if let Some((user, password)) = &self.credentials {
            request = request.with_basic_auth(user.clone(), password.clone());
        }

        let response = send_with_retry(self.transport.as_ref(), &request, &self.policy).map_err(|e| match e {
            Error::Cancelled => e,
            other => Error::TimestampUnavailable(other.to_string()),
        })?;
        self.parse_response(&response, digest, algorithm, Some(nonce))
    }
}

/// TSA URL advertised in a certificate's Adobe timestamp extension.
pub fn tsa_url_from_certificate(cert: &Certificate) -> Option<String> {
    cert.adobe_timestamp_url()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fixture(name: &str) -> Vec<u8> {
        std::fs::read(format!("{}/tests/fixtures/pki/{}", env!("CARGO_MANIFEST_DIR"), name)).unwrap()
    }

    fn hello_digest() -> Vec<u8> {
        DigestAlgorithm::Sha256.digest(b"hello timestamp")
    }

    struct Offline;

    impl HttpTransport for Offline {
        fn send(&self, request: &HttpRequest, _timeout: Duration) -> Result<Vec<u8>> {
            Err(Error::Transport {
                url: request.url.clone(),
                reason: "timed out".to_string(),
            })
        }
    }

    fn client() -> TimestampClient {
        let policy = NetworkPolicy {
            timeout: Duration::from_millis(10),
            retry_count: 1,
            backoff: Duration::ZERO,
        };
        TimestampClient::new("http://tsa.seal.test", Arc::new(Offline), policy)
    }

    #[test]
    fn test_fixture_response_verifies() {
        let client = client().with_trusted_certificate(Certificate::from_der(&fixture("tsaroot.der")).unwrap());
        let token = client
            .parse_response(&fixture("ts.tsr"), &hello_digest(), DigestAlgorithm::Sha256, None)
            .unwrap();
        assert_eq!(token.imprint(), hello_digest().as_slice());
        assert_eq!(token.imprint_algorithm(), Some(DigestAlgorithm::Sha256));
        let certs = token.certificates();
        assert_eq!(certs.len(), 2);
        assert!(certs.contains(&Certificate::from_der(&fixture("tsa.der")).unwrap()));
        assert!(certs.contains(&Certificate::from_der(&fixture("tsaroot.der")).unwrap()));
        assert_eq!(token.generation_time().to_rfc3339(), "2026-10-19T18:28:37+00:00");
    }

    #[test]
    fn test_signer_without_timestamping_usage_is_untrusted() {
        // Signed by the document signer certificate, which chains to root.der
        let token = TimestampToken::from_der(&fixture("ts_signer_no_eku.der")).unwrap();
        assert_eq!(token.imprint(), hello_digest().as_slice());

        let root = Certificate::from_der(&fixture("root.der")).unwrap();
        let err = token.verify(&hello_digest(), DigestAlgorithm::Sha256, None, &[root]).unwrap_err();
        assert!(matches!(err, Error::UntrustedTimestamp(ref msg) if msg.contains("timeStamping")), "{}", err);
    }

    #[test]
    fn test_wrong_anchor_is_untrusted() {
        let client = client().with_trusted_certificate(Certificate::from_der(&fixture("root.der")).unwrap());
        let err = client
            .parse_response(&fixture("ts.tsr"), &hello_digest(), DigestAlgorithm::Sha256, None)
            .unwrap_err();
        assert!(matches!(err, Error::UntrustedTimestamp(_)));
    }

    #[test]
    fn test_imprint_mismatch_is_untrusted() {
        let client = client().with_trusted_certificate(Certificate::from_der(&fixture("tsaroot.der")).unwrap());
        let other = DigestAlgorithm::Sha256.digest(b"something else");
        let err = client
            .parse_response(&fixture("ts.tsr"), &other, DigestAlgorithm::Sha256, None)
            .unwrap_err();
        assert!(matches!(err, Error::UntrustedTimestamp(_)));
    }

    #[test]
    fn test_missing_nonce_is_untrusted() {
        let client = client().with_trusted_certificate(Certificate::from_der(&fixture("tsaroot.der")).unwrap());
        let err = client
            .parse_response(&fixture("ts.tsr"), &hello_digest(), DigestAlgorithm::Sha256, Some(&[7, 7]))
            .unwrap_err();
        assert!(matches!(err, Error::UntrustedTimestamp(_)));
    }

    #[test]
    fn test_rejection_status_is_unavailable() {
        // TimeStampResp { status: rejection }
        let rejected = [0x30, 0x05, 0x30, 0x03, 0x02, 0x01, 0x02];
        let err = client()
            .parse_response(&rejected, &hello_digest(), DigestAlgorithm::Sha256, None)
            .unwrap_err();
        assert!(matches!(err, Error::TimestampUnavailable(_)));
    }

    #[test]
    fn test_unreachable_tsa_is_unavailable() {
        let err = client().timestamp(&hello_digest(), DigestAlgorithm::Sha256).unwrap_err();
        assert!(matches!(err, Error::TimestampUnavailable(_)));
    }

    #[test]
    fn test_request_carries_nonce_and_cert_req() {
        let der = client().build_request(&hello_digest(), DigestAlgorithm::Sha256, &[1, 2, 3]).unwrap();
        let req = TimeStampReq::from_der(&der).unwrap();
        assert_eq!(req.version, 1);
        assert_eq!(req.nonce.unwrap().as_bytes(), &[1, 2, 3]);
        assert_eq!(req.cert_req, Some(true));
    }

    #[test]
    fn test_no_adobe_extension_on_fixture() {
        let tsa = Certificate::from_der(&fixture("tsa.der")).unwrap();
        assert_eq!(tsa_url_from_certificate(&tsa), None);
    }
}
