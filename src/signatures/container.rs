//! CMS `SignedData` containers for PDF signatures.
//!
//! Building happens in two steps. [`SignatureContainerBuilder::sign`]
//! assembles the signed attributes and asks the signing capability for the
//! signature value. [`SignedAttributes::finish`] then attaches the unsigned
//! attributes, whose content depends on that value (a timestamp over the
//! signature, CAdES revocation values), and yields the immutable
//! [`SignatureContainer`].

use super::asn1::{self, oid, EssCertIdV2, IssuerSerial, SigningCertificateV2};
use super::certificate::{self, CertificateChain};
use super::revocation::RevocationEvidence;
use super::software::SigningCapability;
use super::timestamp::TimestampToken;
use super::types::{DigestAlgorithm, SignatureSubFilter};
use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Utc};
use cms::cert::CertificateChoices;
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use der::asn1::{Any, GeneralizedTime, OctetString, SetOfVec, UtcTime};
use der::{Decode, Encode, Reader};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::time::Time;

/// Base size of a container without revocation data or timestamp.
const BASE_ESTIMATE: usize = 8192;
/// Extra room for embedded CRLs.
const CRL_ESTIMATE: usize = 10240;
/// Extra room per OCSP response, and for a timestamp token.
const RESPONSE_ESTIMATE: usize = 4192;

/// Upper bound for the DER container given what it will carry.
pub fn estimate_container_size(chain_len: usize, crl: bool, ocsp: bool, timestamp: bool) -> usize {
    let mut size = BASE_ESTIMATE;
    if crl {
        size += CRL_ESTIMATE;
    }
    if ocsp {
        size += RESPONSE_ESTIMATE * chain_len;
    }
    if timestamp {
        size += RESPONSE_ESTIMATE;
    }
    size
}

/// Builds the signed part of a detached CMS signature.
#[derive(Debug, Clone)]
pub struct SignatureContainerBuilder<'a> {
    algorithm: DigestAlgorithm,
    chain: &'a CertificateChain,
    profile: SignatureSubFilter,
    signing_time: DateTime<Utc>,
    archived_revocation: Option<&'a RevocationEvidence>,
}

impl<'a> SignatureContainerBuilder<'a> {
    /// Builder for `chain` using the current time as signing time.
    pub fn new(algorithm: DigestAlgorithm, chain: &'a CertificateChain) -> Self {
        Self {
            algorithm,
            chain,
            profile: SignatureSubFilter::default(),
            signing_time: Utc::now(),
            archived_revocation: None,
        }
    }

    /// Container profile; CAdES adds `signing-certificate-v2`.
    pub fn with_profile(mut self, profile: SignatureSubFilter) -> Self {
        self.profile = profile;
        self
    }

    /// Override the signing time.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = time;
        self
    }

    /// Embed revocation data in the signed `adbe-revocationInfoArchival`
    /// attribute (PKCS#7 profile).
    pub fn with_archived_revocation(mut self, evidence: &'a RevocationEvidence) -> Self {
        self.archived_revocation = Some(evidence);
        self
    }

    /// Digest algorithm.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Signed attributes for `message_digest`, in DER set order.
    pub fn signed_attributes(&self, message_digest: &[u8]) -> Result<SetOfVec<Attribute>> {
        if message_digest.len() != self.algorithm.output_len() {
            return Err(Error::InvalidSignature(format!(
                "message digest has {} bytes, {} produces {}",
                message_digest.len(),
                self.algorithm.name(),
                self.algorithm.output_len()
            )));
        }

        let mut attrs = vec![
            asn1::attribute(oid::ID_CONTENT_TYPE, &oid::ID_DATA)?,
            asn1::attribute(oid::ID_SIGNING_TIME, &signing_time(self.signing_time)?)?,
            asn1::attribute(oid::ID_MESSAGE_DIGEST, &OctetString::new(message_digest)?)?,
        ];

        if self.profile.is_cades() {
            let leaf = self.chain.leaf();
            let cert_id = EssCertIdV2 {
                hash_algorithm: match self.algorithm {
                    DigestAlgorithm::Sha256 => None,
                    other => Some(asn1::algorithm(other.oid())),
                },
                cert_hash: OctetString::new(self.algorithm.digest(leaf.der()))?,
                issuer_serial: Some(IssuerSerial {
                    issuer: vec![GeneralName::DirectoryName(leaf.issuer().clone())],
                    serial_number: leaf.serial_number().clone(),
                }),
            };
            let value = SigningCertificateV2 { certs: vec![cert_id] };
            attrs.push(asn1::attribute(oid::ID_AA_SIGNING_CERTIFICATE_V2, &value)?);
        }

        if let Some(evidence) = self.archived_revocation.filter(|e| !e.is_empty()) {
            attrs.push(asn1::attribute(
                oid::ADBE_REVOCATION_INFO_ARCHIVAL,
                &evidence.to_archival()?,
            )?);
        }

        Ok(SetOfVec::try_from(attrs)?)
    }

    /// Sign `message_digest` with `capability`.
    pub fn sign(&self, capability: &dyn SigningCapability, message_digest: &[u8]) -> Result<SignedAttributes> {
        let signed_attrs = self.signed_attributes(message_digest)?;
        let to_sign = self.algorithm.digest(&signed_attrs.to_der()?);
        let signature = capability.sign_digest(&to_sign, self.algorithm)?;
        if signature.is_empty() {
            return Err(Error::SigningCapability("capability returned an empty signature".to_string()));
        }
        log::debug!(
            "Signed {} attribute(s) with {}, signature is {} bytes",
            signed_attrs.len(),
            self.algorithm.name(),
            signature.len()
        );

        Ok(SignedAttributes {
            algorithm: self.algorithm,
            chain: self.chain.clone(),
            message_digest: message_digest.to_vec(),
            signed_attrs,
            signature_algorithm: capability.signature_algorithm(self.algorithm),
            signature,
        })
    }
}

fn signing_time(time: DateTime<Utc>) -> Result<Time> {
    let secs = u64::try_from(time.timestamp())
        .map_err(|_| Error::InvalidSignature(format!("signing time {} precedes 1970", time)))?;
    let unix = std::time::Duration::from_secs(secs);
    // RFC 5652: UTCTime through 2049, GeneralizedTime afterwards
    if time.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(unix)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(unix)?))
    }
}

/// Signature value over the signed attributes, before unsigned attributes
/// are attached.
#[derive(Debug, Clone)]
pub struct SignedAttributes {
    algorithm: DigestAlgorithm,
    chain: CertificateChain,
    message_digest: Vec<u8>,
    signed_attrs: SetOfVec<Attribute>,
    signature_algorithm: AlgorithmIdentifierOwned,
    signature: Vec<u8>,
}

impl SignedAttributes {
    /// Raw signature value; a signature timestamp covers its digest.
    pub fn signature_value(&self) -> &[u8] {
        &self.signature
    }

    /// Digest of the signature value, the imprint sent to a TSA.
    pub fn signature_digest(&self) -> Vec<u8> {
        self.algorithm.digest(&self.signature)
    }

    /// Attach unsigned attributes and produce the final container.
    pub fn finish(
        self,
        timestamp: Option<&TimestampToken>,
        revocation_values: Option<&RevocationEvidence>,
    ) -> Result<SignatureContainer> {
        let mut unsigned = Vec::new();
        if let Some(token) = timestamp {
            unsigned.push(asn1::attribute(oid::ID_AA_SIGNATURE_TIME_STAMP_TOKEN, &token.content_info()?)?);
        }
        if let Some(evidence) = revocation_values.filter(|e| !e.is_empty()) {
            unsigned.push(asn1::attribute(
                oid::ID_AA_ETS_REVOCATION_VALUES,
                &evidence.to_revocation_values()?,
            )?);
        }

        Ok(SignatureContainer {
            algorithm: self.algorithm,
            chain: self.chain,
            message_digest: self.message_digest,
            signed_attrs: self.signed_attrs,
            signature_algorithm: self.signature_algorithm,
            signature: self.signature,
            unsigned_attrs: unsigned,
            has_timestamp: timestamp.is_some(),
        })
    }
}

/// A complete detached CMS signature.
#[derive(Debug, Clone)]
pub struct SignatureContainer {
    algorithm: DigestAlgorithm,
    chain: CertificateChain,
    message_digest: Vec<u8>,
    signed_attrs: SetOfVec<Attribute>,
    signature_algorithm: AlgorithmIdentifierOwned,
    signature: Vec<u8>,
    unsigned_attrs: Vec<Attribute>,
    has_timestamp: bool,
}

impl SignatureContainer {
    /// Digest algorithm.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Byte-range digest the container signs.
    pub fn message_digest(&self) -> &[u8] {
        &self.message_digest
    }

    /// Signer chain.
    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }

    /// Raw signature value.
    pub fn signature_value(&self) -> &[u8] {
        &self.signature
    }

    /// Whether a signature timestamp token is attached.
    pub fn has_timestamp(&self) -> bool {
        self.has_timestamp
    }

    /// Signed attributes.
    pub fn signed_attributes(&self) -> &SetOfVec<Attribute> {
        &self.signed_attrs
    }

    /// Build the `SignedData` structure.
    pub fn signed_data(&self) -> Result<SignedData> {
        let leaf = self.chain.leaf();
        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(certificate::issuer_and_serial(leaf)),
            digest_alg: asn1::algorithm(self.algorithm.oid()),
            signed_attrs: Some(self.signed_attrs.clone()),
            signature_algorithm: self.signature_algorithm.clone(),
            signature: OctetString::new(self.signature.clone())?,
            unsigned_attrs: if self.unsigned_attrs.is_empty() {
                None
            } else {
                Some(SetOfVec::try_from(self.unsigned_attrs.clone())?)
            },
        };

        let certs = self
            .chain
            .iter()
            .map(|cert| CertificateChoices::Certificate(cert.x509().clone()))
            .collect::<Vec<_>>();

        Ok(SignedData {
            version: CmsVersion::V1,
            digest_algorithms: SetOfVec::try_from(vec![asn1::algorithm(self.algorithm.oid())])?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: oid::ID_DATA,
                econtent: None,
            },
            certificates: Some(CertificateSet(SetOfVec::try_from(certs)?)),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info])?),
        })
    }

    /// DER `ContentInfo` wrapping the `SignedData`.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        let content_info = ContentInfo {
            content_type: oid::ID_SIGNED_DATA,
            content: Any::encode_from(&self.signed_data()?)?,
        };
        Ok(content_info.to_der()?)
    }

    /// DER encoding, failing when it exceeds `capacity` bytes.
    pub fn to_der_within(&self, capacity: usize) -> Result<Vec<u8>> {
        let der = self.to_der()?;
        if der.len() > capacity {
            return Err(Error::ContainerTooLarge {
                actual: der.len(),
                capacity,
            });
        }
        Ok(der)
    }
}

/// Decode the `SignedData` of a `/Contents` value, ignoring the zero padding
/// after the DER structure.
pub fn parse_signed_data(contents: &[u8]) -> Result<SignedData> {
    let der = trim_padding(contents)?;
    let content_info = ContentInfo::from_der(der)
        .map_err(|e| Error::InvalidSignature(format!("/Contents is not a CMS ContentInfo: {}", e)))?;
    if content_info.content_type != oid::ID_SIGNED_DATA {
        return Err(Error::InvalidSignature(format!(
            "ContentInfo type is {}, not signedData",
            content_info.content_type
        )));
    }
    content_info
        .content
        .decode_as::<SignedData>()
        .map_err(|e| Error::InvalidSignature(format!("invalid SignedData: {}", e)))
}

/// Check a `SignerInfo` against the signed content.
///
/// Returns the signer's digest algorithm.
pub fn verify_signer_info(
    signer_info: &SignerInfo,
    signer: &certificate::Certificate,
    content: &[u8],
) -> Result<DigestAlgorithm> {
    let algorithm = signer_digest_algorithm(signer_info)?;
    verify_signer_info_digest(signer_info, signer, algorithm, &algorithm.digest(content))?;
    Ok(algorithm)
}

/// Digest algorithm named by a `SignerInfo`.
pub fn signer_digest_algorithm(signer_info: &SignerInfo) -> Result<DigestAlgorithm> {
    DigestAlgorithm::from_oid(&signer_info.digest_alg.oid).ok_or_else(|| {
        Error::InvalidSignature(format!("unsupported digest algorithm {}", signer_info.digest_alg.oid))
    })
}

/// The message-digest signed attribute, if present.
pub fn message_digest_attribute(signer_info: &SignerInfo) -> Result<Option<Vec<u8>>> {
    let Some(attrs) = &signer_info.signed_attrs else {
        return Ok(None);
    };
    match asn1::find_attribute(attrs, &oid::ID_MESSAGE_DIGEST) {
        Some(value) => Ok(Some(value.decode_as::<OctetString>()?.as_bytes().to_vec())),
        None => Ok(None),
    }
}

/// Check a `SignerInfo` against a precomputed digest of the signed content.
///
/// With signed attributes, their message-digest must equal
/// `content_digest` and the signature covers the DER `SET OF` attributes;
/// without them the signature covers the content digest directly.
pub fn verify_signer_info_digest(
    signer_info: &SignerInfo,
    signer: &certificate::Certificate,
    algorithm: DigestAlgorithm,
    content_digest: &[u8],
) -> Result<()> {
    let signed_digest = match &signer_info.signed_attrs {
        Some(attrs) => {
            let md = message_digest_attribute(signer_info)?
                .ok_or_else(|| Error::InvalidSignature("no message-digest attribute".to_string()))?;
            if md != content_digest {
                return Err(Error::InvalidSignature("message-digest does not match the content".to_string()));
            }
            algorithm.digest(&attrs.to_der()?)
        },
        None => content_digest.to_vec(),
    };

    let sig_oid = signer_info.signature_algorithm.oid;
    if sig_oid != oid::RSA_ENCRYPTION && sig_oid != algorithm.rsa_signature_oid() {
        return Err(Error::InvalidSignature(format!("unsupported signature algorithm {}", sig_oid)));
    }
    super::software::verify_rsa_digest(signer, algorithm, &signed_digest, signer_info.signature.as_bytes())
}

/// The leading DER TLV of `data`.
pub fn trim_padding(data: &[u8]) -> Result<&[u8]> {
    let reader = der::SliceReader::new(data)?;
    let header = reader.peek_header()?;
    let total = usize::try_from((header.encoded_len()? + header.length)?)?;
    data.get(..total)
        .ok_or_else(|| Error::InvalidSignature("CMS structure is truncated".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::certificate::Certificate;
    use crate::signatures::software::{self, RsaSoftwareSigner};
    use chrono::TimeZone;

    fn fixture(name: &str) -> Vec<u8> {
        std::fs::read(format!("{}/tests/fixtures/pki/{}", env!("CARGO_MANIFEST_DIR"), name)).unwrap()
    }

    fn chain() -> CertificateChain {
        CertificateChain::from_der_list(&[fixture("leaf.der"), fixture("root.der")]).unwrap()
    }

    fn signer() -> RsaSoftwareSigner {
        RsaSoftwareSigner::from_der(&fixture("leaf.key.der")).unwrap()
    }

    #[test]
    fn test_trim_padding_keeps_leading_tlv() {
        let padded = [0x30, 0x03, 0x02, 0x01, 0x05, 0x00, 0x00, 0x00];
        assert_eq!(trim_padding(&padded).unwrap(), &padded[..5]);
        assert!(trim_padding(&[0x30, 0x05, 0x02]).is_err());
    }

    #[test]
    fn test_estimate() {
        assert_eq!(estimate_container_size(2, false, false, false), 8192);
        assert_eq!(estimate_container_size(2, true, true, true), 8192 + 10240 + 2 * 4192 + 4192);
    }

    #[test]
    fn test_signed_attributes_are_deterministic() {
        let chain = chain();
        let time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let digest = DigestAlgorithm::Sha256.digest(b"document");
        let builder = SignatureContainerBuilder::new(DigestAlgorithm::Sha256, &chain).with_signing_time(time);
        let a = builder.signed_attributes(&digest).unwrap().to_der().unwrap();
        let b = builder.signed_attributes(&digest).unwrap().to_der().unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0], 0x31);
    }

    #[test]
    fn test_cades_adds_signing_certificate() {
        let chain = chain();
        let digest = DigestAlgorithm::Sha256.digest(b"document");
        let pkcs7 = SignatureContainerBuilder::new(DigestAlgorithm::Sha256, &chain)
            .signed_attributes(&digest)
            .unwrap();
        let cades = SignatureContainerBuilder::new(DigestAlgorithm::Sha256, &chain)
            .with_profile(SignatureSubFilter::CadesDetached)
            .signed_attributes(&digest)
            .unwrap();
        assert!(asn1::find_attribute(&pkcs7, &oid::ID_AA_SIGNING_CERTIFICATE_V2).is_none());
        assert!(asn1::find_attribute(&cades, &oid::ID_AA_SIGNING_CERTIFICATE_V2).is_some());
        assert_eq!(cades.len(), 4);
    }

    #[test]
    fn test_container_round_trip_verifies() {
        let chain = chain();
        let digest = DigestAlgorithm::Sha256.digest(b"document");
        let container = SignatureContainerBuilder::new(DigestAlgorithm::Sha256, &chain)
            .sign(&signer(), &digest)
            .unwrap()
            .finish(None, None)
            .unwrap();
        let der = container.to_der_within(8192).unwrap();

        let mut padded = der.clone();
        padded.extend_from_slice(&[0u8; 64]);
        let signed_data = parse_signed_data(&padded).unwrap();
        assert!(signed_data.encap_content_info.econtent.is_none());
        assert_eq!(signed_data.certificates.as_ref().unwrap().0.len(), 2);

        let info = signed_data.signer_infos.0.iter().next().unwrap();
        let attrs = info.signed_attrs.as_ref().unwrap();
        let md = asn1::find_attribute(attrs, &oid::ID_MESSAGE_DIGEST)
            .unwrap()
            .decode_as::<OctetString>()
            .unwrap();
        assert_eq!(md.as_bytes(), digest.as_slice());

        let leaf = Certificate::from_der(&fixture("leaf.der")).unwrap();
        let to_verify = DigestAlgorithm::Sha256.digest(&attrs.to_der().unwrap());
        software::verify_rsa_digest(&leaf, DigestAlgorithm::Sha256, &to_verify, info.signature.as_bytes())
            .unwrap();
    }

    #[test]
    fn test_container_too_large() {
        let chain = chain();
        let digest = DigestAlgorithm::Sha256.digest(b"document");
        let container = SignatureContainerBuilder::new(DigestAlgorithm::Sha256, &chain)
            .sign(&signer(), &digest)
            .unwrap()
            .finish(None, None)
            .unwrap();
        let err = container.to_der_within(100).unwrap_err();
        assert!(matches!(err, Error::ContainerTooLarge { capacity: 100, .. }));
    }

    #[test]
    fn test_wrong_digest_length_rejected() {
        let chain = chain();
        let err = SignatureContainerBuilder::new(DigestAlgorithm::Sha512, &chain)
            .signed_attributes(&[0u8; 32])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSignature(_)));
    }
}
