//! ASN.1 structures that `cms` and `x509-cert` do not provide.
//!
//! RFC 3161 (time-stamp protocol), RFC 6960 (OCSP), RFC 5035 (ESS
//! signing-certificate-v2), RFC 5126 (CAdES revocation values) and Adobe's
//! `RevocationInfoArchival`, declared with the `der` derive macros, plus the
//! OIDs the signer uses.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use cms::content_info::ContentInfo;
use der::asn1::{Any, BitString, Int, ObjectIdentifier, OctetString, SetOfVec, Uint};
use der::{Encode, Enumerated, Sequence, Tag, Tagged};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::Extension;
use x509_cert::serial_number::SerialNumber;

/// Object identifiers.
pub mod oid {
    use der::asn1::ObjectIdentifier;

    /// id-data
    pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
    /// id-signedData
    pub const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
    /// id-contentType
    pub const ID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
    /// id-messageDigest
    pub const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
    /// id-signingTime
    pub const ID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
    /// id-aa-signingCertificateV2
    pub const ID_AA_SIGNING_CERTIFICATE_V2: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.47");
    /// id-aa-signatureTimeStampToken
    pub const ID_AA_SIGNATURE_TIME_STAMP_TOKEN: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");
    /// id-aa-ets-revocationValues
    pub const ID_AA_ETS_REVOCATION_VALUES: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.24");
    /// adbe-revocationInfoArchival
    pub const ADBE_REVOCATION_INFO_ARCHIVAL: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113583.1.1.8");
    /// Adobe timestamp certificate extension
    pub const ADBE_TIMESTAMP: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113583.1.1.9.1");
    /// id-ct-TSTInfo
    pub const ID_CT_TST_INFO: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");
    /// id-pkix-ocsp-basic
    pub const ID_PKIX_OCSP_BASIC: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.48.1.1");
    /// rsaEncryption
    pub const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
    /// id-ecPublicKey
    pub const EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
    /// id-sha1
    pub const ID_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
}

/// ```text
/// MessageImprint ::= SEQUENCE {
///     hashAlgorithm   AlgorithmIdentifier,
///     hashedMessage   OCTET STRING }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct MessageImprint {
    /// Digest algorithm
    pub hash_algorithm: AlgorithmIdentifierOwned,
    /// Digest value
    pub hashed_message: OctetString,
}

/// RFC 3161 `TimeStampReq` (extensions omitted).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampReq {
    /// Always 1
    pub version: u8,
    /// Digest to be timestamped
    pub message_imprint: MessageImprint,
    /// Requested TSA policy
    #[asn1(optional = "true")]
    pub req_policy: Option<ObjectIdentifier>,
    /// Replay protection nonce
    #[asn1(optional = "true")]
    pub nonce: Option<Uint>,
    /// Ask the TSA to include its certificate
    #[asn1(optional = "true")]
    pub cert_req: Option<bool>,
}

/// `PKIStatusInfo`.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PkiStatusInfo {
    /// 0 granted, 1 grantedWithMods, 2.. rejection/waiting/revocation
    pub status: u32,
    /// Free text from the TSA
    #[asn1(optional = "true")]
    pub status_string: Option<Vec<String>>,
    /// Failure bits
    #[asn1(optional = "true")]
    pub fail_info: Option<BitString>,
}

impl PkiStatusInfo {
    /// `granted` or `grantedWithMods`.
    pub fn is_granted(&self) -> bool {
        self.status <= 1
    }

    /// Status with any text the TSA sent along.
    pub fn describe(&self) -> String {
        match &self.status_string {
            Some(text) if !text.is_empty() => format!("status {} ({})", self.status, text.join("; ")),
            _ => format!("status {}", self.status),
        }
    }
}

/// RFC 3161 `TimeStampResp`.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampResp {
    /// Outcome
    pub status: PkiStatusInfo,
    /// `ContentInfo` of SignedData over TSTInfo
    #[asn1(optional = "true")]
    pub time_stamp_token: Option<ContentInfo>,
}

/// `Accuracy`.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct Accuracy {
    /// Whole seconds
    #[asn1(optional = "true")]
    pub seconds: Option<u32>,
    /// Milliseconds
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    pub millis: Option<u16>,
    /// Microseconds
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub micros: Option<u16>,
}

/// RFC 3161 `TSTInfo`.
///
/// `genTime` is kept raw: TSAs are allowed fractional seconds, which the
/// strict DER `GeneralizedTime` type rejects.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TstInfo {
    /// Always 1
    pub version: u8,
    /// TSA policy under which the token was issued
    pub policy: ObjectIdentifier,
    /// Echo of the request imprint
    pub message_imprint: MessageImprint,
    /// Token serial
    pub serial_number: Int,
    /// Generation time
    pub gen_time: Any,
    /// Clock accuracy
    #[asn1(optional = "true")]
    pub accuracy: Option<Accuracy>,
    /// Ordering flag
    #[asn1(optional = "true")]
    pub ordering: Option<bool>,
    /// Echo of the request nonce
    #[asn1(optional = "true")]
    pub nonce: Option<Uint>,
    /// TSA name
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub tsa: Option<GeneralName>,
    /// Extensions
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub extensions: Option<Vec<Extension>>,
}

impl TstInfo {
    /// Decoded `genTime`.
    pub fn generation_time(&self) -> Result<DateTime<Utc>> {
        parse_generalized_time(&self.gen_time)
    }
}

/// Parse a `GeneralizedTime` in UTC, with or without fractional seconds.
pub fn parse_generalized_time(value: &Any) -> Result<DateTime<Utc>> {
    if value.tag() != Tag::GeneralizedTime {
        return Err(Error::InvalidAsn1(format!("expected GeneralizedTime, found {}", value.tag())));
    }
    let text = std::str::from_utf8(value.value())
        .map_err(|_| Error::InvalidAsn1("GeneralizedTime is not ASCII".to_string()))?;
    let text = text
        .strip_suffix('Z')
        .ok_or_else(|| Error::InvalidAsn1(format!("GeneralizedTime '{}' is not in UTC", text)))?;
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (text, None),
    };
    let mut time = NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S")
        .map_err(|e| Error::InvalidAsn1(format!("invalid GeneralizedTime '{}': {}", text, e)))?;
    if let Some(fraction) = fraction {
        let digits: String = fraction.chars().take(9).collect();
        let nanos = format!("{:0<9}", digits)
            .parse::<i64>()
            .map_err(|_| Error::InvalidAsn1(format!("invalid fractional seconds '{}'", fraction)))?;
        time += chrono::Duration::nanoseconds(nanos);
    }
    Ok(DateTime::from_naive_utc_and_offset(time, Utc))
}

/// `IssuerSerial` from RFC 5035.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct IssuerSerial {
    /// Issuer as `GeneralNames`
    pub issuer: Vec<GeneralName>,
    /// Certificate serial
    pub serial_number: SerialNumber,
}

/// `ESSCertIDv2`; `hashAlgorithm` is omitted when it is the SHA-256 default.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct EssCertIdV2 {
    /// Digest algorithm of `cert_hash`
    #[asn1(optional = "true")]
    pub hash_algorithm: Option<AlgorithmIdentifierOwned>,
    /// Digest of the DER certificate
    pub cert_hash: OctetString,
    /// Issuer and serial of the certificate
    #[asn1(optional = "true")]
    pub issuer_serial: Option<IssuerSerial>,
}

/// `SigningCertificateV2` (policies omitted).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct SigningCertificateV2 {
    /// Signer certificate first
    pub certs: Vec<EssCertIdV2>,
}

/// Adobe `RevocationInfoArchival`, carried as a signed attribute.
///
/// ```text
/// RevocationInfoArchival ::= SEQUENCE {
///     crl          [0] EXPLICIT SEQUENCE OF CRLs OPTIONAL,
///     ocsp         [1] EXPLICIT SEQUENCE OF OCSPResponse OPTIONAL,
///     otherRevInfo [2] EXPLICIT SEQUENCE OF OtherRevInfo OPTIONAL }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct RevocationInfoArchival {
    /// DER CRLs
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub crl: Option<Vec<Any>>,
    /// DER `OCSPResponse`s
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub ocsp: Option<Vec<Any>>,
}

/// CAdES `RevocationValues`, carried as an unsigned attribute.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct RevocationValues {
    /// DER CRLs
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub crl_vals: Option<Vec<Any>>,
    /// DER `BasicOCSPResponse`s
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub ocsp_vals: Option<Vec<Any>>,
}

/// `OCSPResponseStatus`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Enumerated)]
#[repr(u32)]
pub enum OcspResponseStatus {
    /// Response has valid confirmations
    Successful = 0,
    /// Illegal confirmation request
    MalformedRequest = 1,
    /// Internal error in issuer
    InternalError = 2,
    /// Try again later
    TryLater = 3,
    /// Must sign the request
    SigRequired = 5,
    /// Request unauthorized
    Unauthorized = 6,
}

/// `ResponseBytes`.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct ResponseBytes {
    /// Normally `id-pkix-ocsp-basic`
    pub response_type: ObjectIdentifier,
    /// DER of the typed response
    pub response: OctetString,
}

/// `OCSPResponse`.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct OcspResponse {
    /// Processing status
    pub response_status: OcspResponseStatus,
    /// Present when successful
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub response_bytes: Option<ResponseBytes>,
}

/// `BasicOCSPResponse`, with the response data left undecoded.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct BasicOcspResponse {
    /// `ResponseData`
    pub tbs_response_data: Any,
    /// Signature algorithm
    pub signature_algorithm: AlgorithmIdentifierOwned,
    /// Responder signature
    pub signature: BitString,
    /// Responder certificates
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub certs: Option<Vec<Any>>,
}

/// OCSP `CertID`.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CertId {
    /// Hash used for the two hashes below
    pub hash_algorithm: AlgorithmIdentifierOwned,
    /// Hash of the issuer's DER subject name
    pub issuer_name_hash: OctetString,
    /// Hash of the issuer's public key bits
    pub issuer_key_hash: OctetString,
    /// Serial of the certificate being checked
    pub serial_number: SerialNumber,
}

/// OCSP `Request` (no extensions).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct OcspSingleRequest {
    /// Certificate being checked
    pub req_cert: CertId,
}

/// OCSP `TBSRequest` (v1, no requestor name or extensions).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TbsRequest {
    /// Requests
    pub request_list: Vec<OcspSingleRequest>,
}

/// Unsigned `OCSPRequest`.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct OcspRequest {
    /// Body
    pub tbs_request: TbsRequest,
}

/// Value of the Adobe timestamp extension (1.2.840.113583.1.1.9.1).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct AdobeTimestamp {
    /// Extension version
    pub version: Int,
    /// TSA location
    pub location: GeneralName,
    /// Whether the TSA requires authentication
    #[asn1(optional = "true")]
    pub requires_auth: Option<bool>,
}

/// Algorithm identifier without parameters.
pub fn algorithm(oid: ObjectIdentifier) -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned { oid, parameters: None }
}

/// Algorithm identifier with explicit NULL parameters.
pub fn algorithm_with_null(oid: ObjectIdentifier) -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid,
        parameters: Some(Any::null()),
    }
}

/// Single-valued attribute.
pub fn attribute(oid: ObjectIdentifier, value: &impl Encode) -> Result<Attribute> {
    let value = <Any as der::Decode>::from_der(&value.to_der()?)?;
    let values = SetOfVec::try_from(vec![value])?;
    Ok(Attribute { oid, values })
}

/// First value of the attribute `oid`.
pub fn find_attribute<'a>(attrs: &'a SetOfVec<Attribute>, oid: &ObjectIdentifier) -> Option<&'a Any> {
    attrs
        .iter()
        .find(|attr| attr.oid == *oid)
        .and_then(|attr| attr.values.iter().next())
}

/// `bytes` with leading zero octets removed.
pub fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}
