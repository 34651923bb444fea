//! X.509 certificates and signer chains.
//!
//! A [`Certificate`] keeps its DER bytes together with the `x509-cert`
//! decoding used to build CMS structures; inspection of extensions and
//! signature checks go through `x509-parser`.

use super::asn1::{oid, AdobeTimestamp};
use crate::error::{Error, Result};
use der::{Decode, Encode};
use x509_cert::ext::pkix::name::GeneralName;
use x509_parser::prelude::{FromDer, ParsedExtension, X509Certificate};

/// `id-ad-ocsp` access method.
const ID_AD_OCSP: &str = "1.3.6.1.5.5.7.48.1";

/// A parsed X.509 certificate.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    cert: x509_cert::Certificate,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.cert.tbs_certificate.subject.to_string())
            .field("serial", &self.serial_hex())
            .finish()
    }
}

impl Certificate {
    /// Parse a DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let cert = x509_cert::Certificate::from_der(der)
            .map_err(|e| Error::InvalidCertificateChain(format!("unparseable certificate: {}", e)))?;
        X509Certificate::from_der(der)
            .map_err(|e| Error::InvalidCertificateChain(format!("unparseable certificate: {}", e)))?;
        Ok(Self { der: der.to_vec(), cert })
    }

    /// Parse every `CERTIFICATE` block of a PEM document.
    pub fn from_pem_bundle(pem: &[u8]) -> Result<Vec<Self>> {
        let mut certs = Vec::new();
        for block in x509_parser::pem::Pem::iter_from_buffer(pem) {
            let block = block.map_err(|e| Error::InvalidCertificateChain(format!("invalid PEM: {}", e)))?;
            if block.label == "CERTIFICATE" {
                certs.push(Self::from_der(&block.contents)?);
            }
        }
        if certs.is_empty() {
            return Err(Error::InvalidCertificateChain("no CERTIFICATE block in PEM input".to_string()));
        }
        Ok(certs)
    }

    /// Parse DER or PEM input.
    pub fn load(data: &[u8]) -> Result<Vec<Self>> {
        if data.windows(10).any(|w| w == b"-----BEGIN") {
            Self::from_pem_bundle(data)
        } else {
            Ok(vec![Self::from_der(data)?])
        }
    }

    /// DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// `x509-cert` view, used when building CMS structures.
    pub fn x509(&self) -> &x509_cert::Certificate {
        &self.cert
    }

    fn parsed(&self) -> Result<X509Certificate<'_>> {
        X509Certificate::from_der(&self.der)
            .map(|(_, cert)| cert)
            .map_err(|e| Error::InvalidCertificateChain(format!("unparseable certificate: {}", e)))
    }

    /// Subject distinguished name.
    pub fn subject(&self) -> &x509_cert::name::Name {
        &self.cert.tbs_certificate.subject
    }

    /// Issuer distinguished name.
    pub fn issuer(&self) -> &x509_cert::name::Name {
        &self.cert.tbs_certificate.issuer
    }

    /// Serial number.
    pub fn serial_number(&self) -> &x509_cert::serial_number::SerialNumber {
        &self.cert.tbs_certificate.serial_number
    }

    /// Serial number as upper-case hex.
    pub fn serial_hex(&self) -> String {
        crate::writer::hex_upper(self.serial_number().as_bytes())
    }

    /// First common name of the subject.
    pub fn common_name(&self) -> Option<String> {
        let parsed = self.parsed().ok()?;
        let cn = parsed
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);
        cn
    }

    /// Whether the certificate names itself as issuer and its signature
    /// verifies with its own key. Self-issued certificates signed by another
    /// key (key rollover) are not self-signed.
    pub fn is_self_signed(&self) -> bool {
        self.issuer() == self.subject() && self.verify_issued_by(self).is_ok()
    }

    /// Whether the certificate may sign timestamp tokens: a critical
    /// extended key usage listing `id-kp-timeStamping` (RFC 3161 §2.3).
    pub fn has_timestamping_usage(&self) -> bool {
        let Ok(parsed) = self.parsed() else {
            return false;
        };
        match parsed.extended_key_usage() {
            Ok(Some(eku)) => eku.critical && eku.value.time_stamping,
            _ => false,
        }
    }

    /// Whether `issuer`'s subject is this certificate's issuer.
    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        self.issuer() == issuer.subject()
    }

    /// Verify this certificate's signature with `issuer`'s public key.
    pub fn verify_issued_by(&self, issuer: &Certificate) -> Result<()> {
        let cert = self.parsed()?;
        let issuer_parsed = issuer.parsed()?;
        cert.verify_signature(Some(issuer_parsed.public_key())).map_err(|e| {
            Error::InvalidCertificateChain(format!(
                "signature of {} does not verify with {}: {}",
                self.subject(),
                issuer.subject(),
                e
            ))
        })
    }

    /// DER `SubjectPublicKeyInfo`.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        Ok(self.cert.tbs_certificate.subject_public_key_info.to_der()?)
    }

    /// Raw public key bits (the BIT STRING contents), as hashed in an OCSP `CertID`.
    pub fn public_key_bits(&self) -> &[u8] {
        self.cert
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes()
    }

    /// Whether the key is RSA.
    pub fn is_rsa(&self) -> bool {
        self.cert.tbs_certificate.subject_public_key_info.algorithm.oid == oid::RSA_ENCRYPTION
    }

    /// HTTP(S) URLs of the CRL distribution points.
    pub fn crl_urls(&self) -> Vec<String> {
        let Ok(parsed) = self.parsed() else {
            return Vec::new();
        };
        let mut urls = Vec::new();
        for ext in parsed.extensions() {
            if let ParsedExtension::CRLDistributionPoints(points) = ext.parsed_extension() {
                for point in points.iter() {
                    if let Some(x509_parser::extensions::DistributionPointName::FullName(names)) =
                        &point.distribution_point
                    {
                        urls.extend(names.iter().filter_map(http_uri));
                    }
                }
            }
        }
        urls
    }

    /// OCSP responder URLs from the authority information access extension.
    pub fn ocsp_urls(&self) -> Vec<String> {
        let Ok(parsed) = self.parsed() else {
            return Vec::new();
        };
        let mut urls = Vec::new();
        for ext in parsed.extensions() {
            if let ParsedExtension::AuthorityInfoAccess(aia) = ext.parsed_extension() {
                for desc in aia.iter() {
                    if desc.access_method.to_id_string() == ID_AD_OCSP {
                        urls.extend(http_uri(&desc.access_location));
                    }
                }
            }
        }
        urls
    }

    /// TSA URL from the Adobe timestamp extension, if present.
    pub fn adobe_timestamp_url(&self) -> Option<String> {
        let extensions = self.cert.tbs_certificate.extensions.as_ref()?;
        let ext = extensions.iter().find(|ext| ext.extn_id == oid::ADBE_TIMESTAMP)?;
        let value = AdobeTimestamp::from_der(ext.extn_value.as_bytes()).ok()?;
        match value.location {
            GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
            _ => None,
        }
    }
}

fn http_uri(name: &x509_parser::extensions::GeneralName<'_>) -> Option<String> {
    match name {
        x509_parser::extensions::GeneralName::URI(uri)
            if uri.starts_with("http://") || uri.starts_with("https://") =>
        {
            Some(uri.to_string())
        },
        _ => None,
    }
}

/// Signer certificate chain, leaf first.
///
/// Every certificate is issued by the one that follows it. The chain may
/// stop before the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    certs: Vec<Certificate>,
}

impl CertificateChain {
    /// Build a chain, checking issuer/subject links.
    pub fn new(certs: Vec<Certificate>) -> Result<Self> {
        if certs.is_empty() {
            return Err(Error::InvalidCertificateChain("chain is empty".to_string()));
        }
        for (i, pair) in certs.windows(2).enumerate() {
            if !pair[0].is_issued_by(&pair[1]) {
                return Err(Error::InvalidCertificateChain(format!(
                    "certificate {} ({}) is not issued by certificate {} ({})",
                    i,
                    pair[0].subject(),
                    i + 1,
                    pair[1].subject()
                )));
            }
        }
        Ok(Self { certs })
    }

    /// Build a chain from DER certificates, leaf first.
    pub fn from_der_list<B: AsRef<[u8]>>(ders: &[B]) -> Result<Self> {
        let certs = ders
            .iter()
            .map(|der| Certificate::from_der(der.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(certs)
    }

    /// The signer certificate.
    pub fn leaf(&self) -> &Certificate {
        &self.certs[0]
    }

    /// All certificates, leaf first.
    pub fn certificates(&self) -> &[Certificate] {
        &self.certs
    }

    /// Number of certificates.
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Always false for a constructed chain.
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Issuer of the certificate at `index`, if the chain contains it.
    pub fn issuer_of(&self, index: usize) -> Option<&Certificate> {
        self.certs.get(index + 1)
    }

    /// Iterate leaf to root.
    pub fn iter(&self) -> std::slice::Iter<'_, Certificate> {
        self.certs.iter()
    }
}

impl<'a> IntoIterator for &'a CertificateChain {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.certs.iter()
    }
}

/// Check that `path` (leaf first) is linked by verified signatures and ends
/// at, or is issued by, one of `anchors`.
pub fn verify_path(path: &[Certificate], anchors: &[Certificate]) -> Result<()> {
    let leaf = path
        .first()
        .ok_or_else(|| Error::InvalidCertificateChain("empty certification path".to_string()))?;
    let mut current = leaf;
    let mut remaining: Vec<&Certificate> = path[1..].iter().collect();

    for _ in 0..=path.len() {
        if let Some(anchor) = anchors.iter().find(|a| *a == current) {
            log::debug!("Certification path ends at trusted anchor {}", anchor.subject());
            return Ok(());
        }
        if let Some(anchor) = anchors.iter().find(|a| current.is_issued_by(a)) {
            current.verify_issued_by(anchor)?;
            return Ok(());
        }
        let Some(pos) = remaining.iter().position(|c| current.is_issued_by(c) && *c != current) else {
            break;
        };
        let issuer = remaining.remove(pos);
        current.verify_issued_by(issuer)?;
        current = issuer;
    }

    Err(Error::InvalidCertificateChain(format!(
        "no trusted anchor for {}",
        leaf.subject()
    )))
}

/// Digest of the DER `Name` and the key bits of `issuer`, as used in OCSP.
pub fn issuer_hashes(issuer: &Certificate) -> Result<(Vec<u8>, Vec<u8>)> {
    use sha1::{Digest, Sha1};
    let name_hash = Sha1::digest(issuer.subject().to_der()?).to_vec();
    let key_hash = Sha1::digest(issuer.public_key_bits()).to_vec();
    Ok((name_hash, key_hash))
}

/// `IssuerAndSerialNumber` identifying `cert` in a `SignerInfo`.
pub fn issuer_and_serial(cert: &Certificate) -> cms::cert::IssuerAndSerialNumber {
    cms::cert::IssuerAndSerialNumber {
        issuer: cert.issuer().clone(),
        serial_number: cert.serial_number().clone(),
    }
}

/// Find the certificate matching a `SignerIdentifier`.
pub fn find_signer<'c>(
    sid: &cms::signed_data::SignerIdentifier,
    candidates: &'c [Certificate],
) -> Option<&'c Certificate> {
    match sid {
        cms::signed_data::SignerIdentifier::IssuerAndSerialNumber(isn) => candidates
            .iter()
            .find(|c| c.issuer() == &isn.issuer && c.serial_number() == &isn.serial_number),
        cms::signed_data::SignerIdentifier::SubjectKeyIdentifier(ski) => candidates.iter().find(|c| {
            subject_key_identifier(c).as_deref() == Some(ski.0.as_bytes())
        }),
    }
}

fn subject_key_identifier(cert: &Certificate) -> Option<Vec<u8>> {
    let parsed = cert.parsed().ok()?;
    let ski = parsed.extensions().iter().find_map(|ext| match ext.parsed_extension() {
        ParsedExtension::SubjectKeyIdentifier(ski) => Some(ski.0.to_vec()),
        _ => None,
    });
    ski
}

/// Certificates embedded in a `SignedData`.
pub fn certificates_of(signed_data: &cms::signed_data::SignedData) -> Vec<Certificate> {
    let Some(set) = &signed_data.certificates else {
        return Vec::new();
    };
    set.0
        .iter()
        .filter_map(|choice| match choice {
            cms::cert::CertificateChoices::Certificate(cert) => cert.to_der().ok(),
            _ => None,
        })
        .filter_map(|der| Certificate::from_der(&der).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> Vec<u8> {
        std::fs::read(format!("{}/tests/fixtures/pki/{}", env!("CARGO_MANIFEST_DIR"), name)).unwrap()
    }

    #[test]
    fn test_leaf_fields() {
        let leaf = Certificate::from_der(&fixture("leaf.der")).unwrap();
        assert_eq!(leaf.common_name().as_deref(), Some("Seal Test Signer"));
        assert_eq!(leaf.serial_hex(), "1092");
        assert_eq!(leaf.crl_urls(), vec!["http://crl.seal.test/root.crl".to_string()]);
        assert_eq!(leaf.ocsp_urls(), vec!["http://ocsp.seal.test".to_string()]);
        assert!(leaf.is_rsa());
        assert!(!leaf.is_self_signed());
    }

    #[test]
    fn test_chain_links() {
        let chain = CertificateChain::from_der_list(&[fixture("leaf.der"), fixture("root.der")]).unwrap();
        assert_eq!(chain.len(), 2);
        assert!(chain.certificates()[1].is_self_signed());
        chain.leaf().verify_issued_by(&chain.certificates()[1]).unwrap();
    }

    #[test]
    fn test_self_issued_with_bad_signature_is_not_self_signed() {
        let mut der = fixture("root.der");
        let last = der.len() - 1;
        der[last] ^= 0xFF;
        let tampered = Certificate::from_der(&der).unwrap();
        assert!(tampered.is_issued_by(&tampered));
        assert!(!tampered.is_self_signed());
    }

    #[test]
    fn test_timestamping_usage() {
        assert!(Certificate::from_der(&fixture("tsa.der")).unwrap().has_timestamping_usage());
        assert!(!Certificate::from_der(&fixture("leaf.der")).unwrap().has_timestamping_usage());
        assert!(!Certificate::from_der(&fixture("tsaroot.der")).unwrap().has_timestamping_usage());
    }

    #[test]
    fn test_chain_rejects_wrong_order() {
        let err = CertificateChain::from_der_list(&[fixture("root.der"), fixture("leaf.der")]).unwrap_err();
        assert!(matches!(err, Error::InvalidCertificateChain(_)));
        let empty: [Vec<u8>; 0] = [];
        assert!(CertificateChain::from_der_list(&empty).is_err());
    }

    #[test]
    fn test_verify_path_to_anchor() {
        let leaf = Certificate::from_der(&fixture("leaf.der")).unwrap();
        let root = Certificate::from_der(&fixture("root.der")).unwrap();
        let tsa_root = Certificate::from_der(&fixture("tsaroot.der")).unwrap();
        verify_path(&[leaf.clone()], &[root.clone()]).unwrap();
        verify_path(&[leaf.clone(), root.clone()], &[root]).unwrap();
        assert!(verify_path(&[leaf], &[tsa_root]).is_err());
    }

    #[test]
    fn test_issuer_hashes_are_sha1() {
        let root = Certificate::from_der(&fixture("root.der")).unwrap();
        let (name, key) = issuer_hashes(&root).unwrap();
        assert_eq!(name.len(), 20);
        assert_eq!(key.len(), 20);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Certificate::from_der(b"not a certificate").is_err());
    }
}
