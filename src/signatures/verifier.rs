//! PDF signature verification.
//!
//! This module checks the signatures already present in a document: byte
//! range shape, the recomputed digest against the container's
//! message-digest attribute, and the signer's RSA signature over the signed
//! attributes.

use super::byterange::{ByteRange, ByteRangeDigestCalculator};
use super::certificate::{self, Certificate};
use super::container;
use super::asn1::{self, oid};
use super::field::{decode_text_string, FieldDescriptor, SignatureFieldManager};
use super::types::{SignatureInfo, SignatureSubFilter, VerificationResult, VerificationStatus};
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};

/// Verifier for PDF digital signatures.
#[derive(Debug, Default)]
pub struct SignatureVerifier {
    /// Trusted root certificates
    trusted_roots: Vec<Certificate>,
}

impl SignatureVerifier {
    /// Create a new signature verifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trusted root certificate.
    pub fn add_trusted_root(&mut self, cert: Certificate) {
        self.trusted_roots.push(cert);
    }

    /// Add multiple trusted root certificates.
    pub fn add_trusted_roots(&mut self, certs: impl IntoIterator<Item = Certificate>) {
        self.trusted_roots.extend(certs);
    }

    /// Verify every signed signature field of `doc`, in field order.
    pub fn verify_document(&self, doc: &PdfDocument) -> Result<Vec<VerificationResult>> {
        let fields = SignatureFieldManager::load(doc)?;
        let signed: Vec<&FieldDescriptor> = fields.signature_fields().filter(|f| f.signed).collect();
        log::debug!("Verifying {} signature(s)", signed.len());
        signed.into_iter().map(|field| self.verify_field(doc, field)).collect()
    }

    /// Verify the signature held by `field`.
    ///
    /// Structural problems of the signature itself are reported through the
    /// result; only an unreadable document is an error.
    pub fn verify_field(&self, doc: &PdfDocument, field: &FieldDescriptor) -> Result<VerificationResult> {
        let sig_ref = field
            .signature_ref
            .ok_or_else(|| Error::InvalidPdf(format!("field '{}' holds no signature dictionary", field.name)))?;
        let sig_dict = doc.load_object(sig_ref)?;

        let mut info = self.extract_signature_info(&sig_dict, doc.len())?;
        info.field_name = field.name.clone();
        let dict = sig_dict.as_dict().cloned().unwrap_or_default();

        let mut result = VerificationResult {
            signature_info: info,
            ..VerificationResult::default()
        };
        if let Err(e) = self.verify_dictionary(doc.as_bytes(), &dict, &mut result) {
            result.status = VerificationStatus::Invalid;
            result.messages.push(e.to_string());
        }
        log::debug!("Signature '{}': {:?}", field.name, result.status);
        Ok(result)
    }

    /// Extract signature information from a signature dictionary.
    pub fn extract_signature_info(&self, sig_dict: &Object, file_size: usize) -> Result<SignatureInfo> {
        let dict = match sig_dict {
            Object::Dictionary(d) => d,
            _ => return Err(Error::InvalidPdf("Signature must be a dictionary".to_string())),
        };

        let text = |key: &str| dict.get(key).and_then(Object::as_string).map(decode_text_string);
        let mut info = SignatureInfo {
            signer_name: text("Name"),
            signing_time: text("M"),
            reason: text("Reason"),
            location: text("Location"),
            sub_filter: dict
                .get("SubFilter")
                .and_then(Object::as_name)
                .and_then(SignatureSubFilter::from_pdf_name),
            ..SignatureInfo::default()
        };

        if let Some(range) = dict.get("ByteRange").and_then(|r| ByteRange::from_pdf_array(r).ok()) {
            info.byte_range = range.values().to_vec();
            info.covers_whole_document = range.end() == file_size as u64;
        }
        Ok(info)
    }

    fn verify_dictionary(&self, data: &[u8], dict: &Dictionary, result: &mut VerificationResult) -> Result<()> {
        let range = ByteRange::from_pdf_array(
            dict.get("ByteRange")
                .ok_or_else(|| Error::InvalidByteRange("missing /ByteRange".to_string()))?,
        )?;
        // The range ends where its revision ends, not necessarily at EOF.
        let revision_len = usize::try_from(range.end())
            .map_err(|_| Error::InvalidByteRange(format!("{} is out of range", range)))?;
        if revision_len > data.len() {
            return Err(Error::InvalidByteRange(format!("{} exceeds file size {}", range, data.len())));
        }
        range.validate(revision_len)?;
        let gap = range.gap();
        if gap.is_empty()
            || data.get(gap.contents_start) != Some(&b'<')
            || data.get(gap.contents_end - 1) != Some(&b'>')
        {
            return Err(Error::InvalidByteRange(format!("{} gap is not the /Contents hex string", range)));
        }

        let contents = dict
            .get("Contents")
            .and_then(Object::as_string)
            .ok_or_else(|| Error::InvalidSignature("missing /Contents".to_string()))?;
        let signed_data = container::parse_signed_data(contents)?;
        let signer_info = signed_data
            .signer_infos
            .0
            .iter()
            .next()
            .ok_or_else(|| Error::InvalidSignature("container has no SignerInfo".to_string()))?;

        let certs = certificate::certificates_of(&signed_data);
        let signer = certificate::find_signer(&signer_info.sid, &certs)
            .ok_or_else(|| Error::InvalidSignature("signer certificate not embedded".to_string()))?;
        result.signature_info.certificate_cn = signer.common_name();
        result.signature_info.has_timestamp = signer_info
            .unsigned_attrs
            .as_ref()
            .is_some_and(|attrs| asn1::find_attribute(attrs, &oid::ID_AA_SIGNATURE_TIME_STAMP_TOKEN).is_some());
        result.signature_info.has_revocation_info = signer_info
            .signed_attrs
            .as_ref()
            .is_some_and(|attrs| asn1::find_attribute(attrs, &oid::ADBE_REVOCATION_INFO_ARCHIVAL).is_some())
            || signer_info
                .unsigned_attrs
                .as_ref()
                .is_some_and(|attrs| asn1::find_attribute(attrs, &oid::ID_AA_ETS_REVOCATION_VALUES).is_some());

        let algorithm = container::signer_digest_algorithm(signer_info)?;
        let digest = ByteRangeDigestCalculator::new(algorithm).digest_byte_range(data, &range)?;
        result.digest_matches = match container::message_digest_attribute(signer_info)? {
            Some(md) => md == digest,
            None => signer_info.signed_attrs.is_none(),
        };
        if !result.digest_matches {
            result.status = VerificationStatus::Invalid;
            result.messages.push("Document digest does not match the signed message-digest".to_string());
            return Ok(());
        }

        match container::verify_signer_info_digest(signer_info, signer, algorithm, &digest) {
            Ok(()) => result.signature_valid = true,
            Err(e) => {
                result.status = VerificationStatus::Invalid;
                result.messages.push(format!("Signature verification failed: {}", e));
                return Ok(());
            },
        }

        result.status = VerificationStatus::Valid;
        if !result.signature_info.covers_whole_document {
            result.status = VerificationStatus::ValidWithWarnings;
            result
                .messages
                .push("Signature covers an earlier revision; the document was updated after signing".to_string());
        }

        if !self.trusted_roots.is_empty() {
            let mut path = vec![signer.clone()];
            path.extend(certs.iter().filter(|c| *c != signer).cloned());
            if let Err(e) = certificate::verify_path(&path, &self.trusted_roots) {
                result.status = VerificationStatus::Unknown;
                result.messages.push(format!("Certificate is not trusted: {}", e));
            }
        }
        Ok(())
    }

    /// Quick check if a signature appears valid (without full cryptographic verification).
    pub fn quick_check(&self, sig_dict: &Object) -> Result<bool> {
        let info = self.extract_signature_info(sig_dict, usize::MAX)?;

        let has_valid_byte_range = info.byte_range.len() == 4;
        let has_sub_filter = info.sub_filter.is_some();

        Ok(has_valid_byte_range && has_sub_filter)
    }
}
