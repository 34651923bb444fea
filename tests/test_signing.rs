//! End-to-end signing and verification.

mod common;

use common::{chain, pki, signer, signer_key, FixedTimestamp, PdfBuilder};
use pdf_seal::config::SignerConfig;
use pdf_seal::document::PdfDocument;
use pdf_seal::error::{Error, ErrorKind, Result};
use pdf_seal::geometry::Rect;
use pdf_seal::object::Object;
use pdf_seal::signatures::container::{message_digest_attribute, parse_signed_data};
use pdf_seal::signatures::{
    ByteRangeDigestCalculator, CancellationToken, DigestAlgorithm, KeyAlgorithm, PdfSigner, SignatureAppearance,
    SignatureFieldManager, SignatureSubFilter, SignatureVerifier, SignedDocument, SigningCapability, SigningState,
    VerificationStatus,
};
use proptest::prelude::*;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

fn sign(input: &[u8], config: SignerConfig) -> SignedDocument {
    let doc = PdfDocument::from_bytes(input.to_vec()).unwrap();
    signer().with_config(config).sign(&doc).unwrap()
}

/// The message-digest attribute of the container in field `name`.
fn container_message_digest(bytes: &[u8], name: &str) -> Vec<u8> {
    let doc = PdfDocument::from_bytes(bytes.to_vec()).unwrap();
    let fields = SignatureFieldManager::load(&doc).unwrap();
    let sig_ref = fields.get(name).unwrap().signature_ref.unwrap();
    let sig = doc.load_object(sig_ref).unwrap();
    let contents = sig.as_dict().unwrap().get("Contents").and_then(Object::as_string).unwrap().to_vec();
    let signed_data = parse_signed_data(&contents).unwrap();
    let signer_info = signed_data.signer_infos.0.iter().next().unwrap();
    message_digest_attribute(signer_info).unwrap().unwrap()
}

#[test]
fn test_digest_matches_manual_sha256_over_spans() {
    let input = PdfBuilder::new().build();
    let signed = sign(&input, SignerConfig::new().with_estimated_container_size(8192));

    assert!(signed.container_len() <= 8192);
    assert_eq!(&signed.bytes()[..input.len()], input.as_slice());

    let (a0, a1) = signed.byte_range().first_span();
    let (b0, b1) = signed.byte_range().second_span();
    let mut hasher = Sha256::new();
    hasher.update(&signed.bytes()[a0 as usize..a1 as usize]);
    hasher.update(&signed.bytes()[b0 as usize..b1 as usize]);
    let manual = hasher.finalize().to_vec();

    assert_eq!(container_message_digest(signed.bytes(), &signed.field().name), manual);
    assert_eq!(b1 as usize, signed.bytes().len());
}

#[test]
fn test_signed_document_verifies() {
    let signed = sign(&PdfBuilder::new().build(), SignerConfig::new().with_reason("Approved"));
    let results = SignatureVerifier::new().verify_document(&signed.to_document().unwrap()).unwrap();

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.status, VerificationStatus::Valid, "{:?}", result.messages);
    assert!(result.digest_matches);
    assert!(result.signature_valid);
    assert!(result.signature_info.covers_whole_document);
    assert_eq!(result.signature_info.certificate_cn.as_deref(), Some("Seal Test Signer"));
    assert_eq!(result.signature_info.signer_name.as_deref(), Some("Seal Test Signer"));
    assert_eq!(result.signature_info.reason.as_deref(), Some("Approved"));
    assert_eq!(result.signature_info.sub_filter, Some(SignatureSubFilter::Pkcs7Detached));
    assert!(!result.signature_info.has_timestamp);
}

#[test]
fn test_trusted_root_accepts_chain() {
    let signed = sign(&PdfBuilder::new().build(), SignerConfig::new());
    let mut verifier = SignatureVerifier::new();
    verifier.add_trusted_root(common::certificate("root.der"));
    let results = verifier.verify_document(&signed.to_document().unwrap()).unwrap();
    assert_eq!(results[0].status, VerificationStatus::Valid, "{:?}", results[0].messages);

    let mut verifier = SignatureVerifier::new();
    verifier.add_trusted_root(common::certificate("tsaroot.der"));
    let results = verifier.verify_document(&signed.to_document().unwrap()).unwrap();
    assert_eq!(results[0].status, VerificationStatus::Unknown);
}

#[test]
fn test_sign_twice_keeps_first_signature_valid() {
    let input = PdfBuilder::new().build();
    let first = sign(&input, SignerConfig::new().with_field_name("sig1"));
    let second = sign(first.bytes(), SignerConfig::new().with_field_name("sig2"));

    assert_eq!(&second.bytes()[..first.bytes().len()], first.bytes());

    let results = SignatureVerifier::new().verify_document(&second.to_document().unwrap()).unwrap();
    assert_eq!(results.len(), 2);
    let sig1 = results.iter().find(|r| r.signature_info.field_name == "sig1").unwrap();
    let sig2 = results.iter().find(|r| r.signature_info.field_name == "sig2").unwrap();

    assert!(sig1.digest_matches && sig1.signature_valid);
    assert_eq!(sig1.status, VerificationStatus::ValidWithWarnings);
    assert!(!sig1.signature_info.covers_whole_document);
    assert_eq!(sig1.signature_info.byte_range[2] + sig1.signature_info.byte_range[3], first.bytes().len() as u64);

    assert_eq!(sig2.status, VerificationStatus::Valid, "{:?}", sig2.messages);
    assert!(sig2.signature_info.covers_whole_document);
}

#[test]
fn test_n_prior_signatures_stay_valid() {
    let mut bytes = PdfBuilder::new().pages(2).build();
    for _ in 0..3 {
        bytes = sign(&bytes, SignerConfig::new()).into_bytes();
    }
    let results = SignatureVerifier::new()
        .verify_document(&PdfDocument::from_bytes(bytes).unwrap())
        .unwrap();
    let names: Vec<&str> = results.iter().map(|r| r.signature_info.field_name.as_str()).collect();
    assert_eq!(names, vec!["Signature1", "Signature2", "Signature3"]);
    assert!(results.iter().all(|r| r.digest_matches && r.signature_valid));
    assert_eq!(results.iter().filter(|r| r.status == VerificationStatus::Valid).count(), 1);
}

#[test]
fn test_signing_signed_field_again_fails() {
    let first = sign(&PdfBuilder::new().build(), SignerConfig::new().with_field_name("sig1"));
    let doc = first.to_document().unwrap();
    let mut signer = signer().with_config(SignerConfig::new().with_field_name("sig1"));
    let err = signer.sign(&doc).unwrap_err();

    assert!(matches!(err, Error::FieldAlreadySigned(ref name) if name == "sig1"));
    assert_eq!(signer.state(), SigningState::Failed(ErrorKind::FieldAlreadySigned));
}

#[test]
fn test_reuses_empty_signature_field() {
    let input = PdfBuilder::new()
        .field("<< /T (Approval) /FT /Sig /Type /Annot /Subtype /Widget /Rect [10 10 110 60] /P {page} >>")
        .build();
    let signed = sign(&input, SignerConfig::new().with_field_name("Approval"));

    assert_eq!(signed.field().field_ref.id, 5);
    let doc = signed.to_document().unwrap();
    let fields = SignatureFieldManager::load(&doc).unwrap();
    assert_eq!(fields.fields().len(), 1);
    assert!(fields.get("Approval").unwrap().signed);
    assert_eq!(fields.get("Approval").unwrap().rect, Some(Rect::from_points(10.0, 10.0, 110.0, 60.0)));
}

#[test]
fn test_non_signature_field_is_format_error() {
    let input = PdfBuilder::new()
        .field("<< /T (Name) /FT /Tx /Rect [0 0 100 20] /P {page} >>")
        .build();
    let doc = PdfDocument::from_bytes(input).unwrap();
    let err = signer()
        .with_config(SignerConfig::new().with_field_name("Name"))
        .sign(&doc)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_visible_signature_has_appearance() {
    let appearance = SignatureAppearance::new(1, Rect::new(72.0, 72.0, 220.0, 60.0));
    let config = SignerConfig::new()
        .with_appearance(appearance)
        .with_reason("Reviewed")
        .with_location("Lisbon");
    let signed = sign(&PdfBuilder::new().pages(2).build(), config);

    assert_eq!(signed.field().page, Some(1));
    let doc = signed.to_document().unwrap();
    let widget = doc.load_object(signed.field().field_ref).unwrap();
    let ap = widget.as_dict().unwrap().get("AP").and_then(Object::as_dict).unwrap().clone();
    let stream = doc.load_object(ap.get("N").and_then(Object::as_reference).unwrap()).unwrap();
    let content = String::from_utf8_lossy(&stream.decode_stream_data().unwrap()).into_owned();
    assert!(content.contains("Digitally signed by Seal Test Signer"));
    assert!(content.contains("Reason: Reviewed"));

    let page = doc.load_object(doc.page_ref(1).unwrap()).unwrap();
    let annots = page.as_dict().unwrap().get("Annots").and_then(Object::as_array).unwrap().clone();
    assert_eq!(annots[0].as_reference(), Some(signed.field().field_ref));

    let results = SignatureVerifier::new().verify_document(&doc).unwrap();
    assert_eq!(results[0].status, VerificationStatus::Valid, "{:?}", results[0].messages);
}

#[test]
fn test_custom_appearance_content() {
    let appearance = SignatureAppearance::new(0, Rect::new(0.0, 0.0, 100.0, 40.0)).with_content("0 0 1 rg 0 0 100 40 re f");
    let signed = sign(&PdfBuilder::new().build(), SignerConfig::new().with_appearance(appearance));
    let doc = signed.to_document().unwrap();
    let widget = doc.load_object(signed.field().field_ref).unwrap();
    let ap = widget.as_dict().unwrap().get("AP").and_then(Object::as_dict).unwrap().clone();
    let stream = doc.load_object(ap.get("N").and_then(Object::as_reference).unwrap()).unwrap();
    assert_eq!(stream.decode_stream_data().unwrap(), b"0 0 1 rg 0 0 100 40 re f");
}

#[test]
fn test_too_small_estimate_yields_no_output() {
    let doc = PdfDocument::from_bytes(PdfBuilder::new().build()).unwrap();
    let mut signer = signer().with_config(SignerConfig::new().with_estimated_container_size(256));
    let err = signer.sign(&doc).unwrap_err();

    assert!(matches!(err, Error::ContainerTooLarge { capacity: 256, .. }));
    assert_eq!(signer.state(), SigningState::Failed(ErrorKind::ContainerTooLarge));
}

#[test]
fn test_digest_algorithms() {
    for algorithm in [DigestAlgorithm::Sha1, DigestAlgorithm::Sha384, DigestAlgorithm::Sha512] {
        let signed = sign(&PdfBuilder::new().build(), SignerConfig::new().with_digest_algorithm(algorithm));
        let md = container_message_digest(signed.bytes(), &signed.field().name);
        assert_eq!(md.len(), algorithm.output_len());

        let results = SignatureVerifier::new().verify_document(&signed.to_document().unwrap()).unwrap();
        assert_eq!(results[0].status, VerificationStatus::Valid, "{}: {:?}", algorithm.name(), results[0].messages);
    }
}

#[test]
fn test_cades_with_timestamp() {
    let doc = PdfDocument::from_bytes(PdfBuilder::new().build()).unwrap();
    let tsa = FixedTimestamp::new();
    let calls = tsa.calls.clone();
    let config = SignerConfig::new()
        .with_sub_filter(SignatureSubFilter::CadesDetached)
        .with_timestamp(common::TSA_URL);
    let signed = signer().with_config(config).with_timestamp_source(tsa).sign(&doc).unwrap();

    assert!(signed.has_timestamp());
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(calls.lock().unwrap()[0].len(), 32);

    let results = SignatureVerifier::new().verify_document(&signed.to_document().unwrap()).unwrap();
    assert_eq!(results[0].status, VerificationStatus::Valid, "{:?}", results[0].messages);
    assert!(results[0].signature_info.has_timestamp);
    assert_eq!(results[0].signature_info.sub_filter, Some(SignatureSubFilter::CadesDetached));
}

struct BrokenToken;

impl SigningCapability for BrokenToken {
    fn key_algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::Rsa
    }

    fn sign_digest(&self, _digest: &[u8], _algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        Err(Error::SigningCapability("token removed".to_string()))
    }
}

#[test]
fn test_capability_failure() {
    let doc = PdfDocument::from_bytes(PdfBuilder::new().build()).unwrap();
    let mut signer = PdfSigner::new(BrokenToken, chain());
    let err = signer.sign(&doc).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SigningCapability);
    assert_eq!(signer.state(), SigningState::Failed(ErrorKind::SigningCapability));
}

/// Cancels the operation while the signature is being produced.
struct CancellingSigner {
    token: CancellationToken,
}

impl SigningCapability for CancellingSigner {
    fn key_algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::Rsa
    }

    fn sign_digest(&self, digest: &[u8], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        self.token.cancel();
        signer_key().sign_digest(digest, algorithm)
    }
}

#[test]
fn test_cancellation_mid_operation_yields_no_output() {
    let doc = PdfDocument::from_bytes(PdfBuilder::new().build()).unwrap();
    let token = CancellationToken::new();
    let mut signer = PdfSigner::new(CancellingSigner { token: token.clone() }, chain()).with_cancellation(token);
    let err = signer.sign(&doc).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(signer.state(), SigningState::Failed(ErrorKind::Cancelled));
}

#[test]
fn test_key_matches_leaf() {
    assert!(signer_key().matches_certificate(chain().leaf()));
    assert!(!signer_key().matches_certificate(&common::certificate("root.der")));
    assert!(!pki("leaf.key.der").is_empty());
}

fn signed_fixture() -> &'static SignedDocument {
    static SIGNED: OnceLock<SignedDocument> = OnceLock::new();
    SIGNED.get_or_init(|| sign(&PdfBuilder::new().build(), SignerConfig::new()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_digest_ignores_placeholder_content(fill in proptest::collection::vec(0u8..16, 1..256), start in 0usize..1024) {
        let signed = signed_fixture();
        let range = signed.byte_range();
        let calculator = ByteRangeDigestCalculator::new(DigestAlgorithm::Sha256);
        let expected = calculator.digest_byte_range(signed.bytes(), &range).unwrap();

        let mut tampered = signed.bytes().to_vec();
        let gap = range.gap();
        let inner = gap.contents_start + 1..gap.contents_end - 1;
        for (i, nibble) in fill.iter().enumerate() {
            let pos = inner.start + (start + i) % inner.len();
            tampered[pos] = b"0123456789ABCDEF"[*nibble as usize];
        }
        prop_assert_eq!(calculator.digest_byte_range(&tampered, &range).unwrap(), expected);
    }
}

#[test]
fn test_sign_with_pkcs12_credentials() {
    let (key, p12_chain) = pdf_seal::signatures::RsaSoftwareSigner::from_pkcs12(&pki("signer.p12"), "seal-test").unwrap();
    assert_eq!(p12_chain, chain());

    let doc = PdfDocument::from_bytes(PdfBuilder::new().build()).unwrap();
    let signed = PdfSigner::new(key, p12_chain).sign(&doc).unwrap();
    let results = SignatureVerifier::new().verify_document(&signed.to_document().unwrap()).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, VerificationStatus::Valid, "{:?}", results[0].messages);
}
