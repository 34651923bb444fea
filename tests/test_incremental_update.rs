//! Signed revisions are appended without touching earlier bytes, in the
//! cross-reference syntax of the input.

mod common;

use common::{signer, PdfBuilder, XrefStyle};
use pdf_seal::config::SignerConfig;
use pdf_seal::document::PdfDocument;
use pdf_seal::object::Object;
use pdf_seal::signatures::{ByteRangeDigestCalculator, DigestAlgorithm, SignatureVerifier, VerificationStatus};
use pdf_seal::xref::XRefKind;

fn appended(original: &[u8], signed: &[u8]) -> String {
    assert_eq!(&signed[..original.len()], original);
    String::from_utf8_lossy(&signed[original.len()..]).into_owned()
}

#[test]
fn test_classic_table_input_gets_table_update() {
    let input = PdfBuilder::new().pages(3).build();
    let doc = PdfDocument::from_bytes(input.clone()).unwrap();
    let signed = signer().sign(&doc).unwrap();

    let tail = appended(&input, signed.bytes());
    assert!(tail.contains("\nxref\n"));
    assert!(tail.contains("trailer"));
    assert!(!tail.contains("/XRef"));
    assert!(tail.trim_end().ends_with("%%EOF"));

    let reread = signed.to_document().unwrap();
    assert_eq!(reread.xref_kind(), XRefKind::Table);
    assert_eq!(reread.trailer().get("Prev").and_then(Object::as_integer), Some(doc.startxref() as i64));
    assert_eq!(reread.trailer().get("Root"), doc.trailer().get("Root"));
    assert_eq!(reread.trailer().get("Info"), doc.trailer().get("Info"));
    assert_eq!(reread.page_count().unwrap(), 3);
    assert_eq!(reread.page_refs().unwrap(), doc.page_refs().unwrap());
}

#[test]
fn test_xref_stream_input_gets_xref_stream_update() {
    let input = PdfBuilder::new().style(XrefStyle::Stream).build();
    let doc = PdfDocument::from_bytes(input.clone()).unwrap();
    assert_eq!(doc.xref_kind(), XRefKind::Stream);

    let signed = signer().sign(&doc).unwrap();
    let tail = appended(&input, signed.bytes());
    assert!(tail.contains("/Type /XRef") || tail.contains("/Type/XRef"));
    assert!(!tail.contains("\nxref\n"));

    let reread = signed.to_document().unwrap();
    assert_eq!(reread.xref_kind(), XRefKind::Stream);
    assert_eq!(reread.trailer().get("Prev").and_then(Object::as_integer), Some(doc.startxref() as i64));
    assert_eq!(reread.page_count().unwrap(), 1);
    assert!(reread.next_object_number() > doc.next_object_number());

    let results = SignatureVerifier::new().verify_document(&reread).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, VerificationStatus::Valid, "{:?}", results[0].messages);
}

#[test]
fn test_two_signatures_on_xref_stream_input() {
    let input = PdfBuilder::new().style(XrefStyle::Stream).build();
    let first = signer()
        .sign(&PdfDocument::from_bytes(input).unwrap())
        .unwrap();
    let second = signer()
        .with_config(SignerConfig::new().with_reason("Countersigned"))
        .sign(&first.to_document().unwrap())
        .unwrap();

    let reread = second.to_document().unwrap();
    assert_eq!(reread.xref_kind(), XRefKind::Stream);
    let results = SignatureVerifier::new().verify_document(&reread).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, VerificationStatus::ValidWithWarnings);
    assert_eq!(results[1].status, VerificationStatus::Valid, "{:?}", results[1].messages);
    assert_eq!(results[1].signature_info.reason.as_deref(), Some("Countersigned"));
}

#[test]
fn test_trailer_id_first_element_preserved() {
    let doc = PdfDocument::from_bytes(PdfBuilder::new().build()).unwrap();
    let signed = signer().sign(&doc).unwrap();
    let reread = signed.to_document().unwrap();

    let before = doc.trailer().get("ID").and_then(Object::as_array).unwrap().clone();
    let after = reread.trailer().get("ID").and_then(Object::as_array).unwrap().clone();
    assert_eq!(after.len(), 2);
    assert_eq!(after[0], before[0]);
}

#[test]
fn test_save_and_digest_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("signed.pdf");

    let doc = PdfDocument::from_bytes(PdfBuilder::new().build()).unwrap();
    let signed = signer().sign(&doc).unwrap();
    signed.save(&path).unwrap();

    let reopened = PdfDocument::open(&path).unwrap();
    assert_eq!(reopened.as_bytes(), signed.bytes());

    let calculator = ByteRangeDigestCalculator::new(DigestAlgorithm::Sha256);
    let from_file = calculator.digest_file(&path, &signed.byte_range()).unwrap();
    let in_memory = calculator.digest_byte_range(signed.bytes(), &signed.byte_range()).unwrap();
    assert_eq!(from_file, in_memory);

    let results = SignatureVerifier::new().verify_document(&reopened).unwrap();
    assert_eq!(results[0].status, VerificationStatus::Valid, "{:?}", results[0].messages);
}

#[test]
fn test_tampering_after_signing_is_detected() {
    let doc = PdfDocument::from_bytes(PdfBuilder::new().build()).unwrap();
    let signed = signer().sign(&doc).unwrap();

    let mut bytes = signed.into_bytes();
    let pos = bytes.windows(10).position(|w| w == b"pdf_seal t").unwrap();
    bytes[pos] = b'P';

    let results = SignatureVerifier::new()
        .verify_document(&PdfDocument::from_bytes(bytes).unwrap())
        .unwrap();
    assert_eq!(results[0].status, VerificationStatus::Invalid);
    assert!(!results[0].digest_matches);
}
