//! PDF Digital Signatures module.
//!
//! This module signs PDF documents through incremental updates and verifies
//! the signatures they carry, following ISO 32000 and PAdES (PDF Advanced
//! Electronic Signatures).
//!
//! ## Features
//!
//! - **Signature Creation**: [`PdfSigner`] appends one signed revision per call
//! - **Signature Verification**: [`SignatureVerifier`] checks every signature field
//! - **Revocation Evidence**: CRLs and OCSP responses for the signer chain
//! - **Timestamps**: RFC 3161 signature timestamps from a TSA
//!
//! ## Signature Types Supported
//!
//! - PKCS#7 detached signatures (adbe.pkcs7.detached)
//! - PAdES signatures (ETSI.CAdES.detached)
//!
//! ## Example
//!
//! ```no_run
//! use pdf_seal::config::SignerConfig;
//! use pdf_seal::document::PdfDocument;
//! use pdf_seal::signatures::{CertificateChain, PdfSigner, RsaSoftwareSigner, SignatureVerifier};
//!
//! let doc = PdfDocument::open("document.pdf")?;
//! let chain = CertificateChain::from_der_list(&[std::fs::read("signer.der")?, std::fs::read("ca.der")?])?;
//! let key = RsaSoftwareSigner::from_file("signer.key")?;
//!
//! let mut signer = PdfSigner::new(key, chain).with_config(SignerConfig::new().with_reason("Approved"));
//! let signed = signer.sign(&doc)?;
//!
//! for result in SignatureVerifier::new().verify_document(&signed.to_document()?)? {
//!     println!("{}: {:?}", result.signature_info.field_name, result.status);
//! }
//! # Ok::<(), pdf_seal::error::Error>(())
//! ```
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - ISO 32000-2:2020 Section 12.8 - Digital Signatures
//! - ETSI TS 102 778 - PAdES
//! - RFC 5652 (CMS), RFC 3161 (TSP), RFC 6960 (OCSP), RFC 5280 (CRL)

pub mod asn1;
pub mod byterange;
pub mod certificate;
pub mod container;
pub mod field;
pub mod revocation;
mod signer;
pub mod software;
pub mod timestamp;
pub mod transport;
mod types;
mod verifier;

pub use byterange::{ByteRange, ByteRangeDigestCalculator, PlaceholderRange};
pub use certificate::{Certificate, CertificateChain};
pub use container::{SignatureContainer, SignatureContainerBuilder};
pub use field::{FieldDescriptor, SignatureFieldManager};
pub use revocation::{
    CrlSource, OcspSource, RevocationData, RevocationEvidence, RevocationInfoCollector, RevocationSource,
};
pub use signer::{format_pdf_date, PdfSigner, SignedDocument};
pub use software::{KeyAlgorithm, RsaSoftwareSigner, SigningCapability};
pub use timestamp::{TimestampClient, TimestampSource, TimestampToken};
#[cfg(feature = "http")]
pub use transport::UreqTransport;
pub use transport::{HttpMethod, HttpRequest, HttpTransport};
pub use types::{
    CancellationToken, DigestAlgorithm, SignatureAppearance, SignatureInfo, SignatureSubFilter, SigningState,
    VerificationResult, VerificationStatus,
};
pub use verifier::SignatureVerifier;
