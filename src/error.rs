//! Error types for the signing engine.
//!
//! Every failure surfaces as one [`Error`]. Callers that only care about the
//! broad category (the terminal state of a signing operation) use
//! [`Error::kind`].

use std::fmt;

/// Result type alias for signing engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while reading, signing or verifying a PDF.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)] // "Invalid" prefix is intentional for clarity
pub enum Error {
    /// Invalid PDF header (expected '%PDF-')
    #[error("Invalid PDF header: expected '%PDF-', found '{0}'")]
    InvalidHeader(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference table or stream
    #[error("Invalid cross-reference data: {0}")]
    InvalidXref(String),

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// Unexpected end of file
    #[error("End of file reached unexpectedly")]
    UnexpectedEof,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// DER encoding or decoding failure
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// Unsupported feature (encrypted input, unknown filter, ...)
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// Invalid PDF structure (generic)
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Recursion depth limit exceeded
    #[error("Recursion depth limit exceeded (max: {0})")]
    RecursionLimitExceeded(u32),

    /// `/ByteRange` or `/Contents` placeholder is malformed or missing
    #[error("Invalid byte range: {0}")]
    InvalidByteRange(String),

    /// Certificate chain is empty, unparseable or not linked issuer-to-subject
    #[error("Invalid certificate chain: {0}")]
    InvalidCertificateChain(String),

    /// Certificate, CRL or CMS structure could not be interpreted
    #[error("Invalid ASN.1 structure: {0}")]
    InvalidAsn1(String),

    /// Existing signature container is malformed or does not verify
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// The requested field already carries a signature value
    #[error("Signature field '{0}' is already signed")]
    FieldAlreadySigned(String),

    /// The DER container does not fit the reserved placeholder
    #[error("Signature container of {actual} bytes exceeds the reserved {capacity} bytes")]
    ContainerTooLarge {
        /// DER length of the produced container
        actual: usize,
        /// Bytes reserved in the placeholder
        capacity: usize,
    },

    /// The signing capability refused or failed to sign
    #[error("Signing capability failed: {0}")]
    SigningCapability(String),

    /// The timestamp token does not verify against the trusted TSA anchors
    #[error("Untrusted timestamp: {0}")]
    UntrustedTimestamp(String),

    /// No usable timestamp could be obtained from the TSA
    #[error("Timestamp unavailable: {0}")]
    TimestampUnavailable(String),

    /// Required revocation evidence could not be collected
    #[error("Revocation information unavailable: {0}")]
    RevocationUnavailable(String),

    /// HTTP transport failure
    #[error("Transport error for {url}: {reason}")]
    Transport {
        /// Requested URL
        url: String,
        /// Reason reported by the transport
        reason: String,
    },

    /// The operation was cancelled between stages
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Broad classification of an [`Error`], used as the terminal state of a
/// signing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed document, certificate or structure
    Format,
    /// Input/output or transport failure
    Io,
    /// The target field already holds a signature
    FieldAlreadySigned,
    /// The container outgrew its placeholder
    ContainerTooLarge,
    /// The signing capability failed
    SigningCapability,
    /// Timestamp token failed verification
    UntrustedTimestamp,
    /// TSA unreachable or refused
    TimestampUnavailable,
    /// Revocation evidence missing under a fatal policy
    RevocationUnavailable,
    /// Cooperative cancellation
    Cancelled,
    /// Invalid configuration
    Config,
}

impl Error {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::Transport { .. } => ErrorKind::Io,
            Error::FieldAlreadySigned(_) => ErrorKind::FieldAlreadySigned,
            Error::ContainerTooLarge { .. } => ErrorKind::ContainerTooLarge,
            Error::SigningCapability(_) => ErrorKind::SigningCapability,
            Error::UntrustedTimestamp(_) => ErrorKind::UntrustedTimestamp,
            Error::TimestampUnavailable(_) => ErrorKind::TimestampUnavailable,
            Error::RevocationUnavailable(_) => ErrorKind::RevocationUnavailable,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Config(_) => ErrorKind::Config,
            Error::InvalidHeader(_)
            | Error::ParseError { .. }
            | Error::InvalidXref(_)
            | Error::ObjectNotFound(..)
            | Error::InvalidObjectType { .. }
            | Error::UnexpectedEof
            | Error::Der(_)
            | Error::Unsupported(_)
            | Error::InvalidPdf(_)
            | Error::Decode(_)
            | Error::RecursionLimitExceeded(_)
            | Error::InvalidByteRange(_)
            | Error::InvalidCertificateChain(_)
            | Error::InvalidAsn1(_)
            | Error::InvalidSignature(_) => ErrorKind::Format,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Format => "format",
            ErrorKind::Io => "io",
            ErrorKind::FieldAlreadySigned => "field-already-signed",
            ErrorKind::ContainerTooLarge => "container-too-large",
            ErrorKind::SigningCapability => "signing-capability",
            ErrorKind::UntrustedTimestamp => "untrusted-timestamp",
            ErrorKind::TimestampUnavailable => "timestamp-unavailable",
            ErrorKind::RevocationUnavailable => "revocation-unavailable",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}
