//! Shared fixtures for the integration tests: a small PDF builder, the test
//! PKI under `tests/fixtures/pki` and canned network collaborators.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use pdf_seal::error::{Error, Result};
use pdf_seal::signatures::asn1::TimeStampResp;
use pdf_seal::signatures::{
    Certificate, CertificateChain, DigestAlgorithm, HttpMethod, HttpRequest, HttpTransport, PdfSigner,
    RsaSoftwareSigner, TimestampSource, TimestampToken,
};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use der::Decode;

pub const CRL_URL: &str = "http://crl.seal.test/root.crl";
pub const OCSP_URL: &str = "http://ocsp.seal.test";
pub const TSA_URL: &str = "http://tsa.seal.test";

pub fn pki(name: &str) -> Vec<u8> {
    std::fs::read(format!("{}/tests/fixtures/pki/{}", env!("CARGO_MANIFEST_DIR"), name))
        .unwrap_or_else(|e| panic!("missing fixture {}: {}", name, e))
}

pub fn certificate(name: &str) -> Certificate {
    Certificate::from_der(&pki(name)).unwrap()
}

/// Leaf "Seal Test Signer" issued by "Seal Test Root CA".
pub fn chain() -> CertificateChain {
    CertificateChain::from_der_list(&[pki("leaf.der"), pki("root.der")]).unwrap()
}

pub fn signer_key() -> RsaSoftwareSigner {
    RsaSoftwareSigner::from_der(&pki("leaf.key.der")).unwrap()
}

/// Signer with a fixed signing time.
pub fn signer() -> PdfSigner {
    PdfSigner::new(signer_key(), chain()).with_signing_time(Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap())
}

/// Cross-reference flavor of a generated PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefStyle {
    Table,
    Stream,
}

/// Generates small single-revision PDFs.
pub struct PdfBuilder {
    pages: usize,
    fields: Vec<String>,
    style: XrefStyle,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self {
            pages: 1,
            fields: Vec::new(),
            style: XrefStyle::Table,
        }
    }

    pub fn pages(mut self, pages: usize) -> Self {
        self.pages = pages;
        self
    }

    pub fn style(mut self, style: XrefStyle) -> Self {
        self.style = style;
        self
    }

    /// Add an AcroForm field; `{page}` in the body is replaced by the first
    /// page reference.
    pub fn field(mut self, body: &str) -> Self {
        self.fields.push(body.to_string());
        self
    }

    /// Objects: 1 catalog, 2 pages, 3 info, then the pages, then the fields.
    fn objects(&self) -> Vec<String> {
        let first_page = 4;
        let first_field = first_page + self.pages;
        let kids: Vec<String> = (0..self.pages).map(|i| format!("{} 0 R", first_page + i)).collect();
        let field_refs: Vec<String> = (0..self.fields.len()).map(|i| format!("{} 0 R", first_field + i)).collect();

        let catalog = if self.fields.is_empty() {
            "<< /Type /Catalog /Pages 2 0 R >>".to_string()
        } else {
            format!("<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [{}] >> >>", field_refs.join(" "))
        };
        let mut objects = vec![
            catalog,
            format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), self.pages),
            "<< /Producer (pdf_seal tests) >>".to_string(),
        ];
        for _ in 0..self.pages {
            objects.push("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>".to_string());
        }
        for field in &self.fields {
            objects.push(field.replace("{page}", &format!("{} 0 R", first_page)));
        }
        objects
    }

    pub fn build(&self) -> Vec<u8> {
        let objects = self.objects();
        let mut out = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let id = "<0123456789ABCDEF0123456789ABCDEF>";

        match self.style {
            XrefStyle::Table => {
                let size = objects.len() + 1;
                let xref = out.len();
                out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", size).as_bytes());
                for off in &offsets {
                    out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
                }
                out.extend_from_slice(
                    format!(
                        "trailer\n<< /Size {} /Root 1 0 R /Info 3 0 R /ID [{} {}] >>\nstartxref\n{}\n%%EOF\n",
                        size, id, id, xref
                    )
                    .as_bytes(),
                );
            },
            XrefStyle::Stream => {
                let xref_num = objects.len() + 1;
                let size = xref_num + 1;
                let xref = out.len();
                offsets.push(xref);

                let mut rows = vec![0u8, 0, 0, 0, 0, 0xFF, 0xFF];
                for off in &offsets {
                    rows.push(1);
                    rows.extend_from_slice(&(*off as u32).to_be_bytes());
                    rows.extend_from_slice(&[0, 0]);
                }
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&rows).unwrap();
                let data = encoder.finish().unwrap();

                out.extend_from_slice(
                    format!(
                        "{} 0 obj\n<< /Type /XRef /Size {} /W [1 4 2] /Root 1 0 R /Info 3 0 R /ID [{} {}] /Filter /FlateDecode /Length {} >>\nstream\n",
                        xref_num,
                        size,
                        id,
                        id,
                        data.len()
                    )
                    .as_bytes(),
                );
                out.extend_from_slice(&data);
                out.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref).as_bytes());
            },
        }
        out
    }
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes requests by method and URL; unknown routes fail like a refused
/// connection. Every request is recorded.
#[derive(Default)]
pub struct MockTransport {
    routes: HashMap<(HttpMethod, String), Vec<u8>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, method: HttpMethod, url: &str, body: Vec<u8>) -> Self {
        self.routes.insert((method, url.to_string()), body);
        self
    }

    /// CRL and OCSP endpoints of the test PKI.
    pub fn revocation() -> Self {
        Self::new()
            .route(HttpMethod::Get, CRL_URL, pki("root.crl"))
            .route(HttpMethod::Post, OCSP_URL, pki("ocsp_resp.der"))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpTransport for MockTransport {
    fn send(&self, request: &HttpRequest, _timeout: Duration) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(request.clone());
        self.routes
            .get(&(request.method, request.url.clone()))
            .cloned()
            .ok_or_else(|| Error::Transport {
                url: request.url.clone(),
                reason: "connection refused".to_string(),
            })
    }
}

/// The token inside `ts.tsr` (over SHA-256 of "hello timestamp").
pub fn fixture_token() -> TimestampToken {
    let response = TimeStampResp::from_der(&pki("ts.tsr")).unwrap();
    TimestampToken::from_content_info(&response.time_stamp_token.unwrap()).unwrap()
}

/// Always returns the fixture token.
pub struct FixedTimestamp {
    pub calls: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FixedTimestamp {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl TimestampSource for FixedTimestamp {
    fn timestamp(&self, digest: &[u8], _algorithm: DigestAlgorithm) -> Result<TimestampToken> {
        self.calls.lock().unwrap().push(digest.to_vec());
        Ok(fixture_token())
    }
}

/// A TSA that never answers.
pub struct OfflineTimestamp;

impl TimestampSource for OfflineTimestamp {
    fn timestamp(&self, _digest: &[u8], _algorithm: DigestAlgorithm) -> Result<TimestampToken> {
        Err(Error::TimestampUnavailable("tsa.seal.test timed out".to_string()))
    }
}
