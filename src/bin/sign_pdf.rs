//! Sign a PDF
//!
//! Appends one signed revision to a PDF.
//!
//! Usage:
//!   sign_pdf --input in.pdf --output out.pdf --key signer.key --cert signer.der --cert ca.der
//!   sign_pdf --input in.pdf --output out.pdf --p12 signer.p12 --password secret
//!   sign_pdf ... --config signing.json --field Approval --reason "Approved" --location Berlin
//!   sign_pdf ... --tsa http://tsa.example/tsr --tsa-cert tsa-root.der --crl --ocsp --verify
//!
//! Set `RUST_LOG=debug` for byte offsets and state transitions.

use pdf_seal::config::SignerConfig;
use pdf_seal::document::PdfDocument;
use pdf_seal::signatures::{Certificate, CertificateChain, PdfSigner, RsaSoftwareSigner, SignatureVerifier};
use std::path::PathBuf;
use std::process::ExitCode;

const USAGE: &str = "usage: sign_pdf --input FILE --output FILE
                (--key FILE --cert FILE [--cert FILE ...] | --p12 FILE [--password TEXT])
                [--config FILE] [--field NAME] [--reason TEXT] [--location TEXT]
                [--tsa URL] [--tsa-cert FILE ...] [--crl] [--ocsp]
                [--estimated-size N] [--verify]";

#[derive(Default)]
struct CliArgs {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    key: Option<PathBuf>,
    certs: Vec<PathBuf>,
    p12: Option<PathBuf>,
    password: Option<String>,
    tsa_certs: Vec<PathBuf>,
    config: Option<PathBuf>,
    field: Option<String>,
    reason: Option<String>,
    location: Option<String>,
    tsa: Option<String>,
    crl: bool,
    ocsp: bool,
    estimated_size: Option<usize>,
    verify: bool,
}

impl CliArgs {
    fn from_args() -> Result<Self, String> {
        let args: Vec<String> = std::env::args().collect();
        let mut parsed = Self::default();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || {
                i += 1;
                args.get(i).cloned().ok_or_else(|| format!("{} needs a value", flag))
            };
            match flag {
                "--input" => parsed.input = Some(PathBuf::from(value()?)),
                "--output" => parsed.output = Some(PathBuf::from(value()?)),
                "--key" => parsed.key = Some(PathBuf::from(value()?)),
                "--cert" => parsed.certs.push(PathBuf::from(value()?)),
                "--p12" => parsed.p12 = Some(PathBuf::from(value()?)),
                "--password" => parsed.password = Some(value()?),
                "--tsa-cert" => parsed.tsa_certs.push(PathBuf::from(value()?)),
                "--config" => parsed.config = Some(PathBuf::from(value()?)),
                "--field" => parsed.field = Some(value()?),
                "--reason" => parsed.reason = Some(value()?),
                "--location" => parsed.location = Some(value()?),
                "--tsa" => parsed.tsa = Some(value()?),
                "--estimated-size" => {
                    let raw = value()?;
                    let size = raw
                        .parse()
                        .map_err(|_| format!("--estimated-size expects a number, got '{}'", raw))?;
                    parsed.estimated_size = Some(size);
                },
                "--crl" => parsed.crl = true,
                "--ocsp" => parsed.ocsp = true,
                "--verify" => parsed.verify = true,
                "--help" | "-h" => return Err(USAGE.to_string()),
                other => return Err(format!("unknown argument '{}'\n{}", other, USAGE)),
            }
            i += 1;
        }

        let pem_credentials = parsed.key.is_some() && !parsed.certs.is_empty();
        if parsed.input.is_none() || parsed.output.is_none() || pem_credentials == parsed.p12.is_some() {
            return Err(USAGE.to_string());
        }
        Ok(parsed)
    }

    fn signer_config(&self) -> pdf_seal::Result<SignerConfig> {
        let mut config = match &self.config {
            Some(path) => SignerConfig::from_json_file(path)?,
            None => SignerConfig::new(),
        };
        if let Some(field) = &self.field {
            config = config.with_field_name(field.clone());
        }
        if let Some(reason) = &self.reason {
            config = config.with_reason(reason.clone());
        }
        if let Some(location) = &self.location {
            config = config.with_location(location.clone());
        }
        if let Some(tsa) = &self.tsa {
            config = config.with_timestamp(tsa.clone());
        }
        if self.crl {
            config = config.with_crl(true);
        }
        if self.ocsp {
            config = config.with_ocsp(true);
        }
        if let Some(size) = self.estimated_size {
            config = config.with_estimated_container_size(size);
        }
        Ok(config)
    }
}

fn load_certificates(paths: &[PathBuf]) -> pdf_seal::Result<Vec<Certificate>> {
    let mut certs = Vec::new();
    for path in paths {
        certs.extend(Certificate::load(&std::fs::read(path)?)?);
    }
    Ok(certs)
}

fn load_credentials(args: &CliArgs) -> pdf_seal::Result<(RsaSoftwareSigner, CertificateChain)> {
    if let Some(p12) = &args.p12 {
        return RsaSoftwareSigner::from_pkcs12_file(p12, args.password.as_deref().unwrap_or(""));
    }
    let Some(key) = &args.key else {
        return Err(pdf_seal::Error::Config(USAGE.to_string()));
    };
    let chain = CertificateChain::new(load_certificates(&args.certs)?)?;
    let key = RsaSoftwareSigner::from_file(key)?;
    let leaf = chain.leaf();
    if !key.matches_certificate(leaf) {
        return Err(pdf_seal::Error::InvalidCertificateChain(format!(
            "key does not belong to {}",
            leaf.subject()
        )));
    }
    Ok((key, chain))
}

fn run(args: &CliArgs) -> pdf_seal::Result<()> {
    // Presence checked in from_args
    let (Some(input), Some(output)) = (&args.input, &args.output) else {
        return Err(pdf_seal::Error::Config(USAGE.to_string()));
    };

    let doc = PdfDocument::open(input)?;
    let (key, chain) = load_credentials(args)?;

    let mut signer = PdfSigner::new(key, chain)
        .with_config(args.signer_config()?)
        .with_trusted_tsa_certificates(load_certificates(&args.tsa_certs)?);
    let signed = signer.sign(&doc)?;
    signed.save(output)?;
    println!(
        "Signed {} -> {} (field '{}', {} container bytes{})",
        input.display(),
        output.display(),
        signed.field().name,
        signed.container_len(),
        if signed.has_timestamp() { ", timestamped" } else { "" }
    );

    if args.verify {
        let results = SignatureVerifier::new().verify_document(&signed.to_document()?)?;
        for result in &results {
            println!(
                "  {}: {:?} (signer: {}, whole document: {})",
                result.signature_info.field_name,
                result.status,
                result.signature_info.certificate_cn.as_deref().unwrap_or("?"),
                result.signature_info.covers_whole_document
            );
            for message in &result.messages {
                println!("    {}", message);
            }
        }
        if results.iter().any(|r| !r.status.is_ok()) {
            return Err(pdf_seal::Error::InvalidSignature("verification failed".to_string()));
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match CliArgs::from_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        },
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error ({:?}): {}", e.kind(), e);
            ExitCode::FAILURE
        },
    }
}
