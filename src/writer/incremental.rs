//! Incremental update writer.
//!
//! Appends exactly one revision to an existing document: the original bytes
//! are copied verbatim, followed by the new and updated objects, a
//! cross-reference section of the same kind as the previous one and a
//! trailer chained to it through `/Prev`.
//!
//! Signing needs two passes over the revision. [`IncrementalDocumentWriter::reserve_placeholder`]
//! writes everything with a zero-filled `/Contents` and fills in the
//! `/ByteRange` once the final length is known; [`PreparedRevision::patch_placeholder`]
//! later drops the DER container into the reserved hex string without
//! moving a single byte.

use super::object_serializer::ObjectSerializer;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::signatures::byterange::{insert_signature, ByteRange, PlaceholderRange};
use crate::xref::XRefKind;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;

/// Width reserved for the `/ByteRange` numbers (`0 a b c`), space padded.
const BYTE_RANGE_SLOT: usize = 48;

/// Collects the objects of one revision and writes it.
///
/// ```no_run
/// use pdf_seal::document::PdfDocument;
/// use pdf_seal::object::{Dictionary, Object};
/// use pdf_seal::writer::IncrementalDocumentWriter;
///
/// let doc = PdfDocument::open("in.pdf")?;
/// let mut writer = IncrementalDocumentWriter::new(&doc);
/// let sig = writer.allocate();
/// let mut dict = Dictionary::new();
/// dict.insert("Type".to_string(), Object::name("Sig"));
/// writer.set_signature_dictionary(sig, dict);
/// let mut revision = writer.reserve_placeholder(8192)?;
/// revision.patch_placeholder(&[0x30, 0x00])?;
/// std::fs::write("out.pdf", revision.into_bytes())?;
/// # Ok::<(), pdf_seal::error::Error>(())
/// ```
#[derive(Debug)]
pub struct IncrementalDocumentWriter<'a> {
    doc: &'a PdfDocument,
    objects: BTreeMap<u32, (u16, Object)>,
    signature: Option<(ObjectRef, Dictionary)>,
    next_id: u32,
    compress_xref_stream: bool,
}

impl<'a> IncrementalDocumentWriter<'a> {
    /// Start a revision on top of `doc`.
    pub fn new(doc: &'a PdfDocument) -> Self {
        Self {
            doc,
            objects: BTreeMap::new(),
            signature: None,
            next_id: doc.next_object_number(),
            compress_xref_stream: true,
        }
    }

    /// Whether a cross-reference stream is Flate compressed (default true).
    pub fn with_compressed_xref_stream(mut self, compress: bool) -> Self {
        self.compress_xref_stream = compress;
        self
    }

    /// The document this revision extends.
    pub fn document(&self) -> &'a PdfDocument {
        self.doc
    }

    /// Reserve a fresh object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let obj_ref = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        obj_ref
    }

    /// Add a new object and return its reference.
    pub fn add(&mut self, obj: Object) -> ObjectRef {
        let obj_ref = self.allocate();
        self.update(obj_ref, obj);
        obj_ref
    }

    /// Write `obj` under `obj_ref`, replacing any earlier definition.
    pub fn update(&mut self, obj_ref: ObjectRef, obj: Object) {
        self.objects.insert(obj_ref.id, (obj_ref.gen, obj));
    }

    /// Object queued for this revision, if any.
    pub fn pending(&self, obj_ref: ObjectRef) -> Option<&Object> {
        self.objects.get(&obj_ref.id).map(|(_, obj)| obj)
    }

    /// Current value of an object: the queued one, or the one in the document.
    pub fn current(&self, obj_ref: ObjectRef) -> Result<Object> {
        match self.pending(obj_ref) {
            Some(obj) => Ok(obj.clone()),
            None => self.doc.load_object(obj_ref),
        }
    }

    /// Set the signature dictionary. `/ByteRange` and `/Contents` are added
    /// by [`reserve_placeholder`](Self::reserve_placeholder).
    pub fn set_signature_dictionary(&mut self, obj_ref: ObjectRef, mut dict: Dictionary) {
        dict.remove("ByteRange");
        dict.remove("Contents");
        self.signature = Some((obj_ref, dict));
    }

    /// Write the revision with a zero-filled `/Contents` able to hold
    /// `estimated_size` container bytes.
    pub fn reserve_placeholder(&self, estimated_size: usize) -> Result<PreparedRevision> {
        if estimated_size == 0 {
            return Err(Error::Config("estimated container size must be positive".to_string()));
        }
        let (sig_ref, sig_dict) = self
            .signature
            .as_ref()
            .ok_or_else(|| Error::InvalidPdf("revision has no signature dictionary".to_string()))?;

        let serializer = ObjectSerializer::compact();
        let original = self.doc.as_bytes();
        let mut buf = Vec::with_capacity(original.len() + estimated_size * 2 + 4096);
        buf.extend_from_slice(original);
        if !matches!(original.last(), Some(b'\n') | Some(b'\r')) {
            buf.push(b'\n');
        }

        let mut offsets: BTreeMap<u32, (u64, u16)> = BTreeMap::new();
        let mut slots = None;

        let mut ids: Vec<u32> = self.objects.keys().copied().collect();
        if !self.objects.contains_key(&sig_ref.id) {
            ids.push(sig_ref.id);
            ids.sort_unstable();
        }

        for id in ids {
            if id == sig_ref.id {
                offsets.insert(id, (buf.len() as u64, sig_ref.gen));
                slots = Some(write_signature_object(&serializer, &mut buf, *sig_ref, sig_dict, estimated_size));
            } else if let Some((gen, obj)) = self.objects.get(&id) {
                offsets.insert(id, (buf.len() as u64, *gen));
                buf.extend_from_slice(&serializer.serialize_indirect(id, *gen, obj));
            }
        }
        let (byte_range_at, placeholder) =
            slots.ok_or_else(|| Error::InvalidPdf("signature object was not written".to_string()))?;

        let highest = offsets.keys().next_back().copied().unwrap_or(0);
        let size = self.doc.next_object_number().max(highest + 1);
        let trailer = self.trailer_dictionary(&buf, size);

        let xref_offset = buf.len() as u64;
        match self.doc.xref_kind() {
            XRefKind::Table => write_xref_table(&serializer, &mut buf, &offsets, trailer),
            XRefKind::Stream => {
                let xref_id = size.max(self.next_id);
                offsets.insert(xref_id, (xref_offset, 0));
                let mut dict = trailer;
                dict.insert("Size".to_string(), Object::Integer(xref_id as i64 + 1));
                write_xref_stream(&serializer, &mut buf, &offsets, xref_id, dict, self.compress_xref_stream)?;
            },
        }
        buf.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        let range = placeholder.byte_range(buf.len());
        let text = range.to_pdf_string();
        if text.len() > BYTE_RANGE_SLOT {
            return Err(Error::InvalidByteRange(format!("{} does not fit its reserved slot", range)));
        }
        buf[byte_range_at..byte_range_at + text.len()].copy_from_slice(text.as_bytes());

        log::debug!(
            "Reserved revision: {} objects appended after byte {}, /ByteRange {}, xref {:?} at {}",
            offsets.len(),
            original.len(),
            range,
            self.doc.xref_kind(),
            xref_offset
        );

        Ok(PreparedRevision {
            bytes: buf,
            placeholder,
            prior_len: original.len(),
        })
    }

    fn trailer_dictionary(&self, body: &[u8], size: u32) -> Dictionary {
        let prior = self.doc.trailer();
        let mut trailer = Dictionary::new();
        trailer.insert("Size".to_string(), Object::Integer(size as i64));
        trailer.insert("Prev".to_string(), Object::Integer(self.doc.startxref() as i64));
        for key in ["Root", "Info"] {
            if let Some(value) = prior.get(key) {
                trailer.insert(key.to_string(), value.clone());
            }
        }

        let changing: Vec<u8> = Sha256::digest(body)[..16].to_vec();
        let permanent = prior
            .get("ID")
            .and_then(Object::as_array)
            .and_then(|ids| ids.first())
            .and_then(Object::as_string)
            .map(<[u8]>::to_vec)
            .unwrap_or_else(|| changing.clone());
        trailer.insert(
            "ID".to_string(),
            Object::Array(vec![Object::String(permanent), Object::String(changing)]),
        );
        trailer
    }
}

/// Writes the signature object with space for `/ByteRange` and `/Contents`.
/// Returns the offset of the `/ByteRange` slot and the placeholder.
fn write_signature_object(
    serializer: &ObjectSerializer,
    buf: &mut Vec<u8>,
    sig_ref: ObjectRef,
    dict: &Dictionary,
    capacity: usize,
) -> (usize, PlaceholderRange) {
    buf.extend_from_slice(format!("{} {} obj\n", sig_ref.id, sig_ref.gen).as_bytes());
    serializer.write_dictionary_open(buf, dict);

    buf.extend_from_slice(b" /ByteRange [");
    let byte_range_at = buf.len();
    buf.resize(buf.len() + BYTE_RANGE_SLOT, b' ');
    buf.extend_from_slice(b"] /Contents ");

    let placeholder = PlaceholderRange::with_capacity(buf.len(), capacity);
    buf.push(b'<');
    buf.resize(buf.len() + capacity * 2, b'0');
    buf.push(b'>');
    buf.extend_from_slice(b" >>\nendobj\n");

    (byte_range_at, placeholder)
}

/// Classic table with one subsection per run of consecutive object numbers.
fn write_xref_table(
    serializer: &ObjectSerializer,
    buf: &mut Vec<u8>,
    offsets: &BTreeMap<u32, (u64, u16)>,
    trailer: Dictionary,
) {
    buf.extend_from_slice(b"xref\n");
    for run in consecutive_runs(offsets) {
        buf.extend_from_slice(format!("{} {}\n", run[0].0, run.len()).as_bytes());
        for (_, (offset, gen)) in run {
            buf.extend_from_slice(format!("{:010} {:05} n \n", offset, gen).as_bytes());
        }
    }
    buf.extend_from_slice(b"trailer\n");
    serializer.write_object(buf, &Object::Dictionary(trailer));
    buf.push(b'\n');
}

/// Cross-reference stream (`/Type /XRef`) listing the appended objects and
/// itself.
fn write_xref_stream(
    serializer: &ObjectSerializer,
    buf: &mut Vec<u8>,
    offsets: &BTreeMap<u32, (u64, u16)>,
    xref_id: u32,
    mut dict: Dictionary,
    compress: bool,
) -> Result<()> {
    let max_offset = offsets.values().map(|(offset, _)| *offset).max().unwrap_or(0);
    let offset_width = (1..=8).find(|w| max_offset < 1u64 << (8 * w)).unwrap_or(8);

    let mut index = Vec::new();
    let mut rows = Vec::with_capacity(offsets.len() * (offset_width + 3));
    for run in consecutive_runs(offsets) {
        index.push(Object::Integer(run[0].0 as i64));
        index.push(Object::Integer(run.len() as i64));
        for (_, (offset, gen)) in run {
            rows.push(1u8);
            rows.extend_from_slice(&offset.to_be_bytes()[8 - offset_width..]);
            rows.extend_from_slice(&gen.to_be_bytes());
        }
    }

    dict.insert("Type".to_string(), Object::name("XRef"));
    dict.insert(
        "W".to_string(),
        Object::Array(vec![
            Object::Integer(1),
            Object::Integer(offset_width as i64),
            Object::Integer(2),
        ]),
    );
    dict.insert("Index".to_string(), Object::Array(index));

    let data = if compress {
        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&rows)?;
        dict.insert("Filter".to_string(), Object::name("FlateDecode"));
        encoder.finish()?
    } else {
        rows
    };

    let stream = Object::Stream {
        dict,
        data: bytes::Bytes::from(data),
    };
    buf.extend_from_slice(&serializer.serialize_indirect(xref_id, 0, &stream));
    Ok(())
}

type OffsetEntry<'m> = (u32, &'m (u64, u16));

fn consecutive_runs(offsets: &BTreeMap<u32, (u64, u16)>) -> Vec<Vec<OffsetEntry<'_>>> {
    let mut runs: Vec<Vec<OffsetEntry<'_>>> = Vec::new();
    for (&id, entry) in offsets {
        match runs.last_mut() {
            Some(run) if run.last().map(|(last, _)| last + 1) == Some(id) => run.push((id, entry)),
            _ => runs.push(vec![(id, entry)]),
        }
    }
    runs
}

/// A written revision whose `/Contents` placeholder is still zero filled.
#[derive(Debug, Clone)]
pub struct PreparedRevision {
    bytes: Vec<u8>,
    placeholder: PlaceholderRange,
    prior_len: usize,
}

impl PreparedRevision {
    /// The full document bytes (original plus the new revision).
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Location of the `/Contents` hex string.
    pub fn placeholder(&self) -> PlaceholderRange {
        self.placeholder
    }

    /// The `/ByteRange` written into the signature dictionary.
    pub fn byte_range(&self) -> ByteRange {
        self.placeholder.byte_range(self.bytes.len())
    }

    /// Length of the document the revision was appended to.
    pub fn prior_len(&self) -> usize {
        self.prior_len
    }

    /// Container bytes the placeholder can hold.
    pub fn capacity(&self) -> usize {
        self.placeholder.capacity()
    }

    /// Write the DER container into the placeholder.
    ///
    /// Fails with [`Error::ContainerTooLarge`] when it does not fit; the
    /// bytes are left untouched in that case.
    pub fn patch_placeholder(&mut self, container: &[u8]) -> Result<()> {
        insert_signature(&mut self.bytes, &self.placeholder, container)?;
        log::debug!(
            "Patched {} container bytes into placeholder of {}",
            container.len(),
            self.placeholder.capacity()
        );
        Ok(())
    }

    /// Consume the revision and return the document bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
