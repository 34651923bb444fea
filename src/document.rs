//! PDF document reader.
//!
//! Holds the complete byte sequence of a PDF plus its merged cross-reference
//! index. This is the minimal reader the signer needs: it locates the trailer,
//! resolves indirect objects (including objects packed in object streams) and
//! walks the page tree. A document is never modified in place; signing
//! produces a new byte sequence that starts with this one.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::objstm::parse_object_stream;
use crate::parser::parse_indirect_object;
use crate::xref::{find_xref_offset, parse_xref, CrossRefTable, XRefEntryType, XRefKind};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Maximum page tree depth before the tree is considered malformed.
const MAX_PAGE_TREE_DEPTH: u32 = 64;

/// Maximum reference chain followed by [`PdfDocument::resolve`].
const MAX_RESOLVE_DEPTH: u32 = 32;

/// An immutable, parsed view of a PDF byte sequence.
///
/// ```no_run
/// use pdf_seal::document::PdfDocument;
///
/// let doc = PdfDocument::open("contract.pdf")?;
/// println!("{} pages, {} bytes", doc.page_count()?, doc.len());
/// # Ok::<(), pdf_seal::error::Error>(())
/// ```
pub struct PdfDocument {
    data: Bytes,
    version: (u8, u8),
    xref: CrossRefTable,
    trailer: Dictionary,
    startxref: u64,
    /// Parsed object streams, keyed by the stream's object number
    objstm_cache: Mutex<HashMap<u32, Arc<HashMap<u32, Object>>>>,
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("version", &self.version)
            .field("len", &self.data.len())
            .field("xref_entries", &self.xref.len())
            .field("xref_kind", &self.xref.kind())
            .field("startxref", &self.startxref)
            .finish_non_exhaustive()
    }
}

impl PdfDocument {
    /// Read and parse a PDF file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(data)
    }

    /// Parse a PDF held in memory.
    ///
    /// Encrypted documents are rejected with [`Error::Unsupported`].
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let data: Bytes = data.into();
        let version = parse_header(&data)?;
        let startxref = find_xref_offset(&data)?;
        let xref = parse_xref(&data, startxref)?;

        let trailer = xref
            .trailer()
            .cloned()
            .ok_or_else(|| Error::InvalidXref("no trailer dictionary".to_string()))?;

        if trailer.contains_key("Encrypt") {
            return Err(Error::Unsupported("encrypted documents cannot be signed".to_string()));
        }
        if !matches!(trailer.get("Root"), Some(Object::Reference(_))) {
            return Err(Error::InvalidPdf("trailer has no /Root reference".to_string()));
        }

        log::debug!(
            "Opened PDF {}.{}: {} bytes, {} xref entries ({:?}), startxref {}",
            version.0,
            version.1,
            data.len(),
            xref.len(),
            xref.kind(),
            startxref
        );

        Ok(Self {
            data,
            version,
            xref,
            trailer,
            startxref,
            objstm_cache: Mutex::new(HashMap::new()),
        })
    }

    /// The complete byte sequence.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the byte sequence.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Length of the document in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the byte sequence is empty (never true for a parsed document).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// PDF version from the header.
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Trailer of the newest revision.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Offset of the newest cross-reference section.
    pub fn startxref(&self) -> u64 {
        self.startxref
    }

    /// Syntax of the newest cross-reference section.
    pub fn xref_kind(&self) -> XRefKind {
        self.xref.kind()
    }

    /// First object number not used by any revision.
    pub fn next_object_number(&self) -> u32 {
        let size = self
            .trailer
            .get("Size")
            .and_then(Object::as_integer)
            .unwrap_or(0)
            .max(0) as u32;
        size.max(self.xref.max_object_number() + 1)
    }

    /// Load an indirect object.
    pub fn load_object(&self, obj_ref: ObjectRef) -> Result<Object> {
        let entry = self
            .xref
            .get(obj_ref.id)
            .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))?;

        match entry.entry_type {
            // A free entry resolves to null
            XRefEntryType::Free => Ok(Object::Null),
            XRefEntryType::Uncompressed => {
                let offset = entry.offset as usize;
                let input = self
                    .data
                    .get(offset..)
                    .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))?;
                let (_, (found, obj)) =
                    parse_indirect_object(input).map_err(|_| Error::ParseError {
                        offset,
                        reason: format!("cannot parse object {}", obj_ref),
                    })?;
                if found.id != obj_ref.id {
                    return Err(Error::ParseError {
                        offset,
                        reason: format!("expected object {} but found {}", obj_ref, found),
                    });
                }
                Ok(obj)
            },
            XRefEntryType::Compressed => {
                let stream_id = entry.offset as u32;
                let objects = self.object_stream(stream_id)?;
                objects
                    .get(&obj_ref.id)
                    .cloned()
                    .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))
            },
        }
    }

    fn object_stream(&self, stream_id: u32) -> Result<Arc<HashMap<u32, Object>>> {
        if let Ok(cache) = self.objstm_cache.lock() {
            if let Some(objects) = cache.get(&stream_id) {
                return Ok(Arc::clone(objects));
            }
        }

        let stream = self.load_object(ObjectRef::new(stream_id, 0))?;
        let objects = Arc::new(parse_object_stream(&stream)?);
        log::debug!("Unpacked object stream {} ({} objects)", stream_id, objects.len());

        if let Ok(mut cache) = self.objstm_cache.lock() {
            cache.insert(stream_id, Arc::clone(&objects));
        }
        Ok(objects)
    }

    /// Follow references until a direct object is reached.
    pub fn resolve(&self, obj: &Object) -> Result<Object> {
        let mut current = obj.clone();
        for _ in 0..MAX_RESOLVE_DEPTH {
            if let Object::Reference(r) = current {
                current = self.load_object(r)?;
            } else {
                return Ok(current);
            }
        }
        Err(Error::RecursionLimitExceeded(MAX_RESOLVE_DEPTH))
    }

    /// Resolve `obj` and require a dictionary (stream dictionaries included).
    pub fn resolve_dict(&self, obj: &Object) -> Result<Dictionary> {
        match self.resolve(obj)? {
            Object::Dictionary(dict) | Object::Stream { dict, .. } => Ok(dict),
            other => Err(Error::InvalidObjectType {
                expected: "Dictionary".to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }

    /// Reference of the document catalog.
    pub fn catalog_ref(&self) -> Result<ObjectRef> {
        self.trailer
            .get("Root")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::InvalidPdf("trailer has no /Root reference".to_string()))
    }

    /// The document catalog dictionary.
    pub fn catalog(&self) -> Result<Dictionary> {
        self.resolve_dict(&Object::Reference(self.catalog_ref()?))
    }

    /// References of all pages, in document order.
    pub fn page_refs(&self) -> Result<Vec<ObjectRef>> {
        let catalog = self.catalog()?;
        let root = catalog
            .get("Pages")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::InvalidPdf("catalog has no /Pages reference".to_string()))?;

        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        self.collect_pages(root, 0, &mut visited, &mut pages)?;
        Ok(pages)
    }

    fn collect_pages(
        &self,
        node_ref: ObjectRef,
        depth: u32,
        visited: &mut HashSet<ObjectRef>,
        pages: &mut Vec<ObjectRef>,
    ) -> Result<()> {
        if depth > MAX_PAGE_TREE_DEPTH {
            return Err(Error::RecursionLimitExceeded(MAX_PAGE_TREE_DEPTH));
        }
        if !visited.insert(node_ref) {
            return Err(Error::InvalidPdf(format!("page tree cycle at {}", node_ref)));
        }

        let node = self.resolve_dict(&Object::Reference(node_ref))?;
        match node.get("Kids").and_then(Object::as_array) {
            Some(kids) if node.get("Type").and_then(Object::as_name) != Some("Page") => {
                for kid in kids {
                    if let Some(kid_ref) = kid.as_reference() {
                        self.collect_pages(kid_ref, depth + 1, visited, pages)?;
                    }
                }
            },
            _ => pages.push(node_ref),
        }
        Ok(())
    }

    /// Number of pages.
    pub fn page_count(&self) -> Result<usize> {
        Ok(self.page_refs()?.len())
    }

    /// Reference of the page at `index` (zero-based).
    pub fn page_ref(&self, index: usize) -> Result<ObjectRef> {
        let pages = self.page_refs()?;
        pages.get(index).copied().ok_or_else(|| {
            Error::InvalidPdf(format!("page {} out of range ({} pages)", index, pages.len()))
        })
    }
}

/// Parse the `%PDF-M.m` header. Leading garbage within the first kilobyte is
/// tolerated as many viewers do.
pub fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(1024)];
    let pos = window
        .windows(5)
        .position(|w| w == b"%PDF-")
        .ok_or_else(|| {
            Error::InvalidHeader(String::from_utf8_lossy(&data[..data.len().min(8)]).into_owned())
        })?;

    let version = &data[pos + 5..];
    match version {
        [major, b'.', minor, ..] if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Ok((major - b'0', minor - b'0'))
        },
        _ => Err(Error::InvalidHeader(
            String::from_utf8_lossy(&version[..version.len().min(3)]).into_owned(),
        )),
    }
}
