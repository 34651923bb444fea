//! Signature fields in the AcroForm.
//!
//! [`SignatureFieldManager`] indexes the terminal fields of a document by
//! fully qualified name and wires a signature into a revision: it reuses an
//! empty signature field or creates a merged field/widget annotation, hooks
//! it into the page and the AcroForm, and attaches an optional appearance.

use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::object::{Dictionary, Object, ObjectRef};
use crate::writer::{text_string, AppearanceStreamBuilder, IncrementalDocumentWriter};
use indexmap::IndexMap;
use std::collections::HashSet;

use super::types::SignatureAppearance;

/// Field nesting deeper than this is treated as malformed.
const MAX_FIELD_DEPTH: u32 = 32;

/// Annotation flags: Print (4) | Locked (128).
const SIGNATURE_WIDGET_FLAGS: i64 = 132;

/// AcroForm `/SigFlags`: SignaturesExist (1) | AppendOnly (2).
const SIG_FLAGS: i64 = 3;

/// A terminal form field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Fully qualified name, partial names joined with `.`
    pub name: String,
    /// The field dictionary
    pub field_ref: ObjectRef,
    /// Widget annotation (the field itself when merged)
    pub widget_ref: Option<ObjectRef>,
    /// `/FT`, inherited from ancestors when absent
    pub field_type: Option<String>,
    /// Page of the widget
    pub page: Option<usize>,
    /// Widget rectangle
    pub rect: Option<Rect>,
    /// `/V` reference: the signature dictionary once signed
    pub signature_ref: Option<ObjectRef>,
    /// Whether `/V` holds a value
    pub signed: bool,
}

impl FieldDescriptor {
    /// Whether `/FT` is `/Sig`.
    pub fn is_signature(&self) -> bool {
        self.field_type.as_deref() == Some("Sig")
    }
}

/// Index of the form fields of one document.
#[derive(Debug)]
pub struct SignatureFieldManager<'a> {
    doc: &'a PdfDocument,
    fields: IndexMap<String, FieldDescriptor>,
}

impl<'a> SignatureFieldManager<'a> {
    /// Read the AcroForm of `doc`.
    pub fn load(doc: &'a PdfDocument) -> Result<Self> {
        let mut manager = Self {
            doc,
            fields: IndexMap::new(),
        };

        let catalog = doc.catalog()?;
        let Some(acroform) = catalog.get("AcroForm") else {
            return Ok(manager);
        };
        let acroform = doc.resolve_dict(acroform)?;
        let Some(fields) = acroform.get("Fields") else {
            return Ok(manager);
        };
        let fields = doc.resolve(fields)?;
        let page_refs = doc.page_refs()?;

        let mut path = HashSet::new();
        for field in fields.as_array().map(Vec::as_slice).unwrap_or_default() {
            if let Some(field_ref) = field.as_reference() {
                manager.walk(field_ref, "", None, 0, &page_refs, &mut path)?;
            }
        }
        log::debug!("Indexed {} form field(s)", manager.fields.len());
        Ok(manager)
    }

    fn walk(
        &mut self,
        field_ref: ObjectRef,
        parent_name: &str,
        inherited_type: Option<&str>,
        depth: u32,
        page_refs: &[ObjectRef],
        path: &mut HashSet<ObjectRef>,
    ) -> Result<()> {
        if depth > MAX_FIELD_DEPTH {
            return Err(Error::RecursionLimitExceeded(MAX_FIELD_DEPTH));
        }
        // `path` holds the ancestors only: a field may legitimately be
        // reached twice, from /Fields and from its parent's /Kids.
        if !path.insert(field_ref) {
            return Err(Error::InvalidPdf(format!("form field cycle at {}", field_ref)));
        }
        let result = self.walk_field(field_ref, parent_name, inherited_type, depth, page_refs, path);
        path.remove(&field_ref);
        result
    }

    fn walk_field(
        &mut self,
        field_ref: ObjectRef,
        parent_name: &str,
        inherited_type: Option<&str>,
        depth: u32,
        page_refs: &[ObjectRef],
        path: &mut HashSet<ObjectRef>,
    ) -> Result<()> {

        let dict = self.doc.resolve_dict(&Object::Reference(field_ref))?;
        let partial = dict
            .get("T")
            .and_then(|t| self.doc.resolve(t).ok())
            .and_then(|t| t.as_string().map(decode_text_string))
            .unwrap_or_default();
        let name = match (parent_name.is_empty(), partial.is_empty()) {
            (true, _) => partial,
            (false, true) => parent_name.to_string(),
            (false, false) => format!("{}.{}", parent_name, partial),
        };
        let field_type = dict.get("FT").and_then(Object::as_name).or(inherited_type);

        let kids: Vec<ObjectRef> = match dict.get("Kids") {
            Some(kids) => self
                .doc
                .resolve(kids)?
                .as_array()
                .map(|arr| arr.iter().filter_map(Object::as_reference).collect())
                .unwrap_or_default(),
            None => Vec::new(),
        };

        // Kids without /T are widgets of this field, not child fields.
        let mut child_fields = Vec::new();
        let mut widgets = Vec::new();
        for kid in kids {
            let kid_dict = self.doc.resolve_dict(&Object::Reference(kid))?;
            if kid_dict.contains_key("T") {
                child_fields.push(kid);
            } else {
                widgets.push((kid, kid_dict));
            }
        }

        if !child_fields.is_empty() {
            let inherited = field_type.map(str::to_string);
            for kid in child_fields {
                self.walk(kid, &name, inherited.as_deref(), depth + 1, page_refs, path)?;
            }
            return Ok(());
        }

        let (widget_ref, widget) = match widgets.into_iter().next() {
            Some((widget_ref, widget)) => (Some(widget_ref), Some(widget)),
            None if dict.contains_key("Rect") || dict.get("Subtype").and_then(Object::as_name) == Some("Widget") => {
                (Some(field_ref), None)
            },
            None => (None, None),
        };
        let widget_dict = widget.as_ref().unwrap_or(&dict);
        let page = widget_dict
            .get("P")
            .and_then(Object::as_reference)
            .and_then(|p| page_refs.iter().position(|r| *r == p));
        let rect = widget_dict
            .get("Rect")
            .and_then(|r| self.doc.resolve(r).ok())
            .and_then(|r| Rect::from_pdf_array(&r));

        let indexed_as = self
            .fields
            .values()
            .find(|f| f.field_ref == field_ref)
            .map(|f| f.name.clone());
        if let Some(existing) = indexed_as {
            if parent_name.is_empty() || existing == name {
                log::debug!("Form field {} already indexed as '{}'", field_ref, existing);
                return Ok(());
            }
            // Listed in /Fields ahead of its parent; the qualified name wins.
            log::debug!("Re-indexing form field '{}' as '{}'", existing, name);
            self.fields.shift_remove(&existing);
        }

        let value = dict.get("V").filter(|v| !v.is_null());
        let descriptor = FieldDescriptor {
            name: name.clone(),
            field_ref,
            widget_ref,
            field_type: field_type.map(str::to_string),
            page,
            rect,
            signature_ref: value.and_then(Object::as_reference),
            signed: value.is_some(),
        };
        self.fields.insert(name, descriptor);
        Ok(())
    }

    /// All terminal fields, in document order.
    pub fn fields(&self) -> &IndexMap<String, FieldDescriptor> {
        &self.fields
    }

    /// Field by fully qualified name.
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    /// Signature fields only.
    pub fn signature_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values().filter(|f| f.is_signature())
    }

    /// First `Signature<n>` name not in use.
    pub fn unique_name(&self) -> String {
        (1..)
            .map(|n| format!("Signature{}", n))
            .find(|name| !self.fields.contains_key(name))
            .unwrap_or_else(|| "Signature".to_string())
    }

    /// Queue in `writer` everything needed to attach the signature
    /// dictionary `signature_ref` to the field `name`.
    ///
    /// `lines` is the text of a generated appearance; it is ignored for
    /// invisible signatures and caller-supplied content streams.
    pub fn prepare(
        &self,
        writer: &mut IncrementalDocumentWriter<'_>,
        name: &str,
        appearance: Option<&SignatureAppearance>,
        lines: &[String],
        signature_ref: ObjectRef,
    ) -> Result<FieldDescriptor> {
        match self.fields.get(name) {
            Some(existing) if existing.signed && existing.is_signature() => {
                Err(Error::FieldAlreadySigned(name.to_string()))
            },
            Some(existing) if !existing.is_signature() => Err(Error::InvalidPdf(format!(
                "field '{}' is a /{} field, not a signature field",
                name,
                existing.field_type.as_deref().unwrap_or("untyped")
            ))),
            Some(existing) => self.reuse(writer, existing, appearance, lines, signature_ref),
            None => self.create(writer, name, appearance, lines, signature_ref),
        }
    }

    fn create(
        &self,
        writer: &mut IncrementalDocumentWriter<'_>,
        name: &str,
        appearance: Option<&SignatureAppearance>,
        lines: &[String],
        signature_ref: ObjectRef,
    ) -> Result<FieldDescriptor> {
        if name.contains('.') {
            return Err(Error::Config(format!(
                "cannot create nested field '{}': parent fields must already exist",
                name
            )));
        }
        let page_index = appearance.map(|a| a.page).unwrap_or(0);
        let page_ref = self.doc.page_ref(page_index)?;
        let rect = appearance.map(|a| a.rect).unwrap_or(Rect::new(0.0, 0.0, 0.0, 0.0));

        let widget_ref = writer.allocate();
        let mut widget = Dictionary::new();
        widget.insert("Type".to_string(), Object::name("Annot"));
        widget.insert("Subtype".to_string(), Object::name("Widget"));
        widget.insert("FT".to_string(), Object::name("Sig"));
        widget.insert("T".to_string(), text_string(name));
        widget.insert("F".to_string(), Object::Integer(SIGNATURE_WIDGET_FLAGS));
        widget.insert("Rect".to_string(), rect.to_pdf_array());
        widget.insert("P".to_string(), Object::Reference(page_ref));
        widget.insert("V".to_string(), Object::Reference(signature_ref));
        if let Some(appearance) = appearance {
            let ap = Self::appearance_object(writer, appearance, lines);
            widget.insert("AP".to_string(), ap);
        }
        writer.update(widget_ref, Object::Dictionary(widget));

        add_to_array(writer, page_ref, "Annots", widget_ref)?;
        let acroform_ref = self.acroform(writer)?;
        add_to_array(writer, acroform_ref, "Fields", widget_ref)?;
        log::debug!("Created signature field '{}' as {} on page {}", name, widget_ref, page_index);

        Ok(FieldDescriptor {
            name: name.to_string(),
            field_ref: widget_ref,
            widget_ref: Some(widget_ref),
            field_type: Some("Sig".to_string()),
            page: Some(page_index),
            rect: Some(rect),
            signature_ref: Some(signature_ref),
            signed: true,
        })
    }

    fn reuse(
        &self,
        writer: &mut IncrementalDocumentWriter<'_>,
        existing: &FieldDescriptor,
        appearance: Option<&SignatureAppearance>,
        lines: &[String],
        signature_ref: ObjectRef,
    ) -> Result<FieldDescriptor> {
        let mut field = writer.current(existing.field_ref)?;
        let dict = field
            .as_dict_mut()
            .ok_or_else(|| Error::InvalidPdf(format!("field '{}' is not a dictionary", existing.name)))?;
        dict.insert("V".to_string(), Object::Reference(signature_ref));
        writer.update(existing.field_ref, field);

        let mut descriptor = existing.clone();
        descriptor.signature_ref = Some(signature_ref);
        descriptor.signed = true;

        if let Some(appearance) = appearance {
            let widget_ref = existing.widget_ref.unwrap_or(existing.field_ref);
            let page_ref = self.doc.page_ref(appearance.page)?;
            if let Some(old_page) = existing.page.filter(|p| *p != appearance.page) {
                remove_from_array(writer, self.doc.page_ref(old_page)?, "Annots", widget_ref)?;
            }
            if existing.page != Some(appearance.page) {
                add_to_array(writer, page_ref, "Annots", widget_ref)?;
            }

            let ap = Self::appearance_object(writer, appearance, lines);
            let mut widget = writer.current(widget_ref)?;
            let widget_dict = widget
                .as_dict_mut()
                .ok_or_else(|| Error::InvalidPdf(format!("widget {} is not a dictionary", widget_ref)))?;
            widget_dict.insert("Rect".to_string(), appearance.rect.to_pdf_array());
            widget_dict.insert("P".to_string(), Object::Reference(page_ref));
            widget_dict.insert("AP".to_string(), ap);
            writer.update(widget_ref, widget);

            descriptor.widget_ref = Some(widget_ref);
            descriptor.page = Some(appearance.page);
            descriptor.rect = Some(appearance.rect);
        }

        // already listed in /Fields, only /SigFlags may change
        self.acroform(writer)?;
        log::debug!("Reusing empty signature field '{}' ({})", existing.name, existing.field_ref);
        Ok(descriptor)
    }

    /// `/AP << /N stream >>` for `appearance`, with the stream queued in `writer`.
    fn appearance_object(
        writer: &mut IncrementalDocumentWriter<'_>,
        appearance: &SignatureAppearance,
        lines: &[String],
    ) -> Object {
        let builder = match &appearance.content {
            Some(content) => AppearanceStreamBuilder::with_content(appearance.rect, content.as_bytes().to_vec()),
            None => AppearanceStreamBuilder::for_signature(appearance.rect, lines, appearance.font_size),
        };
        let stream_ref = writer.add(builder.into_stream());
        let mut ap = Dictionary::new();
        ap.insert("N".to_string(), Object::Reference(stream_ref));
        Object::Dictionary(ap)
    }

    /// Reference of an indirect AcroForm with `/SigFlags` set, creating or
    /// promoting it as needed.
    fn acroform(&self, writer: &mut IncrementalDocumentWriter<'_>) -> Result<ObjectRef> {
        let catalog_ref = self.doc.catalog_ref()?;
        let mut catalog = writer.current(catalog_ref)?;
        let catalog_dict = catalog
            .as_dict_mut()
            .ok_or_else(|| Error::InvalidPdf("catalog is not a dictionary".to_string()))?;

        let (acroform_ref, mut acroform) = match catalog_dict.get("AcroForm").cloned() {
            Some(Object::Reference(r)) => {
                let dict = writer.current(r)?;
                (r, dict)
            },
            Some(Object::Dictionary(dict)) => {
                // Inline AcroForm moves into its own object.
                let r = writer.allocate();
                catalog_dict.insert("AcroForm".to_string(), Object::Reference(r));
                writer.update(catalog_ref, catalog);
                (r, Object::Dictionary(dict))
            },
            _ => {
                let r = writer.allocate();
                let mut dict = Dictionary::new();
                dict.insert("Fields".to_string(), Object::Array(Vec::new()));
                catalog_dict.insert("AcroForm".to_string(), Object::Reference(r));
                writer.update(catalog_ref, catalog);
                (r, Object::Dictionary(dict))
            },
        };

        let dict = acroform
            .as_dict_mut()
            .ok_or_else(|| Error::InvalidPdf("/AcroForm is not a dictionary".to_string()))?;
        let flags = dict.get("SigFlags").and_then(Object::as_integer).unwrap_or(0);
        if flags & SIG_FLAGS != SIG_FLAGS || writer.pending(acroform_ref).is_none() {
            dict.insert("SigFlags".to_string(), Object::Integer(flags | SIG_FLAGS));
            writer.update(acroform_ref, acroform);
        }
        Ok(acroform_ref)
    }
}

/// Append `item` to the array `key` of the dictionary `owner`, following an
/// indirect array when there is one.
fn add_to_array(writer: &mut IncrementalDocumentWriter<'_>, owner: ObjectRef, key: &str, item: ObjectRef) -> Result<()> {
    edit_array(writer, owner, key, |items| {
        if !items.iter().any(|o| o.as_reference() == Some(item)) {
            items.push(Object::Reference(item));
        }
    })
}

fn remove_from_array(
    writer: &mut IncrementalDocumentWriter<'_>,
    owner: ObjectRef,
    key: &str,
    item: ObjectRef,
) -> Result<()> {
    edit_array(writer, owner, key, |items| {
        items.retain(|o| o.as_reference() != Some(item));
    })
}

fn edit_array(
    writer: &mut IncrementalDocumentWriter<'_>,
    owner: ObjectRef,
    key: &str,
    edit: impl FnOnce(&mut Vec<Object>),
) -> Result<()> {
    let mut owner_obj = writer.current(owner)?;
    let dict = owner_obj
        .as_dict_mut()
        .ok_or_else(|| Error::InvalidPdf(format!("{} is not a dictionary", owner)))?;

    match dict.get(key).cloned() {
        Some(Object::Reference(array_ref)) => {
            let mut array = writer.current(array_ref)?;
            let Object::Array(items) = &mut array else {
                return Err(Error::InvalidPdf(format!("/{} of {} is not an array", key, owner)));
            };
            edit(items);
            writer.update(array_ref, array);
        },
        Some(Object::Array(mut items)) => {
            edit(&mut items);
            dict.insert(key.to_string(), Object::Array(items));
            writer.update(owner, owner_obj);
        },
        _ => {
            let mut items = Vec::new();
            edit(&mut items);
            dict.insert(key.to_string(), Object::Array(items));
            writer.update(owner, owner_obj);
        },
    }
    Ok(())
}

/// Decode a PDF text string: UTF-16BE with BOM, otherwise PDFDocEncoding
/// (read as Latin-1).
pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else if let Some(utf8) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        String::from_utf8_lossy(utf8).into_owned()
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}
