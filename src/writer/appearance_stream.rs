//! Appearance stream generation for signature widgets.
//!
//! A visible signature is drawn by a Form XObject referenced from the
//! widget's `/AP /N` entry. The stream is purely visual: it is written
//! before the digest is taken like every other object of the revision, and
//! nothing in it depends on the signature value.
//!
//! PDF Spec: ISO 32000-1:2008, Section 12.5.5 (Appearance Streams)
//!
//! # Example
//!
//! ```
//! use pdf_seal::geometry::Rect;
//! use pdf_seal::writer::AppearanceStreamBuilder;
//!
//! let lines = vec!["Digitally signed by Alice".to_string()];
//! let ap = AppearanceStreamBuilder::for_signature(Rect::new(72.0, 72.0, 200.0, 50.0), &lines, 10.0);
//! let (dict, content) = ap.build();
//! assert!(dict.contains_key("Resources"));
//! assert!(content.starts_with(b"q\n"));
//! ```

use crate::geometry::Rect;
use crate::object::{Dictionary, Object};

/// Resource name of the font used by generated text.
const FONT_RESOURCE: &str = "Helv";

/// Builder for creating PDF appearance streams.
///
/// Appearance streams are Form XObjects that define the visual representation
/// of annotations. This builder generates the content stream bytes and the
/// Form XObject dictionary.
#[derive(Debug, Clone)]
pub struct AppearanceStreamBuilder {
    /// Bounding box for the appearance
    bbox: Rect,
    /// Content stream operations as bytes
    content: Vec<u8>,
    /// Resources needed by the appearance (fonts, etc.)
    resources: Dictionary,
    /// Matrix transformation (optional)
    matrix: Option<[f64; 6]>,
}

impl AppearanceStreamBuilder {
    /// Create a new appearance stream builder with the given bounding box.
    pub fn new(bbox: Rect) -> Self {
        Self {
            bbox,
            content: Vec::new(),
            resources: Dictionary::new(),
            matrix: None,
        }
    }

    /// Appearance drawing caller-supplied operators inside `rect`.
    pub fn with_content(rect: Rect, content: impl Into<Vec<u8>>) -> Self {
        let mut builder = Self::new(Rect::new(0.0, 0.0, rect.width, rect.height));
        builder.content = content.into();
        builder
    }

    /// Text block for a signature: a thin border and one line per entry,
    /// top to bottom, in Helvetica.
    ///
    /// The font shrinks when the lines would not fit the rectangle's height.
    pub fn for_signature(rect: Rect, lines: &[String], font_size: f32) -> Self {
        let mut builder = Self::new(Rect::new(0.0, 0.0, rect.width, rect.height));
        builder.add_standard_font(FONT_RESOURCE, "Helvetica");

        let (w, h) = (rect.width, rect.height);
        let padding = 2.0_f32;
        let leading_factor = 1.2_f32;
        let max_size = if lines.is_empty() {
            font_size
        } else {
            (h - 2.0 * padding) / (lines.len() as f32 * leading_factor)
        };
        let size = font_size.min(max_size).max(1.0);
        let leading = size * leading_factor;

        let mut content = Vec::new();
        content.extend_from_slice(b"q\n");
        content.extend_from_slice(b"0.5 w 0 G\n");
        content.extend_from_slice(format!("0.25 0.25 {} {} re S\n", fmt(w - 0.5), fmt(h - 0.5)).as_bytes());

        if !lines.is_empty() {
            content.extend_from_slice(format!("0 0 {} {} re W n\n", fmt(w), fmt(h)).as_bytes());
            content.extend_from_slice(b"BT\n");
            content.extend_from_slice(format!("/{} {} Tf\n", FONT_RESOURCE, fmt(size)).as_bytes());
            content.extend_from_slice(b"0 g\n");
            content.extend_from_slice(format!("{} TL\n", fmt(leading)).as_bytes());
            content.extend_from_slice(format!("{} {} Td\n", fmt(padding), fmt(h - padding - size)).as_bytes());
            for (i, line) in lines.iter().enumerate() {
                if i > 0 {
                    content.extend_from_slice(b"T*\n");
                }
                content.push(b'(');
                content.extend_from_slice(&escape_text(line));
                content.extend_from_slice(b") Tj\n");
            }
            content.extend_from_slice(b"ET\n");
        }
        content.extend_from_slice(b"Q\n");

        builder.content = content;
        builder
    }

    /// Set a transformation matrix.
    pub fn with_matrix(mut self, matrix: [f64; 6]) -> Self {
        self.matrix = Some(matrix);
        self
    }

    /// Register one of the standard 14 fonts under `name`.
    fn add_standard_font(&mut self, name: &str, base_font: &str) {
        let mut font = Dictionary::new();
        font.insert("Type".to_string(), Object::name("Font"));
        font.insert("Subtype".to_string(), Object::name("Type1"));
        font.insert("BaseFont".to_string(), Object::name(base_font));
        font.insert("Encoding".to_string(), Object::name("WinAnsiEncoding"));

        let fonts = self
            .resources
            .entry("Font".to_string())
            .or_insert_with(|| Object::Dictionary(Dictionary::new()));
        if let Some(dict) = fonts.as_dict_mut() {
            dict.insert(name.to_string(), Object::Dictionary(font));
        }
    }

    /// Build the Form XObject dictionary and content bytes.
    pub fn build(&self) -> (Dictionary, Vec<u8>) {
        let mut dict = Dictionary::new();

        dict.insert("Type".to_string(), Object::name("XObject"));
        dict.insert("Subtype".to_string(), Object::name("Form"));
        dict.insert("FormType".to_string(), Object::Integer(1));
        dict.insert("BBox".to_string(), self.bbox.to_pdf_array());

        if let Some(m) = self.matrix {
            dict.insert("Matrix".to_string(), Object::Array(m.iter().map(|v| Object::Real(*v)).collect()));
        }

        // An empty dictionary still stops viewers from inheriting page resources.
        dict.insert("Resources".to_string(), Object::Dictionary(self.resources.clone()));

        (dict, self.content.clone())
    }

    /// Build the stream object ready to be written.
    pub fn into_stream(self) -> Object {
        let (dict, content) = self.build();
        Object::Stream {
            dict,
            data: bytes::Bytes::from(content),
        }
    }

    /// Get the bounding box.
    pub fn bbox(&self) -> Rect {
        self.bbox
    }
}

fn fmt(value: f32) -> String {
    let s = format!("{:.2}", value);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Literal-string bytes in WinAnsi; characters outside Latin-1 become `?`.
fn escape_text(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        let code = ch as u32;
        let byte = if code <= 0xFF { code as u8 } else { b'?' };
        match byte {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(byte);
            },
            b'\n' | b'\r' => out.push(b' '),
            _ => out.push(byte),
        }
    }
    out
}
