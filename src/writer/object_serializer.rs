//! PDF object serialization.
//!
//! Serializes [`Object`] values into PDF syntax. Dictionary keys are written
//! in sorted order so the same object always produces the same bytes.

use crate::object::{Dictionary, Object};

/// Serializer for PDF objects.
#[derive(Debug, Clone, Default)]
pub struct ObjectSerializer {
    /// Whether to use compact formatting (minimal whitespace)
    compact: bool,
}

impl ObjectSerializer {
    /// Create a new object serializer with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compact serializer (minimal whitespace).
    pub fn compact() -> Self {
        Self { compact: true }
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj);
        buf
    }

    /// Serialize an object to a string (for debugging and tests).
    pub fn serialize_to_string(&self, obj: &Object) -> String {
        String::from_utf8_lossy(&self.serialize(obj)).into_owned()
    }

    /// Serialize an indirect object definition.
    ///
    /// Format: `{id} {gen} obj\n{object}\nendobj\n`
    pub fn serialize_indirect(&self, id: u32, gen: u16, obj: &Object) -> Vec<u8> {
        let mut buf = format!("{} {} obj\n", id, gen).into_bytes();
        self.write_object(&mut buf, obj);
        buf.extend_from_slice(b"\nendobj\n");
        buf
    }

    /// Append an object to `buf`.
    pub fn write_object(&self, buf: &mut Vec<u8>, obj: &Object) {
        match obj {
            Object::Null => buf.extend_from_slice(b"null"),
            Object::Boolean(b) => buf.extend_from_slice(if *b { &b"true"[..] } else { &b"false"[..] }),
            Object::Integer(i) => buf.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => write_real(buf, *r),
            Object::String(s) => write_string(buf, s),
            Object::Name(n) => write_name(buf, n),
            Object::Array(arr) => self.write_array(buf, arr),
            Object::Dictionary(dict) => self.write_dictionary(buf, dict),
            Object::Stream { dict, data } => self.write_stream(buf, dict, data),
            Object::Reference(r) => buf.extend_from_slice(format!("{} {} R", r.id, r.gen).as_bytes()),
        }
    }

    fn write_array(&self, buf: &mut Vec<u8>, arr: &[Object]) {
        buf.push(b'[');
        for (i, obj) in arr.iter().enumerate() {
            if i > 0 {
                buf.push(b' ');
            }
            self.write_object(buf, obj);
        }
        buf.push(b']');
    }

    /// Append the entries of `dict` without the closing `>>`, so callers can
    /// add raw entries before closing it.
    pub fn write_dictionary_open(&self, buf: &mut Vec<u8>, dict: &Dictionary) {
        buf.extend_from_slice(b"<<");

        let mut keys: Vec<_> = dict.keys().collect();
        keys.sort();

        for key in keys {
            if let Some(value) = dict.get(key) {
                if self.compact {
                    buf.push(b' ');
                } else {
                    buf.extend_from_slice(b"\n  ");
                }
                write_name(buf, key);
                buf.push(b' ');
                self.write_object(buf, value);
            }
        }
    }

    fn write_dictionary(&self, buf: &mut Vec<u8>, dict: &Dictionary) {
        self.write_dictionary_open(buf, dict);
        if self.compact || dict.is_empty() {
            buf.extend_from_slice(b" >>");
        } else {
            buf.extend_from_slice(b"\n>>");
        }
    }

    fn write_stream(&self, buf: &mut Vec<u8>, dict: &Dictionary, data: &[u8]) {
        let mut dict_with_length = dict.clone();
        dict_with_length.insert("Length".to_string(), Object::Integer(data.len() as i64));

        self.write_dictionary(buf, &dict_with_length);
        buf.extend_from_slice(b"\nstream\n");
        buf.extend_from_slice(data);
        buf.extend_from_slice(b"\nendstream");
    }
}

/// Reals keep up to five decimals, trailing zeros trimmed.
fn write_real(buf: &mut Vec<u8>, value: f64) {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        buf.extend_from_slice((value as i64).to_string().as_bytes());
    } else {
        let formatted = format!("{:.5}", value);
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        buf.extend_from_slice(trimmed.as_bytes());
    }
}

/// Printable data becomes a literal string, anything else a hex string.
fn write_string(buf: &mut Vec<u8>, data: &[u8]) {
    let is_printable = data
        .iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7E).contains(&b));

    if is_printable {
        buf.push(b'(');
        for &byte in data {
            match byte {
                b'(' => buf.extend_from_slice(b"\\("),
                b')' => buf.extend_from_slice(b"\\)"),
                b'\\' => buf.extend_from_slice(b"\\\\"),
                b'\n' => buf.extend_from_slice(b"\\n"),
                b'\r' => buf.extend_from_slice(b"\\r"),
                b'\t' => buf.extend_from_slice(b"\\t"),
                _ => buf.push(byte),
            }
        }
        buf.push(b')');
    } else {
        buf.push(b'<');
        buf.extend_from_slice(hex_upper(data).as_bytes());
        buf.push(b'>');
    }
}

/// Names start with `/`; delimiters, whitespace and non-ASCII bytes are
/// written as `#XX`.
fn write_name(buf: &mut Vec<u8>, name: &str) {
    buf.push(b'/');
    for byte in name.bytes() {
        match byte {
            b'!'
            | b'"'
            | b'$'..=b'&'
            | b'\''
            | b'*'..=b'.'
            | b'0'..=b';'
            | b'='
            | b'?'
            | b'@'
            | b'A'..=b'Z'
            | b'^'..=b'z'
            | b'|'
            | b'~' => buf.push(byte),
            _ => buf.extend_from_slice(format!("#{:02X}", byte).as_bytes()),
        }
    }
}

/// Upper-case hex encoding.
pub fn hex_upper(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        out.push_str(&format!("{:02X}", byte));
    }
    out
}

/// Text string for dictionary values: plain bytes when the text is ASCII,
/// UTF-16BE with a byte order mark otherwise.
pub fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        Object::String(text.as_bytes().to_vec())
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectRef;
    use crate::parser::parse_object;

    #[test]
    fn test_primitives() {
        let s = ObjectSerializer::compact();
        assert_eq!(s.serialize_to_string(&Object::Null), "null");
        assert_eq!(s.serialize_to_string(&Object::Integer(-7)), "-7");
        assert_eq!(s.serialize_to_string(&Object::Real(36.0)), "36");
        assert_eq!(s.serialize_to_string(&Object::Real(0.125)), "0.125");
        assert_eq!(s.serialize_to_string(&Object::Reference(ObjectRef::new(4, 0))), "4 0 R");
    }

    #[test]
    fn test_string_forms() {
        let s = ObjectSerializer::compact();
        assert_eq!(s.serialize_to_string(&Object::String(b"a(b)".to_vec())), "(a\\(b\\))");
        assert_eq!(s.serialize_to_string(&Object::String(vec![0, 0xAB])), "<00AB>");
    }

    #[test]
    fn test_name_escaping() {
        let s = ObjectSerializer::compact();
        assert_eq!(s.serialize_to_string(&Object::name("Adobe.PPKLite")), "/Adobe.PPKLite");
        assert_eq!(s.serialize_to_string(&Object::name("A B")), "/A#20B");
        assert_eq!(s.serialize_to_string(&Object::name("a/b")), "/a#2Fb");
    }

    #[test]
    fn test_dictionary_sorted_and_reparsable() {
        let mut dict = Dictionary::new();
        dict.insert("Type".to_string(), Object::name("Sig"));
        dict.insert("Filter".to_string(), Object::name("Adobe.PPKLite"));
        let out = ObjectSerializer::compact().serialize(&Object::Dictionary(dict.clone()));
        assert_eq!(out, b"<< /Filter /Adobe.PPKLite /Type /Sig >>");
        let (_, parsed) = parse_object(&out).unwrap();
        assert_eq!(parsed, Object::Dictionary(dict));
    }

    #[test]
    fn test_stream_length_is_set() {
        let obj = Object::Stream {
            dict: Dictionary::new(),
            data: bytes::Bytes::from_static(b"0 0 m"),
        };
        let out = ObjectSerializer::compact().serialize_to_string(&obj);
        assert!(out.starts_with("<< /Length 5 >>\nstream\n0 0 m\nendstream"));
    }

    #[test]
    fn test_indirect() {
        let out = ObjectSerializer::compact().serialize_indirect(3, 0, &Object::Integer(1));
        assert_eq!(out, b"3 0 obj\n1\nendobj\n");
    }

    #[test]
    fn test_text_string() {
        assert_eq!(text_string("Ghent"), Object::String(b"Ghent".to_vec()));
        assert_eq!(text_string("é"), Object::String(vec![0xFE, 0xFF, 0x00, 0xE9]));
    }
}
