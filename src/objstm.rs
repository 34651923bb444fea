//! Object stream parsing (PDF 1.5+).
//!
//! An object stream (`/Type /ObjStm`) packs several objects into one
//! compressed stream. The decoded data starts with `/N` pairs of integers
//! (object number, offset relative to `/First`), followed by the objects.
//!
//! ```text
//! 10 0 11 15        % object 10 at +0, object 11 at +15
//! << /Type /Annot >> [1 2 3]
//! ```

use crate::error::{Error, Result};
use crate::object::Object;
use crate::parser::parse_object;
use std::collections::HashMap;

/// Parse an object stream and extract all objects, keyed by object number.
pub fn parse_object_stream(stream_obj: &Object) -> Result<HashMap<u32, Object>> {
    let dict = match stream_obj {
        Object::Stream { dict, .. } => dict,
        _ => return Err(Error::InvalidPdf("object stream is not a Stream object".to_string())),
    };

    if let Some(type_name) = dict.get("Type").and_then(Object::as_name) {
        if type_name != "ObjStm" {
            return Err(Error::InvalidPdf(format!(
                "expected /Type /ObjStm, got /Type /{}",
                type_name
            )));
        }
    }

    let n = dict
        .get("N")
        .and_then(Object::as_integer)
        .ok_or_else(|| Error::InvalidPdf("object stream missing /N entry".to_string()))?;
    let first = dict
        .get("First")
        .and_then(Object::as_integer)
        .ok_or_else(|| Error::InvalidPdf("object stream missing /First entry".to_string()))?;

    if !(0..=1_000_000).contains(&n) || first < 0 {
        return Err(Error::InvalidPdf(format!(
            "invalid object stream header: /N {} /First {}",
            n, first
        )));
    }
    let (n, first) = (n as usize, first as usize);

    let decoded = stream_obj.decode_stream_data()?;
    if decoded.len() < first {
        return Err(Error::InvalidPdf(format!(
            "object stream data too short: {} bytes, expected at least {}",
            decoded.len(),
            first
        )));
    }

    let pairs = parse_offset_pairs(&decoded[..first], n)?;
    let mut objects = HashMap::with_capacity(n);

    for (obj_num, offset) in pairs {
        let start = first + offset;
        if start >= decoded.len() {
            log::warn!("Object {} offset {} lies outside its object stream", obj_num, offset);
            continue;
        }
        match parse_object(&decoded[start..]) {
            Ok((_, obj)) => {
                objects.insert(obj_num, obj);
            },
            Err(e) => log::warn!("Skipping unreadable object {} in object stream: {:?}", obj_num, e),
        }
    }

    Ok(objects)
}

fn parse_offset_pairs(header: &[u8], n: usize) -> Result<Vec<(u32, usize)>> {
    let numbers: Vec<usize> = header
        .split(|c| c.is_ascii_whitespace())
        .filter(|t| !t.is_empty())
        .map(|t| {
            std::str::from_utf8(t)
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| Error::InvalidPdf("malformed object stream header".to_string()))
        })
        .collect::<Result<_>>()?;

    if numbers.len() < n * 2 {
        return Err(Error::InvalidPdf(format!(
            "object stream header lists {} numbers, expected {}",
            numbers.len(),
            n * 2
        )));
    }

    Ok(numbers
        .chunks_exact(2)
        .take(n)
        .map(|pair| (pair[0] as u32, pair[1]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Dictionary;

    fn objstm(body: &[u8], n: i64, first: i64) -> Object {
        let mut dict = Dictionary::new();
        dict.insert("Type".to_string(), Object::name("ObjStm"));
        dict.insert("N".to_string(), Object::Integer(n));
        dict.insert("First".to_string(), Object::Integer(first));
        Object::Stream {
            dict,
            data: bytes::Bytes::copy_from_slice(body),
        }
    }

    #[test]
    fn test_parse_two_objects() {
        let body = b"10 0 11 16 << /A 1 /B 2 >> [1 2 3]";
        let objects = parse_object_stream(&objstm(body, 2, 11)).unwrap();
        assert_eq!(objects.len(), 2);
        assert!(objects[&10].as_dict().is_some());
        assert_eq!(objects[&11].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_short_header_rejected() {
        let body = b"10 0 << >>";
        assert!(parse_object_stream(&objstm(body, 2, 5)).is_err());
    }

    #[test]
    fn test_not_a_stream() {
        assert!(parse_object_stream(&Object::Null).is_err());
    }
}
