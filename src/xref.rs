//! Cross-reference parser.
//!
//! Maps object numbers to byte offsets (or object stream slots) so the reader
//! can resolve indirect references. Handles classic `xref` tables, PDF 1.5
//! cross-reference streams, hybrid files (`/XRefStm`) and `/Prev` chains left
//! by incremental updates. The kind of the newest section is recorded because
//! an appended revision must continue with the same kind.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};
use crate::parser::{parse_indirect_object, parse_object};
use std::collections::HashMap;

/// Upper bound on `/Prev` hops before the chain is considered circular.
const MAX_PREV_DEPTH: u32 = 100;

/// Cross-reference table entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntryType {
    /// Entry for a free object
    Free,
    /// Entry for an uncompressed object at a byte offset
    Uncompressed,
    /// Entry for an object inside an object stream
    Compressed,
}

/// Cross-reference table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XRefEntry {
    /// Type of entry
    pub entry_type: XRefEntryType,
    /// Byte offset (uncompressed) or object stream number (compressed)
    pub offset: u64,
    /// Generation number (uncompressed) or index within stream (compressed)
    pub generation: u16,
}

impl XRefEntry {
    /// Create a new uncompressed entry.
    pub fn uncompressed(offset: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Uncompressed,
            offset,
            generation,
        }
    }

    /// Create a new compressed entry (object in object stream).
    pub fn compressed(stream_obj_num: u64, index_in_stream: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Compressed,
            offset: stream_obj_num,
            generation: index_in_stream,
        }
    }

    /// Create a new free entry.
    pub fn free(next_free: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Free,
            offset: next_free,
            generation,
        }
    }

    /// Whether the entry points at a live object.
    pub fn in_use(&self) -> bool {
        self.entry_type != XRefEntryType::Free
    }
}

/// Syntax used by a cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefKind {
    /// Classic `xref` keyword table followed by `trailer`
    Table,
    /// `/Type /XRef` stream object
    Stream,
}

/// Cross-reference table merged across all revisions.
#[derive(Debug, Clone, Default)]
pub struct CrossRefTable {
    entries: HashMap<u32, XRefEntry>,
    trailer: Option<Dictionary>,
    kind: Option<XRefKind>,
}

impl CrossRefTable {
    /// Create a new empty cross-reference table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the trailer dictionary.
    pub fn set_trailer(&mut self, trailer: Dictionary) {
        self.trailer = Some(trailer);
    }

    /// Trailer of the newest section (for streams, the stream dictionary).
    pub fn trailer(&self) -> Option<&Dictionary> {
        self.trailer.as_ref()
    }

    /// Kind of the newest section.
    pub fn kind(&self) -> XRefKind {
        self.kind.unwrap_or(XRefKind::Table)
    }

    /// Add an entry to the cross-reference table.
    pub fn add_entry(&mut self, object_number: u32, entry: XRefEntry) {
        self.entries.insert(object_number, entry);
    }

    /// Get an entry by object number.
    pub fn get(&self, object_number: u32) -> Option<&XRefEntry> {
        self.entries.get(&object_number)
    }

    /// Highest object number present in any section.
    pub fn max_object_number(&self) -> u32 {
        self.entries.keys().copied().max().unwrap_or(0)
    }

    /// Merge entries from an older section; entries already in `self` win.
    pub fn merge_from(&mut self, other: CrossRefTable) {
        for (obj_num, entry) in other.entries {
            self.entries.entry(obj_num).or_insert(entry);
        }
        if self.trailer.is_none() {
            self.trailer = other.trailer;
        }
        if self.kind.is_none() {
            self.kind = other.kind;
        }
    }

    /// Get the number of entries in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Find the offset recorded after the last `startxref` keyword.
pub fn find_xref_offset(data: &[u8]) -> Result<u64> {
    let tail_start = data.len().saturating_sub(2048);
    let tail = &data[tail_start..];

    let keyword = b"startxref";
    let pos = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or_else(|| Error::InvalidXref("startxref not found".to_string()))?;

    let digits: Vec<u8> = tail[pos + keyword.len()..]
        .iter()
        .copied()
        .skip_while(|c| c.is_ascii_whitespace())
        .take_while(|c| c.is_ascii_digit())
        .collect();

    std::str::from_utf8(&digits)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| Error::InvalidXref("startxref offset is not a number".to_string()))
}

/// Parse the cross-reference section at `offset` and every section reachable
/// through `/Prev` (and `/XRefStm` in hybrid files).
pub fn parse_xref(data: &[u8], offset: u64) -> Result<CrossRefTable> {
    parse_xref_recursive(data, offset, 0)
}

fn parse_xref_recursive(data: &[u8], offset: u64, depth: u32) -> Result<CrossRefTable> {
    if depth > MAX_PREV_DEPTH {
        return Err(Error::RecursionLimitExceeded(MAX_PREV_DEPTH));
    }

    let start = usize::try_from(offset)
        .ok()
        .filter(|&o| o < data.len())
        .ok_or_else(|| Error::InvalidXref(format!("offset {} beyond end of file", offset)))?;

    let section = &data[start..];
    let first = section
        .iter()
        .position(|c| !c.is_ascii_whitespace())
        .unwrap_or(section.len());

    log::debug!("Parsing xref at offset {}", offset);

    let mut xref = if section[first..].starts_with(b"xref") {
        parse_traditional_xref(data, start + first)?
    } else if section.get(first).is_some_and(|c| c.is_ascii_digit()) {
        parse_xref_stream(data, start + first)?
    } else {
        return Err(Error::InvalidXref(format!("no cross-reference data at offset {}", offset)));
    };

    let (xref_stm, prev) = match xref.trailer() {
        Some(trailer) => (
            trailer.get("XRefStm").and_then(Object::as_integer),
            trailer.get("Prev").and_then(Object::as_integer),
        ),
        None => (None, None),
    };

    // Hybrid file: stream entries take precedence over the older table body
    // but not over this table itself.
    if let Some(stm_offset) = xref_stm {
        match parse_xref_stream(data, stm_offset.max(0) as usize) {
            Ok(stream) => {
                for (obj_num, entry) in stream.entries {
                    xref.entries.entry(obj_num).or_insert(entry);
                }
            },
            Err(e) => log::warn!("Ignoring unreadable /XRefStm at {}: {}", stm_offset, e),
        }
    }

    if let Some(prev_offset) = prev {
        log::debug!("Following /Prev {} from xref at {}", prev_offset, offset);
        let older = parse_xref_recursive(data, prev_offset.max(0) as u64, depth + 1)?;
        xref.merge_from(older);
    }

    Ok(xref)
}

/// Split off one line (LF, CR or CRLF terminated).
fn next_line(data: &[u8], pos: usize) -> (&[u8], usize) {
    let rest = &data[pos..];
    match rest.iter().position(|&c| c == b'\n' || c == b'\r') {
        Some(i) => {
            let mut next = pos + i + 1;
            if rest[i] == b'\r' && rest.get(i + 1) == Some(&b'\n') {
                next += 1;
            }
            (&rest[..i], next)
        },
        None => (rest, data.len()),
    }
}

fn parse_number<T: std::str::FromStr>(field: &[u8]) -> Option<T> {
    std::str::from_utf8(field).ok()?.trim().parse().ok()
}

/// Classic table:
///
/// ```text
/// xref
/// 0 6
/// 0000000000 65535 f
/// 0000000018 00000 n
/// trailer
/// << /Size 6 /Root 1 0 R >>
/// ```
fn parse_traditional_xref(data: &[u8], start: usize) -> Result<CrossRefTable> {
    let mut xref = CrossRefTable::new();
    xref.kind = Some(XRefKind::Table);

    let (_, mut pos) = next_line(data, start);
    let mut current: Option<(u32, u32)> = None;
    let mut index = 0u32;

    loop {
        if pos >= data.len() {
            return Err(Error::InvalidXref("table is missing its trailer".to_string()));
        }
        let line_start = pos;
        let (line, next) = next_line(data, pos);
        pos = next;

        let trimmed = trim_ascii(line);
        if trimmed.is_empty() || trimmed.starts_with(b"%") {
            continue;
        }

        if trimmed.starts_with(b"trailer") {
            let after = line_start + (line.len() - trimmed.len()) + b"trailer".len();
            let (_, trailer) = parse_object(&data[after..]).map_err(|_| Error::ParseError {
                offset: after,
                reason: "unreadable trailer dictionary".to_string(),
            })?;
            match trailer {
                Object::Dictionary(dict) => xref.set_trailer(dict),
                other => {
                    return Err(Error::InvalidObjectType {
                        expected: "Dictionary".to_string(),
                        found: other.type_name().to_string(),
                    })
                },
            }
            return Ok(xref);
        }

        let fields: Vec<&[u8]> = trimmed
            .split(|c| c.is_ascii_whitespace())
            .filter(|f| !f.is_empty())
            .collect();

        match (current, fields.len()) {
            (Some((first, count)), 3) if index < count => {
                let offset: u64 = parse_number(fields[0])
                    .ok_or_else(|| Error::InvalidXref(format!("bad offset in entry {}", first + index)))?;
                let generation: u16 = parse_number(fields[1]).unwrap_or(0);
                let entry = match fields[2] {
                    b"n" => XRefEntry::uncompressed(offset, generation),
                    _ => XRefEntry::free(offset, generation),
                };
                xref.add_entry(first + index, entry);
                index += 1;
            },
            (_, 2) => {
                let first = parse_number(fields[0])
                    .ok_or_else(|| Error::InvalidXref("bad subsection header".to_string()))?;
                let count: u32 = parse_number(fields[1])
                    .ok_or_else(|| Error::InvalidXref("bad subsection header".to_string()))?;
                if count > 10_000_000 {
                    return Err(Error::InvalidXref("subsection count exceeds limit".to_string()));
                }
                current = Some((first, count));
                index = 0;
            },
            _ => {
                return Err(Error::InvalidXref(format!(
                    "unexpected line {:?}",
                    String::from_utf8_lossy(trimmed)
                )))
            },
        }
    }
}

fn trim_ascii(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|c| !c.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|c| !c.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end.max(start)]
}

/// Cross-reference stream: `/W [w1 w2 w3]` field widths, optional `/Index`
/// ranges, entries of type 0 (free), 1 (offset) or 2 (object stream slot).
fn parse_xref_stream(data: &[u8], start: usize) -> Result<CrossRefTable> {
    let input = data
        .get(start..)
        .ok_or_else(|| Error::InvalidXref(format!("offset {} beyond end of file", start)))?;
    let (_, (_, obj)) = parse_indirect_object(input).map_err(|_| Error::ParseError {
        offset: start,
        reason: "unreadable cross-reference stream".to_string(),
    })?;

    let stream_dict = match &obj {
        Object::Stream { dict, .. } => dict.clone(),
        other => {
            return Err(Error::InvalidObjectType {
                expected: "Stream".to_string(),
                found: other.type_name().to_string(),
            })
        },
    };

    if stream_dict.get("Type").and_then(Object::as_name) != Some("XRef") {
        return Err(Error::InvalidXref("stream is not /Type /XRef".to_string()));
    }

    let widths: Vec<usize> = stream_dict
        .get("W")
        .and_then(Object::as_array)
        .map(|w| w.iter().filter_map(Object::as_integer).map(|v| v.max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
        return Err(Error::InvalidXref("invalid /W array".to_string()));
    }
    let (w1, w2, w3) = (widths[0], widths[1], widths[2]);
    let entry_size = w1 + w2 + w3;
    if entry_size == 0 {
        return Err(Error::InvalidXref("empty /W entries".to_string()));
    }

    let size = stream_dict
        .get("Size")
        .and_then(Object::as_integer)
        .ok_or_else(|| Error::InvalidXref("missing /Size in xref stream".to_string()))? as u32;

    let ranges: Vec<(u32, u32)> = match stream_dict.get("Index").and_then(Object::as_array) {
        Some(index) => index
            .chunks(2)
            .filter_map(|pair| match pair {
                [s, c] => Some((s.as_integer()? as u32, c.as_integer()? as u32)),
                _ => None,
            })
            .collect(),
        None => vec![(0, size)],
    };

    let decoded = obj.decode_stream_data()?;

    let mut xref = CrossRefTable::new();
    xref.kind = Some(XRefKind::Stream);
    let mut rows = decoded.chunks_exact(entry_size);

    for (first, count) in ranges {
        for i in 0..count {
            let row = rows
                .next()
                .ok_or_else(|| Error::InvalidXref("truncated xref stream data".to_string()))?;
            let entry_type = if w1 > 0 { read_int(&row[..w1]) } else { 1 };
            let field2 = read_int(&row[w1..w1 + w2]);
            let field3 = read_int(&row[w1 + w2..]);

            let entry = match entry_type {
                0 => XRefEntry::free(field2, field3 as u16),
                1 => XRefEntry::uncompressed(field2, field3 as u16),
                2 => XRefEntry::compressed(field2, field3 as u16),
                // Unknown types are treated as null references
                _ => continue,
            };
            xref.add_entry(first + i, entry);
        }
    }

    xref.set_trailer(stream_dict);
    Ok(xref)
}

/// Read a big-endian integer of up to 8 bytes.
fn read_int(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}
