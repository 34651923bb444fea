//! ByteRange calculation and digesting for PDF signatures.
//!
//! PDF digital signatures use a ByteRange array to specify which portions
//! of the document are covered by the signature. The signature itself is
//! stored in a placeholder that is excluded from the signed bytes.
//!
//! ## ByteRange Format
//!
//! The ByteRange is an array of four integers:
//! `[offset1, length1, offset2, length2]`
//!
//! Where:
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset where the signature value begins
//! - `offset2` = byte offset where the signature value ends
//! - `length2` = remaining bytes to end of file
//!
//! The signature value is a hex-encoded string within `<` and `>` delimiters.
//! Both delimiters belong to the excluded gap.

use super::types::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::object::Object;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Chunk size used when streaming a file into the hasher.
const READ_CHUNK: usize = 64 * 1024;

/// How far past `/ByteRange` the matching `/Contents` may appear.
const CONTENTS_SEARCH_WINDOW: usize = 4096;

/// Location of the `/Contents` hex string, delimiters included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceholderRange {
    /// Offset of the opening `<`
    pub contents_start: usize,
    /// Offset one past the closing `>`
    pub contents_end: usize,
}

impl PlaceholderRange {
    /// Placeholder reserving `capacity` container bytes at `contents_start`.
    pub fn with_capacity(contents_start: usize, capacity: usize) -> Self {
        Self {
            contents_start,
            contents_end: contents_start + placeholder_len(capacity),
        }
    }

    /// Length of the placeholder in the file.
    pub fn len(&self) -> usize {
        self.contents_end - self.contents_start
    }

    /// Whether the placeholder has no room for hex digits.
    pub fn is_empty(&self) -> bool {
        self.len() <= 2
    }

    /// Number of container bytes the placeholder can hold.
    pub fn capacity(&self) -> usize {
        self.len().saturating_sub(2) / 2
    }

    /// The `/ByteRange` excluding this placeholder from a file of `file_len` bytes.
    pub fn byte_range(&self, file_len: usize) -> ByteRange {
        ByteRange::new([
            0,
            self.contents_start as u64,
            self.contents_end as u64,
            file_len.saturating_sub(self.contents_end) as u64,
        ])
    }
}

/// Bytes needed in the file for a placeholder of `capacity` container bytes.
pub fn placeholder_len(capacity: usize) -> usize {
    capacity * 2 + 2
}

/// A `/ByteRange` value: two `(offset, length)` spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange([u64; 4]);

impl ByteRange {
    /// Wrap the four raw numbers.
    pub fn new(values: [u64; 4]) -> Self {
        Self(values)
    }

    /// Read a `/ByteRange` array.
    pub fn from_pdf_array(obj: &Object) -> Result<Self> {
        let arr = obj
            .as_array()
            .ok_or_else(|| Error::InvalidByteRange(format!("expected array, found {}", obj.type_name())))?;
        if arr.len() != 4 {
            return Err(Error::InvalidByteRange(format!(
                "expected 4 numbers, found {}",
                arr.len()
            )));
        }
        let mut values = [0u64; 4];
        for (slot, item) in values.iter_mut().zip(arr) {
            let n = item
                .as_integer()
                .filter(|n| *n >= 0)
                .ok_or_else(|| Error::InvalidByteRange("entries must be non-negative integers".to_string()))?;
            *slot = n as u64;
        }
        Ok(Self(values))
    }

    /// The raw numbers.
    pub fn values(&self) -> [u64; 4] {
        self.0
    }

    /// The first span as `start..end`.
    pub fn first_span(&self) -> (u64, u64) {
        (self.0[0], self.0[0] + self.0[1])
    }

    /// The second span as `start..end`.
    pub fn second_span(&self) -> (u64, u64) {
        (self.0[2], self.0[2] + self.0[3])
    }

    /// Offset one past the last covered byte.
    pub fn end(&self) -> u64 {
        self.0[2] + self.0[3]
    }

    /// `0 a b c`, the array body without brackets.
    pub fn to_pdf_string(&self) -> String {
        format!("{} {} {} {}", self.0[0], self.0[1], self.0[2], self.0[3])
    }

    /// The excluded gap between the two spans.
    pub fn gap(&self) -> PlaceholderRange {
        PlaceholderRange {
            contents_start: self.0[1] as usize,
            contents_end: self.0[2] as usize,
        }
    }

    /// Check that the range starts at 0, ends at `file_size` and leaves a
    /// non-negative gap between the two spans.
    pub fn validate(&self, file_size: usize) -> Result<()> {
        let [offset1, length1, offset2, _] = self.0;

        if offset1 != 0 {
            return Err(Error::InvalidByteRange(format!("must start at 0, got {}", offset1)));
        }
        if self.end() != file_size as u64 {
            return Err(Error::InvalidByteRange(format!(
                "must end at file size {}, got {}",
                file_size,
                self.end()
            )));
        }
        if length1 > offset2 {
            return Err(Error::InvalidByteRange(format!(
                "first range ({}) overlaps with second range start ({})",
                length1, offset2
            )));
        }
        Ok(())
    }

    /// Whether the range is inside a file of `file_size` bytes.
    pub fn fits(&self, file_size: usize) -> bool {
        self.first_span().1 <= file_size as u64 && self.end() <= file_size as u64
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.to_pdf_string())
    }
}

/// Computes the digest of a document excluding its signature placeholder.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteRangeDigestCalculator {
    algorithm: DigestAlgorithm,
}

impl ByteRangeDigestCalculator {
    /// Calculator for `algorithm`.
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Digest algorithm in use.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Digest a freshly prepared revision whose placeholder is at `placeholder`.
    ///
    /// The placeholder must be zero filled and the `/ByteRange` written in
    /// front of it must describe exactly the two spans around it.
    pub fn digest_prepared(&self, data: &[u8], placeholder: &PlaceholderRange) -> Result<Vec<u8>> {
        check_placeholder(data, placeholder)?;

        let expected = placeholder.byte_range(data.len());
        let declared = declared_byte_range(data, placeholder.contents_start)?;
        if declared != expected {
            return Err(Error::InvalidByteRange(format!(
                "declared {} does not match placeholder {}",
                declared, expected
            )));
        }
        expected.validate(data.len())?;

        log::debug!(
            "Digesting {} with {} (placeholder of {} bytes at {})",
            expected,
            self.algorithm.name(),
            placeholder.len(),
            placeholder.contents_start
        );
        Ok(self.digest_spans(data, &expected))
    }

    /// Locate the placeholder of the newest signature dictionary and digest
    /// around it.
    pub fn digest(&self, data: &[u8]) -> Result<Vec<u8>> {
        let placeholder = locate_placeholder(data)?;
        self.digest_prepared(data, &placeholder)
    }

    /// Digest the spans of an existing `/ByteRange` (verifier side).
    ///
    /// Only the bounds are checked: the range may stop before EOF when the
    /// signature covers an earlier revision.
    pub fn digest_byte_range(&self, data: &[u8], range: &ByteRange) -> Result<Vec<u8>> {
        if !range.fits(data.len()) || range.values()[1] > range.values()[2] {
            return Err(Error::InvalidByteRange(format!(
                "{} does not fit a file of {} bytes",
                range,
                data.len()
            )));
        }
        Ok(self.digest_spans(data, range))
    }

    /// Stream the two spans of a file into the hasher.
    pub fn digest_file(&self, path: impl AsRef<Path>, range: &ByteRange) -> Result<Vec<u8>> {
        let mut file = std::fs::File::open(path.as_ref())?;
        self.digest_reader(&mut file, range)
    }

    /// Stream the two spans of a seekable reader into the hasher.
    ///
    /// A reader shorter than the range fails with an I/O error.
    pub fn digest_reader<R: Read + Seek>(&self, reader: &mut R, range: &ByteRange) -> Result<Vec<u8>> {
        let mut hasher = self.algorithm.hasher();
        let mut buf = vec![0u8; READ_CHUNK];

        for (start, end) in [range.first_span(), range.second_span()] {
            reader.seek(SeekFrom::Start(start))?;
            let mut remaining = end - start;
            while remaining > 0 {
                let want = remaining.min(READ_CHUNK as u64) as usize;
                reader.read_exact(&mut buf[..want])?;
                hasher.update(&buf[..want]);
                remaining -= want as u64;
            }
        }
        Ok(hasher.finalize().into_vec())
    }

    fn digest_spans(&self, data: &[u8], range: &ByteRange) -> Vec<u8> {
        let mut hasher = self.algorithm.hasher();
        for (start, end) in [range.first_span(), range.second_span()] {
            hasher.update(&data[start as usize..end as usize]);
        }
        hasher.finalize().into_vec()
    }
}

/// Find the `/Contents` hex string that follows the last `/ByteRange` key.
pub fn locate_placeholder(data: &[u8]) -> Result<PlaceholderRange> {
    let key_pos = rfind(data, b"/ByteRange")
        .ok_or_else(|| Error::InvalidByteRange("no /ByteRange entry found".to_string()))?;
    let contents_start = find_contents_offset(data, key_pos)
        .ok_or_else(|| Error::InvalidByteRange("no /Contents placeholder after /ByteRange".to_string()))?;
    let close = data[contents_start..]
        .iter()
        .position(|&b| b == b'>')
        .ok_or_else(|| Error::InvalidByteRange("unterminated /Contents string".to_string()))?;

    Ok(PlaceholderRange {
        contents_start,
        contents_end: contents_start + close + 1,
    })
}

/// Find the /Contents value position in a signature dictionary.
///
/// This searches for the pattern `/Contents <` and returns the offset
/// of the opening angle bracket.
pub fn find_contents_offset(pdf_data: &[u8], search_start: usize) -> Option<usize> {
    let search_end = (search_start + CONTENTS_SEARCH_WINDOW).min(pdf_data.len());
    let window = pdf_data.get(search_start..search_end)?;
    let pattern = b"/Contents";

    let mut pos = 0;
    while pos + pattern.len() < window.len() {
        if window[pos..].starts_with(pattern) {
            let after = pos + pattern.len();
            for (i, &byte) in window.iter().enumerate().skip(after) {
                if byte == b'<' {
                    return Some(search_start + i);
                }
                if !matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
                    break;
                }
            }
        }
        pos += 1;
    }
    None
}

/// Write `container` into the placeholder as upper-case hex, padding the
/// rest with `0`. The placeholder never changes size.
pub fn insert_signature(pdf_data: &mut [u8], placeholder: &PlaceholderRange, container: &[u8]) -> Result<()> {
    let capacity = placeholder.capacity();
    if container.len() > capacity {
        return Err(Error::ContainerTooLarge {
            actual: container.len(),
            capacity,
        });
    }
    if placeholder.contents_end > pdf_data.len() {
        return Err(Error::InvalidByteRange(
            "signature insertion would exceed file bounds".to_string(),
        ));
    }

    let region = &mut pdf_data[placeholder.contents_start..placeholder.contents_end];
    region[0] = b'<';
    let hex = crate::writer::hex_upper(container);
    let digits = &mut region[1..placeholder.len() - 1];
    digits[..hex.len()].copy_from_slice(hex.as_bytes());
    digits[hex.len()..].fill(b'0');
    region[placeholder.len() - 1] = b'>';
    Ok(())
}

fn check_placeholder(data: &[u8], placeholder: &PlaceholderRange) -> Result<()> {
    let region = data
        .get(placeholder.contents_start..placeholder.contents_end)
        .ok_or_else(|| Error::InvalidByteRange("placeholder lies outside the document".to_string()))?;
    if region.len() < 2 || region[0] != b'<' || region[region.len() - 1] != b'>' {
        return Err(Error::InvalidByteRange("placeholder is not a hex string".to_string()));
    }
    if region[1..region.len() - 1].iter().any(|&b| b != b'0') {
        return Err(Error::InvalidByteRange("placeholder is not zero filled".to_string()));
    }
    Ok(())
}

/// Parse the `/ByteRange [...]` array written before `contents_start`.
fn declared_byte_range(data: &[u8], contents_start: usize) -> Result<ByteRange> {
    let window_start = contents_start.saturating_sub(CONTENTS_SEARCH_WINDOW);
    let key_pos = rfind(&data[window_start..contents_start], b"/ByteRange")
        .map(|p| window_start + p)
        .ok_or_else(|| Error::InvalidByteRange("no /ByteRange in front of the placeholder".to_string()))?;
    let open = data[key_pos..contents_start]
        .iter()
        .position(|&b| b == b'[')
        .map(|p| key_pos + p)
        .ok_or_else(|| Error::InvalidByteRange("/ByteRange is not an array".to_string()))?;

    let (_, obj) = crate::parser::parse_object(&data[open..contents_start]).map_err(|_| {
        Error::InvalidByteRange("unreadable /ByteRange array".to_string())
    })?;
    ByteRange::from_pdf_array(&obj)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| haystack[i..].starts_with(needle))
}
