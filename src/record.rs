//! Sequence records and header attribute handling.
//!
//! Headers may carry attributes of the form `key=value` separated by `;`
//! anywhere in the label, most importantly the abundance annotation
//! `size=N`. This module parses, strips and rewrites those attributes and
//! defines the owned record type produced by the readers.

use crate::error::MetamerError;

/// A sequence record as loaded from FASTA or FASTQ input.
///
/// The header stops at the first whitespace unless label truncation was
/// disabled at read time. Quality scores are present for FASTQ input only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqRecord {
    pub header: String,
    pub seq: Vec<u8>,
    pub qual: Option<Vec<u8>>,
    pub abundance: u64,
}

impl SeqRecord {
    /// Length of the sequence in nucleotides.
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    /// True when the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
}

/// Locates the first occurrence of the pattern `(^|;)attr<digits>(;|$)` in
/// `header`, returning the byte range covering `attr` and its digits.
///
/// `attr` must include the trailing `=` (e.g. `"size="`). When
/// `allow_decimal` is true a dot is allowed within the digits (used by the
/// `ee=` annotation).
pub fn find_attribute(header: &str, attr: &str, allow_decimal: bool) -> Option<(usize, usize)> {
    let bytes = header.as_bytes();
    let alen = attr.len();
    let mut i = 0;

    while i + alen <= bytes.len() {
        let Some(found) = header[i..].find(attr) else {
            return None;
        };
        let start = i + found;

        // must sit at the start of the header or right after a ';'
        if start > 0 && bytes[start - 1] != b';' {
            i = start + alen + 1;
            continue;
        }

        let digits = header[start + alen..]
            .bytes()
            .take_while(|c| c.is_ascii_digit() || (allow_decimal && *c == b'.'))
            .count();
        if digits == 0 {
            i = start + alen + 1;
            continue;
        }

        let end = start + alen + digits;
        if end < bytes.len() && bytes[end] != b';' {
            i = end + 2;
            continue;
        }

        return Some((start, end));
    }
    None
}

/// Reads the abundance annotation from a header.
///
/// Returns 1 when no `size=` attribute is present. A zero-valued (or
/// unparseable, i.e. overflowing) annotation is fatal.
pub fn abundance(header: &str) -> Result<u64, MetamerError> {
    match find_attribute(header, "size=", false) {
        None => Ok(1),
        Some((start, end)) => {
            let number: u64 =
                header[start + 5..end]
                    .parse()
                    .map_err(|_| MetamerError::InvalidAbundance {
                        header: header.to_string(),
                    })?;
            if number == 0 {
                return Err(MetamerError::InvalidAbundance {
                    header: header.to_string(),
                });
            }
            Ok(number)
        }
    }
}

/// Removes the first `size=N` attribute from a header, collapsing the
/// separator it leaves behind.
pub fn strip_size(header: &str) -> String {
    let Some((start, end)) = find_attribute(header, "size=", false) else {
        return header.to_string();
    };

    let before = &header[..start];
    let after = &header[end..];

    let before = before.strip_suffix(';').unwrap_or(before);
    let mut out = String::with_capacity(before.len() + after.len());
    out.push_str(before);
    if !before.is_empty() && !after.is_empty() && !after.starts_with(';') {
        out.push(';');
    }
    out.push_str(after.strip_prefix(';').filter(|_| before.is_empty()).unwrap_or(after));
    out
}

/// Rewrites a header with a fresh abundance annotation.
///
/// Any existing `size=` attribute is removed first, then `;size=N;` is
/// appended, with exactly one `;` between the label and the annotation.
pub fn header_with_size(header: &str, size: u64) -> String {
    let stripped = strip_size(header);
    if stripped.is_empty() {
        format!("size={size};")
    } else if stripped.ends_with(';') {
        format!("{stripped}size={size};")
    } else {
        format!("{stripped};size={size};")
    }
}

/// Appends an expected-error annotation `;ee=X;` to a header.
pub fn header_with_ee(header: &str, ee: f64) -> String {
    if header.is_empty() {
        format!("ee={ee:.4};")
    } else if header.ends_with(';') {
        format!("{header}ee={ee:.4};")
    } else {
        format!("{header};ee={ee:.4};")
    }
}
