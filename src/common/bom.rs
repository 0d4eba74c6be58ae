//! Byte Order Mark (BOM) detection over a partially filled raw buffer.
//!
//! The decoding input stage owns its raw read buffer and may hold fewer than
//! four bytes when detection runs, so detection is incremental: it can report
//! that more bytes are required before a verdict is possible.

use crate::common::charset::Charset;

/// UTF-8 BOM bytes.
pub const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
/// UTF-16 little-endian BOM bytes.
pub const UTF16_LE_BOM: [u8; 2] = [0xFF, 0xFE];
/// UTF-16 big-endian BOM bytes.
pub const UTF16_BE_BOM: [u8; 2] = [0xFE, 0xFF];
/// UTF-32 little-endian BOM bytes.
pub const UTF32_LE_BOM: [u8; 4] = [0xFF, 0xFE, 0x00, 0x00];
/// UTF-32 big-endian BOM bytes.
pub const UTF32_BE_BOM: [u8; 4] = [0x00, 0x00, 0xFE, 0xFF];

/// Supported BOM signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BomKind {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
}

impl BomKind {
    /// Returns the byte representation of the BOM.
    #[inline]
    pub const fn as_bytes(&self) -> &'static [u8] {
        match self {
            BomKind::Utf8 => &UTF8_BOM,
            BomKind::Utf16Le => &UTF16_LE_BOM,
            BomKind::Utf16Be => &UTF16_BE_BOM,
            BomKind::Utf32Le => &UTF32_LE_BOM,
            BomKind::Utf32Be => &UTF32_BE_BOM,
        }
    }

    /// Returns the length in bytes of the BOM.
    #[inline]
    #[allow(clippy::len_without_is_empty)] // A BOM is never empty
    pub const fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns the charset this BOM selects, when the encoding collaborator
    /// supports it. UTF-32 is recognized but has no `encoding_rs` decoder.
    pub fn charset(&self) -> Option<Charset> {
        match self {
            BomKind::Utf8 => Some(Charset::utf8()),
            BomKind::Utf16Le => Some(Charset::utf16le()),
            BomKind::Utf16Be => Some(Charset::utf16be()),
            BomKind::Utf32Le | BomKind::Utf32Be => None,
        }
    }
}

/// Outcome of inspecting the head of the raw buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BomDetection {
    /// A BOM signature matched.
    Found(BomKind),
    /// The available bytes rule out every signature.
    Absent,
    /// Not enough bytes yet to decide; refill and retry.
    NeedMore,
}

/// Inspects the first bytes of a stream for a BOM signature.
///
/// `complete` marks that no further bytes will arrive (end of input), which
/// allows a verdict on fewer than four bytes. UTF-32 signatures are checked
/// before UTF-16 because `FF FE 00 00` would otherwise match UTF-16 LE.
pub fn detect(buf: &[u8], complete: bool) -> BomDetection {
    if buf.len() < 4 && !complete {
        return BomDetection::NeedMore;
    }

    if buf.len() >= 4 {
        if buf[..4] == UTF32_BE_BOM {
            return BomDetection::Found(BomKind::Utf32Be);
        }
        if buf[..4] == UTF32_LE_BOM {
            return BomDetection::Found(BomKind::Utf32Le);
        }
    }

    if buf.len() >= 3 && buf[..3] == UTF8_BOM {
        return BomDetection::Found(BomKind::Utf8);
    }

    if buf.len() >= 2 {
        if buf[..2] == UTF16_BE_BOM {
            return BomDetection::Found(BomKind::Utf16Be);
        }
        if buf[..2] == UTF16_LE_BOM {
            return BomDetection::Found(BomKind::Utf16Le);
        }
    }

    BomDetection::Absent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_utf8_bom() {
        let buf = [0xEF, 0xBB, 0xBF, b'a'];
        assert_eq!(detect(&buf, false), BomDetection::Found(BomKind::Utf8));
    }

    #[test]
    fn utf32_checked_before_utf16() {
        let buf = [0xFF, 0xFE, 0x00, 0x00];
        assert_eq!(detect(&buf, false), BomDetection::Found(BomKind::Utf32Le));
    }

    #[test]
    fn utf16_le_on_two_bytes_at_end_of_input() {
        let buf = [0xFF, 0xFE];
        assert_eq!(detect(&buf, true), BomDetection::Found(BomKind::Utf16Le));
    }

    #[test]
    fn short_buffer_asks_for_more() {
        let buf = [0xFF, 0xFE];
        assert_eq!(detect(&buf, false), BomDetection::NeedMore);
    }

    #[test]
    fn plain_ascii_has_no_bom() {
        assert_eq!(detect(b"hello", false), BomDetection::Absent);
        assert_eq!(detect(b"h", true), BomDetection::Absent);
    }

    #[test]
    fn utf32_signature_has_no_charset() {
        assert!(BomKind::Utf32Le.charset().is_none());
        assert_eq!(BomKind::Utf8.charset().unwrap(), Charset::utf8());
    }
}
