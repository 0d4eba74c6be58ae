//! Charset identity for the conversion pipeline.
//!
//! A [`Charset`] couples an `encoding_rs` encoding with its Windows codepage
//! number, its preamble (BOM) bytes, and the two classifications the pipeline
//! cares about: whether the encoding covers all of Unicode (no character can
//! be unsafe for it) and whether it is a stateful "line-mode" encoding whose
//! shift state must be reset at line boundaries.

use crate::common::{Error, Result};
use encoding_rs::{Decoder, Encoder, Encoding};

/// An encoding identity as consumed by the pipeline stages.
#[derive(Clone, Copy)]
pub struct Charset {
    encoding: &'static Encoding,
    codepage: u32,
}

impl Charset {
    /// UTF-8 (codepage 65001).
    pub fn utf8() -> Self {
        Self { encoding: encoding_rs::UTF_8, codepage: 65001 }
    }

    /// UTF-16 little-endian (codepage 1200).
    pub fn utf16le() -> Self {
        Self { encoding: encoding_rs::UTF_16LE, codepage: 1200 }
    }

    /// UTF-16 big-endian (codepage 1201).
    pub fn utf16be() -> Self {
        Self { encoding: encoding_rs::UTF_16BE, codepage: 1201 }
    }

    /// Windows-1252, the most common default ANSI codepage.
    pub fn windows_1252() -> Self {
        Self { encoding: encoding_rs::WINDOWS_1252, codepage: 1252 }
    }

    /// ISO-2022-JP, the stateful line-mode encoding.
    pub fn iso_2022_jp() -> Self {
        Self { encoding: encoding_rs::ISO_2022_JP, codepage: 50220 }
    }

    /// Resolves a Windows codepage number to a charset.
    pub fn from_codepage(codepage: u32) -> Result<Self> {
        let encoding =
            codepage_to_encoding(codepage).ok_or(Error::UnsupportedCodepage(codepage))?;
        Ok(Self { encoding, codepage })
    }

    /// Wraps an encoding directly, deriving the codepage from its name.
    pub fn from_encoding(encoding: &'static Encoding) -> Self {
        Self { encoding, codepage: encoding_to_codepage(encoding) }
    }

    /// The underlying encoding object.
    #[inline]
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// The Windows codepage identifier.
    #[inline]
    pub fn codepage(&self) -> u32 {
        self.codepage
    }

    /// The canonical encoding name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// The encoding's declared preamble (BOM) bytes; empty for encodings
    /// without one.
    pub fn preamble(&self) -> &'static [u8] {
        match self.codepage {
            65001 => &super::bom::UTF8_BOM,
            1200 => &super::bom::UTF16_LE_BOM,
            1201 => &super::bom::UTF16_BE_BOM,
            _ => &[],
        }
    }

    /// True when the encoding can represent every Unicode scalar, so no
    /// character can ever be unsafe for it.
    pub fn is_complete_unicode(&self) -> bool {
        matches!(self.codepage, 65001 | 1200 | 1201 | 54936)
    }

    /// True for stateful encodings that must re-synchronize their shift
    /// state at each line boundary.
    pub fn is_line_mode(&self) -> bool {
        self.encoding == encoding_rs::ISO_2022_JP
    }

    /// Fresh decoder. BOM handling stays with the decoding stage, which
    /// skips preambles itself.
    pub fn new_decoder(&self) -> Decoder {
        self.encoding.new_decoder_without_bom_handling()
    }

    /// Fresh encoder.
    pub fn new_encoder(&self) -> Encoder {
        self.encoding.new_encoder()
    }

    /// Worst-case number of UTF-16 units produced by decoding `bytes` input
    /// bytes. UTF-8 can expand by one unit over the byte count (replacement
    /// of a truncated sequence), the legacy multi-byte Chinese encodings by
    /// three; everything else stays within the byte count plus one.
    pub fn max_char_count(&self, bytes: usize) -> usize {
        match self.codepage {
            1200 | 1201 => bytes / 2 + 1,
            936 | 54936 | 950 => bytes + 3,
            _ => bytes + 1,
        }
    }

    /// Worst-case number of bytes produced by encoding `units` UTF-16 units,
    /// assuming no unmappable substitutions.
    pub fn max_byte_count(&self, units: usize) -> usize {
        match self.codepage {
            65001 => units * 3 + 3,
            1200 | 1201 => units * 2 + 2,
            // Shift sequences around every run in line-mode encodings
            50220 => units * 4 + 10,
            _ => units * 2 + 2,
        }
    }
}

impl PartialEq for Charset {
    fn eq(&self, other: &Self) -> bool {
        self.codepage == other.codepage
    }
}

impl Eq for Charset {}

impl std::fmt::Debug for Charset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Charset")
            .field("name", &self.name())
            .field("codepage", &self.codepage)
            .finish()
    }
}

/// Map Windows codepage identifier to encoding_rs Encoding.
///
/// Compiles to a jump table; the returned references are static, so no
/// allocation occurs. The full alias database lives outside this crate; this
/// table covers the codepages that show up in practice.
#[inline]
pub fn codepage_to_encoding(codepage: u32) -> Option<&'static Encoding> {
    match codepage {
        // Windows codepages (Western and Central European, Cyrillic, ...)
        874 => Some(encoding_rs::WINDOWS_874),   // Thai
        1250 => Some(encoding_rs::WINDOWS_1250), // Central European
        1251 => Some(encoding_rs::WINDOWS_1251), // Cyrillic
        1252 => Some(encoding_rs::WINDOWS_1252), // Western European (default ANSI)
        1253 => Some(encoding_rs::WINDOWS_1253), // Greek
        1254 => Some(encoding_rs::WINDOWS_1254), // Turkish
        1255 => Some(encoding_rs::WINDOWS_1255), // Hebrew
        1256 => Some(encoding_rs::WINDOWS_1256), // Arabic
        1257 => Some(encoding_rs::WINDOWS_1257), // Baltic
        1258 => Some(encoding_rs::WINDOWS_1258), // Vietnamese

        // East Asian codepages
        932 => Some(encoding_rs::SHIFT_JIS),  // Japanese Shift-JIS
        936 => Some(encoding_rs::GBK),        // Simplified Chinese
        949 => Some(encoding_rs::EUC_KR),     // Korean
        950 => Some(encoding_rs::BIG5),       // Traditional Chinese
        20932 => Some(encoding_rs::EUC_JP),   // Japanese EUC-JP
        50220 => Some(encoding_rs::ISO_2022_JP), // Japanese, stateful
        54936 => Some(encoding_rs::GB18030),  // Chinese GB18030

        // ISO 8859 series
        28591 => Some(encoding_rs::WINDOWS_1252), // ISO-8859-1 superset
        28592 => Some(encoding_rs::ISO_8859_2),   // Latin 2
        28595 => Some(encoding_rs::ISO_8859_5),   // Cyrillic
        28597 => Some(encoding_rs::ISO_8859_7),   // Greek
        28605 => Some(encoding_rs::ISO_8859_15),  // Latin 9 (with Euro)

        // KOI8 series
        20866 => Some(encoding_rs::KOI8_R), // Russian
        21866 => Some(encoding_rs::KOI8_U), // Ukrainian

        // Macintosh
        10000 => Some(encoding_rs::MACINTOSH),

        // Unicode
        1200 => Some(encoding_rs::UTF_16LE),
        1201 => Some(encoding_rs::UTF_16BE),
        65001 => Some(encoding_rs::UTF_8),

        _ => None,
    }
}

/// Reverse of [`codepage_to_encoding`] for the encodings this crate hands
/// out. Unknown encodings report codepage 0.
pub fn encoding_to_codepage(encoding: &'static Encoding) -> u32 {
    match encoding.name() {
        "UTF-8" => 65001,
        "UTF-16LE" => 1200,
        "UTF-16BE" => 1201,
        "windows-874" => 874,
        "windows-1250" => 1250,
        "windows-1251" => 1251,
        "windows-1252" => 1252,
        "windows-1253" => 1253,
        "windows-1254" => 1254,
        "windows-1255" => 1255,
        "windows-1256" => 1256,
        "windows-1257" => 1257,
        "windows-1258" => 1258,
        "Shift_JIS" => 932,
        "GBK" => 936,
        "EUC-KR" => 949,
        "Big5" => 950,
        "EUC-JP" => 20932,
        "ISO-2022-JP" => 50220,
        "gb18030" => 54936,
        "ISO-8859-2" => 28592,
        "ISO-8859-5" => 28595,
        "ISO-8859-7" => 28597,
        "ISO-8859-15" => 28605,
        "KOI8-R" => 20866,
        "KOI8-U" => 21866,
        "macintosh" => 10000,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_codepages() {
        assert_eq!(Charset::from_codepage(1252).unwrap().name(), "windows-1252");
        assert_eq!(Charset::from_codepage(932).unwrap().name(), "Shift_JIS");
        assert_eq!(Charset::from_codepage(936).unwrap().name(), "GBK");
        assert_eq!(Charset::from_codepage(65001).unwrap().name(), "UTF-8");
    }

    #[test]
    fn rejects_unknown_codepage() {
        assert!(matches!(
            Charset::from_codepage(99999),
            Err(Error::UnsupportedCodepage(99999))
        ));
    }

    #[test]
    fn preambles() {
        assert_eq!(Charset::utf8().preamble(), &[0xEF, 0xBB, 0xBF]);
        assert_eq!(Charset::utf16le().preamble(), &[0xFF, 0xFE]);
        assert!(Charset::windows_1252().preamble().is_empty());
    }

    #[test]
    fn classification_flags() {
        assert!(Charset::utf8().is_complete_unicode());
        assert!(Charset::utf16le().is_complete_unicode());
        assert!(!Charset::windows_1252().is_complete_unicode());
        assert!(Charset::iso_2022_jp().is_line_mode());
        assert!(!Charset::utf8().is_line_mode());
    }

    #[test]
    fn equality_is_by_codepage() {
        assert_eq!(Charset::utf8(), Charset::from_codepage(65001).unwrap());
        assert_ne!(Charset::utf8(), Charset::utf16le());
    }

    #[test]
    fn from_encoding_round_trips_codepage() {
        let cs = Charset::from_encoding(encoding_rs::SHIFT_JIS);
        assert_eq!(cs.codepage(), 932);
    }
}
