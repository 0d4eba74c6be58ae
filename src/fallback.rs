//! Character fallback: deciding which characters are unsafe for the active
//! charset and substituting them.
//!
//! The policy is a data-only classifier plus a bounded substitution writer,
//! so the encoding stages stay free of any dependency on the char-writer
//! internals that configure it. The built-in [`AsciiFallback`] performs
//! best-effort ASCII transliteration from a compile-time map; characters the
//! policy does not claim are left to the encoder, which substitutes numeric
//! character references for anything unmappable.

use phf::phf_map;

/// Classifier and substitution writer consulted by the output stages.
pub trait FallbackPolicy {
    /// Bitmask over the 128 ASCII code points; a set bit marks a byte that
    /// must never reach the destination unescaped.
    fn ascii_unsafe_mask(&self) -> &[u32; 4];

    /// Whether any code point at or above U+0080 can be unsafe. When false
    /// the stages skip the per-character high-range test entirely.
    fn has_unsafe_unicode(&self) -> bool;

    /// Whether every non-ASCII character counts as unsafe under the named
    /// charset (the blanket rule for pure-ASCII output contexts).
    fn treat_non_ascii_as_unsafe(&self, charset_name: &str) -> bool;

    /// Per-unit test for the high range. Only consulted when
    /// [`FallbackPolicy::has_unsafe_unicode`] is true.
    fn is_unsafe_unicode(&self, unit: u16) -> bool;

    /// Writes a substitute sequence for `unit` into `out`. Returns false
    /// when the remaining room cannot hold the substitute; the stage will
    /// flush and retry once.
    fn fall_back(&self, unit: u16, out: &mut SubstituteBuffer<'_>) -> bool;

    /// ASCII test derived from the mask.
    fn is_unsafe_ascii(&self, byte: u8) -> bool {
        debug_assert!(byte < 0x80);
        let mask = self.ascii_unsafe_mask();
        mask[(byte >> 5) as usize] & (1 << (byte & 0x1F)) != 0
    }
}

/// Bounded view over the tail of an output stage's line buffer. Substitution
/// must fit the remaining capacity or report failure without side effects
/// the caller cannot roll back.
pub struct SubstituteBuffer<'a> {
    buffer: &'a mut Vec<u16>,
    limit: usize,
    mark: usize,
}

impl<'a> SubstituteBuffer<'a> {
    pub(crate) fn new(buffer: &'a mut Vec<u16>, limit: usize) -> Self {
        let mark = buffer.len();
        Self { buffer, limit, mark }
    }

    /// Appends one UTF-16 unit; false when the buffer is at capacity.
    pub fn push_unit(&mut self, unit: u16) -> bool {
        if self.buffer.len() >= self.limit {
            return false;
        }
        self.buffer.push(unit);
        true
    }

    /// Appends a string; false (and rolls back) when it does not fit.
    pub fn push_str(&mut self, text: &str) -> bool {
        for unit in text.encode_utf16() {
            if !self.push_unit(unit) {
                self.rollback();
                return false;
            }
        }
        true
    }

    /// Discards everything appended through this view.
    pub fn rollback(&mut self) {
        self.buffer.truncate(self.mark);
    }

    /// Units appended so far through this view.
    pub fn written(&self) -> usize {
        self.buffer.len() - self.mark
    }
}

/// Best-effort ASCII transliterations for characters common in word
/// processors and web content. Anything absent from this map falls back to
/// `?` when the policy claims it, or to a numeric character reference when
/// the encoder meets it unclaimed.
static ASCII_SUBSTITUTES: phf::Map<u16, &'static str> = phf_map! {
    0x00A0u16 => " ",   // no-break space
    0x00A9u16 => "(c)", // copyright
    0x00ABu16 => "<<",  // left guillemet
    0x00ADu16 => "",    // soft hyphen
    0x00AEu16 => "(r)", // registered
    0x00B7u16 => "*",   // middle dot
    0x00BBu16 => ">>",  // right guillemet
    0x00BCu16 => "1/4",
    0x00BDu16 => "1/2",
    0x00BEu16 => "3/4",
    0x00D7u16 => "x",   // multiplication sign
    0x00F7u16 => "/",   // division sign
    0x2010u16 => "-",   // hyphen
    0x2011u16 => "-",   // non-breaking hyphen
    0x2013u16 => "-",   // en dash
    0x2014u16 => "--",  // em dash
    0x2018u16 => "'",   // left single quote
    0x2019u16 => "'",   // right single quote
    0x201Au16 => ",",   // single low quote
    0x201Cu16 => "\"",  // left double quote
    0x201Du16 => "\"",  // right double quote
    0x201Eu16 => ",,",  // double low quote
    0x2022u16 => "*",   // bullet
    0x2026u16 => "...", // ellipsis
    0x2032u16 => "'",   // prime
    0x2033u16 => "\"",  // double prime
    0x20ACu16 => "EUR", // euro sign
    0x2122u16 => "(tm)", // trade mark
    0x2212u16 => "-",   // minus sign
};

const CLEAR_MASK: [u32; 4] = [0; 4];

/// Fallback that transliterates the high range to plain ASCII. Built for a
/// target charset: under a complete-Unicode charset nothing is unsafe and
/// the policy is inert; under anything else the whole high range is claimed.
pub struct AsciiFallback {
    substitute_high_range: bool,
}

impl AsciiFallback {
    pub fn new(target: crate::common::Charset) -> Self {
        Self { substitute_high_range: !target.is_complete_unicode() }
    }

    /// Policy that claims the high range unconditionally.
    pub fn ascii_only() -> Self {
        Self { substitute_high_range: true }
    }
}

impl FallbackPolicy for AsciiFallback {
    fn ascii_unsafe_mask(&self) -> &[u32; 4] {
        &CLEAR_MASK
    }

    fn has_unsafe_unicode(&self) -> bool {
        self.substitute_high_range
    }

    fn treat_non_ascii_as_unsafe(&self, _charset_name: &str) -> bool {
        self.substitute_high_range
    }

    fn is_unsafe_unicode(&self, unit: u16) -> bool {
        unit >= 0x80
    }

    fn fall_back(&self, unit: u16, out: &mut SubstituteBuffer<'_>) -> bool {
        match ASCII_SUBSTITUTES.get(&unit) {
            Some(replacement) => out.push_str(replacement),
            // Surrogate halves and unmapped symbols degrade to '?'
            None => out.push_unit(b'?' as u16),
        }
    }
}
