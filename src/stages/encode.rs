//! Char-encoding output stage.
//!
//! [`ConverterEncodingOutput`] turns a UTF-16 stream into bytes. Small
//! writes are concatenated in a line buffer so one encode call covers many
//! of them; a write larger than the batching threshold bypasses the buffer.
//! Characters the fallback policy deems unsafe for the active charset are
//! substituted before they reach the encoder; anything unmappable that
//! survives classification is replaced by the encoder with a numeric
//! character reference. Stateful line-mode encodings are finalized at every
//! newline so shift state never spans a broken line.

use crate::common::{Charset, Error, Result};
use crate::contracts::{ConverterOutput, PullBuffer, Restartable, RestartSink, Reusable};
use crate::fallback::{FallbackPolicy, SubstituteBuffer};
use encoding_rs::Encoder;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// Capacity of the line buffer, in UTF-16 units.
const LINE_BUFFER: usize = 4096;
/// Writes at least this large skip the line buffer on the fast path.
const DIRECT_WRITE_THRESHOLD: usize = 1024;
/// Size of the byte scratch the encoder fills per call.
const ENCODE_SCRATCH: usize = 4096;

const LINE_FEED: u16 = b'\n' as u16;

/// Configuration for an encoding output stage.
#[derive(Debug, Clone)]
pub struct EncodingOptions {
    /// Target charset.
    pub charset: Charset,
    /// Write the charset's preamble (BOM) ahead of the first encoded byte.
    pub emit_preamble: bool,
}

impl Default for EncodingOptions {
    fn default() -> Self {
        Self { charset: Charset::utf8(), emit_preamble: false }
    }
}

enum ByteOutput {
    /// Push-style sink; restart is impossible.
    Writer(Box<dyn Write>),
    /// Seekable sink eligible for restart.
    Sink(Box<dyn RestartSink>),
    /// Pull-mode cache drained by an adapter; its limit is the
    /// backpressure bound.
    Pulled(Rc<RefCell<PullBuffer<u8>>>),
}

#[derive(Clone, Copy)]
enum OutputRestart {
    Disabled,
    /// Restart rewinds the sink to this offset.
    Armed { origin: u64 },
}

pub struct ConverterEncodingOutput {
    dest: ByteOutput,
    charset: Charset,
    encoder: Encoder,
    complete_unicode: bool,
    line_mode: bool,
    line: Vec<u16>,
    scratch: Vec<u8>,
    emit_preamble: bool,
    preamble_pending: bool,
    restart: OutputRestart,
}

impl ConverterEncodingOutput {
    /// Stage over a push-style byte sink.
    pub fn new(dest: Box<dyn Write>, options: EncodingOptions) -> Self {
        Self::build(ByteOutput::Writer(dest), options, OutputRestart::Disabled)
    }

    /// Stage over a seekable sink. Restart is armed only when the sink is
    /// currently positioned at its own end, so nothing but this conversion
    /// has to be un-written on a rewind; otherwise restart stays refused.
    pub fn restartable(mut dest: Box<dyn RestartSink>, options: EncodingOptions) -> Result<Self> {
        let position = dest.stream_position()?;
        let length = dest.stream_length()?;
        let restart = if position == length {
            OutputRestart::Armed { origin: position }
        } else {
            OutputRestart::Disabled
        };
        Ok(Self::build(ByteOutput::Sink(dest), options, restart))
    }

    /// Stage committing into a pull-mode cache drained by an adapter.
    pub fn pulled(dest: Rc<RefCell<PullBuffer<u8>>>, options: EncodingOptions) -> Self {
        Self::build(ByteOutput::Pulled(dest), options, OutputRestart::Disabled)
    }

    fn build(dest: ByteOutput, options: EncodingOptions, restart: OutputRestart) -> Self {
        Self {
            dest,
            charset: options.charset,
            encoder: options.charset.new_encoder(),
            complete_unicode: options.charset.is_complete_unicode(),
            line_mode: options.charset.is_line_mode(),
            line: Vec::with_capacity(LINE_BUFFER),
            scratch: vec![0; ENCODE_SCRATCH],
            emit_preamble: options.emit_preamble,
            preamble_pending: options.emit_preamble,
            restart,
        }
    }

    /// The charset currently driving the encoder.
    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Encodes and dispatches everything buffered in the line buffer.
    fn flush_line(&mut self) -> Result<()> {
        if self.preamble_pending {
            self.preamble_pending = false;
            let preamble = self.charset.preamble();
            if !preamble.is_empty() {
                dispatch(&mut self.dest, preamble)?;
            }
        }
        if self.line.is_empty() {
            return Ok(());
        }
        let mut consumed = 0;
        while consumed < self.line.len() {
            let (_, read, written, _) =
                self.encoder
                    .encode_from_utf16(&self.line[consumed..], &mut self.scratch, false);
            consumed += read;
            dispatch(&mut self.dest, &self.scratch[..written])?;
        }
        self.line.clear();
        Ok(())
    }

    /// Encodes a slice directly, bypassing the line buffer.
    fn encode_direct(&mut self, chars: &[u16]) -> Result<()> {
        self.flush_line()?;
        let mut consumed = 0;
        while consumed < chars.len() {
            let (_, read, written, _) =
                self.encoder.encode_from_utf16(&chars[consumed..], &mut self.scratch, false);
            consumed += read;
            dispatch(&mut self.dest, &self.scratch[..written])?;
        }
        Ok(())
    }

    /// Finishes the active encoder (emitting any closing shift sequence)
    /// and replaces it, since a finished encoder cannot be reused.
    fn finish_encoder(&mut self) -> Result<()> {
        loop {
            let (result, _, written, _) =
                self.encoder.encode_from_utf16(&[], &mut self.scratch, true);
            dispatch(&mut self.dest, &self.scratch[..written])?;
            if result == encoding_rs::CoderResult::InputEmpty {
                break;
            }
        }
        self.encoder = self.charset.new_encoder();
        Ok(())
    }

    fn push_unit(&mut self, unit: u16) -> Result<()> {
        if self.line.len() >= LINE_BUFFER {
            self.flush_line()?;
        }
        self.line.push(unit);
        if self.line_mode && unit == LINE_FEED {
            // Re-synchronize the shift state at the line boundary.
            self.flush_line()?;
            self.finish_encoder()?;
        }
        Ok(())
    }

    fn write_escaped(&mut self, chars: &[u16], fallback: &dyn FallbackPolicy) -> Result<()> {
        let treat_non_ascii =
            !self.complete_unicode && fallback.treat_non_ascii_as_unsafe(self.charset.name());
        let check_high = fallback.has_unsafe_unicode();

        for &unit in chars {
            let is_unsafe = if unit < 0x80 {
                fallback.is_unsafe_ascii(unit as u8)
            } else {
                treat_non_ascii || (check_high && fallback.is_unsafe_unicode(unit))
            };
            if !is_unsafe {
                self.push_unit(unit)?;
                continue;
            }
            let mut sink = SubstituteBuffer::new(&mut self.line, LINE_BUFFER);
            if fallback.fall_back(unit, &mut sink) {
                continue;
            }
            // Not enough room; flush and retry once with an empty buffer.
            self.flush_line()?;
            let mut sink = SubstituteBuffer::new(&mut self.line, LINE_BUFFER);
            if !fallback.fall_back(unit, &mut sink) {
                return Err(Error::InconsistentState(
                    "fallback substitute exceeds the line buffer",
                ));
            }
        }
        Ok(())
    }
}

fn dispatch(dest: &mut ByteOutput, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    match dest {
        ByteOutput::Writer(writer) => writer.write_all(bytes)?,
        ByteOutput::Sink(sink) => sink.write_all(bytes)?,
        ByteOutput::Pulled(cell) => cell.borrow_mut().commit_from(bytes),
    }
    Ok(())
}

impl ConverterOutput for ConverterEncodingOutput {
    fn write(&mut self, chars: &[u16], fallback: Option<&dyn FallbackPolicy>) -> Result<()> {
        match fallback {
            // Fast path: nothing can be unsafe, copy verbatim.
            None if !self.line_mode => {
                if chars.len() >= DIRECT_WRITE_THRESHOLD {
                    return self.encode_direct(chars);
                }
                if self.line.len() + chars.len() > LINE_BUFFER {
                    self.flush_line()?;
                }
                self.line.extend_from_slice(chars);
                Ok(())
            }
            None => {
                // Line-mode still needs the per-unit newline scan.
                for &unit in chars {
                    self.push_unit(unit)?;
                }
                Ok(())
            }
            Some(policy) => self.write_escaped(chars, policy),
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_line()?;
        self.finish_encoder()?;
        match &mut self.dest {
            ByteOutput::Writer(writer) => writer.flush()?,
            ByteOutput::Sink(sink) => sink.flush()?,
            ByteOutput::Pulled(_) => {}
        }
        Ok(())
    }

    fn can_accept_more(&self) -> bool {
        match &self.dest {
            ByteOutput::Pulled(cell) => cell.borrow().has_room(),
            _ => true,
        }
    }

    /// Pending characters are flushed and the encoder finalized under the
    /// old charset before the switch.
    fn change_charset(&mut self, charset: Charset) -> Result<()> {
        if charset == self.charset {
            return Ok(());
        }
        self.flush_line()?;
        self.finish_encoder()?;
        self.charset = charset;
        self.encoder = charset.new_encoder();
        self.complete_unicode = charset.is_complete_unicode();
        self.line_mode = charset.is_line_mode();
        Ok(())
    }
}

impl Restartable for ConverterEncodingOutput {
    fn can_restart(&self) -> bool {
        matches!(self.restart, OutputRestart::Armed { .. })
    }

    fn restart(&mut self) -> Result<()> {
        let OutputRestart::Armed { origin } = self.restart else {
            return Err(Error::InconsistentState("restart on a non-restartable output"));
        };
        let ByteOutput::Sink(sink) = &mut self.dest else {
            return Err(Error::InconsistentState("restart on a non-restartable output"));
        };
        sink.truncate_to(origin)?;
        self.line.clear();
        self.encoder = self.charset.new_encoder();
        self.preamble_pending = self.emit_preamble;
        Ok(())
    }

    fn disable_restart(&mut self) {
        self.restart = OutputRestart::Disabled;
    }
}

impl Reusable for ConverterEncodingOutput {
    fn reinitialize(&mut self) {
        self.line.clear();
        self.encoder = self.charset.new_encoder();
        self.preamble_pending = self.emit_preamble;
        if let ByteOutput::Pulled(cell) = &self.dest {
            cell.borrow_mut().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::AsciiFallback;

    fn shared_vec() -> (Box<dyn Write>, Rc<RefCell<Vec<u8>>>) {
        struct VecWriter(Rc<RefCell<Vec<u8>>>);
        impl Write for VecWriter {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let cell = Rc::new(RefCell::new(Vec::new()));
        (Box::new(VecWriter(Rc::clone(&cell))), cell)
    }

    fn write_all_str(out: &mut ConverterEncodingOutput, text: &str) {
        let units: Vec<u16> = text.encode_utf16().collect();
        out.write(&units, None).unwrap();
    }

    #[test]
    fn batches_small_writes_through_the_line_buffer() {
        let (writer, bytes) = shared_vec();
        let mut out = ConverterEncodingOutput::new(writer, EncodingOptions::default());
        for word in ["many", " ", "small", " ", "writes"] {
            write_all_str(&mut out, word);
        }
        // Nothing dispatched until flush.
        assert!(bytes.borrow().is_empty());
        out.flush().unwrap();
        assert_eq!(&*bytes.borrow(), "many small writes".as_bytes());
    }

    #[test]
    fn large_write_bypasses_the_line_buffer() {
        let (writer, bytes) = shared_vec();
        let mut out = ConverterEncodingOutput::new(writer, EncodingOptions::default());
        let big = "x".repeat(DIRECT_WRITE_THRESHOLD + 1);
        write_all_str(&mut out, &big);
        assert_eq!(bytes.borrow().len(), big.len());
    }

    #[test]
    fn euro_substituted_under_ascii_fallback() {
        let (writer, bytes) = shared_vec();
        let options = EncodingOptions { charset: Charset::windows_1252(), ..Default::default() };
        let mut out = ConverterEncodingOutput::new(writer, options);
        let policy = AsciiFallback::new(Charset::windows_1252());
        let units: Vec<u16> = "pay \u{20AC}5".encode_utf16().collect();
        out.write(&units, Some(&policy)).unwrap();
        out.flush().unwrap();
        assert_eq!(&*bytes.borrow(), b"pay EUR5");
    }

    #[test]
    fn fallback_inert_for_complete_unicode_target() {
        let (writer, bytes) = shared_vec();
        let mut out = ConverterEncodingOutput::new(writer, EncodingOptions::default());
        let policy = AsciiFallback::new(Charset::utf8());
        let units: Vec<u16> = "\u{20AC}".encode_utf16().collect();
        out.write(&units, Some(&policy)).unwrap();
        out.flush().unwrap();
        assert_eq!(&*bytes.borrow(), "\u{20AC}".as_bytes());
    }

    #[test]
    fn unmappable_without_policy_becomes_numeric_reference() {
        let (writer, bytes) = shared_vec();
        let options = EncodingOptions { charset: Charset::windows_1252(), ..Default::default() };
        let mut out = ConverterEncodingOutput::new(writer, options);
        write_all_str(&mut out, "中");
        out.flush().unwrap();
        assert_eq!(&*bytes.borrow(), b"&#20013;");
    }

    #[test]
    fn line_mode_resets_shift_state_at_newlines() {
        let (writer, bytes) = shared_vec();
        let options = EncodingOptions { charset: Charset::iso_2022_jp(), ..Default::default() };
        let mut out = ConverterEncodingOutput::new(writer, options);
        write_all_str(&mut out, "日本\nライン\n");
        out.flush().unwrap();

        let bytes = bytes.borrow();
        // Each line closes back to ASCII before its line feed.
        let lines: Vec<&[u8]> = bytes.split(|&b| b == b'\n').collect();
        assert_eq!(lines.len(), 3);
        for line in &lines[..2] {
            assert!(line.ends_with(&[0x1B, 0x28, 0x42]), "unterminated shift state");
        }
        let (decoded, _) = encoding_rs::ISO_2022_JP.decode_without_bom_handling(&bytes);
        assert_eq!(decoded, "日本\nライン\n");
    }

    #[test]
    fn charset_change_flushes_under_old_charset_first() {
        let (writer, bytes) = shared_vec();
        let mut out = ConverterEncodingOutput::new(writer, EncodingOptions::default());
        write_all_str(&mut out, "Aé");
        out.change_charset(Charset::utf16le()).unwrap();
        write_all_str(&mut out, "B");
        out.flush().unwrap();
        assert_eq!(&*bytes.borrow(), &[b'A', 0xC3, 0xA9, b'B', 0x00][..]);
    }

    #[test]
    fn preamble_emitted_before_first_byte() {
        let (writer, bytes) = shared_vec();
        let options = EncodingOptions { emit_preamble: true, ..Default::default() };
        let mut out = ConverterEncodingOutput::new(writer, options);
        write_all_str(&mut out, "x");
        out.flush().unwrap();
        assert_eq!(&*bytes.borrow(), &[0xEF, 0xBB, 0xBF, b'x'][..]);
    }

    #[test]
    fn restart_truncates_back_to_origin() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        let mut file =
            std::fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
        file.write_all(b"kept;").unwrap();

        let mut out = ConverterEncodingOutput::restartable(
            Box::new(file),
            EncodingOptions::default(),
        )
        .unwrap();
        assert!(out.can_restart());
        write_all_str(&mut out, "wrong charset output");
        out.flush().unwrap();
        out.restart().unwrap();
        write_all_str(&mut out, "right");
        out.flush().unwrap();
        drop(out);

        // Pre-existing prefix intact, wrong output gone.
        assert_eq!(std::fs::read(&path).unwrap(), b"kept;right");
    }

    #[test]
    fn restart_refused_when_sink_not_at_its_end() {
        let mut cursor = std::io::Cursor::new(b"existing".to_vec());
        cursor.set_position(0); // someone else still mid-stream
        let out = ConverterEncodingOutput::restartable(
            Box::new(cursor),
            EncodingOptions::default(),
        )
        .unwrap();
        assert!(!out.can_restart());
    }

    #[test]
    fn pulled_output_reports_backpressure() {
        let cell = PullBuffer::<u8>::shared(8);
        let mut out = ConverterEncodingOutput::pulled(cell.clone(), EncodingOptions::default());
        assert!(out.can_accept_more());
        let big = "y".repeat(DIRECT_WRITE_THRESHOLD + 1);
        write_all_str(&mut out, &big);
        assert!(!out.can_accept_more());
        let mut drained = vec![0u8; big.len()];
        assert_eq!(cell.borrow_mut().drain(&mut drained), big.len());
        assert!(out.can_accept_more());
    }
}
