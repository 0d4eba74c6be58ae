//! Byte-decoding input stage.
//!
//! [`ConverterDecodingInput`] turns a byte source into a growable UTF-16
//! parse buffer. On first read it inspects the stream head for a byte-order
//! mark (when auto-detection is enabled) and skips the active charset's
//! preamble; afterwards it decodes incrementally, backing up every consumed
//! raw byte so a downstream consumer can change its mind about the charset
//! and have the stream re-decoded from the start.

use crate::cache::ByteCache;
use crate::common::bom::{self, BomDetection};
use crate::common::{Charset, Error, Result};
use crate::contracts::{
    ConverterInput, PushBuffer, Restartable, RestartConsumerHandle, ResultsFeedback, Reusable,
};
use crate::stages::buffer::ParseBuffer;
use encoding_rs::Decoder;
use std::cell::RefCell;
use std::io::{ErrorKind, Read};
use std::rc::Rc;

/// Size of the raw read buffer.
const RAW_BUFFER: usize = 4096;
/// Bytes to accumulate before decoding, once the stream head has passed.
const MIN_DECODE_BYTES: usize = 64;
/// Smaller threshold at the very start so BOMs on tiny inputs are seen.
const MIN_DECODE_BYTES_AT_START: usize = 4;

/// Configuration for a decoding input stage.
#[derive(Debug, Clone)]
pub struct DecodingOptions {
    /// Declared or default charset, replaced by a detected BOM.
    pub charset: Charset,
    /// Inspect the stream head for byte-order-mark signatures.
    pub detect_bom: bool,
    /// Ceiling on the parse buffer, and therefore on one token.
    pub max_token_size: usize,
    /// Initial parse buffer size.
    pub initial_buffer_size: usize,
    /// Raw bytes retained for restart; 0 disables restart entirely. Once
    /// the stream offset passes this bound the backup is discarded and
    /// restart is permanently off.
    pub restart_max: usize,
}

impl Default for DecodingOptions {
    fn default() -> Self {
        Self {
            charset: Charset::utf8(),
            detect_bom: true,
            max_token_size: 128 * 1024,
            initial_buffer_size: 1024,
            restart_max: 64 * 1024,
        }
    }
}

enum ByteInput {
    /// Pull-style blocking source. `WouldBlock` means "no data yet".
    Reader(Box<dyn Read>),
    /// Push-style chunks handed in by a pump adapter.
    Pushed(Rc<RefCell<PushBuffer<u8>>>),
}

/// Restart protocol state. The legal transitions are exactly:
/// `Tracking -> Replaying` (restart granted), `Tracking -> Disabled`
/// (window exceeded or explicitly waived), `Replaying -> Disabled`
/// (backup drained; a chain restarts at most once).
enum RestartState {
    Disabled,
    Tracking(ByteCache),
    Replaying(ByteCache),
}

enum PreambleState {
    /// Stream head not yet inspected.
    Checking,
    Done,
}

pub struct ConverterDecodingInput {
    source: ByteInput,
    charset: Charset,
    decoder: Decoder,
    detect_bom: bool,
    preamble: PreambleState,

    raw: Vec<u8>,
    raw_start: usize,
    raw_end: usize,
    /// Absolute stream offset of `raw_start`.
    raw_offset: u64,
    source_eof: bool,
    eof: bool,

    parse: ParseBuffer,

    restart: RestartState,
    restart_max: usize,
    consumer: Option<RestartConsumerHandle>,
    feedback: Option<Box<dyn ResultsFeedback>>,
}

impl ConverterDecodingInput {
    /// Stage over a pull-style byte source.
    pub fn new(source: Box<dyn Read>, options: DecodingOptions) -> Self {
        Self::build(ByteInput::Reader(source), options)
    }

    /// Stage over a push-style chunk cell fed by an adapter.
    pub fn pushed(source: Rc<RefCell<PushBuffer<u8>>>, options: DecodingOptions) -> Self {
        Self::build(ByteInput::Pushed(source), options)
    }

    fn build(source: ByteInput, options: DecodingOptions) -> Self {
        let restart = if options.restart_max > 0 {
            RestartState::Tracking(ByteCache::new())
        } else {
            RestartState::Disabled
        };
        Self {
            source,
            charset: options.charset,
            decoder: options.charset.new_decoder(),
            detect_bom: options.detect_bom,
            preamble: PreambleState::Checking,
            raw: vec![0; RAW_BUFFER],
            raw_start: 0,
            raw_end: 0,
            raw_offset: 0,
            source_eof: false,
            eof: false,
            parse: ParseBuffer::new(options.initial_buffer_size, options.max_token_size),
            restart,
            restart_max: options.restart_max,
            consumer: None,
            feedback: None,
        }
    }

    /// Registers the downstream consumer the restart protocol negotiates
    /// with. Without one, restart requests are refused.
    pub fn register_restart_consumer(&mut self, consumer: RestartConsumerHandle) {
        self.consumer = Some(consumer);
    }

    /// Registers a feedback receiver for the charset resolved from a BOM.
    pub fn register_feedback(&mut self, feedback: Box<dyn ResultsFeedback>) {
        self.feedback = Some(feedback);
    }

    /// The charset currently driving the decoder.
    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Requests a restart under `new_charset`.
    ///
    /// Same codepage: a no-op that waives restart capability (the consumer
    /// has confirmed the current charset). Otherwise the registered consumer
    /// is asked to discard delivered output, the raw stream is rewound to
    /// offset zero out of the backup cache, and decoding resumes under the
    /// new charset. Returns whether the restart was performed.
    pub fn restart_with_new_charset(&mut self, new_charset: Charset) -> Result<bool> {
        if new_charset.codepage() == self.charset.codepage() {
            self.disable_restart();
            return Ok(false);
        }
        if !self.can_restart() {
            return Ok(false);
        }
        let Some(consumer) = self.consumer.as_ref() else {
            return Ok(false);
        };
        if !consumer.borrow().can_restart() {
            return Ok(false);
        }
        consumer.borrow_mut().restart();
        self.restart_with_new_charset_internal(new_charset)?;
        Ok(true)
    }

    fn replaying(&self) -> bool {
        matches!(self.restart, RestartState::Replaying(_))
    }

    /// Refills the raw buffer from whichever source is active. Returns the
    /// number of new bytes.
    fn fill_raw(&mut self) -> Result<usize> {
        // Compact the consumed prefix before reading more.
        if self.raw_start > 0 && self.raw_end == self.raw.len() {
            self.raw.copy_within(self.raw_start..self.raw_end, 0);
            self.raw_end -= self.raw_start;
            self.raw_start = 0;
        }
        if self.raw_end == self.raw.len() {
            return Ok(0);
        }

        if let RestartState::Replaying(replay) = &mut self.restart {
            let n = replay.read(&mut self.raw[self.raw_end..]);
            self.raw_end += n;
            if replay.is_empty() {
                // Replay finished; no second restart.
                self.restart = RestartState::Disabled;
            }
            return Ok(n);
        }

        match &mut self.source {
            ByteInput::Reader(reader) => loop {
                match reader.read(&mut self.raw[self.raw_end..]) {
                    Ok(0) => {
                        self.source_eof = true;
                        return Ok(0);
                    }
                    Ok(n) => {
                        self.raw_end += n;
                        return Ok(n);
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    // Non-blocking chunk provider with nothing ready yet.
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(0),
                    Err(e) => return Err(e.into()),
                }
            },
            ByteInput::Pushed(cell) => {
                let mut pushed = cell.borrow_mut();
                let n = pushed.take_into(&mut self.raw[self.raw_end..]);
                self.raw_end += n;
                if pushed.finished() && pushed.is_empty() {
                    self.source_eof = true;
                }
                Ok(n)
            }
        }
    }

    /// True once the active raw source can produce nothing further.
    fn raw_exhausted(&self) -> bool {
        if self.replaying() {
            return false;
        }
        self.source_eof
    }

    fn raw_len(&self) -> usize {
        self.raw_end - self.raw_start
    }

    /// Inspects the stream head once: BOM signatures first (when enabled),
    /// then the active charset's declared preamble. Returns whether the
    /// charset changed.
    fn inspect_head(&mut self) -> bool {
        let head = &self.raw[self.raw_start..self.raw_end];
        let complete = self.raw_exhausted();

        if self.detect_bom {
            match bom::detect(head, complete) {
                BomDetection::NeedMore => return false,
                BomDetection::Found(kind) => {
                    self.preamble = PreambleState::Done;
                    self.detect_bom = false;
                    match kind.charset() {
                        Some(detected) => {
                            let changed = detected != self.charset;
                            if changed {
                                self.charset = detected;
                                self.decoder = detected.new_decoder();
                            }
                            if let Some(feedback) = self.feedback.as_mut() {
                                feedback.charset_detected(detected);
                            }
                            self.skip_raw(kind.len());
                            return changed;
                        }
                        // Signature recognized but the encoding collaborator
                        // cannot decode it; keep the default, consume nothing.
                        None => return false,
                    }
                }
                BomDetection::Absent => {
                    self.detect_bom = false;
                    // Fall through to the preamble check.
                }
            }
        }

        let preamble = self.charset.preamble();
        if preamble.is_empty() {
            self.preamble = PreambleState::Done;
            return false;
        }
        let head = &self.raw[self.raw_start..self.raw_end];
        if head.len() < preamble.len() && !complete {
            return false;
        }
        if head.starts_with(preamble) {
            self.skip_raw(preamble.len());
        }
        self.preamble = PreambleState::Done;
        false
    }

    /// Consumes `count` raw bytes without decoding them, keeping the backup
    /// and the absolute offset in step.
    fn skip_raw(&mut self, count: usize) {
        self.back_up(count);
        self.raw_start += count;
        self.raw_offset += count as u64;
    }

    /// Copies the next `count` raw bytes into the restart backup, or drops
    /// the backup once the window is exceeded.
    fn back_up(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        if let RestartState::Tracking(backup) = &mut self.restart {
            if self.raw_offset + count as u64 > self.restart_max as u64 {
                self.restart = RestartState::Disabled;
                if let Some(consumer) = self.consumer.as_ref() {
                    consumer.borrow_mut().disable_restart();
                }
            } else {
                backup.append(&self.raw[self.raw_start..self.raw_start + count]);
            }
        }
    }

    fn min_decode_bytes(&self) -> usize {
        if self.raw_offset == 0 {
            MIN_DECODE_BYTES_AT_START
        } else {
            MIN_DECODE_BYTES
        }
    }
}

impl ConverterInput for ConverterDecodingInput {
    fn read_more(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }

        let mut progress = false;
        let filled = self.fill_raw()?;
        progress |= filled > 0;

        if matches!(self.preamble, PreambleState::Checking) {
            progress |= self.inspect_head();
            if matches!(self.preamble, PreambleState::Checking) {
                // Still waiting for enough head bytes to decide.
                return Ok(progress);
            }
        }

        let last = self.raw_exhausted();

        if self.raw_len() < self.min_decode_bytes() && !last {
            return Ok(progress);
        }

        // Room for the worst-case expansion of a modest byte batch, capped
        // by what the token ceiling still allows; the next pass picks up
        // whatever does not fit. Only an unconsumed token that fills the
        // ceiling outright is too complex.
        let remaining = self.parse.max_token() - self.parse.len();
        if remaining == 0 {
            return Err(Error::TooComplex { max: self.parse.max_token() });
        }
        let wanted = self
            .charset
            .max_char_count(self.raw_len().min(RAW_BUFFER))
            .min(512)
            .min(remaining);
        self.parse.ensure_space(wanted)?;

        let (_, read, written, _) = {
            let src = &self.raw[self.raw_start..self.raw_end];
            self.decoder.decode_to_utf16(src, self.parse.writable(), last)
        };
        self.back_up(read);
        self.raw_start += read;
        self.raw_offset += read as u64;
        self.parse.committed(written);
        progress |= read > 0 || written > 0;

        if last && self.raw_len() == 0 {
            // The decoder flushed its tail state on the `last` call.
            self.eof = true;
            progress = true;
        }
        Ok(progress)
    }

    fn buffer(&self) -> &[u16] {
        self.parse.as_slice()
    }

    fn parse_start(&self) -> usize {
        self.parse.start()
    }

    fn parse_end(&self) -> usize {
        self.parse.end()
    }

    fn report_processed(&mut self, count: usize) {
        self.parse.consume(count);
    }

    fn remove_gap(&mut self, begin: usize, end: usize) {
        self.parse.remove_gap(begin, end);
    }

    fn end_of_file(&self) -> bool {
        self.eof && self.parse.len() == 0
    }

    fn max_token_size(&self) -> usize {
        self.parse.max_token()
    }
}

impl Restartable for ConverterDecodingInput {
    fn can_restart(&self) -> bool {
        matches!(self.restart, RestartState::Tracking(_)) && self.consumer.is_some()
    }

    fn restart(&mut self) -> Result<()> {
        debug_assert!(self.can_restart());
        let charset = self.charset;
        // Re-run under the same charset identity but from offset zero.
        self.restart_with_new_charset_internal(charset)
    }

    fn disable_restart(&mut self) {
        if let RestartState::Tracking(_) = self.restart {
            self.restart = RestartState::Disabled;
        }
    }
}

impl ConverterDecodingInput {
    fn restart_with_new_charset_internal(&mut self, charset: Charset) -> Result<()> {
        let RestartState::Tracking(mut backup) =
            std::mem::replace(&mut self.restart, RestartState::Disabled)
        else {
            return Ok(());
        };
        // Read-but-undecoded bytes replay after the already-consumed backup.
        backup.append(&self.raw[self.raw_start..self.raw_end]);
        self.restart = RestartState::Replaying(backup);
        self.raw_start = 0;
        self.raw_end = 0;
        self.raw_offset = 0;
        self.eof = false;
        self.parse.reset();
        self.charset = charset;
        self.decoder = charset.new_decoder();
        // BOM auto-detection already had its chance; only the new charset's
        // own preamble is skipped on the replayed head.
        self.detect_bom = false;
        self.preamble = PreambleState::Checking;
        Ok(())
    }
}

impl Reusable for ConverterDecodingInput {
    fn reinitialize(&mut self) {
        self.decoder = self.charset.new_decoder();
        self.preamble = PreambleState::Checking;
        self.raw_start = 0;
        self.raw_end = 0;
        self.raw_offset = 0;
        self.source_eof = false;
        self.eof = false;
        self.parse.reset();
        self.restart = if self.restart_max > 0 {
            RestartState::Tracking(ByteCache::new())
        } else {
            RestartState::Disabled
        };
        if let ByteInput::Pushed(cell) = &self.source {
            cell.borrow_mut().clear();
        }
    }
}
