//! Source/sink contracts: the abstract vocabulary every stage implements.
//!
//! The pipeline is single-threaded and cooperative. Stages never block; they
//! move as much data as their buffers allow and return. The pump adapters in
//! [`crate::pump`] are the only place that loops, and they funnel every
//! observed movement through a [`ProgressMonitor`] so a wedged chain is
//! detected instead of spinning forever.

use crate::cache::ChunkCache;
use crate::common::{Charset, Result};
use crate::fallback::FallbackPolicy;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::io::{self, Seek, SeekFrom, Write};
use std::rc::Rc;

/// A stage that produces UTF-16 units into a parse buffer it owns.
///
/// Content in `[parse_start(), parse_end())` is valid, unconsumed output; a
/// terminating sentinel unit always follows `parse_end()`.
pub trait ConverterInput {
    /// Attempts to produce more parsed characters. Returns whether any
    /// progress occurred: new data, end of input, or an encoding change.
    fn read_more(&mut self) -> Result<bool>;

    /// The whole parse buffer, sentinel included.
    fn buffer(&self) -> &[u16];

    /// Start of the valid region.
    fn parse_start(&self) -> usize;

    /// End of the valid region.
    fn parse_end(&self) -> usize;

    /// Advances the logical read cursor past `count` consumed units.
    fn report_processed(&mut self, count: usize);

    /// Compacts the consumed gap `[begin, end)` out of the valid region.
    fn remove_gap(&mut self, begin: usize, end: usize);

    /// True once every input byte has been decoded and delivered.
    fn end_of_file(&self) -> bool;

    /// Ceiling on the parse buffer, and therefore on a single token.
    fn max_token_size(&self) -> usize;
}

/// A stage that accepts UTF-16 units and moves them toward a destination.
pub trait ConverterOutput {
    /// Writes `chars`, routing any character the policy deems unsafe for the
    /// active charset through the policy's substitution writer.
    fn write(&mut self, chars: &[u16], fallback: Option<&dyn FallbackPolicy>) -> Result<()>;

    /// Drains buffered characters and finalizes the active encoder.
    fn flush(&mut self) -> Result<()>;

    /// False while the consumer side is backed up; the producer should stop
    /// generating until the caller drains.
    fn can_accept_more(&self) -> bool;

    /// Switches the active charset. Buffered characters are flushed under
    /// the old charset first.
    fn change_charset(&mut self, charset: Charset) -> Result<()>;

    /// Convenience: writes a string slice.
    fn write_str(&mut self, text: &str, fallback: Option<&dyn FallbackPolicy>) -> Result<()> {
        let mut staged: SmallVec<[u16; 128]> = SmallVec::new();
        for unit in text.encode_utf16() {
            staged.push(unit);
            if staged.len() == 128 {
                self.write(&staged, fallback)?;
                staged.clear();
            }
        }
        if !staged.is_empty() {
            self.write(&staged, fallback)?;
        }
        Ok(())
    }

    /// Convenience: writes a single character.
    fn write_char(&mut self, ch: char, fallback: Option<&dyn FallbackPolicy>) -> Result<()> {
        let mut units = [0u16; 2];
        let encoded = ch.encode_utf16(&mut units);
        self.write(encoded, fallback)
    }
}

/// Restart capability: discard already-produced output and re-run from
/// cached input under a newly chosen encoding.
pub trait Restartable {
    fn can_restart(&self) -> bool;

    /// Rewinds to the start of the stream. Calling this when
    /// [`Restartable::can_restart`] is false is a contract violation.
    fn restart(&mut self) -> Result<()>;

    /// Permanently gives up restart capability, releasing any backup.
    fn disable_restart(&mut self);
}

/// A component whose buffers survive reuse for a new conversion.
pub trait Reusable {
    /// Resets all conversion state while keeping buffer allocations.
    fn reinitialize(&mut self);
}

/// One bounded unit of cooperative work.
pub trait ProducerConsumer {
    /// Performs one bounded step. Returns whether any stage moved data.
    fn run(&mut self) -> Result<bool>;

    /// Drains until genuinely done. Only meaningful once the input side has
    /// reached end of file.
    fn flush(&mut self) -> Result<()>;

    /// True once end of input has fully propagated through the chain.
    fn completed(&self) -> bool;
}

/// Receives progress notifications from the pump loop body.
pub trait ProgressMonitor {
    fn report_progress(&mut self);
}

/// Receives late results the pipeline discovers while running, such as the
/// charset resolved from a byte-order mark.
pub trait ResultsFeedback {
    fn charset_detected(&mut self, charset: Charset);
}

/// The downstream consumer's side of the restart protocol. The tokenizer
/// registers one with the decoding input stage so the stage can ask whether
/// already-delivered output may be discarded.
pub trait RestartConsumer {
    /// May previously delivered output still be thrown away?
    fn can_restart(&self) -> bool;

    /// Output up to this point is void; the consumer must reset itself.
    fn restart(&mut self);

    /// The backup window was exceeded; restart will never be offered again.
    fn disable_restart(&mut self);
}

/// Shared handle to a restart consumer.
pub type RestartConsumerHandle = Rc<RefCell<dyn RestartConsumer>>;

/// Pull-style source of UTF-16 units. Returning `Ok(0)` signals end of
/// input.
pub trait TextRead {
    fn read_utf16(&mut self, buf: &mut [u16]) -> io::Result<usize>;
}

/// Push-style sink of UTF-16 units.
pub trait TextWrite {
    fn write_utf16(&mut self, units: &[u16]) -> io::Result<()>;

    fn flush_text(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory UTF-16 source over a string.
pub struct Utf16Source {
    units: Vec<u16>,
    pos: usize,
}

impl Utf16Source {
    pub fn new(text: &str) -> Self {
        Self { units: text.encode_utf16().collect(), pos: 0 }
    }
}

impl TextRead for Utf16Source {
    fn read_utf16(&mut self, buf: &mut [u16]) -> io::Result<usize> {
        let n = (self.units.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.units[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl TextWrite for Vec<u16> {
    fn write_utf16(&mut self, units: &[u16]) -> io::Result<()> {
        self.extend_from_slice(units);
        Ok(())
    }
}

/// Shared string sink; the accumulated text stays reachable through the
/// handle after the chain takes ownership of the sink.
pub struct StringSink {
    out: Rc<RefCell<String>>,
    pending_high: Option<u16>,
}

impl StringSink {
    /// Returns the sink and the handle the caller keeps.
    pub fn shared() -> (Self, Rc<RefCell<String>>) {
        let out = Rc::new(RefCell::new(String::new()));
        (Self { out: Rc::clone(&out), pending_high: None }, out)
    }
}

impl TextWrite for StringSink {
    fn write_utf16(&mut self, units: &[u16]) -> io::Result<()> {
        let mut out = self.out.borrow_mut();
        let carried = self.pending_high.take();
        let iter = carried.into_iter().chain(units.iter().copied());
        let mut units: Vec<u16> = iter.collect();
        // A trailing high surrogate may pair with the next write.
        if let Some(&last) = units.last() {
            if (0xD800..0xDC00).contains(&last) {
                self.pending_high = Some(last);
                units.pop();
            }
        }
        for ch in char::decode_utf16(units) {
            out.push(ch.unwrap_or(char::REPLACEMENT_CHARACTER));
        }
        Ok(())
    }

    /// A high surrogate still waiting for its pair at flush time can never
    /// complete; make the truncation visible.
    fn flush_text(&mut self) -> io::Result<()> {
        if self.pending_high.take().is_some() {
            self.out.borrow_mut().push(char::REPLACEMENT_CHARACTER);
        }
        Ok(())
    }
}

/// A rewindable byte destination: the encoding output stage can restart only
/// into a sink that exposes its position and length and can be truncated
/// back to where the conversion started.
pub trait RestartSink: Write {
    fn stream_position(&mut self) -> io::Result<u64>;
    fn stream_length(&mut self) -> io::Result<u64>;

    /// Truncates to `len` and repositions there.
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl RestartSink for io::Cursor<Vec<u8>> {
    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.position())
    }

    fn stream_length(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().truncate(len as usize);
        self.set_position(len);
        Ok(())
    }
}

impl RestartSink for std::fs::File {
    fn stream_position(&mut self) -> io::Result<u64> {
        Seek::stream_position(self)
    }

    fn stream_length(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;
        Ok(())
    }
}

/// Push-mode handoff cell: the adapter appends, a stage drains, and an
/// explicit flag distinguishes "no data yet" from end of input.
pub struct PushBuffer<T: Copy + Default> {
    cache: ChunkCache<T>,
    eof: bool,
}

impl<T: Copy + Default> PushBuffer<T> {
    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self { cache: ChunkCache::new(), eof: false }))
    }

    /// Appends pushed data. Must not be called after [`PushBuffer::finish`].
    pub fn push(&mut self, data: &[T]) {
        debug_assert!(!self.eof);
        self.cache.append(data);
    }

    /// Marks that no further data will be pushed.
    pub fn finish(&mut self) {
        self.eof = true;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// True once the pushed stream is complete and fully drained.
    #[inline]
    pub fn at_end(&self) -> bool {
        self.eof && self.cache.is_empty()
    }

    #[inline]
    pub fn finished(&self) -> bool {
        self.eof
    }

    pub(crate) fn take_into(&mut self, dst: &mut [T]) -> usize {
        self.cache.read(dst)
    }

    pub(crate) fn clear(&mut self) {
        self.cache.reset();
        self.eof = false;
    }
}

/// Pull-mode handoff cell: a stage commits converted output, the adapter
/// drains it into the caller's buffer. The limit is the backpressure bound
/// consulted by [`ConverterOutput::can_accept_more`].
pub struct PullBuffer<T: Copy + Default> {
    cache: ChunkCache<T>,
    limit: usize,
}

impl<T: Copy + Default> PullBuffer<T> {
    pub fn shared(limit: usize) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self { cache: ChunkCache::new(), limit }))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// True while the cache is below its backpressure bound.
    #[inline]
    pub fn has_room(&self) -> bool {
        self.cache.len() < self.limit
    }

    pub(crate) fn commit_from(&mut self, data: &[T]) {
        self.cache.append(data);
    }

    pub(crate) fn drain(&mut self, dst: &mut [T]) -> usize {
        self.cache.read(dst)
    }

    pub(crate) fn clear(&mut self) {
        self.cache.reset();
    }
}
