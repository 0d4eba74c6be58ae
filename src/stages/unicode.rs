//! Pass-through Unicode stages.
//!
//! Same contracts as the byte stages with the transcoding step elided:
//! characters flow from a character source straight into the parse buffer,
//! or from the caller straight into the cache/destination. The fallback
//! classification still applies on the output side, so escaping behaves the
//! same whether the ultimate sink is bytes or text.

use crate::common::{Charset, Error, Result};
use crate::contracts::{
    ConverterInput, ConverterOutput, PullBuffer, PushBuffer, Reusable, TextRead, TextWrite,
};
use crate::fallback::{FallbackPolicy, SubstituteBuffer};
use crate::stages::buffer::ParseBuffer;
use std::cell::RefCell;
use std::rc::Rc;

/// Staging buffer capacity of the output stage, in UTF-16 units.
const STAGE_BUFFER: usize = 4096;

enum TextInput {
    Reader(Box<dyn TextRead>),
    Pushed(Rc<RefCell<PushBuffer<u16>>>),
}

/// Character input stage: fills the parse buffer from a character source.
pub struct ConverterUnicodeInput {
    source: TextInput,
    parse: ParseBuffer,
    eof: bool,
}

impl ConverterUnicodeInput {
    pub fn new(source: Box<dyn TextRead>, max_token_size: usize) -> Self {
        Self {
            source: TextInput::Reader(source),
            parse: ParseBuffer::new(1024, max_token_size),
            eof: false,
        }
    }

    pub fn pushed(source: Rc<RefCell<PushBuffer<u16>>>, max_token_size: usize) -> Self {
        Self {
            source: TextInput::Pushed(source),
            parse: ParseBuffer::new(1024, max_token_size),
            eof: false,
        }
    }
}

impl ConverterInput for ConverterUnicodeInput {
    fn read_more(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let remaining = self.parse.max_token() - self.parse.len();
        if remaining == 0 {
            return Err(Error::TooComplex { max: self.parse.max_token() });
        }
        self.parse.ensure_space(remaining.min(64))?;
        let dst = self.parse.writable();
        let filled = match &mut self.source {
            TextInput::Reader(reader) => {
                let n = reader.read_utf16(dst)?;
                if n == 0 {
                    self.eof = true;
                }
                n
            }
            TextInput::Pushed(cell) => {
                let mut pushed = cell.borrow_mut();
                let n = pushed.take_into(dst);
                if n == 0 && pushed.finished() {
                    self.eof = true;
                }
                n
            }
        };
        self.parse.committed(filled);
        Ok(filled > 0 || self.eof)
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

impl Reusable for ConverterUnicodeInput {
    fn reinitialize(&mut self) {
        self.parse.reset();
        self.eof = false;
        if let TextInput::Pushed(cell) = &self.source {
            cell.borrow_mut().clear();
        }
    }
}

enum TextOutput {
    Writer(Box<dyn TextWrite>),
    Pulled(Rc<RefCell<PullBuffer<u16>>>),
}

/// Character output stage: moves characters to a text sink or pull cache
/// without encoding them.
pub struct ConverterUnicodeOutput {
    dest: TextOutput,
    /// Nominal charset carried for fallback classification only.
    charset: Charset,
    stage: Vec<u16>,
}

impl ConverterUnicodeOutput {
    pub fn new(dest: Box<dyn TextWrite>) -> Self {
        Self {
            dest: TextOutput::Writer(dest),
            charset: Charset::utf16le(),
            stage: Vec::with_capacity(STAGE_BUFFER),
        }
    }

    pub fn pulled(dest: Rc<RefCell<PullBuffer<u16>>>) -> Self {
        Self {
            dest: TextOutput::Pulled(dest),
            charset: Charset::utf16le(),
            stage: Vec::with_capacity(STAGE_BUFFER),
        }
    }

    fn flush_stage(&mut self) -> Result<()> {
        if self.stage.is_empty() {
            return Ok(());
        }
        match &mut self.dest {
            TextOutput::Writer(writer) => writer.write_utf16(&self.stage)?,
            TextOutput::Pulled(cell) => cell.borrow_mut().commit_from(&self.stage),
        }
        self.stage.clear();
        Ok(())
    }

    fn push_unit(&mut self, unit: u16) -> Result<()> {
        if self.stage.len() >= STAGE_BUFFER {
            self.flush_stage()?;
        }
        self.stage.push(unit);
        Ok(())
    }
}

impl ConverterOutput for ConverterUnicodeOutput {
    fn write(&mut self, chars: &[u16], fallback: Option<&dyn FallbackPolicy>) -> Result<()> {
        let Some(policy) = fallback else {
            if self.stage.len() + chars.len() > STAGE_BUFFER {
                self.flush_stage()?;
            }
            if chars.len() > STAGE_BUFFER {
                match &mut self.dest {
                    TextOutput::Writer(writer) => writer.write_utf16(chars)?,
                    TextOutput::Pulled(cell) => cell.borrow_mut().commit_from(chars),
                }
            } else {
                self.stage.extend_from_slice(chars);
            }
            return Ok(());
        };

        let treat_non_ascii = !self.charset.is_complete_unicode()
            && policy.treat_non_ascii_as_unsafe(self.charset.name());
        let check_high = policy.has_unsafe_unicode();
        for &unit in chars {
            let is_unsafe = if unit < 0x80 {
                policy.is_unsafe_ascii(unit as u8)
            } else {
                treat_non_ascii || (check_high && policy.is_unsafe_unicode(unit))
            };
            if !is_unsafe {
                self.push_unit(unit)?;
                continue;
            }
            let mut sink = SubstituteBuffer::new(&mut self.stage, STAGE_BUFFER);
            if policy.fall_back(unit, &mut sink) {
                continue;
            }
            self.flush_stage()?;
            let mut sink = SubstituteBuffer::new(&mut self.stage, STAGE_BUFFER);
            if !policy.fall_back(unit, &mut sink) {
                return Err(Error::InconsistentState(
                    "fallback substitute exceeds the staging buffer",
                ));
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_stage()?;
        if let TextOutput::Writer(writer) = &mut self.dest {
            writer.flush_text()?;
        }
        Ok(())
    }

    fn can_accept_more(&self) -> bool {
        match &self.dest {
            TextOutput::Pulled(cell) => cell.borrow().has_room(),
            TextOutput::Writer(_) => true,
        }
    }

    /// No encoder to swap; the charset only drives fallback classification.
    fn change_charset(&mut self, charset: Charset) -> Result<()> {
        self.flush_stage()?;
        self.charset = charset;
        Ok(())
    }
}

impl Reusable for ConverterUnicodeOutput {
    fn reinitialize(&mut self) {
        self.stage.clear();
        if let TextOutput::Pulled(cell) = &self.dest {
            cell.borrow_mut().clear();
        }
    }
}
