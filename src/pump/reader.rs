//! Text-side pull adapter.
//!
//! [`ConverterReader`] drains converted UTF-16 out of a chain whose output
//! stage commits into a shared pull cache, running the chain on demand. The
//! convenience [`ConverterReader::read_to_string`] accumulates the whole
//! stream, pairing surrogate halves across chunk boundaries.

use crate::common::Result;
use crate::contracts::{ProducerConsumer, PullBuffer, TextRead};
use crate::pump::{stall_ceiling, PumpGuard};
use std::cell::RefCell;
use std::io;
use std::rc::Rc;

pub struct ConverterReader<P: ProducerConsumer> {
    chain: P,
    cache: Rc<RefCell<PullBuffer<u16>>>,
}

impl<P: ProducerConsumer> ConverterReader<P> {
    /// `cache` must be the cell the chain's output stage commits into.
    pub fn new(chain: P, cache: Rc<RefCell<PullBuffer<u16>>>) -> Self {
        Self { chain, cache }
    }

    pub fn chain_mut(&mut self) -> &mut P {
        &mut self.chain
    }

    /// Fills `buf` with converted UTF-16 units. `Ok(0)` signals end of the
    /// stream.
    pub fn read_utf16(&mut self, buf: &mut [u16]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut guard = PumpGuard::new(stall_ceiling(buf.len()));
        loop {
            let drained = self.cache.borrow_mut().drain(buf);
            if drained > 0 {
                return Ok(drained);
            }
            if self.chain.completed() {
                return Ok(0);
            }
            let progressed = self.chain.run()?;
            guard.note(progressed)?;
        }
    }

    /// Drains the remainder of the stream into a `String`. Unpaired
    /// surrogates become U+FFFD.
    pub fn read_to_string(&mut self) -> Result<String> {
        let mut out = String::new();
        let mut buf = [0u16; 1024];
        let mut carried: Option<u16> = None;
        loop {
            let n = self.read_utf16(&mut buf)?;
            if n == 0 {
                if carried.is_some() {
                    out.push(char::REPLACEMENT_CHARACTER);
                }
                return Ok(out);
            }
            let mut units: Vec<u16> =
                carried.take().into_iter().chain(buf[..n].iter().copied()).collect();
            // A trailing high surrogate may pair with the next chunk.
            if let Some(&last) = units.last() {
                if (0xD800..0xDC00).contains(&last) {
                    carried = Some(last);
                    units.pop();
                }
            }
            for ch in char::decode_utf16(units) {
                out.push(ch.unwrap_or(char::REPLACEMENT_CHARACTER));
            }
        }
    }
}

impl<P: ProducerConsumer> TextRead for ConverterReader<P> {
    fn read_utf16(&mut self, buf: &mut [u16]) -> io::Result<usize> {
        ConverterReader::read_utf16(self, buf).map_err(io::Error::from)
    }
}
