//! Byte-side stream adapter.
//!
//! [`ConverterStream`] wraps a producer/consumer chain behind the standard
//! `Read` or `Write` trait, depending on which end of the chain faces the
//! caller. In pull mode the chain's encoding output commits into a shared
//! pull cache and `read` drains it, running the chain whenever the cache is
//! empty. In push mode `write` appends to the shared push cell the chain's
//! decoding input drains, pumping the chain down whenever the backlog grows.

use crate::common::{Error, Result};
use crate::contracts::{ProducerConsumer, PullBuffer, PushBuffer};
use crate::pump::{stall_ceiling, PumpGuard};
use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::rc::Rc;

/// Pushed bytes kept undigested before `write` pumps the chain.
const PUSH_BACKLOG: usize = 16 * 1024;

enum Mode {
    /// Caller reads converted bytes out of the chain.
    Pull(Rc<RefCell<PullBuffer<u8>>>),
    /// Caller writes source bytes into the chain.
    Push(Rc<RefCell<PushBuffer<u8>>>),
}

pub struct ConverterStream<P: ProducerConsumer> {
    chain: P,
    mode: Mode,
    finished: bool,
}

impl<P: ProducerConsumer> ConverterStream<P> {
    /// Pull-mode stream: `cache` must be the cell the chain's output stage
    /// commits into.
    pub fn reader(chain: P, cache: Rc<RefCell<PullBuffer<u8>>>) -> Self {
        Self { chain, mode: Mode::Pull(cache), finished: false }
    }

    /// Push-mode stream: `cell` must be the cell the chain's input stage
    /// drains.
    pub fn writer(chain: P, cell: Rc<RefCell<PushBuffer<u8>>>) -> Self {
        Self { chain, mode: Mode::Push(cell), finished: false }
    }

    pub fn chain(&self) -> &P {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut P {
        &mut self.chain
    }

    /// Marks end of input and drains the chain to completion. Push mode
    /// only; a pull-mode stream completes by being read to its end.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::Finished);
        }
        let Mode::Push(cell) = &self.mode else {
            return Err(Error::InconsistentState("finish on a pull-mode stream"));
        };
        cell.borrow_mut().finish();
        self.chain.flush()?;
        self.finished = true;
        Ok(())
    }

    /// Runs the chain until the push backlog falls below `bound`.
    fn pump_down(&mut self, cell: &Rc<RefCell<PushBuffer<u8>>>, bound: usize) -> Result<()> {
        let mut guard = PumpGuard::new(stall_ceiling(cell.borrow().len()));
        while cell.borrow().len() > bound {
            let progressed = self.chain.run()?;
            guard.note(progressed)?;
        }
        Ok(())
    }
}

impl<P: ProducerConsumer> Read for ConverterStream<P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Mode::Pull(cache) = &self.mode else {
            return Err(Error::InconsistentState("read on a push-mode stream").into());
        };
        if buf.is_empty() {
            return Ok(0);
        }
        let cache = Rc::clone(cache);
        let mut guard = PumpGuard::new(stall_ceiling(buf.len()));
        loop {
            let drained = cache.borrow_mut().drain(buf);
            if drained > 0 {
                return Ok(drained);
            }
            if self.chain.completed() {
                return Ok(0);
            }
            let progressed = self.chain.run().map_err(io::Error::from)?;
            guard.note(progressed).map_err(io::Error::from)?;
        }
    }
}

impl<P: ProducerConsumer> Write for ConverterStream<P> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Mode::Push(cell) = &self.mode else {
            return Err(Error::InconsistentState("write on a pull-mode stream").into());
        };
        if self.finished {
            return Err(Error::Finished.into());
        }
        cell.borrow_mut().push(buf);
        let cell = Rc::clone(cell);
        self.pump_down(&cell, PUSH_BACKLOG).map_err(io::Error::from)?;
        Ok(buf.len())
    }

    /// Digests the whole backlog without ending the stream.
    fn flush(&mut self) -> io::Result<()> {
        let Mode::Push(cell) = &self.mode else {
            return Err(Error::InconsistentState("flush on a pull-mode stream").into());
        };
        let cell = Rc::clone(cell);
        self.pump_down(&cell, 0).map_err(io::Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Charset;
    use crate::stages::decode::{ConverterDecodingInput, DecodingOptions};
    use crate::stages::encode::{ConverterEncodingOutput, EncodingOptions};
    use crate::transcoder::Transcoder;

    fn pull_chain(
        bytes: Vec<u8>,
        decoding: DecodingOptions,
        encoding: EncodingOptions,
    ) -> ConverterStream<
        Transcoder<ConverterDecodingInput, ConverterEncodingOutput>,
    > {
        let cache = PullBuffer::<u8>::shared(32 * 1024);
        let input = ConverterDecodingInput::new(Box::new(io::Cursor::new(bytes)), decoding);
        let output = ConverterEncodingOutput::pulled(Rc::clone(&cache), encoding);
        ConverterStream::reader(Transcoder::new(input, output), cache)
    }

    #[test]
    fn pull_mode_converts_while_reading() {
        let decoding = DecodingOptions {
            charset: Charset::windows_1252(),
            detect_bom: false,
            ..DecodingOptions::default()
        };
        let mut stream =
            pull_chain(vec![b'h', 0xE9], decoding, EncodingOptions::default());
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hé");
    }

    #[test]
    fn pull_mode_handles_small_reads() {
        let mut stream = pull_chain(
            b"chunked reads work".to_vec(),
            DecodingOptions::default(),
            EncodingOptions::default(),
        );
        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"chunked reads work");
    }

    #[test]
    fn push_mode_converts_written_bytes() {
        let cell = PushBuffer::<u8>::shared();
        let input = ConverterDecodingInput::pushed(
            Rc::clone(&cell),
            DecodingOptions { detect_bom: false, ..DecodingOptions::default() },
        );
        let sink: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        struct Out(Rc<RefCell<Vec<u8>>>);
        impl Write for Out {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let output = ConverterEncodingOutput::new(
            Box::new(Out(Rc::clone(&sink))),
            EncodingOptions { charset: Charset::windows_1252(), ..Default::default() },
        );
        let mut stream =
            ConverterStream::writer(Transcoder::new(input, output), cell);

        stream.write_all("caf".as_bytes()).unwrap();
        stream.write_all("é".as_bytes()).unwrap();
        stream.finish().unwrap();
        assert_eq!(&*sink.borrow(), &[b'c', b'a', b'f', 0xE9][..]);
        assert!(matches!(stream.finish(), Err(Error::Finished)));
    }

    #[test]
    fn wrong_mode_use_is_rejected() {
        let mut stream = pull_chain(
            b"x".to_vec(),
            DecodingOptions::default(),
            EncodingOptions::default(),
        );
        let err = stream.write(b"nope").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn stalled_source_surfaces_as_timeout() {
        struct NeverReady;
        impl Read for NeverReady {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "pending"))
            }
        }
        let cache = PullBuffer::<u8>::shared(32 * 1024);
        let input = ConverterDecodingInput::new(
            Box::new(NeverReady),
            DecodingOptions::default(),
        );
        let output =
            ConverterEncodingOutput::pulled(Rc::clone(&cache), EncodingOptions::default());
        let mut stream =
            ConverterStream::reader(Transcoder::new(input, output), cache);

        let mut buf = [0u8; 16];
        let err = stream.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn bom_detection_works_through_the_stream() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "wide".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let mut stream =
            pull_chain(bytes, DecodingOptions::default(), EncodingOptions::default());
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "wide");
    }
}
