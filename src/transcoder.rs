//! The transcoder: a producer/consumer that moves every parsed character
//! from an input stage to an output stage unchanged.
//!
//! This is the trivial member of the producer/consumer family; a document
//! tokenizer sits in the same seat when the stream carries markup. One
//! [`Transcoder::run`] call performs a single bounded step: ask the input
//! for more characters, hand the valid parse region to the output, repeat
//! never. The pump adapters in [`crate::pump`] drive the loop.

use crate::common::{Charset, Error, Result};
use crate::contracts::{
    ConverterInput, ConverterOutput, ProducerConsumer, RestartConsumer, Restartable, Reusable,
};
use crate::fallback::FallbackPolicy;
use crate::stages::decode::ConverterDecodingInput;
use crate::stages::encode::ConverterEncodingOutput;
use std::cell::RefCell;
use std::rc::Rc;

/// Consecutive no-progress flush passes tolerated before giving up.
const FLUSH_STALL_LIMIT: usize = 8;

/// A transcoder has no parse state to rebuild, so discarding delivered
/// output never costs it anything.
struct AgreeableConsumer;

impl RestartConsumer for AgreeableConsumer {
    fn can_restart(&self) -> bool {
        true
    }

    fn restart(&mut self) {}

    fn disable_restart(&mut self) {}
}

/// Couples an input stage to an output stage and moves characters between
/// them one bounded step at a time.
pub struct Transcoder<I: ConverterInput, O: ConverterOutput> {
    input: I,
    output: O,
    fallback: Option<Box<dyn FallbackPolicy>>,
    completed: bool,
}

impl<I: ConverterInput, O: ConverterOutput> Transcoder<I, O> {
    pub fn new(input: I, output: O) -> Self {
        Self { input, output, fallback: None, completed: false }
    }

    /// Installs the fallback policy consulted for every written character.
    pub fn with_fallback(mut self, fallback: Box<dyn FallbackPolicy>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn input(&self) -> &I {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut I {
        &mut self.input
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// Hands the valid parse region to the output and consumes it.
    fn drain_parsed(&mut self) -> Result<bool> {
        let (start, end) = (self.input.parse_start(), self.input.parse_end());
        if end == start {
            return Ok(false);
        }
        let region = &self.input.buffer()[start..end];
        self.output.write(region, self.fallback.as_deref())?;
        self.input.report_processed(end - start);
        Ok(true)
    }
}

impl<I: ConverterInput, O: ConverterOutput> ProducerConsumer for Transcoder<I, O> {
    fn run(&mut self) -> Result<bool> {
        if self.completed {
            return Ok(false);
        }
        if !self.output.can_accept_more() {
            return Ok(false);
        }

        let mut progress = self.input.read_more()?;
        progress |= self.drain_parsed()?;

        if self.input.end_of_file() {
            self.output.flush()?;
            self.completed = true;
            progress = true;
        }
        Ok(progress)
    }

    fn flush(&mut self) -> Result<()> {
        let mut stalled = 0;
        let mut passes = 0;
        while !self.completed {
            passes += 1;
            if self.run()? {
                stalled = 0;
            } else {
                stalled += 1;
                if stalled >= FLUSH_STALL_LIMIT {
                    return Err(Error::TooManyIterations { passes });
                }
            }
        }
        Ok(())
    }

    fn completed(&self) -> bool {
        self.completed
    }
}

impl<O: ConverterOutput> Transcoder<ConverterDecodingInput, O> {
    /// Registers this transcoder as the decoding stage's restart consumer.
    /// Call once after construction when source restart should be possible.
    pub fn enable_source_restart(&mut self) {
        self.input.register_restart_consumer(Rc::new(RefCell::new(AgreeableConsumer)));
    }
}

impl Transcoder<ConverterDecodingInput, ConverterEncodingOutput> {
    /// Re-runs the conversion from the start of the byte stream under a
    /// newly chosen source charset, discarding everything already written.
    ///
    /// Requires both sides to still be restart-capable: the input must hold
    /// its full backup and the output must be armed on a rewindable sink.
    /// Returns whether a restart actually happened; requesting the charset
    /// already in effect waives restart instead.
    pub fn change_source_charset(&mut self, charset: Charset) -> Result<bool> {
        if charset.codepage() == self.input.charset().codepage() {
            // Charset confirmed; neither side will ever need to rewind.
            self.input.restart_with_new_charset(charset)?;
            self.output.disable_restart();
            return Ok(false);
        }
        if !self.output.can_restart() {
            self.input.disable_restart();
            return Ok(false);
        }
        if !self.input.restart_with_new_charset(charset)? {
            return Ok(false);
        }
        self.output.restart()?;
        self.completed = false;
        Ok(true)
    }
}

impl<I, O> Reusable for Transcoder<I, O>
where
    I: ConverterInput + Reusable,
    O: ConverterOutput + Reusable,
{
    fn reinitialize(&mut self) {
        self.input.reinitialize();
        self.output.reinitialize();
        self.completed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{StringSink, Utf16Source};
    use crate::fallback::AsciiFallback;
    use crate::stages::decode::DecodingOptions;
    use crate::stages::encode::EncodingOptions;
    use crate::stages::unicode::{ConverterUnicodeInput, ConverterUnicodeOutput};
    use std::io::Cursor;

    fn run_to_completion<I: ConverterInput, O: ConverterOutput>(t: &mut Transcoder<I, O>) {
        t.flush().unwrap();
        assert!(t.completed());
    }

    #[test]
    fn utf8_to_windows_1252() {
        let input = ConverterDecodingInput::new(
            Box::new(Cursor::new("héllo".as_bytes().to_vec())),
            DecodingOptions::default(),
        );
        let sink: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        struct Out(Rc<RefCell<Vec<u8>>>);
        impl std::io::Write for Out {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let output = ConverterEncodingOutput::new(
            Box::new(Out(Rc::clone(&sink))),
            EncodingOptions { charset: Charset::windows_1252(), ..Default::default() },
        );
        let mut t = Transcoder::new(input, output);
        run_to_completion(&mut t);
        assert_eq!(&*sink.borrow(), &[b'h', 0xE9, b'l', b'l', b'o'][..]);
    }

    #[test]
    fn bytes_to_text_via_unicode_output() {
        let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode("日本語テスト");
        let input = ConverterDecodingInput::new(
            Box::new(Cursor::new(bytes.into_owned())),
            DecodingOptions {
                charset: Charset::from_codepage(932).unwrap(),
                detect_bom: false,
                ..DecodingOptions::default()
            },
        );
        let (sink, handle) = StringSink::shared();
        let output = ConverterUnicodeOutput::new(Box::new(sink));
        let mut t = Transcoder::new(input, output);
        run_to_completion(&mut t);
        assert_eq!(*handle.borrow(), "日本語テスト");
    }

    #[test]
    fn text_to_bytes_via_unicode_input() {
        let input = ConverterUnicodeInput::new(Box::new(Utf16Source::new("straight")), 4096);
        let output = ConverterEncodingOutput::new(
            Box::new(Cursor::new(Vec::new())),
            EncodingOptions::default(),
        );
        let mut t = Transcoder::new(input, output);
        run_to_completion(&mut t);
    }

    #[test]
    fn fallback_applies_across_the_chain() {
        let input = ConverterDecodingInput::new(
            Box::new(Cursor::new("fee \u{2014} 1\u{20AC}".as_bytes().to_vec())),
            DecodingOptions::default(),
        );
        let sink: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        struct Out(Rc<RefCell<Vec<u8>>>);
        impl std::io::Write for Out {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let output = ConverterEncodingOutput::new(
            Box::new(Out(Rc::clone(&sink))),
            EncodingOptions { charset: Charset::windows_1252(), ..Default::default() },
        );
        let mut t = Transcoder::new(input, output)
            .with_fallback(Box::new(AsciiFallback::ascii_only()));
        run_to_completion(&mut t);
        assert_eq!(&*sink.borrow(), b"fee -- 1EUR");
    }

    #[test]
    fn representable_text_round_trips_through_a_codepage() {
        let original = "こんにちは、世界";
        let encoded: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        struct Out(Rc<RefCell<Vec<u8>>>);
        impl std::io::Write for Out {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let shift_jis = Charset::from_codepage(932).unwrap();
        let mut encode = Transcoder::new(
            ConverterUnicodeInput::new(Box::new(Utf16Source::new(original)), 4096),
            ConverterEncodingOutput::new(
                Box::new(Out(Rc::clone(&encoded))),
                EncodingOptions { charset: shift_jis, ..Default::default() },
            ),
        );
        run_to_completion(&mut encode);

        let bytes = encoded.borrow().clone();
        let (sink, handle) = StringSink::shared();
        let mut decode = Transcoder::new(
            ConverterDecodingInput::new(
                Box::new(Cursor::new(bytes)),
                DecodingOptions {
                    charset: shift_jis,
                    detect_bom: false,
                    ..DecodingOptions::default()
                },
            ),
            ConverterUnicodeOutput::new(Box::new(sink)),
        );
        run_to_completion(&mut decode);
        assert_eq!(*handle.borrow(), original);
    }

    #[test]
    fn source_charset_change_rewrites_the_output() {
        // UTF-16LE bytes initially misread as UTF-8.
        let mut bytes = Vec::new();
        for unit in "WIDE TEXT".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let input = ConverterDecodingInput::new(
            Box::new(Cursor::new(bytes)),
            DecodingOptions { detect_bom: false, ..DecodingOptions::default() },
        );
        let output = ConverterEncodingOutput::restartable(
            Box::new(Cursor::new(Vec::new())),
            EncodingOptions::default(),
        )
        .unwrap();
        let mut t = Transcoder::new(input, output);
        t.enable_source_restart();

        // Move some wrongly decoded data downstream first.
        t.run().unwrap();
        assert!(t.change_source_charset(Charset::utf16le()).unwrap());
        run_to_completion(&mut t);
        // The mistaken prefix was truncated away before the re-run.
        assert!(!t.change_source_charset(Charset::utf8()).unwrap());
    }

    #[test]
    fn confirming_the_current_charset_releases_both_restarts() {
        let input = ConverterDecodingInput::new(
            Box::new(Cursor::new(b"plain ascii".to_vec())),
            DecodingOptions { detect_bom: false, ..DecodingOptions::default() },
        );
        let output = ConverterEncodingOutput::restartable(
            Box::new(Cursor::new(Vec::new())),
            EncodingOptions::default(),
        )
        .unwrap();
        let mut t = Transcoder::new(input, output);
        t.enable_source_restart();
        t.run().unwrap();
        assert!(t.output().can_restart());

        assert!(!t.change_source_charset(Charset::utf8()).unwrap());
        assert!(!t.input().can_restart());
        assert!(!t.output().can_restart());
    }

    #[test]
    fn charset_change_refused_on_plain_writer_output() {
        let input = ConverterDecodingInput::new(
            Box::new(Cursor::new(b"abc".to_vec())),
            DecodingOptions { detect_bom: false, ..DecodingOptions::default() },
        );
        let output = ConverterEncodingOutput::new(
            Box::new(std::io::sink()),
            EncodingOptions::default(),
        );
        let mut t = Transcoder::new(input, output);
        t.enable_source_restart();
        t.run().unwrap();
        assert!(!t.change_source_charset(Charset::utf16le()).unwrap());
        run_to_completion(&mut t);
    }

    #[test]
    fn reinitialize_supports_a_second_conversion() {
        let cell = crate::contracts::PushBuffer::<u8>::shared();
        let input = ConverterDecodingInput::pushed(
            cell.clone(),
            DecodingOptions { detect_bom: false, ..DecodingOptions::default() },
        );
        let (sink, handle) = StringSink::shared();
        let output = ConverterUnicodeOutput::new(Box::new(sink));
        let mut t = Transcoder::new(input, output);

        cell.borrow_mut().push(b"one");
        cell.borrow_mut().finish();
        run_to_completion(&mut t);
        assert_eq!(*handle.borrow(), "one");

        t.reinitialize();
        handle.borrow_mut().clear();
        cell.borrow_mut().push(b"two");
        cell.borrow_mut().finish();
        run_to_completion(&mut t);
        assert_eq!(*handle.borrow(), "two");
    }
}
