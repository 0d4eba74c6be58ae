//! Longan - A Rust library for streaming character-set conversion
//!
//! This library converts byte streams between character encodings, and
//! between bytes and UTF-16 text, through a pipeline of cooperative stages:
//! a decoding input, an optional fallback classifier, and an encoding
//! output, driven by pump adapters that fit the standard `Read`/`Write`
//! traits.
//!
//! # Features
//!
//! - **Incremental conversion**: Bounded buffers throughout; arbitrarily
//!   large streams convert in constant memory
//! - **BOM detection**: UTF-8 and UTF-16 byte-order marks override the
//!   declared charset and are consumed, never delivered
//! - **Restartable decoding**: A downstream consumer can change its mind
//!   about the source charset mid-stream and have the input re-decoded
//!   from offset zero out of a bounded backup
//! - **Character fallback**: Unsafe characters are substituted by a
//!   pluggable policy before they reach the encoder; unmappables degrade
//!   to numeric character references
//! - **Line-mode encodings**: Stateful encodings such as ISO-2022-JP are
//!   re-synchronized at every line boundary
//!
//! # Example - Converting a byte stream
//!
//! ```
//! use longan::pump::ConverterStream;
//! use longan::stages::{ConverterDecodingInput, ConverterEncodingOutput};
//! use longan::stages::{DecodingOptions, EncodingOptions};
//! use longan::{Charset, PullBuffer, Transcoder};
//! use std::io::Read;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Latin-1 bytes in, UTF-8 bytes out.
//! let source: &[u8] = &[b'c', b'a', b'f', 0xE9];
//! let cache = PullBuffer::<u8>::shared(32 * 1024);
//! let input = ConverterDecodingInput::new(
//!     Box::new(source),
//!     DecodingOptions { charset: Charset::windows_1252(), ..Default::default() },
//! );
//! let output = ConverterEncodingOutput::pulled(cache.clone(), EncodingOptions::default());
//! let mut stream = ConverterStream::reader(Transcoder::new(input, output), cache);
//!
//! let mut converted = String::new();
//! stream.read_to_string(&mut converted)?;
//! assert_eq!(converted, "café");
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Decoding bytes to text
//!
//! ```
//! use longan::pump::ConverterReader;
//! use longan::stages::{ConverterDecodingInput, ConverterUnicodeOutput, DecodingOptions};
//! use longan::{PullBuffer, Transcoder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source: &[u8] = "h\u{00E9}llo".as_bytes();
//! let cache = PullBuffer::<u16>::shared(32 * 1024);
//! let input =
//!     ConverterDecodingInput::new(Box::new(source), DecodingOptions::default());
//! let output = ConverterUnicodeOutput::pulled(cache.clone());
//! let mut reader = ConverterReader::new(Transcoder::new(input, output), cache);
//!
//! assert_eq!(reader.read_to_string()?, "héllo");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod common;
pub mod contracts;
pub mod fallback;
pub mod pump;
pub mod stages;
pub mod transcoder;

pub use cache::{ByteCache, ChunkCache, TextCache};
pub use common::{Charset, Error, Result};
pub use contracts::{
    ConverterInput, ConverterOutput, ProducerConsumer, ProgressMonitor, PullBuffer, PushBuffer,
    Restartable, RestartConsumer, RestartSink, ResultsFeedback, Reusable, StringSink, TextRead,
    TextWrite, Utf16Source,
};
pub use fallback::{AsciiFallback, FallbackPolicy};
pub use pump::{ConverterReader, ConverterStream, ConverterWriter};
pub use stages::{
    ConverterDecodingInput, ConverterEncodingOutput, ConverterUnicodeInput,
    ConverterUnicodeOutput, DecodingOptions, EncodingOptions,
};
pub use transcoder::Transcoder;
