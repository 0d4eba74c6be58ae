//! The converter stages: byte decoding, byte encoding, and the pass-through
//! Unicode counterparts. Each stage implements the matching contract from
//! [`crate::contracts`] and is driven by a [`crate::transcoder::Transcoder`]
//! or used directly by a tokenizer.

mod buffer;
pub mod decode;
pub mod encode;
pub mod unicode;

pub use decode::{ConverterDecodingInput, DecodingOptions};
pub use encode::{ConverterEncodingOutput, EncodingOptions};
pub use unicode::{ConverterUnicodeInput, ConverterUnicodeOutput};
