//! Unified error types for the conversion pipeline.
//!
//! All fatal conditions are raised immediately; there are no partial-success
//! return values. A refused restart is not an error and is reported as a
//! boolean result instead.

use thiserror::Error;

/// Main error type for conversion operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error from the underlying byte source or sink
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A single token could not fit into the parse buffer even after growing
    /// it to the configured ceiling
    #[error("document too complex: a single token exceeds {max} characters")]
    TooComplex { max: usize },

    /// The cooperative pump looped without any stage moving data
    #[error("conversion stalled: no progress after {passes} pump passes")]
    TooManyIterations { passes: usize },

    /// The caller drove an adapter in a way its mode does not support
    #[error("inconsistent converter state: {0}")]
    InconsistentState(&'static str),

    /// Operation on an adapter that has already been finished
    #[error("converter already finished")]
    Finished,

    /// Codepage with no corresponding encoding
    #[error("unsupported codepage: {0}")]
    UnsupportedCodepage(u32),
}

/// Result type for conversion operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(inner) => inner,
            Error::TooComplex { .. } | Error::UnsupportedCodepage(_) => {
                std::io::Error::new(std::io::ErrorKind::InvalidData, err)
            }
            Error::TooManyIterations { .. } => {
                std::io::Error::new(std::io::ErrorKind::TimedOut, err)
            }
            Error::InconsistentState(_) | Error::Finished => {
                std::io::Error::new(std::io::ErrorKind::Other, err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_round_trip_preserves_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err = Error::from(io);
        let back = std::io::Error::from(err);
        assert_eq!(back.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn stall_error_message_names_pass_count() {
        let err = Error::TooManyIterations { passes: 42 };
        assert!(err.to_string().contains("42"));
    }
}
