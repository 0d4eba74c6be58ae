//! Pump adapters: the only place the pipeline loops.
//!
//! A chain of stages is cooperative and never blocks, so someone has to call
//! [`crate::contracts::ProducerConsumer::run`] until the data the caller
//! wants has arrived. The adapters here do that behind the standard
//! `Read`/`Write` traits (byte side) and behind UTF-16 calls (text side),
//! guarding every loop with a [`PumpGuard`] so a wedged chain surfaces as an
//! error instead of a spin.

mod reader;
mod stream;
mod writer;

pub use reader::ConverterReader;
pub use stream::ConverterStream;
pub use writer::ConverterWriter;

use crate::common::{Error, Result};
use crate::contracts::ProgressMonitor;

/// Base number of no-progress passes tolerated before declaring a stall.
const STALL_BASE: usize = 16;

/// Stall tolerance for a pump serving a caller buffer of `buffer_size`
/// units. Larger requests legitimately need more passes.
pub(crate) fn stall_ceiling(buffer_size: usize) -> usize {
    STALL_BASE + buffer_size / 1024
}

/// Counts consecutive no-progress pump passes against a ceiling.
pub(crate) struct PumpGuard {
    stalls: usize,
    passes: usize,
    ceiling: usize,
}

impl PumpGuard {
    pub(crate) fn new(ceiling: usize) -> Self {
        Self { stalls: 0, passes: 0, ceiling }
    }

    /// Records the outcome of one pump pass.
    pub(crate) fn note(&mut self, progressed: bool) -> Result<()> {
        self.passes += 1;
        if progressed {
            self.stalls = 0;
            return Ok(());
        }
        self.stalls += 1;
        if self.stalls > self.ceiling {
            return Err(Error::TooManyIterations { passes: self.passes });
        }
        Ok(())
    }
}

impl ProgressMonitor for PumpGuard {
    fn report_progress(&mut self) {
        self.stalls = 0;
    }
}
