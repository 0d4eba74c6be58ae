//! Text-side push adapter.
//!
//! [`ConverterWriter`] feeds caller-supplied text into a chain whose input
//! stage drains a shared push cell, pumping the chain whenever the backlog
//! grows. [`ConverterWriter::finish`] marks end of input and drains the
//! chain to completion; the writer refuses further text afterwards.

use crate::common::{Error, Result};
use crate::contracts::{ProducerConsumer, PushBuffer, TextWrite};
use crate::pump::{stall_ceiling, PumpGuard};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::io;
use std::rc::Rc;

/// Pushed units kept undigested before a write pumps the chain.
const PUSH_BACKLOG: usize = 8 * 1024;

pub struct ConverterWriter<P: ProducerConsumer> {
    chain: P,
    cell: Rc<RefCell<PushBuffer<u16>>>,
    finished: bool,
}

impl<P: ProducerConsumer> ConverterWriter<P> {
    /// `cell` must be the cell the chain's input stage drains.
    pub fn new(chain: P, cell: Rc<RefCell<PushBuffer<u16>>>) -> Self {
        Self { chain, cell, finished: false }
    }

    pub fn chain_mut(&mut self) -> &mut P {
        &mut self.chain
    }

    pub fn write_utf16(&mut self, units: &[u16]) -> Result<()> {
        if self.finished {
            return Err(Error::Finished);
        }
        self.cell.borrow_mut().push(units);
        self.pump_down(PUSH_BACKLOG)
    }

    pub fn write_str(&mut self, text: &str) -> Result<()> {
        if self.finished {
            return Err(Error::Finished);
        }
        let mut staged: SmallVec<[u16; 128]> = SmallVec::new();
        for unit in text.encode_utf16() {
            staged.push(unit);
            if staged.len() == 128 {
                self.write_utf16(&staged)?;
                staged.clear();
            }
        }
        if !staged.is_empty() {
            self.write_utf16(&staged)?;
        }
        Ok(())
    }

    /// Marks end of input and drains the chain to completion.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::Finished);
        }
        self.cell.borrow_mut().finish();
        self.chain.flush()?;
        self.finished = true;
        Ok(())
    }

    fn pump_down(&mut self, bound: usize) -> Result<()> {
        let mut guard = PumpGuard::new(stall_ceiling(self.cell.borrow().len()));
        while self.cell.borrow().len() > bound {
            let progressed = self.chain.run()?;
            guard.note(progressed)?;
        }
        Ok(())
    }
}

impl<P: ProducerConsumer> TextWrite for ConverterWriter<P> {
    fn write_utf16(&mut self, units: &[u16]) -> io::Result<()> {
        ConverterWriter::write_utf16(self, units).map_err(io::Error::from)
    }

    fn flush_text(&mut self) -> io::Result<()> {
        self.pump_down(0).map_err(io::Error::from)
    }
}
