//! Per-opener cursor over a shared [`QuantumDevice`].
//!
//! A handle carries its own position; many handles may address the same
//! device concurrently (serialised by the device lock). The handle also
//! implements `std::io::{Read, Write, Seek}` so it plugs into generic
//! byte-stream code — note that a hole reads as 0 bytes, which generic
//! readers will treat as end-of-stream.

use std::io::{self, SeekFrom};
use std::sync::Arc;

use crate::error::{DevError, Result};
use crate::store::quantum::QuantumDevice;

pub struct StoreHandle {
    dev: Arc<QuantumDevice>,
    pos: u64,
}

impl StoreHandle {
    pub(crate) fn new(dev: Arc<QuantumDevice>) -> Self {
        StoreHandle { dev, pos: 0 }
    }

    /// The device this handle addresses.
    pub fn device(&self) -> &Arc<QuantumDevice> {
        &self.dev
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Read at the cursor and advance it. Clamped to one quantum per call.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.dev.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Write at the cursor and advance it. Clamped to one quantum per call.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let n = self.dev.write_at(self.pos, data)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Move the cursor. Seeking past the end is allowed; writing there
    /// leaves a hole. A negative resulting position is an error and leaves
    /// the cursor unchanged.
    pub fn seek(&mut self, whence: SeekFrom) -> Result<u64> {
        let new = match whence {
            SeekFrom::Start(off) => i128::from(off),
            SeekFrom::Current(delta) => i128::from(self.pos) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.dev.len()) + i128::from(delta),
        };
        if new < 0 || new > i128::from(u64::MAX) {
            return Err(DevError::InvalidArgument(format!(
                "seek resolves to out-of-range position {new}"
            )));
        }
        self.pos = new as u64;
        Ok(self.pos)
    }
}

impl io::Read for StoreHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        StoreHandle::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for StoreHandle {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        StoreHandle::write(self, data).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for StoreHandle {
    fn seek(&mut self, whence: SeekFrom) -> io::Result<u64> {
        StoreHandle::seek(self, whence).map_err(io::Error::from)
    }
}
