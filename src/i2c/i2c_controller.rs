// Licensed under the Apache-2.0 license

//! embedded-hal adapter over an acquired bus.
//!
//! Lets ecosystem device drivers run on a [`BusHandle`] for as long as the
//! handle is held. Only operation shapes that map onto a single engine
//! transaction are accepted: a write, a read, or a write followed by a read.

use embedded_hal::i2c::{Operation, SevenBitAddress};

use crate::i2c::arbitration::BusHandle;
use crate::i2c::common::{check_len, Frame, I2cError};

pub struct I2cController<'r> {
    handle: BusHandle<'r>,
}

impl<'r> I2cController<'r> {
    #[must_use]
    pub fn new(handle: BusHandle<'r>) -> Self {
        Self { handle }
    }

    #[must_use]
    pub fn handle(&self) -> &BusHandle<'r> {
        &self.handle
    }

    /// Give the handle back, keeping the bus acquired.
    #[must_use]
    pub fn into_handle(self) -> BusHandle<'r> {
        self.handle
    }
}

fn fill(buffer: &mut [u8], frame: &Frame) {
    for (dst, src) in buffer.iter_mut().zip(frame.iter()) {
        *dst = *src;
    }
}

impl embedded_hal::i2c::ErrorType for I2cController<'_> {
    type Error = I2cError;
}

impl embedded_hal::i2c::I2c for I2cController<'_> {
    fn read(&mut self, addr: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Self::Error> {
        check_len(buffer.len())?;
        let len = u8::try_from(buffer.len()).map_err(|_| I2cError::MaxLengthExceeded)?;
        let frame = self.handle.master_read(addr, len)?;
        fill(buffer, &frame);
        Ok(())
    }

    fn write(&mut self, addr: SevenBitAddress, bytes: &[u8]) -> Result<(), Self::Error> {
        self.handle.master_write(addr, bytes).map(|_| ())
    }

    fn write_read(
        &mut self,
        addr: SevenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        let frame = self.handle.write_read(addr, bytes, buffer.len())?;
        fill(buffer, &frame);
        Ok(())
    }

    fn transaction(
        &mut self,
        addr: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        match operations {
            [] => Ok(()),
            [Operation::Write(bytes)] => self.write(addr, bytes),
            [Operation::Read(buffer)] => self.read(addr, buffer),
            [Operation::Write(bytes), Operation::Read(buffer)] => {
                self.write_read(addr, bytes, buffer)
            }
            _ => Err(I2cError::Unsupported),
        }
    }
}
