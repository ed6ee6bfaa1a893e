// Licensed under the Apache-2.0 license

//! Polling engine for peripherals that sequence the protocol in hardware.
//!
//! Master operations are ordered wait-then-act steps. Each wait polls one
//! [`HwFlag`] at most `poll_retries` times and watches the NACK flag on the
//! way; the first failed wait aborts the operation. On an IPMB slave bus the
//! slave interrupts are masked for the duration of a master operation and
//! unmasked on every exit path.
//!
//! Slave writes are collected by the interrupt handler into a per-transfer
//! buffer and pushed into a [`SlaveQueue`] on STOP.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::SevenBitAddress;

use crate::common::{poll_until, Logger, NoOpLogger, Timeout};
use crate::i2c::common::{check_len, BusConfig, BusRole, Frame, I2cError, NackPhase};
use crate::i2c::slave_queue::SlaveQueue;
use crate::i2c::traits::{
    Direction, EndMode, HwFlag, SequencedHardware, SlaveEvent, TransactionEngine,
};

/// Slave-side counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SlaveStats {
    pub address_matches: u32,
    pub messages: u32,
    pub overflows: u32,
}

#[derive(Default)]
struct SlaveState {
    pending: Frame,
    overflowed: bool,
    queue: SlaveQueue,
    address_matches: u32,
    messages: u32,
}

impl SlaveState {
    fn reset_pending(&mut self) {
        self.pending.clear();
        self.overflowed = false;
    }

    /// Returns `true` if the event dropped a message.
    fn handle(&mut self, event: SlaveEvent) -> bool {
        match event {
            SlaveEvent::AddressMatch => {
                self.reset_pending();
                self.address_matches = self.address_matches.wrapping_add(1);
                false
            }
            SlaveEvent::ByteReceived(byte) => {
                if self.pending.push(byte).is_err() {
                    self.overflowed = true;
                }
                false
            }
            // STOP only finalises; bytes are accounted by `ByteReceived`.
            SlaveEvent::Stop => {
                let dropped = if self.pending.is_empty() {
                    false
                } else if self.overflowed {
                    self.queue.record_overflow();
                    true
                } else if self.queue.push(&self.pending) {
                    self.messages = self.messages.wrapping_add(1);
                    false
                } else {
                    true
                };
                self.reset_pending();
                dropped
            }
            SlaveEvent::Error => {
                self.reset_pending();
                false
            }
        }
    }
}

pub struct SequencedBus<H, D, L: Logger = NoOpLogger> {
    config: BusConfig,
    hw: Mutex<RefCell<H>>,
    slave: Mutex<RefCell<SlaveState>>,
    needs_recovery: AtomicBool,
    delay: D,
    logger: L,
}

impl<H, D, L> SequencedBus<H, D, L>
where
    H: SequencedHardware,
    D: DelayNs + Clone,
    L: Logger,
{
    /// Initialise `hardware` for `config` and wrap it.
    pub fn new(mut hardware: H, config: BusConfig, delay: D, logger: L) -> Self {
        hardware.init(&config);
        Self {
            config,
            hw: Mutex::new(RefCell::new(hardware)),
            slave: Mutex::new(RefCell::new(SlaveState::default())),
            needs_recovery: AtomicBool::new(false),
            delay,
            logger,
        }
    }

    /// Run `f` with exclusive access to the peripheral.
    pub fn with_hardware<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        critical_section::with(|cs| f(&mut self.hw.borrow_ref_mut(cs)))
    }

    #[must_use]
    pub fn needs_recovery(&self) -> bool {
        self.needs_recovery.load(Ordering::Acquire)
    }

    /// Force the bus back to idle.
    ///
    /// # Errors
    ///
    /// Returns the hardware's error if the bus could not be freed; the bus
    /// stays marked for recovery.
    pub fn recover(&self) -> Result<(), I2cError> {
        self.logger
            .warn(format_args!("i2c{}: recovering bus", self.config.id));
        self.with_hardware(|hw| hw.recover_bus()).inspect_err(|err| {
            self.logger.error(format_args!(
                "i2c{}: bus recovery failed: {}",
                self.config.id, err
            ));
        })?;
        self.needs_recovery.store(false, Ordering::Release);
        Ok(())
    }

    #[must_use]
    pub fn slave_stats(&self) -> SlaveStats {
        critical_section::with(|cs| {
            let slave = self.slave.borrow_ref(cs);
            SlaveStats {
                address_matches: slave.address_matches,
                messages: slave.messages,
                overflows: slave.queue.overflows(),
            }
        })
    }

    fn master<T>(
        &self,
        address: SevenBitAddress,
        op: impl FnOnce() -> Result<T, I2cError>,
    ) -> Result<T, I2cError> {
        if self.needs_recovery() {
            self.recover()?;
        }
        let mask_slave = self.config.role == BusRole::MasterAndIpmbSlave;
        if mask_slave {
            self.with_hardware(|hw| hw.set_slave_interrupts(false));
        }
        let result = op();
        if mask_slave {
            self.with_hardware(|hw| hw.set_slave_interrupts(true));
        }

        match result {
            Err(I2cError::Timeout) => {
                self.logger.warn(format_args!(
                    "i2c{}: {:#04x}: flag wait timed out",
                    self.config.id, address
                ));
                self.needs_recovery.store(true, Ordering::Release);
            }
            Err(err) => self.logger.debug(format_args!(
                "i2c{}: {:#04x}: {}",
                self.config.id, address, err
            )),
            Ok(_) => {}
        }
        result
    }

    fn poll_flag(&self, flag: HwFlag, state: bool, on_nack: I2cError) -> nb::Result<(), I2cError> {
        self.with_hardware(|hw| {
            if hw.flag(HwFlag::Nack) {
                hw.clear_flag(HwFlag::Nack);
                return Err(nb::Error::Other(on_nack));
            }
            if hw.flag(flag) == state {
                Ok(())
            } else {
                Err(nb::Error::WouldBlock)
            }
        })
    }

    fn wait_flag(&self, flag: HwFlag, state: bool, on_nack: I2cError) -> Result<(), I2cError> {
        let mut retries = self.config.poll_retries;
        loop {
            match self.poll_flag(flag, state, on_nack) {
                Ok(()) => return Ok(()),
                Err(nb::Error::Other(err)) => {
                    self.settle_after_nack();
                    return Err(err);
                }
                Err(nb::Error::WouldBlock) if retries == 0 => return Err(I2cError::Timeout),
                Err(nb::Error::WouldBlock) => {
                    retries -= 1;
                    core::hint::spin_loop();
                }
            }
        }
    }

    /// The STOP that follows a NACK is raised by the hardware some time after
    /// the NACK itself. Wait for it so it cannot satisfy the next transfer's
    /// final wait.
    fn settle_after_nack(&self) {
        let mut retries = self.config.poll_retries;
        while !self.with_hardware(|hw| hw.flag(HwFlag::StopDetected)) {
            if retries == 0 {
                self.logger
                    .warn(format_args!("i2c{}: no STOP after NACK", self.config.id));
                self.needs_recovery.store(true, Ordering::Release);
                break;
            }
            retries -= 1;
            core::hint::spin_loop();
        }
        self.with_hardware(|hw| {
            hw.clear_flag(HwFlag::StopDetected);
            hw.clear_flag(HwFlag::Nack);
        });
    }

    /// Wait for an idle bus and drop sticky flags left by earlier traffic.
    fn wait_idle(&self) -> Result<(), I2cError> {
        self.wait_flag(HwFlag::Busy, false, I2cError::Failure)?;
        self.with_hardware(|hw| {
            hw.clear_flag(HwFlag::StopDetected);
            hw.clear_flag(HwFlag::Nack);
        });
        Ok(())
    }

    /// Feed `bytes` to the transmitter. On success returns the error a NACK at
    /// the next milestone stands for.
    fn send_all(&self, bytes: &[u8]) -> Result<I2cError, I2cError> {
        let mut on_nack = I2cError::AddressNacked(NackPhase::Write);
        for &byte in bytes {
            self.wait_flag(HwFlag::TxEmpty, true, on_nack)?;
            self.with_hardware(|hw| hw.send_byte(byte));
            on_nack = I2cError::DataNacked;
        }
        Ok(on_nack)
    }

    fn receive_all(&self, len: u8) -> Result<Frame, I2cError> {
        let on_nack = I2cError::AddressNacked(NackPhase::Read);
        let mut frame = Frame::new();
        for _ in 0..len {
            self.wait_flag(HwFlag::RxNotEmpty, true, on_nack)?;
            let byte = self.with_hardware(|hw| hw.receive_byte());
            frame.push(byte).map_err(|_| I2cError::MaxLengthExceeded)?;
        }
        Ok(frame)
    }

    fn finish(&self, on_nack: I2cError) -> Result<(), I2cError> {
        self.wait_flag(HwFlag::StopDetected, true, on_nack)?;
        self.with_hardware(|hw| hw.clear_flag(HwFlag::StopDetected));
        Ok(())
    }

    fn write_sequence(&self, address: SevenBitAddress, bytes: &[u8]) -> Result<usize, I2cError> {
        let count = frame_count(bytes.len())?;
        self.wait_idle()?;
        self.with_hardware(|hw| hw.begin_transfer(address, count, EndMode::Auto, Direction::Write));
        let on_nack = self.send_all(bytes)?;
        self.finish(on_nack)?;
        Ok(bytes.len())
    }

    fn read_sequence(&self, address: SevenBitAddress, len: usize) -> Result<Frame, I2cError> {
        let count = frame_count(len)?;
        self.wait_idle()?;
        self.with_hardware(|hw| hw.begin_transfer(address, count, EndMode::Auto, Direction::Read));
        let frame = self.receive_all(count)?;
        self.finish(I2cError::AddressNacked(NackPhase::Read))?;
        Ok(frame)
    }

    fn write_read_sequence(
        &self,
        address: SevenBitAddress,
        bytes: &[u8],
        len: usize,
    ) -> Result<Frame, I2cError> {
        let tx_count = frame_count(bytes.len())?;
        let rx_count = frame_count(len)?;
        self.wait_idle()?;
        self.with_hardware(|hw| {
            hw.begin_transfer(address, tx_count, EndMode::Software, Direction::Write);
        });
        let on_nack = self.send_all(bytes)?;
        self.wait_flag(HwFlag::TransferComplete, true, on_nack)?;
        self.with_hardware(|hw| {
            hw.begin_transfer(address, rx_count, EndMode::Auto, Direction::Read);
        });
        let frame = self.receive_all(rx_count)?;
        self.finish(I2cError::AddressNacked(NackPhase::Read))?;
        Ok(frame)
    }

    fn pop_message(&self) -> Option<Frame> {
        critical_section::with(|cs| self.slave.borrow_ref_mut(cs).queue.pop())
    }
}

fn frame_count(len: usize) -> Result<u8, I2cError> {
    check_len(len)?;
    u8::try_from(len).map_err(|_| I2cError::MaxLengthExceeded)
}

impl<H, D, L> TransactionEngine for SequencedBus<H, D, L>
where
    H: SequencedHardware,
    D: DelayNs + Clone,
    L: Logger,
{
    fn config(&self) -> &BusConfig {
        &self.config
    }

    fn write(&self, address: SevenBitAddress, bytes: &[u8]) -> Result<usize, I2cError> {
        check_len(bytes.len())?;
        self.master(address, || self.write_sequence(address, bytes))
    }

    fn read(&self, address: SevenBitAddress, len: usize) -> Result<Frame, I2cError> {
        check_len(len)?;
        self.master(address, || self.read_sequence(address, len))
    }

    fn write_read(
        &self,
        address: SevenBitAddress,
        bytes: &[u8],
        len: usize,
    ) -> Result<Frame, I2cError> {
        check_len(bytes.len())?;
        check_len(len)?;
        self.master(address, || self.write_read_sequence(address, bytes, len))
    }

    fn slave_receive(&self, timeout: Timeout) -> Result<Frame, I2cError> {
        let mut delay = self.delay.clone();
        let mut message = None;
        poll_until(timeout, &mut delay, || {
            message = self.pop_message();
            message.is_some()
        });
        Ok(message.unwrap_or_default())
    }

    fn on_interrupt(&self) {
        while let Some(event) = self.with_hardware(|hw| hw.next_slave_event()) {
            let dropped = critical_section::with(|cs| self.slave.borrow_ref_mut(cs).handle(event));
            if dropped {
                self.logger
                    .warn(format_args!("i2c{}: slave message dropped", self.config.id));
            }
        }
    }

    fn slave_overflows(&self) -> u32 {
        critical_section::with(|cs| self.slave.borrow_ref(cs).queue.overflows())
    }
}
