// Licensed under the Apache-2.0 license

//! # Bus arbitration
//!
//! Upper-layer drivers never talk to an engine directly. They look up a
//! logical bus (or a chip on it) in the [`BusRegistry`], which takes the
//! physical interface's lock, steers the interface's multiplexer if the
//! logical bus sits behind one, and hands back a [`BusHandle`]. The handle
//! carries the transaction API and releases the lock when it goes away.
//!
//! The registry is an arena of interfaces built at init from injected
//! [`BoardMap`] tables, so several independent registries can coexist (one
//! per test, for instance).
//!
//! Timeouts are reported, never retried here; retry policy belongs to the
//! caller.

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::SevenBitAddress;

use crate::common::{poll_until, Logger, NoOpLogger, Timeout};
use crate::i2c::common::{check_len, Frame, I2cError};
use crate::i2c::traits::TransactionEngine;

/// Physical interfaces one registry can hold.
pub const MAX_INTERFACES: usize = 8;

/// Bit that enables the selected channel of a PCA9544-style multiplexer.
pub const MUX_CHANNEL_ENABLE: u8 = 1 << 3;

const NO_CHANNEL: u8 = 0xFF;

/// Logical bus: a physical interface, optionally behind a mux channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BusMapping {
    pub bus_id: u8,
    pub interface: u8,
    pub mux_channel: Option<u8>,
    pub enabled: bool,
}

/// Where a logical chip lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChipMapping {
    pub chip_id: u8,
    pub bus_id: u8,
    pub address: SevenBitAddress,
}

/// How a multiplexer's control register encodes the channel to select.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MuxSelect {
    /// Channel number written as is.
    Raw,
    /// One bit per channel (PCA9546/PCA9548 switches).
    OneHot,
    /// Channel number plus [`MUX_CHANNEL_ENABLE`] (PCA9544 multiplexers).
    EnableBit,
}

impl MuxSelect {
    /// Control byte selecting `channel`.
    #[must_use]
    pub const fn encode(self, channel: u8) -> u8 {
        match self {
            Self::Raw => channel,
            // No bit set for a channel the switch does not have.
            Self::OneHot => match 1u8.checked_shl(channel as u32) {
                Some(bit) => bit,
                None => 0,
            },
            Self::EnableBit => channel | MUX_CHANNEL_ENABLE,
        }
    }
}

/// Multiplexer chip sitting on a physical interface.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MuxMapping {
    pub interface: u8,
    pub address: SevenBitAddress,
    pub select: MuxSelect,
}

/// Board-specific routing tables.
#[derive(Copy, Clone, Debug, Default)]
pub struct BoardMap<'a> {
    pub buses: &'a [BusMapping],
    pub chips: &'a [ChipMapping],
    pub muxes: &'a [MuxMapping],
}

/// Task-level mutual exclusion for one physical interface.
#[derive(Debug, Default)]
pub struct BusLock {
    locked: AtomicBool,
}

impl BusLock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Take the lock, waiting at most `timeout`. A zero timeout tries once.
    pub fn lock<D: DelayNs>(&self, timeout: Timeout, delay: &mut D) -> bool {
        poll_until(timeout, delay, || self.try_lock())
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

struct InterfaceSlot<'a> {
    engine: &'a (dyn TransactionEngine + Sync),
    lock: BusLock,
    /// Channel the interface's mux currently routes to.
    mux_channel: AtomicU8,
}

/// Exclusive access to one logical bus. Dropping it releases the bus.
pub struct BusHandle<'r> {
    slot: &'r InterfaceSlot<'r>,
    bus_id: u8,
}

impl BusHandle<'_> {
    #[must_use]
    pub fn bus_id(&self) -> u8 {
        self.bus_id
    }

    /// Physical interface the bus is routed through.
    #[must_use]
    pub fn interface(&self) -> u8 {
        self.slot.engine.config().id
    }

    /// Write `data` to `address`.
    ///
    /// # Returns
    ///
    /// Number of bytes sent.
    ///
    /// # Errors
    ///
    /// [`I2cError::MaxLengthExceeded`] for oversize `data`, otherwise the error
    /// that ended the transfer.
    pub fn master_write(&self, address: SevenBitAddress, data: &[u8]) -> Result<usize, I2cError> {
        check_len(data.len())?;
        self.slot.engine.write(address, data)
    }

    /// Read `len` bytes from `address`.
    ///
    /// # Errors
    ///
    /// [`I2cError::MaxLengthExceeded`] for oversize `len`, otherwise the error
    /// that ended the transfer.
    pub fn master_read(&self, address: SevenBitAddress, len: u8) -> Result<Frame, I2cError> {
        check_len(usize::from(len))?;
        self.slot.engine.read(address, usize::from(len))
    }

    /// Write the command byte `cmd`, then read `len` bytes without a STOP in
    /// between.
    ///
    /// # Errors
    ///
    /// [`I2cError::MaxLengthExceeded`] for oversize `len`, otherwise the error
    /// that ended the transfer.
    pub fn master_write_then_read(
        &self,
        address: SevenBitAddress,
        cmd: u8,
        len: u8,
    ) -> Result<Frame, I2cError> {
        self.write_read(address, &[cmd], usize::from(len))
    }

    /// General form of [`master_write_then_read`](Self::master_write_then_read).
    ///
    /// # Errors
    ///
    /// [`I2cError::MaxLengthExceeded`] if either phase is oversize, otherwise
    /// the error that ended the transfer.
    pub fn write_read(
        &self,
        address: SevenBitAddress,
        bytes: &[u8],
        len: usize,
    ) -> Result<Frame, I2cError> {
        check_len(bytes.len())?;
        check_len(len)?;
        self.slot.engine.write_read(address, bytes, len)
    }

    /// Wait up to `timeout` for a slave message on this bus's interface.
    ///
    /// # Errors
    ///
    /// Propagates engine errors; a timeout yields an empty frame instead.
    pub fn slave_receive(&self, timeout: Timeout) -> Result<Frame, I2cError> {
        self.slot.engine.slave_receive(timeout)
    }

    /// Give the bus back. Same as dropping the handle.
    pub fn release(self) {}
}

impl Drop for BusHandle<'_> {
    fn drop(&mut self) {
        self.slot.lock.unlock();
    }
}

/// Give the bus back.
pub fn release_bus(handle: BusHandle<'_>) {
    handle.release();
}

pub struct BusRegistry<'a, D, L: Logger = NoOpLogger> {
    slots: heapless::Vec<InterfaceSlot<'a>, MAX_INTERFACES>,
    map: BoardMap<'a>,
    delay: D,
    logger: L,
}

impl<'a, D, L> BusRegistry<'a, D, L>
where
    D: DelayNs + Clone,
    L: Logger,
{
    pub fn new(map: BoardMap<'a>, delay: D, logger: L) -> Self {
        Self {
            slots: heapless::Vec::new(),
            map,
            delay,
            logger,
        }
    }

    /// Add a driven interface. It is addressed by its configured id.
    ///
    /// # Errors
    ///
    /// [`I2cError::Failure`] if the id is already registered or the registry
    /// is full.
    pub fn register(&mut self, engine: &'a (dyn TransactionEngine + Sync)) -> Result<(), I2cError> {
        let id = engine.config().id;
        if self.slot(id).is_some() {
            return Err(I2cError::Failure);
        }
        self.slots
            .push(InterfaceSlot {
                engine,
                lock: BusLock::new(),
                mux_channel: AtomicU8::new(NO_CHANNEL),
            })
            .map_err(|_| I2cError::Failure)
    }

    #[must_use]
    pub fn board_map(&self) -> &BoardMap<'a> {
        &self.map
    }

    /// Look up a logical bus and take its interface.
    ///
    /// # Errors
    ///
    /// * [`I2cError::UnknownBus`] if `bus_id` or its interface is not known
    /// * [`I2cError::BusDisabled`] if the bus is mapped but disabled
    /// * [`I2cError::Timeout`] if the interface stayed busy for `timeout`
    /// * the mux write error if the channel could not be selected
    pub fn acquire_bus_by_bus_id(
        &self,
        bus_id: u8,
        timeout: Timeout,
    ) -> Result<BusHandle<'_>, I2cError> {
        let mapping = self
            .map
            .buses
            .iter()
            .find(|bus| bus.bus_id == bus_id)
            .ok_or(I2cError::UnknownBus)?;
        if !mapping.enabled {
            return Err(I2cError::BusDisabled);
        }
        let slot = self.slot(mapping.interface).ok_or(I2cError::UnknownBus)?;

        let mut delay = self.delay.clone();
        if !slot.lock.lock(timeout, &mut delay) {
            self.logger
                .debug(format_args!("bus {bus_id}: acquire timed out"));
            return Err(I2cError::Timeout);
        }
        let handle = BusHandle { slot, bus_id };
        if let Some(channel) = mapping.mux_channel {
            self.select_channel(slot, mapping.interface, channel)?;
        }
        Ok(handle)
    }

    /// Look up a logical chip, take its bus and resolve its address.
    ///
    /// # Errors
    ///
    /// [`I2cError::UnknownChip`] if `chip_id` is not mapped, otherwise as
    /// [`acquire_bus_by_bus_id`](Self::acquire_bus_by_bus_id).
    pub fn acquire_bus_by_chip_id(
        &self,
        chip_id: u8,
        timeout: Timeout,
    ) -> Result<(BusHandle<'_>, SevenBitAddress), I2cError> {
        let chip = self
            .map
            .chips
            .iter()
            .find(|chip| chip.chip_id == chip_id)
            .ok_or(I2cError::UnknownChip)?;
        let handle = self.acquire_bus_by_bus_id(chip.bus_id, timeout)?;
        Ok((handle, chip.address))
    }

    /// Wait for a slave message on the interface of `bus_id`.
    ///
    /// Slave reception does not take the bus lock, so a receiving task never
    /// holds off master traffic.
    ///
    /// # Errors
    ///
    /// [`I2cError::UnknownBus`] if the bus or its interface is not known.
    pub fn slave_receive(&self, bus_id: u8, timeout: Timeout) -> Result<Frame, I2cError> {
        let mapping = self
            .map
            .buses
            .iter()
            .find(|bus| bus.bus_id == bus_id)
            .ok_or(I2cError::UnknownBus)?;
        let slot = self.slot(mapping.interface).ok_or(I2cError::UnknownBus)?;
        slot.engine.slave_receive(timeout)
    }

    /// Route an interrupt to the engine of `interface`.
    pub fn on_interrupt(&self, interface: u8) {
        if let Some(slot) = self.slot(interface) {
            slot.engine.on_interrupt();
        }
    }

    fn slot(&self, interface: u8) -> Option<&InterfaceSlot<'a>> {
        self.slots
            .iter()
            .find(|slot| slot.engine.config().id == interface)
    }

    fn select_channel(
        &self,
        slot: &InterfaceSlot<'a>,
        interface: u8,
        channel: u8,
    ) -> Result<(), I2cError> {
        if slot.mux_channel.load(Ordering::Acquire) == channel {
            return Ok(());
        }
        let mux = self
            .map
            .muxes
            .iter()
            .find(|mux| mux.interface == interface)
            .ok_or(I2cError::UnknownBus)?;
        match slot.engine.write(mux.address, &[mux.select.encode(channel)]) {
            Ok(_) => {
                slot.mux_channel.store(channel, Ordering::Release);
                Ok(())
            }
            Err(err) => {
                slot.mux_channel.store(NO_CHANNEL, Ordering::Release);
                self.logger.warn(format_args!(
                    "i2c{interface}: mux channel {channel} select failed: {err}"
                ));
                Err(err)
            }
        }
    }
}
