// Licensed under the Apache-2.0 license

//! Common types and constants for the I2C transaction engine.
//!
//! This module provides shared definitions for error handling, bus
//! configuration, and protocol utilities used by both hardware back-ends and
//! the arbitration layer.

use core::fmt;

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource, SevenBitAddress};

use crate::common::Timeout;

/// Largest message a single transaction may carry, in either direction.
pub const MAX_MSG_LEN: usize = 32;

/// Owned transaction payload, bounded by [`MAX_MSG_LEN`].
pub type Frame = heapless::Vec<u8, MAX_MSG_LEN>;

pub const DEFAULT_TRANSFER_TIMEOUT_MS: u32 = 100;
pub const DEFAULT_POLL_RETRIES: u32 = 10_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum I2cSpeed {
    Standard = 100_000,
    Fast = 400_000,
    FastPlus = 1_000_000,
}

/// What a physical interface is used for.
///
/// A `MasterOnly` bus still delivers unsolicited writes if the hardware was
/// given an own address; an IPMB slave bus additionally keeps the address
/// byte as the first byte of every received message.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusRole {
    MasterOnly,
    MasterAndIpmbSlave,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PinAssignment {
    pub sda: u8,
    pub scl: u8,
    /// Alternate function selector for both pins.
    pub function: u8,
}

/// Static description of one physical interface.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BusConfig {
    pub id: u8,
    pub speed: I2cSpeed,
    pub role: BusRole,
    /// 7-bit address the interface answers to in slave mode.
    pub own_address: Option<SevenBitAddress>,
    pub pins: PinAssignment,
    pub irq: u16,
    /// Upper bound on an interrupt-driven master transfer.
    pub transfer_timeout: Timeout,
    /// Upper bound on each flag wait of a peripheral-sequenced transfer.
    pub poll_retries: u32,
}

pub struct BusConfigBuilder {
    id: u8,
    speed: I2cSpeed,
    role: BusRole,
    own_address: Option<SevenBitAddress>,
    pins: PinAssignment,
    irq: u16,
    transfer_timeout: Timeout,
    poll_retries: u32,
}

impl Default for BusConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BusConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: 0,
            speed: I2cSpeed::Standard,
            role: BusRole::MasterOnly,
            own_address: None,
            pins: PinAssignment::default(),
            irq: 0,
            transfer_timeout: Timeout::millis(DEFAULT_TRANSFER_TIMEOUT_MS),
            poll_retries: DEFAULT_POLL_RETRIES,
        }
    }
    #[must_use]
    pub fn id(mut self, id: u8) -> Self {
        self.id = id;
        self
    }
    #[must_use]
    pub fn speed(mut self, speed: I2cSpeed) -> Self {
        self.speed = speed;
        self
    }
    #[must_use]
    pub fn role(mut self, role: BusRole) -> Self {
        self.role = role;
        self
    }
    #[must_use]
    pub fn own_address(mut self, address: SevenBitAddress) -> Self {
        self.own_address = Some(address & 0x7F);
        self
    }
    #[must_use]
    pub fn pins(mut self, pins: PinAssignment) -> Self {
        self.pins = pins;
        self
    }
    #[must_use]
    pub fn irq(mut self, irq: u16) -> Self {
        self.irq = irq;
        self
    }
    #[must_use]
    pub fn transfer_timeout(mut self, timeout: Timeout) -> Self {
        self.transfer_timeout = timeout;
        self
    }
    #[must_use]
    pub fn poll_retries(mut self, retries: u32) -> Self {
        self.poll_retries = retries;
        self
    }
    #[must_use]
    pub fn build(self) -> BusConfig {
        BusConfig {
            id: self.id,
            speed: self.speed,
            role: self.role,
            own_address: self.own_address,
            pins: self.pins,
            irq: self.irq,
            transfer_timeout: self.transfer_timeout,
            poll_retries: self.poll_retries,
        }
    }
}

/// Phase in which a target refused its address.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NackPhase {
    Write,
    Read,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum I2cError {
    /// Unspecified failure, including lost arbitration.
    Failure,
    AddressNacked(NackPhase),
    DataNacked,
    MaxLengthExceeded,
    Timeout,
    UnknownBus,
    UnknownChip,
    BusDisabled,
    /// The requested operation shape cannot be expressed as one transaction.
    Unsupported,
}

impl fmt::Display for I2cError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            I2cError::Failure => f.write_str("bus failure"),
            I2cError::AddressNacked(NackPhase::Write) => f.write_str("address nacked (write)"),
            I2cError::AddressNacked(NackPhase::Read) => f.write_str("address nacked (read)"),
            I2cError::DataNacked => f.write_str("data nacked"),
            I2cError::MaxLengthExceeded => f.write_str("message exceeds frame limit"),
            I2cError::Timeout => f.write_str("timeout"),
            I2cError::UnknownBus => f.write_str("unknown bus"),
            I2cError::UnknownChip => f.write_str("unknown chip"),
            I2cError::BusDisabled => f.write_str("bus disabled"),
            I2cError::Unsupported => f.write_str("unsupported operation"),
        }
    }
}

impl embedded_hal::i2c::Error for I2cError {
    fn kind(&self) -> ErrorKind {
        match self {
            I2cError::AddressNacked(_) => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            I2cError::DataNacked => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            _ => ErrorKind::Other,
        }
    }
}

/// Address byte as it appears on the wire: `(address << 1) | read`.
#[must_use]
pub const fn wire_address(address: SevenBitAddress, read: bool) -> u8 {
    ((address & 0x7F) << 1) | read as u8
}

/// Copy `bytes` into a [`Frame`].
///
/// # Errors
///
/// Returns [`I2cError::MaxLengthExceeded`] if `bytes` does not fit a frame.
pub fn frame_from(bytes: &[u8]) -> Result<Frame, I2cError> {
    Frame::from_slice(bytes).map_err(|()| I2cError::MaxLengthExceeded)
}

/// Reject lengths that do not fit a frame.
///
/// # Errors
///
/// Returns [`I2cError::MaxLengthExceeded`] if `len` exceeds [`MAX_MSG_LEN`].
pub fn check_len(len: usize) -> Result<(), I2cError> {
    if len > MAX_MSG_LEN {
        Err(I2cError::MaxLengthExceeded)
    } else {
        Ok(())
    }
}
