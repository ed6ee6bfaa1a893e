// Licensed under the Apache-2.0 license

//! # I2C Hardware Abstraction Traits
//!
//! Two peripheral families are supported, and each gets a small trait on top
//! of a shared core:
//!
//! ```text
//! I2cHardwareCore (init, bus recovery)
//!     ├── RegisterLevelHardware  (status code + data/control registers,
//!     │                          driven by the interrupt state machine)
//!     └── SequencedHardware      (address/ACK sequencing in hardware,
//!                                driven by bounded flag polling)
//!
//! TransactionEngine (hardware-independent contract of a driven bus)
//! ```
//!
//! Chip-family ports implement one of the hardware traits. The engines in
//! [`register_engine`](crate::i2c::register_engine) and
//! [`sequenced_engine`](crate::i2c::sequenced_engine) turn them into a
//! [`TransactionEngine`], which is all the arbitration layer sees.

use embedded_hal::i2c::SevenBitAddress;

use crate::common::Timeout;
use crate::i2c::common::{BusConfig, Frame, I2cError};
use crate::i2c::state_machine::ControlUpdate;

/// Core I2C hardware interface shared by every peripheral family.
pub trait I2cHardwareCore {
    /// Bring the peripheral up according to `config`: pins, bit rate, and
    /// the own slave address if one is configured.
    fn init(&mut self, config: &BusConfig);

    /// Force the bus back to idle after an abandoned transfer.
    ///
    /// Implementations typically issue STOP and clear every pending flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus is still held low afterwards.
    fn recover_bus(&mut self) -> Result<(), I2cError>;
}

/// Peripheral that reports every bus event as a status code and expects the
/// driver to answer through its data and control registers.
pub trait RegisterLevelHardware: I2cHardwareCore {
    /// Whether the peripheral is waiting for the driver (SI set).
    fn interrupt_pending(&self) -> bool;

    /// Raw status code of the current bus event.
    fn status(&self) -> u8;

    fn read_data(&self) -> u8;

    fn write_data(&mut self, byte: u8);

    /// Own slave address as held by the address register (wire format).
    fn own_address(&self) -> u8;

    /// Apply one control update; called exactly once per interrupt.
    fn write_control(&mut self, update: ControlUpdate);
}

/// Status flags of a peripheral-sequenced controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HwFlag {
    Busy,
    /// Transmit register empty, next byte may be written.
    TxEmpty,
    /// Soft-end transfer finished, the bus is held for a repeated START.
    TransferComplete,
    RxNotEmpty,
    StopDetected,
    Nack,
}

/// How a sequenced transfer ends once its byte count is reached.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EndMode {
    /// Hardware issues STOP.
    Auto,
    /// Hardware holds the bus and raises [`HwFlag::TransferComplete`].
    Software,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Write,
    Read,
}

/// Slave-side event reported by a sequenced controller's interrupt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlaveEvent {
    AddressMatch,
    ByteReceived(u8),
    Stop,
    Error,
}

/// Peripheral that sequences START, address and ACK handling itself.
pub trait SequencedHardware: I2cHardwareCore {
    fn flag(&self, flag: HwFlag) -> bool;

    /// Clear a sticky flag (`StopDetected`, `Nack`).
    fn clear_flag(&mut self, flag: HwFlag);

    /// Start a transfer of `count` bytes. Issued while the bus is held after a
    /// soft end, this produces a repeated START.
    fn begin_transfer(
        &mut self,
        address: SevenBitAddress,
        count: u8,
        end: EndMode,
        direction: Direction,
    );

    fn send_byte(&mut self, byte: u8);

    fn receive_byte(&mut self) -> u8;

    /// Mask or unmask the slave address-match and receive interrupts.
    fn set_slave_interrupts(&mut self, enabled: bool);

    /// Next pending slave event, if any.
    fn next_slave_event(&mut self) -> Option<SlaveEvent>;
}

/// Hardware-independent contract of one driven bus.
///
/// Implementations take `&self` and are shared between tasks and the
/// interrupt handler; serialising master transactions between tasks is the
/// job of the arbitration layer.
pub trait TransactionEngine {
    fn config(&self) -> &BusConfig;

    /// Write `bytes` to `address`.
    ///
    /// # Returns
    ///
    /// Number of bytes sent.
    ///
    /// # Errors
    ///
    /// Returns the NACK, timeout or length error that ended the transfer.
    fn write(&self, address: SevenBitAddress, bytes: &[u8]) -> Result<usize, I2cError>;

    /// Read `len` bytes from `address`.
    ///
    /// # Errors
    ///
    /// Returns the NACK, timeout or length error that ended the transfer.
    fn read(&self, address: SevenBitAddress, len: usize) -> Result<Frame, I2cError>;

    /// Write `bytes`, then read `len` bytes without releasing the bus.
    ///
    /// # Errors
    ///
    /// Returns the NACK, timeout or length error that ended the transfer.
    fn write_read(
        &self,
        address: SevenBitAddress,
        bytes: &[u8],
        len: usize,
    ) -> Result<Frame, I2cError>;

    /// Wait up to `timeout` for the next slave message.
    ///
    /// # Returns
    ///
    /// The message, or an empty frame on timeout.
    ///
    /// # Errors
    ///
    /// Implementations currently never fail; the `Result` keeps the contract
    /// uniform with the master operations.
    fn slave_receive(&self, timeout: Timeout) -> Result<Frame, I2cError>;

    /// Interrupt entry point for this bus.
    fn on_interrupt(&self);

    /// Slave messages dropped so far.
    fn slave_overflows(&self) -> u32;
}
