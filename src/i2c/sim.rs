// Licensed under the Apache-2.0 license

//! Simulated peripherals for host tests.
//!
//! [`SimRegisterHw`] reacts to control writes the way a status-code
//! peripheral does, [`SimSequencedHw`] models a flag-sequenced controller, and
//! both talk to one [`SimDevice`]: an EEPROM-like target whose first written
//! byte selects a register pointer.

use std::cell::Cell;
use std::collections::VecDeque;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::SevenBitAddress;

use crate::i2c::common::{wire_address, BusConfig, I2cError};
use crate::i2c::state_machine::{ControlUpdate, AA, SI, STA, STO};
use crate::i2c::traits::{
    Direction, EndMode, HwFlag, I2cHardwareCore, RegisterLevelHardware, SequencedHardware,
    SlaveEvent,
};

const IDLE: u8 = 0xF8;

#[derive(Clone, Copy, Debug, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

/// What happened on the simulated wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusEvent {
    Start,
    RepeatedStart,
    Address(u8),
    Data(u8),
    ReadByte { byte: u8, acked: bool },
    Stop,
    Recovered,
}

#[derive(Clone, Debug)]
pub struct SimDevice {
    pub address: SevenBitAddress,
    pub registers: [u8; 256],
    pub nack_address: bool,
    /// Refuse data once this many bytes have been written in total.
    pub nack_data_after: Option<usize>,
    pub written: Vec<u8>,
    pointer: u8,
    pointer_set: bool,
}

impl SimDevice {
    pub fn new(address: SevenBitAddress) -> Self {
        Self {
            address,
            registers: core::array::from_fn(|i| (i as u8) ^ 0x5A),
            nack_address: false,
            nack_data_after: None,
            written: Vec::new(),
            pointer: 0,
            pointer_set: false,
        }
    }

    pub fn acks_address(&self, address: SevenBitAddress) -> bool {
        address == self.address && !self.nack_address
    }

    fn begin_write(&mut self) {
        self.pointer_set = false;
    }

    fn accept(&mut self, byte: u8) -> bool {
        if self
            .nack_data_after
            .is_some_and(|limit| self.written.len() >= limit)
        {
            return false;
        }
        self.written.push(byte);
        if self.pointer_set {
            self.registers[usize::from(self.pointer)] = byte;
            self.pointer = self.pointer.wrapping_add(1);
        } else {
            self.pointer = byte;
            self.pointer_set = true;
        }
        true
    }

    fn next_read_byte(&mut self) -> u8 {
        let byte = self.registers[usize::from(self.pointer)];
        self.pointer = self.pointer.wrapping_add(1);
        byte
    }
}

/// Status-code peripheral.
pub struct SimRegisterHw {
    pub device: SimDevice,
    pub events: Vec<BusEvent>,
    /// Every control write, with the status code it answered.
    pub control_writes: Vec<(u8, ControlUpdate)>,
    pub recoveries: usize,
    /// When set, recovery cannot free the bus.
    pub sda_stuck: bool,
    /// When cleared, a requested START is never answered.
    pub responsive: bool,
    status: u8,
    pending: bool,
    data: u8,
    data_written: bool,
    control: u8,
    own_address: u8,
}

impl SimRegisterHw {
    pub fn new(device: SimDevice) -> Self {
        Self {
            device,
            events: Vec::new(),
            control_writes: Vec::new(),
            recoveries: 0,
            sda_stuck: false,
            responsive: true,
            status: IDLE,
            pending: false,
            data: 0,
            data_written: false,
            control: 0,
            own_address: 0,
        }
    }

    /// Raise a slave-side status code as if another master drove the bus.
    pub fn inject(&mut self, status: u8, data: u8) {
        self.status = status;
        self.data = data;
        self.pending = true;
    }

    pub fn status_code(&self) -> u8 {
        self.status
    }

    fn raise(&mut self, status: u8) {
        self.status = status;
        self.pending = true;
    }

    fn stop(&mut self) {
        self.events.push(BusEvent::Stop);
        self.control &= !STO;
        self.status = IDLE;
    }

    fn repeated_start(&mut self) {
        self.events.push(BusEvent::RepeatedStart);
        self.raise(0x10);
    }

    fn advance(&mut self) {
        let written = core::mem::take(&mut self.data_written);
        let sta = self.control & STA != 0;
        let sto = self.control & STO != 0;
        let aa = self.control & AA != 0;
        match self.status {
            IDLE => {
                if sta && self.responsive {
                    self.events.push(BusEvent::Start);
                    self.raise(0x08);
                }
            }
            0x08 | 0x10 if written => {
                let byte = self.data;
                self.events.push(BusEvent::Address(byte));
                let read = byte & 1 == 1;
                let ack = self.device.acks_address(byte >> 1);
                if ack && !read {
                    self.device.begin_write();
                }
                self.raise(match (read, ack) {
                    (false, true) => 0x18,
                    (false, false) => 0x20,
                    (true, true) => 0x40,
                    (true, false) => 0x48,
                });
            }
            0x18 | 0x28 => {
                if sto {
                    self.stop();
                } else if sta {
                    self.repeated_start();
                } else if written {
                    self.events.push(BusEvent::Data(self.data));
                    let ack = self.device.accept(self.data);
                    self.raise(if ack { 0x28 } else { 0x30 });
                }
            }
            0x20 | 0x30 | 0x48 | 0x58 | 0x38 => {
                if sto {
                    self.stop();
                } else if sta {
                    self.repeated_start();
                } else {
                    self.status = IDLE;
                }
            }
            0x40 | 0x50 => {
                if sto {
                    self.stop();
                } else {
                    let byte = self.device.next_read_byte();
                    self.data = byte;
                    self.events.push(BusEvent::ReadByte { byte, acked: aa });
                    self.raise(if aa { 0x50 } else { 0x58 });
                }
            }
            0x00 => {
                if sto {
                    self.control &= !STO;
                    self.status = IDLE;
                }
            }
            0xA0 => self.status = IDLE,
            _ => {}
        }
    }
}

impl I2cHardwareCore for SimRegisterHw {
    fn init(&mut self, config: &BusConfig) {
        self.own_address = config.own_address.map_or(0, |address| address << 1);
    }

    fn recover_bus(&mut self) -> Result<(), I2cError> {
        self.recoveries += 1;
        if self.sda_stuck {
            return Err(I2cError::Failure);
        }
        self.events.push(BusEvent::Recovered);
        self.status = IDLE;
        self.pending = false;
        self.control = 0;
        Ok(())
    }
}

impl RegisterLevelHardware for SimRegisterHw {
    fn interrupt_pending(&self) -> bool {
        self.pending
    }

    fn status(&self) -> u8 {
        self.status
    }

    fn read_data(&self) -> u8 {
        self.data
    }

    fn write_data(&mut self, byte: u8) {
        self.data = byte;
        self.data_written = true;
    }

    fn own_address(&self) -> u8 {
        self.own_address
    }

    fn write_control(&mut self, update: ControlUpdate) {
        self.control_writes.push((self.status, update));
        self.control |= update.set;
        self.control &= !update.clear;
        if self.pending && update.clear & SI != 0 {
            self.pending = false;
            self.advance();
        } else if !self.pending && self.status == IDLE {
            self.advance();
        }
    }
}

/// Flag-sequenced peripheral.
pub struct SimSequencedHw {
    pub device: SimDevice,
    pub events: Vec<BusEvent>,
    pub slave_events: VecDeque<SlaveEvent>,
    /// Every slave interrupt mask change, `true` meaning enabled.
    pub slave_irq_log: Vec<bool>,
    pub sent_bytes: usize,
    pub stuck_busy: bool,
    pub recoveries: usize,
    /// When set, recovery cannot free the bus.
    pub sda_stuck: bool,
    /// Polls between a NACK and the STOP that follows it.
    pub stop_lag: u32,
    /// When set, STOP goes out but the STOP-detected flag never rises.
    pub withhold_stop: bool,
    slave_irqs: bool,
    holding: bool,
    end: EndMode,
    remaining: u8,
    rx_byte: u8,
    tx_empty: bool,
    transfer_complete: bool,
    rx_not_empty: bool,
    stop_detected: Cell<bool>,
    stop_countdown: Cell<u32>,
    nack: bool,
}

impl SimSequencedHw {
    pub fn new(device: SimDevice) -> Self {
        Self {
            device,
            events: Vec::new(),
            slave_events: VecDeque::new(),
            slave_irq_log: Vec::new(),
            sent_bytes: 0,
            stuck_busy: false,
            recoveries: 0,
            sda_stuck: false,
            stop_lag: 0,
            withhold_stop: false,
            slave_irqs: true,
            holding: false,
            end: EndMode::Auto,
            remaining: 0,
            rx_byte: 0,
            tx_empty: false,
            transfer_complete: false,
            rx_not_empty: false,
            stop_detected: Cell::new(false),
            stop_countdown: Cell::new(0),
            nack: false,
        }
    }

    /// Queue the slave events of one write from another master.
    pub fn inject_slave_write(&mut self, bytes: &[u8]) {
        self.slave_events.push_back(SlaveEvent::AddressMatch);
        for &byte in bytes {
            self.slave_events.push_back(SlaveEvent::ByteReceived(byte));
        }
        self.slave_events.push_back(SlaveEvent::Stop);
    }

    pub fn slave_interrupts_enabled(&self) -> bool {
        self.slave_irqs
    }

    fn stop_now(&mut self) {
        self.events.push(BusEvent::Stop);
        self.stop_detected.set(!self.withhold_stop);
        self.holding = false;
        self.tx_empty = false;
    }

    /// NACK followed by STOP, the STOP flag rising `stop_lag` polls later.
    fn nack_now(&mut self) {
        self.nack = true;
        self.stop_now();
        if self.stop_lag > 0 {
            self.stop_detected.set(false);
            self.stop_countdown.set(self.stop_lag);
        }
    }

    fn tick(&self) {
        let remaining = self.stop_countdown.get();
        if remaining > 0 {
            self.stop_countdown.set(remaining - 1);
            if remaining == 1 {
                self.stop_detected.set(true);
            }
        }
    }

    fn finish(&mut self) {
        match self.end {
            EndMode::Auto => self.stop_now(),
            EndMode::Software => {
                self.transfer_complete = true;
                self.holding = true;
            }
        }
    }

    fn load_rx(&mut self) {
        if self.remaining > 0 {
            self.rx_byte = self.device.next_read_byte();
            self.rx_not_empty = true;
        } else {
            self.finish();
        }
    }
}

impl I2cHardwareCore for SimSequencedHw {
    fn init(&mut self, _config: &BusConfig) {}

    fn recover_bus(&mut self) -> Result<(), I2cError> {
        self.recoveries += 1;
        if self.sda_stuck {
            return Err(I2cError::Failure);
        }
        self.events.push(BusEvent::Recovered);
        self.stuck_busy = false;
        self.holding = false;
        self.tx_empty = false;
        self.transfer_complete = false;
        self.rx_not_empty = false;
        self.stop_detected.set(false);
        self.stop_countdown.set(0);
        self.nack = false;
        Ok(())
    }
}

impl SequencedHardware for SimSequencedHw {
    fn flag(&self, flag: HwFlag) -> bool {
        self.tick();
        match flag {
            HwFlag::Busy => self.stuck_busy,
            HwFlag::TxEmpty => self.tx_empty,
            HwFlag::TransferComplete => self.transfer_complete,
            HwFlag::RxNotEmpty => self.rx_not_empty,
            HwFlag::StopDetected => self.stop_detected.get(),
            HwFlag::Nack => self.nack,
        }
    }

    fn clear_flag(&mut self, flag: HwFlag) {
        match flag {
            HwFlag::StopDetected => self.stop_detected.set(false),
            HwFlag::Nack => self.nack = false,
            _ => {}
        }
    }

    fn begin_transfer(
        &mut self,
        address: SevenBitAddress,
        count: u8,
        end: EndMode,
        direction: Direction,
    ) {
        let event = if self.holding {
            BusEvent::RepeatedStart
        } else {
            BusEvent::Start
        };
        self.events.push(event);
        self.holding = false;
        self.transfer_complete = false;
        let read = direction == Direction::Read;
        self.events.push(BusEvent::Address(wire_address(address, read)));
        self.end = end;
        self.remaining = count;
        if !self.device.acks_address(address) {
            self.nack_now();
            return;
        }
        match direction {
            Direction::Write => {
                self.device.begin_write();
                if count > 0 {
                    self.tx_empty = true;
                } else {
                    self.finish();
                }
            }
            Direction::Read => self.load_rx(),
        }
    }

    fn send_byte(&mut self, byte: u8) {
        self.sent_bytes += 1;
        self.tx_empty = false;
        self.events.push(BusEvent::Data(byte));
        if !self.device.accept(byte) {
            self.nack_now();
            return;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            self.tx_empty = true;
        } else {
            self.finish();
        }
    }

    fn receive_byte(&mut self) -> u8 {
        self.rx_not_empty = false;
        let byte = self.rx_byte;
        self.remaining = self.remaining.saturating_sub(1);
        self.events.push(BusEvent::ReadByte {
            byte,
            acked: self.remaining > 0,
        });
        self.load_rx();
        byte
    }

    fn set_slave_interrupts(&mut self, enabled: bool) {
        self.slave_irqs = enabled;
        self.slave_irq_log.push(enabled);
    }

    fn next_slave_event(&mut self) -> Option<SlaveEvent> {
        if self.slave_irqs {
            self.slave_events.pop_front()
        } else {
            None
        }
    }
}
