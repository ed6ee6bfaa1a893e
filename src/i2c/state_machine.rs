// Licensed under the Apache-2.0 license

//! Byte-level protocol engine for register-level I2C peripherals.
//!
//! Peripherals of this family raise one interrupt per bus event and report
//! what happened as a status code. [`step`] maps the status code plus the
//! current master transfer and slave receiver onto the next action: a byte
//! for the data register, a single [`ControlUpdate`] for the control
//! register, and an optional notification. It performs no I/O, so it can be
//! driven with synthetic status values.
//!
//! ## Control register
//!
//! Every step starts from "clear everything" (`AA | SI | STO | STA`) and
//! removes the flags it wants asserted. Asserting STO also asserts AA so the
//! interface stays addressable once the bus is released. The result is
//! written once, at the end of the step, as a set mask plus a clear mask.

use embedded_hal::i2c::SevenBitAddress;

use crate::i2c::common::{
    check_len, frame_from, wire_address, BusRole, Frame, I2cError, NackPhase,
};

/// Assert acknowledge.
pub const AA: u8 = 1 << 2;
/// Interrupt flag; always cleared to let the peripheral continue.
pub const SI: u8 = 1 << 3;
pub const STO: u8 = 1 << 4;
pub const STA: u8 = 1 << 5;
pub const CONTROL_MASK: u8 = AA | SI | STO | STA;

/// Hardware status codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusStatus {
    BusError,
    Start,
    RepeatedStart,
    AddrWriteAcked,
    AddrWriteNacked,
    DataSentAcked,
    DataSentNacked,
    ArbitrationLost,
    AddrReadAcked,
    AddrReadNacked,
    DataRecvAcked,
    DataRecvNacked,
    SlaveAddrWriteAcked,
    ArbLostSlaveAddrWriteAcked,
    SlaveDataRecvAcked,
    SlaveDataRecvNacked,
    SlaveStopOrRepeatedStart,
    Idle,
    /// Codes this engine does not act on (general call, slave transmit).
    Other(u8),
}

impl BusStatus {
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => BusStatus::BusError,
            0x08 => BusStatus::Start,
            0x10 => BusStatus::RepeatedStart,
            0x18 => BusStatus::AddrWriteAcked,
            0x20 => BusStatus::AddrWriteNacked,
            0x28 => BusStatus::DataSentAcked,
            0x30 => BusStatus::DataSentNacked,
            0x38 => BusStatus::ArbitrationLost,
            0x40 => BusStatus::AddrReadAcked,
            0x48 => BusStatus::AddrReadNacked,
            0x50 => BusStatus::DataRecvAcked,
            0x58 => BusStatus::DataRecvNacked,
            0x60 => BusStatus::SlaveAddrWriteAcked,
            0x68 => BusStatus::ArbLostSlaveAddrWriteAcked,
            0x80 => BusStatus::SlaveDataRecvAcked,
            0x88 => BusStatus::SlaveDataRecvNacked,
            0xA0 => BusStatus::SlaveStopOrRepeatedStart,
            0xF8 => BusStatus::Idle,
            other => BusStatus::Other(other),
        }
    }

    #[must_use]
    pub const fn raw(self) -> u8 {
        match self {
            BusStatus::BusError => 0x00,
            BusStatus::Start => 0x08,
            BusStatus::RepeatedStart => 0x10,
            BusStatus::AddrWriteAcked => 0x18,
            BusStatus::AddrWriteNacked => 0x20,
            BusStatus::DataSentAcked => 0x28,
            BusStatus::DataSentNacked => 0x30,
            BusStatus::ArbitrationLost => 0x38,
            BusStatus::AddrReadAcked => 0x40,
            BusStatus::AddrReadNacked => 0x48,
            BusStatus::DataRecvAcked => 0x50,
            BusStatus::DataRecvNacked => 0x58,
            BusStatus::SlaveAddrWriteAcked => 0x60,
            BusStatus::ArbLostSlaveAddrWriteAcked => 0x68,
            BusStatus::SlaveDataRecvAcked => 0x80,
            BusStatus::SlaveDataRecvNacked => 0x88,
            BusStatus::SlaveStopOrRepeatedStart => 0xA0,
            BusStatus::Idle => 0xF8,
            BusStatus::Other(raw) => raw,
        }
    }

    /// Status codes that only occur while this interface is bus master.
    #[must_use]
    pub const fn is_master(self) -> bool {
        matches!(
            self,
            BusStatus::Start
                | BusStatus::RepeatedStart
                | BusStatus::AddrWriteAcked
                | BusStatus::AddrWriteNacked
                | BusStatus::DataSentAcked
                | BusStatus::DataSentNacked
                | BusStatus::ArbitrationLost
                | BusStatus::AddrReadAcked
                | BusStatus::AddrReadNacked
                | BusStatus::DataRecvAcked
                | BusStatus::DataRecvNacked
        )
    }
}

/// One write of the control register: flags in `set` are asserted, flags in
/// `clear` are released. The two masks never overlap.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ControlUpdate {
    pub set: u8,
    pub clear: u8,
}

impl ControlUpdate {
    /// Request a START condition on an idle bus.
    #[must_use]
    pub const fn start() -> Self {
        Self {
            set: STA,
            clear: SI | STO,
        }
    }

    /// Release the bus and return to the not-addressed slave state.
    #[must_use]
    pub const fn stop() -> Self {
        Self {
            set: STO | AA,
            clear: SI | STA,
        }
    }

    #[must_use]
    pub const fn requests_stop(&self) -> bool {
        self.set & STO != 0
    }

    #[must_use]
    pub const fn requests_start(&self) -> bool {
        self.set & STA != 0
    }

    #[must_use]
    pub const fn acks(&self) -> bool {
        self.set & AA != 0
    }
}

/// Accumulates the flags one step wants asserted.
struct ControlFlags {
    clear: u8,
}

impl ControlFlags {
    fn new() -> Self {
        Self {
            clear: CONTROL_MASK,
        }
    }

    fn assert(&mut self, flag: u8) {
        self.clear &= !flag;
    }

    fn finish(self) -> ControlUpdate {
        let mut clear = self.clear;
        if clear & STO == 0 {
            clear &= !AA;
        }
        ControlUpdate {
            set: clear ^ CONTROL_MASK,
            clear,
        }
    }
}

/// One master operation in flight.
///
/// Created by the calling task, owned by the interrupt path while the bus is
/// busy and handed back once a result has been recorded.
#[derive(Clone, Debug)]
pub struct Transfer {
    address: SevenBitAddress,
    tx: Frame,
    tx_count: usize,
    rx: Frame,
    rx_len: usize,
    result: Option<Result<(), I2cError>>,
}

impl Transfer {
    /// # Errors
    ///
    /// Returns [`I2cError::MaxLengthExceeded`] if `bytes` does not fit a frame.
    pub fn write(address: SevenBitAddress, bytes: &[u8]) -> Result<Self, I2cError> {
        Self::write_read(address, bytes, 0)
    }

    /// # Errors
    ///
    /// Returns [`I2cError::MaxLengthExceeded`] if `len` does not fit a frame.
    pub fn read(address: SevenBitAddress, len: usize) -> Result<Self, I2cError> {
        Self::write_read(address, &[], len)
    }

    /// Write `bytes`, then read `len` bytes after a repeated START.
    ///
    /// # Errors
    ///
    /// Returns [`I2cError::MaxLengthExceeded`] if either phase does not fit a
    /// frame.
    pub fn write_read(
        address: SevenBitAddress,
        bytes: &[u8],
        len: usize,
    ) -> Result<Self, I2cError> {
        check_len(len)?;
        Ok(Self {
            address,
            tx: frame_from(bytes)?,
            tx_count: 0,
            rx: Frame::new(),
            rx_len: len,
            result: None,
        })
    }

    #[must_use]
    pub fn address(&self) -> SevenBitAddress {
        self.address
    }

    /// Number of data bytes the target acknowledged or accepted so far.
    #[must_use]
    pub fn sent(&self) -> usize {
        self.tx_count
    }

    #[must_use]
    pub fn received(&self) -> &[u8] {
        &self.rx
    }

    #[must_use]
    pub fn into_received(self) -> Frame {
        self.rx
    }

    #[must_use]
    pub fn result(&self) -> Option<Result<(), I2cError>> {
        self.result
    }

    fn begin(&mut self, fresh: bool) {
        if fresh {
            self.tx_count = 0;
        }
        self.rx.clear();
    }

    fn wants_read_address(&self) -> bool {
        self.tx_count == self.tx.len() && self.rx_len > 0
    }

    fn next_tx_byte(&mut self) -> Option<u8> {
        let byte = self.tx.get(self.tx_count).copied()?;
        self.tx_count += 1;
        Some(byte)
    }

    fn store(&mut self, byte: u8) {
        if self.rx.len() < self.rx_len {
            let _ = self.rx.push(byte);
        }
    }

    fn rx_remaining(&self) -> usize {
        self.rx_len.saturating_sub(self.rx.len())
    }

    fn finish(&mut self, result: Result<(), I2cError>) {
        if self.result.is_none() {
            self.result = Some(result);
        }
    }
}

/// Bytes of the slave write currently being received.
#[derive(Clone, Debug, Default)]
pub struct SlaveReceiver {
    buf: Frame,
    overflowed: bool,
}

impl SlaveReceiver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.overflowed = false;
    }

    /// Returns `false` once the buffer is full.
    fn store(&mut self, byte: u8) -> bool {
        if self.buf.push(byte).is_err() {
            self.overflowed = true;
            return false;
        }
        !self.buf.is_full()
    }

    fn finish(&mut self, role: BusRole) -> Notify {
        let (minimum, skip) = match role {
            BusRole::MasterOnly => (1, 0),
            BusRole::MasterAndIpmbSlave => (2, 1),
        };
        let notify = if self.overflowed {
            Notify::SlaveOverflow
        } else if self.buf.len() >= minimum {
            let payload = self.buf.get(skip..).unwrap_or_default();
            frame_from(payload).map_or(Notify::SlaveOverflow, Notify::SlaveMessage)
        } else {
            Notify::None
        };
        self.reset();
        notify
    }
}

/// What the hardware reported when the interrupt fired.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StepInput {
    pub status: BusStatus,
    /// Content of the data register.
    pub data: u8,
    /// Own slave address as held by the address register (wire format).
    pub own_address: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notify {
    None,
    /// The master transfer has a result.
    MasterDone,
    /// A complete slave write, with the IPMB address byte already removed.
    SlaveMessage(Frame),
    /// A slave write was dropped because it did not fit a frame.
    SlaveOverflow,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepOutcome {
    /// Byte to load into the data register before the control write.
    pub data_out: Option<u8>,
    pub control: ControlUpdate,
    pub notify: Notify,
}

/// Advance the engine by one hardware event.
///
/// Master status codes are only honoured while `master` holds a transfer;
/// without one the bus is released with STOP. Slave codes are handled in
/// either role.
pub fn step(
    input: StepInput,
    role: BusRole,
    master: Option<&mut Transfer>,
    slave: &mut SlaveReceiver,
) -> StepOutcome {
    let mut flags = ControlFlags::new();
    let mut data_out = None;
    let mut notify = Notify::None;

    match (input.status, master) {
        (status, None) if status.is_master() => flags.assert(STO),
        (BusStatus::Start, Some(t)) | (BusStatus::RepeatedStart, Some(t)) => {
            t.begin(input.status == BusStatus::Start);
            data_out = Some(wire_address(t.address, t.wants_read_address()));
        }
        (BusStatus::AddrWriteAcked, Some(t)) | (BusStatus::DataSentAcked, Some(t)) => {
            if let Some(byte) = t.next_tx_byte() {
                data_out = Some(byte);
            } else if t.rx_len > 0 {
                flags.assert(STA);
            } else {
                flags.assert(STO);
                t.finish(Ok(()));
                notify = Notify::MasterDone;
            }
        }
        (BusStatus::AddrWriteNacked, Some(t)) => {
            flags.assert(STO);
            t.finish(Err(I2cError::AddressNacked(NackPhase::Write)));
            notify = Notify::MasterDone;
        }
        (BusStatus::DataSentNacked, Some(t)) => {
            flags.assert(STO);
            t.finish(Err(I2cError::DataNacked));
            notify = Notify::MasterDone;
        }
        (BusStatus::AddrReadAcked, Some(t)) => {
            if t.rx_len > 1 {
                flags.assert(AA);
            }
        }
        (BusStatus::AddrReadNacked, Some(t)) => {
            flags.assert(STO);
            t.finish(Err(I2cError::AddressNacked(NackPhase::Read)));
            notify = Notify::MasterDone;
        }
        (BusStatus::DataRecvAcked, Some(t)) => {
            t.store(input.data);
            if t.rx_remaining() > 1 {
                flags.assert(AA);
            }
        }
        (BusStatus::DataRecvNacked, Some(t)) => {
            t.store(input.data);
            flags.assert(STO);
            t.finish(Ok(()));
            notify = Notify::MasterDone;
        }
        (BusStatus::ArbitrationLost, Some(t)) => {
            flags.assert(AA);
            t.finish(Err(I2cError::Failure));
            notify = Notify::MasterDone;
        }
        (BusStatus::SlaveAddrWriteAcked, _) | (BusStatus::ArbLostSlaveAddrWriteAcked, None) => {
            begin_slave(input, role, slave);
            flags.assert(AA);
        }
        (BusStatus::ArbLostSlaveAddrWriteAcked, Some(t)) => {
            t.finish(Err(I2cError::Failure));
            notify = Notify::MasterDone;
            begin_slave(input, role, slave);
            flags.assert(AA);
        }
        (BusStatus::SlaveDataRecvAcked, _) => {
            if slave.store(input.data) {
                flags.assert(AA);
            }
        }
        (BusStatus::SlaveDataRecvNacked, _) => {
            slave.overflowed = true;
            flags.assert(AA);
        }
        (BusStatus::SlaveStopOrRepeatedStart, _) => {
            notify = slave.finish(role);
            flags.assert(AA);
        }
        (BusStatus::BusError, _) => {
            slave.reset();
            flags.assert(STO);
        }
        // Idle, unsupported codes, and master codes without a transfer,
        // which the guarded first arm already handled.
        _ => {}
    }

    StepOutcome {
        data_out,
        control: flags.finish(),
        notify,
    }
}

fn begin_slave(input: StepInput, role: BusRole, slave: &mut SlaveReceiver) {
    slave.reset();
    if role == BusRole::MasterAndIpmbSlave {
        slave.store(input.own_address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWN: u8 = 0x72;

    fn input(status: BusStatus, data: u8) -> StepInput {
        StepInput {
            status,
            data,
            own_address: OWN,
        }
    }

    fn run_master(t: &mut Transfer, status: BusStatus, data: u8) -> StepOutcome {
        let mut slave = SlaveReceiver::new();
        step(input(status, data), BusRole::MasterOnly, Some(t), &mut slave)
    }

    fn run_slave(
        role: BusRole,
        slave: &mut SlaveReceiver,
        status: BusStatus,
        data: u8,
    ) -> StepOutcome {
        step(input(status, data), role, None, slave)
    }

    #[test]
    fn status_codes_round_trip() {
        for raw in [0x08, 0x10, 0x18, 0x20, 0x28, 0x30, 0x38, 0x40, 0x48, 0x50, 0x58] {
            let status = BusStatus::from_raw(raw);
            assert!(status.is_master(), "{raw:#04x}");
            assert_eq!(status.raw(), raw);
        }
        assert_eq!(BusStatus::from_raw(0x70), BusStatus::Other(0x70));
        assert!(!BusStatus::SlaveDataRecvAcked.is_master());
    }

    #[test]
    fn every_control_write_is_consistent() {
        let mut t = Transfer::write_read(0x50, &[1, 2], 3).unwrap();
        let mut slave = SlaveReceiver::new();
        for raw in 0..=0xFFu8 {
            let status = BusStatus::from_raw(raw);
            let out = step(
                input(status, 0x55),
                BusRole::MasterAndIpmbSlave,
                Some(&mut t),
                &mut slave,
            );
            let c = out.control;
            assert_eq!(c.set & c.clear, 0);
            assert_eq!(c.set | c.clear, CONTROL_MASK);
            assert_ne!(c.clear & SI, 0);
            if c.requests_stop() {
                assert!(c.acks());
            }
        }
    }

    #[test]
    fn master_write_sends_all_bytes_then_stops() {
        let mut t = Transfer::write(0x50, &[0x10, 0x20]).unwrap();
        let out = run_master(&mut t, BusStatus::Start, 0);
        assert_eq!(out.data_out, Some(0xA0));
        assert!(!out.control.requests_start());

        let out = run_master(&mut t, BusStatus::AddrWriteAcked, 0);
        assert_eq!(out.data_out, Some(0x10));
        let out = run_master(&mut t, BusStatus::DataSentAcked, 0);
        assert_eq!(out.data_out, Some(0x20));
        assert_eq!(out.notify, Notify::None);

        let out = run_master(&mut t, BusStatus::DataSentAcked, 0);
        assert_eq!(out.data_out, None);
        assert!(out.control.requests_stop());
        assert_eq!(out.notify, Notify::MasterDone);
        assert_eq!(t.result(), Some(Ok(())));
        assert_eq!(t.sent(), 2);
    }

    #[test]
    fn zero_length_write_stops_after_address() {
        let mut t = Transfer::write(0x50, &[]).unwrap();
        let out = run_master(&mut t, BusStatus::Start, 0);
        assert_eq!(out.data_out, Some(0xA0));
        let out = run_master(&mut t, BusStatus::AddrWriteAcked, 0);
        assert!(out.control.requests_stop());
        assert_eq!(out.notify, Notify::MasterDone);
    }

    #[test]
    fn address_nack_fails_without_sending_data() {
        let mut t = Transfer::write(0x50, &[1, 2, 3]).unwrap();
        run_master(&mut t, BusStatus::Start, 0);
        let out = run_master(&mut t, BusStatus::AddrWriteNacked, 0);
        assert_eq!(out.data_out, None);
        assert!(out.control.requests_stop());
        assert_eq!(out.notify, Notify::MasterDone);
        assert_eq!(t.result(), Some(Err(I2cError::AddressNacked(NackPhase::Write))));
        assert_eq!(t.sent(), 0);
    }

    #[test]
    fn data_nack_is_reported() {
        let mut t = Transfer::write(0x50, &[1, 2, 3]).unwrap();
        run_master(&mut t, BusStatus::Start, 0);
        run_master(&mut t, BusStatus::AddrWriteAcked, 0);
        let out = run_master(&mut t, BusStatus::DataSentNacked, 0);
        assert!(out.control.requests_stop());
        assert_eq!(t.result(), Some(Err(I2cError::DataNacked)));
    }

    #[test]
    fn read_nacks_only_the_final_byte() {
        let mut t = Transfer::read(0x50, 3).unwrap();
        let out = run_master(&mut t, BusStatus::Start, 0);
        assert_eq!(out.data_out, Some(0xA1));

        assert!(run_master(&mut t, BusStatus::AddrReadAcked, 0).control.acks());
        assert!(run_master(&mut t, BusStatus::DataRecvAcked, 0xAA).control.acks());
        // Second byte stored, one left: NACK the next.
        assert!(!run_master(&mut t, BusStatus::DataRecvAcked, 0xBB).control.acks());

        let out = run_master(&mut t, BusStatus::DataRecvNacked, 0xCC);
        assert!(out.control.requests_stop());
        assert_eq!(out.notify, Notify::MasterDone);
        assert_eq!(t.received(), &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn single_byte_read_nacks_immediately() {
        let mut t = Transfer::read(0x50, 1).unwrap();
        run_master(&mut t, BusStatus::Start, 0);
        assert!(!run_master(&mut t, BusStatus::AddrReadAcked, 0).control.acks());
        run_master(&mut t, BusStatus::DataRecvNacked, 0x42);
        assert_eq!(t.received(), &[0x42]);
    }

    #[test]
    fn address_nack_on_read() {
        let mut t = Transfer::read(0x50, 2).unwrap();
        run_master(&mut t, BusStatus::Start, 0);
        run_master(&mut t, BusStatus::AddrReadNacked, 0);
        assert_eq!(t.result(), Some(Err(I2cError::AddressNacked(NackPhase::Read))));
    }

    #[test]
    fn write_read_uses_repeated_start() {
        let mut t = Transfer::write_read(0x50, &[0x00], 2).unwrap();
        assert_eq!(run_master(&mut t, BusStatus::Start, 0).data_out, Some(0xA0));
        assert_eq!(run_master(&mut t, BusStatus::AddrWriteAcked, 0).data_out, Some(0x00));

        let out = run_master(&mut t, BusStatus::DataSentAcked, 0);
        assert!(out.control.requests_start());
        assert!(!out.control.requests_stop());
        assert_eq!(out.notify, Notify::None);

        let out = run_master(&mut t, BusStatus::RepeatedStart, 0);
        assert_eq!(out.data_out, Some(0xA1));
        assert!(!out.control.requests_start());
        run_master(&mut t, BusStatus::AddrReadAcked, 0);
        run_master(&mut t, BusStatus::DataRecvAcked, 1);
        run_master(&mut t, BusStatus::DataRecvNacked, 2);
        assert_eq!(t.received(), &[1, 2]);
        assert_eq!(t.sent(), 1);
    }

    #[test]
    fn master_codes_without_transfer_release_the_bus() {
        let mut slave = SlaveReceiver::new();
        let out = step(input(BusStatus::DataSentAcked, 0), BusRole::MasterOnly, None, &mut slave);
        assert!(out.control.requests_stop());
        assert_eq!(out.notify, Notify::None);
    }

    #[test]
    fn arbitration_loss_fails_transfer() {
        let mut t = Transfer::write(0x50, &[1]).unwrap();
        run_master(&mut t, BusStatus::Start, 0);
        let out = run_master(&mut t, BusStatus::ArbitrationLost, 0);
        assert_eq!(out.notify, Notify::MasterDone);
        assert!(!out.control.requests_stop());
        assert_eq!(t.result(), Some(Err(I2cError::Failure)));
    }

    #[test]
    fn bus_error_stops_without_notification() {
        let mut t = Transfer::write(0x50, &[1]).unwrap();
        let out = run_master(&mut t, BusStatus::BusError, 0);
        assert!(out.control.requests_stop());
        assert_eq!(out.notify, Notify::None);
        assert_eq!(t.result(), None);
    }

    #[test]
    fn plain_slave_delivers_payload() {
        let mut slave = SlaveReceiver::new();
        let role = BusRole::MasterOnly;
        assert!(run_slave(role, &mut slave, BusStatus::SlaveAddrWriteAcked, OWN).control.acks());
        for byte in [1, 2, 3] {
            let out = run_slave(role, &mut slave, BusStatus::SlaveDataRecvAcked, byte);
            assert!(out.control.acks());
        }
        let out = run_slave(role, &mut slave, BusStatus::SlaveStopOrRepeatedStart, 0);
        assert_eq!(out.notify, Notify::SlaveMessage(frame_from(&[1, 2, 3]).unwrap()));
        assert!(slave.is_empty());
    }

    #[test]
    fn plain_slave_ignores_empty_write() {
        let mut slave = SlaveReceiver::new();
        run_slave(BusRole::MasterOnly, &mut slave, BusStatus::SlaveAddrWriteAcked, OWN);
        let out = run_slave(
            BusRole::MasterOnly,
            &mut slave,
            BusStatus::SlaveStopOrRepeatedStart,
            0,
        );
        assert_eq!(out.notify, Notify::None);
    }

    #[test]
    fn ipmb_slave_strips_address_byte() {
        let mut slave = SlaveReceiver::new();
        let role = BusRole::MasterAndIpmbSlave;
        run_slave(role, &mut slave, BusStatus::SlaveAddrWriteAcked, OWN);
        assert_eq!(slave.len(), 1);
        for byte in [0x18, 0xC8, 0x20] {
            run_slave(role, &mut slave, BusStatus::SlaveDataRecvAcked, byte);
        }
        let out = run_slave(role, &mut slave, BusStatus::SlaveStopOrRepeatedStart, 0);
        assert_eq!(out.notify, Notify::SlaveMessage(frame_from(&[0x18, 0xC8, 0x20]).unwrap()));
    }

    #[test]
    fn ipmb_slave_needs_more_than_the_address() {
        let mut slave = SlaveReceiver::new();
        let role = BusRole::MasterAndIpmbSlave;
        run_slave(role, &mut slave, BusStatus::ArbLostSlaveAddrWriteAcked, OWN);
        let out = run_slave(role, &mut slave, BusStatus::SlaveStopOrRepeatedStart, 0);
        assert_eq!(out.notify, Notify::None);
    }

    #[test]
    fn slave_overflow_is_reported_not_delivered() {
        let mut slave = SlaveReceiver::new();
        let role = BusRole::MasterOnly;
        run_slave(role, &mut slave, BusStatus::SlaveAddrWriteAcked, OWN);
        let mut last = None;
        for byte in 0..32u8 {
            last = Some(run_slave(role, &mut slave, BusStatus::SlaveDataRecvAcked, byte));
        }
        // The buffer is full: the next byte is refused.
        assert!(!last.unwrap().control.acks());
        run_slave(role, &mut slave, BusStatus::SlaveDataRecvNacked, 0xFF);
        let out = run_slave(role, &mut slave, BusStatus::SlaveStopOrRepeatedStart, 0);
        assert_eq!(out.notify, Notify::SlaveOverflow);
    }

    #[test]
    fn losing_arbitration_to_own_address_fails_master_and_starts_slave() {
        let mut t = Transfer::write(0x50, &[1]).unwrap();
        let mut slave = SlaveReceiver::new();
        let out = step(
            input(BusStatus::ArbLostSlaveAddrWriteAcked, OWN),
            BusRole::MasterAndIpmbSlave,
            Some(&mut t),
            &mut slave,
        );
        assert_eq!(out.notify, Notify::MasterDone);
        assert_eq!(t.result(), Some(Err(I2cError::Failure)));
        assert_eq!(slave.len(), 1);
    }
}
