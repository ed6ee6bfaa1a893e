// Licensed under the Apache-2.0 license

//! IPMB transport over an arbitrated bus.
//!
//! Outgoing messages are written with `master_write`, retried a bounded
//! number of times, each attempt holding the bus only for its own transfer.
//! Incoming messages arrive through `slave_receive` without their leading
//! address byte; it is put back before the frame is verified.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::delay::DelayNs;

use crate::common::{Logger, NoOpLogger, Timeout};
use crate::i2c::arbitration::BusRegistry;
use crate::i2c::common::{Frame, I2cError};
use crate::ipmb::message::{IpmbError, IpmiMessage, SEQ_MASK};

/// Retries after the first attempt.
pub const IPMB_MAX_RETRIES: u8 = 3;

/// A response must arrive within this time of its request.
pub const IPMB_MSG_TIMEOUT: Timeout = Timeout::millis(250);

pub const DEFAULT_ACQUIRE_TIMEOUT: Timeout = Timeout::millis(100);

/// Millisecond time source.
pub trait Monotonic {
    /// Milliseconds since an arbitrary origin; allowed to wrap.
    fn now_ms(&self) -> u32;
}

#[derive(Copy, Clone)]
struct Outstanding {
    seq: u8,
    sent_at_ms: u32,
}

#[derive(Default)]
struct TransportState {
    next_seq: u8,
    outstanding: Option<Outstanding>,
    /// Requester address and sequence of the last delivered request.
    last_request: Option<(u8, u8)>,
}

pub struct IpmbTransport<'r, 'a, D, RL: Logger, M, L: Logger = NoOpLogger> {
    registry: &'r BusRegistry<'a, D, RL>,
    bus_id: u8,
    own_address: u8,
    acquire_timeout: Timeout,
    state: Mutex<RefCell<TransportState>>,
    clock: M,
    logger: L,
}

impl<'r, 'a, D, RL, M, L> IpmbTransport<'r, 'a, D, RL, M, L>
where
    D: DelayNs + Clone,
    RL: Logger,
    M: Monotonic,
    L: Logger,
{
    /// IPMB endpoint on logical bus `bus_id`.
    ///
    /// # Arguments
    ///
    /// * `own_address` - Own IPMB address in wire format (even)
    pub fn new(
        registry: &'r BusRegistry<'a, D, RL>,
        bus_id: u8,
        own_address: u8,
        clock: M,
        logger: L,
    ) -> Self {
        Self {
            registry,
            bus_id,
            own_address,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            state: Mutex::new(RefCell::new(TransportState::default())),
            clock,
            logger,
        }
    }

    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Timeout) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    #[must_use]
    pub fn own_address(&self) -> u8 {
        self.own_address
    }

    /// Stamp `request` with our address and the next sequence number and send
    /// it.
    ///
    /// # Returns
    ///
    /// The stamped message as sent.
    ///
    /// # Errors
    ///
    /// [`IpmbError::Bus`] carrying the last failure once every attempt has
    /// failed, or [`IpmbError::TooLong`].
    pub fn send_request(&self, request: &IpmiMessage) -> Result<IpmiMessage, IpmbError> {
        let seq = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let seq = state.next_seq;
            state.next_seq = (seq + 1) & SEQ_MASK;
            seq
        });
        let mut stamped = request.clone();
        stamped.netfn &= !1;
        stamped.src_addr = self.own_address;
        stamped.src_lun = 0;
        stamped.seq = seq;

        let sent_at_ms = self.clock.now_ms();
        self.transmit(&stamped)?;
        critical_section::with(|cs| {
            self.state.borrow_ref_mut(cs).outstanding = Some(Outstanding { seq, sent_at_ms });
        });
        Ok(stamped)
    }

    /// Answer `request` with `completion_code` and `data`.
    ///
    /// # Errors
    ///
    /// [`IpmbError::Bus`] carrying the last failure once every attempt has
    /// failed, or [`IpmbError::TooLong`].
    pub fn send_response(
        &self,
        request: &IpmiMessage,
        completion_code: u8,
        data: &[u8],
    ) -> Result<IpmiMessage, IpmbError> {
        let response = request.response(completion_code, data)?;
        self.transmit(&response)?;
        Ok(response)
    }

    /// Wait up to `timeout` for the next message for us.
    ///
    /// # Returns
    ///
    /// `Ok(None)` if nothing arrived, or if the frame was a stale or unmatched
    /// response or a repeated request.
    ///
    /// # Errors
    ///
    /// Framing errors of the received frame, or the bus lookup error.
    pub fn receive(&self, timeout: Timeout) -> Result<Option<IpmiMessage>, IpmbError> {
        let payload = self.registry.slave_receive(self.bus_id, timeout)?;
        if payload.is_empty() {
            return Ok(None);
        }
        let mut frame = Frame::new();
        frame
            .push(self.own_address)
            .map_err(|_| IpmbError::TooLong)?;
        frame
            .extend_from_slice(&payload)
            .map_err(|()| IpmbError::TooLong)?;

        let message = IpmiMessage::decode(&frame).inspect_err(|err| {
            self.logger
                .debug(format_args!("ipmb: dropping frame: {err}"));
        })?;

        let accepted = if message.is_response() {
            self.accept_response(&message)
        } else {
            self.accept_request(&message)
        };
        Ok(accepted.then_some(message))
    }

    fn accept_response(&self, message: &IpmiMessage) -> bool {
        let now = self.clock.now_ms();
        let accepted = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            match state.outstanding {
                Some(req)
                    if req.seq == message.seq
                        && now.wrapping_sub(req.sent_at_ms) < IPMB_MSG_TIMEOUT.ticks() =>
                {
                    state.outstanding = None;
                    true
                }
                _ => false,
            }
        });
        if !accepted {
            self.logger.debug(format_args!(
                "ipmb: discarding response seq {} cmd {:#04x}",
                message.seq, message.cmd
            ));
        }
        accepted
    }

    fn accept_request(&self, message: &IpmiMessage) -> bool {
        let key = (message.src_addr, message.seq);
        let fresh = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.last_request == Some(key) {
                false
            } else {
                state.last_request = Some(key);
                true
            }
        });
        if !fresh {
            self.logger.debug(format_args!(
                "ipmb: discarding repeated request seq {} from {:#04x}",
                message.seq, message.src_addr
            ));
        }
        fresh
    }

    fn transmit(&self, message: &IpmiMessage) -> Result<(), IpmbError> {
        let frame = message.encode()?;
        // The destination address goes out as the I2C address byte.
        let body = frame.get(1..).unwrap_or_default();
        let target = message.dest_addr >> 1;

        let mut last_err = I2cError::Failure;
        for attempt in 0..=IPMB_MAX_RETRIES {
            match self.attempt(target, body) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    self.logger.debug(format_args!(
                        "ipmb: attempt {} to {:#04x} failed: {err}",
                        attempt + 1,
                        message.dest_addr
                    ));
                    last_err = err;
                }
            }
        }
        self.logger.warn(format_args!(
            "ipmb: giving up on cmd {:#04x} to {:#04x}: {last_err}",
            message.cmd, message.dest_addr
        ));
        Err(IpmbError::Bus(last_err))
    }

    fn attempt(&self, target: u8, body: &[u8]) -> Result<(), I2cError> {
        let bus = self
            .registry
            .acquire_bus_by_bus_id(self.bus_id, self.acquire_timeout)?;
        let written = bus.master_write(target, body)?;
        bus.release();
        if written < body.len() {
            return Err(I2cError::Failure);
        }
        Ok(())
    }
}
