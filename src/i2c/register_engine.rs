// Licensed under the Apache-2.0 license

//! Interrupt-driven engine for register-level peripherals.
//!
//! A master operation places a [`Transfer`] in the shared state, arms the
//! master [`Completion`], requests START and blocks on the completion. The
//! interrupt handler ([`TransactionEngine::on_interrupt`]) feeds each status
//! code through [`step`] until the transfer carries a result, then signals.
//!
//! Slave writes are assembled by the same handler. The latest complete
//! message waits in a one-deep mailbox until [`TransactionEngine::slave_receive`]
//! picks it up; a message that replaces an unread one counts as an overflow.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use critical_section::Mutex;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::SevenBitAddress;

use crate::common::{Logger, NoOpLogger, Timeout};
use crate::i2c::common::{BusConfig, Frame, I2cError};
use crate::i2c::completion::Completion;
use crate::i2c::state_machine::{
    step, BusStatus, ControlUpdate, Notify, SlaveReceiver, StepInput, Transfer,
};
use crate::i2c::traits::{RegisterLevelHardware, TransactionEngine};

struct EngineState<H> {
    hw: H,
    transfer: Option<Transfer>,
    slave: SlaveReceiver,
    mailbox: Option<Frame>,
}

pub struct RegisterLevelBus<H, D, L: Logger = NoOpLogger> {
    config: BusConfig,
    state: Mutex<RefCell<EngineState<H>>>,
    master_done: Completion,
    slave_ready: Completion,
    needs_recovery: AtomicBool,
    slave_overflows: AtomicU32,
    delay: D,
    logger: L,
}

impl<H, D, L> RegisterLevelBus<H, D, L>
where
    H: RegisterLevelHardware,
    D: DelayNs + Clone,
    L: Logger,
{
    /// Initialise `hardware` for `config` and wrap it.
    pub fn new(mut hardware: H, config: BusConfig, delay: D, logger: L) -> Self {
        hardware.init(&config);
        let bus = Self {
            config,
            state: Mutex::new(RefCell::new(EngineState {
                hw: hardware,
                transfer: None,
                slave: SlaveReceiver::new(),
                mailbox: None,
            })),
            master_done: Completion::new(),
            slave_ready: Completion::new(),
            needs_recovery: AtomicBool::new(false),
            slave_overflows: AtomicU32::new(0),
            delay,
            logger,
        };
        bus.slave_ready.arm();
        bus
    }

    /// Run `f` with exclusive access to the peripheral.
    pub fn with_hardware<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs).hw))
    }

    /// Force the bus back to idle and drop any abandoned transfer.
    ///
    /// # Errors
    ///
    /// Returns the hardware's error if the bus could not be freed; the bus
    /// stays marked for recovery.
    pub fn recover(&self) -> Result<(), I2cError> {
        self.logger.warn(format_args!("i2c{}: recovering bus", self.config.id));
        let result = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.transfer = None;
            state.hw.recover_bus()
        });
        self.master_done.disarm();
        if let Err(err) = result {
            self.logger.error(format_args!(
                "i2c{}: bus recovery failed: {}",
                self.config.id, err
            ));
            return Err(err);
        }
        self.needs_recovery.store(false, Ordering::Release);
        Ok(())
    }

    #[must_use]
    pub fn needs_recovery(&self) -> bool {
        self.needs_recovery.load(Ordering::Acquire)
    }

    fn execute(&self, transfer: Transfer) -> Result<Transfer, I2cError> {
        if self.needs_recovery() {
            self.recover()?;
        }
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.transfer.is_some() {
                return Err(I2cError::Failure);
            }
            state.transfer = Some(transfer);
            self.master_done.arm();
            state.hw.write_control(ControlUpdate::start());
            Ok(())
        })?;

        let mut delay = self.delay.clone();
        // The recorded result decides; a signal that lands just after the
        // wait gave up still counts as completion.
        self.master_done
            .wait(self.config.transfer_timeout, &mut delay);
        let transfer = critical_section::with(|cs| self.state.borrow_ref_mut(cs).transfer.take());
        self.master_done.disarm();

        let transfer = transfer.ok_or(I2cError::Failure)?;
        match transfer.result() {
            Some(Ok(())) => Ok(transfer),
            Some(Err(err)) => {
                self.logger.debug(format_args!(
                    "i2c{}: {:#04x}: {}",
                    self.config.id,
                    transfer.address(),
                    err
                ));
                Err(err)
            }
            None => {
                self.logger.warn(format_args!(
                    "i2c{}: {:#04x}: transfer timed out",
                    self.config.id,
                    transfer.address()
                ));
                self.needs_recovery.store(true, Ordering::Release);
                Err(I2cError::Timeout)
            }
        }
    }

    fn take_message(&self) -> Option<Frame> {
        critical_section::with(|cs| {
            let message = self.state.borrow_ref_mut(cs).mailbox.take();
            if message.is_some() {
                self.slave_ready.arm();
            }
            message
        })
    }
}

impl<H, D, L> TransactionEngine for RegisterLevelBus<H, D, L>
where
    H: RegisterLevelHardware,
    D: DelayNs + Clone,
    L: Logger,
{
    fn config(&self) -> &BusConfig {
        &self.config
    }

    fn write(&self, address: SevenBitAddress, bytes: &[u8]) -> Result<usize, I2cError> {
        let transfer = self.execute(Transfer::write(address, bytes)?)?;
        Ok(transfer.sent())
    }

    fn read(&self, address: SevenBitAddress, len: usize) -> Result<Frame, I2cError> {
        let transfer = self.execute(Transfer::read(address, len)?)?;
        Ok(transfer.into_received())
    }

    fn write_read(
        &self,
        address: SevenBitAddress,
        bytes: &[u8],
        len: usize,
    ) -> Result<Frame, I2cError> {
        let transfer = self.execute(Transfer::write_read(address, bytes, len)?)?;
        Ok(transfer.into_received())
    }

    fn slave_receive(&self, timeout: Timeout) -> Result<Frame, I2cError> {
        if let Some(message) = self.take_message() {
            return Ok(message);
        }
        let mut delay = self.delay.clone();
        if self.slave_ready.wait(timeout, &mut delay) {
            if let Some(message) = self.take_message() {
                return Ok(message);
            }
        }
        Ok(Frame::new())
    }

    fn on_interrupt(&self) {
        let role = self.config.role;
        let notify = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let state = &mut *state;
            if !state.hw.interrupt_pending() {
                return Notify::None;
            }
            let input = StepInput {
                status: BusStatus::from_raw(state.hw.status()),
                data: state.hw.read_data(),
                own_address: state.hw.own_address(),
            };
            let outcome = step(input, role, state.transfer.as_mut(), &mut state.slave);
            if let Some(byte) = outcome.data_out {
                state.hw.write_data(byte);
            }
            state.hw.write_control(outcome.control);

            match outcome.notify {
                Notify::SlaveMessage(message) => {
                    let replaced = state.mailbox.replace(message).is_some();
                    self.slave_ready.signal();
                    if replaced {
                        Notify::SlaveOverflow
                    } else {
                        Notify::None
                    }
                }
                other => other,
            }
        });

        match notify {
            Notify::MasterDone => {
                self.master_done.signal();
            }
            Notify::SlaveOverflow => {
                self.slave_overflows.fetch_add(1, Ordering::Relaxed);
                self.logger
                    .warn(format_args!("i2c{}: slave message dropped", self.config.id));
            }
            Notify::None | Notify::SlaveMessage(_) => {}
        }
    }

    fn slave_overflows(&self) -> u32 {
        self.slave_overflows.load(Ordering::Relaxed)
    }
}
