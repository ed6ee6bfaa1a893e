// Licensed under the Apache-2.0 license

//! I2C transaction engine.
//!
//! The pieces stack up as follows:
//!
//! * [`state_machine`] turns one status code into one control update
//! * [`register_engine`] drives it from the interrupt and blocks callers on a
//!   [`completion::Completion`]
//! * [`sequenced_engine`] drives peripherals that sequence the bus themselves
//! * [`slave_queue`] buffers messages addressed to us
//! * [`arbitration`] maps logical buses and chips onto the engines and
//!   serialises their users
//! * [`i2c_controller`] exposes an acquired bus through embedded-hal

pub mod arbitration;
pub mod common;
pub mod completion;
pub mod i2c_controller;
pub mod register_engine;
pub mod sequenced_engine;
pub mod slave_queue;
pub mod state_machine;
pub mod system_setup;
pub mod traits;

#[cfg(test)]
pub(crate) mod sim;

pub use arbitration::{
    release_bus, BoardMap, BusHandle, BusMapping, BusRegistry, ChipMapping, MuxMapping, MuxSelect,
};
pub use common::{BusConfig, BusConfigBuilder, BusRole, Frame, I2cError, MAX_MSG_LEN};
pub use i2c_controller::I2cController;
pub use register_engine::RegisterLevelBus;
pub use sequenced_engine::SequencedBus;
pub use traits::TransactionEngine;
