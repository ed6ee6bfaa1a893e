// Licensed under the Apache-2.0 license

//! I2C System Setup Helper
//!
//! Board-level helpers that run before the IPMB interface is brought up:
//! decoding the geographic address straps and turning the result into the
//! configuration of an IPMB slave bus.

use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::i2c::common::{BusConfig, BusConfigBuilder, BusRole};

/// Number of geographic address pins.
pub const GA_PIN_COUNT: usize = 3;

/// IPMB-L address returned when every strap is unconnected.
pub const IPMB_ADDR_DISCONNECTED: u8 = 0xA2;

/// IPMB-L addresses indexed by the base-3 value of the GA straps
/// (`9 * ga2 + 3 * ga1 + ga0`).
pub const IPMBL_TABLE: [u8; 27] = [
    0x70, 0x8A, 0x72, 0x8E, 0x92, 0x90, 0x74, 0x8C, 0x76, //
    0x98, 0x9C, 0x9A, 0xA0, 0xA4, 0x88, 0x9E, 0x86, 0x84, //
    0x78, 0x94, 0x7A, 0x96, 0x82, 0x80, 0x7C, 0x7E, IPMB_ADDR_DISCONNECTED,
];

/// Settling time after each change of the strap test pin.
const STRAP_SETTLE_US: u32 = 1;

/// State of one geographic address strap.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum GaPinState {
    Grounded = 0,
    Powered = 1,
    Unconnected = 2,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SetupError {
    /// A strap or the test pin could not be accessed.
    Pin,
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Pin => f.write_str("geographic address pin access failed"),
        }
    }
}

/// Helper for board-level I2C setup.
pub struct I2cSystemSetup;

impl I2cSystemSetup {
    /// Sample the geographic address straps.
    ///
    /// The straps share a test pin through weak resistors. Each strap is read
    /// with the test pin driven high and then low; a strap that follows the
    /// test pin is floating.
    ///
    /// # Arguments
    ///
    /// * `test_pin` - Output pin weakly tied to every strap
    /// * `ga` - Strap inputs, `ga[0]` being GA0
    /// * `delay` - Delay provider used to let the straps settle
    ///
    /// # Returns
    ///
    /// * `Result<[GaPinState; 3], SetupError>` - The decoded straps
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::Pin`] if any pin operation fails.
    pub fn read_geographic_address<T, G, D>(
        test_pin: &mut T,
        ga: &mut [G; GA_PIN_COUNT],
        delay: &mut D,
    ) -> Result<[GaPinState; GA_PIN_COUNT], SetupError>
    where
        T: OutputPin,
        G: InputPin,
        D: DelayNs,
    {
        test_pin.set_high().map_err(|_| SetupError::Pin)?;
        delay.delay_us(STRAP_SETTLE_US);
        let mut high = [false; GA_PIN_COUNT];
        for (level, pin) in high.iter_mut().zip(ga.iter_mut()) {
            *level = pin.is_high().map_err(|_| SetupError::Pin)?;
        }

        test_pin.set_low().map_err(|_| SetupError::Pin)?;
        delay.delay_us(STRAP_SETTLE_US);
        let mut states = [GaPinState::Unconnected; GA_PIN_COUNT];
        for ((state, pin), was_high) in states.iter_mut().zip(ga.iter_mut()).zip(high) {
            let now_high = pin.is_high().map_err(|_| SetupError::Pin)?;
            // A strap that follows the test pin either way is floating.
            *state = if was_high != now_high {
                GaPinState::Unconnected
            } else if now_high {
                GaPinState::Powered
            } else {
                GaPinState::Grounded
            };
        }
        Ok(states)
    }

    /// Map decoded straps to the IPMB-L address (wire format, even).
    #[must_use]
    pub fn ipmb_address(ga: [GaPinState; GA_PIN_COUNT]) -> u8 {
        let index = 9 * ga[2] as usize + 3 * ga[1] as usize + ga[0] as usize;
        IPMBL_TABLE
            .get(index)
            .copied()
            .unwrap_or(IPMB_ADDR_DISCONNECTED)
    }

    /// Turn `base` into the configuration of an IPMB slave bus answering at
    /// `ipmb_addr`.
    ///
    /// # Arguments
    ///
    /// * `base` - Builder carrying id, pins, speed and timeouts
    /// * `ipmb_addr` - IPMB address in wire format
    #[must_use]
    pub fn ipmb_bus_config(base: BusConfigBuilder, ipmb_addr: u8) -> BusConfig {
        base.role(BusRole::MasterAndIpmbSlave)
            .own_address(ipmb_addr >> 1)
            .build()
    }

    /// Read the straps and build the IPMB bus configuration in one go.
    ///
    /// # Returns
    ///
    /// * `Result<(u8, BusConfig), SetupError>` - IPMB address and the bus
    ///   configuration
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::Pin`] if any pin operation fails.
    pub fn discover_ipmb_bus<T, G, D>(
        test_pin: &mut T,
        ga: &mut [G; GA_PIN_COUNT],
        delay: &mut D,
        base: BusConfigBuilder,
    ) -> Result<(u8, BusConfig), SetupError>
    where
        T: OutputPin,
        G: InputPin,
        D: DelayNs,
    {
        let straps = Self::read_geographic_address(test_pin, ga, delay)?;
        let ipmb_addr = Self::ipmb_address(straps);
        Ok((ipmb_addr, Self::ipmb_bus_config(base, ipmb_addr)))
    }
}
