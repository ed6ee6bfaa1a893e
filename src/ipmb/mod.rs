// Licensed under the Apache-2.0 license

//! IPMB messaging on top of the I2C transaction engine.

pub mod message;
pub mod transport;

pub use message::{IpmbError, IpmiMessage};
pub use transport::{IpmbTransport, Monotonic};
