// Licensed under the Apache-2.0 license

// Prevent panic-prone patterns in production code only
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::indexing_slicing))]
#![cfg_attr(not(test), warn(clippy::expect_used))]
#![cfg_attr(not(test), no_std)]
pub mod common;
pub mod i2c;
pub mod ipmb;

// Links the single-core critical-section implementation on target.
#[cfg(feature = "cortex-m")]
use cortex_m as _;
