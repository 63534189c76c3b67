//! litesd - LiteSDCard host controller driver for LiteX SoCs
//!
//! This library drives the LiteSDCard SD card core found in LiteX-generated
//! systems-on-chip. It contains the LiteX CSR access layer shared by every
//! LiteX peripheral, the SoC controller self-test, and the SD host driver
//! proper.
//!
//! The crate is `no_std` and allocation free. The platform supplies a
//! [`drivers::csr::CsrBus`] for register access and a [`time::Timer`] for
//! bounding busy-polls.

#![cfg_attr(not(test), no_std)]

pub mod drivers;
pub mod logger;
pub mod time;

pub use drivers::litex_mmc::{MmcError, MmcHost};
pub use drivers::soc_ctrl::SocController;
