//! Hardware drivers for LiteX peripherals
//!
//! All drivers share the CSR access layer in [`csr`]. The SoC controller
//! must be probed before any other driver attaches.

pub mod csr;
pub mod litex_mmc;
pub mod soc_ctrl;

#[cfg(test)]
pub mod sim;
