//! Physical CSR bus access
//!
//! A physical CSR is one 32-bit aligned word on the SoC bus. With the 8-bit
//! CSR data width only the low byte of each word carries data. The codec in
//! the parent module is the only thing that should talk to a [`CsrBus`]
//! directly.

use core::ptr;

/// One physical word access on the CSR bus
///
/// Accesses are in CPU native byte order: the gateware is generated to
/// match the CPU, so no swapping happens at this level.
pub trait CsrBus {
    /// Read the physical word at `addr`
    fn read_word(&self, addr: usize) -> u32;

    /// Write the physical word at `addr`
    fn write_word(&self, addr: usize, value: u32);
}

impl<B: CsrBus + ?Sized> CsrBus for &B {
    fn read_word(&self, addr: usize) -> u32 {
        (**self).read_word(addr)
    }

    fn write_word(&self, addr: usize, value: u32) {
        (**self).write_word(addr, value)
    }
}

/// Memory-mapped CSR bus using volatile 32-bit accesses
#[derive(Debug, Clone, Copy)]
pub struct MmioBus {
    _private: (),
}

impl MmioBus {
    /// Create an accessor for memory-mapped CSRs
    ///
    /// # Safety
    ///
    /// Every address later passed to this bus must be a mapped, 4-byte
    /// aligned CSR location that stays mapped for the lifetime of the bus.
    /// Touching anything outside the mapped range is a fatal fault.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl CsrBus for MmioBus {
    #[inline]
    fn read_word(&self, addr: usize) -> u32 {
        // Safety: guaranteed by the contract of `MmioBus::new`
        unsafe { ptr::read_volatile(addr as *const u32) }
    }

    #[inline]
    fn write_word(&self, addr: usize, value: u32) {
        // Safety: guaranteed by the contract of `MmioBus::new`
        unsafe { ptr::write_volatile(addr as *mut u32, value) }
    }
}
