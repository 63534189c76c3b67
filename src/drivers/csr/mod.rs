//! LiteX CSR bus codec
//!
//! The LiteX SoC generator splits one logical CSR into a run of consecutive
//! physical registers. In the 8-bit CSR data width, 32-bit aligned
//! configuration a 32-bit logical CSR becomes four 32-bit physical words,
//! each holding one byte, most significant byte first.
//!
//! [`read_logical`] and [`write_logical`] are the only supported way to
//! touch a register on this bus. Peer drivers must go through them too:
//! the physical words of one logical register are not atomically
//! addressable, so every logical access runs under a single process-wide
//! lock to keep two sequences from interleaving.
//!
//! The lock does not mask interrupts. An interrupt handler must not touch a
//! CSR on this bus, or it can spin forever on a lock held by the code it
//! interrupted.

pub mod bus;

use bitflags::bitflags;
use spin::Mutex;

pub use bus::{CsrBus, MmioBus};

/// Distance between consecutive physical registers (bytes)
pub const LITEX_REG_SIZE: usize = 0x4;

/// Meaningful bytes per physical register
pub const LITEX_SUBREG_SIZE: usize = 0x1;

/// Meaningful bits per physical register
pub const LITEX_SUBREG_SIZE_BIT: u32 = (LITEX_SUBREG_SIZE * 8) as u32;

const LITEX_SUBREG_MASK: u64 = (1 << LITEX_SUBREG_SIZE_BIT) - 1;

/// Serialises all logical CSR traffic, across every peripheral on the bus
static CSR_LOCK: Mutex<()> = Mutex::new(());

/// Byte width of a logical register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrWidth {
    U8 = 1,
    U16 = 2,
    U32 = 4,
    U64 = 8,
}

impl CsrWidth {
    /// Number of data bytes
    pub const fn bytes(self) -> usize {
        self as usize
    }

    /// Number of physical registers backing the logical one
    pub const fn subregs(self) -> usize {
        self.bytes() / LITEX_SUBREG_SIZE
    }

    /// Address space occupied on the bus
    pub const fn span(self) -> usize {
        self.subregs() * LITEX_REG_SIZE
    }

    /// Largest value representable in this width
    pub const fn max_value(self) -> u64 {
        match self {
            CsrWidth::U64 => u64::MAX,
            w => (1u64 << (w.bytes() * 8)) - 1,
        }
    }
}

bitflags! {
    /// Access discipline of a logical register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// A logical register: offset from its block base, width and discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsrReg {
    pub offset: usize,
    pub width: CsrWidth,
    pub access: Access,
}

impl CsrReg {
    /// Read-only register
    pub const fn ro(offset: usize, width: CsrWidth) -> Self {
        Self {
            offset,
            width,
            access: Access::READ,
        }
    }

    /// Write-only register
    pub const fn wo(offset: usize, width: CsrWidth) -> Self {
        Self {
            offset,
            width,
            access: Access::WRITE,
        }
    }

    /// Read/write register
    pub const fn rw(offset: usize, width: CsrWidth) -> Self {
        Self {
            offset,
            width,
            access: Access::READ.union(Access::WRITE),
        }
    }

    /// The `index`-th register of a contiguous array starting at `self`
    pub const fn at(self, index: usize) -> Self {
        Self {
            offset: self.offset + index * self.width.span(),
            ..self
        }
    }
}

fn write_unlocked<B: CsrBus + ?Sized>(bus: &B, addr: usize, width: CsrWidth, value: u64) {
    let n = width.subregs();
    for i in 0..n {
        let shift = (n - i - 1) as u32 * LITEX_SUBREG_SIZE_BIT;
        let data = (value >> shift) & LITEX_SUBREG_MASK;
        bus.write_word(addr + LITEX_REG_SIZE * i, data as u32);
    }
}

fn read_unlocked<B: CsrBus + ?Sized>(bus: &B, addr: usize, width: CsrWidth) -> u64 {
    let n = width.subregs();
    let mut result = 0u64;
    for i in 0..n {
        let data = bus.read_word(addr + LITEX_REG_SIZE * i) as u64 & LITEX_SUBREG_MASK;
        let shift = (n - i - 1) as u32 * LITEX_SUBREG_SIZE_BIT;
        result |= data << shift;
    }
    result
}

/// Write a logical register of `width` bytes at `addr`
pub fn write_logical<B: CsrBus + ?Sized>(bus: &B, addr: usize, width: CsrWidth, value: u64) {
    debug_assert!(value <= width.max_value(), "CSR value wider than register");
    log::trace!("csr: write {:#x} <- {:#x} ({} bytes)", addr, value, width.bytes());

    let _guard = CSR_LOCK.lock();
    write_unlocked(bus, addr, width, value);
}

/// Read a logical register of `width` bytes at `addr`
pub fn read_logical<B: CsrBus + ?Sized>(bus: &B, addr: usize, width: CsrWidth) -> u64 {
    let value = {
        let _guard = CSR_LOCK.lock();
        read_unlocked(bus, addr, width)
    };
    log::trace!("csr: read {:#x} -> {:#x} ({} bytes)", addr, value, width.bytes());
    value
}

/// Read-modify-write a logical register under a single lock hold
pub fn modify_logical<B, F>(bus: &B, addr: usize, width: CsrWidth, f: F) -> u64
where
    B: CsrBus + ?Sized,
    F: FnOnce(u64) -> u64,
{
    let _guard = CSR_LOCK.lock();
    let value = f(read_unlocked(bus, addr, width)) & width.max_value();
    write_unlocked(bus, addr, width, value);
    value
}

pub fn read8<B: CsrBus + ?Sized>(bus: &B, addr: usize) -> u8 {
    read_logical(bus, addr, CsrWidth::U8) as u8
}

pub fn read16<B: CsrBus + ?Sized>(bus: &B, addr: usize) -> u16 {
    read_logical(bus, addr, CsrWidth::U16) as u16
}

pub fn read32<B: CsrBus + ?Sized>(bus: &B, addr: usize) -> u32 {
    read_logical(bus, addr, CsrWidth::U32) as u32
}

pub fn read64<B: CsrBus + ?Sized>(bus: &B, addr: usize) -> u64 {
    read_logical(bus, addr, CsrWidth::U64)
}

pub fn write8<B: CsrBus + ?Sized>(bus: &B, addr: usize, value: u8) {
    write_logical(bus, addr, CsrWidth::U8, value as u64)
}

pub fn write16<B: CsrBus + ?Sized>(bus: &B, addr: usize, value: u16) {
    write_logical(bus, addr, CsrWidth::U16, value as u64)
}

pub fn write32<B: CsrBus + ?Sized>(bus: &B, addr: usize, value: u32) {
    write_logical(bus, addr, CsrWidth::U32, value as u64)
}

pub fn write64<B: CsrBus + ?Sized>(bus: &B, addr: usize, value: u64) {
    write_logical(bus, addr, CsrWidth::U64, value)
}

/// A mapped register block: a bus plus the block's base address
#[derive(Debug, Clone, Copy)]
pub struct CsrBlock<'b, B: ?Sized> {
    bus: &'b B,
    base: usize,
}

impl<'b, B: CsrBus + ?Sized> CsrBlock<'b, B> {
    pub fn new(bus: &'b B, base: usize) -> Self {
        Self { bus, base }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    /// Absolute bus address of `reg`
    pub fn addr(&self, reg: CsrReg) -> usize {
        self.base + reg.offset
    }

    pub fn read(&self, reg: CsrReg) -> u64 {
        debug_assert!(reg.access.contains(Access::READ), "read of write-only CSR");
        read_logical(self.bus, self.addr(reg), reg.width)
    }

    pub fn write(&self, reg: CsrReg, value: u64) {
        debug_assert!(reg.access.contains(Access::WRITE), "write of read-only CSR");
        write_logical(self.bus, self.addr(reg), reg.width, value)
    }

    pub fn modify<F: FnOnce(u64) -> u64>(&self, reg: CsrReg, f: F) -> u64 {
        debug_assert!(reg.access.contains(Access::READ | Access::WRITE));
        modify_logical(self.bus, self.addr(reg), reg.width, f)
    }
}
