//! Simulated LiteX SoC for unit tests
//!
//! [`WordBank`] is a plain bank of physical CSR words. [`LiteSdSim`] layers
//! a model of the LiteSDCard gateware on top: writing the command strobe
//! runs a scripted card, fills the event and response registers, and sets
//! the DMA done flags. Every issued command is recorded.
//!
//! The simulator is called from inside the CSR lock, so it reads and writes
//! its own words directly and never goes back through the codec.

use core::cell::{Cell, RefCell};
use std::boxed::Box;
use std::collections::{HashMap, HashSet};
use std::vec::Vec;

use crate::drivers::csr::{CsrBus, CsrReg, LITEX_REG_SIZE};
use crate::drivers::litex_mmc::regs::*;
use crate::drivers::litex_mmc::{HostRegs, ResponseLen, TransferKind};
use crate::drivers::soc_ctrl::{SCRATCH, SCRATCH_REG_VALUE};
use crate::time::Timer;

pub const SOC_BASE: usize = 0xf000_0000;
pub const PHY_BASE: usize = 0xf000_1000;
pub const CORE_BASE: usize = 0xf000_2000;
pub const READER_BASE: usize = 0xf000_3000;
pub const WRITER_BASE: usize = 0xf000_4000;

/// Event byte for a clean completion
pub const EVT_OK: u8 = 0x01;
pub const EVT_WRITE_ERROR: u8 = 0x03;
pub const EVT_TIMEOUT: u8 = 0x05;
pub const EVT_CRC_ERROR: u8 = 0x09;

pub fn host_regs() -> HostRegs {
    HostRegs {
        phy: PHY_BASE,
        core: CORE_BASE,
        reader: READER_BASE,
        writer: WRITER_BASE,
    }
}

/// Bank of physical CSR words; unwritten words read as zero
#[derive(Default)]
pub struct WordBank {
    words: RefCell<HashMap<usize, u32>>,
    read_only: RefCell<HashSet<usize>>,
}

impl WordBank {
    /// Make writes to the physical word at `addr` ineffective
    pub fn make_read_only(&self, addr: usize) {
        self.read_only.borrow_mut().insert(addr);
    }

    pub fn word(&self, addr: usize) -> u32 {
        *self.words.borrow().get(&addr).unwrap_or(&0)
    }

    pub fn set_word(&self, addr: usize, value: u32) {
        self.words.borrow_mut().insert(addr, value);
    }

    /// Reassemble a logical register without taking the CSR lock
    pub fn logical(&self, addr: usize, reg: CsrReg) -> u64 {
        let n = reg.width.subregs();
        (0..n).fold(0u64, |acc, i| {
            (acc << 8) | (self.word(addr + reg.offset + i * LITEX_REG_SIZE) & 0xff) as u64
        })
    }

    /// Store a logical register without taking the CSR lock
    pub fn set_logical(&self, addr: usize, reg: CsrReg, value: u64) {
        let n = reg.width.subregs();
        for i in 0..n {
            let shift = (n - i - 1) * 8;
            self.set_word(
                addr + reg.offset + i * LITEX_REG_SIZE,
                ((value >> shift) & 0xff) as u32,
            );
        }
    }
}

impl CsrBus for WordBank {
    fn read_word(&self, addr: usize) -> u32 {
        assert_eq!(addr % LITEX_REG_SIZE, 0, "unaligned CSR access at {:#x}", addr);
        self.word(addr)
    }

    fn write_word(&self, addr: usize, value: u32) {
        assert_eq!(addr % LITEX_REG_SIZE, 0, "unaligned CSR access at {:#x}", addr);
        if !self.read_only.borrow().contains(&addr) {
            self.set_word(addr, value);
        }
    }
}

/// Monotonic fake clock: each read advances 1us, delays advance exactly
#[derive(Default)]
pub struct SimTimer {
    now: Cell<u64>,
}

impl Timer for SimTimer {
    fn now_us(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + 1);
        now
    }

    fn delay_us(&self, us: u64) {
        self.now.set(self.now.get() + us);
    }
}

/// One command as seen on the SD bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimCommand {
    pub opcode: u8,
    pub arg: u32,
    pub response: ResponseLen,
    pub transfer: TransferKind,
}

/// DMA unit programming captured when the unit is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaProgram {
    pub transfer: TransferKind,
    pub base: u64,
    pub len: u32,
}

type Script = Box<dyn FnMut(&SimCommand) -> u8>;

/// LiteSDCard gateware model
pub struct LiteSdSim {
    pub bank: WordBank,
    commands: RefCell<Vec<SimCommand>>,
    dma: RefCell<Vec<DmaProgram>>,
    cmd_script: RefCell<Script>,
    data_script: RefCell<Script>,
    response: Cell<[u32; 4]>,
    dma_stuck: Cell<bool>,
    event_delay: Cell<u32>,
    pending_polls: Cell<u32>,
}

impl LiteSdSim {
    /// A SoC with a passing scratch register and an inserted card that
    /// acknowledges everything
    pub fn new() -> Self {
        let sim = Self {
            bank: WordBank::default(),
            commands: RefCell::new(Vec::new()),
            dma: RefCell::new(Vec::new()),
            cmd_script: RefCell::new(Box::new(|_: &SimCommand| EVT_OK)),
            data_script: RefCell::new(Box::new(|_: &SimCommand| EVT_OK)),
            response: Cell::new([0; 4]),
            dma_stuck: Cell::new(false),
            event_delay: Cell::new(0),
            pending_polls: Cell::new(0),
        };
        sim.bank
            .set_logical(SOC_BASE, SCRATCH, SCRATCH_REG_VALUE as u64);
        sim.set_card_present(true);
        sim
    }

    /// Event byte returned for each command phase
    pub fn on_command(&self, script: impl FnMut(&SimCommand) -> u8 + 'static) {
        *self.cmd_script.borrow_mut() = Box::new(script);
    }

    /// Event byte returned for each data phase
    pub fn on_data(&self, script: impl FnMut(&SimCommand) -> u8 + 'static) {
        *self.data_script.borrow_mut() = Box::new(script);
    }

    /// Raw response words latched by every successful command
    pub fn set_response(&self, words: [u32; 4]) {
        self.response.set(words);
    }

    /// Keep the DMA done flags low forever
    pub fn set_dma_stuck(&self, stuck: bool) {
        self.dma_stuck.set(stuck);
    }

    /// Command event reads as not-done for this many polls per command
    pub fn set_event_delay(&self, polls: u32) {
        self.event_delay.set(polls);
    }

    pub fn set_card_present(&self, present: bool) {
        // Active low
        self.bank
            .set_logical(PHY_BASE, SDPHY_CARDDETECT, (!present) as u64);
    }

    pub fn commands(&self) -> Vec<SimCommand> {
        self.commands.borrow().clone()
    }

    pub fn opcodes(&self) -> Vec<u8> {
        self.commands.borrow().iter().map(|c| c.opcode).collect()
    }

    pub fn clear_commands(&self) {
        self.commands.borrow_mut().clear();
    }

    pub fn dma_programs(&self) -> Vec<DmaProgram> {
        self.dma.borrow().clone()
    }

    pub fn dma_enabled(&self, base: usize) -> bool {
        self.bank.logical(base, SDDMA_ENA) & 1 != 0
    }

    pub fn core(&self, reg: CsrReg) -> u64 {
        self.bank.logical(CORE_BASE, reg)
    }

    pub fn phy(&self, reg: CsrReg) -> u64 {
        self.bank.logical(PHY_BASE, reg)
    }

    fn run_command(&self) {
        let word = self.core(SDCORE_CMDCMD) as u32;
        let cmd = SimCommand {
            opcode: ((word >> 8) & 0x3f) as u8,
            arg: self.core(SDCORE_CMDARG) as u32,
            response: match word & 0x3 {
                0 => ResponseLen::None,
                1 => ResponseLen::Short,
                _ => ResponseLen::Long,
            },
            transfer: match (word >> 5) & 0x3 {
                0 => TransferKind::None,
                1 => TransferKind::Read,
                _ => TransferKind::Write,
            },
        };
        self.commands.borrow_mut().push(cmd);
        self.pending_polls.set(self.event_delay.get());

        let evt = (self.cmd_script.borrow_mut().as_mut())(&cmd);
        self.bank.set_logical(CORE_BASE, SDCORE_CMDEVT, evt as u64);
        self.bank.set_logical(CORE_BASE, SDCORE_DATAEVT, 0);
        if evt != EVT_OK {
            return;
        }

        if cmd.response != ResponseLen::None {
            for (i, word) in self.response.get().iter().enumerate() {
                self.bank
                    .set_logical(CORE_BASE, SDCORE_CMDRSP.at(i), *word as u64);
            }
        }

        let unit = match cmd.transfer {
            TransferKind::None => return,
            TransferKind::Read => READER_BASE,
            TransferKind::Write => WRITER_BASE,
        };

        let evt = (self.data_script.borrow_mut().as_mut())(&cmd);
        self.bank.set_logical(CORE_BASE, SDCORE_DATAEVT, evt as u64);
        if evt == EVT_OK && !self.dma_stuck.get() && self.dma_enabled(unit) {
            self.bank.set_logical(unit, SDDMA_DONE, 1);
        }
    }

    fn dma_enable_written(&self, unit: usize, transfer: TransferKind) {
        if self.dma_enabled(unit) {
            self.dma.borrow_mut().push(DmaProgram {
                transfer,
                base: self.bank.logical(unit, SDDMA_BASE),
                len: self.bank.logical(unit, SDDMA_LEN) as u32,
            });
        } else {
            self.bank.set_logical(unit, SDDMA_DONE, 0);
        }
    }
}

impl CsrBus for LiteSdSim {
    fn read_word(&self, addr: usize) -> u32 {
        let pending = self.pending_polls.get();
        if addr == CORE_BASE + SDCORE_CMDEVT.offset && pending > 0 {
            self.pending_polls.set(pending - 1);
            return 0;
        }
        self.bank.read_word(addr)
    }

    fn write_word(&self, addr: usize, value: u32) {
        self.bank.write_word(addr, value);

        if addr == CORE_BASE + SDCORE_CMDSND.offset && value & 1 != 0 {
            self.run_command();
        } else if addr == READER_BASE + SDDMA_ENA.offset {
            self.dma_enable_written(READER_BASE, TransferKind::Read);
        } else if addr == WRITER_BASE + SDDMA_ENA.offset {
            self.dma_enable_written(WRITER_BASE, TransferKind::Write);
        }
    }
}
