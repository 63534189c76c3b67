//! LiteSDCard host controller driver
//!
//! Drives an SD card through the LiteSDCard gateware. The controller is
//! spread over four register blocks on the LiteX CSR bus: the PHY (clock and
//! card detect), the core (command/response/events), and two DMA units, a
//! block-to-memory reader and a memory-to-block writer.
//!
//! Requests run to completion on the calling thread. Every wait is a busy
//! poll on a CSR; the CSR lock is only held for individual register
//! accesses, never across a poll.
//!
//! The gateware only supports a 4-bit bus, so the driver injects ACMD6
//! ahead of the first data transfer of each card session, well before the
//! generic MMC stack would get around to it.

pub mod cmd;
pub mod dma;
pub mod regs;

use bitflags::bitflags;

use crate::drivers::csr::{CsrBlock, CsrBus};
use crate::drivers::soc_ctrl::SocController;
use crate::time::{Timeout, Timer};

use regs::*;

/// Default maximum request size (one page)
pub const DEFAULT_MAX_REQ_SIZE: usize = 4096;

/// Default bound on command/data event polling (milliseconds)
const EVENT_TIMEOUT_MS: u64 = 1000;

/// Bound on the DMA done flag after a successful data phase (milliseconds)
const DMA_TIMEOUT_MS: u64 = 2000;

/// Bound on forcing the 4-bit bus width (milliseconds)
const BUS_WIDTH_TIMEOUT_MS: u64 = 500;

/// Request error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmcError {
    /// Card reported a timeout, or the DMA done flag never rose
    TransportTimeout,
    /// Card reported a write failure
    WriteError,
    /// Card reported a CRC mismatch
    CrcError,
    /// Event byte matched no known pattern
    UnknownDeviceError,
    /// The 4-bit bus width could not be forced in time
    PreconditionTimeout,
    /// Command or data event never asserted within the configured bound
    DeviceUnresponsive,
    /// Data geometry the controller or DMA buffer cannot carry
    InvalidRequest,
}

impl MmcError {
    /// Negative errno handed back to the block layer
    pub fn errno(self) -> i32 {
        const EIO: i32 = 5;
        const EINVAL: i32 = 22;
        const EILSEQ: i32 = 84;
        const ETIMEDOUT: i32 = 110;

        match self {
            MmcError::WriteError => -EIO,
            MmcError::TransportTimeout
            | MmcError::PreconditionTimeout
            | MmcError::DeviceUnresponsive => -ETIMEDOUT,
            MmcError::CrcError => -EILSEQ,
            MmcError::UnknownDeviceError | MmcError::InvalidRequest => -EINVAL,
        }
    }
}

/// Host attach error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    /// No system clock frequency to derive SD clock dividers from
    MissingClockFrequency,
    /// DMA buffer cannot hold one maximum-size request
    DmaBufferTooSmall { capacity: usize, required: usize },
    /// DMA buffer is not reachable with 32-bit bus addresses
    DmaAddressTooWide(u64),
}

/// Response length requested from the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLen {
    None = 0,
    Short = 1,
    Long = 2,
}

impl ResponseLen {
    /// Derive the response length from the block layer's command flags
    pub fn from_flags(flags: CmdFlags) -> Self {
        if flags.contains(CmdFlags::RSP_136) {
            ResponseLen::Long
        } else if flags.contains(CmdFlags::RSP_PRESENT) {
            ResponseLen::Short
        } else {
            ResponseLen::None
        }
    }
}

/// Data phase direction requested from the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    None = 0,
    Read = 1,
    Write = 2,
}

bitflags! {
    /// Command response flags, as set by the block layer
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CmdFlags: u32 {
        const RSP_PRESENT = 1 << 0;
        const RSP_136 = 1 << 1;
        const RSP_CRC = 1 << 2;
        const RSP_BUSY = 1 << 3;
        const RSP_OPCODE = 1 << 4;

        const R1 = Self::RSP_PRESENT.bits() | Self::RSP_CRC.bits() | Self::RSP_OPCODE.bits();
        const R1B = Self::R1.bits() | Self::RSP_BUSY.bits();
        const R2 = Self::RSP_PRESENT.bits() | Self::RSP_136.bits() | Self::RSP_CRC.bits();
        const R3 = Self::RSP_PRESENT.bits();
    }
}

bitflags! {
    /// Data direction flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DataFlags: u32 {
        const WRITE = 1 << 8;
        const READ = 1 << 9;
    }
}

bitflags! {
    /// Capabilities advertised to the block layer
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HostCaps: u32 {
        const BUS_WIDTH_4 = 1 << 0;
        const WAIT_WHILE_BUSY = 1 << 1;
        const DRIVER_TYPE_D = 1 << 2;
        /// No card-detect interrupt; the presence query must be polled
        const NEEDS_POLL = 1 << 3;
        const NO_WRITE_PROTECT = 1 << 4;
        const FULL_PWR_CYCLE = 1 << 5;
        const NO_SDIO = 1 << 6;
    }
}

/// One command, filled in with response and error on completion
#[derive(Debug, Clone)]
pub struct Command {
    pub opcode: u8,
    pub arg: u32,
    pub flags: CmdFlags,
    /// Extra attempts after the first failure
    pub retries: u32,
    pub resp: [u32; 4],
    pub error: Option<MmcError>,
}

impl Command {
    pub fn new(opcode: u8, arg: u32, flags: CmdFlags) -> Self {
        Self {
            opcode,
            arg,
            flags,
            retries: 0,
            resp: [0; 4],
            error: None,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// Data attached to a command
#[derive(Debug)]
pub struct Data<'a, 'b> {
    pub flags: DataFlags,
    pub blksz: u32,
    pub blocks: u32,
    /// Caller's scatter list
    pub sg: &'a mut [&'b mut [u8]],
    /// Bytes moved, set on success
    pub bytes_xfered: usize,
}

impl<'a, 'b> Data<'a, 'b> {
    pub fn new(flags: DataFlags, blksz: u32, blocks: u32, sg: &'a mut [&'b mut [u8]]) -> Self {
        Self {
            flags,
            blksz,
            blocks,
            sg,
            bytes_xfered: 0,
        }
    }

    /// Total length in bytes, saturating on overflow
    pub fn len(&self) -> usize {
        (self.blksz as usize).saturating_mul(self.blocks as usize)
    }

    /// Total length in bytes, `None` on overflow
    pub fn checked_len(&self) -> Option<usize> {
        (self.blksz as usize).checked_mul(self.blocks as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A request from the block layer
#[derive(Debug)]
pub struct Request<'a, 'b> {
    pub cmd: Command,
    pub data: Option<Data<'a, 'b>>,
}

impl<'a, 'b> Request<'a, 'b> {
    pub fn new(cmd: Command) -> Self {
        Self { cmd, data: None }
    }

    pub fn with_data(cmd: Command, data: Data<'a, 'b>) -> Self {
        Self {
            cmd,
            data: Some(data),
        }
    }
}

/// Base addresses of the controller's register blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRegs {
    pub phy: usize,
    pub core: usize,
    pub reader: usize,
    pub writer: usize,
}

/// The controller's DMA-capable bounce buffer
#[derive(Debug)]
pub struct DmaBuffer<'a> {
    buf: &'a mut [u8],
    dma_addr: u64,
}

impl<'a> DmaBuffer<'a> {
    /// `dma_addr` is the device-visible address of `buf`
    pub fn new(buf: &'a mut [u8], dma_addr: u64) -> Self {
        Self { buf, dma_addr }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn dma_addr(&self) -> u64 {
        self.dma_addr
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buf
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buf
    }
}

/// Out-of-band card detect line
pub trait CardDetect {
    fn card_present(&self) -> bool;
}

/// Host configuration
#[derive(Debug, Clone, Copy)]
pub struct HostConfig {
    /// System clock feeding the SD clock divider (Hz)
    pub sys_clk_freq: u32,
    /// Largest request the block layer may issue
    pub max_req_size: usize,
    /// Card can be removed; otherwise it is always reported present
    pub removable: bool,
    /// Bound on command/data event polling; `None` spins forever
    pub event_timeout_ms: Option<u64>,
    /// Bound on the DMA done flag
    pub dma_timeout_ms: u64,
    /// Bound on forcing the 4-bit bus width
    pub bus_width_timeout_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sys_clk_freq: 0,
            max_req_size: DEFAULT_MAX_REQ_SIZE,
            removable: true,
            event_timeout_ms: Some(EVENT_TIMEOUT_MS),
            dma_timeout_ms: DMA_TIMEOUT_MS,
            bus_width_timeout_ms: BUS_WIDTH_TIMEOUT_MS,
        }
    }
}

/// LiteSDCard host instance
///
/// Exclusive borrows keep a single request in flight: every operation that
/// touches the controller takes `&mut self`.
pub struct MmcHost<'a, B: CsrBus, T: Timer> {
    bus: B,
    timer: T,
    regs: HostRegs,
    config: HostConfig,
    card_detect: Option<&'a dyn CardDetect>,
    dma: DmaBuffer<'a>,
    /// Raw response words of the last command
    resp: [u32; 4],
    /// Relative card address
    rca: u16,
    /// Current SD clock (Hz), 0 until first set
    clock: u32,
    /// ACMD6 has been injected for this card session
    is_bus_width_set: bool,
    /// Last issued command was CMD55
    app_cmd: bool,
}

impl<'a, B: CsrBus, T: Timer> MmcHost<'a, B, T> {
    /// Attach to a controller
    ///
    /// Requires a probed [`SocController`]: the driver never attaches on a
    /// bus whose CSR access failed its self-test.
    pub fn attach(
        bus: B,
        timer: T,
        regs: HostRegs,
        dma: DmaBuffer<'a>,
        config: HostConfig,
        soc: &SocController,
    ) -> Result<Self, AttachError> {
        if config.sys_clk_freq == 0 {
            log::error!("litex-mmc: no system clock frequency given");
            return Err(AttachError::MissingClockFrequency);
        }

        if dma.capacity() < config.max_req_size {
            log::error!(
                "litex-mmc: DMA buffer of {} bytes cannot hold a {} byte request",
                dma.capacity(),
                config.max_req_size
            );
            return Err(AttachError::DmaBufferTooSmall {
                capacity: dma.capacity(),
                required: config.max_req_size,
            });
        }

        let dma_end = dma.dma_addr().saturating_add(dma.capacity() as u64);
        if dma_end > 1 << 32 {
            log::error!(
                "litex-mmc: DMA buffer at {:#x} outside 32-bit DMA mask",
                dma.dma_addr()
            );
            return Err(AttachError::DmaAddressTooWide(dma.dma_addr()));
        }

        let host = Self {
            bus,
            timer,
            regs,
            config,
            card_detect: None,
            dma,
            resp: [0; 4],
            rca: 0,
            clock: 0,
            is_bus_width_set: false,
            app_cmd: false,
        };

        // Bus masters stay off until a transfer programs them
        host.disable_dma();

        log::info!(
            "litex-mmc: attached (core {:#x}, soc {:#x}, sys_clk {} Hz, DMA buffer {} bytes @ {:#x})",
            regs.core,
            soc.base(),
            config.sys_clk_freq,
            host.dma.capacity(),
            host.dma.dma_addr()
        );

        Ok(host)
    }

    /// Use an out-of-band card detect line instead of the PHY bit
    pub fn set_card_detect(&mut self, cd: &'a dyn CardDetect) {
        self.card_detect = Some(cd);
    }

    /// Detach from the controller, handing the DMA buffer back
    pub fn detach(self) -> DmaBuffer<'a> {
        self.disable_dma();
        log::info!("litex-mmc: detached (core {:#x})", self.regs.core);
        self.dma
    }

    pub fn caps(&self) -> HostCaps {
        HostCaps::BUS_WIDTH_4
            | HostCaps::WAIT_WHILE_BUSY
            | HostCaps::DRIVER_TYPE_D
            | HostCaps::NEEDS_POLL
            | HostCaps::NO_WRITE_PROTECT
            | HostCaps::FULL_PWR_CYCLE
            | HostCaps::NO_SDIO
    }

    pub fn f_min(&self) -> u32 {
        LITEX_MMC_F_MIN
    }

    pub fn f_max(&self) -> u32 {
        LITEX_MMC_F_MAX
    }

    pub fn ocr_avail(&self) -> u32 {
        OCR_VDD_32_33 | OCR_VDD_33_34
    }

    pub fn max_req_size(&self) -> usize {
        self.config.max_req_size
    }

    pub fn rca(&self) -> u16 {
        self.rca
    }

    pub fn clock(&self) -> u32 {
        self.clock
    }

    pub fn is_bus_width_set(&self) -> bool {
        self.is_bus_width_set
    }

    pub fn dma_buffer(&self) -> &DmaBuffer<'a> {
        &self.dma
    }

    pub fn dma_buffer_mut(&mut self) -> &mut DmaBuffer<'a> {
        &mut self.dma
    }

    fn phy(&self) -> CsrBlock<'_, B> {
        CsrBlock::new(&self.bus, self.regs.phy)
    }

    fn core(&self) -> CsrBlock<'_, B> {
        CsrBlock::new(&self.bus, self.regs.core)
    }

    fn reader(&self) -> CsrBlock<'_, B> {
        CsrBlock::new(&self.bus, self.regs.reader)
    }

    fn writer(&self) -> CsrBlock<'_, B> {
        CsrBlock::new(&self.bus, self.regs.writer)
    }

    /// Card presence query
    ///
    /// Losing the card re-arms the bus width injection for the next one.
    pub fn get_cd(&mut self) -> bool {
        if !self.config.removable {
            return true;
        }

        let present = match self.card_detect {
            Some(cd) => cd.card_present(),
            // Active low
            None => self.phy().read(SDPHY_CARDDETECT) & 1 == 0,
        };

        if !present {
            if self.is_bus_width_set {
                log::debug!("litex-mmc: card removed, bus width will be set again");
            }
            self.is_bus_width_set = false;
        }

        present
    }

    /// Clock-rate change handler
    ///
    /// Bus width changes are ignored: the width was already forced to 4 bits
    /// before the first transfer.
    pub fn set_ios(&mut self, clock: u32) {
        if clock != self.clock {
            self.set_clk(clock);
            self.clock = clock;
        }
    }

    fn set_clk(&mut self, clock: u32) {
        let div = clock_divider(self.config.sys_clk_freq, clock);
        log::info!(
            "litex-mmc: requested clk_freq={} Hz: set to {} Hz via div={}",
            clock,
            self.config.sys_clk_freq / div,
            div
        );
        self.phy().write(SDPHY_CLOCKERDIV, div as u64);
    }

    /// ACMD6 with a 4-bit width, keeping the surrounding CMD55 framing
    fn set_bus_width(&mut self) -> Result<(), MmcError> {
        let app_cmd_sent = self.app_cmd;

        // ACMD6 must follow a CMD55. A failed CMD55 is already logged and
        // surfaces as an ACMD6 failure, which the caller retries.
        if !app_cmd_sent {
            let _ = self.send_app_cmd();
        }

        let status = self.send_app_set_bus_width_cmd(SD_BUS_WIDTH_4);

        // The caller's CMD55 was consumed by ACMD6; give it back. Its
        // outcome is ignored, only ACMD6 decides the retry.
        if app_cmd_sent {
            let _ = self.send_app_cmd();
        }

        status
    }

    fn force_bus_width(&mut self) -> Result<(), MmcError> {
        let timeout = Timeout::from_ms(&self.timer, self.config.bus_width_timeout_ms);
        while self.set_bus_width().is_err() {
            if timeout.is_expired(&self.timer) {
                log::warn!("litex-mmc: can't set bus width!");
                return Err(MmcError::PreconditionTimeout);
            }
        }
        log::debug!("litex-mmc: bus width forced to 4 bits");
        Ok(())
    }

    /// Request submission entry point
    ///
    /// Runs the request to completion and hands it to `done` exactly once,
    /// with response words, error and transferred byte count filled in.
    pub fn request<F>(&mut self, mrq: &mut Request<'_, '_>, done: F)
    where
        F: FnOnce(&mut Request<'_, '_>),
    {
        self.run_request(mrq);
        done(mrq);
    }

    /// Reject data the core registers or the DMA buffer cannot hold
    fn check_geometry(&self, data: &Data<'_, '_>) -> Result<(), MmcError> {
        let limit = self.config.max_req_size.min(self.dma.capacity());
        let fits = data.checked_len().is_some_and(|len| len <= limit);

        if data.blksz > SDCORE_BLKLEN.width.max_value() as u32 || !fits {
            log::error!(
                "litex-mmc: rejecting {} x {} byte transfer (limit {} bytes)",
                data.blocks,
                data.blksz,
                limit
            );
            return Err(MmcError::InvalidRequest);
        }

        Ok(())
    }

    fn run_request(&mut self, mrq: &mut Request<'_, '_>) {
        let Request { cmd, data } = mrq;
        let response = ResponseLen::from_flags(cmd.flags);
        let mut transfer = TransferKind::None;

        if let Some(data) = data.as_ref() {
            if let Err(e) = self.check_geometry(data) {
                cmd.error = Some(e);
                return;
            }
        }

        if let Some(data) = data.as_mut() {
            if !self.is_bus_width_set {
                if let Err(e) = self.force_bus_width() {
                    cmd.error = Some(e);
                    return;
                }
                self.is_bus_width_set = true;
            }

            if data.flags.contains(DataFlags::READ) {
                self.start_read(data.len());
                transfer = TransferKind::Read;
            } else if data.flags.contains(DataFlags::WRITE) {
                self.start_write(data.sg, data.len());
                transfer = TransferKind::Write;
            } else {
                // Completes as a plain command
                log::warn!("litex-mmc: data present w/o read or write flag");
            }

            self.set_block_geometry(data.blksz, data.blocks);
        }

        let mut retries = cmd.retries;
        let status = loop {
            let status = self.send_cmd(cmd.opcode, cmd.arg, response, transfer);
            if status.is_ok() || retries == 0 {
                break status;
            }
            retries -= 1;
            log::debug!(
                "litex-mmc: CMD{} failed ({:?}), {} retries left",
                cmd.opcode,
                status,
                retries
            );
        };

        let raw = self.resp;

        // Multi-block transfers are terminated by an explicit CMD12
        if cmd.opcode == MMC_CMD_READ_MULTIPLE_BLOCK || cmd.opcode == MMC_CMD_WRITE_MULTIPLE_BLOCK {
            if let Err(e) = self.send_stop_tx_cmd() {
                log::warn!("litex-mmc: stop after CMD{} failed: {:?}", cmd.opcode, e);
            }
        }

        cmd.error = status.err();
        reorder_response(response, &raw, &mut cmd.resp);

        if let Some(data) = data.as_mut() {
            if status.is_ok() && transfer != TransferKind::None {
                data.bytes_xfered = data.len().min(self.config.max_req_size);
                if transfer == TransferKind::Read {
                    let n = data.bytes_xfered.min(self.dma.capacity());
                    sg_copy_from_buffer(data.sg, &self.dma.as_slice()[..n]);
                }
            }
        }
    }
}

/// SD clock divider for `clock`: a power of two in [2, 256]
pub fn clock_divider(sys_clk_freq: u32, clock: u32) -> u32 {
    let div = if clock != 0 {
        sys_clk_freq / clock
    } else {
        CLOCKER_DIV_MAX
    };
    div.checked_next_power_of_two()
        .unwrap_or(CLOCKER_DIV_MAX)
        .clamp(CLOCKER_DIV_MIN, CLOCKER_DIV_MAX)
}

/// Copy raw response words into the block layer's layout
///
/// For short responses the gateware latches the 48-bit frame in the last
/// two words: word 3 holds the card status and the low byte of word 2 the
/// bits above it.
pub fn reorder_response(response: ResponseLen, raw: &[u32; 4], out: &mut [u32; 4]) {
    match response {
        ResponseLen::None => {}
        ResponseLen::Short => {
            out[0] = raw[3];
            out[1] = raw[2] & 0xFF;
        }
        ResponseLen::Long => *out = *raw,
    }
}

/// Gather the scatter list into `buf`; returns bytes copied
pub fn sg_copy_to_buffer(sg: &[&mut [u8]], buf: &mut [u8]) -> usize {
    let mut copied = 0;
    for seg in sg {
        if copied == buf.len() {
            break;
        }
        let n = seg.len().min(buf.len() - copied);
        buf[copied..copied + n].copy_from_slice(&seg[..n]);
        copied += n;
    }
    copied
}

/// Scatter `buf` into the scatter list; returns bytes copied
pub fn sg_copy_from_buffer(sg: &mut [&mut [u8]], buf: &[u8]) -> usize {
    let mut copied = 0;
    for seg in sg.iter_mut() {
        if copied == buf.len() {
            break;
        }
        let n = seg.len().min(buf.len() - copied);
        seg[..n].copy_from_slice(&buf[copied..copied + n]);
        copied += n;
    }
    copied
}
