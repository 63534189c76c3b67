//! Transfer engine
//!
//! The reader (block to memory) and writer (memory to block) units move data
//! between the card and the host's single DMA buffer. A unit is disabled,
//! reprogrammed and re-enabled for every transfer; the done flag is polled
//! once the core reports a successful data phase.

use super::regs::*;
use super::{MmcError, MmcHost, TransferKind, sg_copy_to_buffer};
use crate::drivers::csr::CsrBus;
use crate::time::{Timeout, Timer};

impl<'a, B: CsrBus, T: Timer> MmcHost<'a, B, T> {
    /// Turn off both bus masters
    pub(super) fn disable_dma(&self) {
        self.reader().write(SDDMA_ENA, 0);
        self.writer().write(SDDMA_ENA, 0);
    }

    /// Point the reader at the DMA buffer for `len` bytes
    ///
    /// The length is capped at the buffer capacity.
    pub(super) fn start_read(&mut self, len: usize) {
        let len = len.min(self.dma.capacity());
        let reader = self.reader();
        reader.write(SDDMA_ENA, 0);
        reader.write(SDDMA_BASE, self.dma.dma_addr());
        reader.write(SDDMA_LEN, len as u64);
        reader.write(SDDMA_ENA, 1);
    }

    /// Stage the outbound payload and point the writer at it
    ///
    /// The payload is cut to the buffer capacity. Returns the length
    /// programmed into the writer.
    pub(super) fn start_write(&mut self, sg: &[&mut [u8]], len: usize) -> usize {
        let write_length = len.min(self.dma.capacity());
        if write_length < len {
            log::warn!(
                "litex-mmc: write of {} bytes truncated to {} byte DMA buffer",
                len,
                write_length
            );
        }

        sg_copy_to_buffer(sg, &mut self.dma.as_mut_slice()[..write_length]);

        let writer = self.writer();
        writer.write(SDDMA_ENA, 0);
        writer.write(SDDMA_BASE, self.dma.dma_addr());
        writer.write(SDDMA_LEN, write_length as u64);
        writer.write(SDDMA_ENA, 1);

        write_length
    }

    /// Program block size and count, independent of direction
    pub(super) fn set_block_geometry(&mut self, blksz: u32, blocks: u32) {
        let core = self.core();
        core.write(SDCORE_BLKLEN, blksz as u64);
        core.write(SDCORE_BLKCNT, blocks as u64);
    }

    /// Wait for the unit serving `transfer` to raise its done flag
    ///
    /// On timeout the unit is left enabled.
    pub(super) fn wait_dma_done(&self, transfer: TransferKind) -> Result<(), MmcError> {
        let unit = match transfer {
            TransferKind::None => return Ok(()),
            TransferKind::Read => self.reader(),
            TransferKind::Write => self.writer(),
        };

        let timeout = Timeout::from_ms(&self.timer, self.config.dma_timeout_ms);
        while unit.read(SDDMA_DONE) & 0x01 == 0 {
            if timeout.is_expired(&self.timer) {
                return Err(MmcError::TransportTimeout);
            }
            core::hint::spin_loop();
        }

        Ok(())
    }
}
