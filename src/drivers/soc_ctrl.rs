//! LiteX SoC controller
//!
//! The SoC controller exposes a scratch register whose reset value is known.
//! Probing it checks that the CSR codec's width and byte order assumptions
//! match the generated gateware. A mismatch is not something software can
//! work around: it has to be fixed in the SoC generator, and every LiteX
//! driver sharing the bus would silently corrupt its registers.
//!
//! The only way to obtain a [`SocController`] is a passing probe, and the
//! other drivers in this crate take one as proof before they attach.

use crate::drivers::csr::{CsrBlock, CsrBus, CsrReg, CsrWidth};

/// Scratch register
pub const SCRATCH: CsrReg = CsrReg::rw(0x04, CsrWidth::U32);

/// Value the scratch register holds after reset
pub const SCRATCH_REG_VALUE: u32 = 0x1234_5678;

/// Value written and read back during the probe
pub const SCRATCH_TEST_VALUE: u32 = 0xdead_beef;

/// CSR self-test failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTestError {
    /// Scratch register did not hold its reset value
    ScratchReadMismatch { expected: u32, got: u32 },
    /// Test value did not read back
    ScratchWriteMismatch { expected: u32, got: u32 },
}

/// A probed SoC controller; proof that CSR access works
#[derive(Debug)]
pub struct SocController {
    base: usize,
}

impl SocController {
    /// Probe the controller at `base` and verify CSR access
    ///
    /// An error here is fatal for every LiteX peripheral: the caller must
    /// not attach any driver on this bus.
    pub fn probe<B: CsrBus + ?Sized>(bus: &B, base: usize) -> Result<Self, SelfTestError> {
        let regs = CsrBlock::new(bus, base);

        if let Err(e) = check_csr_access(&regs) {
            log::error!("litex-soc: CSR access check failed: {:?}", e);
            log::error!("litex-soc: LiteX drivers will not operate correctly, halting attach");
            return Err(e);
        }

        log::info!("litex-soc: LiteX SoC controller driver initialized");
        Ok(Self { base })
    }

    pub fn base(&self) -> usize {
        self.base
    }
}

fn check_csr_access<B: CsrBus + ?Sized>(regs: &CsrBlock<'_, B>) -> Result<(), SelfTestError> {
    let got = regs.read(SCRATCH) as u32;
    if got != SCRATCH_REG_VALUE {
        return Err(SelfTestError::ScratchReadMismatch {
            expected: SCRATCH_REG_VALUE,
            got,
        });
    }

    regs.write(SCRATCH, SCRATCH_TEST_VALUE as u64);
    let got = regs.read(SCRATCH) as u32;
    if got != SCRATCH_TEST_VALUE {
        return Err(SelfTestError::ScratchWriteMismatch {
            expected: SCRATCH_TEST_VALUE,
            got,
        });
    }

    // Restore the reset value for whoever probes next
    regs.write(SCRATCH, SCRATCH_REG_VALUE as u64);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::csr::{self, LITEX_REG_SIZE};
    use crate::drivers::sim::WordBank;

    const BASE: usize = 0xf000_0000;

    #[test]
    fn probe_passes_and_restores_scratch() {
        let bank = WordBank::default();
        csr::write32(&bank, BASE + SCRATCH.offset, SCRATCH_REG_VALUE);

        let soc = SocController::probe(&bank, BASE).unwrap();
        assert_eq!(soc.base(), BASE);
        assert_eq!(csr::read32(&bank, BASE + SCRATCH.offset), SCRATCH_REG_VALUE);
    }

    #[test]
    fn probe_rejects_byte_swapped_scratch() {
        let bank = WordBank::default();
        // Gateware built with the opposite subregister order
        csr::write32(&bank, BASE + SCRATCH.offset, SCRATCH_REG_VALUE.swap_bytes());

        assert_eq!(
            SocController::probe(&bank, BASE).unwrap_err(),
            SelfTestError::ScratchReadMismatch {
                expected: SCRATCH_REG_VALUE,
                got: 0x7856_3412,
            }
        );
    }

    #[test]
    fn probe_rejects_stuck_scratch() {
        let bank = WordBank::default();
        csr::write32(&bank, BASE + SCRATCH.offset, SCRATCH_REG_VALUE);
        // Lowest byte lane ignores writes
        bank.make_read_only(BASE + SCRATCH.offset + 3 * LITEX_REG_SIZE);

        assert_eq!(
            SocController::probe(&bank, BASE).unwrap_err(),
            SelfTestError::ScratchWriteMismatch {
                expected: SCRATCH_TEST_VALUE,
                got: 0xdead_be78,
            }
        );
    }
}
