//! LiteSDCard Register Definitions
//!
//! Offsets are for the 8-bit CSR data width, 32-bit aligned bus, so every
//! byte of a logical register occupies one 4-byte physical slot. They are
//! fixed by the gateware generator and must match bit for bit.

use crate::drivers::csr::{CsrReg, CsrWidth};
use tock_registers::register_bitfields;

// ============================================================================
// PHY Block
// ============================================================================

/// Card detect, active low (0 = card present)
pub const SDPHY_CARDDETECT: CsrReg = CsrReg::ro(0x00, CsrWidth::U8);

/// SD clock divider from the system clock
pub const SDPHY_CLOCKERDIV: CsrReg = CsrReg::rw(0x04, CsrWidth::U16);

// ============================================================================
// Core Block
// ============================================================================

/// Command argument
pub const SDCORE_CMDARG: CsrReg = CsrReg::rw(0x00, CsrWidth::U32);

/// Packed command word, see [`CMD_CMD`]
pub const SDCORE_CMDCMD: CsrReg = CsrReg::rw(0x10, CsrWidth::U32);

/// Command send strobe
pub const SDCORE_CMDSND: CsrReg = CsrReg::wo(0x20, CsrWidth::U8);

/// Response words (4 consecutive 32-bit logical registers)
pub const SDCORE_CMDRSP: CsrReg = CsrReg::ro(0x24, CsrWidth::U32);

/// Command completion event, see [`EVENT`]
pub const SDCORE_CMDEVT: CsrReg = CsrReg::ro(0x64, CsrWidth::U8);

/// Data completion event, see [`EVENT`]
pub const SDCORE_DATAEVT: CsrReg = CsrReg::ro(0x68, CsrWidth::U8);

/// Block length in bytes
pub const SDCORE_BLKLEN: CsrReg = CsrReg::rw(0x6C, CsrWidth::U16);

/// Block count
pub const SDCORE_BLKCNT: CsrReg = CsrReg::rw(0x74, CsrWidth::U32);

/// Number of response words
pub const SDCORE_RESPONSE_WORDS: usize = 4;

// ============================================================================
// DMA Blocks
// ============================================================================
//
// The block-to-memory reader and memory-to-block writer share one layout.

/// DMA bus address
pub const SDDMA_BASE: CsrReg = CsrReg::rw(0x00, CsrWidth::U64);

/// DMA length in bytes
pub const SDDMA_LEN: CsrReg = CsrReg::rw(0x20, CsrWidth::U32);

/// DMA enable
pub const SDDMA_ENA: CsrReg = CsrReg::rw(0x30, CsrWidth::U8);

/// DMA done flag (bit 0)
pub const SDDMA_DONE: CsrReg = CsrReg::ro(0x34, CsrWidth::U8);

// ============================================================================
// Bitfields
// ============================================================================

register_bitfields! [
    u32,
    /// Command word written to SDCORE_CMDCMD
    pub CMD_CMD [
        /// Expected response length
        RESPONSE OFFSET(0) NUMBITS(2) [
            None = 0,
            Short = 1,
            Long = 2
        ],
        /// Data phase direction
        TRANSFER OFFSET(5) NUMBITS(2) [
            None = 0,
            Read = 1,
            Write = 2
        ],
        /// Command index
        OPCODE OFFSET(8) NUMBITS(6) []
    ]
];

register_bitfields! [
    u8,
    /// Command / data event byte
    pub EVENT [
        /// Phase finished (any outcome)
        DONE OFFSET(0) NUMBITS(1) [],
        /// Card reported a write error
        WRITE_ERROR OFFSET(1) NUMBITS(1) [],
        /// Card did not answer in time
        TIMEOUT OFFSET(2) NUMBITS(1) [],
        /// CRC mismatch
        CRC_ERROR OFFSET(3) NUMBITS(1) []
    ]
];

// ============================================================================
// SD/MMC Commands
// ============================================================================

/// SEND_RELATIVE_ADDR (SD) - Ask card to publish new RCA
pub const SD_CMD_SEND_RELATIVE_ADDR: u8 = 3;

/// SET_BUS_WIDTH (ACMD6) - Sets bus width
pub const SD_CMD_APP_SET_BUS_WIDTH: u8 = 6;

/// STOP_TRANSMISSION - Forces card to stop transmission
pub const MMC_CMD_STOP_TRANSMISSION: u8 = 12;

/// READ_SINGLE_BLOCK - Reads a single block
pub const MMC_CMD_READ_SINGLE_BLOCK: u8 = 17;

/// READ_MULTIPLE_BLOCK - Continuously reads blocks until STOP_TRANSMISSION
pub const MMC_CMD_READ_MULTIPLE_BLOCK: u8 = 18;

/// WRITE_SINGLE_BLOCK - Writes a single block
pub const MMC_CMD_WRITE_SINGLE_BLOCK: u8 = 24;

/// WRITE_MULTIPLE_BLOCK - Continuously writes blocks until STOP_TRANSMISSION
pub const MMC_CMD_WRITE_MULTIPLE_BLOCK: u8 = 25;

/// APP_CMD - Indicates next command is application specific
pub const MMC_CMD_APP_CMD: u8 = 55;

/// ACMD6 argument selecting a 4-bit data bus
pub const SD_BUS_WIDTH_4: u32 = 2;

// ============================================================================
// Host Limits
// ============================================================================

/// Lowest usable SD clock; slower clocks make some cards fail to initialize
pub const LITEX_MMC_F_MIN: u32 = 12_500_000;

/// Fastest clock an SD card supports in default/high speed
pub const LITEX_MMC_F_MAX: u32 = 50_000_000;

/// Smallest clock divider the PHY accepts
pub const CLOCKER_DIV_MIN: u32 = 2;

/// Largest clock divider the PHY accepts
pub const CLOCKER_DIV_MAX: u32 = 256;

/// OCR 3.2-3.3V
pub const OCR_VDD_32_33: u32 = 1 << 20;

/// OCR 3.3-3.4V
pub const OCR_VDD_33_34: u32 = 1 << 21;
