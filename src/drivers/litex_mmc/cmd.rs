//! Command transport
//!
//! One command is: argument and command word into the core, a send strobe,
//! then a poll of the command event register. Commands with a data phase
//! then poll the separate data event register and the DMA unit's done flag.
//! The gateware pipelines command acceptance and data movement, so the two
//! events are reported and checked independently.

use tock_registers::LocalRegisterCopy;

use super::regs::*;
use super::{MmcError, MmcHost, ResponseLen, TransferKind};
use crate::drivers::csr::{CsrBus, CsrReg};
use crate::time::{Timeout, Timer};

/// Event byte of a clean completion: done, no error bits
const EVENT_OK: u8 = 0x01;

/// Delay between event register polls (microseconds)
const EVENT_POLL_DELAY_US: u64 = 5;

/// Pack opcode, data direction and response length into the command word
pub fn command_word(opcode: u8, response: ResponseLen, transfer: TransferKind) -> u32 {
    let mut word = LocalRegisterCopy::<u32, CMD_CMD::Register>::new(0);
    word.write(
        CMD_CMD::OPCODE.val(opcode as u32)
            + CMD_CMD::TRANSFER.val(transfer as u32)
            + CMD_CMD::RESPONSE.val(response as u32),
    );
    word.get()
}

/// Decode a completed event byte
pub fn decode_event(raw: u8) -> Result<(), MmcError> {
    let evt = LocalRegisterCopy::<u8, EVENT::Register>::new(raw);

    if raw == EVENT_OK {
        Ok(())
    } else if evt.is_set(EVENT::WRITE_ERROR) {
        Err(MmcError::WriteError)
    } else if evt.is_set(EVENT::TIMEOUT) {
        Err(MmcError::TransportTimeout)
    } else if evt.is_set(EVENT::CRC_ERROR) {
        Err(MmcError::CrcError)
    } else {
        log::error!("litex-mmc: unknown error evt={:#x}", raw);
        Err(MmcError::UnknownDeviceError)
    }
}

impl<'a, B: CsrBus, T: Timer> MmcHost<'a, B, T> {
    /// Poll an event register until its done bit rises, then decode it
    fn wait_done(&self, reg: CsrReg) -> Result<(), MmcError> {
        let timeout = self
            .config
            .event_timeout_ms
            .map(|ms| Timeout::from_ms(&self.timer, ms));

        let raw = loop {
            let raw = self.core().read(reg) as u8;
            if LocalRegisterCopy::<u8, EVENT::Register>::new(raw).is_set(EVENT::DONE) {
                break raw;
            }
            if timeout.is_some_and(|t| t.is_expired(&self.timer)) {
                return Err(MmcError::DeviceUnresponsive);
            }
            self.timer.delay_us(EVENT_POLL_DELAY_US);
        };

        decode_event(raw)
    }

    fn read_response(&self) -> [u32; 4] {
        let core = self.core();
        let mut resp = [0u32; SDCORE_RESPONSE_WORDS];
        for (i, word) in resp.iter_mut().enumerate() {
            *word = core.read(SDCORE_CMDRSP.at(i)) as u32;
        }
        resp
    }

    /// Issue one command and wait for it, and for its data phase if any
    pub(super) fn send_cmd(
        &mut self,
        opcode: u8,
        arg: u32,
        response: ResponseLen,
        transfer: TransferKind,
    ) -> Result<(), MmcError> {
        {
            let core = self.core();
            core.write(SDCORE_CMDARG, arg as u64);
            core.write(
                SDCORE_CMDCMD,
                command_word(opcode, response, transfer) as u64,
            );
            core.write(SDCORE_CMDSND, 1);
        }

        if let Err(e) = self.wait_done(SDCORE_CMDEVT) {
            log::error!("litex-mmc: command (cmd {}) failed, status {:?}", opcode, e);
            return Err(e);
        }

        if response != ResponseLen::None {
            self.resp = self.read_response();
        }

        if !self.app_cmd && opcode == SD_CMD_SEND_RELATIVE_ADDR {
            self.rca = (self.resp[3] >> 16) as u16;
            log::debug!("litex-mmc: RCA={:#06x}", self.rca);
        }

        self.app_cmd = opcode == MMC_CMD_APP_CMD;

        if transfer == TransferKind::None {
            return Ok(());
        }

        if let Err(e) = self.wait_done(SDCORE_DATAEVT) {
            log::error!("litex-mmc: data xfer (cmd {}) failed, status {:?}", opcode, e);
            return Err(e);
        }

        if let Err(e) = self.wait_dma_done(transfer) {
            log::error!("litex-mmc: DMA timeout (cmd {})", opcode);
            return Err(e);
        }

        Ok(())
    }

    /// CMD12
    pub(super) fn send_stop_tx_cmd(&mut self) -> Result<(), MmcError> {
        self.send_cmd(
            MMC_CMD_STOP_TRANSMISSION,
            0,
            ResponseLen::Short,
            TransferKind::None,
        )
    }

    /// CMD55
    pub(super) fn send_app_cmd(&mut self) -> Result<(), MmcError> {
        let arg = (self.rca as u32) << 16;
        self.send_cmd(MMC_CMD_APP_CMD, arg, ResponseLen::Short, TransferKind::None)
    }

    /// ACMD6
    pub(super) fn send_app_set_bus_width_cmd(&mut self, width: u32) -> Result<(), MmcError> {
        self.send_cmd(
            SD_CMD_APP_SET_BUS_WIDTH,
            width,
            ResponseLen::Short,
            TransferKind::None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_word_layout() {
        assert_eq!(
            command_word(17, ResponseLen::Short, TransferKind::Read),
            17 << 8 | 1 << 5 | 1
        );
        assert_eq!(
            command_word(25, ResponseLen::Short, TransferKind::Write),
            25 << 8 | 2 << 5 | 1
        );
        assert_eq!(command_word(2, ResponseLen::Long, TransferKind::None), 2 << 8 | 2);
        assert_eq!(command_word(0, ResponseLen::None, TransferKind::None), 0);
    }

    #[test]
    fn event_decoding() {
        assert_eq!(decode_event(0x01), Ok(()));
        assert_eq!(decode_event(0x03), Err(MmcError::WriteError));
        assert_eq!(decode_event(0x05), Err(MmcError::TransportTimeout));
        assert_eq!(decode_event(0x09), Err(MmcError::CrcError));
        // Write error wins over the other flags
        assert_eq!(decode_event(0x0f), Err(MmcError::WriteError));
        assert_eq!(decode_event(0x0d), Err(MmcError::TransportTimeout));
        assert_eq!(decode_event(0x11), Err(MmcError::UnknownDeviceError));
    }
}
