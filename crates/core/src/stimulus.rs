//! Bit-level SPI host.
//!
//! Drives a [`Controller`]'s pins the way a bench host would: chip-select
//! low, then for every bit (MSB first) set MOSI with the clock low, wait,
//! sample MISO, raise the clock, wait, drop the clock. The controller's
//! clock is ticked in lockstep, so everything here is measured in
//! controller ticks.
//!
//! A response byte is clocked out during the exchange that follows the
//! command byte. That only works if the half period leaves the dispatcher
//! time to load the outgoing register before the falling edge that
//! presents bit 7: with default synchronizers a half period of 4 ticks is
//! enough, 3 with collapsed ones (see [`SpiHost::min_half_period`]). READ_CELL responds after its settle
//! window, so [`SpiHost::read_cell`] fetches the value in a second
//! transaction.

use crate::config::ControllerConfig;
use crate::crossbar;
use crate::dispatch::{OP_NOP, OP_READ_CELL, OP_READ_STATUS};
use crate::error::{Error, Result};
use crate::trace::VcdRecorder;
use crate::{Controller, Inputs};

pub struct SpiHost {
    pins: Inputs,
    /// Ticks per clock phase
    pub half_period: u32,
    /// Ticks between chip-select low and the first clock edge
    pub setup: u32,
    /// Ticks after each byte
    pub byte_gap: u32,
    /// Ticks after chip-select release
    pub idle: u32,
    recorder: Option<VcdRecorder>,
    /// Completed transactions
    pub transactions: u64,
}

impl SpiHost {
    /// Host with the bench timing of the reference test: 5 ticks setup,
    /// 5 between bytes, 10 after release.
    pub fn new() -> Self {
        SpiHost {
            pins: Inputs::default(),
            half_period: 4,
            setup: 5,
            byte_gap: 5,
            idle: 10,
            recorder: None,
            transactions: 0,
        }
    }

    /// Shortest half period at which responses come back in the same
    /// transaction for the given synchronizer depths.
    pub fn min_half_period(config: &ControllerConfig) -> u32 {
        (config.sck_latency() + 2).max(3)
    }

    pub fn with_half_period(mut self, ticks: u32) -> Self {
        self.half_period = ticks.max(1);
        self
    }

    pub fn pins(&self) -> Inputs {
        self.pins
    }

    pub fn set_prog_en(&mut self, on: bool) {
        self.pins.prog_en = on;
    }

    /// Column sense value presented to the controller from now on.
    pub fn set_col_sense(&mut self, value: u8) {
        self.pins.col_sense = crossbar::sense(value);
    }

    /// Record every following tick, keeping at most `capacity` samples.
    pub fn start_recording(&mut self, capacity: usize) {
        self.recorder = Some(VcdRecorder::new(capacity));
    }

    pub fn take_recording(&mut self) -> Option<VcdRecorder> {
        self.recorder.take()
    }

    /// Tick the controller `ticks` times with the current pins.
    pub fn run(&mut self, ctl: &mut Controller, ticks: u32) {
        for _ in 0..ticks {
            ctl.set_inputs(self.pins);
            ctl.tick();
            if let Some(rec) = &mut self.recorder {
                rec.sample(ctl);
            }
        }
    }

    /// Exchange one byte inside an open transaction. Returns the byte
    /// sampled on MISO.
    pub fn exchange_byte(&mut self, ctl: &mut Controller, mosi: u8) -> u8 {
        let mut miso = 0u8;
        for i in (0..8).rev() {
            self.pins.mosi = (mosi >> i) & 1 != 0;
            self.pins.sck = false;
            self.run(ctl, self.half_period);
            miso = (miso << 1) | ctl.outputs().miso as u8;
            self.pins.sck = true;
            self.run(ctl, self.half_period);
        }
        self.pins.sck = false;
        self.run(ctl, self.byte_gap);
        miso
    }

    /// Full transaction: select, exchange every byte, release.
    pub fn transaction(&mut self, ctl: &mut Controller, bytes: &[u8]) -> Vec<u8> {
        self.pins.cs_n = false;
        self.run(ctl, self.setup);
        let rsp = bytes.iter().map(|&b| self.exchange_byte(ctl, b)).collect();
        self.pins.cs_n = true;
        self.pins.mosi = false;
        self.run(ctl, self.idle);
        self.transactions += 1;
        rsp
    }

    /// Send an opcode with its payload in one transaction.
    pub fn command(&mut self, ctl: &mut Controller, opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + payload.len());
        bytes.push(opcode);
        bytes.extend_from_slice(payload);
        self.transaction(ctl, &bytes)
    }

    /// Tick until the controller is idle and ready. Returns false on timeout.
    pub fn wait_ready(&mut self, ctl: &mut Controller, max_ticks: u32) -> bool {
        for _ in 0..max_ticks {
            if ctl.is_idle() { return true; }
            self.run(ctl, 1);
        }
        ctl.is_idle()
    }

    /// READ_STATUS, response clocked out with a dummy byte.
    pub fn read_status(&mut self, ctl: &mut Controller) -> u8 {
        self.transaction(ctl, &[OP_READ_STATUS, OP_NOP])[1]
    }

    /// READ_CELL and fetch the sampled column value.
    ///
    /// The fetch transaction sends a NOP, so the controller sees one extra
    /// harmless command. Fails without fetching if the controller is still
    /// busy after `max_ticks`.
    pub fn read_cell(&mut self, ctl: &mut Controller, row_payload: u8, max_ticks: u32) -> Result<u8> {
        self.transaction(ctl, &[OP_READ_CELL, row_payload]);
        if !self.wait_ready(ctl, max_ticks) {
            return Err(Error::NotReady(max_ticks));
        }
        Ok(self.transaction(ctl, &[OP_NOP])[0])
    }
}

impl Default for SpiHost {
    fn default() -> Self { Self::new() }
}

/// Parse a host script line such as `"03 42 02"` or `"0x06,0x01,0x00"`.
pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let bytes = s
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| {
            let digits = t.trim_start_matches("0x").trim_start_matches("0X");
            u8::from_str_radix(digits, 16).map_err(|_| Error::HexByte(t.to_string()))
        })
        .collect::<Result<Vec<u8>>>()?;
    if bytes.is_empty() {
        return Err(Error::EmptyTransaction);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{OP_READ_COL, OP_SET_ROW};

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("03 42 02").unwrap(), vec![0x03, 0x42, 0x02]);
        assert_eq!(parse_hex_bytes("0x06,0x01, 0x00").unwrap(), vec![0x06, 0x01, 0x00]);
        assert!(matches!(parse_hex_bytes("01 zz"), Err(Error::HexByte(t)) if t == "zz"));
        assert!(matches!(parse_hex_bytes("100"), Err(Error::HexByte(_))));
        assert!(matches!(parse_hex_bytes("  "), Err(Error::EmptyTransaction)));
    }

    #[test]
    fn test_transaction_frames_bytes() {
        let mut ctl = Controller::default();
        let mut host = SpiHost::new();
        let rsp = host.transaction(&mut ctl, &[OP_SET_ROW, 0x5A]);
        assert_eq!(rsp.len(), 2);
        assert_eq!(ctl.bytes_received(), 2);
        assert_eq!(ctl.row_drive(), 0x5A);
        assert_eq!(host.transactions, 1);
        assert!(host.pins().cs_n);
    }

    #[test]
    fn test_read_status_helper() {
        let mut ctl = Controller::default();
        let mut host = SpiHost::new();
        assert_eq!(host.read_status(&mut ctl), 0x80);
    }

    #[test]
    fn test_col_sense_masked() {
        let mut ctl = Controller::default();
        let mut host = SpiHost::new();
        host.set_col_sense(0xFF);
        assert_eq!(host.pins().col_sense, 0x0F);
        assert_eq!(host.command(&mut ctl, OP_READ_COL, &[0x00])[1], 0x0F);
    }

    #[test]
    fn test_min_half_period() {
        assert_eq!(SpiHost::min_half_period(&ControllerConfig::default()), 4);
        assert_eq!(SpiHost::min_half_period(&ControllerConfig::collapsed()), 3);
        let deep = ControllerConfig::default().with_sync_stages(8, 8);
        assert_eq!(SpiHost::min_half_period(&deep), 9);
    }

    #[test]
    fn test_read_cell_times_out_while_forming() {
        let mut ctl = Controller::default();
        let mut host = SpiHost::new();
        host.set_prog_en(true);
        host.set_col_sense(0x05);
        host.command(&mut ctl, crate::dispatch::OP_FORM, &[0x00]);
        // the READ_CELL bytes are dropped while the FORM pulse runs
        assert!(matches!(host.read_cell(&mut ctl, 0x00, 100), Err(Error::NotReady(100))));
        assert!(host.wait_ready(&mut ctl, 10_000));
        assert_eq!(host.read_cell(&mut ctl, 0x00, 1_000).unwrap(), 0x05);
    }

    #[test]
    fn test_wait_ready_times_out_during_form() {
        let mut ctl = Controller::default();
        let mut host = SpiHost::new();
        host.set_prog_en(true);
        host.command(&mut ctl, crate::dispatch::OP_FORM, &[0x00]);
        assert!(!host.wait_ready(&mut ctl, 100));
        assert!(host.wait_ready(&mut ctl, 10_000));
    }
}
