//! # xbar-core
//!
//! Tick-accurate model of a serial-commanded resistive crossbar controller.
//!
//! A host talks to the controller over a mode-0 SPI link (chip-select,
//! clock, MOSI, MISO). The controller drives an 8-line row bus and samples a
//! 4-line column sense bus of an external crossbar. Two modes share the
//! link: inference (drive rows, read column sums) and programming (timed
//! pulses on single cross-points, gated by the PROG_EN interlock).
//!
//! ## Architecture
//!
//! - [`Controller`] — Top-level model that wires the components together
//! - [`sync`] — Input synchronizer, fixed delay + edge tagging
//! - [`serial`] — Serial bit engine (byte framing, MISO shift-out)
//! - [`dispatch`] — Command dispatcher state machine and status register
//! - [`pulse`] — Shared pulse countdown and width presets
//! - [`crossbar`] — Row pattern encoding and column sense mapping
//! - [`stimulus`] — Bit-level SPI host used by tests and the frontend
//! - [`trace`] — VCD waveform recorder
//! - [`savestate`] — Checkpoint / restore of the full register set
//!
//! ## Tick model
//!
//! Every [`Controller::tick`] computes each component's next value from the
//! values committed at the end of the previous tick, then commits all of
//! them together. No component ever sees another one half-updated.

pub mod config;
pub mod crossbar;
pub mod dispatch;
pub mod error;
pub mod pulse;
pub mod savestate;
pub mod serial;
pub mod stimulus;
pub mod sync;
pub mod trace;

use tracing::{debug, trace};

pub use config::ControllerConfig;
pub use dispatch::{CtlState, Fault, Opcode, StatusRegister};
pub use error::{Error, Result};
pub use stimulus::SpiHost;
pub use trace::VcdRecorder;

use dispatch::{DispatchInputs, Dispatcher};
use serial::SerialEngine;
use sync::Synchronizer;

/// Reset value of the programming pulse width (ticks per multiplier unit)
pub const PULSE_WIDTH_DEFAULT: u16 = 1000;
/// Forming pulse length in ticks
pub const FORM_WIDTH_DEFAULT: u16 = 5000;
/// READ_CELL row settle window in ticks
pub const READ_SETTLE_TICKS: u16 = 10;
/// Delay stages on the serial clock and data lines
pub const SCK_SYNC_STAGES: u8 = 3;
/// Delay stages on chip-select
pub const CS_SYNC_STAGES: u8 = 2;
/// Reference controller clock: 10 MHz (100 ns per tick)
pub const CLOCK_HZ: u32 = 10_000_000;

/// External input pins, sampled once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inputs {
    /// Chip-select, active low
    pub cs_n: bool,
    pub sck: bool,
    pub mosi: bool,
    /// Programming-enable interlock
    pub prog_en: bool,
    /// Column sense bus; only the low four bits are wired
    pub col_sense: u8,
}

impl Default for Inputs {
    fn default() -> Self {
        Inputs { cs_n: true, sck: false, mosi: false, prog_en: false, col_sense: 0 }
    }
}

/// Output pins as committed at the end of the last tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outputs {
    pub row_drive: u8,
    pub miso: bool,
    pub ready: bool,
    pub error: bool,
    pub prog_done: bool,
}

/// Main controller model combining all components
pub struct Controller {
    config: ControllerConfig,
    inputs: Inputs,
    /// Reset line, active low. While low, every tick re-applies reset.
    rst_n: bool,
    sync: Synchronizer,
    serial: SerialEngine,
    dispatch: Dispatcher,
    /// Ticks since construction
    pub tick: u64,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        let config = config.normalized();
        Controller {
            inputs: Inputs::default(),
            rst_n: true,
            sync: Synchronizer::new(&config),
            serial: SerialEngine::new(),
            dispatch: Dispatcher::new(config.pulse_width, config.form_width, config.read_settle_ticks),
            tick: 0,
            config,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Return every register to its reset value. Inputs are left as they are.
    pub fn reset(&mut self) {
        self.sync = Synchronizer::new(&self.config);
        self.serial.reset();
        self.dispatch = Dispatcher::new(
            self.config.pulse_width, self.config.form_width, self.config.read_settle_ticks);
        debug!("controller reset");
    }

    /// Drive the active-low reset line. Asserting it resets immediately.
    pub fn set_rst_n(&mut self, level: bool) {
        if !level { self.reset(); }
        self.rst_n = level;
    }

    pub fn set_inputs(&mut self, inputs: Inputs) {
        self.inputs = inputs;
    }

    pub fn inputs(&self) -> Inputs {
        self.inputs
    }

    /// Advance one clock cycle.
    pub fn tick(&mut self) {
        self.tick += 1;
        if !self.rst_n {
            self.reset();
            return;
        }

        let edges = self.sync.edges();
        let next_sync = self.sync.next(&self.inputs);
        let next_serial = self.serial.next(&edges, self.dispatch.tx_data);
        let next_dispatch = self.dispatch.next(&DispatchInputs {
            byte_ready: self.serial.byte_ready,
            rx_data: self.serial.rx_data,
            cs_active: edges.cs_active,
            cs_start: edges.cs_start,
            prog_en: self.inputs.prog_en,
            col_sense: self.inputs.col_sense,
        });

        if next_dispatch.state != self.dispatch.state {
            trace!("tick {}: {:?} -> {:?}", self.tick, self.dispatch.state, next_dispatch.state);
        }

        self.sync = next_sync;
        self.serial = next_serial;
        self.dispatch = next_dispatch;
    }

    pub fn tick_n(&mut self, n: u64) {
        for _ in 0..n { self.tick(); }
    }

    pub fn outputs(&self) -> Outputs {
        Outputs {
            row_drive: self.dispatch.row_drive,
            miso: self.serial.miso,
            ready: self.dispatch.status.ready,
            error: self.dispatch.status.error,
            prog_done: self.dispatch.status.prog_done,
        }
    }

    pub fn state(&self) -> CtlState { self.dispatch.state }
    pub fn status(&self) -> StatusRegister { self.dispatch.status }
    pub fn row_drive(&self) -> u8 { self.dispatch.row_drive }
    pub fn cmd_reg(&self) -> u8 { self.dispatch.cmd_reg }
    pub fn data_regs(&self) -> (u8, u8) { (self.dispatch.data_reg1, self.dispatch.data_reg2) }
    pub fn pulse_width(&self) -> u16 { self.dispatch.timer.pulse_width }
    pub fn form_width(&self) -> u16 { self.dispatch.timer.form_width }
    pub fn pulse_counter(&self) -> u16 { self.dispatch.timer.counter }
    pub fn tx_data(&self) -> u8 { self.dispatch.tx_data }
    pub fn last_col(&self) -> u8 { self.dispatch.last_col }
    pub fn last_fault(&self) -> Option<Fault> { self.dispatch.last_fault }
    pub fn bit_count(&self) -> u8 { self.serial.bit_count }
    /// Bytes framed by the serial engine since reset, consumed or not
    pub fn bytes_received(&self) -> u64 { self.serial.dbg_byte_count }

    /// Idle and ready for the next command.
    pub fn is_idle(&self) -> bool {
        self.dispatch.state == CtlState::Idle && self.dispatch.status.ready
    }

    /// Dump all registers as a formatted string
    pub fn dump_regs(&self) -> String {
        let d = &self.dispatch;
        let i = &self.inputs;
        let mut s = String::new();
        s.push_str(&format!("tick={}  state={:?}  cmd=0x{:02X} ({})\n",
            self.tick, d.state, d.cmd_reg, d.opcode().name()));
        s.push_str(&format!("data1=0x{:02X}  data2=0x{:02X}  tx=0x{:02X}  last_col=0x{:02X}\n",
            d.data_reg1, d.data_reg2, d.tx_data, d.last_col));
        s.push_str(&format!("pulse_width={}  form_width={}  counter={}\n",
            d.timer.pulse_width, d.timer.form_width, d.timer.counter));
        s.push_str(&format!("row_drive={:08b}  ready={} error={} prog_done={}",
            d.row_drive, d.status.ready as u8, d.status.error as u8, d.status.prog_done as u8));
        if let Some(f) = d.last_fault { s.push_str(&format!("  last_fault={:?}", f)); }
        s.push('\n');
        s.push_str(&format!("pins: cs_n={} sck={} mosi={} prog_en={} col={:04b}  miso={} bits={}",
            i.cs_n as u8, i.sck as u8, i.mosi as u8, i.prog_en as u8,
            crossbar::sense(i.col_sense), self.serial.miso as u8, self.serial.bit_count));
        s
    }

    /// Capture the full controller state.
    pub fn capture_state(&self) -> savestate::SaveState {
        let i = &self.inputs;
        savestate::SaveState {
            config: self.config.clone(),
            tick: self.tick,
            inputs: savestate::InputState {
                cs_n: i.cs_n, sck: i.sck, mosi: i.mosi,
                prog_en: i.prog_en, col_sense: i.col_sense, rst_n: self.rst_n,
            },
            sync: self.sync.save_state(),
            serial: self.serial.save_state(),
            dispatch: self.dispatch.save_state(),
        }
    }

    /// Restore a captured state, including its configuration.
    pub fn restore_state(&mut self, s: &savestate::SaveState) {
        self.config = s.config.clone().normalized();
        self.tick = s.tick;
        self.inputs = Inputs {
            cs_n: s.inputs.cs_n, sck: s.inputs.sck, mosi: s.inputs.mosi,
            prog_en: s.inputs.prog_en, col_sense: s.inputs.col_sense,
        };
        self.rst_n = s.inputs.rst_n;
        self.sync.load_state(&self.config, &s.sync);
        self.serial.load_state(&s.serial);
        self.dispatch = Dispatcher::new(
            self.config.pulse_width, self.config.form_width, self.config.read_settle_ticks);
        self.dispatch.load_state(&s.dispatch);
    }

    /// Serialize the full state (compressed).
    pub fn save_state(&self) -> Result<Vec<u8>> {
        savestate::encode(&self.capture_state())
    }

    /// Load a state produced by [`Controller::save_state`].
    pub fn load_state(&mut self, data: &[u8]) -> Result<()> {
        let s = savestate::decode(data)?;
        self.restore_state(&s);
        Ok(())
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(ControllerConfig::default())
    }
}
