//! Command dispatcher: the controller's main state machine.
//!
//! The first byte of a transaction is latched as the opcode. Depending on
//! the opcode the dispatcher collects up to two payload bytes, acts on the
//! crossbar buses or the timing registers, and loads the outgoing register
//! for the host to clock out.
//!
//! Supported commands:
//! - 0x00: NOP
//! - 0x01: SET_ROW (row byte, raw drive value)
//! - 0x02: READ_COL → column sense
//! - 0x03: PROG_CELL (row/direction byte, multiplier byte), needs PROG_EN
//! - 0x04: READ_STATUS → {ready, error, prog_done, 00000}
//! - 0x05: FORM (row byte), needs PROG_EN
//! - 0x06: SET_TIMING (pulse width high byte, low byte)
//! - 0x07: READ_CELL (row byte) → column sense after the settle window
//!
//! Anything else, or a programming command without PROG_EN, sets the sticky
//! error bit and returns to Idle. The error bit is cleared whenever a new
//! transaction starts, whatever the dispatcher happens to be doing.
//!
//! Bytes that arrive while the dispatcher is not waiting for one (pulse in
//! progress, response pending) are dropped.

use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::crossbar;
use crate::pulse::PulseTimer;

pub const OP_NOP: u8 = 0x00;
pub const OP_SET_ROW: u8 = 0x01;
pub const OP_READ_COL: u8 = 0x02;
pub const OP_PROG_CELL: u8 = 0x03;
pub const OP_READ_STATUS: u8 = 0x04;
pub const OP_FORM: u8 = 0x05;
pub const OP_SET_TIMING: u8 = 0x06;
pub const OP_READ_CELL: u8 = 0x07;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Nop,
    SetRow,
    ReadCol,
    ProgCell,
    ReadStatus,
    Form,
    SetTiming,
    ReadCell,
    Unknown(u8),
}

impl Opcode {
    pub fn from_byte(b: u8) -> Self {
        match b {
            OP_NOP => Opcode::Nop,
            OP_SET_ROW => Opcode::SetRow,
            OP_READ_COL => Opcode::ReadCol,
            OP_PROG_CELL => Opcode::ProgCell,
            OP_READ_STATUS => Opcode::ReadStatus,
            OP_FORM => Opcode::Form,
            OP_SET_TIMING => Opcode::SetTiming,
            OP_READ_CELL => Opcode::ReadCell,
            other => Opcode::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Opcode::Nop => OP_NOP,
            Opcode::SetRow => OP_SET_ROW,
            Opcode::ReadCol => OP_READ_COL,
            Opcode::ProgCell => OP_PROG_CELL,
            Opcode::ReadStatus => OP_READ_STATUS,
            Opcode::Form => OP_FORM,
            Opcode::SetTiming => OP_SET_TIMING,
            Opcode::ReadCell => OP_READ_CELL,
            Opcode::Unknown(b) => b,
        }
    }

    /// Payload bytes the command consumes after the opcode.
    pub fn payload_len(self) -> usize {
        match self {
            Opcode::SetRow | Opcode::Form | Opcode::ReadCell => 1,
            Opcode::ProgCell | Opcode::SetTiming => 2,
            _ => 0,
        }
    }

    /// True if the command leaves a response in the outgoing register.
    pub fn has_response(self) -> bool {
        matches!(self, Opcode::ReadCol | Opcode::ReadStatus | Opcode::ReadCell)
    }

    /// Commands gated by the programming-enable interlock.
    pub fn needs_prog_en(self) -> bool {
        matches!(self, Opcode::ProgCell | Opcode::Form)
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::SetRow => "SET_ROW",
            Opcode::ReadCol => "READ_COL",
            Opcode::ProgCell => "PROG_CELL",
            Opcode::ReadStatus => "READ_STATUS",
            Opcode::Form => "FORM",
            Opcode::SetTiming => "SET_TIMING",
            Opcode::ReadCell => "READ_CELL",
            Opcode::Unknown(_) => "UNKNOWN",
        }
    }
}

/// Dispatcher state. There is no separate second-payload state: both bytes
/// of a two-byte command go through `Data1`. State code 3 is reserved for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CtlState {
    Idle,
    /// Opcode latched, dispatching / waiting for the first payload byte
    Cmd,
    /// Waiting for the second payload byte
    Data1,
    Execute,
    ProgPulse,
    ProgWait,
    ReadWait,
    Form,
    /// Response loaded, waiting for chip-select release
    Respond,
}

impl CtlState {
    /// 4-bit state code as exposed on the trace output.
    pub fn code(self) -> u8 {
        match self {
            CtlState::Idle => 0,
            CtlState::Cmd => 1,
            CtlState::Data1 => 2,
            CtlState::Execute => 4,
            CtlState::ProgPulse => 5,
            CtlState::ProgWait => 6,
            CtlState::ReadWait => 7,
            CtlState::Form => 8,
            CtlState::Respond => 9,
        }
    }
}

/// Why the error bit was last set. Diagnostic only, never sent to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fault {
    /// Opcode outside the command set
    Protocol(u8),
    /// PROG_CELL or FORM without PROG_EN
    Interlock(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusRegister {
    pub ready: bool,
    /// Sticky until the next transaction starts
    pub error: bool,
    pub prog_done: bool,
}

impl StatusRegister {
    /// READ_STATUS response byte.
    pub fn to_byte(&self) -> u8 {
        ((self.ready as u8) << 7) | ((self.error as u8) << 6) | ((self.prog_done as u8) << 5)
    }
}

/// What the dispatcher sees of the rest of the controller on one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchInputs {
    pub byte_ready: bool,
    pub rx_data: u8,
    pub cs_active: bool,
    pub cs_start: bool,
    pub prog_en: bool,
    /// Raw column-sense pins
    pub col_sense: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatcher {
    pub state: CtlState,
    pub cmd_reg: u8,
    pub data_reg1: u8,
    pub data_reg2: u8,
    pub status: StatusRegister,
    pub timer: PulseTimer,
    pub row_drive: u8,
    /// Outgoing register walked out by the serial engine
    pub tx_data: u8,
    /// Column value sampled by the last READ_CELL
    pub last_col: u8,
    pub last_fault: Option<Fault>,
    read_settle_ticks: u16,
}

impl Dispatcher {
    pub fn new(pulse_width: u16, form_width: u16, read_settle_ticks: u16) -> Self {
        Dispatcher {
            state: CtlState::Idle,
            cmd_reg: 0, data_reg1: 0, data_reg2: 0,
            status: StatusRegister { ready: true, error: false, prog_done: false },
            timer: PulseTimer::new(pulse_width, form_width),
            row_drive: 0,
            tx_data: 0,
            last_col: 0,
            last_fault: None,
            read_settle_ticks,
        }
    }

    pub fn opcode(&self) -> Opcode {
        Opcode::from_byte(self.cmd_reg)
    }

    pub fn read_settle_ticks(&self) -> u16 {
        self.read_settle_ticks
    }

    fn finish(&mut self) {
        self.status.ready = true;
        self.state = CtlState::Idle;
    }

    fn fault(&mut self, fault: Fault) {
        warn!("command fault: {:?}", fault);
        self.status.error = true;
        self.last_fault = Some(fault);
        self.finish();
    }

    /// Dispatcher state after this tick, computed only from `self` (the
    /// previous tick) and `io`.
    pub fn next(&self, io: &DispatchInputs) -> Self {
        let mut n = *self;

        if io.cs_start {
            n.status.error = false;
        }

        match self.state {
            CtlState::Idle => {
                n.status.ready = true;
                if io.cs_active && io.byte_ready {
                    n.cmd_reg = io.rx_data;
                    n.state = CtlState::Cmd;
                }
            }

            CtlState::Cmd => {
                n.status.ready = false;
                let op = self.opcode();
                match op {
                    Opcode::Nop => n.finish(),
                    Opcode::SetRow => {
                        if io.byte_ready {
                            n.data_reg1 = io.rx_data;
                            n.state = CtlState::Execute;
                        }
                    }
                    Opcode::ReadCol => {
                        n.tx_data = crossbar::sense(io.col_sense);
                        n.state = CtlState::Respond;
                    }
                    Opcode::ProgCell | Opcode::Form if !io.prog_en => {
                        n.fault(Fault::Interlock(self.cmd_reg));
                    }
                    Opcode::ProgCell | Opcode::SetTiming => {
                        if io.byte_ready {
                            n.data_reg1 = io.rx_data;
                            n.state = CtlState::Data1;
                        }
                    }
                    Opcode::ReadStatus => {
                        n.tx_data = self.status.to_byte();
                        n.state = CtlState::Respond;
                    }
                    Opcode::Form => {
                        if io.byte_ready {
                            n.data_reg1 = io.rx_data;
                            n.state = CtlState::Form;
                        }
                    }
                    Opcode::ReadCell => {
                        if io.byte_ready {
                            n.data_reg1 = io.rx_data;
                            n.row_drive = crossbar::one_hot(io.rx_data);
                            n.timer.load(self.read_settle_ticks);
                            n.state = CtlState::ReadWait;
                        }
                    }
                    Opcode::Unknown(b) => n.fault(Fault::Protocol(b)),
                }
                if n.state != CtlState::Cmd {
                    debug!("{} (0x{:02X}) -> {:?}", op.name(), self.cmd_reg, n.state);
                }
            }

            CtlState::Data1 => {
                if io.byte_ready {
                    n.data_reg2 = io.rx_data;
                    if self.opcode() == Opcode::SetTiming {
                        n.timer.pulse_width = ((self.data_reg1 as u16) << 8) | io.rx_data as u16;
                        debug!("pulse width = {}", n.timer.pulse_width);
                        n.finish();
                    } else {
                        n.state = CtlState::ProgPulse;
                    }
                }
            }

            CtlState::Execute => {
                n.row_drive = self.data_reg1;
                n.finish();
            }

            CtlState::ProgPulse => {
                n.status.prog_done = false;
                n.row_drive = crossbar::prog_pattern(self.data_reg1);
                n.timer.load(self.timer.program_count(self.data_reg2));
                debug!(
                    "program row {} {:?} pattern=0x{:02X} for {} ticks",
                    crossbar::row_index(self.data_reg1),
                    crossbar::polarity(self.data_reg1),
                    n.row_drive,
                    n.timer.counter
                );
                n.state = CtlState::ProgWait;
            }

            CtlState::Form => {
                n.row_drive = crossbar::form_pattern(self.data_reg1);
                n.timer.load(self.timer.form_width);
                debug!("form row {} for {} ticks", crossbar::row_index(self.data_reg1), n.timer.counter);
                n.state = CtlState::ProgWait;
            }

            CtlState::ProgWait => {
                if n.timer.countdown() {
                    n.row_drive = 0;
                    n.status.prog_done = true;
                    debug!("pulse complete");
                    n.finish();
                }
            }

            CtlState::ReadWait => {
                n.row_drive = crossbar::one_hot(self.data_reg1);
                if n.timer.countdown() {
                    let col = crossbar::sense(io.col_sense);
                    n.tx_data = col;
                    n.last_col = col;
                    n.row_drive = 0;
                    debug!("read row {} -> 0x{:02X}", crossbar::row_index(self.data_reg1), col);
                    n.state = CtlState::Respond;
                }
            }

            CtlState::Respond => {
                if !io.cs_active {
                    n.finish();
                }
            }
        }
        n
    }

    pub fn save_state(&self) -> crate::savestate::DispatchState {
        crate::savestate::DispatchState {
            state: self.state,
            cmd_reg: self.cmd_reg,
            data_reg1: self.data_reg1,
            data_reg2: self.data_reg2,
            ready: self.status.ready,
            error: self.status.error,
            prog_done: self.status.prog_done,
            pulse_counter: self.timer.counter,
            pulse_width: self.timer.pulse_width,
            form_width: self.timer.form_width,
            row_drive: self.row_drive,
            tx_data: self.tx_data,
            last_col: self.last_col,
            last_fault: self.last_fault,
        }
    }

    pub fn load_state(&mut self, s: &crate::savestate::DispatchState) {
        self.state = s.state;
        self.cmd_reg = s.cmd_reg;
        self.data_reg1 = s.data_reg1;
        self.data_reg2 = s.data_reg2;
        self.status = StatusRegister { ready: s.ready, error: s.error, prog_done: s.prog_done };
        self.timer = PulseTimer { counter: s.pulse_counter, pulse_width: s.pulse_width, form_width: s.form_width };
        self.row_drive = s.row_drive;
        self.tx_data = s.tx_data;
        self.last_col = s.last_col;
        self.last_fault = s.last_fault;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(1000, 5000, 10)
    }

    fn idle_io() -> DispatchInputs {
        DispatchInputs { cs_active: true, ..Default::default() }
    }

    fn byte(b: u8) -> DispatchInputs {
        DispatchInputs { byte_ready: true, rx_data: b, ..idle_io() }
    }

    /// Feed a byte then one quiet tick.
    fn feed(d: Dispatcher, b: u8, io: DispatchInputs) -> Dispatcher {
        let d = d.next(&DispatchInputs { byte_ready: true, rx_data: b, ..io });
        d.next(&io)
    }

    #[test]
    fn test_opcode_table() {
        for b in 0..=0xFFu8 {
            let op = Opcode::from_byte(b);
            assert_eq!(op.to_byte(), b);
            assert_eq!(matches!(op, Opcode::Unknown(_)), b > 0x07);
        }
        assert_eq!(Opcode::ProgCell.payload_len(), 2);
        assert_eq!(Opcode::ReadCell.payload_len(), 1);
        assert!(Opcode::Form.needs_prog_en());
        assert!(!Opcode::SetTiming.needs_prog_en());
    }

    #[test]
    fn test_status_byte() {
        let s = StatusRegister { ready: true, error: true, prog_done: true };
        assert_eq!(s.to_byte(), 0xE0);
        assert_eq!(dispatcher().status.to_byte(), 0x80);
    }

    #[test]
    fn test_set_row_raw() {
        let d = dispatcher().next(&byte(OP_SET_ROW));
        assert_eq!(d.state, CtlState::Cmd);
        let d = d.next(&idle_io());
        assert_eq!(d.state, CtlState::Cmd);
        assert!(!d.status.ready);
        let d = d.next(&byte(0xA5));
        assert_eq!(d.state, CtlState::Execute);
        let d = d.next(&idle_io());
        assert_eq!(d.row_drive, 0xA5);
        assert_eq!(d.state, CtlState::Idle);
        assert!(d.status.ready);
    }

    #[test]
    fn test_read_status_reports_previous_ready() {
        let d = dispatcher().next(&byte(OP_READ_STATUS));
        let d = d.next(&idle_io());
        assert_eq!(d.state, CtlState::Respond);
        assert_eq!(d.tx_data, 0x80);
        assert!(!d.status.ready);
        // held until chip-select release
        let d = d.next(&byte(0x00));
        assert_eq!(d.state, CtlState::Respond);
        let d = d.next(&DispatchInputs::default());
        assert_eq!(d.state, CtlState::Idle);
        assert!(d.status.ready);
    }

    #[test]
    fn test_interlock_refuses_without_payload() {
        let d = dispatcher().next(&byte(OP_PROG_CELL));
        let d = d.next(&idle_io());
        assert_eq!(d.state, CtlState::Idle);
        assert!(d.status.error);
        assert_eq!(d.last_fault, Some(Fault::Interlock(OP_PROG_CELL)));
        assert_eq!(d.row_drive, 0);
    }

    #[test]
    fn test_unknown_opcode() {
        let d = dispatcher().next(&byte(0xFF));
        let d = d.next(&idle_io());
        assert_eq!(d.state, CtlState::Idle);
        assert!(d.status.error);
        assert!(d.status.ready);
        assert!(!d.status.prog_done);
        assert_eq!(d.last_fault, Some(Fault::Protocol(0xFF)));
    }

    #[test]
    fn test_error_cleared_by_transaction_start_only() {
        let d = feed(dispatcher(), 0xFF, idle_io());
        assert!(d.status.error);
        // successful command keeps it
        let d = feed(d, OP_NOP, idle_io());
        assert!(d.status.error);
        let d = d.next(&DispatchInputs { cs_start: true, ..idle_io() });
        assert!(!d.status.error);
    }

    #[test]
    fn test_set_timing_big_endian() {
        let d = feed(dispatcher(), OP_SET_TIMING, idle_io());
        let d = feed(d, 0x01, idle_io());
        assert_eq!(d.state, CtlState::Data1);
        let d = d.next(&byte(0x00));
        assert_eq!(d.timer.pulse_width, 0x0100);
        assert_eq!(d.state, CtlState::Idle);
        assert!(d.status.ready);
    }

    #[test]
    fn test_prog_cell_pulse() {
        let io = DispatchInputs { prog_en: true, ..idle_io() };
        let mut d = dispatcher();
        d.timer.pulse_width = 4;
        let d = feed(d, OP_PROG_CELL, io);
        let d = feed(d, crossbar::row_payload(5, crossbar::Polarity::Reset), io);
        let mut d = d.next(&DispatchInputs { byte_ready: true, rx_data: 2, ..io });
        assert_eq!(d.state, CtlState::ProgPulse);
        let mut driven = 0;
        loop {
            d = d.next(&io);
            if d.row_drive != 0 {
                assert_eq!(d.row_drive, !(1u8 << 5));
                driven += 1;
            }
            if d.state == CtlState::Idle { break; }
        }
        assert_eq!(driven, 8);
        assert!(d.status.prog_done);
        assert_eq!(d.row_drive, 0);
    }

    #[test]
    fn test_bytes_dropped_while_busy() {
        let io = DispatchInputs { prog_en: true, ..idle_io() };
        let d = feed(dispatcher(), OP_FORM, io);
        let mut d = feed(d, 0x00, io);
        assert_eq!(d.state, CtlState::ProgWait);
        d = d.next(&DispatchInputs { byte_ready: true, rx_data: OP_SET_ROW, ..io });
        assert_eq!(d.state, CtlState::ProgWait);
        assert_eq!(d.cmd_reg, OP_FORM);
        while d.state != CtlState::Idle { d = d.next(&io); }
        assert!(d.status.prog_done);
        assert_eq!(d.cmd_reg, OP_FORM);
    }

    #[test]
    fn test_form_leaves_prog_done() {
        let io = DispatchInputs { prog_en: true, ..idle_io() };
        let mut d = dispatcher();
        d.status.prog_done = true;
        let d = feed(d, OP_FORM, io);
        let d = feed(d, 0x00, io);
        assert_eq!(d.state, CtlState::ProgWait);
        assert!(d.status.prog_done);
        assert_eq!(d.row_drive, 0x01);
    }

    #[test]
    fn test_read_cell_samples_after_settle() {
        let d = feed(dispatcher(), OP_READ_CELL, idle_io());
        let mut d = d.next(&byte(crossbar::row_payload(1, crossbar::Polarity::Reset)));
        assert_eq!(d.state, CtlState::ReadWait);
        assert_eq!(d.row_drive, 0b10);
        let mut ticks = 0;
        while d.state == CtlState::ReadWait {
            ticks += 1;
            // column value only valid on the last settle tick
            let col = if ticks == 10 { 0b0101 } else { 0b1111 };
            d = d.next(&DispatchInputs { col_sense: col, ..idle_io() });
        }
        assert_eq!(ticks, 10);
        assert_eq!(d.state, CtlState::Respond);
        assert_eq!(d.tx_data, 0x05);
        assert_eq!(d.last_col, 0x05);
        assert_eq!(d.row_drive, 0);
    }
}
