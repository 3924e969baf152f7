//! Crossbar row/column glue.
//!
//! Pure bit mapping between command payloads and the two crossbar buses.
//! A payload byte selects one of eight rows with its top three bits; bit 1
//! carries the programming direction (1 = SET, 0 = RESET) and only matters
//! for PROG_CELL.
//!
//! The column sense bus is wired with four lines. Values are masked to
//! those four bits and zero-extended into the 8-bit registers.

use serde::{Serialize, Deserialize};

/// Wired column-sense lines.
pub const COL_SENSE_MASK: u8 = 0x0F;
/// Direction bit inside a PROG_CELL payload.
pub const DIR_BIT: u8 = 1 << 1;
/// Number of row lines on the drive bus.
pub const ROWS: u8 = 8;

/// Programming direction decoded from a payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    /// Only the selected row high
    Set,
    /// Only the selected row low, all others high
    Reset,
}

/// Row number (0–7) addressed by a payload byte.
pub fn row_index(payload: u8) -> u8 {
    payload >> 5
}

/// Build a payload byte addressing `row` (row is taken modulo 8).
pub fn row_payload(row: u8, polarity: Polarity) -> u8 {
    let dir = match polarity {
        Polarity::Set => DIR_BIT,
        Polarity::Reset => 0,
    };
    ((row % ROWS) << 5) | dir
}

pub fn one_hot(payload: u8) -> u8 {
    1 << row_index(payload)
}

pub fn polarity(payload: u8) -> Polarity {
    if payload & DIR_BIT != 0 { Polarity::Set } else { Polarity::Reset }
}

/// Drive pattern for a PROG_CELL pulse.
pub fn prog_pattern(payload: u8) -> u8 {
    match polarity(payload) {
        Polarity::Set => one_hot(payload),
        Polarity::Reset => !one_hot(payload),
    }
}

/// Drive pattern for a FORM pulse. Forming is always positive.
pub fn form_pattern(payload: u8) -> u8 {
    one_hot(payload)
}

/// Zero-extended column sense value.
pub fn sense(raw: u8) -> u8 {
    raw & COL_SENSE_MASK
}
