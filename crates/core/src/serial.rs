//! Serial bit engine (SPI mode 0 slave).
//!
//! Deserializes MOSI into bytes, MSB first, and walks the outgoing register
//! out on MISO. It knows nothing about commands: the dispatcher loads the
//! outgoing register and consumes the `byte_ready` pulse, and the engine
//! keeps framing bytes whether anyone consumes them or not.
//!
//! Timing:
//! - chip-select inactive: bit counter held at 0, MISO preloaded with bit 7
//! - clock rising edge: shift MOSI in; after the 8th bit raise `byte_ready`
//!   for exactly one tick
//! - clock falling edge: present bit `7 - count` so it is settled before the
//!   host samples on the next rising edge

use crate::sync::Edges;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialEngine {
    /// Incoming shift register
    pub rx_shift: u8,
    /// Last complete incoming byte
    pub rx_data: u8,
    /// Bits received in the current byte (0–7)
    pub bit_count: u8,
    /// High for the single tick after a byte completes
    pub byte_ready: bool,
    /// MISO line
    pub miso: bool,
    /// Bytes framed since reset
    pub dbg_byte_count: u64,
}

impl SerialEngine {
    pub fn new() -> Self {
        SerialEngine {
            rx_shift: 0, rx_data: 0, bit_count: 0,
            byte_ready: false, miso: false, dbg_byte_count: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = SerialEngine::new();
    }

    /// Engine state after this tick. `tx` is the outgoing register as it
    /// stood at the end of the previous tick.
    pub fn next(&self, edges: &Edges, tx: u8) -> Self {
        let mut n = *self;
        n.byte_ready = false;

        if !edges.cs_active {
            n.bit_count = 0;
            n.miso = tx & 0x80 != 0;
            return n;
        }

        if edges.sck_rising {
            let shifted = (self.rx_shift << 1) | edges.mosi as u8;
            n.rx_shift = shifted;
            if self.bit_count == 7 {
                n.rx_data = shifted;
                n.byte_ready = true;
                n.bit_count = 0;
                n.dbg_byte_count += 1;
            } else {
                n.bit_count = self.bit_count + 1;
            }
        } else if edges.sck_falling {
            n.miso = tx_bit(tx, self.bit_count);
        }
        n
    }

    pub fn save_state(&self) -> crate::savestate::SerialState {
        crate::savestate::SerialState {
            rx_shift: self.rx_shift,
            rx_data: self.rx_data,
            bit_count: self.bit_count,
            byte_ready: self.byte_ready,
            miso: self.miso,
            bytes_received: self.dbg_byte_count,
        }
    }

    pub fn load_state(&mut self, s: &crate::savestate::SerialState) {
        self.rx_shift = s.rx_shift;
        self.rx_data = s.rx_data;
        self.bit_count = s.bit_count & 7;
        self.byte_ready = s.byte_ready;
        self.miso = s.miso;
        self.dbg_byte_count = s.bytes_received;
    }
}

impl Default for SerialEngine {
    fn default() -> Self { Self::new() }
}

/// Outgoing bit for a given bit count. Count 0 presents bit 7.
fn tx_bit(tx: u8, count: u8) -> bool {
    (tx >> (7 - (count & 7))) & 1 != 0
}
