//! Save state (checkpoint / restore) for the controller.
//!
//! Captures every register of the controller using bincode serialization
//! with deflate compression. The step-mode frontend uses it to checkpoint
//! and rewind a session; nothing is written to disk here.
//!
//! ## Format
//!
//! ```text
//! +------------------+
//! | Magic "XBST"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::{Serialize, Deserialize};

use crate::config::ControllerConfig;
use crate::dispatch::{CtlState, Fault};
use crate::error::{Error, Result};

/// Magic bytes identifying a controller save state.
const MAGIC: &[u8; 4] = b"XBST";
/// Current save state format version.
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8;

// ─── Per-component state structs ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub sck: u8,
    pub cs_n: u8,
    pub mosi: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialState {
    pub rx_shift: u8,
    pub rx_data: u8,
    pub bit_count: u8,
    pub byte_ready: bool,
    pub miso: bool,
    pub bytes_received: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchState {
    pub state: CtlState,
    pub cmd_reg: u8,
    pub data_reg1: u8,
    pub data_reg2: u8,
    pub ready: bool,
    pub error: bool,
    pub prog_done: bool,
    pub pulse_counter: u16,
    pub pulse_width: u16,
    pub form_width: u16,
    pub row_drive: u8,
    pub tx_data: u8,
    pub last_col: u8,
    pub last_fault: Option<Fault>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputState {
    pub cs_n: bool,
    pub sck: bool,
    pub mosi: bool,
    pub prog_en: bool,
    pub col_sense: u8,
    pub rst_n: bool,
}

// ─── Top-level save state ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveState {
    pub config: ControllerConfig,
    pub tick: u64,
    pub inputs: InputState,
    pub sync: SyncState,
    pub serial: SerialState,
    pub dispatch: DispatchState,
}

// ─── Encoding ───────────────────────────────────────────────────────────────

/// Encode a save state with header and deflate compression.
pub fn encode(state: &SaveState) -> Result<Vec<u8>> {
    let payload = bincode::serialize(state)?;
    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decode a save state, verifying magic and version.
pub fn decode(data: &[u8]) -> Result<SaveState> {
    if data.len() < HEADER_LEN {
        return Err(Error::StateTooSmall(data.len()));
    }
    if &data[0..4] != MAGIC {
        return Err(Error::BadMagic);
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(Error::UnsupportedVersion { found: version, expected: FORMAT_VERSION });
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
        .map_err(|e| Error::Decompress(format!("{:?}", e)))?;

    Ok(bincode::deserialize(&decompressed)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SaveState {
        SaveState {
            config: ControllerConfig::default(),
            tick: 1234,
            inputs: InputState { cs_n: true, sck: false, mosi: false, prog_en: true, col_sense: 5, rst_n: true },
            sync: SyncState { sck: 0, cs_n: 3, mosi: 0 },
            serial: SerialState { rx_shift: 0x42, rx_data: 0x42, bit_count: 0, byte_ready: false, miso: false, bytes_received: 12 },
            dispatch: DispatchState {
                state: CtlState::ProgWait,
                cmd_reg: 0x03, data_reg1: 0x42, data_reg2: 2,
                ready: false, error: false, prog_done: false,
                pulse_counter: 700, pulse_width: 1000, form_width: 5000,
                row_drive: 0x04, tx_data: 0, last_col: 0,
                last_fault: Some(Fault::Interlock(0x05)),
            },
        }
    }

    #[test]
    fn test_encode_decode() {
        let s = sample();
        let bytes = encode(&s).unwrap();
        assert_eq!(&bytes[0..4], b"XBST");
        assert_eq!(decode(&bytes).unwrap(), s);
    }

    #[test]
    fn test_rejects_bad_header() {
        assert!(matches!(decode(b"XB"), Err(Error::StateTooSmall(2))));
        assert!(matches!(decode(b"ABES\x01\x00\x00\x00"), Err(Error::BadMagic)));
        let mut bytes = encode(&sample()).unwrap();
        bytes[4] = 9;
        assert!(matches!(decode(&bytes), Err(Error::UnsupportedVersion { found: 9, expected: 1 })));
    }

    #[test]
    fn test_rejects_corrupt_payload() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.truncate(HEADER_LEN + 2);
        assert!(decode(&bytes).is_err());
    }
}
